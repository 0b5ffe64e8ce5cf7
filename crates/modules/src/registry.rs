//! Module registry — manifest discovery, TTL caching, permission filtering.
//!
//! At startup and whenever the cache expires, the registry polls every
//! configured module endpoint for its manifest. A module that fails to
//! respond keeps its last error on record and drops out of `list_tools`
//! until the next successful refresh; one module's failure never aborts
//! discovery of the others.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::RwLock;

use swb_domain::config::ModulesConfig;
use swb_domain::error::{Error, Result};
use swb_domain::manifest::{ModuleManifest, Permission, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
struct CachedManifest {
    manifest: ModuleManifest,
    base_url: String,
    fetched_at: Instant,
}

/// Last failure recorded for a module that did not answer its manifest poll.
#[derive(Debug, Clone)]
pub struct ModuleError {
    pub module_name: String,
    pub error: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModuleRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ModuleRegistry {
    endpoints: HashMap<String, String>,
    cache: RwLock<HashMap<String, CachedManifest>>,
    last_errors: RwLock<HashMap<String, ModuleError>>,
    ttl: Duration,
    manifest_timeout: Duration,
    client: reqwest::Client,
    /// Serializes refreshes so concurrent expiry checks trigger one fetch.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ModuleRegistry {
    pub fn new(config: &ModulesConfig) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            cache: RwLock::new(HashMap::new()),
            last_errors: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            manifest_timeout: Duration::from_millis(config.manifest_timeout_ms),
            client: reqwest::Client::new(),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    // ── Discovery ──────────────────────────────────────────────────

    /// Poll every configured module for its manifest. Failures are recorded
    /// per module and do not abort the rest of the sweep.
    pub async fn refresh(&self) {
        let _guard = self.refresh_lock.lock().await;

        let fetches = self.endpoints.iter().map(|(name, base_url)| {
            let name = name.clone();
            let base_url = base_url.clone();
            async move {
                let result = self.fetch_manifest(&name, &base_url).await;
                (name, base_url, result)
            }
        });

        for (name, base_url, result) in join_all(fetches).await {
            match result {
                Ok(manifest) => {
                    tracing::debug!(
                        module = %name,
                        tools = manifest.tools.len(),
                        "manifest refreshed"
                    );
                    self.last_errors.write().remove(&name);
                    self.cache.write().insert(
                        name,
                        CachedManifest {
                            manifest,
                            base_url,
                            fetched_at: Instant::now(),
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(module = %name, error = %e, "manifest refresh failed");
                    // Evict any stale entry: a module we cannot reach stays
                    // invisible until it answers again.
                    self.cache.write().remove(&name);
                    self.last_errors.write().insert(
                        name.clone(),
                        ModuleError {
                            module_name: name,
                            error: e.to_string(),
                            at: chrono::Utc::now(),
                        },
                    );
                }
            }
        }
    }

    async fn fetch_manifest(&self, name: &str, base_url: &str) -> Result<ModuleManifest> {
        let url = format!("{}/manifest", base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .timeout(self.manifest_timeout)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("HTTP {} from module {name}", status.as_u16())));
        }

        let manifest: ModuleManifest = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("invalid manifest from module {name}: {e}")))?;
        manifest.validate()?;
        if manifest.module_name != name {
            return Err(Error::validation(
                "module_name",
                format!(
                    "manifest declares '{}' but endpoint is configured as '{name}'",
                    manifest.module_name
                ),
            ));
        }
        Ok(manifest)
    }

    /// Refresh only the entries whose TTL has expired (or were never
    /// fetched). Called opportunistically before reads.
    pub async fn ensure_fresh(&self) {
        let expired = {
            let cache = self.cache.read();
            self.endpoints.keys().any(|name| {
                cache
                    .get(name)
                    .map(|c| c.fetched_at.elapsed() >= self.ttl)
                    .unwrap_or(true)
            })
        };
        if expired {
            self.refresh().await;
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Tools visible to a user: permission-gated and, when a persona
    /// restricts modules, allowlist-gated. Filtering happens here, before
    /// the list ever reaches the LLM.
    pub fn list_tools(
        &self,
        user_permission: Permission,
        persona_allowlist: Option<&[String]>,
    ) -> Vec<ToolDefinition> {
        let cache = self.cache.read();
        let mut tools: Vec<ToolDefinition> = Vec::new();
        for cached in cache.values() {
            if let Some(allowlist) = persona_allowlist {
                if !allowlist.contains(&cached.manifest.module_name) {
                    continue;
                }
            }
            for tool in &cached.manifest.tools {
                if tool.required_permission <= user_permission {
                    tools.push(tool.clone());
                }
            }
        }
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Resolve a tool name to its module's base URL and definition.
    pub fn lookup(&self, tool_name: &str) -> Result<(String, ToolDefinition)> {
        let module = tool_name.split('.').next().unwrap_or(tool_name);
        let cache = self.cache.read();
        let cached = cache
            .get(module)
            .ok_or_else(|| Error::UnknownTool(tool_name.to_string()))?;
        let tool = cached
            .manifest
            .tools
            .iter()
            .find(|t| t.name == tool_name)
            .ok_or_else(|| Error::UnknownTool(tool_name.to_string()))?;
        Ok((cached.base_url.clone(), tool.clone()))
    }

    /// Modules currently failing their manifest poll.
    pub fn module_errors(&self) -> Vec<ModuleError> {
        self.last_errors.read().values().cloned().collect()
    }

    /// Number of modules with a live cached manifest.
    pub fn module_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Test/bootstrap hook: seed a manifest without a network fetch.
    pub fn insert_manifest(&self, base_url: impl Into<String>, manifest: ModuleManifest) {
        self.cache.write().insert(
            manifest.module_name.clone(),
            CachedManifest {
                manifest,
                base_url: base_url.into(),
                fetched_at: Instant::now(),
            },
        );
    }
}
