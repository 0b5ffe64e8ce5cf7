//! Module manifests — the self-description every module service serves at
//! `GET /manifest`, and the permission model used to filter its tools.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permission levels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ordered clearance levels. Declaration order gives the ordering:
/// `Guest < User < Admin < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Guest,
    User,
    Admin,
    Owner,
}

impl Default for Permission {
    fn default() -> Self {
        Self::User
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Permission::Guest => "guest",
            Permission::User => "user",
            Permission::Admin => "admin",
            Permission::Owner => "owner",
        };
        f.write_str(s)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool parameter schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    fn json_schema_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// Closed set of accepted string values, when the module declares one.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool definition & manifest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool a module exposes. `name` is globally unique and prefixed by the
/// owning module (`<module>.<op>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    #[serde(default)]
    pub required_permission: Permission,
}

impl ToolDefinition {
    /// Module prefix of the tool name (everything before the first `.`).
    pub fn module_name(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// Render the parameter list as the JSON Schema object handed to the LLM.
    pub fn input_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<serde_json::Value> = Vec::new();
        for p in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), p.kind.json_schema_type().into());
            if !p.description.is_empty() {
                prop.insert("description".into(), p.description.clone().into());
            }
            if let Some(values) = &p.allowed_values {
                prop.insert(
                    "enum".into(),
                    serde_json::Value::Array(
                        values.iter().map(|v| v.clone().into()).collect(),
                    ),
                );
            }
            properties.insert(p.name.clone(), serde_json::Value::Object(prop));
            if p.required {
                required.push(p.name.clone().into());
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A module's self-description, served at `GET /manifest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub module_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl ModuleManifest {
    /// Check the structural invariants: every tool name carries the module
    /// prefix, and no tool name appears twice.
    pub fn validate(&self) -> Result<()> {
        if self.module_name.is_empty() {
            return Err(Error::validation("module_name", "must not be empty"));
        }
        let prefix = format!("{}.", self.module_name);
        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !tool.name.starts_with(&prefix) {
                return Err(Error::validation(
                    format!("tools.{}", tool.name),
                    format!("tool name must be prefixed with '{prefix}'"),
                ));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(Error::validation(
                    format!("tools.{}", tool.name),
                    "duplicate tool name",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_tool() -> ToolDefinition {
        ToolDefinition {
            name: "research.web_search".into(),
            description: "Search the web".into(),
            parameters: vec![
                ToolParameter {
                    name: "query".into(),
                    kind: ParamKind::String,
                    description: "Search query".into(),
                    required: true,
                    allowed_values: None,
                },
                ToolParameter {
                    name: "limit".into(),
                    kind: ParamKind::Integer,
                    description: String::new(),
                    required: false,
                    allowed_values: None,
                },
            ],
            required_permission: Permission::User,
        }
    }

    #[test]
    fn permission_ordering() {
        assert!(Permission::Guest < Permission::User);
        assert!(Permission::User < Permission::Admin);
        assert!(Permission::Admin < Permission::Owner);
    }

    #[test]
    fn permission_snake_case_serde() {
        assert_eq!(serde_json::to_string(&Permission::Guest).unwrap(), "\"guest\"");
        let p: Permission = serde_json::from_str("\"owner\"").unwrap();
        assert_eq!(p, Permission::Owner);
    }

    #[test]
    fn module_name_from_tool() {
        assert_eq!(search_tool().module_name(), "research");
    }

    #[test]
    fn input_schema_shape() {
        let schema = search_tool().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["required"], serde_json::json!(["query"]));
    }

    #[test]
    fn input_schema_enum_values() {
        let tool = ToolDefinition {
            name: "deploy.release".into(),
            description: String::new(),
            parameters: vec![ToolParameter {
                name: "env".into(),
                kind: ParamKind::String,
                description: String::new(),
                required: true,
                allowed_values: Some(vec!["staging".into(), "prod".into()]),
            }],
            required_permission: Permission::Admin,
        };
        let schema = tool.input_schema();
        assert_eq!(schema["properties"]["env"]["enum"], serde_json::json!(["staging", "prod"]));
    }

    #[test]
    fn manifest_roundtrip() {
        let manifest = ModuleManifest {
            module_name: "research".into(),
            description: "Web research".into(),
            tools: vec![search_tool()],
        };
        let json = serde_json::to_string(&manifest).unwrap();
        let back: ModuleManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.module_name, "research");
        assert_eq!(back.tools.len(), 1);
        assert_eq!(back.tools[0].name, "research.web_search");
        assert_eq!(back.tools[0].required_permission, Permission::User);
    }

    #[test]
    fn manifest_ignores_unknown_fields() {
        let json = serde_json::json!({
            "module_name": "research",
            "description": "x",
            "tools": [],
            "extra_field_from_future_version": {"a": 1},
        });
        let m: ModuleManifest = serde_json::from_value(json).unwrap();
        assert_eq!(m.module_name, "research");
    }

    #[test]
    fn manifest_validate_rejects_unprefixed_tool() {
        let manifest = ModuleManifest {
            module_name: "garmin".into(),
            description: String::new(),
            tools: vec![ToolDefinition {
                name: "web_search".into(),
                description: String::new(),
                parameters: vec![],
                required_permission: Permission::User,
            }],
        };
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("prefixed"));
    }

    #[test]
    fn manifest_validate_rejects_duplicate_tool() {
        let manifest = ModuleManifest {
            module_name: "research".into(),
            description: String::new(),
            tools: vec![search_tool(), search_tool()],
        };
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
