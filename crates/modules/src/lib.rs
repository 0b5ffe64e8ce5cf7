//! Module discovery and tool dispatch.
//!
//! Modules are independently deployed HTTP services speaking a uniform
//! protocol: `GET /manifest` describes their tools, `POST /execute` runs
//! one. The [`registry::ModuleRegistry`] caches manifests with a TTL and
//! filters tools by permission; the [`dispatch::ToolDispatcher`] executes a
//! single call with authoritative user-context injection.

pub mod cancel;
pub mod dispatch;
pub mod registry;

pub use cancel::CancelToken;
pub use dispatch::ToolDispatcher;
pub use registry::ModuleRegistry;
