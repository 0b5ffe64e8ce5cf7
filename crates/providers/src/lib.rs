//! LLM provider adapters and the model router.
//!
//! Each adapter translates between the canonical message/tool schema in
//! `swb-domain` and one vendor wire format. The [`router::LlmRouter`]
//! selects an adapter by model-name glob pattern and walks the configured
//! fallback chain on transient failures.

pub mod anthropic;
pub mod google;
pub mod openai_compat;
pub mod registry;
pub mod router;
pub mod traits;
mod util;

pub use registry::ProviderRegistry;
pub use router::LlmRouter;
pub use traits::{ChatRequest, LlmProvider, LlmResponse, StopReason};
