//! Scheduler engine: durable job records, a ticker worker, per-type
//! condition evaluators, placeholder rendering, cascading workflow
//! failure, and completion dispatch.

pub mod cron;
pub mod eval;
pub mod model;
pub mod placeholder;
pub mod store;
pub mod tools;
pub mod validation;
pub mod worker;

pub use model::{JobStatus, JobType, OnComplete, ScheduledJob, Workflow, WorkflowStatus};
pub use store::JobStore;
pub use worker::{SchedulerWorker, WebhookDedupe};
