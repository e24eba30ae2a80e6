//! Follow-up scheduler and worker (C14): schedules inactivity-triggered
//! re-engagement attempts per lead/rule and works through the due queue
//! with bounded retries.

pub mod adapter_llm;
pub mod db;
pub mod repository;
pub mod worker;

pub use adapter_llm::LlmFollowupAdapter;
pub use repository::{FollowupQueueItem, FollowupRepository, FollowupRule, FollowupStatus};
pub use worker::{FollowUpSender, FollowupMessageAdapter, FollowupWorker, NoopFollowupMessageAdapter};
