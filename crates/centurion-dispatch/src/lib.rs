//! Dispatch service (C10), prompt/response builder (C11), and outbound
//! sender (C12): the per-conversation turn that runs once the debounce
//! timer fires, from prompt assembly through qualification and handoff.

pub mod db;
pub mod embed;
pub mod events;
pub mod outbound;
pub mod prompt;
pub mod service;

pub use embed::embed_text;
pub use events::QualificationEventLog;
pub use outbound::OutboundSender;
pub use prompt::{build_system_prompt, chunk_text, parse_response, trim_pending, MediaPlanItem, ParsedResponse};
pub use service::{DispatchService, NoopToolSetProvider, TestRunOutcome, TestUsage, ToolSetProvider};
