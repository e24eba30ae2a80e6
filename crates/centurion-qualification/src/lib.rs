//! Qualification engine (C13): deterministic `field_present` scoring
//! topped up by an optional LLM-assisted pass, driven by a tenant-defined
//! `QualificationRules` document.

pub mod engine;
pub mod extract;
pub mod openai;
pub mod rules;

pub use engine::{evaluate, CriterionOutcome, LlmQualifier, QualificationResult};
pub use extract::extract_known_fields;
pub use openai::OpenAiQualifier;
pub use rules::{parse_rules, rules_hash, Criterion, CriterionType, QualificationRules};
