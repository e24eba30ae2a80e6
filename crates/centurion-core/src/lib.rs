pub mod bus;
pub mod config;
pub mod envelope;
pub mod error;
pub mod keyring;
pub mod types;

pub use bus::EventBus;
pub use config::CenturionConfig;
pub use envelope::{EnvelopeBuilder, EventEnvelope};
pub use error::{CenturionError, Result};
