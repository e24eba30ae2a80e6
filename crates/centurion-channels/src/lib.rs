pub mod adapter;
pub mod router;
pub mod types;

pub use adapter::ChannelAdapter;
pub use router::ChannelRouter;
pub use types::{InboundMedia, NormalizedInbound, OutboundMessage};
