use crate::adapter::{ChannelAdapter, InstagramAdapter, TelegramAdapter, WhatsappAdapter};
use centurion_core::error::{CenturionError, Result};
use centurion_core::types::ChannelType;
use std::collections::HashMap;

/// Dispatches to the right per-channel-type adapter (C5). Built once at
/// startup with the three built-in adapters; additional channel types would
/// register here the same way.
pub struct ChannelRouter {
    adapters: HashMap<ChannelType, Box<dyn ChannelAdapter>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        let mut adapters: HashMap<ChannelType, Box<dyn ChannelAdapter>> = HashMap::new();
        adapters.insert(ChannelType::Whatsapp, Box::new(WhatsappAdapter));
        adapters.insert(ChannelType::Instagram, Box::new(InstagramAdapter));
        adapters.insert(ChannelType::Telegram, Box::new(TelegramAdapter));
        Self { adapters }
    }

    pub fn get(&self, channel: ChannelType) -> Result<&dyn ChannelAdapter> {
        self.adapters
            .get(&channel)
            .map(|b| b.as_ref())
            .ok_or_else(|| CenturionError::Channel {
                channel: channel.to_string(),
                reason: "no adapter registered".to_string(),
            })
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}
