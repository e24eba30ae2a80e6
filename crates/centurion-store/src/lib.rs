pub mod db;
pub mod models;
pub mod repository;

pub use db::init_db;
pub use models::{CenturionConfigRow, Conversation, Lead, Message};
pub use repository::{
    load_centurion_config, ConversationRepository, LeadRepository, MessageRepository, SharedConn,
};
