use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// UUIDv7 is time-sortable — handy for log correlation and ORDER BY id.
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id_newtype!(CompanyId);
id_newtype!(LeadId);
id_newtype!(ConversationId);
id_newtype!(MessageId);
id_newtype!(CenturionId);
id_newtype!(ChannelInstanceId);

/// Debounce state machine for a conversation (C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebounceState {
    Idle,
    Waiting,
    Processing,
}

impl fmt::Display for DebounceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebounceState::Idle => write!(f, "idle"),
            DebounceState::Waiting => write!(f, "waiting"),
            DebounceState::Processing => write!(f, "processing"),
        }
    }
}

impl std::str::FromStr for DebounceState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(DebounceState::Idle),
            "waiting" => Ok(DebounceState::Waiting),
            "processing" => Ok(DebounceState::Processing),
            other => Err(format!("unknown debounce state: {}", other)),
        }
    }
}

/// Lead lifecycle stage. Terminal states never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    New,
    Contacted,
    FollowUpPending,
    FollowUpSent,
    ProactiveReplied,
    Qualified,
    HandoffDone,
    ClosedLost,
}

impl LifecycleStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleStage::Qualified | LifecycleStage::HandoffDone | LifecycleStage::ClosedLost
        )
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleStage::New => "new",
            LifecycleStage::Contacted => "contacted",
            LifecycleStage::FollowUpPending => "follow_up_pending",
            LifecycleStage::FollowUpSent => "follow_up_sent",
            LifecycleStage::ProactiveReplied => "proactive_replied",
            LifecycleStage::Qualified => "qualified",
            LifecycleStage::HandoffDone => "handoff_done",
            LifecycleStage::ClosedLost => "closed_lost",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for LifecycleStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(LifecycleStage::New),
            "contacted" => Ok(LifecycleStage::Contacted),
            "follow_up_pending" => Ok(LifecycleStage::FollowUpPending),
            "follow_up_sent" => Ok(LifecycleStage::FollowUpSent),
            "proactive_replied" => Ok(LifecycleStage::ProactiveReplied),
            "qualified" => Ok(LifecycleStage::Qualified),
            "handoff_done" => Ok(LifecycleStage::HandoffDone),
            "closed_lost" => Ok(LifecycleStage::ClosedLost),
            other => Err(format!("unknown lifecycle stage: {}", other)),
        }
    }
}

/// Channel type a conversation runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Whatsapp,
    Instagram,
    Telegram,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelType::Whatsapp => "whatsapp",
            ChannelType::Instagram => "instagram",
            ChannelType::Telegram => "telegram",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(ChannelType::Whatsapp),
            "instagram" => Ok(ChannelType::Instagram),
            "telegram" => Ok(ChannelType::Telegram),
            other => Err(format!("unknown channel type: {}", other)),
        }
    }
}

/// Content type of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Audio,
    Image,
    Video,
    Document,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentType::Text => "text",
            ContentType::Audio => "audio",
            ContentType::Image => "image",
            ContentType::Video => "video",
            ContentType::Document => "document",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentType::Text),
            "audio" => Ok(ContentType::Audio),
            "image" => Ok(ContentType::Image),
            "video" => Ok(ContentType::Video),
            "document" => Ok(ContentType::Document),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

/// Direction of a message relative to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// Validates a SQL identifier destined for string interpolation (tenant
/// schema/table names for ATTACHed databases). Only lowercase alnum and
/// underscore are accepted — mirrors the handoff service's `_quote_ident`.
pub fn is_safe_sql_ident(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
