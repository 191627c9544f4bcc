//! Message log records: what the persistence pipeline writes for every
//! user/assistant turn.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::turn::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Widget,
    Whatsapp,
    Voice,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Widget => "WIDGET",
            Channel::Whatsapp => "WHATSAPP",
            Channel::Voice => "VOICE",
        }
    }
}

/// Per-channel metadata. Known fields are typed; `extra` carries anything
/// else the channel adapter attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelMetadata {
    Widget {
        #[serde(default)]
        origin: Option<String>,
        #[serde(default)]
        page_url: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        extra: BTreeMap<String, serde_json::Value>,
    },
    Whatsapp {
        phone_number: String,
        #[serde(default)]
        profile_name: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        extra: BTreeMap<String, serde_json::Value>,
    },
    Voice {
        call_id: String,
        #[serde(default)]
        caller_number: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        extra: BTreeMap<String, serde_json::Value>,
    },
}

impl ChannelMetadata {
    pub fn widget() -> Self {
        ChannelMetadata::Widget {
            origin: None,
            page_url: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            ChannelMetadata::Widget { .. } => Channel::Widget,
            ChannelMetadata::Whatsapp { .. } => Channel::Whatsapp,
            ChannelMetadata::Voice { .. } => Channel::Voice,
        }
    }
}

/// One turn to be written to the message log. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub unique_client_id: String,
    pub chatbot_id: String,
    pub content: String,
    pub role: Role,
    #[serde(default)]
    pub citations: Vec<String>,
    /// Time-ordered (UUIDv7) id.
    pub message_uid: Uuid,
    #[serde(flatten)]
    pub metadata: ChannelMetadata,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(
        unique_client_id: impl Into<String>,
        chatbot_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        citations: Vec<String>,
        metadata: ChannelMetadata,
    ) -> Self {
        Self {
            unique_client_id: unique_client_id.into(),
            chatbot_id: chatbot_id.into(),
            content: content.into(),
            role,
            citations,
            message_uid: Uuid::now_v7(),
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.metadata.channel()
    }
}

/// The row actually persisted: the record plus what the pipeline derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(flatten)]
    pub record: MessageRecord,
    #[serde(default)]
    pub topic_id: Option<String>,
    pub persisted_at: DateTime<Utc>,
}

/// A classification bucket for user turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Like,
    Dislike,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_are_v7_and_unique() {
        let a = MessageRecord::new("c", "bot", Role::User, "a", vec![], ChannelMetadata::widget());
        let b = MessageRecord::new("c", "bot", Role::User, "b", vec![], ChannelMetadata::widget());
        assert_eq!(a.message_uid.get_version_num(), 7);
        assert_ne!(a.message_uid, b.message_uid);
    }

    #[test]
    fn channel_tag_is_flattened_into_record() {
        let rec = MessageRecord::new(
            "client-1",
            "bot",
            Role::Assistant,
            "hello",
            vec!["doc-1".into()],
            ChannelMetadata::Whatsapp {
                phone_number: "+15550100".into(),
                profile_name: None,
                extra: BTreeMap::new(),
            },
        );
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["channel"], "WHATSAPP");
        assert_eq!(v["phone_number"], "+15550100");
        assert_eq!(v["role"], "assistant");

        let back: MessageRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back.channel(), Channel::Whatsapp);
    }
}
