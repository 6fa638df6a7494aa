use crate::entity::Participant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub post_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub buyer: Participant,
    pub seller: Participant,
}

/// A two-party thread about one post, persisted as a single JSON record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConversation {
    pub id: String,
    pub post_id: String,
    pub post_title: String,
    pub participants: Participants,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<ChatMessage>,
    pub is_active: bool,
}

impl ChatConversation {
    pub fn new(
        id: impl Into<String>,
        post_id: impl Into<String>,
        post_title: impl Into<String>,
        buyer: Participant,
        seller: Participant,
    ) -> Self {
        Self {
            id: id.into(),
            post_id: post_id.into(),
            post_title: post_title.into(),
            participants: Participants { buyer, seller },
            messages: Vec::new(),
            last_message: None,
            is_active: true,
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.participants.buyer.id == user_id || self.participants.seller.id == user_id
    }

    /// The participant the viewer is talking to.
    pub fn other_participant(&self, viewer_id: &str) -> &Participant {
        if self.participants.buyer.id == viewer_id {
            &self.participants.seller
        } else {
            &self.participants.buyer
        }
    }

    pub fn has_unread_for(&self, viewer_id: &str) -> bool {
        self.messages
            .iter()
            .any(|msg| !msg.is_read && msg.sender_id != viewer_id)
    }

    /// Timestamp used to order conversation listings. Threads without
    /// messages sort as the oldest possible.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|msg| msg.timestamp)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub(crate) fn push(&mut self, message: ChatMessage) {
        self.last_message = Some(message.clone());
        self.messages.push(message);
    }
}
