use crate::chat::ChatMessage;
use crate::post::Post;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A post was submitted and prepended to the listing
    PostCreated(Post),

    /// A message was appended to a conversation and persisted
    MessageSent {
        conversation_id: String,
        message: ChatMessage,
    },

    /// Opening a conversation marked incoming messages as read
    ConversationRead { conversation_id: String, count: usize },
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
