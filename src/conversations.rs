use crate::{
    chat::{ChatConversation, ChatMessage},
    entity::{Participant, Viewer},
    post::Post,
    store::KeyValueStore,
};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Every conversation entry lives under this prefix in the key-value namespace.
pub const KEY_PREFIX: &str = "chat-";

/// How a conversation id is derived when a chat is opened from a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyScheme {
    /// `{post}-{viewer}`. Buyer and seller opening the same post get
    /// separate records; this matches data written by earlier versions.
    #[default]
    Viewer,
    /// `{post}-{lower id}-{higher id}` over the buyer/seller pair.
    Canonical,
}

impl FromStr for KeyScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(KeyScheme::Viewer),
            "canonical" => Ok(KeyScheme::Canonical),
            other => bail!("Unknown conversation key scheme '{}' (expected viewer or canonical)", other),
        }
    }
}

pub struct ConversationStore<S> {
    kv: S,
    scheme: KeyScheme,
}

impl<S: KeyValueStore> ConversationStore<S> {
    pub fn new(kv: S, scheme: KeyScheme) -> Self {
        Self { kv, scheme }
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    pub fn conversation_id(&self, post: &Post, viewer_id: &str) -> String {
        match self.scheme {
            KeyScheme::Viewer => format!("{}-{}", post.id, viewer_id),
            KeyScheme::Canonical => {
                let seller_id = post.author.as_str();
                let (low, high) = if viewer_id <= seller_id {
                    (viewer_id, seller_id)
                } else {
                    (seller_id, viewer_id)
                };
                format!("{}-{}-{}", post.id, low, high)
            }
        }
    }

    fn storage_key(conversation_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, conversation_id)
    }

    /// The viewer's thread about `post`.
    ///
    /// A fresh, unsaved conversation is returned when nothing is stored yet;
    /// it is only written once the first message is sent. A stored entry that
    /// cannot be decoded is treated the same way.
    pub async fn load(&self, post: &Post, viewer: &Viewer) -> Result<ChatConversation> {
        let id = self.conversation_id(post, &viewer.id);

        if let Some(conversation) = self.read(&id).await? {
            return Ok(conversation);
        }

        Ok(ChatConversation::new(
            id,
            post.id.clone(),
            post.title.clone(),
            viewer.participant(),
            Participant::author(&post.author),
        ))
    }

    /// Re-read a conversation by its own id, keeping `conversation` if the
    /// entry is gone or unreadable.
    pub async fn reload(&self, conversation: ChatConversation) -> Result<ChatConversation> {
        Ok(self.read(&conversation.id).await?.unwrap_or(conversation))
    }

    async fn read(&self, conversation_id: &str) -> Result<Option<ChatConversation>> {
        let key = Self::storage_key(conversation_id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(conversation) => Ok(Some(conversation)),
            Err(e) => {
                warn!("Ignoring unreadable conversation at {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Overwrite the stored record with `conversation`.
    pub async fn save(&self, conversation: &ChatConversation) -> Result<()> {
        let json = serde_json::to_string(conversation).context("Failed to encode conversation")?;
        self.kv
            .set(&Self::storage_key(&conversation.id), &json)
            .await
            .with_context(|| format!("Failed to save conversation {}", conversation.id))
    }

    /// Append a message and persist the whole conversation.
    ///
    /// A blank body leaves the conversation untouched and writes nothing.
    pub async fn send(
        &self,
        conversation: ChatConversation,
        sender_id: &str,
        sender_name: &str,
        body: &str,
    ) -> Result<ChatConversation> {
        self.send_at(conversation, sender_id, sender_name, body, Utc::now())
            .await
    }

    pub(crate) async fn send_at(
        &self,
        mut conversation: ChatConversation,
        sender_id: &str,
        sender_name: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatConversation> {
        let body = body.trim();
        if body.is_empty() {
            return Ok(conversation);
        }

        // The seller id is the post author.
        let receiver_id = if conversation.participants.seller.id == sender_id {
            conversation.participants.buyer.id.clone()
        } else {
            conversation.participants.seller.id.clone()
        };

        let timestamp = match conversation.messages.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        let message = ChatMessage {
            id: Uuid::now_v7().to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            receiver_id,
            post_id: conversation.post_id.clone(),
            message: body.to_string(),
            timestamp,
            is_read: false,
        };

        conversation.push(message);
        self.save(&conversation).await?;

        debug!(
            "Saved conversation {} ({} messages)",
            conversation.id,
            conversation.messages.len()
        );

        Ok(conversation)
    }

    /// Mark every message addressed to the viewer as read. Persists only if
    /// something changed; returns how many messages were flipped.
    pub async fn mark_read(
        &self,
        conversation: &mut ChatConversation,
        viewer_id: &str,
    ) -> Result<usize> {
        let mut flipped = 0;
        for message in conversation
            .messages
            .iter_mut()
            .filter(|msg| !msg.is_read && msg.sender_id != viewer_id)
        {
            message.is_read = true;
            flipped += 1;
        }

        if flipped == 0 {
            return Ok(0);
        }

        if let Some(last) = conversation.last_message.as_mut() {
            if last.sender_id != viewer_id {
                last.is_read = true;
            }
        }

        self.save(conversation).await?;
        Ok(flipped)
    }

    /// Every stored conversation the user takes part in, most recently
    /// active first. Entries that fail to decode are skipped.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<ChatConversation>> {
        let entries = self.kv.scan_prefix(KEY_PREFIX).await?;
        let scanned = entries.len();

        let mut conversations = Vec::new();
        for (key, raw) in entries {
            match serde_json::from_str::<ChatConversation>(&raw) {
                Ok(conversation) if conversation.involves(user_id) => {
                    conversations.push(conversation)
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping malformed conversation at {}: {}", key, e),
            }
        }

        conversations.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));

        info!(
            "Listed {} of {} stored conversations for {}",
            conversations.len(),
            scanned,
            user_id
        );

        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::Category;
    use crate::store::MemoryKv;
    use chrono::TimeZone;

    fn post(id: &str, author: &str) -> Post {
        Post {
            id: id.to_string(),
            title: "Speed Cube".to_string(),
            description: String::new(),
            category: Category::Sell,
            price: Some(20.0),
            location: String::new(),
            author: author.to_string(),
            contact: String::new(),
            image_url: None,
            created_at: Utc::now(),
            tags: vec!["gan".to_string(), "3x3".to_string()],
        }
    }

    fn alice() -> Viewer {
        Viewer::new("u1", "Alice")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn store() -> (MemoryKv, ConversationStore<MemoryKv>) {
        let kv = MemoryKv::new();
        (kv.clone(), ConversationStore::new(kv, KeyScheme::Viewer))
    }

    #[tokio::test]
    async fn fresh_load_is_not_persisted() {
        let (kv, store) = store();
        let p = post("p1", "Bob");

        let first = store.load(&p, &alice()).await.unwrap();
        let second = store.load(&p, &alice()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.id, "p1-u1");
        assert!(first.messages.is_empty());
        assert!(first.is_active);
        assert_eq!(first.participants.buyer, Participant::new("u1", "Alice"));
        assert_eq!(first.participants.seller, Participant::new("Bob", "Bob"));
        assert!(kv.scan_prefix(KEY_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_appends_and_persists() {
        let (kv, store) = store();
        let conv = store.load(&post("p1", "Bob"), &alice()).await.unwrap();

        let conv = store.send(conv, "u1", "Alice", "hello").await.unwrap();

        assert_eq!(conv.messages.len(), 1);
        let last = conv.last_message.as_ref().unwrap();
        assert_eq!(last.message, "hello");
        assert!(!last.is_read);
        assert_eq!(last.receiver_id, "Bob");
        assert_eq!(last.post_id, "p1");
        assert_eq!(&conv.messages[0], last);
        assert!(kv.get("chat-p1-u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn blank_send_is_a_no_op() {
        let (kv, store) = store();
        let conv = store.load(&post("p1", "Bob"), &alice()).await.unwrap();

        let after = store.send(conv.clone(), "u1", "Alice", "  \n\t ").await.unwrap();

        assert_eq!(after, conv);
        assert!(kv.get("chat-p1-u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn author_reply_goes_to_buyer() {
        let (_, store) = store();
        let conv = store.load(&post("p1", "Bob"), &alice()).await.unwrap();
        let conv = store.send(conv, "u1", "Alice", "still available?").await.unwrap();

        let conv = store.send(conv, "Bob", "Bob", "yes").await.unwrap();

        assert_eq!(conv.messages[1].receiver_id, "u1");
    }

    #[tokio::test]
    async fn saved_conversation_round_trips_through_load() {
        let (_, store) = store();
        let p = post("p1", "Bob");
        let mut conv = store.load(&p, &alice()).await.unwrap();
        for (i, body) in ["one", "two", "three"].into_iter().enumerate() {
            conv = store
                .send_at(conv, "u1", "Alice", body, at(100 + i as i64))
                .await
                .unwrap();
        }

        let loaded = store.load(&p, &alice()).await.unwrap();

        assert_eq!(loaded, conv);
        let bodies: Vec<&str> = loaded.messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
        assert_eq!(loaded.messages[2].timestamp, at(102));
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards() {
        let (_, store) = store();
        let conv = store.load(&post("p1", "Bob"), &alice()).await.unwrap();
        let conv = store.send_at(conv, "u1", "Alice", "later", at(500)).await.unwrap();

        let conv = store.send_at(conv, "u1", "Alice", "skewed", at(400)).await.unwrap();

        assert_eq!(conv.messages[1].timestamp, at(500));
    }

    #[tokio::test]
    async fn clamps_against_messages_when_last_message_is_missing() {
        let (kv, store) = store();
        let p = post("p1", "Bob");
        let conv = store.load(&p, &alice()).await.unwrap();
        let mut conv = store.send_at(conv, "u1", "Alice", "first", at(500)).await.unwrap();
        conv.last_message = None;
        store.save(&conv).await.unwrap();
        assert!(!kv.get("chat-p1-u1").await.unwrap().unwrap().contains("lastMessage"));

        let conv = store.load(&p, &alice()).await.unwrap();
        let conv = store.send_at(conv, "Bob", "Bob", "reply", at(400)).await.unwrap();

        assert_eq!(conv.messages[1].timestamp, at(500));
        assert_eq!(conv.last_message.as_ref().unwrap().timestamp, at(500));
    }

    #[tokio::test]
    async fn list_filters_by_participant_and_sorts_by_activity() {
        let (kv, store) = store();
        let viewer = alice();

        let older = store.load(&post("p1", "Bob"), &viewer).await.unwrap();
        store.send_at(older, "u1", "Alice", "old", at(100)).await.unwrap();

        let newer = store.load(&post("p2", "Carol"), &viewer).await.unwrap();
        store.send_at(newer, "u1", "Alice", "new", at(200)).await.unwrap();

        // Persisted without messages.
        let silent = store.load(&post("p3", "Dave"), &viewer).await.unwrap();
        store.save(&silent).await.unwrap();

        let foreign = store
            .load(&post("p4", "Erin"), &Viewer::new("u2", "Zed"))
            .await
            .unwrap();
        store.send_at(foreign, "u2", "Zed", "not yours", at(300)).await.unwrap();

        kv.set("unrelated", "{}").await.unwrap();

        let listed = store.list_for_user("u1").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["p2-u1", "p1-u1", "p3-u1"]);

        let as_seller = store.list_for_user("Carol").await.unwrap();
        assert_eq!(as_seller.len(), 1);
        assert_eq!(as_seller[0].id, "p2-u1");
    }

    #[tokio::test]
    async fn list_skips_malformed_entries() {
        let (kv, store) = store();
        let conv = store.load(&post("p1", "Bob"), &alice()).await.unwrap();
        store.send(conv, "u1", "Alice", "hi").await.unwrap();

        kv.set("chat-broken", "{not json").await.unwrap();
        kv.set("chat-wrong-shape", r#"{"id": 7}"#).await.unwrap();

        let listed = store.list_for_user("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "p1-u1");
    }

    #[tokio::test]
    async fn malformed_entry_loads_as_fresh() {
        let (kv, store) = store();
        kv.set("chat-p1-u1", "garbage").await.unwrap();

        let conv = store.load(&post("p1", "Bob"), &alice()).await.unwrap();

        assert!(conv.messages.is_empty());
        assert_eq!(conv.id, "p1-u1");
    }

    #[tokio::test]
    async fn reads_records_written_with_iso_timestamps() {
        let (kv, store) = store();
        let raw = r#"{
            "id": "p1-u1",
            "postId": "p1",
            "postTitle": "Speed Cube",
            "participants": {
                "buyer": {"id": "u1", "name": "Alice"},
                "seller": {"id": "Bob", "name": "Bob"}
            },
            "messages": [{
                "id": "1705312200000",
                "senderId": "u1",
                "senderName": "Alice",
                "receiverId": "Bob",
                "postId": "p1",
                "message": "hello",
                "timestamp": "2024-01-15T10:30:00.000Z",
                "isRead": false
            }],
            "lastMessage": {
                "id": "1705312200000",
                "senderId": "u1",
                "senderName": "Alice",
                "receiverId": "Bob",
                "postId": "p1",
                "message": "hello",
                "timestamp": "2024-01-15T10:30:00.000Z",
                "isRead": false
            },
            "isActive": true
        }"#;
        kv.set("chat-p1-u1", raw).await.unwrap();

        let conv = store.load(&post("p1", "Bob"), &alice()).await.unwrap();

        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.last_activity(), Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[tokio::test]
    async fn mark_read_flips_only_incoming_messages() {
        let (_, store) = store();
        let p = post("p1", "Bob");
        let conv = store.load(&p, &alice()).await.unwrap();
        let conv = store.send_at(conv, "u1", "Alice", "hi", at(1)).await.unwrap();
        let mut conv = store.send_at(conv, "Bob", "Bob", "hey", at(2)).await.unwrap();
        assert!(conv.has_unread_for("u1"));

        let flipped = store.mark_read(&mut conv, "u1").await.unwrap();

        assert_eq!(flipped, 1);
        assert!(!conv.messages[0].is_read);
        assert!(conv.messages[1].is_read);
        assert!(conv.last_message.as_ref().unwrap().is_read);

        let stored = store.load(&p, &alice()).await.unwrap();
        assert!(!stored.has_unread_for("u1"));
        assert_eq!(store.mark_read(&mut conv, "u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn viewer_keys_split_buyer_and_seller() {
        let (_, store) = store();
        let p = post("p1", "Bob");
        let buyer = store.load(&p, &alice()).await.unwrap();
        let seller = store.load(&p, &Viewer::new("Bob", "Bob")).await.unwrap();
        assert_ne!(buyer.id, seller.id);
    }

    #[tokio::test]
    async fn canonical_keys_are_order_independent() {
        let store = ConversationStore::new(MemoryKv::new(), KeyScheme::Canonical);
        let p = post("p1", "Bob");

        assert_eq!(store.conversation_id(&p, "u1"), "p1-Bob-u1");
        assert_eq!(store.conversation_id(&p, "Amy"), "p1-Amy-Bob");

        let conv = store.load(&p, &alice()).await.unwrap();
        let conv = store.send(conv, "u1", "Alice", "hi").await.unwrap();
        let reloaded = store.reload(conv.clone()).await.unwrap();
        assert_eq!(reloaded, conv);
    }

    #[test]
    fn key_scheme_parses() {
        assert_eq!("Viewer".parse::<KeyScheme>().unwrap(), KeyScheme::Viewer);
        assert_eq!("canonical".parse::<KeyScheme>().unwrap(), KeyScheme::Canonical);
        assert!("sorted".parse::<KeyScheme>().is_err());
    }
}
