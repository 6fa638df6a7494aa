use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::bus::{Event, EventBus};
use crate::chat::ChatConversation;
use crate::conversations::ConversationStore;
use crate::entity::Viewer;
use crate::post::{CategoryFilter, CategoryStats, NewPost, Post, PostStore};
use crate::search;
use crate::store::KeyValueStore;

/// Browsing session state shared by the view layer: the listing, the active
/// filter and query, and the viewer's conversations.
pub struct Marketplace<S> {
    posts: PostStore,
    filter: CategoryFilter,
    query: String,
    viewer: Viewer,
    conversations: ConversationStore<S>,
    event_bus: Arc<EventBus>,
}

impl<S: KeyValueStore> Marketplace<S> {
    pub fn new(
        posts: PostStore,
        viewer: Viewer,
        conversations: ConversationStore<S>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            posts,
            filter: CategoryFilter::All,
            query: String::new(),
            viewer,
            conversations,
            event_bus,
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn category(&self) -> CategoryFilter {
        self.filter
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_category(&mut self, filter: CategoryFilter) {
        self.filter = filter;
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    /// The listing under the current filter and query. Recomputed from
    /// scratch on every call.
    pub fn visible_posts(&self) -> Vec<&Post> {
        search::filter_posts(self.posts.all(), self.filter, &self.query)
    }

    pub fn stats(&self) -> CategoryStats {
        self.posts.stats()
    }

    pub fn post(&self, id: &str) -> Option<&Post> {
        self.posts.get(id)
    }

    pub fn create_post(&mut self, new_post: NewPost) -> Result<Post> {
        let post = self.posts.create(new_post)?;
        info!("Created post {} ({})", post.id, post.category);
        self.event_bus.publish(Event::PostCreated(post.clone()));
        Ok(post)
    }

    /// Open the viewer's chat about a post, marking incoming messages read.
    /// Returns `None` if the post does not exist.
    pub async fn open_chat(&self, post_id: &str) -> Result<Option<ChatConversation>> {
        let Some(post) = self.posts.get(post_id) else {
            debug!("No post {} to chat about", post_id);
            return Ok(None);
        };

        let mut conversation = self.conversations.load(post, &self.viewer).await?;
        self.mark_read(&mut conversation).await?;
        Ok(Some(conversation))
    }

    /// Resolve a conversation picked from the list back to its post and the
    /// latest stored copy. Conversations whose post is gone are ignored.
    pub async fn select_conversation(
        &self,
        conversation: ChatConversation,
    ) -> Result<Option<(Post, ChatConversation)>> {
        let Some(post) = self.posts.get(&conversation.post_id) else {
            debug!(
                "Conversation {} refers to missing post {}",
                conversation.id, conversation.post_id
            );
            return Ok(None);
        };

        let mut conversation = self.conversations.reload(conversation).await?;
        self.mark_read(&mut conversation).await?;
        Ok(Some((post.clone(), conversation)))
    }

    async fn mark_read(&self, conversation: &mut ChatConversation) -> Result<()> {
        let count = self
            .conversations
            .mark_read(conversation, &self.viewer.id)
            .await?;
        if count > 0 {
            self.event_bus.publish(Event::ConversationRead {
                conversation_id: conversation.id.clone(),
                count,
            });
        }
        Ok(())
    }

    /// Send `body` as the viewer. Blank bodies and conversations whose post
    /// has disappeared are ignored.
    pub async fn send_message(
        &self,
        conversation: ChatConversation,
        body: &str,
    ) -> Result<ChatConversation> {
        if self.posts.get(&conversation.post_id).is_none() {
            return Ok(conversation);
        }

        let before = conversation.messages.len();
        let conversation = self
            .conversations
            .send(conversation, &self.viewer.id, &self.viewer.name, body)
            .await?;

        if conversation.messages.len() > before {
            if let Some(message) = conversation.last_message.clone() {
                self.event_bus.publish(Event::MessageSent {
                    conversation_id: conversation.id.clone(),
                    message,
                });
            }
        }

        Ok(conversation)
    }

    /// The viewer's conversations, most recently active first.
    pub async fn conversations(&self) -> Result<Vec<ChatConversation>> {
        self.conversations.list_for_user(&self.viewer.id).await
    }
}
