//! A store that lets a competing request win every natural-key race: the
//! first lookup that misses registers the row itself, then reports the miss.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bazaar::auth::Role;
use bazaar::models::*;
use bazaar::repo::inmem::InMemRepo;
use bazaar::repo::*;
use chrono::{DateTime, Utc};

pub struct RacingRepo {
    pub inner: Arc<InMemRepo>,
    user_race_run: AtomicBool,
    conversation_race_run: AtomicBool,
}

impl RacingRepo {
    pub fn new(inner: Arc<InMemRepo>) -> Self {
        Self {
            inner,
            user_race_run: AtomicBool::new(false),
            conversation_race_run: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl UserRepo for RacingRepo {
    async fn get_user(&self, id: Id) -> RepoResult<User> {
        let found = self.inner.get_user(id).await;
        if matches!(found, Err(RepoError::NotFound { .. })) && !self.user_race_run.swap(true, Ordering::SeqCst) {
            self.inner
                .insert_user(NewUser { id, username: "first-writer".into(), role: Role::Moderator })
                .await?;
        }
        found
    }
    async fn insert_user(&self, new: NewUser) -> RepoResult<User> {
        self.inner.insert_user(new).await
    }
    async fn update_user(&self, id: Id, patch: UserPatch) -> RepoResult<User> {
        self.inner.update_user(id, patch).await
    }
}

#[async_trait]
impl ReferenceRepo for RacingRepo {
    async fn list_categories(&self) -> RepoResult<Vec<Category>> {
        self.inner.list_categories().await
    }
    async fn get_category(&self, id: Id) -> RepoResult<Category> {
        self.inner.get_category(id).await
    }
    async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
        self.inner.create_category(new).await
    }
    async fn list_subcategories(&self, category_id: Id) -> RepoResult<Vec<Subcategory>> {
        self.inner.list_subcategories(category_id).await
    }
    async fn get_subcategory(&self, id: Id) -> RepoResult<Subcategory> {
        self.inner.get_subcategory(id).await
    }
    async fn create_subcategory(&self, category_id: Id, new: NewSubcategory) -> RepoResult<Subcategory> {
        self.inner.create_subcategory(category_id, new).await
    }
    async fn list_servers(&self) -> RepoResult<Vec<Server>> {
        self.inner.list_servers().await
    }
    async fn get_server(&self, id: Id) -> RepoResult<Server> {
        self.inner.get_server(id).await
    }
    async fn create_server(&self, new: NewServer) -> RepoResult<Server> {
        self.inner.create_server(new).await
    }
}

#[async_trait]
impl ListingRepo for RacingRepo {
    async fn get_listing(&self, id: Id) -> RepoResult<Listing> {
        self.inner.get_listing(id).await
    }
    async fn list_listings(&self, filter: &ListingFilter) -> RepoResult<Vec<Listing>> {
        self.inner.list_listings(filter).await
    }
    async fn count_listings(&self, filter: &ListingFilter) -> RepoResult<i64> {
        self.inner.count_listings(filter).await
    }
    async fn insert_listing(&self, new: NewListing) -> RepoResult<Listing> {
        self.inner.insert_listing(new).await
    }
    async fn update_listing(&self, id: Id, patch: ListingPatch) -> RepoResult<Listing> {
        self.inner.update_listing(id, patch).await
    }
    async fn delete_listing(&self, id: Id) -> RepoResult<()> {
        self.inner.delete_listing(id).await
    }
}

#[async_trait]
impl MessageRepo for RacingRepo {
    async fn get_conversation(&self, id: Id) -> RepoResult<Conversation> {
        self.inner.get_conversation(id).await
    }
    async fn find_conversation(&self, key: ConversationKey) -> RepoResult<Option<Conversation>> {
        let found = self.inner.find_conversation(key).await?;
        if found.is_none() && !self.conversation_race_run.swap(true, Ordering::SeqCst) {
            self.inner.insert_conversation(key).await?;
        }
        Ok(found)
    }
    async fn insert_conversation(&self, key: ConversationKey) -> RepoResult<Conversation> {
        self.inner.insert_conversation(key).await
    }
    async fn list_conversations(&self, user_id: Id) -> RepoResult<Vec<Conversation>> {
        self.inner.list_conversations(user_id).await
    }
    async fn insert_message(&self, new: NewMessage) -> RepoResult<Message> {
        self.inner.insert_message(new).await
    }
    async fn get_message(&self, id: Id) -> RepoResult<Message> {
        self.inner.get_message(id).await
    }
    async fn list_messages(&self, conversation_id: Id) -> RepoResult<Vec<Message>> {
        self.inner.list_messages(conversation_id).await
    }
    async fn list_unmoderated_messages(&self) -> RepoResult<Vec<Message>> {
        self.inner.list_unmoderated_messages().await
    }
    async fn count_unmoderated_messages(&self) -> RepoResult<i64> {
        self.inner.count_unmoderated_messages().await
    }
    async fn mark_message_moderated(&self, id: Id, moderator_id: Id) -> RepoResult<Message> {
        self.inner.mark_message_moderated(id, moderator_id).await
    }
    async fn mark_conversation_read(&self, conversation_id: Id, reader_id: Id, at: DateTime<Utc>) -> RepoResult<u64> {
        self.inner.mark_conversation_read(conversation_id, reader_id, at).await
    }
    async fn count_unread(&self, user_id: Id, conversation_id: Option<Id>) -> RepoResult<i64> {
        self.inner.count_unread(user_id, conversation_id).await
    }
}

#[async_trait]
impl FavoriteRepo for RacingRepo {
    async fn insert_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<Favorite> {
        self.inner.insert_favorite(user_id, listing_id).await
    }
    async fn get_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<Favorite> {
        self.inner.get_favorite(user_id, listing_id).await
    }
    async fn delete_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<()> {
        self.inner.delete_favorite(user_id, listing_id).await
    }
    async fn list_favorites(&self, user_id: Id) -> RepoResult<Vec<Favorite>> {
        self.inner.list_favorites(user_id).await
    }
}
