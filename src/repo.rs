use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RepoError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Id },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Internal(String),
}

impl RepoError {
    pub fn not_found(entity: &'static str, id: Id) -> Self {
        RepoError::NotFound { entity, id }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    /// Fails with `Conflict` when the id is already registered.
    async fn insert_user(&self, new: NewUser) -> RepoResult<User>;
    async fn update_user(&self, id: Id, patch: UserPatch) -> RepoResult<User>;
}

#[async_trait]
pub trait ReferenceRepo: Send + Sync {
    async fn list_categories(&self) -> RepoResult<Vec<Category>>;
    async fn get_category(&self, id: Id) -> RepoResult<Category>;
    async fn create_category(&self, new: NewCategory) -> RepoResult<Category>;
    async fn list_subcategories(&self, category_id: Id) -> RepoResult<Vec<Subcategory>>;
    async fn get_subcategory(&self, id: Id) -> RepoResult<Subcategory>;
    async fn create_subcategory(&self, category_id: Id, new: NewSubcategory) -> RepoResult<Subcategory>;
    async fn list_servers(&self) -> RepoResult<Vec<Server>>;
    async fn get_server(&self, id: Id) -> RepoResult<Server>;
    async fn create_server(&self, new: NewServer) -> RepoResult<Server>;
}

#[async_trait]
pub trait ListingRepo: Send + Sync {
    async fn get_listing(&self, id: Id) -> RepoResult<Listing>;
    /// Newest first unless the filter asks for queue order.
    async fn list_listings(&self, filter: &ListingFilter) -> RepoResult<Vec<Listing>>;
    async fn count_listings(&self, filter: &ListingFilter) -> RepoResult<i64>;
    /// Persists a new listing in `pending` state.
    async fn insert_listing(&self, new: NewListing) -> RepoResult<Listing>;
    /// Applies `patch` as one atomic record update. Guarded patches that do
    /// not match the current state fail with `Conflict`.
    async fn update_listing(&self, id: Id, patch: ListingPatch) -> RepoResult<Listing>;
    /// Hard delete; favorites of the listing go with it.
    async fn delete_listing(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait MessageRepo: Send + Sync {
    async fn get_conversation(&self, id: Id) -> RepoResult<Conversation>;
    async fn find_conversation(&self, key: ConversationKey) -> RepoResult<Option<Conversation>>;
    /// Fails with `Conflict` when a conversation with the same key exists.
    async fn insert_conversation(&self, key: ConversationKey) -> RepoResult<Conversation>;
    /// Most recently active first.
    async fn list_conversations(&self, user_id: Id) -> RepoResult<Vec<Conversation>>;
    /// Stores the message and bumps the conversation's `updated_at`.
    async fn insert_message(&self, new: NewMessage) -> RepoResult<Message>;
    async fn get_message(&self, id: Id) -> RepoResult<Message>;
    async fn list_messages(&self, conversation_id: Id) -> RepoResult<Vec<Message>>;
    async fn list_unmoderated_messages(&self) -> RepoResult<Vec<Message>>;
    async fn count_unmoderated_messages(&self) -> RepoResult<i64>;
    /// Sets the flag; the first moderator to flip it is kept.
    async fn mark_message_moderated(&self, id: Id, moderator_id: Id) -> RepoResult<Message>;
    /// Marks messages not sent by `reader_id` as read, returns how many changed.
    async fn mark_conversation_read(&self, conversation_id: Id, reader_id: Id, at: DateTime<Utc>) -> RepoResult<u64>;
    async fn count_unread(&self, user_id: Id, conversation_id: Option<Id>) -> RepoResult<i64>;
}

#[async_trait]
pub trait FavoriteRepo: Send + Sync {
    /// Fails with `Conflict` when the pair already exists.
    async fn insert_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<Favorite>;
    async fn get_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<Favorite>;
    async fn delete_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<()>;
    async fn list_favorites(&self, user_id: Id) -> RepoResult<Vec<Favorite>>;
}

pub trait Repo: UserRepo + ReferenceRepo + ListingRepo + MessageRepo + FavoriteRepo {}

impl<T> Repo for T where T: UserRepo + ReferenceRepo + ListingRepo + MessageRepo + FavoriteRepo {}

fn apply_page<T>(items: Vec<T>, limit: Option<i64>, offset: Option<i64>) -> Vec<T> {
    let offset = offset.unwrap_or(0).max(0) as usize;
    let iter = items.into_iter().skip(offset);
    match limit {
        Some(l) => iter.take(l.max(0) as usize).collect(),
        None => iter.collect(),
    }
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    pub const SNAPSHOT_FILE: &str = "state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        categories: HashMap<Id, Category>,
        subcategories: HashMap<Id, Subcategory>,
        servers: HashMap<Id, Server>,
        listings: HashMap<Id, Listing>,
        favorites: Vec<Favorite>,
        conversations: HashMap<Id, Conversation>,
        messages: HashMap<Id, Message>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }
    }

    /// Process-local store. Every operation runs under one lock acquisition,
    /// which makes each mutation a single atomic step.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
        // one snapshot writer at a time
        persist_lock: Arc<Mutex<()>>,
    }

    impl InMemRepo {
        /// Store persisted as a JSON snapshot at `path`, loaded now if present.
        pub fn with_snapshot(path: PathBuf) -> Self {
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
                persist_lock: Arc::new(Mutex::new(())),
            }
        }

        /// Store that never touches disk.
        pub fn ephemeral() -> Self {
            Self {
                state: Arc::new(RwLock::new(State::default())),
                snapshot_path: None,
                persist_lock: Arc::new(Mutex::new(())),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!(path = %path.display(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "failed to parse snapshot: {e}; starting empty");
                        State::default()
                    }
                },
                Err(e) => {
                    tracing::info!(path = %path.display(), "no snapshot ({e}); starting empty");
                    State::default()
                }
            }
        }

        /// Temp file next to the snapshot, renamed over it once complete.
        fn temp_path(path: &Path) -> PathBuf {
            let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            name.push(".tmp");
            path.with_file_name(name)
        }

        fn write_snapshot(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let tmp = Self::temp_path(path);
            std::fs::write(&tmp, bytes)?;
            std::fs::rename(&tmp, path)
        }

        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_ref() else { return };
            let Ok(_writer) = self.persist_lock.lock() else { return };
            // serialized under the writer lock so the last rename carries the newest state
            let bytes = match self.state.read() {
                Ok(s) => serde_json::to_vec_pretty(&*s),
                Err(_) => return,
            };
            match bytes {
                Ok(bytes) => {
                    if let Err(e) = Self::write_snapshot(path, &bytes) {
                        tracing::warn!(path = %path.display(), "failed to write snapshot: {e}");
                    }
                }
                Err(e) => tracing::warn!("failed to serialize snapshot: {e}"),
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let s = self.read()?;
            s.users.get(&id).cloned().ok_or(RepoError::not_found("user", id))
        }

        async fn insert_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.users.contains_key(&new.id) {
                return Err(RepoError::Conflict(format!("user {} already registered", new.id)));
            }
            let user = User {
                id: new.id,
                username: new.username,
                role: new.role,
                is_banned: false,
                created_at: Utc::now(),
            };
            s.users.insert(user.id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn update_user(&self, id: Id, patch: UserPatch) -> RepoResult<User> {
            let mut s = self.write()?;
            let user = s.users.get_mut(&id).ok_or(RepoError::not_found("user", id))?;
            if let Some(role) = patch.role {
                user.role = role;
            }
            if let Some(banned) = patch.is_banned {
                user.is_banned = banned;
            }
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl ReferenceRepo for InMemRepo {
        async fn list_categories(&self) -> RepoResult<Vec<Category>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.categories.values().cloned().collect();
            v.sort_by_key(|c| c.id);
            Ok(v)
        }

        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            let s = self.read()?;
            s.categories.get(&id).cloned().ok_or(RepoError::not_found("category", id))
        }

        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            let mut s = self.write()?;
            if s.categories.values().any(|c| c.slug == new.slug) {
                return Err(RepoError::Conflict(format!("category slug '{}' taken", new.slug)));
            }
            let id = s.next_id();
            let category = Category { id, slug: new.slug, title: new.title, kind: new.kind };
            s.categories.insert(id, category.clone());
            drop(s);
            self.persist();
            Ok(category)
        }

        async fn list_subcategories(&self, category_id: Id) -> RepoResult<Vec<Subcategory>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.subcategories.values()
                .filter(|sc| sc.category_id == category_id)
                .cloned()
                .collect();
            v.sort_by_key(|sc| sc.id);
            Ok(v)
        }

        async fn get_subcategory(&self, id: Id) -> RepoResult<Subcategory> {
            let s = self.read()?;
            s.subcategories.get(&id).cloned().ok_or(RepoError::not_found("subcategory", id))
        }

        async fn create_subcategory(&self, category_id: Id, new: NewSubcategory) -> RepoResult<Subcategory> {
            let mut s = self.write()?;
            if !s.categories.contains_key(&category_id) {
                return Err(RepoError::not_found("category", category_id));
            }
            if s.subcategories.values().any(|sc| sc.category_id == category_id && sc.slug == new.slug) {
                return Err(RepoError::Conflict(format!("subcategory slug '{}' taken", new.slug)));
            }
            let id = s.next_id();
            let sub = Subcategory { id, category_id, slug: new.slug, title: new.title };
            s.subcategories.insert(id, sub.clone());
            drop(s);
            self.persist();
            Ok(sub)
        }

        async fn list_servers(&self) -> RepoResult<Vec<Server>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.servers.values().cloned().collect();
            v.sort_by_key(|sv| sv.id);
            Ok(v)
        }

        async fn get_server(&self, id: Id) -> RepoResult<Server> {
            let s = self.read()?;
            s.servers.get(&id).cloned().ok_or(RepoError::not_found("server", id))
        }

        async fn create_server(&self, new: NewServer) -> RepoResult<Server> {
            let mut s = self.write()?;
            if s.servers.values().any(|sv| sv.slug == new.slug) {
                return Err(RepoError::Conflict(format!("server slug '{}' taken", new.slug)));
            }
            let id = s.next_id();
            let server = Server { id, slug: new.slug, title: new.title };
            s.servers.insert(id, server.clone());
            drop(s);
            self.persist();
            Ok(server)
        }
    }

    #[async_trait]
    impl ListingRepo for InMemRepo {
        async fn get_listing(&self, id: Id) -> RepoResult<Listing> {
            let s = self.read()?;
            s.listings.get(&id).cloned().ok_or(RepoError::not_found("listing", id))
        }

        async fn list_listings(&self, filter: &ListingFilter) -> RepoResult<Vec<Listing>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.listings.values().filter(|l| filter.matches(l)).cloned().collect();
            if filter.oldest_first {
                v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            } else {
                v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            }
            Ok(apply_page(v, filter.limit, filter.offset))
        }

        async fn count_listings(&self, filter: &ListingFilter) -> RepoResult<i64> {
            let s = self.read()?;
            Ok(s.listings.values().filter(|l| filter.matches(l)).count() as i64)
        }

        async fn insert_listing(&self, new: NewListing) -> RepoResult<Listing> {
            let mut s = self.write()?;
            if !s.users.contains_key(&new.owner_user_id) {
                return Err(RepoError::not_found("user", new.owner_user_id));
            }
            if !s.categories.contains_key(&new.category_id) {
                return Err(RepoError::not_found("category", new.category_id));
            }
            if !s.servers.contains_key(&new.server_id) {
                return Err(RepoError::not_found("server", new.server_id));
            }
            let now = Utc::now();
            let id = s.next_id();
            let listing = Listing {
                id,
                owner_user_id: new.owner_user_id,
                category_id: new.category_id,
                subcategory_id: new.subcategory_id,
                server_id: new.server_id,
                title: new.title,
                description: new.description,
                price: new.price,
                images: new.images,
                metadata: new.metadata,
                status: ListingStatus::Pending,
                moderator_id: None,
                moderator_note: None,
                created_at: now,
                updated_at: now,
            };
            s.listings.insert(id, listing.clone());
            drop(s);
            self.persist();
            Ok(listing)
        }

        async fn update_listing(&self, id: Id, patch: ListingPatch) -> RepoResult<Listing> {
            let mut s = self.write()?;
            let listing = s.listings.get_mut(&id).ok_or(RepoError::not_found("listing", id))?;
            match patch {
                ListingPatch::Content(c) => {
                    if let Some(title) = c.title {
                        listing.title = title;
                    }
                    if let Some(description) = c.description {
                        listing.description = description;
                    }
                    if let Some(price) = c.price {
                        listing.price = price;
                    }
                }
                ListingPatch::Price(price) => listing.price = price,
                ListingPatch::Moderation { status, moderator_id, note } => {
                    if listing.status == ListingStatus::Sold {
                        return Err(RepoError::Conflict(format!("listing {id} is sold")));
                    }
                    listing.status = status;
                    listing.moderator_id = Some(moderator_id);
                    listing.moderator_note = note;
                }
                ListingPatch::MarkSold => {
                    if listing.status != ListingStatus::Approved {
                        return Err(RepoError::Conflict(format!("listing {id} is {}", listing.status)));
                    }
                    listing.status = ListingStatus::Sold;
                }
            }
            listing.updated_at = Utc::now();
            let updated = listing.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_listing(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if s.listings.remove(&id).is_none() {
                return Err(RepoError::not_found("listing", id));
            }
            s.favorites.retain(|f| f.listing_id != id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl MessageRepo for InMemRepo {
        async fn get_conversation(&self, id: Id) -> RepoResult<Conversation> {
            let s = self.read()?;
            s.conversations.get(&id).cloned().ok_or(RepoError::not_found("conversation", id))
        }

        async fn find_conversation(&self, key: ConversationKey) -> RepoResult<Option<Conversation>> {
            let s = self.read()?;
            Ok(s.conversations.values().find(|c| c.key() == key).cloned())
        }

        async fn insert_conversation(&self, key: ConversationKey) -> RepoResult<Conversation> {
            let mut s = self.write()?;
            // unique (user_one, user_two, listing_id)
            if s.conversations.values().any(|c| c.key() == key) {
                return Err(RepoError::Conflict("conversation already exists".into()));
            }
            for user in [key.user_one, key.user_two] {
                if !s.users.contains_key(&user) {
                    return Err(RepoError::not_found("user", user));
                }
            }
            let now = Utc::now();
            let id = s.next_id();
            let conversation = Conversation {
                id,
                user_one: key.user_one,
                user_two: key.user_two,
                listing_id: key.listing_id,
                created_at: now,
                updated_at: now,
            };
            s.conversations.insert(id, conversation.clone());
            drop(s);
            self.persist();
            Ok(conversation)
        }

        async fn list_conversations(&self, user_id: Id) -> RepoResult<Vec<Conversation>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.conversations.values()
                .filter(|c| c.has_participant(user_id))
                .cloned()
                .collect();
            v.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
            Ok(v)
        }

        async fn insert_message(&self, new: NewMessage) -> RepoResult<Message> {
            let mut s = self.write()?;
            let now = Utc::now();
            let id = s.next_id();
            let conversation = s.conversations
                .get_mut(&new.conversation_id)
                .ok_or(RepoError::not_found("conversation", new.conversation_id))?;
            conversation.updated_at = now;
            let message = Message {
                id,
                conversation_id: new.conversation_id,
                sender_id: new.sender_id,
                content: new.content,
                is_moderated: false,
                moderator_id: None,
                read_at: None,
                created_at: now,
            };
            s.messages.insert(id, message.clone());
            drop(s);
            self.persist();
            Ok(message)
        }

        async fn get_message(&self, id: Id) -> RepoResult<Message> {
            let s = self.read()?;
            s.messages.get(&id).cloned().ok_or(RepoError::not_found("message", id))
        }

        async fn list_messages(&self, conversation_id: Id) -> RepoResult<Vec<Message>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.messages.values()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(v)
        }

        async fn list_unmoderated_messages(&self) -> RepoResult<Vec<Message>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.messages.values().filter(|m| !m.is_moderated).cloned().collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(v)
        }

        async fn count_unmoderated_messages(&self) -> RepoResult<i64> {
            let s = self.read()?;
            Ok(s.messages.values().filter(|m| !m.is_moderated).count() as i64)
        }

        async fn mark_message_moderated(&self, id: Id, moderator_id: Id) -> RepoResult<Message> {
            let mut s = self.write()?;
            let message = s.messages.get_mut(&id).ok_or(RepoError::not_found("message", id))?;
            if !message.is_moderated {
                message.is_moderated = true;
                message.moderator_id = Some(moderator_id);
            }
            let updated = message.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn mark_conversation_read(&self, conversation_id: Id, reader_id: Id, at: DateTime<Utc>) -> RepoResult<u64> {
            let mut s = self.write()?;
            let mut changed = 0u64;
            for m in s.messages.values_mut() {
                if m.conversation_id == conversation_id && m.sender_id != reader_id && m.read_at.is_none() {
                    m.read_at = Some(at);
                    changed += 1;
                }
            }
            drop(s);
            if changed > 0 {
                self.persist();
            }
            Ok(changed)
        }

        async fn count_unread(&self, user_id: Id, conversation_id: Option<Id>) -> RepoResult<i64> {
            let s = self.read()?;
            let count = s.messages.values()
                .filter(|m| conversation_id.map_or(true, |c| m.conversation_id == c))
                .filter(|m| m.sender_id != user_id && m.read_at.is_none())
                .filter(|m| {
                    s.conversations
                        .get(&m.conversation_id)
                        .is_some_and(|c| c.has_participant(user_id))
                })
                .count();
            Ok(count as i64)
        }
    }

    #[async_trait]
    impl FavoriteRepo for InMemRepo {
        async fn insert_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<Favorite> {
            let mut s = self.write()?;
            if !s.listings.contains_key(&listing_id) {
                return Err(RepoError::not_found("listing", listing_id));
            }
            // unique (user_id, listing_id)
            if s.favorites.iter().any(|f| f.user_id == user_id && f.listing_id == listing_id) {
                return Err(RepoError::Conflict("already favorited".into()));
            }
            let favorite = Favorite { user_id, listing_id, created_at: Utc::now() };
            s.favorites.push(favorite.clone());
            drop(s);
            self.persist();
            Ok(favorite)
        }

        async fn get_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<Favorite> {
            let s = self.read()?;
            s.favorites
                .iter()
                .find(|f| f.user_id == user_id && f.listing_id == listing_id)
                .cloned()
                .ok_or(RepoError::not_found("favorite", listing_id))
        }

        async fn delete_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            let before = s.favorites.len();
            s.favorites.retain(|f| !(f.user_id == user_id && f.listing_id == listing_id));
            if s.favorites.len() == before {
                return Err(RepoError::not_found("favorite", listing_id));
            }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn list_favorites(&self, user_id: Id) -> RepoResult<Vec<Favorite>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.favorites.iter().filter(|f| f.user_id == user_id).cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use crate::auth::Role;
    use sqlx::types::Json;
    use sqlx::{Pool, Postgres};

    const UNIQUE_VIOLATION: &str = "23505";
    const FOREIGN_KEY_VIOLATION: &str = "23503";

    const LISTING_COLUMNS: &str = "id, owner_user_id, category_id, subcategory_id, server_id, title, description, \
        price, images, metadata, status, moderator_id, moderator_note, created_at, updated_at";
    const CONVERSATION_COLUMNS: &str = "id, user_one, user_two, listing_id, created_at, updated_at";
    const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, is_moderated, moderator_id, read_at, created_at";

    fn db_code(e: &sqlx::Error) -> Option<String> {
        match e {
            sqlx::Error::Database(d) => d.code().map(|c| c.into_owned()),
            _ => None,
        }
    }

    /// Name of the violated constraint, e.g. `listings_server_id_fkey`.
    fn db_constraint(e: &sqlx::Error) -> Option<String> {
        match e {
            sqlx::Error::Database(d) => d.constraint().map(str::to_string),
            _ => None,
        }
    }

    /// Resolves a foreign-key violation to the referenced row that is
    /// missing. `refs` lists `(column, entity, id)` for every FK column of
    /// the insert; the first one is reported when the constraint is unnamed.
    fn missing_reference(e: &sqlx::Error, table: &str, refs: &[(&str, &'static str, Id)]) -> RepoError {
        let constraint = db_constraint(e);
        let hit = refs.iter().find(|(column, _, _)| {
            constraint.as_deref() == Some(format!("{table}_{column}_fkey").as_str())
        });
        match hit.or_else(|| refs.first()) {
            Some(&(_, entity, id)) => RepoError::not_found(entity, id),
            None => RepoError::Internal(e.to_string()),
        }
    }

    fn db_err(e: sqlx::Error) -> RepoError {
        match db_code(&e).as_deref() {
            Some(UNIQUE_VIOLATION) => RepoError::Conflict(e.to_string()),
            _ => RepoError::Internal(e.to_string()),
        }
    }

    fn parse_role(s: &str) -> RepoResult<Role> {
        match s {
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(RepoError::Internal(format!("unknown role '{other}' in users table"))),
        }
    }

    #[derive(sqlx::FromRow)]
    struct UserRow { id: i64, username: String, role: String, is_banned: bool, created_at: DateTime<Utc> }

    impl TryFrom<UserRow> for User {
        type Error = RepoError;
        fn try_from(r: UserRow) -> RepoResult<Self> {
            Ok(User { id: r.id, username: r.username, role: parse_role(&r.role)?, is_banned: r.is_banned, created_at: r.created_at })
        }
    }

    #[derive(sqlx::FromRow)]
    struct CategoryRow { id: i64, slug: String, title: String, kind: String }

    impl TryFrom<CategoryRow> for Category {
        type Error = RepoError;
        fn try_from(r: CategoryRow) -> RepoResult<Self> {
            let kind = r.kind.parse().map_err(RepoError::Internal)?;
            Ok(Category { id: r.id, slug: r.slug, title: r.title, kind })
        }
    }

    #[derive(sqlx::FromRow)]
    struct SubcategoryRow { id: i64, category_id: i64, slug: String, title: String }

    impl From<SubcategoryRow> for Subcategory {
        fn from(r: SubcategoryRow) -> Self {
            Subcategory { id: r.id, category_id: r.category_id, slug: r.slug, title: r.title }
        }
    }

    #[derive(sqlx::FromRow)]
    struct ServerRow { id: i64, slug: String, title: String }

    impl From<ServerRow> for Server {
        fn from(r: ServerRow) -> Self { Server { id: r.id, slug: r.slug, title: r.title } }
    }

    #[derive(sqlx::FromRow)]
    struct ListingRow {
        id: i64,
        owner_user_id: i64,
        category_id: i64,
        subcategory_id: Option<i64>,
        server_id: i64,
        title: String,
        description: String,
        price: i64,
        images: Vec<String>,
        metadata: Json<ListingMetadata>,
        status: String,
        moderator_id: Option<i64>,
        moderator_note: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl TryFrom<ListingRow> for Listing {
        type Error = RepoError;
        fn try_from(r: ListingRow) -> RepoResult<Self> {
            Ok(Listing {
                id: r.id,
                owner_user_id: r.owner_user_id,
                category_id: r.category_id,
                subcategory_id: r.subcategory_id,
                server_id: r.server_id,
                title: r.title,
                description: r.description,
                price: r.price,
                images: r.images,
                metadata: r.metadata.0,
                status: r.status.parse().map_err(RepoError::Internal)?,
                moderator_id: r.moderator_id,
                moderator_note: r.moderator_note,
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
        }
    }

    #[derive(sqlx::FromRow)]
    struct ConversationRow {
        id: i64,
        user_one: i64,
        user_two: i64,
        listing_id: Option<i64>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl From<ConversationRow> for Conversation {
        fn from(r: ConversationRow) -> Self {
            Conversation {
                id: r.id,
                user_one: r.user_one,
                user_two: r.user_two,
                listing_id: r.listing_id,
                created_at: r.created_at,
                updated_at: r.updated_at,
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct MessageRow {
        id: i64,
        conversation_id: i64,
        sender_id: i64,
        content: String,
        is_moderated: bool,
        moderator_id: Option<i64>,
        read_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    }

    impl From<MessageRow> for Message {
        fn from(r: MessageRow) -> Self {
            Message {
                id: r.id,
                conversation_id: r.conversation_id,
                sender_id: r.sender_id,
                content: r.content,
                is_moderated: r.is_moderated,
                moderator_id: r.moderator_id,
                read_at: r.read_at,
                created_at: r.created_at,
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct FavoriteRow { user_id: i64, listing_id: i64, created_at: DateTime<Utc> }

    impl From<FavoriteRow> for Favorite {
        fn from(r: FavoriteRow) -> Self {
            Favorite { user_id: r.user_id, listing_id: r.listing_id, created_at: r.created_at }
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub async fn migrate(&self) -> anyhow::Result<()> {
            sqlx::migrate!("./migrations").run(&self.pool).await?;
            Ok(())
        }

        async fn listing_exists(&self, id: Id) -> RepoResult<bool> {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM listings WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            sqlx::query_as::<_, UserRow>("SELECT id, username, role, is_banned, created_at FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)?
                .ok_or(RepoError::not_found("user", id))?
                .try_into()
        }

        async fn insert_user(&self, new: NewUser) -> RepoResult<User> {
            sqlx::query_as::<_, UserRow>(
                "INSERT INTO users (id, username, role) VALUES ($1, $2, $3) \
                 RETURNING id, username, role, is_banned, created_at",
            )
            .bind(new.id).bind(&new.username).bind(new.role.as_str())
            .fetch_one(&self.pool).await.map_err(db_err)?
            .try_into()
        }

        async fn update_user(&self, id: Id, patch: UserPatch) -> RepoResult<User> {
            sqlx::query_as::<_, UserRow>(
                "UPDATE users SET role = COALESCE($2, role), is_banned = COALESCE($3, is_banned) \
                 WHERE id = $1 RETURNING id, username, role, is_banned, created_at",
            )
            .bind(id)
            .bind(patch.role.map(|r| r.as_str()))
            .bind(patch.is_banned)
            .fetch_optional(&self.pool).await.map_err(db_err)?
            .ok_or(RepoError::not_found("user", id))?
            .try_into()
        }
    }

    #[async_trait]
    impl ReferenceRepo for PgRepo {
        async fn list_categories(&self) -> RepoResult<Vec<Category>> {
            sqlx::query_as::<_, CategoryRow>("SELECT id, slug, title, kind FROM categories ORDER BY id")
                .fetch_all(&self.pool).await.map_err(db_err)?
                .into_iter().map(Category::try_from).collect()
        }

        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            sqlx::query_as::<_, CategoryRow>("SELECT id, slug, title, kind FROM categories WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)?
                .ok_or(RepoError::not_found("category", id))?
                .try_into()
        }

        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            sqlx::query_as::<_, CategoryRow>(
                "INSERT INTO categories (slug, title, kind) VALUES ($1, $2, $3) RETURNING id, slug, title, kind",
            )
            .bind(&new.slug).bind(&new.title).bind(new.kind.as_str())
            .fetch_one(&self.pool).await.map_err(db_err)?
            .try_into()
        }

        async fn list_subcategories(&self, category_id: Id) -> RepoResult<Vec<Subcategory>> {
            let rows = sqlx::query_as::<_, SubcategoryRow>(
                "SELECT id, category_id, slug, title FROM subcategories WHERE category_id = $1 ORDER BY id",
            )
            .bind(category_id)
            .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(rows.into_iter().map(Subcategory::from).collect())
        }

        async fn get_subcategory(&self, id: Id) -> RepoResult<Subcategory> {
            sqlx::query_as::<_, SubcategoryRow>("SELECT id, category_id, slug, title FROM subcategories WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)?
                .map(Subcategory::from)
                .ok_or(RepoError::not_found("subcategory", id))
        }

        async fn create_subcategory(&self, category_id: Id, new: NewSubcategory) -> RepoResult<Subcategory> {
            sqlx::query_as::<_, SubcategoryRow>(
                "INSERT INTO subcategories (category_id, slug, title) VALUES ($1, $2, $3) \
                 RETURNING id, category_id, slug, title",
            )
            .bind(category_id).bind(&new.slug).bind(&new.title)
            .fetch_one(&self.pool).await
            .map(Subcategory::from)
            .map_err(|e| match db_code(&e).as_deref() {
                Some(FOREIGN_KEY_VIOLATION) => RepoError::not_found("category", category_id),
                _ => db_err(e),
            })
        }

        async fn list_servers(&self) -> RepoResult<Vec<Server>> {
            let rows = sqlx::query_as::<_, ServerRow>("SELECT id, slug, title FROM servers ORDER BY id")
                .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(rows.into_iter().map(Server::from).collect())
        }

        async fn get_server(&self, id: Id) -> RepoResult<Server> {
            sqlx::query_as::<_, ServerRow>("SELECT id, slug, title FROM servers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)?
                .map(Server::from)
                .ok_or(RepoError::not_found("server", id))
        }

        async fn create_server(&self, new: NewServer) -> RepoResult<Server> {
            sqlx::query_as::<_, ServerRow>("INSERT INTO servers (slug, title) VALUES ($1, $2) RETURNING id, slug, title")
                .bind(&new.slug).bind(&new.title)
                .fetch_one(&self.pool).await
                .map(Server::from)
                .map_err(db_err)
        }
    }

    #[async_trait]
    impl ListingRepo for PgRepo {
        async fn get_listing(&self, id: Id) -> RepoResult<Listing> {
            sqlx::query_as::<_, ListingRow>(&format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)?
                .ok_or(RepoError::not_found("listing", id))?
                .try_into()
        }

        async fn list_listings(&self, filter: &ListingFilter) -> RepoResult<Vec<Listing>> {
            let order = if filter.oldest_first { "created_at ASC, id ASC" } else { "created_at DESC, id DESC" };
            let sql = format!(
                "SELECT {LISTING_COLUMNS} FROM listings \
                 WHERE ($1::text IS NULL OR status = $1) \
                   AND ($2::bigint IS NULL OR category_id = $2) \
                   AND ($3::bigint IS NULL OR server_id = $3) \
                   AND ($4::bigint IS NULL OR owner_user_id = $4) \
                 ORDER BY {order} LIMIT $5 OFFSET $6"
            );
            sqlx::query_as::<_, ListingRow>(&sql)
                .bind(filter.status.map(|s| s.as_str()))
                .bind(filter.category_id)
                .bind(filter.server_id)
                .bind(filter.owner_user_id)
                .bind(filter.limit)
                .bind(filter.offset)
                .fetch_all(&self.pool).await.map_err(db_err)?
                .into_iter().map(Listing::try_from).collect()
        }

        async fn count_listings(&self, filter: &ListingFilter) -> RepoResult<i64> {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM listings \
                 WHERE ($1::text IS NULL OR status = $1) \
                   AND ($2::bigint IS NULL OR category_id = $2) \
                   AND ($3::bigint IS NULL OR server_id = $3) \
                   AND ($4::bigint IS NULL OR owner_user_id = $4)",
            )
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.category_id)
            .bind(filter.server_id)
            .bind(filter.owner_user_id)
            .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn insert_listing(&self, new: NewListing) -> RepoResult<Listing> {
            let sql = format!(
                "INSERT INTO listings (owner_user_id, category_id, subcategory_id, server_id, title, description, price, images, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {LISTING_COLUMNS}"
            );
            let row = sqlx::query_as::<_, ListingRow>(&sql)
                .bind(new.owner_user_id)
                .bind(new.category_id)
                .bind(new.subcategory_id)
                .bind(new.server_id)
                .bind(&new.title)
                .bind(&new.description)
                .bind(new.price)
                .bind(&new.images)
                .bind(Json(&new.metadata))
                .fetch_one(&self.pool).await
                .map_err(|e| match db_code(&e).as_deref() {
                    Some(FOREIGN_KEY_VIOLATION) => {
                        let mut refs = vec![
                            ("category_id", "category", new.category_id),
                            ("server_id", "server", new.server_id),
                            ("owner_user_id", "user", new.owner_user_id),
                        ];
                        if let Some(sub) = new.subcategory_id {
                            refs.push(("subcategory_id", "subcategory", sub));
                        }
                        missing_reference(&e, "listings", &refs)
                    }
                    _ => db_err(e),
                })?;
            row.try_into()
        }

        async fn update_listing(&self, id: Id, patch: ListingPatch) -> RepoResult<Listing> {
            let row = match patch {
                ListingPatch::Content(c) => {
                    sqlx::query_as::<_, ListingRow>(&format!(
                        "UPDATE listings SET title = COALESCE($2, title), description = COALESCE($3, description), \
                         price = COALESCE($4, price), updated_at = now() WHERE id = $1 RETURNING {LISTING_COLUMNS}"
                    ))
                    .bind(id).bind(c.title).bind(c.description).bind(c.price)
                    .fetch_optional(&self.pool).await.map_err(db_err)?
                }
                ListingPatch::Price(price) => {
                    sqlx::query_as::<_, ListingRow>(&format!(
                        "UPDATE listings SET price = $2, updated_at = now() WHERE id = $1 RETURNING {LISTING_COLUMNS}"
                    ))
                    .bind(id).bind(price)
                    .fetch_optional(&self.pool).await.map_err(db_err)?
                }
                ListingPatch::Moderation { status, moderator_id, note } => {
                    sqlx::query_as::<_, ListingRow>(&format!(
                        "UPDATE listings SET status = $2, moderator_id = $3, moderator_note = $4, updated_at = now() \
                         WHERE id = $1 AND status <> 'sold' RETURNING {LISTING_COLUMNS}"
                    ))
                    .bind(id).bind(status.as_str()).bind(moderator_id).bind(note)
                    .fetch_optional(&self.pool).await.map_err(db_err)?
                }
                ListingPatch::MarkSold => {
                    sqlx::query_as::<_, ListingRow>(&format!(
                        "UPDATE listings SET status = 'sold', updated_at = now() \
                         WHERE id = $1 AND status = 'approved' RETURNING {LISTING_COLUMNS}"
                    ))
                    .bind(id)
                    .fetch_optional(&self.pool).await.map_err(db_err)?
                }
            };
            match row {
                Some(r) => r.try_into(),
                // guarded update matched nothing: either gone or in the wrong state
                None if self.listing_exists(id).await? => {
                    Err(RepoError::Conflict(format!("listing {id} changed state")))
                }
                None => Err(RepoError::not_found("listing", id)),
            }
        }

        async fn delete_listing(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM listings WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::not_found("listing", id));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MessageRepo for PgRepo {
        async fn get_conversation(&self, id: Id) -> RepoResult<Conversation> {
            sqlx::query_as::<_, ConversationRow>(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)?
                .map(Conversation::from)
                .ok_or(RepoError::not_found("conversation", id))
        }

        async fn find_conversation(&self, key: ConversationKey) -> RepoResult<Option<Conversation>> {
            let row = sqlx::query_as::<_, ConversationRow>(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                 WHERE user_one = $1 AND user_two = $2 AND listing_id IS NOT DISTINCT FROM $3"
            ))
            .bind(key.user_one).bind(key.user_two).bind(key.listing_id)
            .fetch_optional(&self.pool).await.map_err(db_err)?;
            Ok(row.map(Conversation::from))
        }

        async fn insert_conversation(&self, key: ConversationKey) -> RepoResult<Conversation> {
            sqlx::query_as::<_, ConversationRow>(&format!(
                "INSERT INTO conversations (user_one, user_two, listing_id) VALUES ($1, $2, $3) \
                 RETURNING {CONVERSATION_COLUMNS}"
            ))
            .bind(key.user_one).bind(key.user_two).bind(key.listing_id)
            .fetch_one(&self.pool).await
            .map(Conversation::from)
            .map_err(|e| match db_code(&e).as_deref() {
                Some(FOREIGN_KEY_VIOLATION) => missing_reference(
                    &e,
                    "conversations",
                    &[("user_one", "user", key.user_one), ("user_two", "user", key.user_two)],
                ),
                _ => db_err(e),
            })
        }

        async fn list_conversations(&self, user_id: Id) -> RepoResult<Vec<Conversation>> {
            let rows = sqlx::query_as::<_, ConversationRow>(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_one = $1 OR user_two = $1 \
                 ORDER BY updated_at DESC, id DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(rows.into_iter().map(Conversation::from).collect())
        }

        async fn insert_message(&self, new: NewMessage) -> RepoResult<Message> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let bumped = sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
                .bind(new.conversation_id)
                .execute(&mut *tx).await.map_err(db_err)?;
            if bumped.rows_affected() == 0 {
                return Err(RepoError::not_found("conversation", new.conversation_id));
            }
            let row = sqlx::query_as::<_, MessageRow>(&format!(
                "INSERT INTO messages (conversation_id, sender_id, content) VALUES ($1, $2, $3) RETURNING {MESSAGE_COLUMNS}"
            ))
            .bind(new.conversation_id).bind(new.sender_id).bind(&new.content)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(row.into())
        }

        async fn get_message(&self, id: Id) -> RepoResult<Message> {
            sqlx::query_as::<_, MessageRow>(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(db_err)?
                .map(Message::from)
                .ok_or(RepoError::not_found("message", id))
        }

        async fn list_messages(&self, conversation_id: Id) -> RepoResult<Vec<Message>> {
            let rows = sqlx::query_as::<_, MessageRow>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY created_at, id"
            ))
            .bind(conversation_id)
            .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(rows.into_iter().map(Message::from).collect())
        }

        async fn list_unmoderated_messages(&self) -> RepoResult<Vec<Message>> {
            let rows = sqlx::query_as::<_, MessageRow>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE NOT is_moderated ORDER BY created_at, id"
            ))
            .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(rows.into_iter().map(Message::from).collect())
        }

        async fn count_unmoderated_messages(&self) -> RepoResult<i64> {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE NOT is_moderated")
                .fetch_one(&self.pool).await.map_err(db_err)
        }

        async fn mark_message_moderated(&self, id: Id, moderator_id: Id) -> RepoResult<Message> {
            sqlx::query_as::<_, MessageRow>(&format!(
                "UPDATE messages SET moderator_id = CASE WHEN is_moderated THEN moderator_id ELSE $2 END, \
                 is_moderated = TRUE WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
            ))
            .bind(id).bind(moderator_id)
            .fetch_optional(&self.pool).await.map_err(db_err)?
            .map(Message::from)
            .ok_or(RepoError::not_found("message", id))
        }

        async fn mark_conversation_read(&self, conversation_id: Id, reader_id: Id, at: DateTime<Utc>) -> RepoResult<u64> {
            let res = sqlx::query(
                "UPDATE messages SET read_at = $3 WHERE conversation_id = $1 AND sender_id <> $2 AND read_at IS NULL",
            )
            .bind(conversation_id).bind(reader_id).bind(at)
            .execute(&self.pool).await.map_err(db_err)?;
            Ok(res.rows_affected())
        }

        async fn count_unread(&self, user_id: Id, conversation_id: Option<Id>) -> RepoResult<i64> {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM messages m JOIN conversations c ON c.id = m.conversation_id \
                 WHERE (c.user_one = $1 OR c.user_two = $1) AND m.sender_id <> $1 AND m.read_at IS NULL \
                   AND ($2::bigint IS NULL OR c.id = $2)",
            )
            .bind(user_id).bind(conversation_id)
            .fetch_one(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl FavoriteRepo for PgRepo {
        async fn insert_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<Favorite> {
            let row = sqlx::query_as::<_, FavoriteRow>(
                "INSERT INTO favorites (user_id, listing_id) VALUES ($1, $2) ON CONFLICT DO NOTHING \
                 RETURNING user_id, listing_id, created_at",
            )
            .bind(user_id).bind(listing_id)
            .fetch_optional(&self.pool).await
            .map_err(|e| match db_code(&e).as_deref() {
                Some(FOREIGN_KEY_VIOLATION) => RepoError::not_found("listing", listing_id),
                _ => db_err(e),
            })?;
            row.map(Favorite::from).ok_or_else(|| RepoError::Conflict("already favorited".into()))
        }

        async fn get_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<Favorite> {
            sqlx::query_as::<_, FavoriteRow>(
                "SELECT user_id, listing_id, created_at FROM favorites WHERE user_id = $1 AND listing_id = $2",
            )
            .bind(user_id).bind(listing_id)
            .fetch_optional(&self.pool).await.map_err(db_err)?
            .map(Favorite::from)
            .ok_or(RepoError::not_found("favorite", listing_id))
        }

        async fn delete_favorite(&self, user_id: Id, listing_id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND listing_id = $2")
                .bind(user_id).bind(listing_id)
                .execute(&self.pool).await.map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::not_found("favorite", listing_id));
            }
            Ok(())
        }

        async fn list_favorites(&self, user_id: Id) -> RepoResult<Vec<Favorite>> {
            let rows = sqlx::query_as::<_, FavoriteRow>(
                "SELECT user_id, listing_id, created_at FROM favorites WHERE user_id = $1 ORDER BY created_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(rows.into_iter().map(Favorite::from).collect())
        }
    }
}
