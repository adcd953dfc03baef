//! Conversations between two users and the message moderation queue.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::authz::{self, Principal};
use crate::error::AppError;
use crate::models::*;
use crate::notify::{signal, InvalidationSink, Topic};
use crate::repo::{Repo, RepoError};

pub const MESSAGE_MAX: usize = 4000;

#[derive(Clone)]
pub struct MessagingService {
    repo: Arc<dyn Repo>,
    sink: Arc<dyn InvalidationSink>,
}

impl MessagingService {
    pub fn new(repo: Arc<dyn Repo>, sink: Arc<dyn InvalidationSink>) -> Self {
        Self { repo, sink }
    }

    /// Conversation the principal takes part in; anyone else gets Forbidden.
    async fn participant_conversation(&self, principal: &Principal, conversation_id: Id) -> Result<Conversation, AppError> {
        let conversation = self.repo.get_conversation(conversation_id).await?;
        if !authz::is_participant(principal, &conversation) {
            return Err(AppError::forbidden("access this conversation"));
        }
        Ok(conversation)
    }

    /// Upsert by the natural key `{unordered pair, listing}`. A concurrent
    /// first contact loses the insert race and returns the winner's row.
    pub async fn find_or_create_conversation(
        &self,
        principal: &Principal,
        other_user_id: Id,
        listing_id: Option<Id>,
    ) -> Result<Conversation, AppError> {
        authz::ensure_active(principal)?;
        if other_user_id == principal.id {
            return Err(AppError::invalid("other_user_id", "cannot start a conversation with yourself"));
        }
        self.repo.get_user(other_user_id).await.map_err(|e| AppError::from(e).into_reference())?;
        if let Some(lid) = listing_id {
            self.repo.get_listing(lid).await.map_err(|e| AppError::from(e).into_reference())?;
        }

        let key = ConversationKey::new(principal.id, other_user_id, listing_id);
        if let Some(existing) = self.repo.find_conversation(key).await? {
            return Ok(existing);
        }
        match self.repo.insert_conversation(key).await {
            Ok(created) => {
                tracing::info!(conversation_id = created.id, actor = principal.id, other = other_user_id, "conversation opened");
                Ok(created)
            }
            Err(RepoError::Conflict(_)) => self
                .repo
                .find_conversation(key)
                .await?
                .ok_or_else(|| AppError::Conflict("conversation vanished after insert conflict".into())),
            Err(e) => Err(AppError::from(e).into_reference()),
        }
    }

    pub async fn send_message(&self, principal: &Principal, conversation_id: Id, content: String) -> Result<Message, AppError> {
        authz::ensure_active(principal)?;
        let conversation = self.participant_conversation(principal, conversation_id).await?;
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(AppError::invalid("content", "must not be empty"));
        }
        if content.chars().count() > MESSAGE_MAX {
            return Err(AppError::invalid("content", &format!("must be at most {MESSAGE_MAX} characters")));
        }

        let message = self
            .repo
            .insert_message(NewMessage { conversation_id, sender_id: principal.id, content })
            .await?;
        metrics::increment_counter!("bazaar_messages_sent_total");
        tracing::info!(message_id = message.id, conversation_id, actor = principal.id, "message sent");
        signal(
            self.sink.as_ref(),
            &[Topic::Conversation(conversation.id), Topic::PendingMessages],
            json!({ "conversation_id": conversation.id, "message_id": message.id }),
        );
        Ok(message)
    }

    /// Every unmoderated message system-wide, with sender, conversation
    /// and anchored listing resolved for the reviewer.
    pub async fn list_pending_messages(&self, principal: &Principal) -> Result<Vec<PendingMessage>, AppError> {
        if !authz::can_moderate(principal) {
            return Err(AppError::forbidden("view the message queue"));
        }
        let messages = self.repo.list_unmoderated_messages().await?;

        let mut users: HashMap<Id, User> = HashMap::new();
        let mut conversations: HashMap<Id, Conversation> = HashMap::new();
        let mut listings: HashMap<Id, Option<ListingRef>> = HashMap::new();
        let mut out = Vec::with_capacity(messages.len());

        for message in messages {
            let sender = match users.get(&message.sender_id) {
                Some(u) => u.clone(),
                None => {
                    let u = self.repo.get_user(message.sender_id).await?;
                    users.insert(u.id, u.clone());
                    u
                }
            };
            let conversation = match conversations.get(&message.conversation_id) {
                Some(c) => c.clone(),
                None => {
                    let c = self.repo.get_conversation(message.conversation_id).await?;
                    conversations.insert(c.id, c.clone());
                    c
                }
            };
            let listing = match conversation.listing_id {
                None => None,
                Some(lid) => match listings.get(&lid) {
                    Some(cached) => cached.clone(),
                    None => {
                        // the anchor may have been deleted since
                        let r = match self.repo.get_listing(lid).await {
                            Ok(l) => Some(ListingRef::from(&l)),
                            Err(RepoError::NotFound { .. }) => None,
                            Err(e) => return Err(e.into()),
                        };
                        listings.insert(lid, r.clone());
                        r
                    }
                },
            };
            out.push(PendingMessage { message, sender, conversation, listing });
        }
        Ok(out)
    }

    /// One-way flag. Repeating the call succeeds and keeps the first moderator.
    pub async fn moderate_message(&self, principal: &Principal, message_id: Id) -> Result<Message, AppError> {
        authz::ensure_active(principal)?;
        if !authz::can_moderate(principal) {
            return Err(AppError::forbidden("moderate messages"));
        }
        let before = self.repo.get_message(message_id).await?;
        let message = self.repo.mark_message_moderated(message_id, principal.id).await?;
        if !before.is_moderated {
            metrics::increment_counter!("bazaar_messages_moderated_total");
            tracing::info!(message_id, actor = principal.id, "message moderated");
            signal(self.sink.as_ref(), &[Topic::PendingMessages], json!({ "message_id": message_id }));
        }
        Ok(message)
    }

    /// Marks the other participant's messages read; returns how many changed.
    pub async fn mark_read(&self, principal: &Principal, conversation_id: Id) -> Result<u64, AppError> {
        authz::ensure_active(principal)?;
        self.participant_conversation(principal, conversation_id).await?;
        let changed = self.repo.mark_conversation_read(conversation_id, principal.id, Utc::now()).await?;
        if changed > 0 {
            signal(self.sink.as_ref(), &[Topic::Conversation(conversation_id)], json!({ "read": changed }));
        }
        Ok(changed)
    }

    pub async fn list_conversations(&self, principal: &Principal) -> Result<Vec<ConversationSummary>, AppError> {
        let conversations = self.repo.list_conversations(principal.id).await?;
        let mut out = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let unread = self.repo.count_unread(principal.id, Some(conversation.id)).await?;
            out.push(ConversationSummary {
                other_user_id: conversation.other_participant(principal.id),
                conversation,
                unread,
            });
        }
        Ok(out)
    }

    pub async fn list_messages(&self, principal: &Principal, conversation_id: Id) -> Result<Vec<Message>, AppError> {
        self.participant_conversation(principal, conversation_id).await?;
        Ok(self.repo.list_messages(conversation_id).await?)
    }

    pub async fn unread_count(&self, principal: &Principal) -> Result<i64, AppError> {
        Ok(self.repo.count_unread(principal.id, None).await?)
    }

    /// Sizes of both moderation queues.
    pub async fn pending_counts(&self, principal: &Principal) -> Result<PendingCounts, AppError> {
        if !authz::can_moderate(principal) {
            return Err(AppError::forbidden("view moderation counts"));
        }
        let listings = self.repo.count_listings(&ListingFilter::with_status(ListingStatus::Pending)).await?;
        let messages = self.repo.count_unmoderated_messages().await?;
        Ok(PendingCounts { listings, messages })
    }
}
