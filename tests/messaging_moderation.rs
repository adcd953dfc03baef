#![cfg(feature = "inmem-store")]

mod common;

use std::sync::Arc;

use bazaar::error::AppError;
use bazaar::messaging::MessagingService;
use bazaar::models::*;
use bazaar::notify::Topic;
use bazaar::repo::{MessageRepo, UserRepo};
use common::racing::RacingRepo;
use common::*;

#[tokio::test]
async fn conversation_is_found_from_either_side() {
    let w = world().await;
    let l = w.approved_listing().await;
    let buyer = w.principal(BUYER).await;
    let owner = w.principal(OWNER).await;

    let a = w.messaging.find_or_create_conversation(&buyer, OWNER, Some(l.id)).await.unwrap();
    let b = w.messaging.find_or_create_conversation(&owner, BUYER, Some(l.id)).await.unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!((a.user_one, a.user_two), (OWNER, BUYER));

    // a different anchor is a different conversation
    let general = w.messaging.find_or_create_conversation(&buyer, OWNER, None).await.unwrap();
    assert_ne!(general.id, a.id);
}

#[tokio::test]
async fn simultaneous_first_contact_creates_one_row() {
    let w = world().await;
    let buyer = w.principal(BUYER).await;
    let owner = w.principal(OWNER).await;

    let (a, b) = tokio::join!(
        w.messaging.find_or_create_conversation(&owner, BUYER, None),
        w.messaging.find_or_create_conversation(&buyer, OWNER, None),
    );
    assert_eq!(a.unwrap().id, b.unwrap().id);
    assert_eq!(w.repo.list_conversations(OWNER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn conversation_arguments_are_checked() {
    let w = world().await;
    let buyer = w.principal(BUYER).await;
    assert!(matches!(
        w.messaging.find_or_create_conversation(&buyer, BUYER, None).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        w.messaging.find_or_create_conversation(&buyer, 404, None).await,
        Err(AppError::ReferenceNotFound { entity: "user", id: 404 })
    ));
    assert!(matches!(
        w.messaging.find_or_create_conversation(&buyer, OWNER, Some(77)).await,
        Err(AppError::ReferenceNotFound { entity: "listing", id: 77 })
    ));
    let banned = w.principal(BANNED).await;
    assert!(matches!(
        w.messaging.find_or_create_conversation(&banned, OWNER, None).await,
        Err(AppError::Forbidden(_))
    ));
}

#[tokio::test]
async fn only_participants_send_and_content_is_required() {
    let w = world().await;
    let buyer = w.principal(BUYER).await;
    let c = w.messaging.find_or_create_conversation(&buyer, OWNER, None).await.unwrap();

    let m = w.messaging.send_message(&buyer, c.id, "  Is it still available?  ".into()).await.unwrap();
    assert_eq!(m.content, "Is it still available?");
    assert!(!m.is_moderated && m.read_at.is_none() && m.moderator_id.is_none());

    let err = w.messaging.send_message(&buyer, c.id, "   ".into()).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // moderators are not participants either
    let moderator = w.principal(MODERATOR).await;
    let err = w.messaging.send_message(&moderator, c.id, "hello".into()).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = w.messaging.send_message(&buyer, 9999, "hello".into()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { entity: "conversation", .. }));
}

#[tokio::test]
async fn sending_bumps_conversation_to_the_top() {
    let w = world().await;
    let l = w.approved_listing().await;
    let buyer = w.principal(BUYER).await;
    let moderator = w.principal(MODERATOR).await;
    let about_listing = w.messaging.find_or_create_conversation(&buyer, OWNER, Some(l.id)).await.unwrap();
    let with_mod = w.messaging.find_or_create_conversation(&buyer, MODERATOR, None).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    w.messaging.send_message(&moderator, with_mod.id, "ping".into()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    w.messaging.send_message(&buyer, about_listing.id, "offer 100k".into()).await.unwrap();

    let list = w.messaging.list_conversations(&buyer).await.unwrap();
    let ids: Vec<_> = list.iter().map(|s| s.conversation.id).collect();
    assert_eq!(ids, vec![about_listing.id, with_mod.id]);
    assert_eq!(list[0].other_user_id, OWNER);
    assert_eq!(list[1].unread, 1);
    assert_eq!(list[0].unread, 0);
}

#[tokio::test]
async fn pending_queue_carries_context() {
    let w = world().await;
    let l = w.approved_listing().await;
    let buyer = w.principal(BUYER).await;
    let c = w.messaging.find_or_create_conversation(&buyer, OWNER, Some(l.id)).await.unwrap();
    let m = w.messaging.send_message(&buyer, c.id, "Can you ship it?".into()).await.unwrap();

    let moderator = w.principal(MODERATOR).await;
    let queue = w.messaging.list_pending_messages(&moderator).await.unwrap();
    assert_eq!(queue.len(), 1);
    let entry = &queue[0];
    assert_eq!(entry.message.id, m.id);
    assert_eq!(entry.sender.id, BUYER);
    assert_eq!(entry.sender.username, "buyer");
    assert_eq!(entry.conversation.id, c.id);
    assert_eq!(entry.listing.as_ref().map(|r| r.id), Some(l.id));

    assert!(matches!(w.messaging.list_pending_messages(&buyer).await, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn moderating_twice_succeeds_and_keeps_first_moderator() {
    let w = world().await;
    let buyer = w.principal(BUYER).await;
    let c = w.messaging.find_or_create_conversation(&buyer, OWNER, None).await.unwrap();
    let m = w.messaging.send_message(&buyer, c.id, "hi".into()).await.unwrap();

    let moderator = w.principal(MODERATOR).await;
    let admin = w.principal(ADMIN).await;
    w.sink.clear();
    let first = w.messaging.moderate_message(&moderator, m.id).await.unwrap();
    let second = w.messaging.moderate_message(&admin, m.id).await.unwrap();
    assert!(first.is_moderated && second.is_moderated);
    assert_eq!(second.moderator_id, Some(MODERATOR));
    assert_eq!(w.sink.topics(), vec![Topic::PendingMessages]);

    assert!(w.messaging.list_pending_messages(&moderator).await.unwrap().is_empty());
    assert!(matches!(w.messaging.moderate_message(&buyer, m.id).await, Err(AppError::Forbidden(_))));
    assert!(matches!(
        w.messaging.moderate_message(&moderator, 4242).await,
        Err(AppError::NotFound { entity: "message", .. })
    ));
}

#[tokio::test]
async fn mark_read_only_touches_the_other_side() {
    let w = world().await;
    let buyer = w.principal(BUYER).await;
    let owner = w.principal(OWNER).await;
    let c = w.messaging.find_or_create_conversation(&buyer, OWNER, None).await.unwrap();
    w.messaging.send_message(&buyer, c.id, "one".into()).await.unwrap();
    w.messaging.send_message(&buyer, c.id, "two".into()).await.unwrap();
    w.messaging.send_message(&owner, c.id, "reply".into()).await.unwrap();

    assert_eq!(w.messaging.unread_count(&owner).await.unwrap(), 2);
    assert_eq!(w.messaging.mark_read(&owner, c.id).await.unwrap(), 2);
    assert_eq!(w.messaging.mark_read(&owner, c.id).await.unwrap(), 0);
    assert_eq!(w.messaging.unread_count(&owner).await.unwrap(), 0);
    assert_eq!(w.messaging.unread_count(&buyer).await.unwrap(), 1);

    let messages = w.messaging.list_messages(&owner, c.id).await.unwrap();
    let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "two", "reply"]);
    assert!(messages[0].read_at.is_some());
    assert!(messages[2].read_at.is_none());

    let stranger = w.principal(MODERATOR).await;
    assert!(matches!(w.messaging.mark_read(&stranger, c.id).await, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn pending_counts_cover_both_queues() {
    let w = world().await;
    w.pending_listing().await;
    let buyer = w.principal(BUYER).await;
    let c = w.messaging.find_or_create_conversation(&buyer, OWNER, None).await.unwrap();
    w.messaging.send_message(&buyer, c.id, "hello".into()).await.unwrap();

    let moderator = w.principal(MODERATOR).await;
    assert_eq!(
        w.messaging.pending_counts(&moderator).await.unwrap(),
        PendingCounts { listings: 1, messages: 1 }
    );
    assert!(matches!(w.messaging.pending_counts(&buyer).await, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn losing_the_insert_race_returns_the_winners_row() {
    let w = world().await;
    let racing = Arc::new(RacingRepo::new(w.repo.clone()));
    let messaging = MessagingService::new(racing, w.sink.clone());
    let buyer = w.principal(BUYER).await;

    // the other side inserts between our lookup and our insert
    let c = messaging.find_or_create_conversation(&buyer, OWNER, None).await.unwrap();
    let stored = w.repo.list_conversations(BUYER).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, c.id);
}

#[tokio::test]
async fn banned_participant_cannot_mark_read() {
    let w = world().await;
    let buyer = w.principal(BUYER).await;
    let c = w.messaging.find_or_create_conversation(&buyer, OWNER, None).await.unwrap();
    w.messaging.send_message(&buyer, c.id, "hi".into()).await.unwrap();

    w.repo.update_user(OWNER, UserPatch { role: None, is_banned: Some(true) }).await.unwrap();
    let banned_owner = w.principal(OWNER).await;
    assert!(matches!(w.messaging.mark_read(&banned_owner, c.id).await, Err(AppError::Forbidden(_))));

    let messages = w.repo.list_messages(c.id).await.unwrap();
    assert!(messages.iter().all(|m| m.read_at.is_none()));
}
