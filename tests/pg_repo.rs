#![cfg(feature = "postgres-store")]

use bazaar::auth::Role;
use bazaar::models::*;
use bazaar::repo::pg::PgRepo;
use bazaar::repo::{FavoriteRepo, ListingRepo, MessageRepo, ReferenceRepo, RepoError, UserRepo};

/// Connects and migrates, or `None` when no database is configured.
async fn pg() -> Option<PgRepo> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping");
        return None;
    };
    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(4).connect(&url).await.unwrap();
    let repo = PgRepo::new(pool);
    repo.migrate().await.unwrap();
    Some(repo)
}

fn unique() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn fresh_id() -> Id {
    (uuid::Uuid::new_v4().as_u128() % 1_000_000_000) as Id + 1_000
}

async fn user(r: &PgRepo, role: Role) -> User {
    r.insert_user(NewUser { id: fresh_id(), username: unique(), role }).await.unwrap()
}

fn draft(category_id: Id, server_id: Id) -> ListingDraft {
    ListingDraft {
        category_id,
        subcategory_id: None,
        server_id,
        title: "Golden carp".into(),
        description: "Fresh catch".into(),
        price: 150_000,
        images: vec![],
        metadata: ListingMetadata::Fish(FishDetails {
            contacts: None,
            species: "carp".into(),
            weight_kg: None,
            location: None,
        }),
    }
}

async fn listing(r: &PgRepo, owner: Id) -> Listing {
    let cat = r
        .create_category(NewCategory { slug: unique(), title: "Fish".into(), kind: CategoryKind::Fish })
        .await
        .unwrap();
    let server = r.create_server(NewServer { slug: unique(), title: "EU".into() }).await.unwrap();
    r.insert_listing(NewListing::from_draft(owner, draft(cat.id, server.id))).await.unwrap()
}

#[tokio::test]
async fn pg_listing_state_guards() {
    let Some(r) = pg().await else { return };
    let owner = user(&r, Role::User).await;
    let moderator = user(&r, Role::Moderator).await;
    let l = listing(&r, owner.id).await;
    assert_eq!(l.status, ListingStatus::Pending);

    assert!(matches!(r.update_listing(l.id, ListingPatch::MarkSold).await, Err(RepoError::Conflict(_))));
    let approve = ListingPatch::Moderation { status: ListingStatus::Approved, moderator_id: moderator.id, note: None };
    r.update_listing(l.id, approve.clone()).await.unwrap();
    r.update_listing(l.id, ListingPatch::MarkSold).await.unwrap();
    assert!(matches!(r.update_listing(l.id, approve).await, Err(RepoError::Conflict(_))));

    r.insert_favorite(owner.id, l.id).await.unwrap();
    r.delete_listing(l.id).await.unwrap();
    assert!(r.list_favorites(owner.id).await.unwrap().is_empty());
    assert!(matches!(r.delete_listing(l.id).await, Err(RepoError::NotFound { .. })));
}

#[tokio::test]
async fn pg_unique_constraints_map_to_conflict() {
    let Some(r) = pg().await else { return };
    let a = user(&r, Role::User).await;
    let b = user(&r, Role::User).await;

    let again = r.insert_user(NewUser { id: a.id, username: unique(), role: Role::User }).await;
    assert!(matches!(again, Err(RepoError::Conflict(_))));

    let c = r.insert_conversation(ConversationKey::new(a.id, b.id, None)).await.unwrap();
    let dup = r.insert_conversation(ConversationKey::new(b.id, a.id, None)).await;
    assert!(matches!(dup, Err(RepoError::Conflict(_))));
    assert_eq!(r.find_conversation(ConversationKey::new(b.id, a.id, None)).await.unwrap().map(|x| x.id), Some(c.id));

    r.insert_message(NewMessage { conversation_id: c.id, sender_id: a.id, content: "hi".into() }).await.unwrap();
    assert_eq!(r.count_unread(b.id, Some(c.id)).await.unwrap(), 1);
    assert_eq!(r.mark_conversation_read(c.id, b.id, chrono::Utc::now()).await.unwrap(), 1);
    assert_eq!(r.count_unread(b.id, Some(c.id)).await.unwrap(), 0);
}

#[tokio::test]
async fn pg_dangling_references_name_the_missing_row() {
    let Some(r) = pg().await else { return };
    let owner = user(&r, Role::User).await;
    let cat = r
        .create_category(NewCategory { slug: unique(), title: "Fish".into(), kind: CategoryKind::Fish })
        .await
        .unwrap();

    let missing_server = r.insert_listing(NewListing::from_draft(owner.id, draft(cat.id, -1))).await;
    assert!(matches!(missing_server, Err(RepoError::NotFound { entity: "server", id: -1 })));

    let ghost = fresh_id();
    let (low, high) = if ghost < owner.id { (ghost, owner.id) } else { (owner.id, ghost) };
    let missing_user = r.insert_conversation(ConversationKey::new(low, high, None)).await;
    assert!(matches!(missing_user, Err(RepoError::NotFound { entity: "user", id }) if id == ghost));
}
