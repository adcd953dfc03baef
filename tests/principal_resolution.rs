#![cfg(feature = "inmem-store")]

mod common;

use std::sync::Arc;

use bazaar::auth::{Claims, Role};
use bazaar::authz::resolve_principal;
use bazaar::error::AppError;
use bazaar::repo::inmem::InMemRepo;
use bazaar::repo::UserRepo;
use common::racing::RacingRepo;

fn claims(sub: &str, roles: Vec<Role>) -> Claims {
    Claims { sub: sub.into(), exp: usize::MAX, roles, name: Some("newcomer".into()) }
}

#[tokio::test]
async fn concurrent_registration_keeps_the_first_row() {
    let store = Arc::new(InMemRepo::ephemeral());
    let racing = RacingRepo::new(store.clone());

    // another request registers user 50 between our lookup and our insert
    let p = resolve_principal(&claims("50", vec![Role::User]), &racing, &[]).await.unwrap();
    assert_eq!(p.id, 50);
    assert_eq!(p.role, Role::Moderator);
    assert_eq!(store.get_user(50).await.unwrap().username, "first-writer");
}

#[tokio::test]
async fn stored_standing_wins_over_token_roles() {
    let store = InMemRepo::ephemeral();
    let first = resolve_principal(&claims("51", vec![Role::User]), &store, &[51]).await.unwrap();
    assert_eq!(first.role, Role::Admin);

    let again = resolve_principal(&claims("51", vec![Role::User]), &store, &[]).await.unwrap();
    assert_eq!(again.role, Role::Admin);

    assert!(matches!(
        resolve_principal(&claims("not-a-number", vec![]), &store, &[]).await,
        Err(AppError::Unauthorized)
    ));
}
