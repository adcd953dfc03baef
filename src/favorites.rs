use std::sync::Arc;

use serde_json::json;

use crate::authz::{self, Principal};
use crate::error::AppError;
use crate::models::{Favorite, Id};
use crate::notify::{signal, InvalidationSink, Topic};
use crate::repo::{Repo, RepoError};

#[derive(Clone)]
pub struct FavoriteService {
    repo: Arc<dyn Repo>,
    sink: Arc<dyn InvalidationSink>,
}

impl FavoriteService {
    pub fn new(repo: Arc<dyn Repo>, sink: Arc<dyn InvalidationSink>) -> Self {
        Self { repo, sink }
    }

    /// Idempotent: a duplicate add, including one that lost a concurrent
    /// race, returns the stored row.
    pub async fn add(&self, principal: &Principal, listing_id: Id) -> Result<Favorite, AppError> {
        authz::ensure_active(principal)?;
        match self.repo.insert_favorite(principal.id, listing_id).await {
            Ok(f) => {
                signal(self.sink.as_ref(), &[Topic::Favorites(principal.id)], json!({ "listing_id": listing_id }));
                Ok(f)
            }
            Err(RepoError::Conflict(_)) => Ok(self.repo.get_favorite(principal.id, listing_id).await?),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove(&self, principal: &Principal, listing_id: Id) -> Result<(), AppError> {
        authz::ensure_active(principal)?;
        self.repo.delete_favorite(principal.id, listing_id).await?;
        signal(self.sink.as_ref(), &[Topic::Favorites(principal.id)], json!({ "listing_id": listing_id }));
        Ok(())
    }

    pub async fn list(&self, principal: &Principal) -> Result<Vec<Favorite>, AppError> {
        Ok(self.repo.list_favorites(principal.id).await?)
    }
}
