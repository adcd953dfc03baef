//! Who may do what. Every predicate is a pure function of the acting
//! principal and the record it touches; services call them before any
//! validation or state check.

use crate::auth::{Claims, Role};
use crate::error::AppError;
use crate::models::{Conversation, Id, Listing, NewUser, User};
use crate::repo::{RepoError, UserRepo};

/// The authenticated actor as the store knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Id,
    pub role: Role,
    pub is_banned: bool,
}

impl Principal {
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Moderator | Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Principal {
    fn from(u: &User) -> Self {
        Self { id: u.id, role: u.role, is_banned: u.is_banned }
    }
}

/// A banned principal may read but not mutate.
pub fn ensure_active(p: &Principal) -> Result<(), AppError> {
    if p.is_banned {
        return Err(AppError::Forbidden("account is banned".into()));
    }
    Ok(())
}

pub fn can_moderate(p: &Principal) -> bool {
    p.is_staff()
}

/// Full content edits are a moderation tool; owners only reprice.
pub fn can_edit_content(p: &Principal, _listing: &Listing) -> bool {
    p.is_staff()
}

pub fn can_update_price(p: &Principal, listing: &Listing) -> bool {
    listing.owner_user_id == p.id || p.is_staff()
}

pub fn can_delete_listing(p: &Principal, listing: &Listing) -> bool {
    listing.owner_user_id == p.id || p.is_staff()
}

pub fn can_mark_sold(p: &Principal, listing: &Listing) -> bool {
    listing.owner_user_id == p.id || p.is_staff()
}

/// Non-public listings are visible to their owner and staff only.
pub fn can_view_listing(p: Option<&Principal>, listing: &Listing) -> bool {
    listing.status.is_public()
        || p.is_some_and(|p| listing.owner_user_id == p.id || p.is_staff())
}

pub fn is_participant(p: &Principal, conversation: &Conversation) -> bool {
    conversation.has_participant(p.id)
}

/// Map validated token claims onto a stored user, registering it on first
/// sight. After registration the stored role and ban flag are authoritative.
pub async fn resolve_principal<R: UserRepo + ?Sized>(
    claims: &Claims,
    users: &R,
    bootstrap_admins: &[Id],
) -> Result<Principal, AppError> {
    let id = claims.user_id().ok_or(AppError::Unauthorized)?;
    match users.get_user(id).await {
        Ok(user) => Ok(Principal::from(&user)),
        Err(RepoError::NotFound { .. }) => {
            let role = if bootstrap_admins.contains(&id) {
                Role::Admin
            } else {
                Role::highest(&claims.roles)
            };
            let username = claims
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("user-{id}"));
            let user = match users.insert_user(NewUser { id, username, role }).await {
                Ok(u) => u,
                // registered concurrently by another request
                Err(RepoError::Conflict(_)) => users.get_user(id).await?,
                Err(e) => return Err(e.into()),
            };
            tracing::info!(user_id = id, role = user.role.as_str(), "registered principal");
            Ok(Principal::from(&user))
        }
        Err(e) => Err(e.into()),
    }
}
