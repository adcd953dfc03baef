use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use futures_util::future::{ready, Ready};
use std::env;
use utoipa::ToSchema;

use crate::models::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    fn rank(&self) -> u8 {
        match self {
            Role::User => 0,
            Role::Moderator => 1,
            Role::Admin => 2,
        }
    }

    /// Highest privilege among `roles`, `User` when empty.
    pub fn highest(roles: &[Role]) -> Role {
        roles.iter().copied().max_by_key(Role::rank).unwrap_or(Role::User)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user id.
    pub sub: String,
    pub exp: usize,
    pub roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Claims {
    pub fn user_id(&self) -> Option<Id> {
        self.sub.parse().ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("JWT_SECRET not set")]
    MissingSecret,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

fn secret() -> Result<String, TokenError> {
    env::var("JWT_SECRET").map_err(|_| TokenError::MissingSecret)
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, TokenError> {
    let secret = secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token()) {
                Ok(claims) => ready(Ok(Auth(claims))),
                Err(TokenError::MissingSecret) => {
                    log::error!("JWT_SECRET missing while validating a bearer token");
                    ready(Err(actix_web::error::ErrorInternalServerError("auth misconfigured")))
                }
                Err(_) => ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT"))),
            };
        }
        ready(Err(actix_web::error::ErrorUnauthorized(
            "Authorization required",
        )))
    }
}

/// Create a JWT for a user, valid for 24 hours.
pub fn create_jwt(user_id: Id, username: &str, roles: Vec<Role>) -> Result<String, TokenError> {
    let secret = secret()?;
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(24))
        .map(|t| t.timestamp() as usize)
        .unwrap_or(usize::MAX);

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
        roles,
        name: Some(username.to_string()),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_role_wins() {
        assert_eq!(Role::highest(&[Role::User, Role::Admin, Role::Moderator]), Role::Admin);
        assert_eq!(Role::highest(&[]), Role::User);
    }

    #[test]
    fn claims_parse_numeric_subject() {
        let c = Claims { sub: "42".into(), exp: 0, roles: vec![], name: None };
        assert_eq!(c.user_id(), Some(42));
        let c = Claims { sub: "btc:abc".into(), exp: 0, roles: vec![], name: None };
        assert_eq!(c.user_id(), None);
    }
}
