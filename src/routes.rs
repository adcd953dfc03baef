use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{Auth, Role};
use crate::authz::{self, Principal};
use crate::error::{ApiErrorBody, AppError, FieldErrors};
use crate::favorites::FavoriteService;
use crate::listings::ListingService;
use crate::messaging::MessagingService;
use crate::models::*;
use crate::notify::InvalidationSink;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(
                web::resource("/listings")
                    .route(web::get().to(list_listings))
                    .route(web::post().to(create_listing)),
            )
            // must precede /listings/{id}
            .service(web::resource("/listings/mine").route(web::get().to(list_my_listings)))
            .service(
                web::resource("/listings/{id}")
                    .route(web::get().to(get_listing))
                    .route(web::put().to(update_listing_content))
                    .route(web::delete().to(delete_listing)),
            )
            .service(web::resource("/listings/{id}/status").route(web::patch().to(moderate_listing)))
            .service(web::resource("/listings/{id}/price").route(web::patch().to(update_listing_price)))
            .service(web::resource("/listings/{id}/sold").route(web::post().to(mark_listing_sold)))
            .service(
                web::resource("/listings/{id}/favorite")
                    .route(web::put().to(add_favorite))
                    .route(web::delete().to(remove_favorite)),
            )
            .service(web::resource("/favorites").route(web::get().to(list_favorites)))
            .service(
                web::resource("/conversations")
                    .route(web::get().to(list_conversations))
                    .route(web::post().to(open_conversation)),
            )
            .service(
                web::resource("/conversations/{id}/messages")
                    .route(web::get().to(list_messages))
                    .route(web::post().to(send_message)),
            )
            .service(web::resource("/conversations/{id}/read").route(web::post().to(mark_conversation_read)))
            .service(web::resource("/messages").route(web::get().to(list_pending_messages)))
            .service(web::resource("/messages/{id}/moderate").route(web::patch().to(moderate_message)))
            .service(web::resource("/moderation/counts").route(web::get().to(pending_counts)))
            .service(
                web::resource("/categories")
                    .route(web::get().to(list_categories))
                    .route(web::post().to(create_category)),
            )
            .service(
                web::resource("/categories/{id}/subcategories")
                    .route(web::get().to(list_subcategories))
                    .route(web::post().to(create_subcategory)),
            )
            .service(
                web::resource("/servers")
                    .route(web::get().to(list_servers))
                    .route(web::post().to(create_server)),
            )
            .service(web::resource("/admin/users/{id}").route(web::patch().to(admin_update_user))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub listings: ListingService,
    pub messaging: MessagingService,
    pub favorites: FavoriteService,
    pub rate_limiter: Option<RateLimiterFacade>,
    pub bootstrap_admins: Arc<[Id]>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, sink: Arc<dyn InvalidationSink>) -> Self {
        Self {
            listings: ListingService::new(repo.clone(), sink.clone()),
            messaging: MessagingService::new(repo.clone(), sink.clone()),
            favorites: FavoriteService::new(repo.clone(), sink),
            repo,
            rate_limiter: None,
            bootstrap_admins: Arc::from(Vec::new()),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_bootstrap_admins(mut self, ids: Vec<Id>) -> Self {
        self.bootstrap_admins = Arc::from(ids);
        self
    }

    fn throttle(&self, allow: impl Fn(&RateLimiterFacade) -> bool) -> Result<(), AppError> {
        match &self.rate_limiter {
            Some(rl) if !allow(rl) => Err(AppError::RateLimited),
            _ => Ok(()),
        }
    }
}

/// Bearer token resolved to a stored principal.
impl FromRequest for Principal {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let auth = Auth::from_request(req, pl).into_inner();
        let state = req.app_data::<web::Data<AppState>>().cloned();
        Box::pin(async move {
            let Auth(claims) = auth?;
            let state = state.ok_or_else(|| {
                log::error!("AppState missing from app data");
                actix_web::error::ErrorInternalServerError("server misconfigured")
            })?;
            let principal = authz::resolve_principal(&claims, state.repo.as_ref(), &state.bootstrap_admins).await?;
            Ok(principal)
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub user: User,
    pub unread_messages: i64,
}

#[derive(Serialize, ToSchema)]
pub struct ReadResponse {
    pub marked_read: u64,
}

#[derive(Deserialize)]
pub struct MessageQuery {
    pub moderated: Option<bool>,
}

fn ensure_admin(p: &Principal) -> Result<(), AppError> {
    authz::ensure_active(p)?;
    if !p.is_admin() {
        return Err(AppError::forbidden("manage the marketplace"));
    }
    Ok(())
}

fn check_slug(slug: &str, title: &str) -> Result<(), AppError> {
    let mut errs = FieldErrors::new();
    errs.check(
        !slug.is_empty() && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'),
        "slug",
        "lowercase letters, digits, '-' or '_'",
    );
    errs.check(!title.trim().is_empty(), "title", "must not be empty");
    errs.finish()
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current principal", body = MeResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody)
    )
)]
pub async fn auth_me(principal: Principal, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let user = data.repo.get_user(principal.id).await?;
    let unread_messages = data.messaging.unread_count(&principal).await?;
    Ok(HttpResponse::Ok().json(MeResponse { user, unread_messages }))
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/listings",
    params(
        ("status" = Option<ListingStatus>, Query, description = "approved (default, public) or pending (moderators)"),
        ("category_id" = Option<Id>, Query, description = "Category filter"),
        ("server_id" = Option<Id>, Query, description = "Server filter"),
        ("limit" = Option<i64>, Query, description = "Page size, at most 100"),
        ("offset" = Option<i64>, Query, description = "Page offset")
    ),
    responses(
        (status = 200, description = "Listings", body = [Listing]),
        (status = 403, description = "Pending queue requires moderator", body = ApiErrorBody)
    )
)]
pub async fn list_listings(
    principal: Option<Principal>,
    data: web::Data<AppState>,
    query: web::Query<ListingFilter>,
) -> Result<HttpResponse, AppError> {
    let filter = query.into_inner();
    let listings = match filter.status {
        None | Some(ListingStatus::Approved) => data.listings.list_catalog(filter).await?,
        Some(ListingStatus::Pending) => {
            let principal = principal.ok_or(AppError::Unauthorized)?;
            data.listings.list_pending(&principal, filter).await?
        }
        Some(other) => {
            return Err(AppError::invalid("status", format!("cannot list '{other}' listings")));
        }
    };
    Ok(HttpResponse::Ok().json(listings))
}

#[utoipa::path(
    post,
    path = "/api/v1/listings",
    request_body = ListingDraft,
    responses(
        (status = 201, description = "Listing submitted for moderation", body = Listing),
        (status = 400, description = "Invalid draft or dangling reference", body = ApiErrorBody),
        (status = 403, description = "Banned", body = ApiErrorBody),
        (status = 429, description = "Too many submissions", body = ApiErrorBody)
    )
)]
pub async fn create_listing(
    principal: Principal,
    data: web::Data<AppState>,
    payload: web::Json<ListingDraft>,
) -> Result<HttpResponse, AppError> {
    data.throttle(|rl| rl.allow_listing(principal.id))?;
    let listing = data.listings.create_listing(&principal, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(listing))
}

#[utoipa::path(
    get,
    path = "/api/v1/listings/mine",
    responses((status = 200, description = "Own listings in any status", body = [Listing]))
)]
pub async fn list_my_listings(principal: Principal, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(data.listings.list_mine(&principal).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/listings/{id}",
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Listing", body = Listing),
        (status = 404, description = "Not found or not visible", body = ApiErrorBody)
    )
)]
pub async fn get_listing(
    principal: Option<Principal>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, AppError> {
    let listing = data.listings.get_listing(principal.as_ref(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(listing))
}

#[utoipa::path(
    put,
    path = "/api/v1/listings/{id}",
    params(("id" = Id, Path, description = "Listing id")),
    request_body = ContentPatch,
    responses(
        (status = 200, description = "Updated", body = Listing),
        (status = 403, description = "Moderators only", body = ApiErrorBody)
    )
)]
pub async fn update_listing_content(
    principal: Principal,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ContentPatch>,
) -> Result<HttpResponse, AppError> {
    let listing = data.listings.update_content(&principal, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(listing))
}

#[utoipa::path(
    delete,
    path = "/api/v1/listings/{id}",
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = ApiErrorBody)
    )
)]
pub async fn delete_listing(principal: Principal, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, AppError> {
    data.listings.delete_listing(&principal, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    patch,
    path = "/api/v1/listings/{id}/status",
    params(("id" = Id, Path, description = "Listing id")),
    request_body = ModerationRequest,
    responses(
        (status = 200, description = "Decision recorded", body = Listing),
        (status = 400, description = "Missing rejection note", body = ApiErrorBody),
        (status = 403, description = "Moderators only", body = ApiErrorBody)
    )
)]
pub async fn moderate_listing(
    principal: Principal,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ModerationRequest>,
) -> Result<HttpResponse, AppError> {
    let ModerationRequest { decision, note } = payload.into_inner();
    let listing = data.listings.decide_moderation(&principal, path.into_inner(), decision, note).await?;
    Ok(HttpResponse::Ok().json(listing))
}

#[utoipa::path(
    patch,
    path = "/api/v1/listings/{id}/price",
    params(("id" = Id, Path, description = "Listing id")),
    request_body = PriceUpdate,
    responses(
        (status = 200, description = "Price updated", body = Listing),
        (status = 403, description = "Owner or moderators only", body = ApiErrorBody)
    )
)]
pub async fn update_listing_price(
    principal: Principal,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<PriceUpdate>,
) -> Result<HttpResponse, AppError> {
    let listing = data.listings.update_price(&principal, path.into_inner(), payload.price).await?;
    Ok(HttpResponse::Ok().json(listing))
}

#[utoipa::path(
    post,
    path = "/api/v1/listings/{id}/sold",
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 200, description = "Marked sold", body = Listing),
        (status = 400, description = "Listing is not approved", body = ApiErrorBody)
    )
)]
pub async fn mark_listing_sold(principal: Principal, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, AppError> {
    let listing = data.listings.mark_sold(&principal, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(listing))
}

// ---------------------------------------------------------------------------
// Favorites
// ---------------------------------------------------------------------------

#[utoipa::path(
    put,
    path = "/api/v1/listings/{id}/favorite",
    params(("id" = Id, Path, description = "Listing id")),
    responses((status = 200, description = "Favorited (idempotent)", body = Favorite))
)]
pub async fn add_favorite(principal: Principal, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, AppError> {
    let favorite = data.favorites.add(&principal, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(favorite))
}

#[utoipa::path(
    delete,
    path = "/api/v1/listings/{id}/favorite",
    params(("id" = Id, Path, description = "Listing id")),
    responses(
        (status = 204, description = "Removed"),
        (status = 404, description = "Not a favorite", body = ApiErrorBody)
    )
)]
pub async fn remove_favorite(principal: Principal, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, AppError> {
    data.favorites.remove(&principal, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/favorites",
    responses((status = 200, description = "Own favorites", body = [Favorite]))
)]
pub async fn list_favorites(principal: Principal, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(data.favorites.list(&principal).await?))
}

// ---------------------------------------------------------------------------
// Conversations & messages
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/conversations",
    request_body = ConversationRequest,
    responses(
        (status = 200, description = "Existing or new conversation", body = Conversation),
        (status = 400, description = "Unknown user or listing", body = ApiErrorBody)
    )
)]
pub async fn open_conversation(
    principal: Principal,
    data: web::Data<AppState>,
    payload: web::Json<ConversationRequest>,
) -> Result<HttpResponse, AppError> {
    data.throttle(|rl| rl.allow_conversation(principal.id))?;
    let ConversationRequest { other_user_id, listing_id } = payload.into_inner();
    let conversation = data.messaging.find_or_create_conversation(&principal, other_user_id, listing_id).await?;
    Ok(HttpResponse::Ok().json(conversation))
}

#[utoipa::path(
    get,
    path = "/api/v1/conversations",
    responses((status = 200, description = "Most recently active first", body = [ConversationSummary]))
)]
pub async fn list_conversations(principal: Principal, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(data.messaging.list_conversations(&principal).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/conversations/{id}/messages",
    params(("id" = Id, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Messages, oldest first", body = [Message]),
        (status = 403, description = "Not a participant", body = ApiErrorBody)
    )
)]
pub async fn list_messages(principal: Principal, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(data.messaging.list_messages(&principal, path.into_inner()).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/messages",
    params(("id" = Id, Path, description = "Conversation id")),
    request_body = MessageBody,
    responses(
        (status = 201, description = "Sent", body = Message),
        (status = 403, description = "Not a participant", body = ApiErrorBody),
        (status = 429, description = "Too many messages", body = ApiErrorBody)
    )
)]
pub async fn send_message(
    principal: Principal,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<MessageBody>,
) -> Result<HttpResponse, AppError> {
    data.throttle(|rl| rl.allow_message(principal.id))?;
    let message = data.messaging.send_message(&principal, path.into_inner(), payload.into_inner().content).await?;
    Ok(HttpResponse::Created().json(message))
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/read",
    params(("id" = Id, Path, description = "Conversation id")),
    responses((status = 200, description = "Messages marked read", body = ReadResponse))
)]
pub async fn mark_conversation_read(principal: Principal, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, AppError> {
    let marked_read = data.messaging.mark_read(&principal, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ReadResponse { marked_read }))
}

#[utoipa::path(
    get,
    path = "/api/v1/messages",
    params(("moderated" = Option<bool>, Query, description = "Only `false` is supported")),
    responses(
        (status = 200, description = "Unmoderated messages with context", body = [PendingMessage]),
        (status = 403, description = "Moderators only", body = ApiErrorBody)
    )
)]
pub async fn list_pending_messages(
    principal: Principal,
    data: web::Data<AppState>,
    query: web::Query<MessageQuery>,
) -> Result<HttpResponse, AppError> {
    if query.moderated == Some(true) {
        return Err(AppError::invalid("moderated", "only moderated=false is supported"));
    }
    Ok(HttpResponse::Ok().json(data.messaging.list_pending_messages(&principal).await?))
}

#[utoipa::path(
    patch,
    path = "/api/v1/messages/{id}/moderate",
    params(("id" = Id, Path, description = "Message id")),
    responses(
        (status = 200, description = "Flagged as moderated (idempotent)", body = Message),
        (status = 403, description = "Moderators only", body = ApiErrorBody)
    )
)]
pub async fn moderate_message(principal: Principal, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(data.messaging.moderate_message(&principal, path.into_inner()).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/moderation/counts",
    responses((status = 200, description = "Queue sizes", body = PendingCounts))
)]
pub async fn pending_counts(principal: Principal, data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(data.messaging.pending_counts(&principal).await?))
}

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

#[utoipa::path(get, path = "/api/v1/categories", responses((status = 200, description = "Categories", body = [Category])))]
pub async fn list_categories(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(data.repo.list_categories().await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/categories",
    request_body = NewCategory,
    responses(
        (status = 201, description = "Category created", body = Category),
        (status = 403, description = "Admins only", body = ApiErrorBody),
        (status = 409, description = "Slug taken", body = ApiErrorBody)
    )
)]
pub async fn create_category(
    principal: Principal,
    data: web::Data<AppState>,
    payload: web::Json<NewCategory>,
) -> Result<HttpResponse, AppError> {
    ensure_admin(&principal)?;
    check_slug(&payload.slug, &payload.title)?;
    let category = data.repo.create_category(payload.into_inner()).await?;
    tracing::info!(category_id = category.id, actor = principal.id, "category created");
    Ok(HttpResponse::Created().json(category))
}

#[utoipa::path(
    get,
    path = "/api/v1/categories/{id}/subcategories",
    params(("id" = Id, Path, description = "Category id")),
    responses((status = 200, description = "Subcategories", body = [Subcategory]))
)]
pub async fn list_subcategories(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, AppError> {
    let category = data.repo.get_category(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(data.repo.list_subcategories(category.id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/categories/{id}/subcategories",
    params(("id" = Id, Path, description = "Category id")),
    request_body = NewSubcategory,
    responses(
        (status = 201, description = "Subcategory created", body = Subcategory),
        (status = 409, description = "Slug taken", body = ApiErrorBody)
    )
)]
pub async fn create_subcategory(
    principal: Principal,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewSubcategory>,
) -> Result<HttpResponse, AppError> {
    ensure_admin(&principal)?;
    check_slug(&payload.slug, &payload.title)?;
    let sub = data.repo.create_subcategory(path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(sub))
}

#[utoipa::path(get, path = "/api/v1/servers", responses((status = 200, description = "Servers", body = [Server])))]
pub async fn list_servers(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(data.repo.list_servers().await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/servers",
    request_body = NewServer,
    responses(
        (status = 201, description = "Server created", body = Server),
        (status = 409, description = "Slug taken", body = ApiErrorBody)
    )
)]
pub async fn create_server(
    principal: Principal,
    data: web::Data<AppState>,
    payload: web::Json<NewServer>,
) -> Result<HttpResponse, AppError> {
    ensure_admin(&principal)?;
    check_slug(&payload.slug, &payload.title)?;
    let server = data.repo.create_server(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(server))
}

#[utoipa::path(
    patch,
    path = "/api/v1/admin/users/{id}",
    params(("id" = Id, Path, description = "User id")),
    request_body = UserPatch,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 400, description = "Cannot ban or demote yourself", body = ApiErrorBody),
        (status = 403, description = "Admins only", body = ApiErrorBody)
    )
)]
pub async fn admin_update_user(
    principal: Principal,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UserPatch>,
) -> Result<HttpResponse, AppError> {
    ensure_admin(&principal)?;
    let user_id = path.into_inner();
    let patch = payload.into_inner();
    if user_id == principal.id {
        if patch.is_banned == Some(true) {
            return Err(AppError::invalid("is_banned", "cannot ban yourself"));
        }
        if patch.role.is_some_and(|r| r != Role::Admin) {
            return Err(AppError::invalid("role", "cannot demote yourself"));
        }
    }
    let user = data.repo.update_user(user_id, patch).await?;
    tracing::info!(user_id, actor = principal.id, role = user.role.as_str(), banned = user.is_banned, "user updated");
    Ok(HttpResponse::Ok().json(user))
}
