use crate::auth::Role;
use crate::error::{ApiErrorBody, FieldError};
use crate::models::{
    Category, CategoryKind, Contacts, ContentPatch, Conversation, ConversationRequest, ConversationSummary,
    Decision, Favorite, Listing, ListingDraft, ListingRef, ListingStatus, Message, MessageBody,
    ModerationRequest, NewCategory, NewServer, NewSubcategory, PendingCounts, PendingMessage, PriceUpdate,
    Server, Subcategory, User, UserPatch,
};
use crate::routes::{MeResponse, ReadResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::auth_me,
        crate::routes::list_listings,
        crate::routes::create_listing,
        crate::routes::list_my_listings,
        crate::routes::get_listing,
        crate::routes::update_listing_content,
        crate::routes::delete_listing,
        crate::routes::moderate_listing,
        crate::routes::update_listing_price,
        crate::routes::mark_listing_sold,
        crate::routes::add_favorite,
        crate::routes::remove_favorite,
        crate::routes::list_favorites,
        crate::routes::open_conversation,
        crate::routes::list_conversations,
        crate::routes::list_messages,
        crate::routes::send_message,
        crate::routes::mark_conversation_read,
        crate::routes::list_pending_messages,
        crate::routes::moderate_message,
        crate::routes::pending_counts,
        crate::routes::list_categories,
        crate::routes::create_category,
        crate::routes::list_subcategories,
        crate::routes::create_subcategory,
        crate::routes::list_servers,
        crate::routes::create_server,
        crate::routes::admin_update_user,
    ),
    components(schemas(
        Role, User, UserPatch, MeResponse, ReadResponse,
        Category, CategoryKind, NewCategory, Subcategory, NewSubcategory, Server, NewServer,
        Listing, ListingDraft, ListingStatus, ListingRef, Contacts, ContentPatch, Decision,
        ModerationRequest, PriceUpdate, Favorite,
        Conversation, ConversationRequest, ConversationSummary, Message, MessageBody,
        PendingMessage, PendingCounts,
        ApiErrorBody, FieldError,
    )),
    tags(
        (name = "listings", description = "Listing lifecycle and moderation"),
        (name = "messaging", description = "Conversations and message moderation"),
        (name = "reference", description = "Categories and servers"),
    )
)]
pub struct ApiDoc;
