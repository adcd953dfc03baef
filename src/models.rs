use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;

pub type Id = i64;

// ---------------------------------------------------------------------------
// Users & reference data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub role: Role,
    pub is_banned: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: Id,
    pub username: String,
    pub role: Role,
}

/// Admin-side change of a user's standing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UserPatch {
    pub role: Option<Role>,
    pub is_banned: Option<bool>,
}

/// Marketplace sections. Each kind carries its own metadata shape and
/// submission rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    Cars,
    RealEstate,
    Fish,
    Treasures,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Cars => "cars",
            CategoryKind::RealEstate => "real_estate",
            CategoryKind::Fish => "fish",
            CategoryKind::Treasures => "treasures",
        }
    }

    /// Buyers must be able to reach the seller outside the site.
    pub fn requires_contacts(&self) -> bool {
        matches!(self, CategoryKind::Cars | CategoryKind::RealEstate)
    }

    pub fn requires_images(&self) -> bool {
        matches!(self, CategoryKind::Cars | CategoryKind::RealEstate)
    }
}

impl fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cars" => Ok(CategoryKind::Cars),
            "real_estate" => Ok(CategoryKind::RealEstate),
            "fish" => Ok(CategoryKind::Fish),
            "treasures" => Ok(CategoryKind::Treasures),
            other => Err(format!("unknown category kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Category {
    pub id: Id,
    pub slug: String,
    pub title: String,
    pub kind: CategoryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCategory {
    pub slug: String,
    pub title: String,
    pub kind: CategoryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Subcategory {
    pub id: Id,
    pub category_id: Id,
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewSubcategory {
    pub slug: String,
    pub title: String,
}

/// Game server a listing is traded on.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Server {
    pub id: Id,
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewServer {
    pub slug: String,
    pub title: String,
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Pending,
    Approved,
    Rejected,
    Sold,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Approved => "approved",
            ListingStatus::Rejected => "rejected",
            ListingStatus::Sold => "sold",
        }
    }

    /// Visible in the public catalog and to anonymous readers.
    pub fn is_public(&self) -> bool {
        matches!(self, ListingStatus::Approved | ListingStatus::Sold)
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ListingStatus::Pending),
            "approved" => Ok(ListingStatus::Approved),
            "rejected" => Ok(ListingStatus::Rejected),
            "sold" => Ok(ListingStatus::Sold),
            other => Err(format!("unknown listing status '{other}'")),
        }
    }
}

/// Outcome a moderator may record. `pending` and `sold` are not decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl From<Decision> for ListingStatus {
    fn from(d: Decision) -> Self {
        match d {
            Decision::Approved => ListingStatus::Approved,
            Decision::Rejected => ListingStatus::Rejected,
        }
    }
}

/// Out-of-band ways to reach a seller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Contacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Contacts {
    pub fn has_channel(&self) -> bool {
        [&self.discord, &self.telegram, &self.phone]
            .iter()
            .any(|c| c.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarDetails {
    #[serde(default)]
    pub contacts: Option<Contacts>,
    pub brand: String,
    pub model: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub mileage_km: Option<i64>,
    #[serde(default)]
    pub transmission: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDetails {
    #[serde(default)]
    pub contacts: Option<Contacts>,
    pub property_type: String,
    pub address: String,
    #[serde(default)]
    pub area_sqm: Option<f64>,
    #[serde(default)]
    pub rooms: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FishDetails {
    #[serde(default)]
    pub contacts: Option<Contacts>,
    pub species: String,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreasureDetails {
    #[serde(default)]
    pub contacts: Option<Contacts>,
    #[serde(default)]
    pub rarity: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Category specific attributes, tagged by the category kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ListingMetadata {
    Cars(CarDetails),
    RealEstate(PropertyDetails),
    Fish(FishDetails),
    Treasures(TreasureDetails),
}

impl ListingMetadata {
    pub fn kind(&self) -> CategoryKind {
        match self {
            ListingMetadata::Cars(_) => CategoryKind::Cars,
            ListingMetadata::RealEstate(_) => CategoryKind::RealEstate,
            ListingMetadata::Fish(_) => CategoryKind::Fish,
            ListingMetadata::Treasures(_) => CategoryKind::Treasures,
        }
    }

    pub fn contacts(&self) -> Option<&Contacts> {
        match self {
            ListingMetadata::Cars(d) => d.contacts.as_ref(),
            ListingMetadata::RealEstate(d) => d.contacts.as_ref(),
            ListingMetadata::Fish(d) => d.contacts.as_ref(),
            ListingMetadata::Treasures(d) => d.contacts.as_ref(),
        }
    }

    /// Required free-text attributes of the variant, as `(field, value)`.
    pub fn required_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            ListingMetadata::Cars(d) => vec![("metadata.brand", &d.brand), ("metadata.model", &d.model)],
            ListingMetadata::RealEstate(d) => vec![
                ("metadata.property_type", &d.property_type),
                ("metadata.address", &d.address),
            ],
            ListingMetadata::Fish(d) => vec![("metadata.species", &d.species)],
            ListingMetadata::Treasures(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Listing {
    pub id: Id,
    pub owner_user_id: Id,
    pub category_id: Id,
    pub subcategory_id: Option<Id>,
    pub server_id: Id,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub images: Vec<String>,
    #[schema(value_type = Object)]
    pub metadata: ListingMetadata,
    pub status: ListingStatus,
    pub moderator_id: Option<Id>,
    pub moderator_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Submission produced by the client wizards.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListingDraft {
    pub category_id: Id,
    #[serde(default)]
    pub subcategory_id: Option<Id>,
    pub server_id: Id,
    pub title: String,
    pub description: String,
    pub price: i64,
    #[serde(default)]
    pub images: Vec<String>,
    #[schema(value_type = Object)]
    pub metadata: ListingMetadata,
}

/// Row handed to the repository. No status field: every new listing is pending.
#[derive(Debug, Clone)]
pub struct NewListing {
    pub owner_user_id: Id,
    pub category_id: Id,
    pub subcategory_id: Option<Id>,
    pub server_id: Id,
    pub title: String,
    pub description: String,
    pub price: i64,
    pub images: Vec<String>,
    pub metadata: ListingMetadata,
}

impl NewListing {
    pub fn from_draft(owner_user_id: Id, draft: ListingDraft) -> Self {
        Self {
            owner_user_id,
            category_id: draft.category_id,
            subcategory_id: draft.subcategory_id,
            server_id: draft.server_id,
            title: draft.title.trim().to_string(),
            description: draft.description.trim().to_string(),
            price: draft.price,
            images: draft.images,
            metadata: draft.metadata,
        }
    }
}

/// Moderator-only full edit. Category and server cannot be changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ContentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
}

impl ContentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.price.is_none()
    }
}

/// A single atomic change applied by the repository; every variant bumps
/// `updated_at`.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingPatch {
    Content(ContentPatch),
    Price(i64),
    /// Applied only when the listing is not sold.
    Moderation {
        status: ListingStatus,
        moderator_id: Id,
        note: Option<String>,
    },
    /// Applied only when the listing is approved.
    MarkSold,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingFilter {
    pub status: Option<ListingStatus>,
    pub category_id: Option<Id>,
    pub server_id: Option<Id>,
    #[serde(skip)]
    pub owner_user_id: Option<Id>,
    /// Queue order (oldest first) instead of catalog order.
    #[serde(skip)]
    pub oldest_first: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListingFilter {
    pub fn with_status(status: ListingStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn matches(&self, l: &Listing) -> bool {
        self.status.map_or(true, |s| l.status == s)
            && self.category_id.map_or(true, |c| l.category_id == c)
            && self.server_id.map_or(true, |s| l.server_id == s)
            && self.owner_user_id.map_or(true, |o| l.owner_user_id == o)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModerationRequest {
    pub decision: Decision,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PriceUpdate {
    pub price: i64,
}

// ---------------------------------------------------------------------------
// Favorites
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Favorite {
    pub user_id: Id,
    pub listing_id: Id,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversations & messages
// ---------------------------------------------------------------------------

/// Natural key of a conversation: unordered user pair plus optional listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub user_one: Id,
    pub user_two: Id,
    pub listing_id: Option<Id>,
}

impl ConversationKey {
    pub fn new(a: Id, b: Id, listing_id: Option<Id>) -> Self {
        let (user_one, user_two) = if a <= b { (a, b) } else { (b, a) };
        Self { user_one, user_two, listing_id }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Conversation {
    pub id: Id,
    /// Lower participant id.
    pub user_one: Id,
    /// Higher participant id.
    pub user_two: Id,
    pub listing_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.user_one, self.user_two, self.listing_id)
    }

    pub fn has_participant(&self, user_id: Id) -> bool {
        self.user_one == user_id || self.user_two == user_id
    }

    pub fn other_participant(&self, user_id: Id) -> Id {
        if self.user_one == user_id { self.user_two } else { self.user_one }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationRequest {
    pub other_user_id: Id,
    #[serde(default)]
    pub listing_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub other_user_id: Id,
    pub unread: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Message {
    pub id: Id,
    pub conversation_id: Id,
    pub sender_id: Id,
    pub content: String,
    pub is_moderated: bool,
    pub moderator_id: Option<Id>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Id,
    pub sender_id: Id,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageBody {
    pub content: String,
}

/// Compact listing reference used in moderation queues.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ListingRef {
    pub id: Id,
    pub title: String,
    pub status: ListingStatus,
}

impl From<&Listing> for ListingRef {
    fn from(l: &Listing) -> Self {
        Self { id: l.id, title: l.title.clone(), status: l.status }
    }
}

/// Unmoderated message joined with the context a moderator needs.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct PendingMessage {
    pub message: Message,
    pub sender: User,
    pub conversation: Conversation,
    pub listing: Option<ListingRef>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct PendingCounts {
    pub listings: i64,
    pub messages: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_is_unordered() {
        assert_eq!(ConversationKey::new(8, 7, Some(1)), ConversationKey::new(7, 8, Some(1)));
        assert_ne!(ConversationKey::new(7, 8, Some(1)), ConversationKey::new(7, 8, None));
    }

    #[test]
    fn metadata_is_tagged_by_category() {
        let m: ListingMetadata = serde_json::from_value(serde_json::json!({
            "category": "cars",
            "brand": "Lada",
            "model": "Niva",
            "contacts": {"telegram": "@seller"}
        }))
        .unwrap();
        assert_eq!(m.kind(), CategoryKind::Cars);
        assert!(m.contacts().unwrap().has_channel());
    }

    #[test]
    fn blank_contacts_have_no_channel() {
        let c = Contacts { discord: Some("  ".into()), telegram: None, phone: Some(String::new()) };
        assert!(!c.has_channel());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [ListingStatus::Pending, ListingStatus::Approved, ListingStatus::Rejected, ListingStatus::Sold] {
            assert_eq!(s.as_str().parse::<ListingStatus>().unwrap(), s);
        }
    }
}
