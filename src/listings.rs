//! Listing lifecycle: submission, moderation, edits, sale and removal.
//!
//! Checks run in a fixed order on every mutation: ban, authorization,
//! input validation, then state rules. Each committed change is a single
//! repository update followed by a best-effort invalidation signal.

use std::sync::Arc;

use serde_json::json;

use crate::authz::{self, Principal};
use crate::error::{AppError, FieldErrors};
use crate::models::*;
use crate::notify::{signal, InvalidationSink, Topic};
use crate::repo::{Repo, RepoError};

pub const TITLE_MAX: usize = 120;
pub const DESCRIPTION_MAX: usize = 5000;
pub const IMAGES_MAX: usize = 10;
pub const PAGE_MAX: i64 = 100;

fn is_http_url(s: &str) -> bool {
    let rest = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"));
    rest.is_some_and(|r| !r.is_empty() && !r.chars().any(char::is_whitespace))
}

fn check_text(errs: &mut FieldErrors, field: &str, value: &str, max: usize) {
    let v = value.trim();
    if v.is_empty() {
        errs.push(field, "must not be empty");
    } else if v.chars().count() > max {
        errs.push(field, &format!("must be at most {max} characters"));
    }
}

/// Input rules that need no stored data.
fn validate_draft_fields(draft: &ListingDraft) -> Result<(), AppError> {
    let mut errs = FieldErrors::new();
    check_text(&mut errs, "title", &draft.title, TITLE_MAX);
    check_text(&mut errs, "description", &draft.description, DESCRIPTION_MAX);
    errs.check(draft.price > 0, "price", "must be greater than zero");
    errs.check(draft.images.len() <= IMAGES_MAX, "images", &format!("at most {IMAGES_MAX} images"));
    for (i, url) in draft.images.iter().enumerate() {
        if !is_http_url(url) {
            errs.push(&format!("images[{i}]"), "must be an http(s) URL");
        }
    }
    for (field, value) in draft.metadata.required_fields() {
        errs.check(!value.trim().is_empty(), field, "is required");
    }
    if let Some(contacts) = draft.metadata.contacts() {
        errs.check(contacts.has_channel(), "metadata.contacts", "at least one of discord, telegram, phone");
    }
    errs.finish()
}

/// Rules that depend on the category the draft is filed under.
fn validate_for_category(draft: &ListingDraft, category: &Category) -> Result<(), AppError> {
    let mut errs = FieldErrors::new();
    if draft.metadata.kind() != category.kind {
        errs.push(
            "metadata.category",
            &format!("expected '{}' metadata for this category", category.kind),
        );
    }
    if category.kind.requires_images() {
        errs.check(!draft.images.is_empty(), "images", "at least one image is required");
    }
    if category.kind.requires_contacts() {
        errs.check(draft.metadata.contacts().is_some(), "metadata.contacts", "contacts are required");
    }
    errs.finish()
}

fn validate_content_patch(patch: &ContentPatch) -> Result<(), AppError> {
    if patch.is_empty() {
        return Err(AppError::invalid("patch", "nothing to update"));
    }
    let mut errs = FieldErrors::new();
    if let Some(t) = &patch.title {
        check_text(&mut errs, "title", t, TITLE_MAX);
    }
    if let Some(d) = &patch.description {
        check_text(&mut errs, "description", d, DESCRIPTION_MAX);
    }
    if let Some(p) = patch.price {
        errs.check(p > 0, "price", "must be greater than zero");
    }
    errs.finish()
}

fn paged(mut filter: ListingFilter) -> ListingFilter {
    filter.limit = filter.limit.map(|l| l.clamp(1, PAGE_MAX));
    filter.offset = filter.offset.map(|o| o.max(0));
    filter
}

#[derive(Clone)]
pub struct ListingService {
    repo: Arc<dyn Repo>,
    sink: Arc<dyn InvalidationSink>,
}

impl ListingService {
    pub fn new(repo: Arc<dyn Repo>, sink: Arc<dyn InvalidationSink>) -> Self {
        Self { repo, sink }
    }

    async fn load(&self, id: Id) -> Result<Listing, AppError> {
        Ok(self.repo.get_listing(id).await?)
    }

    fn changed(&self, listing: &Listing, topics: &[Topic]) {
        signal(
            self.sink.as_ref(),
            topics,
            json!({ "listing_id": listing.id, "status": listing.status }),
        );
    }

    pub async fn create_listing(&self, principal: &Principal, draft: ListingDraft) -> Result<Listing, AppError> {
        authz::ensure_active(principal)?;
        validate_draft_fields(&draft)?;

        let category = self.repo.get_category(draft.category_id).await.map_err(|e| AppError::from(e).into_reference())?;
        self.repo.get_server(draft.server_id).await.map_err(|e| AppError::from(e).into_reference())?;
        if let Some(sub_id) = draft.subcategory_id {
            let sub = self.repo.get_subcategory(sub_id).await.map_err(|e| AppError::from(e).into_reference())?;
            if sub.category_id != category.id {
                return Err(AppError::invalid("subcategory_id", "does not belong to the category"));
            }
        }
        validate_for_category(&draft, &category)?;

        let listing = self
            .repo
            .insert_listing(NewListing::from_draft(principal.id, draft))
            .await
            .map_err(|e| AppError::from(e).into_reference())?;

        metrics::increment_counter!("bazaar_listings_created_total");
        tracing::info!(listing_id = listing.id, actor = principal.id, category = %category.kind, "listing submitted");
        self.changed(&listing, &[Topic::PendingListings]);
        Ok(listing)
    }

    pub async fn decide_moderation(
        &self,
        principal: &Principal,
        listing_id: Id,
        decision: Decision,
        note: Option<String>,
    ) -> Result<Listing, AppError> {
        authz::ensure_active(principal)?;
        if !authz::can_moderate(principal) {
            return Err(AppError::forbidden("moderate listings"));
        }
        let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if decision == Decision::Rejected && note.is_none() {
            return Err(AppError::invalid("note", "a reason is required when rejecting"));
        }

        let current = self.load(listing_id).await?;
        if current.status == ListingStatus::Sold {
            return Err(AppError::invalid("status", "a sold listing cannot be re-moderated"));
        }

        let status = ListingStatus::from(decision);
        let patch = ListingPatch::Moderation { status, moderator_id: principal.id, note };
        let listing = match self.repo.update_listing(listing_id, patch).await {
            Ok(l) => l,
            Err(RepoError::Conflict(_)) => {
                return Err(AppError::invalid("status", "a sold listing cannot be re-moderated"))
            }
            Err(e) => return Err(e.into()),
        };

        metrics::increment_counter!("bazaar_moderation_decisions_total", "decision" => status.as_str());
        tracing::info!(listing_id, actor = principal.id, status = %status, "moderation decision");
        self.changed(&listing, &[Topic::PendingListings, Topic::Catalog, Topic::Listing(listing_id)]);
        Ok(listing)
    }

    pub async fn update_content(&self, principal: &Principal, listing_id: Id, patch: ContentPatch) -> Result<Listing, AppError> {
        authz::ensure_active(principal)?;
        let current = self.load(listing_id).await?;
        if !authz::can_edit_content(principal, &current) {
            return Err(AppError::forbidden("edit this listing"));
        }
        validate_content_patch(&patch)?;

        let patch = ContentPatch {
            title: patch.title.map(|t| t.trim().to_string()),
            description: patch.description.map(|d| d.trim().to_string()),
            price: patch.price,
        };
        let listing = self.repo.update_listing(listing_id, ListingPatch::Content(patch)).await?;
        tracing::info!(listing_id, actor = principal.id, "listing content edited");
        self.changed(&listing, &[Topic::Catalog, Topic::Listing(listing_id)]);
        Ok(listing)
    }

    /// Not gated by status. Re-sending the current price is a successful no-op.
    pub async fn update_price(&self, principal: &Principal, listing_id: Id, price: i64) -> Result<Listing, AppError> {
        authz::ensure_active(principal)?;
        let current = self.load(listing_id).await?;
        if !authz::can_update_price(principal, &current) {
            return Err(AppError::forbidden("change the price of this listing"));
        }
        if price <= 0 {
            return Err(AppError::invalid("price", "must be greater than zero"));
        }
        if price == current.price {
            return Ok(current);
        }

        let listing = self.repo.update_listing(listing_id, ListingPatch::Price(price)).await?;
        tracing::info!(listing_id, actor = principal.id, price, "price updated");
        self.changed(&listing, &[Topic::Catalog, Topic::Listing(listing_id)]);
        Ok(listing)
    }

    pub async fn mark_sold(&self, principal: &Principal, listing_id: Id) -> Result<Listing, AppError> {
        authz::ensure_active(principal)?;
        let current = self.load(listing_id).await?;
        if !authz::can_mark_sold(principal, &current) {
            return Err(AppError::forbidden("mark this listing sold"));
        }
        if current.status != ListingStatus::Approved {
            return Err(AppError::invalid("status", "only approved listings can be marked sold"));
        }

        let listing = match self.repo.update_listing(listing_id, ListingPatch::MarkSold).await {
            Ok(l) => l,
            Err(RepoError::Conflict(_)) => {
                return Err(AppError::invalid("status", "only approved listings can be marked sold"))
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(listing_id, actor = principal.id, "listing sold");
        self.changed(&listing, &[Topic::Catalog, Topic::Listing(listing_id)]);
        Ok(listing)
    }

    /// Permanent; favorites of the listing are removed with it.
    pub async fn delete_listing(&self, principal: &Principal, listing_id: Id) -> Result<(), AppError> {
        authz::ensure_active(principal)?;
        let current = self.load(listing_id).await?;
        if !authz::can_delete_listing(principal, &current) {
            return Err(AppError::forbidden("delete this listing"));
        }

        self.repo.delete_listing(listing_id).await?;
        tracing::info!(listing_id, actor = principal.id, "listing deleted");
        self.changed(&current, &[Topic::PendingListings, Topic::Catalog, Topic::Listing(listing_id)]);
        Ok(())
    }

    pub async fn get_listing(&self, principal: Option<&Principal>, listing_id: Id) -> Result<Listing, AppError> {
        let listing = self.load(listing_id).await?;
        if !authz::can_view_listing(principal, &listing) {
            return Err(AppError::NotFound { entity: "listing", id: listing_id });
        }
        Ok(listing)
    }

    /// Moderation queue, oldest submission first.
    pub async fn list_pending(&self, principal: &Principal, filter: ListingFilter) -> Result<Vec<Listing>, AppError> {
        if !authz::can_moderate(principal) {
            return Err(AppError::forbidden("view the moderation queue"));
        }
        let filter = paged(ListingFilter {
            status: Some(ListingStatus::Pending),
            owner_user_id: None,
            oldest_first: true,
            ..filter
        });
        Ok(self.repo.list_listings(&filter).await?)
    }

    /// Public catalog: approved listings, newest first.
    pub async fn list_catalog(&self, filter: ListingFilter) -> Result<Vec<Listing>, AppError> {
        let filter = paged(ListingFilter {
            status: Some(ListingStatus::Approved),
            owner_user_id: None,
            oldest_first: false,
            ..filter
        });
        Ok(self.repo.list_listings(&filter).await?)
    }

    pub async fn list_mine(&self, principal: &Principal) -> Result<Vec<Listing>, AppError> {
        let filter = ListingFilter { owner_user_id: Some(principal.id), ..ListingFilter::default() };
        Ok(self.repo.list_listings(&filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fish_draft() -> ListingDraft {
        ListingDraft {
            category_id: 1,
            subcategory_id: None,
            server_id: 2,
            title: "Pike".into(),
            description: "Caught this morning".into(),
            price: 300,
            images: vec![],
            metadata: ListingMetadata::Fish(FishDetails {
                contacts: None,
                species: "pike".into(),
                weight_kg: Some(4.2),
                location: None,
            }),
        }
    }

    fn category(kind: CategoryKind) -> Category {
        Category { id: 1, slug: kind.as_str().into(), title: "x".into(), kind }
    }

    fn field_names(e: AppError) -> Vec<String> {
        match e {
            AppError::Validation(f) => f.into_iter().map(|f| f.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn urls_must_be_http() {
        assert!(is_http_url("https://cdn.example/a.png"));
        assert!(is_http_url("http://x"));
        assert!(!is_http_url("ftp://x"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("https://a b"));
    }

    #[test]
    fn draft_field_errors_are_collected() {
        let mut d = fish_draft();
        d.title = "  ".into();
        d.price = 0;
        d.images = vec!["file:///etc/passwd".into()];
        let fields = field_names(validate_draft_fields(&d).unwrap_err());
        assert_eq!(fields, vec!["title", "price", "images[0]"]);
    }

    #[test]
    fn cars_need_images_and_contacts() {
        let mut d = fish_draft();
        d.metadata = ListingMetadata::Cars(CarDetails {
            contacts: None,
            brand: "Lada".into(),
            model: "Niva".into(),
            year: None,
            mileage_km: None,
            transmission: None,
        });
        let fields = field_names(validate_for_category(&d, &category(CategoryKind::Cars)).unwrap_err());
        assert_eq!(fields, vec!["images", "metadata.contacts"]);
    }

    #[test]
    fn metadata_must_match_category() {
        let fields = field_names(validate_for_category(&fish_draft(), &category(CategoryKind::Treasures)).unwrap_err());
        assert_eq!(fields, vec!["metadata.category"]);
        assert!(validate_for_category(&fish_draft(), &category(CategoryKind::Fish)).is_ok());
    }

    #[test]
    fn empty_content_patch_rejected() {
        assert!(validate_content_patch(&ContentPatch::default()).is_err());
        let p = ContentPatch { price: Some(-1), ..Default::default() };
        assert_eq!(field_names(validate_content_patch(&p).unwrap_err()), vec!["price"]);
    }
}
