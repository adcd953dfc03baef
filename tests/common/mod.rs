#![allow(dead_code)]

pub mod racing;

use std::sync::Arc;

use bazaar::auth::Role;
use bazaar::authz::Principal;
use bazaar::favorites::FavoriteService;
use bazaar::listings::ListingService;
use bazaar::messaging::MessagingService;
use bazaar::models::*;
use bazaar::notify::RecordingSink;
use bazaar::repo::inmem::InMemRepo;
use bazaar::repo::{ReferenceRepo, Repo, UserRepo};

pub const OWNER: Id = 7;
pub const BUYER: Id = 8;
pub const MODERATOR: Id = 3;
pub const ADMIN: Id = 1;
pub const BANNED: Id = 9;

/// Services over one fresh in-memory store. Category 1 is `fish`,
/// server 2 exists, category 3 is `cars`.
pub struct World {
    pub repo: Arc<InMemRepo>,
    pub sink: Arc<RecordingSink>,
    pub listings: ListingService,
    pub messaging: MessagingService,
    pub favorites: FavoriteService,
    pub fish: Category,
    pub server: Server,
    pub cars: Category,
}

pub async fn world() -> World {
    let repo = Arc::new(InMemRepo::ephemeral());
    let sink = Arc::new(RecordingSink::default());

    let fish = repo
        .create_category(NewCategory { slug: "fish".into(), title: "Fish".into(), kind: CategoryKind::Fish })
        .await
        .unwrap();
    let server = repo
        .create_server(NewServer { slug: "eu-1".into(), title: "EU 1".into() })
        .await
        .unwrap();
    let cars = repo
        .create_category(NewCategory { slug: "cars".into(), title: "Cars".into(), kind: CategoryKind::Cars })
        .await
        .unwrap();
    assert_eq!((fish.id, server.id, cars.id), (1, 2, 3));

    for (id, name, role) in [
        (OWNER, "owner", Role::User),
        (BUYER, "buyer", Role::User),
        (MODERATOR, "mod", Role::Moderator),
        (ADMIN, "admin", Role::Admin),
        (BANNED, "spammer", Role::User),
    ] {
        repo.insert_user(NewUser { id, username: name.into(), role }).await.unwrap();
    }
    repo.update_user(BANNED, UserPatch { role: None, is_banned: Some(true) }).await.unwrap();

    let dyn_repo: Arc<dyn Repo> = repo.clone();
    World {
        listings: ListingService::new(dyn_repo.clone(), sink.clone()),
        messaging: MessagingService::new(dyn_repo.clone(), sink.clone()),
        favorites: FavoriteService::new(dyn_repo, sink.clone()),
        repo,
        sink,
        fish,
        server,
        cars,
    }
}

impl World {
    pub async fn principal(&self, id: Id) -> Principal {
        Principal::from(&self.repo.get_user(id).await.unwrap())
    }

    /// Pending fish listing owned by `OWNER`.
    pub async fn pending_listing(&self) -> Listing {
        let owner = self.principal(OWNER).await;
        self.listings.create_listing(&owner, fish_draft(self.fish.id, self.server.id)).await.unwrap()
    }

    pub async fn approved_listing(&self) -> Listing {
        let l = self.pending_listing().await;
        let moderator = self.principal(MODERATOR).await;
        self.listings.decide_moderation(&moderator, l.id, Decision::Approved, None).await.unwrap()
    }
}

pub fn fish_draft(category_id: Id, server_id: Id) -> ListingDraft {
    ListingDraft {
        category_id,
        subcategory_id: None,
        server_id,
        title: "Golden carp".into(),
        description: "Fresh catch from the northern lake".into(),
        price: 150_000,
        images: vec![],
        metadata: ListingMetadata::Fish(FishDetails {
            contacts: None,
            species: "carp".into(),
            weight_kg: Some(3.5),
            location: Some("north lake".into()),
        }),
    }
}

pub fn car_draft(category_id: Id, server_id: Id) -> ListingDraft {
    ListingDraft {
        category_id,
        subcategory_id: None,
        server_id,
        title: "Lada Niva 4x4".into(),
        description: "One owner, garage kept".into(),
        price: 900_000,
        images: vec!["https://cdn.example/niva.jpg".into()],
        metadata: ListingMetadata::Cars(CarDetails {
            contacts: Some(Contacts { discord: None, telegram: Some("@niva".into()), phone: None }),
            brand: "Lada".into(),
            model: "Niva".into(),
            year: Some(2015),
            mileage_km: Some(120_000),
            transmission: Some("manual".into()),
        }),
    }
}
