//! Listing creation and lookups

use std::sync::Arc;

use uuid::Uuid;

use super::{
    CreateListingRequest, Listing, ListingError, ListingStatus, ListingWithOwner, NewListing,
    MAX_LISTING_IMAGES,
};
use crate::profile::ProfileProvisioner;
use crate::session::SessionContext;
use crate::store::{ListingRepository, StoreError};

#[derive(Clone)]
pub struct ListingService {
    listings: Arc<dyn ListingRepository>,
    provisioner: ProfileProvisioner,
}

impl ListingService {
    pub fn new(listings: Arc<dyn ListingRepository>, provisioner: ProfileProvisioner) -> Self {
        Self {
            listings,
            provisioner,
        }
    }

    /// Publish a new listing owned by the caller
    pub async fn create(
        &self,
        session: &SessionContext,
        request: CreateListingRequest,
    ) -> Result<Listing, ListingError> {
        let title = request.title.trim().to_string();
        if title.is_empty() {
            return Err(ListingError::Validation("Title is required".to_string()));
        }
        let category = request.category.trim().to_string();
        if category.is_empty() {
            return Err(ListingError::Validation("Category is required".to_string()));
        }
        if !request.estimated_value.is_finite() || request.estimated_value <= 0.0 {
            return Err(ListingError::Validation(
                "Estimated value must be a positive number".to_string(),
            ));
        }

        let images: Vec<String> = request
            .images
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if images.is_empty() {
            return Err(ListingError::Validation(
                "At least one image is required".to_string(),
            ));
        }
        if images.len() > MAX_LISTING_IMAGES {
            return Err(ListingError::Validation(format!(
                "At most {} images per listing",
                MAX_LISTING_IMAGES
            )));
        }

        // Owners must have a profile before their listings show up with a name
        self.provisioner.ensure_profile(&session.identity).await?;

        let listing = self
            .listings
            .insert_listing(NewListing {
                owner_id: session.user_id(),
                title,
                description: request.description.trim().to_string(),
                condition: request.condition,
                category,
                estimated_value: request.estimated_value,
                images,
            })
            .await?;

        tracing::info!(
            listing_id = %listing.id,
            owner_id = %listing.owner_id,
            "Listing created"
        );
        Ok(listing)
    }

    /// Listing detail with its owner's summary
    pub async fn get(&self, id: Uuid) -> Result<ListingWithOwner, ListingError> {
        self.listings.get_listing(id).await.map_err(|e| match e {
            StoreError::NotFound(_) => ListingError::NotFound(id),
            other => other.into(),
        })
    }

    /// The caller's listings; only those still available when `available_only`
    pub async fn mine(
        &self,
        session: &SessionContext,
        available_only: bool,
    ) -> Result<Vec<Listing>, ListingError> {
        let status = available_only.then_some(ListingStatus::Available);
        Ok(self
            .listings
            .list_by_owner(session.user_id(), status)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::Condition;
    use crate::models::Identity;
    use crate::store::Store;

    fn session() -> SessionContext {
        SessionContext::new(
            Identity {
                id: Uuid::new_v4(),
                email: "ana@example.com".to_string(),
            },
            "jti",
        )
    }

    fn request(images: Vec<&str>) -> CreateListingRequest {
        CreateListingRequest {
            title: "  Red Chair ".to_string(),
            description: "Solid oak".to_string(),
            condition: Condition::LikeNew,
            category: "Home".to_string(),
            estimated_value: 40.0,
            images: images.into_iter().map(str::to_string).collect(),
        }
    }

    fn service(store: &Store) -> ListingService {
        ListingService::new(
            store.listings.clone(),
            ProfileProvisioner::new(store.profiles.clone()),
        )
    }

    #[tokio::test]
    async fn test_create_keeps_image_order_and_provisions_owner() {
        let store = Store::memory();
        let listings = service(&store);
        let ana = session();

        let images = vec!["https://cdn/3.png", "https://cdn/1.png", "https://cdn/2.png"];
        let created = listings.create(&ana, request(images.clone())).await.unwrap();
        assert_eq!(created.title, "Red Chair");

        let fetched = listings.get(created.id).await.unwrap();
        assert_eq!(fetched.listing.images, images);
        assert_eq!(fetched.listing.condition, Condition::LikeNew);
        assert!(fetched.owner.is_some());
        assert!(store.profiles.get_profile(ana.user_id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_validation() {
        let store = Store::memory();
        let listings = service(&store);
        let ana = session();

        assert!(matches!(
            listings.create(&ana, request(vec![])).await,
            Err(ListingError::Validation(_))
        ));
        assert!(matches!(
            listings
                .create(&ana, request(vec!["a", "b", "c", "d", "e"]))
                .await,
            Err(ListingError::Validation(_))
        ));

        let mut free = request(vec!["a"]);
        free.estimated_value = 0.0;
        assert!(matches!(
            listings.create(&ana, free).await,
            Err(ListingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_get_unknown_listing() {
        let store = Store::memory();
        let id = Uuid::new_v4();
        assert!(matches!(
            service(&store).get(id).await,
            Err(ListingError::NotFound(found)) if found == id
        ));
    }
}
