//! Canonical address lookup for incoming visits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{GroundGameError, Result};
use crate::geocoder::{Geocoder, StreetAddress};
use crate::models::{Address, AddressId, Coordinates};
use crate::repository::CanvassRepository;

/// How the address of a visit was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressOrigin {
    /// The request referenced the address by id
    Referenced,
    /// An address exists at the corrected coordinates
    MatchedCoordinates,
    /// An address exists with the submitted street
    MatchedStreet,
    /// Nothing matched; the address is new and unsaved
    New,
}

#[derive(Debug, Clone)]
pub struct ResolvedAddress {
    pub address: Address,
    pub origin: AddressOrigin,
}

impl ResolvedAddress {
    /// Version to compare against on commit, `None` when the address is new.
    #[must_use]
    pub const fn expected_version(&self) -> Option<u32> {
        match self.origin {
            AddressOrigin::New => None,
            _ => Some(self.address.lock_version),
        }
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.origin == AddressOrigin::New
    }
}

pub struct AddressResolver {
    canvass: Arc<dyn CanvassRepository>,
    geocoder: Arc<dyn Geocoder>,
}

impl AddressResolver {
    pub fn new(canvass: Arc<dyn CanvassRepository>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { canvass, geocoder }
    }

    /// Reverse-geocode device coordinates. Any geocoder failure is fatal.
    pub async fn correct_coordinates(&self, submitted: Coordinates) -> Result<Coordinates> {
        let corrected = self.geocoder.reverse_geocode(submitted).await?;
        debug!(
            submitted_lat = submitted.latitude,
            submitted_lng = submitted.longitude,
            corrected_lat = corrected.latitude,
            corrected_lng = corrected.longitude,
            "Corrected visit coordinates"
        );
        Ok(corrected)
    }

    /// Find the address for already corrected coordinates.
    ///
    /// First match wins: referenced id, exact corrected coordinates, exact
    /// submitted street, otherwise a new unsaved address.
    pub async fn locate(
        &self,
        corrected: Coordinates,
        submitted_street: Option<&str>,
        referenced: Option<AddressId>,
        now: DateTime<Utc>,
    ) -> Result<ResolvedAddress> {
        if let Some(id) = referenced {
            let address = self
                .canvass
                .find_address(id)
                .await?
                .ok_or_else(|| GroundGameError::not_found("address", id))?;
            return Ok(ResolvedAddress {
                address,
                origin: AddressOrigin::Referenced,
            });
        }

        if let Some(address) = self.canvass.find_address_at(corrected).await? {
            return Ok(ResolvedAddress {
                address,
                origin: AddressOrigin::MatchedCoordinates,
            });
        }

        if let Some(street) = submitted_street {
            if let Some(address) = self.canvass.find_address_by_street(street).await? {
                return Ok(ResolvedAddress {
                    address,
                    origin: AddressOrigin::MatchedStreet,
                });
            }
        }

        Ok(ResolvedAddress {
            address: Address::new(corrected, submitted_street.map(str::to_string), now),
            origin: AddressOrigin::New,
        })
    }

    /// Reverse-geocode and locate in one step.
    pub async fn resolve(
        &self,
        submitted: Coordinates,
        submitted_street: Option<&str>,
        referenced: Option<AddressId>,
        now: DateTime<Utc>,
    ) -> Result<(Coordinates, ResolvedAddress)> {
        let corrected = self.correct_coordinates(submitted).await?;
        let resolved = self.locate(corrected, submitted_street, referenced, now).await?;
        Ok((corrected, resolved))
    }

    /// Fill the USPS-verified fields of `address` from the postal authority.
    ///
    /// Returns whether verification succeeded. A miss leaves the address as is.
    pub async fn verify(&self, address: &mut Address) -> bool {
        let Some(street_1) = address.street_1.clone() else {
            return false;
        };
        let request = StreetAddress {
            street_1,
            street_2: address.street_2.clone(),
            city: address.city.clone(),
            state_code: address.state_code.clone(),
            zip_code: address.zip_code.clone(),
        };

        match self.geocoder.forward_verify(&request).await {
            Ok(verified) => {
                address.usps_verified_street_1 = Some(verified.verified_street_1);
                address.usps_verified_street_2 = Some(verified.verified_street_2);
                address.usps_verified_city = Some(verified.verified_city);
                address.usps_verified_state = Some(verified.verified_state);
                address.usps_verified_zip = Some(verified.verified_zip);
                true
            }
            Err(err) => {
                warn!(address_id = %address.id, error = %err, "Address verification failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocoder::{GeocodeError, MockGeocoder, VerifiedAddress};
    use crate::repository::InMemoryRepository;

    fn resolver(repo: &InMemoryRepository, geocoder: MockGeocoder) -> AddressResolver {
        AddressResolver::new(Arc::new(repo.clone()), Arc::new(geocoder))
    }

    fn snapping_geocoder() -> MockGeocoder {
        let mut geocoder = MockGeocoder::new();
        geocoder
            .expect_reverse_geocode()
            .returning(|_| Ok(Coordinates::new(40.771913, -73.9673735)));
        geocoder
    }

    #[tokio::test]
    async fn test_matches_existing_address_on_corrected_coordinates() {
        let repo = InMemoryRepository::new();
        let existing = Address::new(Coordinates::new(40.771913, -73.9673735), None, Utc::now());
        repo.insert_address(existing.clone()).await;

        let (corrected, resolved) = resolver(&repo, snapping_geocoder())
            .resolve(Coordinates::new(40.77, -73.96), Some("5th Avenue"), None, Utc::now())
            .await
            .unwrap();

        assert_eq!(corrected, existing.coordinates());
        assert_eq!(resolved.origin, AddressOrigin::MatchedCoordinates);
        assert_eq!(resolved.address.id, existing.id);
        assert_eq!(resolved.expected_version(), Some(0));
    }

    #[tokio::test]
    async fn test_falls_back_to_street_then_new() {
        let repo = InMemoryRepository::new();
        let on_street = Address::new(Coordinates::new(1.0, 1.0), Some("5th Avenue".into()), Utc::now());
        repo.insert_address(on_street.clone()).await;
        let resolver = resolver(&repo, snapping_geocoder());

        let (_, by_street) = resolver
            .resolve(Coordinates::new(40.77, -73.96), Some("5th Avenue"), None, Utc::now())
            .await
            .unwrap();
        assert_eq!(by_street.origin, AddressOrigin::MatchedStreet);
        assert_eq!(by_street.address.id, on_street.id);

        let (corrected, fresh) = resolver
            .resolve(Coordinates::new(40.77, -73.96), Some("Broadway"), None, Utc::now())
            .await
            .unwrap();
        assert!(fresh.is_new());
        assert_eq!(fresh.expected_version(), None);
        assert_eq!(fresh.address.coordinates(), corrected);
        assert_eq!(fresh.address.street_1.as_deref(), Some("Broadway"));
    }

    #[tokio::test]
    async fn test_missing_referenced_address_is_not_found() {
        let repo = InMemoryRepository::new();
        let result = resolver(&repo, snapping_geocoder())
            .resolve(Coordinates::new(1.0, 1.0), None, Some(AddressId::new()), Utc::now())
            .await;
        assert!(matches!(result, Err(GroundGameError::RecordNotFound { kind: "address", .. })));
    }

    #[tokio::test]
    async fn test_reverse_geocode_failure_is_fatal() {
        let repo = InMemoryRepository::new();
        let mut geocoder = MockGeocoder::new();
        geocoder
            .expect_reverse_geocode()
            .returning(|_| Err(GeocodeError::Provider("quota exceeded".into())));

        let result = resolver(&repo, geocoder)
            .resolve(Coordinates::new(1.0, 1.0), None, None, Utc::now())
            .await;
        match result {
            Err(err) => assert_eq!(err.error_id(), "GEOCODE_UNAVAILABLE"),
            Ok(_) => panic!("expected geocoder failure"),
        }
    }

    #[tokio::test]
    async fn test_verify_fills_usps_fields() {
        let repo = InMemoryRepository::new();
        let mut geocoder = MockGeocoder::new();
        geocoder.expect_forward_verify().times(1).returning(|_| {
            Ok(VerifiedAddress {
                verified_street_1: "5 AVENUE A".into(),
                verified_street_2: String::new(),
                verified_city: "NEW YORK".into(),
                verified_state: "NY".into(),
                verified_zip: "10009-7944".into(),
            })
        });
        let resolver = resolver(&repo, geocoder);

        let mut address = Address::new(Coordinates::new(1.0, 1.0), Some("5th Avenue".into()), Utc::now());
        assert!(resolver.verify(&mut address).await);
        assert_eq!(address.usps_verified_street_1.as_deref(), Some("5 AVENUE A"));
        assert_eq!(address.usps_verified_street_2.as_deref(), Some(""));
        assert_eq!(address.usps_verified_zip.as_deref(), Some("10009-7944"));

        let mut streetless = Address::new(Coordinates::new(1.0, 1.0), None, Utc::now());
        assert!(!resolver.verify(&mut streetless).await);
    }
}
