use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::ValidationError;
use crate::limits::*;
use crate::model::Currency;

/// Booking rules a host sets on a listing. Owned elsewhere; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTerms {
    pub price_per_night: Decimal,
    pub currency: Currency,
    /// Minimum number of nights per booking.
    pub minimum_stay: u32,
    /// Guests may cancel up to this many days before check-in.
    pub cancellation_days_before: u32,
}

impl ListingTerms {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.price_per_night < Decimal::new(1, 2) {
            return Err(ValidationError::InvalidTerms("price per night below 0.01"));
        }
        if self.minimum_stay == 0 || self.minimum_stay > MAX_MINIMUM_STAY {
            return Err(ValidationError::InvalidTerms("minimum stay out of range"));
        }
        if self.cancellation_days_before > MAX_CANCELLATION_DAYS {
            return Err(ValidationError::InvalidTerms("cancellation lead time out of range"));
        }
        Ok(())
    }
}

/// Where the engine looks up listing terms.
#[async_trait]
pub trait ListingDirectory: Send + Sync {
    async fn get_listing(&self, id: Ulid) -> Option<ListingTerms>;
}

#[derive(Debug, thiserror::Error)]
pub enum ListingsFileError {
    #[error("reading listings file: {0}")]
    Io(#[from] io::Error),
    #[error("parsing listings file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("listing {id}: {source}")]
    Invalid {
        id: Ulid,
        #[source]
        source: ValidationError,
    },
}

#[derive(Deserialize)]
struct ListingEntry {
    id: Ulid,
    price_per_night: Decimal,
    currency: Currency,
    minimum_stay: u32,
    cancellation_days_before: u32,
}

/// Listing terms kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryListings {
    listings: DashMap<Ulid, ListingTerms>,
}

impl InMemoryListings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of `{ id, price_per_night, currency, minimum_stay,
    /// cancellation_days_before }` objects. Prices are decimal strings.
    pub fn from_json_reader(reader: impl Read) -> Result<Self, ListingsFileError> {
        let entries: Vec<ListingEntry> = serde_json::from_reader(reader)?;
        let listings = Self::new();
        for e in entries {
            let terms = ListingTerms {
                price_per_night: e.price_per_night,
                currency: e.currency,
                minimum_stay: e.minimum_stay,
                cancellation_days_before: e.cancellation_days_before,
            };
            listings
                .upsert(e.id, terms)
                .map_err(|source| ListingsFileError::Invalid { id: e.id, source })?;
        }
        Ok(listings)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ListingsFileError> {
        Self::from_json_reader(BufReader::new(File::open(path)?))
    }

    pub fn upsert(&self, id: Ulid, terms: ListingTerms) -> Result<(), ValidationError> {
        terms.validate()?;
        self.listings.insert(id, terms);
        Ok(())
    }

    pub fn remove(&self, id: &Ulid) -> Option<ListingTerms> {
        self.listings.remove(id).map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

#[async_trait]
impl ListingDirectory for InMemoryListings {
    async fn get_listing(&self, id: Ulid) -> Option<ListingTerms> {
        self.listings.get(&id).map(|e| e.value().clone())
    }
}
