//! Read-only boundary to the accommodation catalog.
//!
//! The catalog owns listings and their supplier calendars. This core reads
//! them through [`CatalogService`] and never writes back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{AccommodationId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::money::Money;
use crate::pricing::CancellationPolicyTier;
use crate::stay::DateRange;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// What the core needs to know about a listing at booking time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccommodationSnapshot {
    pub id: AccommodationId,
    pub supplier_id: UserId,
    pub title: String,
    /// Only approved listings accept reservations.
    pub approved: bool,
    pub nightly_price: Money,
    pub max_guests: u32,
    pub min_nights: u32,
    pub max_nights: Option<u32>,
    pub cancellation_policy: CancellationPolicyTier,
    /// Connected payout account; enables split payments when present.
    pub payout_account: Option<String>,
}

/// Supplier-declared entry for a single date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarOverride {
    pub date: NaiveDate,
    pub available: bool,
    pub price_override: Option<Money>,
}

impl CalendarOverride {
    pub fn blocked(date: NaiveDate) -> Self {
        Self {
            date,
            available: false,
            price_override: None,
        }
    }

    pub fn priced(date: NaiveDate, price: Money) -> Self {
        Self {
            date,
            available: true,
            price_override: Some(price),
        }
    }
}

#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn accommodation(
        &self,
        id: AccommodationId,
    ) -> Result<Option<AccommodationSnapshot>, CatalogError>;

    /// Overrides for the nights of `range`, at most one per date.
    async fn calendar_overrides(
        &self,
        id: AccommodationId,
        range: &DateRange,
    ) -> Result<Vec<CalendarOverride>, CatalogError>;
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    listings: HashMap<AccommodationId, AccommodationSnapshot>,
    calendars: HashMap<AccommodationId, BTreeMap<NaiveDate, CalendarOverride>>,
}

/// Catalog held in memory, for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, snapshot: AccommodationSnapshot) {
        self.state
            .write()
            .await
            .listings
            .insert(snapshot.id, snapshot);
    }

    /// Sets the override for its date, replacing any previous one.
    pub async fn set_override(&self, id: AccommodationId, entry: CalendarOverride) {
        self.state
            .write()
            .await
            .calendars
            .entry(id)
            .or_default()
            .insert(entry.date, entry);
    }
}

#[async_trait]
impl CatalogService for InMemoryCatalog {
    async fn accommodation(
        &self,
        id: AccommodationId,
    ) -> Result<Option<AccommodationSnapshot>, CatalogError> {
        Ok(self.state.read().await.listings.get(&id).cloned())
    }

    async fn calendar_overrides(
        &self,
        id: AccommodationId,
        range: &DateRange,
    ) -> Result<Vec<CalendarOverride>, CatalogError> {
        let state = self.state.read().await;
        Ok(state
            .calendars
            .get(&id)
            .map(|calendar| {
                calendar
                    .range(range.check_in()..range.check_out())
                    .map(|(_, entry)| entry.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
