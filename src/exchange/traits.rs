//! Venue-agnostic adapter trait consumed by the XEMM engine.
//!
//! The engine never talks to an exchange directly. Each venue is wrapped in
//! a `VenueAdapter` and resolved once at startup through a `VenueRegistry`:
//! - Depth-aware pricing (`executable_price`) and mid price
//! - Free balances and budget adjustment of order candidates
//! - Order placement, cancellation and active-order snapshots

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::VenueResult;
use super::types::{OrderCandidate, OrderId, OrderSide, OrderType, RestingOrder, TradingPair};

/// Venue identifier, e.g. `binance_us` or `kraken`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueId(String);

impl VenueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for venues the engine can quote and hedge on.
///
/// Calls are awaited one at a time by the engine. Implementations must be
/// shareable across tasks because fill notifications are produced elsewhere.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Returns the venue identifier.
    fn venue_id(&self) -> &VenueId;

    /// Depth-weighted price to execute `amount` on the given side.
    ///
    /// `is_buy = true` walks the asks, `false` walks the bids. Fails with
    /// `InsufficientDepth` when the book cannot absorb `amount`.
    async fn executable_price(
        &self,
        pair: &TradingPair,
        is_buy: bool,
        amount: Decimal,
    ) -> VenueResult<Decimal>;

    /// Midpoint between best bid and best ask.
    async fn mid_price(&self, pair: &TradingPair) -> VenueResult<Decimal>;

    /// Free (non-reserved) balance of an asset.
    async fn available_balance(&self, asset: &str) -> VenueResult<Decimal>;

    /// Clamp a proposed order to the available budget.
    ///
    /// With `all_or_none = false` the amount is reduced to what the budget
    /// covers; it may come back as zero.
    async fn adjust_candidate(
        &self,
        candidate: OrderCandidate,
        all_or_none: bool,
    ) -> VenueResult<OrderCandidate>;

    /// Submit an order and return its id.
    async fn place_order(
        &self,
        pair: &TradingPair,
        side: OrderSide,
        amount: Decimal,
        order_type: OrderType,
        price: Decimal,
    ) -> VenueResult<OrderId>;

    /// Request cancellation of a resting order.
    async fn cancel_order(&self, pair: &TradingPair, order_id: &str) -> VenueResult<()>;

    /// Snapshot of our resting orders on this venue.
    async fn active_orders(&self) -> VenueResult<Vec<RestingOrder>>;
}

/// Venue adapters keyed by venue id.
#[derive(Default, Clone)]
pub struct VenueRegistry {
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own venue id, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn VenueAdapter>) {
        self.adapters.insert(adapter.venue_id().clone(), adapter);
    }

    /// Builder-style `register`.
    pub fn with(mut self, adapter: Arc<dyn VenueAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Look up the adapter for a venue.
    pub fn resolve(&self, venue: &VenueId) -> Result<Arc<dyn VenueAdapter>> {
        self.adapters
            .get(venue)
            .cloned()
            .ok_or_else(|| anyhow!("No adapter registered for venue '{}'", venue))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
