//! Cancellation of stale or mispriced maker quotes.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use tracing::{info, instrument, warn};

use crate::config::XemmParams;
use crate::exchange::{OrderId, OrderSide, VenueAdapter};
use crate::strategy::lifecycle::QuoteBook;
use crate::strategy::quote_manager::MarketQuotes;
use crate::utils::decimal::{above_by_bps, below_by_bps};

/// Why a quote was pulled.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelReason {
    /// The taker moved and the quote no longer clears `min_spread_bps`
    PriceDrift { price: Decimal, threshold: Decimal },
    /// Older than `max_order_age`
    Expired { age: Duration },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::PriceDrift { price, threshold } => {
                write!(f, "price {} beyond threshold {}", price, threshold)
            }
            CancelReason::Expired { age } => write!(f, "age {}s", age.num_seconds()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled {
        order_id: OrderId,
        side: OrderSide,
        reason: CancelReason,
    },
    /// The venue refused; the side stays resting until the next tick
    CancelFailed {
        order_id: OrderId,
        side: OrderSide,
        error: String,
    },
    /// Tracked order vanished from the venue and outlived `max_order_age`
    Released { order_id: OrderId, side: OrderSide },
    /// Untracked order on the maker pair
    OrphanCancelled {
        order_id: OrderId,
        side: OrderSide,
        reason: CancelReason,
    },
}

/// Checks resting maker orders against the current taker prices.
pub struct CancellationMonitor {
    params: XemmParams,
}

impl CancellationMonitor {
    pub fn new(params: XemmParams) -> Self {
        Self { params }
    }

    /// Price a resting order may not cross.
    ///
    /// Buy: `taker_sell * (1 - min_spread)`, cancelled when the bid is above.
    /// Sell: `taker_buy * (1 + min_spread)`, cancelled when the ask is below.
    pub fn threshold(&self, side: OrderSide, quotes: &MarketQuotes) -> Decimal {
        match side {
            OrderSide::Buy => below_by_bps(quotes.taker_sell, self.params.min_spread_bps),
            OrderSide::Sell => above_by_bps(quotes.taker_buy, self.params.min_spread_bps),
        }
    }

    pub fn should_cancel(
        &self,
        side: OrderSide,
        price: Decimal,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
        quotes: &MarketQuotes,
    ) -> Option<CancelReason> {
        let threshold = self.threshold(side, quotes);
        let drifted = match side {
            OrderSide::Buy => price > threshold,
            OrderSide::Sell => price < threshold,
        };
        if drifted {
            return Some(CancelReason::PriceDrift { price, threshold });
        }

        let age = now - created_at;
        if age > self.params.max_order_age {
            return Some(CancelReason::Expired { age });
        }

        None
    }

    /// Check every resting order once. Cancels are attempted at most once per
    /// order per call.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        maker: &dyn VenueAdapter,
        quotes: &MarketQuotes,
        book: &mut QuoteBook,
        now: DateTime<Utc>,
    ) -> Vec<CancelOutcome> {
        let snapshot = match maker.active_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "Failed to fetch active maker orders, skipping cancellation");
                return Vec::new();
            }
        };

        let pair = &self.params.maker.pair;
        let mut outcomes = Vec::new();
        let tracked: Vec<_> = book.resting().cloned().collect();
        let tracked_ids: HashSet<&str> = tracked.iter().map(|o| o.order_id.as_str()).collect();

        for order in &tracked {
            let Some(live) = snapshot.iter().find(|o| o.order_id == order.order_id) else {
                if order.age(now) > self.params.max_order_age {
                    warn!(
                        order_id = %order.order_id,
                        side = %order.side,
                        age_secs = order.age(now).num_seconds(),
                        "Tracked order missing from venue, releasing side"
                    );
                    book.forget(order.side);
                    outcomes.push(CancelOutcome::Released {
                        order_id: order.order_id.clone(),
                        side: order.side,
                    });
                }
                continue;
            };

            let Some(reason) = self.should_cancel(order.side, live.price, live.created_at, now, quotes)
            else {
                continue;
            };

            match maker.cancel_order(pair, &order.order_id).await {
                Ok(()) => {
                    info!(
                        order_id = %order.order_id,
                        side = %order.side,
                        %reason,
                        "Cancelled maker quote"
                    );
                    book.release(order.side);
                    outcomes.push(CancelOutcome::Cancelled {
                        order_id: order.order_id.clone(),
                        side: order.side,
                        reason,
                    });
                }
                Err(e) => {
                    warn!(
                        order_id = %order.order_id,
                        side = %order.side,
                        error = %e,
                        "Cancel failed, order stays resting"
                    );
                    outcomes.push(CancelOutcome::CancelFailed {
                        order_id: order.order_id.clone(),
                        side: order.side,
                        error: e.to_string(),
                    });
                }
            }
        }

        let orphans = snapshot
            .iter()
            .filter(|o| &o.pair == pair && !tracked_ids.contains(o.order_id.as_str()));
        for orphan in orphans {
            let Some(reason) =
                self.should_cancel(orphan.side, orphan.price, orphan.created_at, now, quotes)
            else {
                continue;
            };
            match maker.cancel_order(pair, &orphan.order_id).await {
                Ok(()) => {
                    info!(order_id = %orphan.order_id, side = %orphan.side, %reason, "Cancelled orphan order");
                    outcomes.push(CancelOutcome::OrphanCancelled {
                        order_id: orphan.order_id.clone(),
                        side: orphan.side,
                        reason,
                    });
                }
                Err(e) => {
                    warn!(order_id = %orphan.order_id, error = %e, "Orphan cancel failed");
                }
            }
        }

        outcomes
    }
}
