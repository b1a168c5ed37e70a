//! Mock venue for paper trading and tests.
//!
//! Holds an in-memory order book per pair, free balances with reservations
//! for resting orders, and a budget checker. Marketable limit orders execute
//! immediately against the book (without consuming it); the rest of the
//! order rests at its limit price. Resting orders fill when a new book
//! crosses them, and every fill is pushed to the optional fill channel.

use super::error::{VenueError, VenueResult};
use super::traits::{VenueAdapter, VenueId};
use super::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Every order accepted by the mock venue, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: OrderId,
    pub pair: TradingPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Decimal,
    /// Amount executed immediately on submission
    pub executed: Decimal,
}

/// Mock venue state.
#[derive(Debug, Clone)]
pub struct MockVenueState {
    pub books: HashMap<TradingPair, OrderBookSnapshot>,
    /// Free balances; resting orders hold their reservation outside this map
    pub balances: HashMap<String, Decimal>,
    pub resting: HashMap<OrderId, RestingOrder>,
    pub order_log: Vec<PlacedOrder>,
    pub tape: Vec<PublicTrade>,
    pub clock: DateTime<Utc>,
    pub total_fees: Decimal,
    pub order_count: u64,
    /// Fault injection: reject this many upcoming `place_order` calls
    pub reject_next_orders: u32,
    /// Fault injection: fail every `cancel_order` call
    pub reject_cancels: bool,
}

impl Default for MockVenueState {
    fn default() -> Self {
        Self {
            books: HashMap::new(),
            balances: HashMap::new(),
            resting: HashMap::new(),
            order_log: Vec::new(),
            tape: Vec::new(),
            clock: Utc::now(),
            total_fees: Decimal::ZERO,
            order_count: 0,
            reject_next_orders: 0,
            reject_cancels: false,
        }
    }
}

/// Paper-trading venue implementing `VenueAdapter`.
pub struct MockVenue {
    id: VenueId,
    state: Arc<RwLock<MockVenueState>>,
    order_id_counter: AtomicU64,
    fee_rate: Decimal,
    fill_tx: Option<mpsc::UnboundedSender<FillEvent>>,
}

/// Walk book levels until `amount` is covered or `limit` is crossed.
/// Returns (filled amount, notional).
fn sweep(levels: &[BookLevel], amount: Decimal, limit: Option<Decimal>, is_buy: bool) -> (Decimal, Decimal) {
    let mut filled = Decimal::ZERO;
    let mut notional = Decimal::ZERO;

    for level in levels {
        if filled >= amount {
            break;
        }
        if let Some(limit) = limit {
            let within = if is_buy {
                level.price <= limit
            } else {
                level.price >= limit
            };
            if !within {
                break;
            }
        }
        let take = level.amount.min(amount - filled);
        filled += take;
        notional += take * level.price;
    }

    (filled, notional)
}

impl MockVenue {
    /// Create a new mock venue with the given trading fee rate.
    pub fn new(id: impl Into<String>, fee_rate: Decimal) -> Self {
        Self {
            id: VenueId::new(id),
            state: Arc::new(RwLock::new(MockVenueState::default())),
            order_id_counter: AtomicU64::new(1),
            fee_rate,
            fill_tx: None,
        }
    }

    /// Push fills of our orders into `tx`.
    pub fn with_fill_sender(mut self, tx: mpsc::UnboundedSender<FillEvent>) -> Self {
        self.fill_tx = Some(tx);
        self
    }

    fn next_order_id(&self) -> OrderId {
        let n = self.order_id_counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.id, n)
    }

    fn emit(&self, fills: &[FillEvent]) {
        if let Some(tx) = &self.fill_tx {
            for fill in fills {
                if tx.send(fill.clone()).is_err() {
                    debug!(venue = %self.id, order_id = %fill.order_id, "Fill receiver dropped");
                }
            }
        }
    }

    pub async fn set_balance(&self, asset: &str, amount: Decimal) {
        self.state
            .write()
            .await
            .balances
            .insert(asset.to_string(), amount);
    }

    pub async fn balance(&self, asset: &str) -> Decimal {
        self.state
            .read()
            .await
            .balances
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Set the venue clock used for order creation timestamps and fills.
    pub async fn set_time(&self, now: DateTime<Utc>) {
        self.state.write().await.clock = now;
    }

    pub async fn reject_next_orders(&self, count: u32) {
        self.state.write().await.reject_next_orders = count;
    }

    pub async fn set_reject_cancels(&self, reject: bool) {
        self.state.write().await.reject_cancels = reject;
    }

    /// Get a copy of the current state.
    pub async fn get_state(&self) -> MockVenueState {
        self.state.read().await.clone()
    }

    pub async fn order_log(&self) -> Vec<PlacedOrder> {
        self.state.read().await.order_log.clone()
    }

    /// Take the public trades recorded since the last drain.
    pub async fn drain_tape(&self) -> Vec<PublicTrade> {
        std::mem::take(&mut self.state.write().await.tape)
    }

    /// Top `depth` levels of the book for `pair`.
    pub async fn snapshot(&self, pair: &TradingPair, depth: usize) -> VenueResult<OrderBookSnapshot> {
        let state = self.state.read().await;
        state
            .books
            .get(pair)
            .cloned()
            .map(|book| book.truncated(depth))
            .ok_or_else(|| VenueError::UnknownPair(pair.to_string()))
    }

    /// Replace the book for a pair and fill any resting orders it crosses.
    pub async fn set_book(&self, book: OrderBookSnapshot) -> Vec<FillEvent> {
        let fills = {
            let mut state = self.state.write().await;
            let best_bid = book.best_bid();
            let best_ask = book.best_ask();
            let pair = book.pair.clone();
            state.books.insert(pair.clone(), book);

            let crossed: Vec<OrderId> = state
                .resting
                .values()
                .filter(|o| o.pair == pair)
                .filter(|o| match o.side {
                    OrderSide::Buy => best_ask.is_some_and(|ask| o.price >= ask),
                    OrderSide::Sell => best_bid.is_some_and(|bid| o.price <= bid),
                })
                .map(|o| o.order_id.clone())
                .collect();

            let mut fills = Vec::with_capacity(crossed.len());
            for order_id in crossed {
                if let Some(fill) = self.apply_resting_fill(&mut state, &order_id, None) {
                    fills.push(fill);
                }
            }
            fills
        };

        self.emit(&fills);
        fills
    }

    /// Fill `amount` of a resting order at its limit price (partial fills allowed).
    pub async fn fill_resting(&self, order_id: &str, amount: Decimal) -> VenueResult<FillEvent> {
        let fill = {
            let mut state = self.state.write().await;
            self.apply_resting_fill(&mut state, order_id, Some(amount))
                .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))?
        };
        self.emit(std::slice::from_ref(&fill));
        Ok(fill)
    }

    fn apply_resting_fill(
        &self,
        state: &mut MockVenueState,
        order_id: &str,
        amount: Option<Decimal>,
    ) -> Option<FillEvent> {
        let order = state.resting.get(order_id)?.clone();
        let amount = amount.unwrap_or(order.quantity).min(order.quantity);
        if amount <= Decimal::ZERO {
            return None;
        }

        let notional = amount * order.price;
        let fee = notional * self.fee_rate;
        {
            let pair = &order.pair;
            match order.side {
                // Quote already reserved at placement
                OrderSide::Buy => {
                    *state.balances.entry(pair.base.clone()).or_default() += amount;
                    *state.balances.entry(pair.quote.clone()).or_default() -= fee;
                }
                // Base already reserved at placement
                OrderSide::Sell => {
                    *state.balances.entry(pair.quote.clone()).or_default() += notional - fee;
                }
            }
        }
        state.total_fees += fee;

        let remaining = order.quantity - amount;
        if remaining > Decimal::ZERO {
            if let Some(resting) = state.resting.get_mut(order_id) {
                resting.quantity = remaining;
            }
        } else {
            state.resting.remove(order_id);
        }

        let timestamp = state.clock;
        state.tape.push(PublicTrade {
            pair: order.pair.clone(),
            timestamp,
            price: order.price,
            amount,
            side: order.side,
            is_aggressive: false,
        });

        info!(
            venue = %self.id,
            %order_id,
            side = %order.side,
            price = %order.price,
            %amount,
            %remaining,
            "Mock resting order filled"
        );

        Some(FillEvent {
            order_id: order_id.to_string(),
            pair: order.pair,
            side: order.side,
            price: order.price,
            amount,
            timestamp,
        })
    }
}

#[async_trait]
impl VenueAdapter for MockVenue {
    fn venue_id(&self) -> &VenueId {
        &self.id
    }

    async fn executable_price(
        &self,
        pair: &TradingPair,
        is_buy: bool,
        amount: Decimal,
    ) -> VenueResult<Decimal> {
        let state = self.state.read().await;
        let book = state
            .books
            .get(pair)
            .ok_or_else(|| VenueError::UnknownPair(pair.to_string()))?;
        let levels = if is_buy { &book.asks } else { &book.bids };

        if amount <= Decimal::ZERO {
            return levels
                .first()
                .map(|l| l.price)
                .ok_or_else(|| VenueError::Unavailable(format!("empty book for {}", pair)));
        }

        let (filled, notional) = sweep(levels, amount, None, is_buy);
        if filled < amount {
            return Err(VenueError::InsufficientDepth {
                pair: pair.to_string(),
                requested: amount,
                available: filled,
            });
        }
        Ok(notional / amount)
    }

    async fn mid_price(&self, pair: &TradingPair) -> VenueResult<Decimal> {
        let state = self.state.read().await;
        let book = state
            .books
            .get(pair)
            .ok_or_else(|| VenueError::UnknownPair(pair.to_string()))?;
        match (book.best_bid(), book.best_ask()) {
            (Some(bid), Some(ask)) => Ok((bid + ask) / dec!(2)),
            _ => Err(VenueError::Unavailable(format!("one-sided book for {}", pair))),
        }
    }

    async fn available_balance(&self, asset: &str) -> VenueResult<Decimal> {
        Ok(self.balance(asset).await)
    }

    async fn adjust_candidate(
        &self,
        candidate: OrderCandidate,
        all_or_none: bool,
    ) -> VenueResult<OrderCandidate> {
        if candidate.price <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!(
                "non-positive candidate price {}",
                candidate.price
            )));
        }

        let state = self.state.read().await;
        let free = |asset: &str| state.balances.get(asset).copied().unwrap_or(Decimal::ZERO);

        let budget = match candidate.side {
            OrderSide::Buy => {
                free(candidate.pair.buy_asset()) / (candidate.price * (Decimal::ONE + self.fee_rate))
            }
            OrderSide::Sell => free(candidate.pair.sell_asset()),
        }
        .max(Decimal::ZERO);

        if candidate.amount <= budget {
            return Ok(candidate);
        }

        let adjusted = if all_or_none {
            Decimal::ZERO
        } else {
            budget.round_dp_with_strategy(8, rust_decimal::RoundingStrategy::ToZero)
        };
        debug!(
            venue = %self.id,
            side = %candidate.side,
            requested = %candidate.amount,
            %adjusted,
            "Mock budget checker reduced candidate"
        );
        Ok(candidate.with_amount(adjusted))
    }

    async fn place_order(
        &self,
        pair: &TradingPair,
        side: OrderSide,
        amount: Decimal,
        order_type: OrderType,
        price: Decimal,
    ) -> VenueResult<OrderId> {
        if amount <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!("non-positive amount {}", amount)));
        }

        let (order_id, fills) = {
            let mut state = self.state.write().await;

            if state.reject_next_orders > 0 {
                state.reject_next_orders -= 1;
                warn!(venue = %self.id, %pair, %side, "Mock venue rejecting order (injected)");
                return Err(VenueError::Rejected("injected rejection".to_string()));
            }

            let book = state
                .books
                .get(pair)
                .ok_or_else(|| VenueError::UnknownPair(pair.to_string()))?;
            let levels = if side.is_buy() { &book.asks } else { &book.bids };
            let limit = match order_type {
                OrderType::Limit => Some(price),
                OrderType::Market => None,
            };
            let (filled, notional) = sweep(levels, amount, limit, side.is_buy());
            let remaining = match order_type {
                OrderType::Limit => amount - filled,
                OrderType::Market => Decimal::ZERO,
            };

            // Funds check covers the immediate execution plus the resting reservation
            let fee = notional * self.fee_rate;
            let free = |asset: &str| state.balances.get(asset).copied().unwrap_or(Decimal::ZERO);
            let sufficient = match side {
                OrderSide::Buy => free(&pair.quote) >= notional + fee + remaining * price,
                OrderSide::Sell => free(&pair.base) >= filled + remaining,
            };
            if !sufficient {
                return Err(VenueError::Rejected(format!(
                    "insufficient balance for {} {} {}",
                    side, amount, pair
                )));
            }

            let order_id = self.next_order_id();
            let now = state.clock;
            match side {
                OrderSide::Buy => {
                    *state.balances.entry(pair.quote.clone()).or_default() -=
                        notional + fee + remaining * price;
                    *state.balances.entry(pair.base.clone()).or_default() += filled;
                }
                OrderSide::Sell => {
                    *state.balances.entry(pair.base.clone()).or_default() -= filled + remaining;
                    *state.balances.entry(pair.quote.clone()).or_default() += notional - fee;
                }
            }
            state.total_fees += fee;
            state.order_count += 1;

            if remaining > Decimal::ZERO {
                state.resting.insert(
                    order_id.clone(),
                    RestingOrder {
                        order_id: order_id.clone(),
                        pair: pair.clone(),
                        side,
                        price,
                        quantity: remaining,
                        created_at: now,
                    },
                );
            }

            state.order_log.push(PlacedOrder {
                order_id: order_id.clone(),
                pair: pair.clone(),
                side,
                order_type,
                amount,
                price,
                executed: filled,
            });

            let mut fills = Vec::new();
            if filled > Decimal::ZERO {
                let vwap = notional / filled;
                state.tape.push(PublicTrade {
                    pair: pair.clone(),
                    timestamp: now,
                    price: vwap,
                    amount: filled,
                    side,
                    is_aggressive: true,
                });
                fills.push(FillEvent {
                    order_id: order_id.clone(),
                    pair: pair.clone(),
                    side,
                    price: vwap,
                    amount: filled,
                    timestamp: now,
                });
            }

            info!(
                venue = %self.id,
                %order_id,
                %pair,
                %side,
                %amount,
                %price,
                executed = %filled,
                resting = %remaining,
                "Mock order accepted"
            );

            (order_id, fills)
        };

        self.emit(&fills);
        Ok(order_id)
    }

    async fn cancel_order(&self, pair: &TradingPair, order_id: &str) -> VenueResult<()> {
        let mut state = self.state.write().await;

        if state.reject_cancels {
            warn!(venue = %self.id, %order_id, "Mock venue failing cancel (injected)");
            return Err(VenueError::Unavailable("injected cancel failure".to_string()));
        }

        let on_pair = state
            .resting
            .get(order_id)
            .is_some_and(|order| &order.pair == pair);
        if !on_pair {
            return Err(VenueError::OrderNotFound(order_id.to_string()));
        }
        let order = state
            .resting
            .remove(order_id)
            .ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))?;

        match order.side {
            OrderSide::Buy => {
                *state.balances.entry(pair.quote.clone()).or_default() += order.quantity * order.price;
            }
            OrderSide::Sell => {
                *state.balances.entry(pair.base.clone()).or_default() += order.quantity;
            }
        }

        debug!(venue = %self.id, %order_id, "Mock order cancelled");
        Ok(())
    }

    async fn active_orders(&self) -> VenueResult<Vec<RestingOrder>> {
        let state = self.state.read().await;
        let mut orders: Vec<RestingOrder> = state.resting.values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.order_id.cmp(&b.order_id)));
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Helper functions
    // =========================================================================

    fn doge() -> TradingPair {
        TradingPair::new("DOGE", "USDT")
    }

    fn book(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> OrderBookSnapshot {
        OrderBookSnapshot {
            pair: doge(),
            timestamp: Utc::now(),
            bids: bids.iter().map(|&(p, a)| BookLevel::new(p, a)).collect(),
            asks: asks.iter().map(|&(p, a)| BookLevel::new(p, a)).collect(),
        }
    }

    async fn funded_venue() -> MockVenue {
        let venue = MockVenue::new("test", Decimal::ZERO);
        venue.set_balance("USDT", dec!(1000)).await;
        venue.set_balance("DOGE", dec!(1000)).await;
        venue
            .set_book(book(
                &[(dec!(0.99), dec!(100)), (dec!(0.98), dec!(100))],
                &[(dec!(1.01), dec!(100)), (dec!(1.02), dec!(100))],
            ))
            .await;
        venue
    }

    // =========================================================================
    // Pricing
    // =========================================================================

    #[tokio::test]
    async fn test_executable_price_is_depth_weighted() {
        let venue = funded_venue().await;

        let top = venue.executable_price(&doge(), true, dec!(50)).await.unwrap();
        assert_eq!(top, dec!(1.01));

        // 100 @ 1.01 + 100 @ 1.02
        let deep = venue.executable_price(&doge(), true, dec!(200)).await.unwrap();
        assert_eq!(deep, dec!(1.015));

        let bid = venue.executable_price(&doge(), false, dec!(200)).await.unwrap();
        assert_eq!(bid, dec!(0.985));
    }

    #[tokio::test]
    async fn test_executable_price_insufficient_depth() {
        let venue = funded_venue().await;

        let err = venue.executable_price(&doge(), true, dec!(500)).await.unwrap_err();
        assert!(matches!(err, VenueError::InsufficientDepth { available, .. } if available == dec!(200)));
    }

    #[tokio::test]
    async fn test_mid_price() {
        let venue = funded_venue().await;
        assert_eq!(venue.mid_price(&doge()).await.unwrap(), dec!(1.00));
        assert!(venue.mid_price(&TradingPair::new("BTC", "USDT")).await.is_err());
    }

    // =========================================================================
    // Budget checker
    // =========================================================================

    #[tokio::test]
    async fn test_adjust_candidate_clamps_buy_to_quote_balance() {
        let venue = funded_venue().await;
        let candidate = OrderCandidate::limit(doge(), true, OrderSide::Buy, dec!(5000), dec!(0.5));

        let partial = venue.adjust_candidate(candidate.clone(), false).await.unwrap();
        assert_eq!(partial.amount, dec!(2000));

        let none = venue.adjust_candidate(candidate, true).await.unwrap();
        assert_eq!(none.amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_adjust_candidate_keeps_affordable_sell() {
        let venue = funded_venue().await;
        let candidate = OrderCandidate::limit(doge(), true, OrderSide::Sell, dec!(10), dec!(1.5));

        let adjusted = venue.adjust_candidate(candidate.clone(), false).await.unwrap();
        assert_eq!(adjusted, candidate);
    }

    // =========================================================================
    // Order lifecycle
    // =========================================================================

    #[tokio::test]
    async fn test_passive_limit_rests_and_reserves_funds() {
        let venue = funded_venue().await;

        let id = venue
            .place_order(&doge(), OrderSide::Buy, dec!(100), OrderType::Limit, dec!(0.95))
            .await
            .unwrap();

        let active = venue.active_orders().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].order_id, id);
        assert_eq!(venue.balance("USDT").await, dec!(905));

        venue.cancel_order(&doge(), &id).await.unwrap();
        assert!(venue.active_orders().await.unwrap().is_empty());
        assert_eq!(venue.balance("USDT").await, dec!(1000));
    }

    #[tokio::test]
    async fn test_marketable_limit_executes_and_emits_fill() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let venue = funded_venue().await.with_fill_sender(tx);

        let id = venue
            .place_order(&doge(), OrderSide::Sell, dec!(50), OrderType::Limit, dec!(0.98))
            .await
            .unwrap();

        let fill = rx.try_recv().unwrap();
        assert_eq!(fill.order_id, id);
        assert_eq!(fill.amount, dec!(50));
        assert_eq!(fill.price, dec!(0.99));
        assert!(venue.active_orders().await.unwrap().is_empty());
        assert_eq!(venue.balance("DOGE").await, dec!(950));
    }

    #[tokio::test]
    async fn test_crossing_book_fills_resting_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let venue = funded_venue().await.with_fill_sender(tx);

        let id = venue
            .place_order(&doge(), OrderSide::Buy, dec!(10), OrderType::Limit, dec!(0.995))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());

        let fills = venue
            .set_book(book(&[(dec!(0.98), dec!(100))], &[(dec!(0.99), dec!(100))]))
            .await;

        assert_eq!(fills.len(), 1);
        assert_eq!(rx.try_recv().unwrap().order_id, id);
        assert_eq!(venue.balance("DOGE").await, dec!(1010));
        assert_eq!(venue.drain_tape().await.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_fill_keeps_remainder_resting() {
        let venue = funded_venue().await;
        let id = venue
            .place_order(&doge(), OrderSide::Sell, dec!(100), OrderType::Limit, dec!(1.05))
            .await
            .unwrap();

        let fill = venue.fill_resting(&id, dec!(30)).await.unwrap();
        assert_eq!(fill.amount, dec!(30));

        let active = venue.active_orders().await.unwrap();
        assert_eq!(active[0].quantity, dec!(70));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let venue = funded_venue().await;
        venue.reject_next_orders(1).await;

        let err = venue
            .place_order(&doge(), OrderSide::Buy, dec!(1), OrderType::Limit, dec!(0.9))
            .await
            .unwrap_err();
        assert!(matches!(err, VenueError::Rejected(_)));

        let id = venue
            .place_order(&doge(), OrderSide::Buy, dec!(1), OrderType::Limit, dec!(0.9))
            .await
            .unwrap();

        venue.set_reject_cancels(true).await;
        assert!(venue.cancel_order(&doge(), &id).await.is_err());
        assert_eq!(venue.active_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let venue = funded_venue().await;
        let result = venue
            .place_order(&doge(), OrderSide::Buy, Decimal::ZERO, OrderType::Limit, dec!(0.9))
            .await;
        assert!(result.is_err());
        assert_eq!(venue.get_state().await.order_count, 0);
    }
}
