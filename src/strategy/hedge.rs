//! Taker-side hedging of maker fills.
//!
//! A fill on the tracked maker bid is offset by selling on the taker venue,
//! a fill on the tracked ask by buying. The hedge is a single LIMIT order,
//! priced off the taker book with a slippage buffer, and is never retried.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, error, info, instrument, warn};

use crate::config::XemmParams;
use crate::exchange::{FillEvent, OrderCandidate, OrderId, OrderSide, VenueAdapter};
use crate::strategy::lifecycle::{FillProgress, QuoteBook};
use crate::utils::decimal::{above_by_bps, below_by_bps, round_down_to_lot, round_down_to_tick, round_up_to_tick};

/// Potential profit of a maker fill hedged on the taker venue.
///
/// Buy fill: `(hp * (1 - taker_fee) - P * (1 + maker_fee)) * ha`
/// Sell fill: `(P * (1 - maker_fee) - hp * (1 + taker_fee)) * ha`
pub fn potential_profit(
    fill_side: OrderSide,
    fill_price: Decimal,
    hedge_price: Decimal,
    hedge_amount: Decimal,
    maker_fee: Decimal,
    taker_fee: Decimal,
) -> Decimal {
    let per_unit = match fill_side {
        OrderSide::Buy => {
            hedge_price * (Decimal::ONE - taker_fee) - fill_price * (Decimal::ONE + maker_fee)
        }
        OrderSide::Sell => {
            fill_price * (Decimal::ONE - maker_fee) - hedge_price * (Decimal::ONE + taker_fee)
        }
    };
    per_unit * hedge_amount
}

/// A submitted hedge.
#[derive(Debug, Clone, PartialEq)]
pub struct HedgeRecord {
    pub fill_order_id: OrderId,
    pub fill_side: OrderSide,
    pub fill_price: Decimal,
    pub fill_amount: Decimal,
    pub hedge_order_id: OrderId,
    pub hedge_side: OrderSide,
    pub hedge_price: Decimal,
    pub hedge_amount: Decimal,
    pub profit: Decimal,
    /// Maker quantity still resting after this fill
    pub maker_remaining: Decimal,
    /// Part of the fill left open by lot rounding or the taker budget
    pub unhedged_residual: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnhedgedReason {
    PriceUnavailable(String),
    BudgetCheckFailed(String),
    ZeroAmount,
    SubmitFailed(String),
}

impl fmt::Display for UnhedgedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnhedgedReason::PriceUnavailable(e) => write!(f, "taker price unavailable: {}", e),
            UnhedgedReason::BudgetCheckFailed(e) => write!(f, "taker budget check failed: {}", e),
            UnhedgedReason::ZeroAmount => f.write_str("no taker budget for hedge"),
            UnhedgedReason::SubmitFailed(e) => write!(f, "taker submission failed: {}", e),
        }
    }
}

/// A maker fill the engine could not offset.
#[derive(Debug, Clone, PartialEq)]
pub struct UnhedgedFill {
    pub fill: FillEvent,
    pub reason: UnhedgedReason,
    pub maker_remaining: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HedgeOutcome {
    /// Not a fill of a tracked maker order
    Ignored,
    Hedged(HedgeRecord),
    Unhedged(UnhedgedFill),
}

pub struct HedgeExecutor {
    params: XemmParams,
}

impl HedgeExecutor {
    pub fn new(params: XemmParams) -> Self {
        Self { params }
    }

    /// Hedge limit price: the taker executable price moved by the slippage
    /// buffer in the direction that makes the order easier to fill, then
    /// rounded to the taker tick in the same direction.
    pub fn protective_price(&self, hedge_side: OrderSide, executable: Decimal) -> Decimal {
        let bps = self.params.slippage_buffer_bps;
        let tick = self.params.taker.tick_size;
        match hedge_side {
            OrderSide::Sell => round_down_to_tick(below_by_bps(executable, bps), tick),
            OrderSide::Buy => round_up_to_tick(above_by_bps(executable, bps), tick),
        }
    }

    /// Handle one fill event.
    #[instrument(skip_all, fields(order_id = %fill.order_id, side = %fill.side))]
    pub async fn on_fill(
        &self,
        taker: &dyn VenueAdapter,
        fill: &FillEvent,
        book: &mut QuoteBook,
    ) -> HedgeOutcome {
        let maker_remaining = if book.is_tracked(fill.side, &fill.order_id) {
            match book.apply_fill(fill.side, fill.amount) {
                Some(FillProgress::Partial { remaining }) => remaining,
                _ => Decimal::ZERO,
            }
        } else if let Some(remaining) =
            book.apply_released_fill(fill.side, &fill.order_id, fill.amount)
        {
            warn!(amount = %fill.amount, "Fill arrived for a released maker order");
            remaining
        } else {
            debug!(amount = %fill.amount, "Ignoring fill for untracked order");
            return HedgeOutcome::Ignored;
        };

        info!(price = %fill.price, amount = %fill.amount, "Maker order filled");

        let unhedged = |reason: UnhedgedReason| {
            error!(
                price = %fill.price,
                amount = %fill.amount,
                %reason,
                "Maker fill left unhedged"
            );
            HedgeOutcome::Unhedged(UnhedgedFill {
                fill: fill.clone(),
                reason,
                maker_remaining,
            })
        };

        let pair = &self.params.taker.pair;
        let hedge_side = fill.side.opposite();

        let executable = match taker
            .executable_price(pair, hedge_side.is_buy(), fill.amount)
            .await
        {
            Ok(price) => price,
            Err(e) => return unhedged(UnhedgedReason::PriceUnavailable(e.to_string())),
        };
        let price = self.protective_price(hedge_side, executable);

        let amount = round_down_to_lot(fill.amount, self.params.taker.lot_size);
        let candidate = OrderCandidate::limit(pair.clone(), false, hedge_side, amount, price);
        let adjusted = match taker.adjust_candidate(candidate, false).await {
            Ok(c) => c,
            Err(e) => return unhedged(UnhedgedReason::BudgetCheckFailed(e.to_string())),
        };
        let amount = round_down_to_lot(adjusted.amount, self.params.taker.lot_size);
        if amount <= Decimal::ZERO {
            return unhedged(UnhedgedReason::ZeroAmount);
        }

        let residual = fill.amount - amount;
        if residual > Decimal::ZERO {
            warn!(
                %residual,
                hedge_amount = %amount,
                "Part of the maker fill cannot be hedged"
            );
        }

        let profit = potential_profit(
            fill.side,
            fill.price,
            adjusted.price,
            amount,
            self.params.maker_fee,
            self.params.taker_fee,
        );

        match taker
            .place_order(pair, hedge_side, amount, adjusted.order_type, adjusted.price)
            .await
        {
            Ok(hedge_order_id) => {
                info!(
                    venue = %self.params.taker.venue,
                    %hedge_order_id,
                    hedge_side = %hedge_side,
                    hedge_price = %adjusted.price,
                    hedge_amount = %amount,
                    %profit,
                    "Sent taker hedge"
                );
                HedgeOutcome::Hedged(HedgeRecord {
                    fill_order_id: fill.order_id.clone(),
                    fill_side: fill.side,
                    fill_price: fill.price,
                    fill_amount: fill.amount,
                    hedge_order_id,
                    hedge_side,
                    hedge_price: adjusted.price,
                    hedge_amount: amount,
                    profit,
                    maker_remaining,
                    unhedged_residual: residual,
                    timestamp: fill.timestamp,
                })
            }
            Err(e) => unhedged(UnhedgedReason::SubmitFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exchange::{MockVenueAdapter, OrderType, TradingPair, VenueError};
    use crate::strategy::lifecycle::TrackedOrder;
    use rust_decimal_macros::dec;

    fn params() -> XemmParams {
        let mut config = Config::default();
        config.strategy.order_amount = dec!(10);
        config.strategy.slippage_buffer_bps = dec!(2);
        config.strategy.maker_fee = dec!(0.001);
        config.strategy.taker_fee = dec!(0.001);
        config.xemm_params().unwrap()
    }

    fn fill(order_id: &str, side: OrderSide, price: Decimal, amount: Decimal) -> FillEvent {
        FillEvent {
            order_id: order_id.to_string(),
            pair: TradingPair::new("DOGE", "USDT"),
            side,
            price,
            amount,
            timestamp: Utc::now(),
        }
    }

    fn resting_bid(quantity: Decimal) -> QuoteBook {
        let mut book = QuoteBook::new();
        book.mark_resting(TrackedOrder::new(
            "okx-1".to_string(),
            OrderSide::Buy,
            dec!(99.68),
            quantity,
            Utc::now(),
        ));
        book
    }

    #[test]
    fn test_profit_formula() {
        // (100 * 0.999 - 99.68 * 1.001) * 10
        let buy = potential_profit(OrderSide::Buy, dec!(99.68), dec!(100), dec!(10), dec!(0.001), dec!(0.001));
        assert_eq!(buy, dec!(1.2032));

        // (100.42 * 0.999 - 100.1 * 1.001) * 10
        let sell = potential_profit(OrderSide::Sell, dec!(100.42), dec!(100.1), dec!(10), dec!(0.001), dec!(0.001));
        assert_eq!(sell, dec!(1.1948));
    }

    #[test]
    fn test_protective_price_direction() {
        let executor = HedgeExecutor::new(params());
        assert_eq!(executor.protective_price(OrderSide::Sell, dec!(100)), dec!(99.98));
        assert_eq!(executor.protective_price(OrderSide::Buy, dec!(100)), dec!(100.02));

        let mut p = params();
        p.taker.tick_size = dec!(0.1);
        let executor = HedgeExecutor::new(p);
        assert_eq!(executor.protective_price(OrderSide::Sell, dec!(100)), dec!(99.9));
        assert_eq!(executor.protective_price(OrderSide::Buy, dec!(100)), dec!(100.1));
    }

    #[tokio::test]
    async fn test_buy_fill_sends_exactly_one_taker_sell() {
        let mut taker = MockVenueAdapter::new();
        taker
            .expect_executable_price()
            .withf(|_, is_buy, amount| !*is_buy && *amount == dec!(10))
            .times(1)
            .returning(|_, _, _| Ok(dec!(100.00)));
        taker
            .expect_adjust_candidate()
            .times(1)
            .returning(|candidate, _| Ok(candidate));
        taker
            .expect_place_order()
            .withf(|_, side, amount, order_type, price| {
                *side == OrderSide::Sell
                    && *amount == dec!(10)
                    && *order_type == OrderType::Limit
                    && *price == dec!(99.98)
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok("binance-7".to_string()));

        let executor = HedgeExecutor::new(params());
        let mut book = resting_bid(dec!(10));

        let outcome = executor
            .on_fill(&taker, &fill("okx-1", OrderSide::Buy, dec!(99.68), dec!(10)), &mut book)
            .await;

        let HedgeOutcome::Hedged(record) = outcome else {
            panic!("expected a submitted hedge");
        };
        assert_eq!(record.hedge_order_id, "binance-7");
        assert_eq!(record.hedge_side, OrderSide::Sell);
        // (99.98 * 0.999 - 99.68 * 1.001) * 10
        assert_eq!(record.profit, dec!(1.0034));
        assert!(book.is_idle(OrderSide::Buy));
    }

    #[tokio::test]
    async fn test_stray_fill_is_ignored() {
        // No expectations: any venue call would panic
        let taker = MockVenueAdapter::new();
        let executor = HedgeExecutor::new(params());
        let mut book = resting_bid(dec!(10));

        let wrong_id = fill("okx-99", OrderSide::Buy, dec!(99.68), dec!(10));
        assert_eq!(executor.on_fill(&taker, &wrong_id, &mut book).await, HedgeOutcome::Ignored);

        let wrong_side = fill("okx-1", OrderSide::Sell, dec!(99.68), dec!(10));
        assert_eq!(executor.on_fill(&taker, &wrong_side, &mut book).await, HedgeOutcome::Ignored);

        assert_eq!(book.tracked(OrderSide::Buy).unwrap().remaining, dec!(10));
    }

    #[tokio::test]
    async fn test_partial_fill_hedges_filled_amount_and_keeps_resting() {
        let mut taker = MockVenueAdapter::new();
        taker
            .expect_executable_price()
            .withf(|_, _, amount| *amount == dec!(4))
            .returning(|_, _, _| Ok(dec!(100.00)));
        taker.expect_adjust_candidate().returning(|c, _| Ok(c));
        taker
            .expect_place_order()
            .times(1)
            .returning(|_, _, _, _, _| Ok("binance-1".to_string()));

        let executor = HedgeExecutor::new(params());
        let mut book = resting_bid(dec!(10));

        let outcome = executor
            .on_fill(&taker, &fill("okx-1", OrderSide::Buy, dec!(99.68), dec!(4)), &mut book)
            .await;

        assert!(matches!(outcome, HedgeOutcome::Hedged(ref r) if r.hedge_amount == dec!(4) && r.maker_remaining == dec!(6)));
        assert_eq!(book.tracked(OrderSide::Buy).unwrap().remaining, dec!(6));
    }

    #[tokio::test]
    async fn test_failed_submission_is_unhedged() {
        let mut taker = MockVenueAdapter::new();
        taker.expect_executable_price().returning(|_, _, _| Ok(dec!(100.00)));
        taker.expect_adjust_candidate().returning(|c, _| Ok(c));
        taker
            .expect_place_order()
            .times(1)
            .returning(|_, _, _, _, _| Err(VenueError::Unavailable("timeout".to_string())));

        let executor = HedgeExecutor::new(params());
        let mut book = resting_bid(dec!(10));

        let outcome = executor
            .on_fill(&taker, &fill("okx-1", OrderSide::Buy, dec!(99.68), dec!(10)), &mut book)
            .await;

        assert!(matches!(
            outcome,
            HedgeOutcome::Unhedged(UnhedgedFill { reason: UnhedgedReason::SubmitFailed(_), .. })
        ));
        // The maker fill still happened
        assert!(book.is_idle(OrderSide::Buy));
    }

    #[tokio::test]
    async fn test_zero_budget_is_unhedged_without_submission() {
        let mut taker = MockVenueAdapter::new();
        taker.expect_executable_price().returning(|_, _, _| Ok(dec!(100.00)));
        taker
            .expect_adjust_candidate()
            .returning(|c, _| Ok(c.with_amount(Decimal::ZERO)));
        taker.expect_place_order().never();

        let executor = HedgeExecutor::new(params());
        let mut book = resting_bid(dec!(10));

        let outcome = executor
            .on_fill(&taker, &fill("okx-1", OrderSide::Buy, dec!(99.68), dec!(10)), &mut book)
            .await;

        assert!(matches!(
            outcome,
            HedgeOutcome::Unhedged(UnhedgedFill { reason: UnhedgedReason::ZeroAmount, .. })
        ));
    }

    #[tokio::test]
    async fn test_fill_for_released_order_is_still_hedged() {
        let mut taker = MockVenueAdapter::new();
        taker.expect_executable_price().returning(|_, _, _| Ok(dec!(100.00)));
        taker.expect_adjust_candidate().returning(|c, _| Ok(c));
        taker
            .expect_place_order()
            .times(1)
            .returning(|_, _, _, _, _| Ok("binance-2".to_string()));

        let executor = HedgeExecutor::new(params());
        let mut book = resting_bid(dec!(10));
        book.forget(OrderSide::Buy);

        let outcome = executor
            .on_fill(&taker, &fill("okx-1", OrderSide::Buy, dec!(99.68), dec!(10)), &mut book)
            .await;

        assert!(matches!(outcome, HedgeOutcome::Hedged(ref r) if r.fill_order_id == "okx-1"));
        assert!(!book.is_released(OrderSide::Buy, "okx-1"));
        assert!(book.is_idle(OrderSide::Buy));
    }

    #[tokio::test]
    async fn test_sub_lot_remainder_is_reported() {
        let mut taker = MockVenueAdapter::new();
        taker.expect_executable_price().returning(|_, _, _| Ok(dec!(100.00)));
        taker.expect_adjust_candidate().returning(|c, _| Ok(c));
        taker
            .expect_place_order()
            .withf(|_, _, amount, _, _| *amount == dec!(10))
            .times(1)
            .returning(|_, _, _, _, _| Ok("binance-3".to_string()));

        let mut p = params();
        p.taker.lot_size = dec!(1);
        let executor = HedgeExecutor::new(p);
        let mut book = resting_bid(dec!(10.5));

        let outcome = executor
            .on_fill(&taker, &fill("okx-1", OrderSide::Buy, dec!(99.68), dec!(10.5)), &mut book)
            .await;

        let HedgeOutcome::Hedged(record) = outcome else {
            panic!("expected a submitted hedge");
        };
        assert_eq!(record.hedge_amount, dec!(10));
        assert_eq!(record.unhedged_residual, dec!(0.5));
    }
}
