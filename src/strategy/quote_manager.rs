//! Maker quote placement.
//!
//! Each tick the quote manager prices both taker sides and both maker sides
//! for the configured order amount, then places a bid and an ask on the
//! maker venue for every idle side that passes the balance checks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::config::XemmParams;
use crate::exchange::{OrderCandidate, OrderId, OrderSide, OrderType, VenueAdapter, VenueResult};
use crate::strategy::lifecycle::{QuoteBook, TrackedOrder};
use crate::utils::decimal::{
    above_by_bps, below_by_bps, round_down_to_lot, round_down_to_tick, round_up_to_tick, safe_div,
};

/// Executable prices for `order_amount` on both venues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketQuotes {
    /// Price to buy on the taker venue (walks the taker asks)
    pub taker_buy: Decimal,
    /// Price to sell on the taker venue (walks the taker bids)
    pub taker_sell: Decimal,
    /// Price to buy on the maker venue
    pub maker_buy: Decimal,
    /// Price to sell on the maker venue
    pub maker_sell: Decimal,
}

impl MarketQuotes {
    /// Query all four executable prices. Any failure fails the whole set.
    pub async fn fetch(
        maker: &dyn VenueAdapter,
        taker: &dyn VenueAdapter,
        params: &XemmParams,
    ) -> VenueResult<Self> {
        let amount = params.order_amount;
        Ok(Self {
            taker_buy: taker.executable_price(&params.taker.pair, true, amount).await?,
            taker_sell: taker.executable_price(&params.taker.pair, false, amount).await?,
            maker_buy: maker.executable_price(&params.maker.pair, true, amount).await?,
            maker_sell: maker.executable_price(&params.maker.pair, false, amount).await?,
        })
    }
}

/// Result of trying to quote one side.
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
    Placed {
        order_id: OrderId,
        price: Decimal,
        amount: Decimal,
    },
    /// The side already has a resting order
    AlreadyResting,
    /// Balances cannot cover the quote or its hedge
    PositionLimit,
    /// Nothing left to quote after budgeting and rounding
    ZeroAmount,
    /// A venue call failed; the side stays idle
    Failed(String),
}

/// Places maker quotes for idle sides.
pub struct QuoteManager {
    params: XemmParams,
}

impl QuoteManager {
    pub fn new(params: XemmParams) -> Self {
        Self { params }
    }

    /// Bid price: `spread_bps` under the taker sell price, never above the
    /// maker ask side.
    pub fn target_bid(&self, quotes: &MarketQuotes) -> Decimal {
        let price = below_by_bps(quotes.taker_sell, self.params.spread_bps).min(quotes.maker_buy);
        round_down_to_tick(price, self.params.maker.tick_size)
    }

    /// Ask price: `spread_bps` over the taker buy price, never below the
    /// maker bid side.
    pub fn target_ask(&self, quotes: &MarketQuotes) -> Decimal {
        let price = above_by_bps(quotes.taker_buy, self.params.spread_bps).max(quotes.maker_sell);
        round_up_to_tick(price, self.params.maker.tick_size)
    }

    pub fn target_price(&self, side: OrderSide, quotes: &MarketQuotes) -> Decimal {
        match side {
            OrderSide::Buy => self.target_bid(quotes),
            OrderSide::Sell => self.target_ask(quotes),
        }
    }

    /// Whether both venues hold enough to carry a quote of `amount` at
    /// `price` and to hedge it.
    ///
    /// Buy: maker quote covers `amount * price`, taker base covers `amount`.
    /// Sell: maker base covers `amount`, taker quote covers
    /// `amount * taker_buy`.
    pub async fn check_position_limit(
        &self,
        maker: &dyn VenueAdapter,
        taker: &dyn VenueAdapter,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
        quotes: &MarketQuotes,
    ) -> VenueResult<bool> {
        let maker_pair = &self.params.maker.pair;
        let taker_pair = &self.params.taker.pair;

        let (maker_balance, maker_needed, taker_balance, taker_needed) = match side {
            OrderSide::Buy => (
                maker.available_balance(maker_pair.buy_asset()).await?,
                amount * price,
                taker.available_balance(taker_pair.sell_asset()).await?,
                amount,
            ),
            OrderSide::Sell => (
                maker.available_balance(maker_pair.sell_asset()).await?,
                amount,
                taker.available_balance(taker_pair.buy_asset()).await?,
                amount * quotes.taker_buy,
            ),
        };

        let ok = maker_balance >= maker_needed && taker_balance >= taker_needed;
        if !ok {
            warn!(
                %side,
                %maker_balance,
                %maker_needed,
                %taker_balance,
                %taker_needed,
                "Insufficient balance for quote, skipping side"
            );
        }
        Ok(ok)
    }

    /// Base amount the taker venue can hedge for a fill on `side`.
    pub async fn hedging_budget(
        &self,
        taker: &dyn VenueAdapter,
        side: OrderSide,
        quotes: &MarketQuotes,
    ) -> VenueResult<Decimal> {
        let pair = &self.params.taker.pair;
        match side {
            // A maker buy is hedged by selling base on the taker
            OrderSide::Buy => taker.available_balance(pair.sell_asset()).await,
            // A maker sell is hedged by buying base with taker quote
            OrderSide::Sell => {
                let quote = taker.available_balance(pair.buy_asset()).await?;
                Ok(safe_div(quote, quotes.taker_buy))
            }
        }
    }

    /// Quote every idle side.
    pub async fn place_quotes(
        &self,
        maker: &dyn VenueAdapter,
        taker: &dyn VenueAdapter,
        quotes: &MarketQuotes,
        book: &mut QuoteBook,
        now: DateTime<Utc>,
    ) -> Vec<(OrderSide, PlacementOutcome)> {
        let mut outcomes = Vec::with_capacity(2);
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let outcome = if book.is_idle(side) {
                self.place_side(maker, taker, side, quotes, book, now).await
            } else {
                PlacementOutcome::AlreadyResting
            };
            outcomes.push((side, outcome));
        }
        outcomes
    }

    #[instrument(skip_all, fields(side = %side))]
    async fn place_side(
        &self,
        maker: &dyn VenueAdapter,
        taker: &dyn VenueAdapter,
        side: OrderSide,
        quotes: &MarketQuotes,
        book: &mut QuoteBook,
        now: DateTime<Utc>,
    ) -> PlacementOutcome {
        let price = self.target_price(side, quotes);
        let order_amount = self.params.order_amount;

        match self
            .check_position_limit(maker, taker, side, order_amount, price, quotes)
            .await
        {
            Ok(true) => {}
            Ok(false) => return PlacementOutcome::PositionLimit,
            Err(e) => {
                warn!(error = %e, "Balance query failed, skipping side");
                return PlacementOutcome::Failed(e.to_string());
            }
        }

        let budget = match self.hedging_budget(taker, side, quotes).await {
            Ok(budget) => budget,
            Err(e) => {
                warn!(error = %e, "Hedging budget query failed, skipping side");
                return PlacementOutcome::Failed(e.to_string());
            }
        };
        let amount = round_down_to_lot(order_amount.min(budget), self.params.maker.lot_size);

        let candidate = OrderCandidate::limit(self.params.maker.pair.clone(), true, side, amount, price);
        let adjusted = match maker.adjust_candidate(candidate, false).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Budget check failed, skipping side");
                return PlacementOutcome::Failed(e.to_string());
            }
        };
        let amount = round_down_to_lot(adjusted.amount, self.params.maker.lot_size);

        if amount <= Decimal::ZERO || amount < self.params.min_order_amount {
            debug!(%amount, "Adjusted quote amount too small, skipping side");
            return PlacementOutcome::ZeroAmount;
        }

        match maker
            .place_order(&self.params.maker.pair, side, amount, OrderType::Limit, price)
            .await
        {
            Ok(order_id) => {
                info!(
                    venue = %self.params.maker.venue,
                    %order_id,
                    %price,
                    %amount,
                    taker_buy = %quotes.taker_buy,
                    taker_sell = %quotes.taker_sell,
                    "Placed maker quote"
                );
                book.mark_resting(TrackedOrder::new(order_id.clone(), side, price, amount, now));
                PlacementOutcome::Placed {
                    order_id,
                    price,
                    amount,
                }
            }
            Err(e) => {
                warn!(error = %e, %price, %amount, "Maker quote placement failed");
                PlacementOutcome::Failed(e.to_string())
            }
        }
    }
}
