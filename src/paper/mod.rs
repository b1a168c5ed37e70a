//! Deterministic paper market for the mock venues.
//!
//! The taker mid follows a sawtooth: it drifts up by `drift_bps` per tick for
//! `swing_ticks` ticks, then down for the same count. The maker mid replays
//! the taker mid from `maker_lag_ticks` ticks ago, so the two books drift
//! apart while the taker trends and quotes get crossed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::debug;

use crate::config::{MarketSpec, PaperConfig};
use crate::exchange::{BookLevel, FillEvent, MockVenue, OrderBookSnapshot, TradingPair};
use crate::utils::decimal::{above_by_bps, below_by_bps, round_to_tick};

/// Mid prices produced for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperMids {
    pub maker: Decimal,
    pub taker: Decimal,
}

pub struct PaperMarket {
    config: PaperConfig,
    maker: MarketSpec,
    taker: MarketSpec,
    tick: u64,
    taker_mid: Decimal,
    history: VecDeque<Decimal>,
}

impl PaperMarket {
    pub fn new(config: PaperConfig, maker: MarketSpec, taker: MarketSpec) -> Self {
        let taker_mid = config.start_mid;
        Self {
            config,
            maker,
            taker,
            tick: 0,
            taker_mid,
            history: VecDeque::new(),
        }
    }

    /// Fund both venues with the configured starting balances.
    pub async fn seed_balances(&self, maker: &MockVenue, taker: &MockVenue) {
        for (venue, pair) in [(maker, &self.maker.pair), (taker, &self.taker.pair)] {
            venue.set_balance(&pair.base, self.config.base_balance).await;
            venue.set_balance(&pair.quote, self.config.quote_balance).await;
        }
    }

    /// Advance the mids by one tick.
    pub fn next_mids(&mut self) -> PaperMids {
        if self.tick > 0 {
            let swing = self.config.swing_ticks.max(1);
            let rising = ((self.tick - 1) / swing) % 2 == 0;
            self.taker_mid = if rising {
                above_by_bps(self.taker_mid, self.config.drift_bps)
            } else {
                below_by_bps(self.taker_mid, self.config.drift_bps)
            };
        }
        self.tick += 1;

        self.history.push_back(self.taker_mid);
        while self.history.len() > self.config.maker_lag_ticks + 1 {
            self.history.pop_front();
        }
        let maker_mid = self.history.front().copied().unwrap_or(self.taker_mid);

        PaperMids {
            maker: maker_mid,
            taker: self.taker_mid,
        }
    }

    /// Book of `levels` levels each side around `mid`.
    pub fn build_book(
        &self,
        pair: &TradingPair,
        mid: Decimal,
        tick_size: Decimal,
        now: DateTime<Utc>,
    ) -> OrderBookSnapshot {
        let offset = |i: usize| self.config.half_spread_bps + self.config.level_step_bps * Decimal::from(i as u64);
        let levels = 0..self.config.levels.max(1);

        OrderBookSnapshot {
            pair: pair.clone(),
            timestamp: now,
            bids: levels
                .clone()
                .map(|i| {
                    BookLevel::new(round_to_tick(below_by_bps(mid, offset(i)), tick_size), self.config.level_amount)
                })
                .collect(),
            asks: levels
                .map(|i| {
                    BookLevel::new(round_to_tick(above_by_bps(mid, offset(i)), tick_size), self.config.level_amount)
                })
                .collect(),
        }
    }

    /// Move both venues to the next tick. Returns fills of resting orders
    /// crossed by the new books.
    pub async fn step(&mut self, maker: &MockVenue, taker: &MockVenue, now: DateTime<Utc>) -> Vec<FillEvent> {
        let mids = self.next_mids();
        debug!(tick = self.tick, maker_mid = %mids.maker, taker_mid = %mids.taker, "Paper market tick");

        maker.set_time(now).await;
        taker.set_time(now).await;

        let mut fills = taker
            .set_book(self.build_book(&self.taker.pair, mids.taker, self.taker.tick_size, now))
            .await;
        fills.extend(
            maker
                .set_book(self.build_book(&self.maker.pair, mids.maker, self.maker.tick_size, now))
                .await,
        );
        fills
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exchange::{OrderSide, OrderType, VenueAdapter};
    use rust_decimal_macros::dec;

    fn market(lag: usize) -> PaperMarket {
        let mut config = Config::default();
        config.paper.start_mid = dec!(100);
        config.paper.drift_bps = dec!(10);
        config.paper.swing_ticks = 3;
        config.paper.maker_lag_ticks = lag;
        let params = config.xemm_params().unwrap();
        PaperMarket::new(config.paper, params.maker, params.taker)
    }

    #[test]
    fn test_sawtooth_and_lag() {
        let mut market = market(2);
        let mids: Vec<PaperMids> = (0..8).map(|_| market.next_mids()).collect();

        assert_eq!(mids[0].taker, dec!(100));
        assert_eq!(mids[1].taker, dec!(100.1));
        assert!(mids[3].taker > mids[2].taker);
        // Direction flips after three moves
        assert!(mids[4].taker < mids[3].taker);
        assert!(mids[7].taker > mids[6].taker);

        // Maker trails by two ticks
        assert_eq!(mids[0].maker, dec!(100));
        assert_eq!(mids[1].maker, dec!(100));
        assert_eq!(mids[2].maker, mids[0].taker);
        assert_eq!(mids[5].maker, mids[3].taker);
    }

    #[test]
    fn test_book_shape() {
        let market = market(0);
        let book = market.build_book(&TradingPair::new("DOGE", "USDT"), dec!(100), dec!(0.01), Utc::now());

        assert_eq!(book.bids.len(), 10);
        // 5 bps half spread
        assert_eq!(book.best_bid(), Some(dec!(99.95)));
        assert_eq!(book.best_ask(), Some(dec!(100.05)));
        assert!(book.bids[1].price < book.bids[0].price);
        assert!(book.asks[1].price > book.asks[0].price);
    }

    #[tokio::test]
    async fn test_step_fills_crossed_orders() {
        let mut market = market(0);
        let maker = MockVenue::new("okx", Decimal::ZERO);
        let taker = MockVenue::new("binance", Decimal::ZERO);
        market.seed_balances(&maker, &taker).await;
        let now = Utc::now();
        market.step(&maker, &taker, now).await;

        // Ask above the book; each of the next ticks lifts the mid 10 bps
        let pair = TradingPair::new("DOGE", "USDT");
        maker
            .place_order(&pair, OrderSide::Sell, dec!(1), OrderType::Limit, dec!(100.08))
            .await
            .unwrap();

        let fills = market.step(&maker, &taker, now).await;
        // New mid 100.1, best bid 100.05 < 100.08
        assert!(fills.is_empty());

        let fills = market.step(&maker, &taker, now).await;
        // Mid 100.2001, best bid ~100.15 crosses the ask
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(100.08));
    }
}
