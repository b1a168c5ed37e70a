//! Human-readable status report: balances, venue spreads and live quotes.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::fmt::Write as _;

use crate::config::XemmParams;
use crate::exchange::{OrderSide, RestingOrder, TradingPair, VenueId};
use crate::strategy::profit::ProfitAccumulator;
use crate::strategy::quote_manager::MarketQuotes;
use crate::utils::decimal::{above_by_bps, below_by_bps, spread_bps};

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRow {
    pub venue: VenueId,
    pub asset: String,
    pub amount: Decimal,
}

/// Executable prices on one venue and the edge versus the other venue.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRow {
    pub venue: VenueId,
    pub pair: TradingPair,
    pub mid: Decimal,
    pub buy: Decimal,
    pub sell: Decimal,
    pub buy_spread_bps: Decimal,
    pub sell_spread_bps: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRow {
    pub venue: VenueId,
    pub pair: TradingPair,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    /// Distance from the maker mid, positive when behind it
    pub spread_mid_bps: Decimal,
    /// Distance from the cancel threshold, positive while the quote is safe
    pub spread_cancel_bps: Decimal,
    pub age: Duration,
}

/// Inputs gathered from the venues for one report.
pub struct StatusInputs<'a> {
    pub params: &'a XemmParams,
    pub quotes: MarketQuotes,
    pub maker_mid: Decimal,
    pub taker_mid: Decimal,
    pub maker_orders: Vec<RestingOrder>,
    pub balances: Vec<BalanceRow>,
    pub profit: &'a ProfitAccumulator,
    pub halted: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub balances: Vec<BalanceRow>,
    pub exchanges: Vec<ExchangeRow>,
    pub orders: Vec<OrderRow>,
    pub total_profit: Decimal,
    pub hedge_count: u64,
    pub unhedged_count: u64,
    pub halted: bool,
}

impl StatusReport {
    pub fn build(inputs: StatusInputs<'_>) -> Self {
        let StatusInputs {
            params,
            quotes,
            maker_mid,
            taker_mid,
            maker_orders,
            balances,
            profit,
            halted,
            now,
        } = inputs;

        let maker_buy_spread = spread_bps(quotes.maker_buy, quotes.taker_buy, maker_mid);
        let maker_sell_spread = spread_bps(quotes.taker_sell, quotes.maker_sell, maker_mid);

        let exchanges = vec![
            ExchangeRow {
                venue: params.maker.venue.clone(),
                pair: params.maker.pair.clone(),
                mid: maker_mid,
                buy: quotes.maker_buy,
                sell: quotes.maker_sell,
                buy_spread_bps: maker_buy_spread.trunc(),
                sell_spread_bps: maker_sell_spread.trunc(),
            },
            ExchangeRow {
                venue: params.taker.venue.clone(),
                pair: params.taker.pair.clone(),
                mid: taker_mid,
                buy: quotes.taker_buy,
                sell: quotes.taker_sell,
                buy_spread_bps: (-maker_buy_spread).trunc(),
                sell_spread_bps: (-maker_sell_spread).trunc(),
            },
        ];

        let buy_threshold = below_by_bps(quotes.taker_sell, params.min_spread_bps);
        let sell_threshold = above_by_bps(quotes.taker_buy, params.min_spread_bps);

        let mut orders: Vec<OrderRow> = maker_orders
            .into_iter()
            .filter(|o| o.pair == params.maker.pair)
            .map(|o| {
                let (spread_mid, spread_cancel) = match o.side {
                    OrderSide::Buy => (
                        spread_bps(maker_mid, o.price, maker_mid),
                        spread_bps(buy_threshold, o.price, buy_threshold),
                    ),
                    OrderSide::Sell => (
                        spread_bps(o.price, maker_mid, maker_mid),
                        spread_bps(o.price, sell_threshold, sell_threshold),
                    ),
                };
                OrderRow {
                    venue: params.maker.venue.clone(),
                    pair: o.pair.clone(),
                    side: o.side,
                    price: o.price,
                    amount: o.quantity,
                    spread_mid_bps: spread_mid.trunc(),
                    spread_cancel_bps: spread_cancel.trunc(),
                    age: o.age(now),
                }
            })
            .collect();
        orders.sort_by(|a, b| {
            a.pair
                .to_string()
                .cmp(&b.pair.to_string())
                .then(a.side.as_str().cmp(b.side.as_str()))
        });

        Self {
            balances,
            exchanges,
            orders,
            total_profit: profit.total(),
            hedge_count: profit.hedge_count(),
            unhedged_count: profit.unhedged_count(),
            halted,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "  Balances:");
        let _ = writeln!(out, "    {:<12} {:<8} {:>18}", "Exchange", "Asset", "Available");
        for row in &self.balances {
            let _ = writeln!(out, "    {:<12} {:<8} {:>18}", row.venue.as_str(), row.asset, row.amount.round_dp(6).to_string());
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "  Exchanges:");
        let _ = writeln!(
            out,
            "    {:<12} {:<10} {:>12} {:>12} {:>12} {:>10} {:>11}",
            "Exchange", "Market", "Mid", "Buy", "Sell", "Buy Spread", "Sell Spread"
        );
        for row in &self.exchanges {
            let _ = writeln!(
                out,
                "    {:<12} {:<10} {:>12} {:>12} {:>12} {:>10} {:>11}",
                row.venue.as_str(),
                row.pair.to_string(),
                row.mid.round_dp(6).to_string(),
                row.buy.round_dp(6).to_string(),
                row.sell.round_dp(6).to_string(),
                row.buy_spread_bps.to_string(),
                row.sell_spread_bps.to_string()
            );
        }

        let _ = writeln!(out);
        if self.orders.is_empty() {
            let _ = writeln!(out, "  No active maker orders.");
        } else {
            let _ = writeln!(out, "  Active Orders:");
            let _ = writeln!(
                out,
                "    {:<12} {:<10} {:<5} {:>12} {:>12} {:>10} {:>13} {:>9}",
                "Exchange", "Market", "Side", "Price", "Amount", "Spread Mid", "Spread Cancel", "Age"
            );
            for row in &self.orders {
                let _ = writeln!(
                    out,
                    "    {:<12} {:<10} {:<5} {:>12} {:>12} {:>10} {:>13} {:>9}",
                    row.venue.as_str(),
                    row.pair.to_string(),
                    row.side.as_str(),
                    row.price.round_dp(6).to_string(),
                    row.amount.round_dp(6).to_string(),
                    row.spread_mid_bps.to_string(),
                    row.spread_cancel_bps.to_string(),
                    format_age(row.age)
                );
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Current total potential profit: {} ({} hedges, {} unhedged)",
            self.total_profit, self.hedge_count, self.unhedged_count
        );
        if self.halted {
            let _ = writeln!(out, "Quoting halted after an unhedged fill.");
        }
        out
    }
}

/// `HH:MM:SS`, or `n/a` for non-positive ages.
fn format_age(age: Duration) -> String {
    let secs = age.num_seconds();
    if secs <= 0 {
        return "n/a".to_string();
    }
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use rust_decimal_macros::dec;

    fn report(orders: Vec<RestingOrder>, now: DateTime<Utc>) -> StatusReport {
        let params = Config::default().xemm_params().unwrap();
        let mut profit = ProfitAccumulator::new();
        profit.record_hedge(dec!(1.5));

        StatusReport::build(StatusInputs {
            params: &params,
            quotes: MarketQuotes {
                taker_buy: dec!(100.10),
                taker_sell: dec!(100.00),
                maker_buy: dec!(100.50),
                maker_sell: dec!(99.50),
            },
            maker_mid: dec!(100.00),
            taker_mid: dec!(100.05),
            maker_orders: orders,
            balances: vec![BalanceRow {
                venue: params.maker.venue.clone(),
                asset: "USDT".to_string(),
                amount: dec!(1000),
            }],
            profit: &profit,
            halted: false,
            now,
        })
    }

    #[test]
    fn test_exchange_spreads_mirror_between_venues() {
        let status = report(Vec::new(), Utc::now());

        // (100.50 - 100.10) / 100 = 40 bps, (100.00 - 99.50) / 100 = 50 bps
        assert_eq!(status.exchanges[0].buy_spread_bps, dec!(40));
        assert_eq!(status.exchanges[0].sell_spread_bps, dec!(50));
        assert_eq!(status.exchanges[1].buy_spread_bps, dec!(-40));
        assert_eq!(status.exchanges[1].sell_spread_bps, dec!(-50));
        assert!(status.render().contains("No active maker orders."));
    }

    #[test]
    fn test_order_rows() {
        let now = Utc::now();
        let bid = RestingOrder {
            order_id: "okx-1".to_string(),
            pair: TradingPair::new("DOGE", "USDT"),
            side: OrderSide::Buy,
            price: dec!(99.68),
            quantity: dec!(10),
            created_at: now - Duration::seconds(75),
        };
        let status = report(vec![bid], now);

        let row = &status.orders[0];
        // (100 - 99.68) / 100
        assert_eq!(row.spread_mid_bps, dec!(32));
        // threshold 99.78: (99.78 - 99.68) / 99.78 = 10.02 bps
        assert_eq!(row.spread_cancel_bps, dec!(10));

        let text = status.render();
        assert!(text.contains("00:01:15"));
        assert!(text.contains("Current total potential profit: 1.5"));
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Duration::zero()), "n/a");
        assert_eq!(format_age(Duration::seconds(3725)), "01:02:05");
    }
}
