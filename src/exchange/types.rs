//! Venue-neutral order, fill and book types.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::VenueError;

/// Venue-assigned client order id.
pub type OrderId = String;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn is_buy(&self) -> bool {
        matches!(self, OrderSide::Buy)
    }

    /// The side that offsets this one.
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// A `BASE-QUOTE` trading pair, e.g. `DOGE-USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Asset spent when buying (the quote asset).
    pub fn buy_asset(&self) -> &str {
        &self.quote
    }

    /// Asset spent when selling (the base asset).
    pub fn sell_asset(&self) -> &str {
        &self.base
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = VenueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('-') {
            Some((base, quote))
                if !base.is_empty() && !quote.is_empty() && !quote.contains('-') =>
            {
                Ok(TradingPair::new(base.to_uppercase(), quote.to_uppercase()))
            }
            _ => Err(VenueError::UnknownPair(s.to_string())),
        }
    }
}

/// Proposed order passed through a venue's budget checker before placement.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderCandidate {
    pub pair: TradingPair,
    pub is_maker: bool,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Decimal,
}

impl OrderCandidate {
    /// Limit order candidate.
    pub fn limit(pair: TradingPair, is_maker: bool, side: OrderSide, amount: Decimal, price: Decimal) -> Self {
        Self {
            pair,
            is_maker,
            order_type: OrderType::Limit,
            side,
            amount,
            price,
        }
    }

    /// Same candidate with a different amount.
    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = amount;
        self
    }
}

/// A live order resting on a venue.
#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub order_id: OrderId,
    pub pair: TradingPair,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

impl RestingOrder {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// Execution report pushed by a venue when one of our orders trades.
#[derive(Debug, Clone, PartialEq)]
pub struct FillEvent {
    pub order_id: OrderId,
    pub pair: TradingPair,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self { price, amount }
    }
}

/// Top-of-book snapshot: bids best-first (descending), asks best-first (ascending).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub pair: TradingPair,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Keep at most `depth` levels per side.
    pub fn truncated(mut self, depth: usize) -> Self {
        self.bids.truncate(depth);
        self.asks.truncate(depth);
        self
    }
}

/// A print on the public tape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicTrade {
    pub pair: TradingPair,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub amount: Decimal,
    pub side: OrderSide,
    /// Whether the trade was taken by an aggressing order.
    pub is_aggressive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_parsing() {
        let pair: TradingPair = "doge-usdt".parse().unwrap();
        assert_eq!(pair.base, "DOGE");
        assert_eq!(pair.quote, "USDT");
        assert_eq!(pair.to_string(), "DOGE-USDT");
        assert_eq!(pair.buy_asset(), "USDT");
        assert_eq!(pair.sell_asset(), "DOGE");
    }

    #[test]
    fn test_pair_parsing_rejects_malformed() {
        assert!("DOGEUSDT".parse::<TradingPair>().is_err());
        assert!("-USDT".parse::<TradingPair>().is_err());
        assert!("A-B-C".parse::<TradingPair>().is_err());
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert!(OrderSide::Buy.is_buy());
        assert_eq!(OrderSide::Sell.to_string(), "sell");
    }
}
