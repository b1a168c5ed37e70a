//! Per-side quote lifecycle.
//!
//! Each side is either `Idle` or `Resting` one tracked maker order.
//! Transitions are applied as soon as the venue acknowledges a request.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;

use crate::exchange::{OrderId, OrderSide};

/// How many released orders are remembered for late fills.
const RELEASED_CAPACITY: usize = 8;

/// A maker order the engine placed and is still responsible for.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub order_id: OrderId,
    pub side: OrderSide,
    pub price: Decimal,
    pub original_quantity: Decimal,
    pub remaining: Decimal,
    pub created_at: DateTime<Utc>,
}

impl TrackedOrder {
    pub fn new(
        order_id: OrderId,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            side,
            price,
            original_quantity: quantity,
            remaining: quantity,
            created_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn filled(&self) -> Decimal {
        self.original_quantity - self.remaining
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum QuoteState {
    #[default]
    Idle,
    Resting(TrackedOrder),
}

impl QuoteState {
    pub fn is_idle(&self) -> bool {
        matches!(self, QuoteState::Idle)
    }

    pub fn tracked(&self) -> Option<&TrackedOrder> {
        match self {
            QuoteState::Idle => None,
            QuoteState::Resting(order) => Some(order),
        }
    }
}

/// What a fill did to the tracked order.
#[derive(Debug, Clone, PartialEq)]
pub enum FillProgress {
    /// Fully filled; the side is idle again.
    Complete(TrackedOrder),
    /// Still resting with this much left.
    Partial { remaining: Decimal },
}

/// Buy and sell quote state.
#[derive(Debug, Clone, Default)]
pub struct QuoteBook {
    buy: QuoteState,
    sell: QuoteState,
    /// Orders released without a cancel or a full fill, newest last
    released: VecDeque<TrackedOrder>,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, side: OrderSide) -> &QuoteState {
        match side {
            OrderSide::Buy => &self.buy,
            OrderSide::Sell => &self.sell,
        }
    }

    fn state_mut(&mut self, side: OrderSide) -> &mut QuoteState {
        match side {
            OrderSide::Buy => &mut self.buy,
            OrderSide::Sell => &mut self.sell,
        }
    }

    pub fn is_idle(&self, side: OrderSide) -> bool {
        self.state(side).is_idle()
    }

    pub fn tracked(&self, side: OrderSide) -> Option<&TrackedOrder> {
        self.state(side).tracked()
    }

    /// Whether `order_id` is the order tracked for `side`.
    pub fn is_tracked(&self, side: OrderSide, order_id: &str) -> bool {
        self.tracked(side).is_some_and(|o| o.order_id == order_id)
    }

    /// Whether `order_id` is tracked on either side.
    pub fn contains(&self, order_id: &str) -> bool {
        self.is_tracked(OrderSide::Buy, order_id) || self.is_tracked(OrderSide::Sell, order_id)
    }

    /// Start tracking a newly placed order. Returns false (and changes
    /// nothing) if the side already has one.
    pub fn mark_resting(&mut self, order: TrackedOrder) -> bool {
        let state = self.state_mut(order.side);
        if !state.is_idle() {
            return false;
        }
        *state = QuoteState::Resting(order);
        true
    }

    /// Stop tracking the side's order, returning it.
    pub fn release(&mut self, side: OrderSide) -> Option<TrackedOrder> {
        match std::mem::take(self.state_mut(side)) {
            QuoteState::Idle => None,
            QuoteState::Resting(order) => Some(order),
        }
    }

    /// Release the side's order but keep it around so a fill still in
    /// flight can be matched to it.
    pub fn forget(&mut self, side: OrderSide) -> Option<TrackedOrder> {
        let order = self.release(side)?;
        if self.released.len() == RELEASED_CAPACITY {
            self.released.pop_front();
        }
        self.released.push_back(order.clone());
        Some(order)
    }

    /// Whether `order_id` was released for `side` and may still fill.
    pub fn is_released(&self, side: OrderSide, order_id: &str) -> bool {
        self.released
            .iter()
            .any(|o| o.side == side && o.order_id == order_id)
    }

    /// Reduce a released order by a filled amount. Returns what is left, or
    /// `None` if the order is unknown. Fully filled orders are dropped.
    pub fn apply_released_fill(
        &mut self,
        side: OrderSide,
        order_id: &str,
        amount: Decimal,
    ) -> Option<Decimal> {
        let index = self
            .released
            .iter()
            .position(|o| o.side == side && o.order_id == order_id)?;
        let order = &mut self.released[index];
        order.remaining = (order.remaining - amount).max(Decimal::ZERO);
        let remaining = order.remaining;
        if remaining.is_zero() {
            self.released.remove(index);
        }
        Some(remaining)
    }

    /// Reduce the tracked order by a filled amount.
    ///
    /// Returns `None` when nothing is tracked for the side.
    pub fn apply_fill(&mut self, side: OrderSide, amount: Decimal) -> Option<FillProgress> {
        let state = self.state_mut(side);
        let QuoteState::Resting(order) = state else {
            return None;
        };

        order.remaining = (order.remaining - amount).max(Decimal::ZERO);
        if order.remaining > Decimal::ZERO {
            return Some(FillProgress::Partial {
                remaining: order.remaining,
            });
        }

        self.release(side).map(FillProgress::Complete)
    }

    /// Tracked orders, buy side first.
    pub fn resting(&self) -> impl Iterator<Item = &TrackedOrder> {
        self.buy.tracked().into_iter().chain(self.sell.tracked())
    }
}
