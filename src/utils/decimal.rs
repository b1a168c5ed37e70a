//! Decimal helpers for quote and hedge pricing.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Convert basis points to a decimal rate (32 bps -> 0.0032).
pub fn from_basis_points(bps: Decimal) -> Decimal {
    bps / dec!(10000)
}

/// Convert a decimal rate to basis points.
pub fn to_basis_points(rate: Decimal) -> Decimal {
    rate * dec!(10000)
}

/// Shift a price down by `bps` basis points: `price * (1 - bps/10000)`.
pub fn below_by_bps(price: Decimal, bps: Decimal) -> Decimal {
    price * (Decimal::ONE - from_basis_points(bps))
}

/// Shift a price up by `bps` basis points: `price * (1 + bps/10000)`.
pub fn above_by_bps(price: Decimal, bps: Decimal) -> Decimal {
    price * (Decimal::ONE + from_basis_points(bps))
}

/// Distance of `a` over `b` expressed in basis points of `reference`.
pub fn spread_bps(a: Decimal, b: Decimal, reference: Decimal) -> Decimal {
    to_basis_points(safe_div(a - b, reference))
}

/// Round to the nearest multiple of `tick_size` (midpoint away from zero).
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * tick_size
}

/// Round down to a multiple of `tick_size`. Zero tick leaves the value as is.
pub fn round_down_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).floor() * tick_size
}

/// Round up to a multiple of `tick_size`. Zero tick leaves the value as is.
pub fn round_up_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).ceil() * tick_size
}

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    round_down_to_tick(value, lot_size)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}
