//! Venue integrations for cross-exchange market making.
//!
//! The strategy only sees venues through the `VenueAdapter` trait:
//! - Depth-aware pricing and mid price
//! - Balances and budget adjustment
//! - Order placement, cancellation and active-order snapshots
//!
//! `MockVenue` is the in-process paper-trading implementation used by the
//! `run` command and by the tests.

mod error;
pub mod mock;
mod traits;
mod types;

pub use error::{VenueError, VenueResult};
pub use mock::{MockVenue, PlacedOrder};
pub use traits::{VenueAdapter, VenueId, VenueRegistry};
pub use types::*;

#[cfg(test)]
pub use traits::MockVenueAdapter;
