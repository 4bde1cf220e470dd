//! The assessment server: an HTTP front for the [Aggregator], backed by workers that share its
//! coordination store.

pub mod aggregator;
pub use aggregator::{Aggregator, AggregatorOptions, AssessError};
pub mod routes;
pub use routes::{router, ApiError};
