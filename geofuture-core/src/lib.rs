//! Composable asynchronous tasks on a shared worker pool.
//!
//! A [`Task`] is settled once with a value or a [`Failure`], and can be
//! chained with `map`, `flat_map`, `combine`, `handle` and the join barriers
//! [`Task::all_of`] and [`Task::join_all`]. Work runs on one injected
//! [`WorkerPool`].
//!
//! The [`LocationService`] and [`scenarios`] exercise all of it over a
//! reverse geocoding lookup.

// Internal modules (private)
mod error;
mod geocoding;
mod join;
mod lookup;
mod pool;
mod task;

pub mod scenarios;

// Re-export public types
pub use error::{CompletionError, Failure, FailureKind, IllegalArgument, Panicked};
pub use geocoding::{
    parse_address, Address, Coordinates, GeocodeError, GeocodeFetcher, GeocoderConfig,
    NominatimClient, StaticFetcher,
};
pub use lookup::{
    AlternatingChooser, Branch, FixedChooser, LocationService, OutcomeChooser, INJECTED_FAILURE,
};
pub use pool::WorkerPool;
pub use task::{Outcome, Task, TaskState};
