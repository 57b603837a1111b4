use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Failure, IllegalArgument};
use crate::geocoding::{Address, Coordinates, GeocodeFetcher};
use crate::pool::WorkerPool;
use crate::task::{guarded, Task};

/// Message carried by the deliberately failing lookup
pub const INJECTED_FAILURE: &str = "Here's Johny!";

/// Which way a branching lookup should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Success,
    Failure,
}

/// Decides between the success and the failure path of
/// [`LocationService::city_or_failure`]
pub trait OutcomeChooser: Send + Sync {
    fn choose(&self) -> Branch;
}

/// Always takes the same branch
#[derive(Debug, Clone, Copy)]
pub struct FixedChooser(pub Branch);

impl OutcomeChooser for FixedChooser {
    fn choose(&self) -> Branch {
        self.0
    }
}

/// Success first, then failure, then success again...
#[derive(Debug, Default)]
pub struct AlternatingChooser {
    next_fails: AtomicBool,
}

impl OutcomeChooser for AlternatingChooser {
    fn choose(&self) -> Branch {
        if self.next_fails.fetch_xor(true, Ordering::SeqCst) {
            Branch::Failure
        } else {
            Branch::Success
        }
    }
}

/// Hands out tasks that resolve parts of the address of one position
#[derive(Clone)]
pub struct LocationService {
    pool: WorkerPool,
    fetcher: Arc<dyn GeocodeFetcher>,
    position: Coordinates,
}

impl LocationService {
    pub fn new(pool: WorkerPool, fetcher: Arc<dyn GeocodeFetcher>, position: Coordinates) -> Self {
        Self {
            pool,
            fetcher,
            position,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn position(&self) -> Coordinates {
        self.position
    }

    /// Look up the whole address on a worker
    pub fn address(&self) -> Task<Address> {
        let fetcher = Arc::clone(&self.fetcher);
        let position = self.position;
        self.pool
            .try_supply_async(move || fetcher.reverse(position))
    }

    /// The city, computed by a task that runs the lookup itself
    pub fn city(&self) -> Task<String> {
        let fetcher = Arc::clone(&self.fetcher);
        let position = self.position;
        self.pool
            .try_supply_async(move || fetcher.reverse(position).map(|address| address.city))
    }

    /// The country code, pushed into an eagerly created handle by a pool job
    pub fn country(&self) -> Task<String> {
        let country = Task::pending();
        let producer = country.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let position = self.position;

        self.pool.execute(move || {
            let lookup = guarded(|| fetcher.reverse(position))
                .and_then(|result| result.map_err(Failure::new));
            producer.settle(lookup.map(|address| address.country_code));
        });

        country
    }

    /// A lookup that has already failed with a validation error
    pub fn failure(&self) -> Task<String> {
        Task::failed(IllegalArgument(INJECTED_FAILURE.to_string()))
    }

    /// [`city`](Self::city) or [`failure`](Self::failure), as `chooser` decides
    pub fn city_or_failure(&self, chooser: &dyn OutcomeChooser) -> Task<String> {
        match chooser.choose() {
            Branch::Success => self.city(),
            Branch::Failure => self.failure(),
        }
    }
}
