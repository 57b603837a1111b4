use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A point on the globe in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Key used for caching, precise to roughly 11 metres
    fn cache_key(&self) -> String {
        format!("{:.4},{:.4}", self.latitude, self.longitude)
    }
}

impl Default for Coordinates {
    /// Dubai
    fn default() -> Self {
        Self::new(25.2048, 55.2708)
    }
}

/// City and country of a reverse-geocoded point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
    /// ISO 3166-1 alpha-2, upper case
    pub country_code: String,
}

impl Address {
    pub fn new(city: impl Into<String>, country_code: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            country_code: country_code.into().to_uppercase(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("Failed to send geocoding request")]
    Request(#[source] reqwest::Error),

    #[error("Geocoding API returned status: {0}")]
    Status(reqwest::StatusCode),

    #[error("Failed to parse geocoding response")]
    Parse(#[from] serde_json::Error),

    #[error("Geocoding response has no `{0}` field")]
    MissingField(&'static str),
}

/// Turns coordinates into an address
pub trait GeocodeFetcher: Send + Sync {
    fn reverse(&self, position: Coordinates) -> Result<Address, GeocodeError>;
}

/// Settings for [`NominatimClient`]
#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    /// Reverse geocoding endpoint
    pub endpoint: String,
    /// Applies to connecting and to the whole request
    pub timeout: Duration,
    /// Sent as `accept-language`, so names come back in this language
    pub language: String,
    /// Minimum gap between two outgoing requests (Nominatim allows 1/s)
    pub min_request_interval: Duration,
    /// How long a looked-up address stays cached
    pub cache_ttl: Duration,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org/reverse".to_string(),
            timeout: Duration::from_secs(30),
            language: "en".to_string(),
            min_request_interval: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Nominatim API response structure
#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    country_code: Option<String>,
}

/// Extract the address from a Nominatim `format=json` response body
pub fn parse_address(body: &str) -> Result<Address, GeocodeError> {
    let data: NominatimResponse = serde_json::from_str(body)?;
    let address = data.address.ok_or(GeocodeError::MissingField("address"))?;
    let city = address
        .city
        .ok_or(GeocodeError::MissingField("address.city"))?;
    let country_code = address
        .country_code
        .ok_or(GeocodeError::MissingField("address.country_code"))?;

    Ok(Address::new(city, country_code))
}

#[derive(Clone)]
struct CachedAddress {
    address: Address,
    cached_at: Instant,
}

/// Cached results plus the time the last request went out
struct GeocodeCache {
    entries: HashMap<String, CachedAddress>,
    next_slot: Option<Instant>,
}

impl GeocodeCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_slot: None,
        }
    }

    /// Get cached address or None if not cached/expired
    fn get(&self, position: &Coordinates, ttl: Duration) -> Option<Address> {
        self.entries
            .get(&position.cache_key())
            .filter(|cached| cached.cached_at.elapsed() < ttl)
            .map(|cached| cached.address.clone())
    }

    fn set(&mut self, position: &Coordinates, address: Address) {
        self.entries.insert(
            position.cache_key(),
            CachedAddress {
                address,
                cached_at: Instant::now(),
            },
        );
    }

    /// Book the next request slot and return how long to wait for it
    fn reserve_slot(&mut self, interval: Duration) -> Duration {
        let now = Instant::now();
        let slot = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_slot = Some(slot + interval);
        slot - now
    }
}

/// Reverse geocoder backed by the Nominatim HTTP API
pub struct NominatimClient {
    client: reqwest::blocking::Client,
    config: GeocoderConfig,
    cache: Mutex<GeocodeCache>,
}

impl NominatimClient {
    pub fn new(config: GeocoderConfig) -> Result<Self, GeocodeError> {
        // Nominatim requires an identifying User-Agent
        let user_agent = format!("geofuture/{}", env!("CARGO_PKG_VERSION"));

        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(GeocodeError::Client)?;

        Ok(Self {
            client,
            config,
            cache: Mutex::new(GeocodeCache::new()),
        })
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, GeocodeCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the actual API request to Nominatim
    fn request(&self, position: Coordinates) -> Result<Address, GeocodeError> {
        let delay = self.cache().reserve_slot(self.config.min_request_interval);
        if !delay.is_zero() {
            log::debug!("Throttling geocoding request for {:?}", delay);
            thread::sleep(delay);
        }

        log::debug!(
            "Geocoding {},{} via Nominatim",
            position.latitude,
            position.longitude
        );

        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[
                ("lat", position.latitude.to_string()),
                ("lon", position.longitude.to_string()),
                ("format", "json".to_string()),
            ])
            .header(reqwest::header::ACCEPT_LANGUAGE, &self.config.language)
            .send()
            .map_err(GeocodeError::Request)?;

        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status()));
        }

        let body = response.text().map_err(GeocodeError::Request)?;
        parse_address(&body)
    }
}

impl GeocodeFetcher for NominatimClient {
    fn reverse(&self, position: Coordinates) -> Result<Address, GeocodeError> {
        if let Some(cached) = self.cache().get(&position, self.config.cache_ttl) {
            log::debug!("Geocode cache hit for {}", position.cache_key());
            return Ok(cached);
        }

        match self.request(position) {
            Ok(address) => {
                self.cache().set(&position, address.clone());
                Ok(address)
            }
            Err(e) => {
                log::warn!("Geocoding failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Fetcher that answers every lookup with the same address, without I/O
#[derive(Debug, Clone)]
pub struct StaticFetcher {
    address: Address,
}

impl StaticFetcher {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new(Address::new("Dubai", "AE"))
    }
}

impl GeocodeFetcher for StaticFetcher {
    fn reverse(&self, _position: Coordinates) -> Result<Address, GeocodeError> {
        Ok(self.address.clone())
    }
}
