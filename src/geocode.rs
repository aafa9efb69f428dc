// 🌍 Geocode Client - one address in, one outcome out
//
// Outcomes are explicit so the engine can tell apart:
//   Found / NotFound    the provider answered (counts against quota)
//   TransientFailure    the provider was never reached or answered garbage
//   Fatal               the request could not even be built
//
// The HTTP adapter speaks the Mapbox geocoding v5 dialect:
//   GET {base}/{address}.json?access_token=...&limit=1
//   → { "features": [ { "geometry": { "coordinates": [lon, lat] } } ] }

use crate::config::Config;
use crate::error::{ReconcileError, Result};
use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    Found(Coordinates),
    NotFound,
    TransientFailure(String),
    Fatal(String),
}

impl GeocodeOutcome {
    /// Whether the call reached the provider and got an answer
    pub fn reached_provider(&self) -> bool {
        matches!(self, GeocodeOutcome::Found(_) | GeocodeOutcome::NotFound)
    }
}

pub trait Geocoder {
    fn geocode(&self, address: &str) -> GeocodeOutcome;
}

// ============================================================================
// RESPONSE BODY
// ============================================================================

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<f64>,
}

/// Interpret a decoded body: first feature wins, empty means not found
fn outcome_from_body(body: FeatureCollection) -> GeocodeOutcome {
    let Some(feature) = body.features.into_iter().next() else {
        return GeocodeOutcome::NotFound;
    };

    match feature.geometry.coordinates.as_slice() {
        [longitude, latitude, ..] => {
            let coordinates = Coordinates {
                latitude: *latitude,
                longitude: *longitude,
            };
            if coordinates.is_valid() {
                GeocodeOutcome::Found(coordinates)
            } else {
                GeocodeOutcome::TransientFailure(format!(
                    "coordinates out of range: [{}, {}]",
                    longitude, latitude
                ))
            }
        }
        _ => GeocodeOutcome::TransientFailure("feature without a coordinate pair".to_string()),
    }
}

// ============================================================================
// MAPBOX CLIENT
// ============================================================================

pub struct MapboxClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl MapboxClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReconcileError::config(format!("failed to build HTTP client: {}", e)))?;

        MapboxClient::with_client(http, base_url, api_key)
    }

    /// Use a preconfigured HTTP client (proxy, TLS, timeouts)
    pub fn with_client(http: Client, base_url: &str, api_key: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ReconcileError::config(format!("invalid geocoding URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ReconcileError::config(format!(
                "geocoding URL '{}' cannot carry a path",
                base_url
            )));
        }

        Ok(MapboxClient {
            http,
            base_url,
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        MapboxClient::new(
            &config.api_base_url,
            config.require_api_key()?,
            config.http_timeout,
        )
    }

    fn request_url(&self, address: &str) -> std::result::Result<Url, String> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| "geocoding URL cannot carry a path".to_string())?
            .pop_if_empty()
            .push(&format!("{}.json", address));
        url.query_pairs_mut()
            .append_pair("access_token", &self.api_key)
            .append_pair("limit", "1");
        Ok(url)
    }
}

impl Geocoder for MapboxClient {
    fn geocode(&self, address: &str) -> GeocodeOutcome {
        if address.trim().is_empty() {
            return GeocodeOutcome::Fatal("empty address".to_string());
        }

        let url = match self.request_url(address) {
            Ok(url) => url,
            Err(reason) => return GeocodeOutcome::Fatal(reason),
        };

        let response = match self.http.get(url).send() {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return GeocodeOutcome::TransientFailure("request timed out".to_string())
            }
            // Strip the URL: it carries the access token
            Err(e) => return GeocodeOutcome::TransientFailure(e.without_url().to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return GeocodeOutcome::TransientFailure(format!("provider returned {}", status));
        }

        match response.json::<FeatureCollection>() {
            Ok(body) => {
                let outcome = outcome_from_body(body);
                debug!(address, ?outcome, "geocode response");
                outcome
            }
            Err(e) => GeocodeOutcome::TransientFailure(format!(
                "malformed response body: {}",
                e.without_url()
            )),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
