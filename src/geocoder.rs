//! Reverse geocoding of shared locations.
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::Coordinates;

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Human readable address for the point, in `language_code`.
    async fn reverse_geocode(&self, coordinates: Coordinates, language_code: &str)
        -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
    error: Option<String>,
}

/// Client for the Nominatim `/reverse` endpoint.
#[derive(Debug, Clone)]
pub struct NominatimClient {
    http: Client,
    base_url: Url,
}

impl NominatimClient {
    pub fn new(base_url: Url, user_agent: &str) -> Result<Self> {
        let http = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { http, base_url })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.geocoder.base_url)
            .map_err(|e| Error::Geocoder(format!("invalid geocoder base url: {}", e)))?;
        Self::new(base_url, &cfg.geocoder.user_agent)
    }

    pub fn build_request(
        &self,
        coordinates: Coordinates,
        language_code: &str,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("reverse")
            .map_err(|e| Error::Geocoder(format!("invalid geocoder base url: {}", e)))?;
        Ok(self
            .http
            .get(endpoint)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", coordinates.latitude.to_string()),
                ("lon", coordinates.longitude.to_string()),
                ("accept-language", language_code.to_string()),
            ])
            .build()?)
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    #[instrument(skip_all, fields(lat = coordinates.latitude, lon = coordinates.longitude))]
    async fn reverse_geocode(
        &self,
        coordinates: Coordinates,
        language_code: &str,
    ) -> Result<String> {
        let request = self.build_request(coordinates, language_code)?;
        debug!(url = %request.url(), "reverse geocoding");
        let res = self.http.execute(request).await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "geocoder error: {}", body);
            return Err(Error::Geocoder(format!("geocoder returned {}", status)));
        }

        let payload: ReverseResponse = res.json().await?;
        match (payload.display_name, payload.error) {
            (Some(address), _) if !address.trim().is_empty() => Ok(address),
            (_, Some(error)) => Err(Error::Geocoder(error)),
            _ => Err(Error::Geocoder("empty reverse geocoding result".into())),
        }
    }
}
