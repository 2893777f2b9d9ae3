//! Reverse geocoding: convert coordinates to human-readable place names.
//! Uses Nominatim (OpenStreetMap) - free, no API key required.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tunecast_core::LocationError;

use crate::types::{PlaceAddress, Position};

const USER_AGENT: &str = "Tunecast/0.1.0";

/// Reverse geocoding service.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Candidate addresses for a position, best match first. May be empty.
    async fn reverse(&self, position: Position) -> Result<Vec<PlaceAddress>, LocationError>;
}

/// First non-empty preferred name across the candidates
pub fn preferred_place_name(addresses: &[PlaceAddress]) -> Option<String> {
    addresses
        .iter()
        .find_map(PlaceAddress::preferred_name)
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    city_district: Option<String>,
    suburb: Option<String>,
    county: Option<String>,
    state_district: Option<String>,
    state: Option<String>,
}

impl From<NominatimAddress> for PlaceAddress {
    fn from(addr: NominatimAddress) -> Self {
        PlaceAddress {
            city: addr
                .city
                .or(addr.town)
                .or(addr.village)
                .or(addr.municipality),
            district: addr.city_district.or(addr.suburb),
            subregion: addr.county.or(addr.state_district),
            region: addr.state,
        }
    }
}

/// Nominatim-backed [`Geocoder`].
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, LocationError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LocationError::GeocodeFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn reverse(&self, position: Position) -> Result<Vec<PlaceAddress>, LocationError> {
        let url = format!(
            "{}?lat={}&lon={}&format=json&addressdetails=1&zoom=10",
            self.base_url, position.latitude, position.longitude
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LocationError::GeocodeFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LocationError::GeocodeFailed(format!(
                "Reverse geocode returned status {}",
                response.status()
            )));
        }

        let body: NominatimResponse = response
            .json()
            .await
            .map_err(|e| LocationError::GeocodeFailed(e.to_string()))?;

        let addresses: Vec<PlaceAddress> = body.address.map(PlaceAddress::from).into_iter().collect();
        tracing::debug!("Reverse geocoded to {} candidate(s)", addresses.len());
        Ok(addresses)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn geocoder(server: &MockServer) -> NominatimGeocoder {
        NominatimGeocoder::with_base_url(&format!("{}/reverse", server.uri()), Duration::from_secs(2))
            .unwrap()
    }

    #[tokio::test]
    async fn test_reverse_prefers_town_as_city() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reverse"))
            .and(query_param("lat", "47.6062"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "display_name": "Somewhere",
                "address": {"town": "Issaquah", "county": "King County", "state": "Washington"}
            })))
            .mount(&server)
            .await;

        let addresses = geocoder(&server)
            .reverse(Position::new(47.6062, -122.3321))
            .await
            .unwrap();

        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].city.as_deref(), Some("Issaquah"));
        assert_eq!(addresses[0].subregion.as_deref(), Some("King County"));
        assert_eq!(preferred_place_name(&addresses).as_deref(), Some("Issaquah"));
    }

    #[tokio::test]
    async fn test_reverse_without_address_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reverse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "Unable to geocode"
            })))
            .mount(&server)
            .await;

        let addresses = geocoder(&server).reverse(Position::new(0.0, 0.0)).await.unwrap();
        assert!(addresses.is_empty());
        assert!(preferred_place_name(&addresses).is_none());
    }

    #[tokio::test]
    async fn test_reverse_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reverse"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = geocoder(&server).reverse(Position::new(1.0, 1.0)).await;
        assert!(matches!(result, Err(LocationError::GeocodeFailed(_))));
    }

    #[test]
    fn test_preferred_name_skips_empty_candidates() {
        let addresses = vec![
            PlaceAddress::default(),
            PlaceAddress {
                region: Some("Quang Ninh".into()),
                ..Default::default()
            },
        ];
        assert_eq!(preferred_place_name(&addresses).as_deref(), Some("Quang Ninh"));
    }
}
