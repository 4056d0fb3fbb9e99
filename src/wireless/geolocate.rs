//! Two-stage HTTP geolocation: IP lookup for coordinates, then elevation
//!
//! Both round-trips share one client handle. Either stage failing aborts the
//! whole resolution; no partial result is ever surfaced.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

/// Default IP-geolocation endpoint
pub const DEFAULT_LOCATE_URL: &str = "http://ipinfo.io/json";

/// Default elevation-query endpoint
pub const DEFAULT_ELEVATION_URL: &str = "https://nationalmap.gov/epqs/pqs.php";

/// Responses larger than this are rejected outright instead of truncated
const MAX_RESPONSE_BYTES: u64 = 64 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Response is missing the \"{0}\" field")]
    MissingField(&'static str),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Response too large ({0} bytes)")]
    Oversized(u64),
}

/// Resolved device location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
}

/// Resolves coordinates and elevation over one reusable HTTP client
pub struct GeoLocationResolver {
    http: reqwest::Client,
    locate_url: String,
    elevation_url: String,
}

impl GeoLocationResolver {
    pub fn new(locate_url: String, elevation_url: String) -> Result<Self, GeoError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            locate_url,
            elevation_url,
        })
    }

    /// Latitude, longitude and elevation (meters), or nothing at all
    pub async fn resolve(&self) -> Result<GeoLocation, GeoError> {
        let body = self.fetch_json(&self.locate_url).await?;
        let (latitude, longitude) = parse_coordinates(&body)?;
        info!("Resolved coordinates: {:.4}, {:.4}", latitude, longitude);

        let url = elevation_query_url(&self.elevation_url, latitude, longitude);
        let body = self.fetch_json(&url).await?;
        let elevation_m = parse_elevation(&body)?;
        info!("Resolved elevation: {:.1} m", elevation_m);

        Ok(GeoLocation {
            latitude,
            longitude,
            elevation_m,
        })
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, GeoError> {
        let mut response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            // a bad status is only a warning; the parse decides
            warn!("Geolocation response status: {} for {}", status, url);
        }
        // the Content-Length header is advisory and absent on chunked
        // responses; the cap is enforced on the bytes actually read
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let total = (body.len() + chunk.len()) as u64;
            if total > MAX_RESPONSE_BYTES {
                return Err(GeoError::Oversized(total));
            }
            body.extend_from_slice(&chunk);
        }
        serde_json::from_slice(&body).map_err(|e| GeoError::Malformed(e.to_string()))
    }
}

/// Extract `"loc": "<lat>,<lon>"` as decimal degrees
fn parse_coordinates(body: &Value) -> Result<(f64, f64), GeoError> {
    let loc = body
        .get("loc")
        .and_then(Value::as_str)
        .ok_or(GeoError::MissingField("loc"))?;
    let (lat, lon) = loc
        .split_once(',')
        .ok_or_else(|| GeoError::Malformed(format!("loc is not \"lat,lon\": {loc:?}")))?;
    let latitude: f64 = lat
        .trim()
        .parse()
        .map_err(|_| GeoError::Malformed(format!("bad latitude: {lat:?}")))?;
    let longitude: f64 = lon
        .trim()
        .parse()
        .map_err(|_| GeoError::Malformed(format!("bad longitude: {lon:?}")))?;
    Ok((latitude, longitude))
}

/// Elevation query with longitude/latitude at 6-decimal precision
fn elevation_query_url(base: &str, latitude: f64, longitude: f64) -> String {
    format!("{base}?x={longitude:.6}&y={latitude:.6}&units=Meters&output=json")
}

/// Walk `USGS_Elevation_Point_Query_Service -> Elevation_Query -> Elevation`
fn parse_elevation(body: &Value) -> Result<f64, GeoError> {
    body.get("USGS_Elevation_Point_Query_Service")
        .ok_or(GeoError::MissingField("USGS_Elevation_Point_Query_Service"))?
        .get("Elevation_Query")
        .ok_or(GeoError::MissingField("Elevation_Query"))?
        .get("Elevation")
        .ok_or(GeoError::MissingField("Elevation"))?
        .as_f64()
        .ok_or_else(|| GeoError::Malformed("Elevation is not a number".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coordinates_parse_from_loc_field() {
        let body = json!({"loc": "47.6062,-122.3321", "city": "Seattle"});
        let (lat, lon) = parse_coordinates(&body).unwrap();
        assert_eq!(lat, 47.6062);
        assert_eq!(lon, -122.3321);
    }

    #[test]
    fn missing_loc_field_is_a_parse_failure() {
        let body = json!({"city": "Seattle"});
        assert!(matches!(
            parse_coordinates(&body),
            Err(GeoError::MissingField("loc"))
        ));
    }

    #[test]
    fn unparsable_loc_field_is_a_parse_failure() {
        let body = json!({"loc": "not-coordinates"});
        assert!(matches!(parse_coordinates(&body), Err(GeoError::Malformed(_))));
    }

    #[test]
    fn elevation_url_uses_six_decimal_places() {
        let url = elevation_query_url(DEFAULT_ELEVATION_URL, 47.6062, -122.3321);
        assert_eq!(
            url,
            "https://nationalmap.gov/epqs/pqs.php?x=-122.332100&y=47.606200&units=Meters&output=json"
        );
    }

    #[test]
    fn elevation_parses_the_nested_path() {
        let body = json!({
            "USGS_Elevation_Point_Query_Service": {
                "Elevation_Query": {"Elevation": 56.77}
            }
        });
        assert_eq!(parse_elevation(&body).unwrap(), 56.77);
    }

    #[test]
    fn missing_intermediate_node_is_a_failure_not_a_zero() {
        let body = json!({"USGS_Elevation_Point_Query_Service": {}});
        assert!(matches!(
            parse_elevation(&body),
            Err(GeoError::MissingField("Elevation_Query"))
        ));
    }

    #[tokio::test]
    async fn resolver_walks_both_stages() {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"loc": "47.6062,-122.3321"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/epqs/pqs.php"))
            .and(query_param("x", "-122.332100"))
            .and(query_param("y", "47.606200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "USGS_Elevation_Point_Query_Service": {
                    "Elevation_Query": {"Elevation": 56.77}
                }
            })))
            .mount(&server)
            .await;

        let resolver = GeoLocationResolver::new(
            format!("{}/json", server.uri()),
            format!("{}/epqs/pqs.php", server.uri()),
        )
        .unwrap();
        let location = resolver.resolve().await.unwrap();
        assert_eq!(location.latitude, 47.6062);
        assert_eq!(location.longitude, -122.3321);
        assert_eq!(location.elevation_m, 56.77);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_not_buffered() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let padding = "9".repeat(2 * MAX_RESPONSE_BYTES as usize);
        let body = format!("{{\"loc\": \"{padding}\"}}");
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "application/json"),
            )
            .mount(&server)
            .await;

        let resolver = GeoLocationResolver::new(
            format!("{}/json", server.uri()),
            format!("{}/epqs/pqs.php", server.uri()),
        )
        .unwrap();
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, GeoError::Oversized(_)));
    }

    #[tokio::test]
    async fn unparsable_body_is_a_malformed_failure() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"not json".to_vec(), "application/json"),
            )
            .mount(&server)
            .await;

        let resolver = GeoLocationResolver::new(
            format!("{}/json", server.uri()),
            format!("{}/epqs/pqs.php", server.uri()),
        )
        .unwrap();
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, GeoError::Malformed(_)));
    }

    #[tokio::test]
    async fn second_stage_failure_yields_no_partial_result() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"loc": "47.6062,-122.3321"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/epqs/pqs.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"USGS_Elevation_Point_Query_Service": {}})),
            )
            .mount(&server)
            .await;

        let resolver = GeoLocationResolver::new(
            format!("{}/json", server.uri()),
            format!("{}/epqs/pqs.php", server.uri()),
        )
        .unwrap();
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, GeoError::MissingField("Elevation_Query")));
    }
}
