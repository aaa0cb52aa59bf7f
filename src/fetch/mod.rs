//! Blocking HTTP fetches for remote sources (GeoJSON URLs, geocoding and
//! Overpass queries).

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use reqwest::Url;
use tracing::debug;

use crate::error::SourceUnavailableError;

/// GETs `url` and returns the body, failing on transport errors and
/// non-success statuses.
pub fn fetch_bytes<C: HttpClient>(
    client: &C,
    url: &str,
) -> Result<Vec<u8>, SourceUnavailableError> {
    let parsed = Url::parse(url).map_err(|e| SourceUnavailableError::new(url, e))?;
    fetch_url(client, parsed)
}

/// GETs `base` with `params` appended as query pairs.
pub fn fetch_with_query<C: HttpClient>(
    client: &C,
    base: &str,
    params: &[(&str, &str)],
) -> Result<Vec<u8>, SourceUnavailableError> {
    let mut url = Url::parse(base).map_err(|e| SourceUnavailableError::new(base, e))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in params {
            pairs.append_pair(name, value);
        }
    }
    fetch_url(client, url)
}

fn fetch_url<C: HttpClient>(client: &C, url: Url) -> Result<Vec<u8>, SourceUnavailableError> {
    let location = url.as_str().to_string();
    debug!(url = %location, "Fetching");
    let req = reqwest::blocking::Request::new(reqwest::Method::GET, url);
    let resp = client
        .execute(req)
        .and_then(|resp| resp.error_for_status())
        .map_err(|e| SourceUnavailableError::new(&location, e))?;
    let bytes = resp
        .bytes()
        .map_err(|e| SourceUnavailableError::new(&location, e))?;
    Ok(bytes.to_vec())
}
