use std::time::Duration;

use super::client::HttpClient;

const USER_AGENT: &str = concat!("street_quality/", env!("CARGO_PKG_VERSION"));

/// Plain blocking client with connect/request timeouts. Timeouts surface as
/// source-unavailable errors; nothing is retried.
pub struct BasicClient(reqwest::blocking::Client);

impl BasicClient {
    pub fn new() -> reqwest::Result<Self> {
        Self::with_timeout(Duration::from_secs(180))
    }

    pub fn with_timeout(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self(client))
    }
}

impl HttpClient for BasicClient {
    fn execute(
        &self,
        req: reqwest::blocking::Request,
    ) -> reqwest::Result<reqwest::blocking::Response> {
        self.0.execute(req)
    }
}
