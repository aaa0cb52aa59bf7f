use reqwest::blocking::{Request, Response};

/// Blocking HTTP transport. Implemented by [`BasicClient`](super::BasicClient)
/// and by stubs in tests.
pub trait HttpClient: Send + Sync {
    fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
