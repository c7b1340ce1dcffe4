use std::time::Duration;

use reqwest::Client;

use crate::error::PlatformError;

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Request timeout shared by GraphQL, usher and segment requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client shared by the resolver, the manifest reader and the
/// segment fetcher.
pub fn default_client() -> Result<Client, PlatformError> {
    let client = Client::builder()
        .user_agent(DEFAULT_UA)
        .timeout(DEFAULT_TIMEOUT)
        .build()?;
    Ok(client)
}
