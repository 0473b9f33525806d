use reqwest::{cookie::Jar, header, Client};
use std::sync::Arc;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Builds the HTTP client an adapter owns for its whole lifetime.
///
/// The jar is shared with the caller so login code can verify that the portal
/// actually handed out its session cookie. Redirects stay on reqwest's default
/// policy; the SSO entry URL bounces through several hosts before the login
/// form appears.
pub fn create_http_client(user_agent: &str, cookie_jar: Arc<Jar>) -> Result<Client, reqwest::Error> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static("en-US,en;q=0.9,sv;q=0.8"),
    );

    let client = Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .cookie_provider(cookie_jar)
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    Ok(client)
}
