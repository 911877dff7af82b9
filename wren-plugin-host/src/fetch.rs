//! Outbound HTTP capability for plugins.
//!
//! Each plugin gets its own [`Fetcher`] with a private cookie jar, so
//! sessions never leak between plugins. Requests default to GET and carry a
//! generated user agent identifying the host build and the plugin; a script
//! that sets its own `User-Agent` header wins.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Method;

use crate::error::HostError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request options scripts may pass to `fetch`.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Option<String>,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Cookie handling is opt-out.
    pub handle_cookies: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: None,
            body: None,
            headers: Vec::new(),
            handle_cookies: true,
        }
    }
}

/// Response surfaced back to the script.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: String,
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Per-plugin HTTP client pair: one with a cookie jar, one without.
pub struct Fetcher {
    with_cookies: Client,
    without_cookies: Client,
}

impl Fetcher {
    pub fn new(plugin_name: &str, plugin_version: &str) -> Result<Self, HostError> {
        let ua = user_agent(plugin_name, plugin_version);
        let with_cookies = Client::builder()
            .user_agent(&ua)
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| HostError::Network(err.to_string()))?;
        let without_cookies = Client::builder()
            .user_agent(&ua)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| HostError::Network(err.to_string()))?;
        Ok(Self {
            with_cookies,
            without_cookies,
        })
    }

    pub fn fetch(&self, url: &str, opts: FetchOptions) -> Result<FetchResponse, HostError> {
        let method = match opts.method.as_deref() {
            None | Some("") => Method::GET,
            Some(name) => Method::from_bytes(name.to_uppercase().as_bytes())
                .map_err(|_| HostError::Network(format!("invalid method: {name}")))?,
        };
        let client = if opts.handle_cookies {
            &self.with_cookies
        } else {
            &self.without_cookies
        };

        let mut request = client.request(method, url);
        if let Some(body) = opts.body {
            request = request.body(body);
        }
        for (key, value) in &opts.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .map_err(|err| HostError::Network(err.to_string()))?;

        let status = response.status();
        let status_line = match status.canonical_reason() {
            Some(reason) => format!("{} {reason}", status.as_u16()),
            None => status.as_u16().to_string(),
        };
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|err| HostError::Network(err.to_string()))?
            .to_vec();

        Ok(FetchResponse {
            status: status_line,
            status_code: status.as_u16(),
            headers,
            body,
        })
    }
}

/// Builds the per-plugin user agent from build-time vcs information.
pub fn user_agent(plugin_name: &str, plugin_version: &str) -> String {
    let commit = option_env!("WREN_BUILD_COMMIT").unwrap_or("unknown");
    let modified = match option_env!("WREN_BUILD_MODIFIED") {
        Some("true") => "modified",
        _ => "unmodified",
    };
    format!("wren/{commit} ({modified}; {plugin_name}/{plugin_version})")
}
