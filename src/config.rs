//! Client configuration and subscription endpoint construction.

use crate::error::{ClientError, Result};
use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use url::Url;

/// Path appended to the caller's endpoint.
pub const SUBSCRIBE_PATH: &str = "subscribe";

/// Query selecting the change-notification feed.
pub const EVENT_FEED_QUERY: &str = "eventNames=resource.change";

/// Default bound on frames buffered between transport and dispatch.
pub const DEFAULT_FRAME_BUFFER: usize = 256;

/// Event client configuration.
#[derive(Clone, Debug)]
pub struct EventClientConfig {
    /// Host and path of the API, with or without a scheme.
    pub url: String,

    pub access_key: Option<String>,

    pub secret_key: Option<String>,

    /// Use `wss` instead of `ws`.
    pub enable_ssl: bool,

    /// Max frames buffered before the transport stops reading.
    /// Default: 256
    pub frame_buffer: usize,
}

impl Default for EventClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            access_key: None,
            secret_key: None,
            enable_ssl: false,
            frame_buffer: DEFAULT_FRAME_BUFFER,
        }
    }
}

impl EventClientConfig {
    /// Plain (`ws`) config for `url`, without credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Like [`new`](Self::new), switching SSL on when `url` uses `https`.
    pub fn from_base_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let enable_ssl = Url::parse(&url)
            .map(|u| u.scheme().eq_ignore_ascii_case("https"))
            .unwrap_or(false);
        Self {
            url,
            enable_ssl,
            ..Default::default()
        }
    }

    /// Set both API keys. Supplying only one is rejected at connect.
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_ssl(mut self, enable_ssl: bool) -> Self {
        self.enable_ssl = enable_ssl;
        self
    }

    pub fn with_frame_buffer(mut self, frame_buffer: usize) -> Self {
        self.frame_buffer = frame_buffer;
        self
    }

    /// Validate and build the subscription endpoint.
    ///
    /// Any `scheme://` (or bare `//`) prefix on `url` is replaced by `ws://`
    /// or `wss://`, then `/subscribe?eventNames=resource.change` is appended.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let credentials = self.credentials()?;

        let host_and_path = strip_scheme(self.url.trim()).trim_end_matches('/');
        if host_and_path.is_empty() {
            return Err(ClientError::InvalidUrl("empty endpoint".to_string()));
        }

        let scheme = if self.enable_ssl { "wss" } else { "ws" };
        let url = Url::parse(&format!(
            "{}://{}/{}?{}",
            scheme, host_and_path, SUBSCRIBE_PATH, EVENT_FEED_QUERY
        ))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ClientError::InvalidUrl(format!("no host in {:?}", self.url)));
        }
        // Inline userinfo would leak into the request line; only the key
        // fields may carry credentials.
        if !url.username().is_empty() || url.password().is_some() {
            return Err(ClientError::InvalidUrl(
                "credentials must be given as access/secret keys".to_string(),
            ));
        }

        Ok(Endpoint { url, credentials })
    }

    fn credentials(&self) -> Result<Option<Credentials>> {
        let access = self.access_key.as_deref().filter(|s| !s.is_empty());
        let secret = self.secret_key.as_deref().filter(|s| !s.is_empty());
        match (access, secret) {
            (Some(access_key), Some(secret_key)) => Ok(Some(Credentials {
                access_key: access_key.to_string(),
                secret_key: secret_key.to_string(),
            })),
            (None, None) => Ok(None),
            _ => Err(ClientError::IncompleteCredentials),
        }
    }
}

/// Remove a leading `word:` + `//`, or a bare leading `//`.
fn strip_scheme(endpoint: &str) -> &str {
    if let Some(rest) = endpoint.strip_prefix("//") {
        return rest;
    }
    if let Some((scheme, rest)) = endpoint.split_once("://") {
        if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return rest;
        }
    }
    endpoint
}

/// API key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    /// `Authorization` header value (RFC 7617).
    pub fn basic_auth(&self) -> String {
        let encoded = general_purpose::STANDARD
            .encode(format!("{}:{}", self.access_key, self.secret_key).as_bytes());
        format!("Basic {}", encoded)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// A validated subscription target.
///
/// `url` never contains credentials; they are kept alongside so the
/// transport can choose how to present them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    credentials: Option<Credentials>,
}

impl Endpoint {
    /// Subscription URL without credentials.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// The subscription URL in its documented form, with
    /// `accessKey:secretKey@` inlined when credentials are set.
    ///
    /// Keys are percent-encoded as needed.
    pub fn subscription_url(&self) -> Result<Url> {
        let mut url = self.url.clone();
        if let Some(credentials) = &self.credentials {
            url.set_username(&credentials.access_key)
                .and_then(|_| url.set_password(Some(&credentials.secret_key)))
                .map_err(|_| ClientError::InvalidUrl("cannot carry credentials".to_string()))?;
        }
        Ok(url)
    }

    /// Subscription URL safe for logs.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        if let Some(credentials) = &self.credentials {
            let _ = url.set_username(&credentials.access_key);
            let _ = url.set_password(Some("redacted"));
        }
        url.to_string()
    }
}
