//! Credentials supplied by the host application.
//!
//! The client never acquires or refreshes credentials. It asks its
//! [`CredentialSource`] every time it opens a socket or starts a subscription
//! and attaches whatever it gets back.

use serde_json::{json, Value};
use url::Url;

/// Auth token plus the hub the token is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub host: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            host: host.into(),
        }
    }

    /// Encode as URL query parameters
    pub fn to_query_string(&self) -> String {
        format!(
            "authorization={}&host={}",
            urlencoding::encode(&self.token),
            urlencoding::encode(&self.host)
        )
    }

    /// Encode as `start` payload extensions
    pub fn to_extensions(&self) -> Value {
        json!({
            "authorization": {
                "Authorization": self.token,
                "host": self.host,
            }
        })
    }
}

/// Supplies the current credentials, if any.
pub trait CredentialSource: Send + Sync + 'static {
    fn current(&self) -> Option<Credentials>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<Credentials> + Send + Sync + 'static,
{
    fn current(&self) -> Option<Credentials> {
        self()
    }
}

/// For hubs that accept unauthenticated sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    fn current(&self) -> Option<Credentials> {
        None
    }
}

/// Socket URL with credentials appended as query parameters.
pub fn authorized_url(endpoint: &Url, credentials: Option<&Credentials>) -> String {
    let Some(credentials) = credentials else {
        return endpoint.to_string();
    };
    let auth = credentials.to_query_string();
    let query = match endpoint.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{auth}"),
        _ => auth,
    };
    let mut url = endpoint.clone();
    url.set_query(Some(&query));
    url.to_string()
}
