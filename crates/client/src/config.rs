//! Client configuration from environment variables.

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::ws::reconnect::BackoffPolicy;

/// Subscription endpoint of the home hub
pub const DEFAULT_ENDPOINT: &str = "ws://192.168.10.200:8090/subscriptions";

/// Subscription document sent in every `start` frame
pub const STATES_UPDATED_SUBSCRIPTION: &str = "subscription onStatesUpdated {
  onStatesUpdated {
    entityId
    entityType
    states {
      capability
      state
    }
  }
}";

/// Where credentials are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPlacement {
    /// Query parameters on the socket URL, read once per connection
    #[default]
    ConnectionParams,
    /// `extensions` of each `start` payload, read once per subscription
    SubscriptionExtensions,
}

impl AuthPlacement {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "params" | "connection" => Some(AuthPlacement::ConnectionParams),
            "extensions" | "subscription" => Some(AuthPlacement::SubscriptionExtensions),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub auth_placement: AuthPlacement,
    pub subscription_query: String,
    /// When set, the topic is sent as `variables.<name>`; otherwise
    /// `variables` is `null`.
    pub topic_variable: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            auth_placement: AuthPlacement::default(),
            subscription_query: STATES_UPDATED_SUBSCRIPTION.to_string(),
            topic_variable: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Build configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HOMEWIRE_WS_URL`: socket endpoint (default: `ws://192.168.10.200:8090/subscriptions`)
    /// - `HOMEWIRE_AUTH_PLACEMENT`: "params" | "extensions" (default: "params")
    /// - `HOMEWIRE_TOPIC_VARIABLE`: variable name carrying the topic (default: unset)
    /// - `HOMEWIRE_BACKOFF_INITIAL_MS`: first reconnect delay (default: 1000)
    /// - `HOMEWIRE_BACKOFF_MAX_MS`: reconnect delay cap (default: 32000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("HOMEWIRE_WS_URL") {
            config.endpoint = endpoint;
        }
        config.endpoint_url()?;

        if let Some(value) = lookup("HOMEWIRE_AUTH_PLACEMENT") {
            config.auth_placement =
                AuthPlacement::parse(&value).ok_or(ConfigError::Invalid {
                    var: "HOMEWIRE_AUTH_PLACEMENT",
                    value,
                })?;
        }

        config.topic_variable = lookup("HOMEWIRE_TOPIC_VARIABLE").filter(|v| !v.is_empty());

        if let Some(ms) = parse_millis(&lookup, "HOMEWIRE_BACKOFF_INITIAL_MS")? {
            config.backoff.initial = ms;
        }
        if let Some(ms) = parse_millis(&lookup, "HOMEWIRE_BACKOFF_MAX_MS")? {
            config.backoff.max = ms;
        }
        if config.backoff.initial.is_zero() || config.backoff.max < config.backoff.initial {
            return Err(ConfigError::Invalid {
                var: "HOMEWIRE_BACKOFF_MAX_MS",
                value: format!("{}", config.backoff.max.as_millis()),
            });
        }

        Ok(config)
    }

    /// Parse and check the endpoint; only `ws` and `wss` are accepted.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.endpoint).map_err(|e| ConfigError::Endpoint {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::Endpoint {
                endpoint: self.endpoint.clone(),
                reason: format!("unsupported scheme `{other}`"),
            }),
        }
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|_| ConfigError::Invalid { var, value })
}
