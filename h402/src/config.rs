//! Client-side payment policy.
//!
//! [`NegotiatorConfig`] can be deserialized from any serde format, built in
//! code, or read from the environment:
//!
//! | variable            | field                  |
//! |---------------------|------------------------|
//! | `H402_AUTO_PAY`     | `auto_pay`             |
//! | `H402_MAX_AMOUNT`   | `max_amount`           |
//! | `H402_TIMEOUT_SECS` | `request_timeout_secs` |
//! | `H402_VALIDITY_SECS`| `default_validity_secs`|

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::amount::TokenAmount;
use crate::error::{Classify, ErrorClass};

/// Environment variable toggling automatic payment.
pub const ENV_AUTO_PAY: &str = "H402_AUTO_PAY";
/// Environment variable holding the per-request spending cap.
pub const ENV_MAX_AMOUNT: &str = "H402_MAX_AMOUNT";
/// Environment variable holding the per-call timeout in seconds.
pub const ENV_TIMEOUT_SECS: &str = "H402_TIMEOUT_SECS";
/// Environment variable holding the default payload validity in seconds.
pub const ENV_VALIDITY_SECS: &str = "H402_VALIDITY_SECS";

/// Policy applied by the client negotiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NegotiatorConfig {
    /// Pay 402 responses without asking. When `false` the decoded
    /// requirements are handed back to the caller.
    pub auto_pay: bool,
    /// Largest amount paid without asking. `None` means no cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<TokenAmount>,
    /// Timeout for each network call (request, retry) and each signer call.
    pub request_timeout_secs: u64,
    /// Payload lifetime used when the requirements carry no expiry.
    pub default_validity_secs: u64,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            auto_pay: true,
            max_amount: None,
            request_timeout_secs: 30,
            default_validity_secs: 300,
        }
    }
}

/// An environment variable held a value that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid value for {var}: {value:?} ({reason})")]
pub struct ConfigError {
    /// Variable name.
    pub var: &'static str,
    /// Raw value.
    pub value: String,
    /// Parser message.
    pub reason: String,
}

impl Classify for ConfigError {
    fn class(&self) -> ErrorClass {
        ErrorClass::MalformedInput
    }
}

impl NegotiatorConfig {
    /// Defaults overlaid with the `H402_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a value is present but malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_AUTO_PAY) {
            config.auto_pay = parse_bool(ENV_AUTO_PAY, value)?;
        }
        if let Some(value) = lookup(ENV_MAX_AMOUNT) {
            config.max_amount = Some(parse(ENV_MAX_AMOUNT, value)?);
        }
        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            config.request_timeout_secs = parse(ENV_TIMEOUT_SECS, value)?;
        }
        if let Some(value) = lookup(ENV_VALIDITY_SECS) {
            config.default_validity_secs = parse(ENV_VALIDITY_SECS, value)?;
        }
        Ok(config)
    }

    /// Sets `auto_pay`.
    #[must_use]
    pub const fn with_auto_pay(mut self, auto_pay: bool) -> Self {
        self.auto_pay = auto_pay;
        self
    }

    /// Sets the spending cap.
    #[must_use]
    pub fn with_max_amount(mut self, max_amount: impl Into<TokenAmount>) -> Self {
        self.max_amount = Some(max_amount.into());
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Per-call timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let parsed = value.trim().parse::<T>();
    parsed.map_err(|e| ConfigError {
        var,
        reason: e.to_string(),
        value,
    })
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            var,
            value,
            reason: "expected a boolean".into(),
        }),
    }
}
