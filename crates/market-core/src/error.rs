use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::Source;

/// Why a fetch produced no usable value.
///
/// Fetchers never propagate these as panics or `Err` from the call itself;
/// they travel inside a [`FetchResult`] so every layer handles failure explicitly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{0} unavailable: no API key configured")]
    ProviderUnavailable(Source),

    #[error("{provider} timed out after {}ms", .timeout.as_millis())]
    ProviderTimeout { provider: Source, timeout: Duration },

    #[error("{provider} error: {message}")]
    ProviderError { provider: Source, message: String },

    #[error("all providers exhausted for {query} ({} attempts)", .attempts.len())]
    AllProvidersExhausted {
        query: String,
        attempts: Vec<FetchError>,
    },
}

/// Flat classification of a [`FetchError`], convenient for metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FetchErrorKind {
    ProviderUnavailable,
    ProviderTimeout,
    ProviderError,
    AllProvidersExhausted,
}

impl FetchError {
    pub fn provider_error(provider: Source, message: impl Into<String>) -> Self {
        FetchError::ProviderError {
            provider,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::ProviderUnavailable(_) => FetchErrorKind::ProviderUnavailable,
            FetchError::ProviderTimeout { .. } => FetchErrorKind::ProviderTimeout,
            FetchError::ProviderError { .. } => FetchErrorKind::ProviderError,
            FetchError::AllProvidersExhausted { .. } => FetchErrorKind::AllProvidersExhausted,
        }
    }

    /// Provider the error is attributed to, `Fallback` for an exhausted waterfall.
    pub fn provider(&self) -> Source {
        match self {
            FetchError::ProviderUnavailable(p) => *p,
            FetchError::ProviderTimeout { provider, .. } => *provider,
            FetchError::ProviderError { provider, .. } => *provider,
            FetchError::AllProvidersExhausted { .. } => Source::Fallback,
        }
    }
}

/// Outcome of one logical fetch: the value (or the failure) plus the source it is tagged with.
#[derive(Debug, Clone)]
pub struct FetchResult<T> {
    pub source: Source,
    pub outcome: Result<T, FetchError>,
    /// When the data itself was observed, if earlier than the fetch
    pub observed_at: Option<DateTime<Utc>>,
}

impl<T> FetchResult<T> {
    pub fn ok(source: Source, value: T) -> Self {
        Self {
            source,
            outcome: Ok(value),
            observed_at: None,
        }
    }

    pub fn from_result(source: Source, result: Result<T, FetchError>) -> Self {
        match result {
            Ok(value) => Self::ok(source, value),
            Err(error) => Self::failed(error),
        }
    }

    pub fn failed(error: FetchError) -> Self {
        Self {
            source: error.provider(),
            outcome: Err(error),
            observed_at: None,
        }
    }

    /// Result of an exhausted waterfall. Always tagged `Source::Fallback`.
    pub fn fallback(error: FetchError) -> Self {
        Self {
            source: Source::Fallback,
            outcome: Err(error),
            observed_at: None,
        }
    }

    /// Backdate the value, e.g. an aggregate built from parts fetched earlier.
    pub fn with_observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, FetchError> {
        self.outcome
    }
}

impl<T: Default> FetchResult<T> {
    /// The value, or the type's zero value when the fetch failed.
    /// Callers must check `source` before treating the zero value as data.
    pub fn value_or_default(self) -> T {
        self.outcome.unwrap_or_default()
    }
}
