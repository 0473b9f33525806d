use thiserror::Error;

/// Failure of a single provider call. None of these are retried; a site that
/// changed layout or rejected a login stays broken for the rest of the run.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected page layout: {0}")]
    Parse(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("no such room in the provider catalog: {0}")]
    UnknownRoom(String),

    #[error("provider call timed out")]
    TimedOut,
}

impl ProviderError {
    pub fn parse(msg: impl Into<String>) -> Self {
        ProviderError::Parse(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        ProviderError::Auth(msg.into())
    }
}

/// A provider failure tagged with the provider it came from; fan-out calls
/// collect one of these per failing provider.
#[derive(Debug, Error)]
#[error("provider {provider}: {source}")]
pub struct ServiceError {
    pub provider: String,
    #[source]
    pub source: ProviderError,
}

impl ServiceError {
    pub fn new(provider: impl Into<String>, source: ProviderError) -> Self {
        Self {
            provider: provider.into(),
            source,
        }
    }
}

/// Errors surfaced by the directory itself, as opposed to a single provider.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("no providers configured")]
    NoProviders,

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("duplicate provider name: {0}")]
    DuplicateProvider(String),

    #[error("all {} providers failed", .0.len())]
    AllProvidersFailed(Vec<ServiceError>),

    #[error("invalid booking: {0}")]
    InvalidBooking(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
