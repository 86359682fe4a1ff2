//! Error types for the nginx operator

use thiserror::Error;

/// Main error type for nginx operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error (transport failures and unclassified API errors)
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Optimistic concurrency conflict (HTTP 409)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Namespace resource quota rejected a create
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// An object violated an invariant the builders rely on
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure while converging a specific sub-resource
    #[error("{kind} {name}: {source}")]
    SubResource {
        /// Kind of the sub-resource (Deployment, Service, Ingress)
        kind: &'static str,
        /// Name of the sub-resource
        name: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a conflict error with the given message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a quota exceeded error with the given message
    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    /// Create an invariant error with the given message
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Attach sub-resource context to an error
    pub fn for_sub_resource(kind: &'static str, name: impl Into<String>, source: Error) -> Self {
        Self::SubResource {
            kind,
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Check if this error is retryable
    ///
    /// Conflicts and quota rejections clear up on their own, so they are retried.
    /// Validation, invariant and serialization errors require a spec change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(source) => {
                // Don't retry on 4xx errors (validation, forbidden, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Conflict(_) => true,
            Error::QuotaExceeded(_) => true,
            Error::Invariant(_) => false,
            Error::Validation(_) => false,
            Error::Serialization(_) => false,
            Error::SubResource { source, .. } => source.is_retryable(),
        }
    }

    /// True if the root cause is a quota rejection
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            Error::QuotaExceeded(_) => true,
            Error::SubResource { source, .. } => source.is_quota_exceeded(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
