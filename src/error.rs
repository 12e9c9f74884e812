//! Error types for the Che operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CR specs (impossible field combinations)
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Startup configuration error (unparseable defaults)
    #[error("configuration error: {0}")]
    Config(String),

    /// TLS material handling error
    #[error("tls error: {0}")]
    Tls(String),

    /// Several independent failures collected from a best-effort pass
    #[error("multiple errors: {}", .0.join("; "))]
    Aggregate(Vec<String>),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a TLS error with the given message
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error when it wraps a Kubernetes API response
    pub fn api_kind(&self) -> ApiErrorKind {
        match self {
            Error::Kube(e) => classify(e),
            Error::Validation(_) | Error::Config(_) => ApiErrorKind::Fatal,
            _ => ApiErrorKind::Transient,
        }
    }

    /// True when the wrapped API error is a 404
    pub fn is_not_found(&self) -> bool {
        self.api_kind() == ApiErrorKind::NotFound
    }

    /// True when the wrapped API error is a write conflict
    pub fn is_conflict(&self) -> bool {
        self.api_kind() == ApiErrorKind::Conflict
    }
}

/// Classification of Kubernetes API failures.
///
/// Callers pattern-match on this to decide between retrying in place,
/// requeueing the tick, entering the update path, or surfacing the failure
/// in the CR status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Object does not exist; the normal path into Create
    NotFound,
    /// Resource version mismatch on write; re-read and retry
    Conflict,
    /// Create raced another writer; re-read and enter the update path
    AlreadyExists,
    /// RBAC denied the operation
    Forbidden,
    /// Timeout, server overload, or other recoverable failure
    Transient,
    /// Unrecoverable; surface and stop
    Fatal,
}

/// Classify a `kube::Error` into the operator's retry taxonomy
pub fn classify(err: &kube::Error) -> ApiErrorKind {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => ApiErrorKind::NotFound,
            409 => {
                if resp.reason == "AlreadyExists" {
                    ApiErrorKind::AlreadyExists
                } else {
                    ApiErrorKind::Conflict
                }
            }
            403 => ApiErrorKind::Forbidden,
            408 | 429 | 500 | 503 | 504 => ApiErrorKind::Transient,
            _ => ApiErrorKind::Transient,
        },
        kube::Error::Service(_) | kube::Error::HyperError(_) => ApiErrorKind::Transient,
        _ => ApiErrorKind::Fatal,
    }
}

/// True when the update rejection names an immutable field.
///
/// API servers reject updates to immutable sub-fields with a message
/// containing this sentinel; the sync primitive falls back to
/// delete-and-recreate when it sees it.
pub fn is_immutable_field_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => resp.message.contains("field is immutable"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn classifies_not_found() {
        let err = api_error(404, "NotFound", "secrets \"che-tls\" not found");
        assert_eq!(classify(&err), ApiErrorKind::NotFound);
        assert!(Error::Kube(err).is_not_found());
    }

    #[test]
    fn distinguishes_conflict_from_already_exists() {
        // Both arrive as HTTP 409; the reason string tells them apart.
        let conflict = api_error(
            409,
            "Conflict",
            "Operation cannot be fulfilled: the object has been modified",
        );
        assert_eq!(classify(&conflict), ApiErrorKind::Conflict);

        let exists = api_error(409, "AlreadyExists", "services \"che-host\" already exists");
        assert_eq!(classify(&exists), ApiErrorKind::AlreadyExists);
    }

    #[test]
    fn classifies_forbidden_and_transient() {
        assert_eq!(
            classify(&api_error(403, "Forbidden", "access denied")),
            ApiErrorKind::Forbidden
        );
        assert_eq!(
            classify(&api_error(504, "ServerTimeout", "timed out")),
            ApiErrorKind::Transient
        );
        assert_eq!(
            classify(&api_error(429, "TooManyRequests", "slow down")),
            ApiErrorKind::Transient
        );
    }

    #[test]
    fn validation_errors_are_fatal_for_retry_purposes() {
        // A validation error only clears when the CR changes; retrying the
        // same spec cannot help.
        let err = Error::validation("tls enabled without a tls secret name");
        assert_eq!(err.api_kind(), ApiErrorKind::Fatal);
        assert!(err.to_string().contains("validation error"));
    }

    #[test]
    fn detects_immutable_field_sentinel() {
        let err = api_error(
            422,
            "Invalid",
            "Service \"che-host\" is invalid: spec.clusterIP: field is immutable",
        );
        assert!(is_immutable_field_error(&err));

        let err = api_error(422, "Invalid", "some other rejection");
        assert!(!is_immutable_field_error(&err));
    }

    #[test]
    fn aggregate_error_joins_causes() {
        let err = Error::Aggregate(vec![
            "delete service che-gateway: forbidden".to_string(),
            "delete configmap che-gateway-config: timeout".to_string(),
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("che-gateway"));
        assert!(rendered.contains("; "));
    }
}
