//! Error taxonomy shared by indexing and retrieval.
//!
//! Most fallible functions in this crate return [`anyhow::Result`]. The
//! variants below are the failures callers are expected to tell apart, so
//! they are attached to the `anyhow` chain and can be recovered with
//! `err.downcast_ref::<RagError>()`.
//!
//! | Variant | Raised by | Propagates? |
//! |---------|-----------|-------------|
//! | [`ParseFailure`](RagError::ParseFailure) | structural parser | no, fallback extraction runs |
//! | [`SizeExceeded`](RagError::SizeExceeded) | chunker | no, artifact skipped or unit truncated |
//! | [`LookupMiss`](RagError::LookupMiss) | retriever | no, becomes a "not found" answer |
//! | [`BatchTokenLimitExceeded`](RagError::BatchTokenLimitExceeded) | batch embedding | no, item reported as skipped |
//! | [`ExternalService`](RagError::ExternalService) | embedding / generation | yes, aborts the query |

use thiserror::Error;

/// Boxed error used as the cause of an [`RagError::ExternalService`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("failed to parse {path}: {reason}")]
    ParseFailure { path: String, reason: String },

    #[error("{path}: {lines} lines exceeds the limit of {limit}")]
    SizeExceeded {
        path: String,
        lines: usize,
        limit: usize,
    },

    #[error("{what} `{name}` was not found in the index")]
    LookupMiss { what: &'static str, name: String },

    #[error("text {index} is ~{estimated_tokens} tokens, over the batch limit of {limit}")]
    BatchTokenLimitExceeded {
        index: usize,
        estimated_tokens: usize,
        limit: usize,
    },

    #[error("{service} service call failed: {source}")]
    ExternalService {
        service: &'static str,
        #[source]
        source: BoxError,
    },
}

impl RagError {
    /// Wrap an upstream failure from the embedding or generation service.
    pub fn external(service: &'static str, err: anyhow::Error) -> Self {
        RagError::ExternalService {
            service,
            source: err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_keeps_cause() {
        let err = RagError::external("generation", anyhow::anyhow!("connection reset"));
        assert_eq!(
            err.to_string(),
            "generation service call failed: connection reset"
        );
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = RagError::LookupMiss {
            what: "entity",
            name: "Order".into(),
        }
        .into();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::LookupMiss { .. })
        ));
        assert_eq!(err.to_string(), "entity `Order` was not found in the index");
    }
}
