//! Registry error types
//!
//! Error types for stream registry operations.

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Stream key is already bound to a different URL
    #[error("stream key `{key}` already maps to `{existing_url}` (requested `{requested_url}`)")]
    StreamKeyConflict {
        key: String,
        existing_url: String,
        requested_url: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_existing_binding() {
        let err = RegistryError::StreamKeyConflict {
            key: "orders".into(),
            existing_url: "/sse/orders".into(),
            requested_url: "/sse/other".into(),
        };

        let message = err.to_string();
        assert!(message.contains("already maps"));
        assert!(message.contains("/sse/orders"));
        assert!(message.contains("/sse/other"));
    }
}
