use thiserror::Error;

/// Error taxonomy for the reward pipeline and the claim service.
///
/// Lower-level crates keep their own error enums; callers map them into
/// one of these variants at the point where the read/write context is known.
#[derive(Error, Debug)]
pub enum ChopsError {
    /// Missing or malformed secret/address at startup. Fatal, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed request. Rejected immediately.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Ledger read error: {0}")]
    LedgerRead(String),

    /// Transaction failed or reverted. Any off-chain artifact is already stored.
    #[error("Ledger write error: {0}")]
    LedgerWrite(String),

    /// Computed root or proof failed self-verification.
    #[error("Proof mismatch: {0}")]
    ProofMismatch(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ChopsError {
    /// Whether the next scheduled cycle may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LedgerRead(_) | Self::LedgerWrite(_) | Self::Storage(_)
        )
    }
}

impl From<serde_json::Error> for ChopsError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChopsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_configuration() {
        let err = ChopsError::Configuration("CHOPS_SIGNER_KEY not set".to_string());
        assert_eq!(err.to_string(), "Configuration error: CHOPS_SIGNER_KEY not set");
    }

    #[test]
    fn test_error_display_validation() {
        let err = ChopsError::Validation("amount must be positive".to_string());
        assert_eq!(err.to_string(), "Validation error: amount must be positive");
    }

    #[test]
    fn test_error_display_proof_mismatch() {
        let err = ChopsError::ProofMismatch("leaf 3".to_string());
        assert_eq!(err.to_string(), "Proof mismatch: leaf 3");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ChopsError::LedgerRead("timeout".into()).is_retryable());
        assert!(ChopsError::LedgerWrite("reverted".into()).is_retryable());
        assert!(ChopsError::Storage("disk full".into()).is_retryable());
        assert!(!ChopsError::Configuration("x".into()).is_retryable());
        assert!(!ChopsError::Validation("x".into()).is_retryable());
        assert!(!ChopsError::ProofMismatch("x".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse = serde_json::from_str::<u64>("not a number").unwrap_err();
        let err: ChopsError = parse.into();
        assert!(matches!(err, ChopsError::SerializationError(_)));
    }
}
