use thiserror::Error;

/// Coarse classification callers use to decide between "fix the input",
/// "don't retry blindly" and "retry after a status check".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    GatewayUnavailable,
    GatewayRejected,
    WebhookVerification,
    Internal,
}

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("Refund window has expired; open a dispute instead")]
    RefundWindowExpired,
    #[error("Payment processor not registered: {0}")]
    ProcessorNotRegistered(String),
    #[error("Payment processor not configured: {0}")]
    ProcessorNotConfigured(String),
    #[error("Card type {card_type} is not supported by {processor}")]
    UnsupportedCardType { processor: String, card_type: String },
    #[error("Payment is processing, try again shortly")]
    GatewayPending,
    #[error("Payment declined: {reason}")]
    GatewayRejected { reason: String },
    #[error("Webhook verification failed: {0}")]
    WebhookVerification(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::ProcessorNotRegistered(_)
            | Self::UnsupportedCardType { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) | Self::InvalidTransition { .. } | Self::RefundWindowExpired => {
                ErrorKind::Conflict
            }
            Self::GatewayPending => ErrorKind::GatewayUnavailable,
            Self::GatewayRejected { .. } => ErrorKind::GatewayRejected,
            Self::WebhookVerification(_) => ErrorKind::WebhookVerification,
            Self::ProcessorNotConfigured(_)
            | Self::Storage(_)
            | Self::Csv(_)
            | Self::Io(_)
            | Self::Internal(_) => ErrorKind::Internal,
            #[cfg(feature = "storage-rocksdb")]
            Self::RocksDb(_) => ErrorKind::Internal,
        }
    }

    /// Whether the same call may succeed later without the caller changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::GatewayUnavailable)
    }
}

/// Failure reported by a processor adapter. Only the orchestrator turns these
/// into caller-facing [`SettlementError`]s.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("processor {0} is not configured")]
    NotConfigured(String),
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
    #[error("charge was already refunded")]
    AlreadyRefunded,
}

impl GatewayError {
    /// The outcome of the remote call is unknown and must be confirmed by a status query.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_) | Self::InvalidResponse(_))
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            SettlementError::Validation("bad".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            SettlementError::RefundWindowExpired.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            SettlementError::transition("Payment", "PENDING", "CAPTURED").kind(),
            ErrorKind::Conflict
        );
        assert!(SettlementError::GatewayPending.is_retryable());
        assert_eq!(
            SettlementError::ProcessorNotConfigured("CHASE".into()).kind(),
            ErrorKind::Internal
        );
        assert!(!SettlementError::ProcessorNotConfigured("CHASE".into()).is_retryable());
        assert!(
            !SettlementError::GatewayRejected {
                reason: "card_declined".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_gateway_error_ambiguity() {
        assert!(GatewayError::Timeout.is_ambiguous());
        assert!(GatewayError::Unavailable("502".into()).is_ambiguous());
        assert!(!GatewayError::NotConfigured("CHASE".into()).is_ambiguous());
        assert!(
            !GatewayError::Rejected {
                code: "card_declined".into(),
                message: "declined".into()
            }
            .is_ambiguous()
        );
    }
}
