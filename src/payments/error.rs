use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Which rail operation produced a rejection. Rejection codes only mean
/// something relative to the operation that triggered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailOperation {
    TokenGrant,
    StkPush,
    Reversal,
}

impl RailOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RailOperation::TokenGrant => "token-grant",
            RailOperation::StkPush => "stk-push",
            RailOperation::Reversal => "reversal",
        }
    }
}

impl std::fmt::Display for RailOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    /// Failed local validation; nothing left the process.
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        field: Option<String>,
    },

    /// The rail answered and refused the operation (non-zero response
    /// code). Definitive: retrying the same request will not help.
    #[error("rail rejected {operation}: {description} (code {code})")]
    RailRejected {
        operation: RailOperation,
        code: String,
        description: String,
    },

    /// Transport failure or an upstream 5xx. Nothing definite happened on
    /// the other side.
    #[error("upstream unreachable: {message}")]
    RailUnavailable { message: String },

    /// HTTP 429 from an upstream.
    #[error("upstream throttled")]
    Throttled { retry_after: Option<u64> },

    /// Certificate, RSA, or token material problems.
    #[error("credential material error: {message}")]
    CredentialMaterial { message: String },

    /// A 4xx or a body that does not decode as the documented shape.
    #[error("unexpected response from {upstream}: {detail}")]
    UnexpectedResponse { upstream: String, detail: String },
}

impl PaymentError {
    /// Only transient transport conditions are worth repeating. A rail
    /// rejection is a decision, not an outage.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::RailUnavailable { .. } | PaymentError::Throttled { .. }
        )
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::InvalidRequest { .. } => 400,
            PaymentError::RailRejected { .. } => 502,
            PaymentError::RailUnavailable { .. } => 503,
            PaymentError::Throttled { .. } => 429,
            PaymentError::CredentialMaterial { .. } => 500,
            PaymentError::UnexpectedResponse { .. } => 502,
        }
    }

    /// Client-facing message. Raw upstream detail stays in the logs and
    /// the error journal, never in the response body.
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::InvalidRequest { message, .. } => message.clone(),
            PaymentError::RailRejected { operation, .. } => match operation {
                RailOperation::StkPush => {
                    "Payment request was not accepted. Please check the number and try again"
                        .to_string()
                }
                RailOperation::Reversal => "Refund could not be submitted".to_string(),
                RailOperation::TokenGrant => {
                    "Payment service authentication failed".to_string()
                }
            },
            PaymentError::RailUnavailable { .. } => {
                "Payment service is temporarily unavailable. Please try again".to_string()
            }
            PaymentError::Throttled { retry_after } => match retry_after {
                Some(secs) => format!("Too many requests. Please retry in {secs} seconds"),
                None => "Too many requests. Please retry shortly".to_string(),
            },
            PaymentError::CredentialMaterial { .. } => {
                "Payment service is misconfigured. Please contact support".to_string()
            }
            PaymentError::UnexpectedResponse { .. } => {
                "Payment service returned an unexpected answer".to_string()
            }
        }
    }
}
