use crate::payments::error::PaymentError;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Credential error: {message}")]
    Credential { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Provider {provider} failed: {message}")]
    Provider {
        provider: String,
        message: String,
        raw: Option<JsonValue>,
    },

    #[error("Insufficient float on {float_name}")]
    InsufficientFloat { float_name: String },

    #[error("Store failure during dispatch: {message}")]
    Store { message: String },
}

impl DispatchError {
    /// Context payload written to the error store alongside the failure.
    pub fn context(&self) -> JsonValue {
        match self {
            DispatchError::Provider { provider, message, raw } => serde_json::json!({
                "provider": provider,
                "message": message,
                "raw": raw,
            }),
            other => serde_json::json!({ "message": other.to_string() }),
        }
    }
}

impl From<PaymentError> for DispatchError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::RailUnavailable { message } => DispatchError::Network { message },
            PaymentError::Throttled { .. } => DispatchError::Network {
                message: "upstream throttled".to_string(),
            },
            PaymentError::InvalidRequest { message, .. } => {
                DispatchError::Validation { message }
            }
            PaymentError::CredentialMaterial { message } => {
                DispatchError::Credential { message }
            }
            PaymentError::UnexpectedResponse { upstream, detail } => DispatchError::Provider {
                provider: upstream,
                message: detail,
                raw: None,
            },
            other => DispatchError::Provider {
                provider: "upstream".to_string(),
                message: other.to_string(),
                raw: None,
            },
        }
    }
}
