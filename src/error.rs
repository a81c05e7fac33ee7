//! Unified error handling for the gateway.
//!
//! Maps every failure to an HTTP status, a machine-readable code, and a
//! user-facing message. Callback endpoints never surface these to the rail;
//! initiation and admin endpoints do.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INVALID_AMOUNT_RANGE")]
    InvalidAmountRange,
    #[serde(rename = "UNKNOWN_CARRIER")]
    UnknownCarrier,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,

    // Validation errors (400)
    #[serde(rename = "INVALID_MSISDN")]
    InvalidMsisdn,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,

    // External errors (502, 503)
    #[serde(rename = "PAYMENT_RAIL_ERROR")]
    PaymentRailError,
    #[serde(rename = "AIRTIME_PROVIDER_ERROR")]
    AirtimeProviderError,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

#[derive(Debug, Clone)]
pub enum DomainError {
    /// Amount outside the accepted top-up range
    AmountOutOfRange { amount: String, min: i64, max: i64 },
    /// Destination number belongs to no supported carrier
    UnknownCarrier { msisdn: String },
    /// Transaction with given checkout request id doesn't exist
    TransactionNotFound { checkout_request_id: String },
}

#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Phone number cannot be coerced into a usable form
    InvalidMsisdn { field: String, reason: String },
    /// Required field missing or empty
    MissingField { field: String },
    /// Negative value where only non-negative is allowed
    NegativeValue { field: String },
}

#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment rail (push or reversal) error
    PaymentRail { message: String, is_retryable: bool },
    /// Airtime dispatch provider error
    AirtimeProvider { provider: String, message: String },
}

#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
    Internal { message: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Validation(ValidationError),
    External(ExternalError),
    Infrastructure(InfrastructureError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn amount_out_of_range(amount: impl fmt::Display, min: i64, max: i64) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::AmountOutOfRange {
            amount: amount.to_string(),
            min,
            max,
        }))
    }

    pub fn unknown_carrier(msisdn: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::UnknownCarrier {
            msisdn: msisdn.into(),
        }))
    }

    pub fn transaction_not_found(checkout_request_id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
            checkout_request_id: checkout_request_id.into(),
        }))
    }

    pub fn invalid_msisdn(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidMsisdn {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.into(),
        }))
    }

    pub fn negative_value(field: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::NegativeValue {
            field: field.into(),
        }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
            message: message.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AmountOutOfRange { .. } => 400,
                DomainError::UnknownCarrier { .. } => 400,
                DomainError::TransactionNotFound { .. } => 404,
            },
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentRail { is_retryable, .. } => {
                    if *is_retryable {
                        503
                    } else {
                        502
                    }
                }
                ExternalError::AirtimeProvider { .. } => 502,
            },
            AppErrorKind::Infrastructure(_) => 500,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AmountOutOfRange { .. } => ErrorCode::InvalidAmountRange,
                DomainError::UnknownCarrier { .. } => ErrorCode::UnknownCarrier,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidMsisdn { .. } => ErrorCode::InvalidMsisdn,
                _ => ErrorCode::ValidationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentRail { .. } => ErrorCode::PaymentRailError,
                ExternalError::AirtimeProvider { .. } => ErrorCode::AirtimeProviderError,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::Internal { .. } => ErrorCode::InternalError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::AmountOutOfRange { amount, min, max } => {
                    format!("Amount {} is outside the allowed range {}..{}", amount, min, max)
                }
                DomainError::UnknownCarrier { msisdn } => {
                    format!("Recipient '{}' is not on a supported carrier", msisdn)
                }
                DomainError::TransactionNotFound {
                    checkout_request_id,
                } => {
                    format!("Transaction '{}' not found", checkout_request_id)
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidMsisdn { field, reason } => {
                    format!("Invalid phone number in '{}': {}", field, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::NegativeValue { field } => {
                    format!("Field '{}' must not be negative", field)
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentRail { is_retryable, .. } => {
                    if *is_retryable {
                        "Payment service is temporarily unavailable. Please try again".to_string()
                    } else {
                        "Payment request was not accepted. Please contact support".to_string()
                    }
                }
                ExternalError::AirtimeProvider { .. } => {
                    "Airtime dispatch failed. Any collected payment will be reversed".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) | AppErrorKind::Validation(_) => false,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentRail { is_retryable, .. } => *is_retryable,
                ExternalError::AirtimeProvider { .. } => false,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::Internal { .. } => false,
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<crate::database::error::DatabaseError> for AppError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        use crate::database::error::DatabaseError as DE;
        let retryable = err.is_retryable();
        match err {
            DE::NotFound { entity } => AppError::new(AppErrorKind::Infrastructure(
                InfrastructureError::Database {
                    message: format!("{} not found", entity),
                    is_retryable: false,
                },
            )),
            other => AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: other.to_string(),
                is_retryable: retryable,
            })),
        }
    }
}

impl From<crate::payments::error::PaymentError> for AppError {
    fn from(err: crate::payments::error::PaymentError) -> Self {
        AppError::new(AppErrorKind::External(ExternalError::PaymentRail {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}

impl From<crate::airtime::error::DispatchError> for AppError {
    fn from(err: crate::airtime::error::DispatchError) -> Self {
        AppError::new(AppErrorKind::External(ExternalError::AirtimeProvider {
            provider: match &err {
                crate::airtime::error::DispatchError::Provider { provider, .. } => {
                    provider.clone()
                }
                _ => "airtime".to_string(),
            },
            message: err.to_string(),
        }))
    }
}

impl From<crate::carriers::CarrierError> for AppError {
    fn from(err: crate::carriers::CarrierError) -> Self {
        AppError::invalid_msisdn("recipient", err.to_string())
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_out_of_range_maps_to_400() {
        let error = AppError::amount_out_of_range(3, 5, 5000);
        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidAmountRange);
        assert!(!error.is_retryable());
    }

    #[test]
    fn unknown_carrier_maps_to_400() {
        let error = AppError::unknown_carrier("0744000000");
        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::UnknownCarrier);
        assert!(error.user_message().contains("supported carrier"));
    }

    #[test]
    fn retryable_rail_error_maps_to_503() {
        let error = AppError::new(AppErrorKind::External(ExternalError::PaymentRail {
            message: "timeout".to_string(),
            is_retryable: true,
        }));
        assert_eq!(error.status_code(), 503);
        assert!(error.is_retryable());
    }

    #[test]
    fn transaction_not_found_maps_to_404() {
        let error = AppError::transaction_not_found("ws_CO_1");
        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::TransactionNotFound);
    }
}
