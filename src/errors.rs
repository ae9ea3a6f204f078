use http::StatusCode;
use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

use crate::services::commerce::checkout_service::CheckoutStage;

/// Infrastructure-level failures raised by repositories, the database layer and
/// outbound clients.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Convenience constructor for wrapping string-based database errors.
    pub fn database_error_message(message: impl Into<String>) -> Self {
        ServiceError::DatabaseError(DbErr::Custom(message.into()))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Which window boundary rejected a discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityViolation {
    Expired,
    NotYetValid,
}

impl std::fmt::Display for ValidityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "has expired"),
            Self::NotYetValid => write!(f, "is not yet valid"),
        }
    }
}

/// Which usage counter was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageScope {
    PerUser,
    Global,
}

impl std::fmt::Display for UsageScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerUser => write!(f, "per-user"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Errors raised while resolving and validating discount codes.
///
/// Any of these aborts the whole batch: no partial `DiscountResult` is ever
/// returned next to an error.
#[derive(Debug, thiserror::Error)]
pub enum DiscountError {
    #[error("Unknown discount code: {0}")]
    UnknownDiscountCode(String),

    #[error("Discount {code} {violation}")]
    ExpiredOrNotYetValid {
        code: String,
        violation: ValidityViolation,
    },

    #[error("Discount {second} cannot be combined with non-stackable discount {first}")]
    StackingConflict { first: String, second: String },

    #[error("Discount {code} has reached its {scope} usage limit")]
    UsageLimitExceeded { code: String, scope: UsageScope },

    #[error("Discount {code} is misconfigured: {reason}")]
    InvalidDiscount { code: String, reason: String },

    #[error(transparent)]
    Repository(#[from] ServiceError),
}

impl DiscountError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownDiscountCode(_) => "unknown_discount_code",
            Self::ExpiredOrNotYetValid { .. } => "expired_or_not_yet_valid",
            Self::StackingConflict { .. } => "stacking_conflict",
            Self::UsageLimitExceeded { .. } => "usage_limit_exceeded",
            Self::InvalidDiscount { .. } => "invalid_discount",
            Self::Repository(_) => "persistence_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownDiscountCode(_) => StatusCode::NOT_FOUND,
            Self::ExpiredOrNotYetValid { .. } | Self::StackingConflict { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::UsageLimitExceeded { .. } => StatusCode::CONFLICT,
            Self::InvalidDiscount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Repository(err) => err.status_code(),
        }
    }
}

/// Errors surfaced by the checkout orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("Cart {0} not found")]
    CartNotFound(Uuid),

    #[error("Shipping address not found")]
    AddressNotFound(Option<Uuid>),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cart {0} is empty")]
    EmptyCart(Uuid),

    #[error(transparent)]
    Discount(#[from] DiscountError),

    #[error("Order total would be negative ({0})")]
    NegativeTotal(rust_decimal::Decimal),

    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Checkout cancelled during {stage}")]
    Cancelled { stage: CheckoutStage },
}

impl From<ServiceError> for CheckoutError {
    fn from(err: ServiceError) -> Self {
        CheckoutError::Persistence(err.to_string())
    }
}

impl CheckoutError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "user_not_found",
            Self::CartNotFound(_) => "cart_not_found",
            Self::AddressNotFound(_) => "address_not_found",
            Self::Forbidden(_) => "forbidden",
            Self::EmptyCart(_) => "empty_cart",
            Self::Discount(err) => err.kind(),
            Self::NegativeTotal(_) => "negative_total",
            Self::PaymentGateway(_) => "payment_gateway_error",
            Self::Persistence(_) => "persistence_error",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Returns the HTTP status code a transport layer should use for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UserNotFound(_) | Self::CartNotFound(_) | Self::AddressNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::EmptyCart(_) | Self::NegativeTotal(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Discount(err) => err.status_code(),
            Self::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cancelled { .. } => StatusCode::REQUEST_TIMEOUT,
        }
    }
}
