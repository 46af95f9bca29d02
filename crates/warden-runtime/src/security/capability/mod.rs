//! Capability tokens, authorization contexts and the manager that ties them
//! to the running thread

pub mod context;
pub mod declaration;
pub mod manager;
pub mod pattern;
pub mod token;

pub use context::CapabilityContext;
pub use declaration::{capability_for_operation, declaration_tokens};
pub use manager::{get_current_context, set_current_context, CapabilityManager, ScopeGuard};
pub use pattern::ResourcePattern;
pub use token::{CapabilityToken, TokenSnapshot, ANY_OPERATION};

use crate::security::types::CapabilityType;
use crate::security::validator::ValidationResult;
use thiserror::Error;

/// Authorization errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("Capability not found: {capability} {operation} on {resource}")]
    NotFound {
        capability: CapabilityType,
        resource: String,
        operation: String,
    },

    #[error("No active capability context")]
    NoActiveContext,

    #[error("Invalid resource pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Token {token_id} reached its usage limit of {limit}")]
    UsageLimitExceeded { token_id: String, limit: u64 },

    #[error("Token {token_id} has expired")]
    Expired { token_id: String },

    #[error("Unknown capability operation: {operation}")]
    UnknownOperation { operation: String },

    #[error("Operation refused: {0}")]
    Denied(Box<ValidationResult>),
}
