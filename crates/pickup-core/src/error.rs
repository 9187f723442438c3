//! Domain error taxonomy.
//!
//! `UnauthorizedPickup` and `ReferentialViolation` are hard failures and must
//! reach the caller as errors. Soft outcomes such as an exit without a
//! recuperator are `ScanWarning`s carried by a successful receipt instead.

use thiserror::Error;

use crate::api::ApiError;
use crate::models::EntityKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} not found: {code}")]
    NotFound { kind: EntityKind, code: String },

    #[error("Recuperator {recuperator} is not authorized to pick up child {child}")]
    UnauthorizedPickup { child: String, recuperator: String },

    #[error("Children {} do not belong to parent {parent} of recuperator {recuperator}", .children.join(", "))]
    ReferentialViolation {
        recuperator: String,
        parent: String,
        children: Vec<String>,
    },

    #[error("Pinned {kind} {code} could not be resolved")]
    StaleReference { kind: EntityKind, code: String },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn not_found(kind: EntityKind, code: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            code: code.into(),
        }
    }

    /// True for errors that must block the operation outright.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            Error::UnauthorizedPickup { .. } | Error::ReferentialViolation { .. }
        )
    }

    /// True when the referenced record is gone, either deleted or never existed.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::StaleReference { .. } | Error::Api(ApiError::NotFound(_))
        )
    }
}
