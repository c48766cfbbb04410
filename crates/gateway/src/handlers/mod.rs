//! API handlers module

pub mod health;
pub mod ingest;
pub mod maintenance;
pub mod query;
pub mod search;
pub mod status;

use argoforge_common::errors::AppError;
use validator::{Validate, ValidationErrors};

/// Run `validator` rules, reporting the first failing field
pub(crate) fn validate<T: Validate>(request: &T) -> Result<(), AppError> {
    request.validate().map_err(|e: ValidationErrors| AppError::Validation {
        field: e.field_errors().keys().next().map(|field| field.to_string()),
        message: e.to_string(),
    })
}
