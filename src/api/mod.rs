pub mod attendance;
pub mod employee;
pub mod task;

use crate::error::AppError;

/// Trimmed value of a required text field; absent or blank is a validation error.
pub(crate) fn required(value: &Option<String>, field: &str) -> Result<String, AppError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AppError::validation(format!("{field} is required"))),
    }
}

/// Trimmed value of an optional text field; present-but-blank is rejected.
pub(crate) fn optional(value: &Option<String>, field: &str) -> Result<Option<String>, AppError> {
    match value {
        Some(_) => required(value, field).map(Some),
        None => Ok(None),
    }
}
