//! Domain validation errors.

use thiserror::Error;

/// Validation errors for domain value objects.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Field must not be empty: {0}")]
    EmptyField(&'static str),
}

impl ValidationError {
    /// Creates an empty-field error for the named field.
    pub fn empty_field(field: &'static str) -> Self {
        Self::EmptyField(field)
    }
}
