use serde_json::json;
use thiserror::Error;

use shared_models::error::AppError;

use crate::models::{AppointmentField, AppointmentStatus, ValidationErrors};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppointmentError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("{message}")]
    StateGuardViolation {
        field: AppointmentField,
        message: String,
    },

    #[error("Appointment cannot be canceled while {status}")]
    CannotCancel { status: AppointmentStatus },

    #[error("Appointment not found")]
    NotFound,

    #[error("Patient package not found")]
    PackageNotFound,

    #[error("Database error: {0}")]
    Database(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl AppointmentError {
    pub fn guard(field: AppointmentField, message: impl Into<String>) -> Self {
        AppointmentError::StateGuardViolation {
            field,
            message: message.into(),
        }
    }

    /// Field a guard violation is tied to.
    pub fn guarded_field(&self) -> Option<AppointmentField> {
        match self {
            AppointmentError::StateGuardViolation { field, .. } => Some(*field),
            AppointmentError::CannotCancel { .. } => Some(AppointmentField::Canceled),
            _ => None,
        }
    }

    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            AppointmentError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for AppointmentError {
    fn from(errors: ValidationErrors) -> Self {
        AppointmentError::Validation(errors)
    }
}

impl From<AppointmentError> for AppError {
    fn from(error: AppointmentError) -> Self {
        let field = error.guarded_field().map(|field| field.to_string());

        match error {
            AppointmentError::Validation(errors) => AppError::Validation {
                message: "Appointment could not be saved".to_string(),
                details: json!(errors),
            },
            AppointmentError::StateGuardViolation { message, .. } => AppError::Conflict { message, field },
            AppointmentError::CannotCancel { .. } => AppError::Conflict {
                message: error.to_string(),
                field,
            },
            AppointmentError::NotFound | AppointmentError::PackageNotFound => {
                AppError::NotFound(error.to_string())
            }
            AppointmentError::Database(msg) => AppError::Database(msg),
            AppointmentError::ExternalService(msg) => AppError::ExternalService(msg),
        }
    }
}
