use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use thiserror::Error;

use crate::installation::InstallError;
use crate::models::forms::ValidationResult;
use crate::models::responses::ApiResponse;
use crate::models::wizard::MissingStep;
use crate::routes::Route;

/// 419 is what the installed application answers on a stale form token.
const CSRF_STATUS: u16 = 419;

#[derive(Debug, Error)]
pub enum WizardError {
    /// An earlier step has not stored its section yet.
    #[error("step '{}' has not been completed", .0.step.id())]
    MissingStep(MissingStep),

    /// Form rejected; the caller flashes `result` and the response sends the user back.
    #[error("validation failed")]
    Invalid { back: Route, result: ValidationResult },

    /// JSON endpoints answer validation and precondition problems with 422.
    #[error("{message}")]
    Unprocessable {
        message: String,
        errors: std::collections::BTreeMap<String, String>,
    },

    #[error("CSRF token mismatch.")]
    CsrfMismatch,

    #[error("unknown payment gateway '{0}'")]
    UnknownGateway(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Session(#[from] tower_sessions::session::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<MissingStep> for WizardError {
    fn from(missing: MissingStep) -> Self {
        WizardError::MissingStep(missing)
    }
}

impl From<InstallError> for WizardError {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::MissingStep(missing) => WizardError::MissingStep(missing),
            InstallError::AlreadyRunning | InstallError::NotRunning => {
                WizardError::Conflict(err.to_string())
            }
            InstallError::Secret(e) => WizardError::Internal(e),
        }
    }
}

pub fn redirect(to: &str) -> Response {
    (StatusCode::SEE_OTHER, [(header::LOCATION, to.to_string())]).into_response()
}

impl IntoResponse for WizardError {
    fn into_response(self) -> Response {
        match self {
            WizardError::MissingStep(missing) => redirect(&missing.step.show_route().url()),
            WizardError::Invalid { back, .. } => redirect(&back.url()),
            WizardError::Unprocessable { message, errors } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiResponse::<()>::invalid(message, errors)),
            )
                .into_response(),
            WizardError::CsrfMismatch => {
                let status = StatusCode::from_u16(CSRF_STATUS).unwrap_or(StatusCode::FORBIDDEN);
                (status, Json(ApiResponse::<()>::fail(self.to_string()))).into_response()
            }
            WizardError::UnknownGateway(_) => {
                (StatusCode::NOT_FOUND, Json(ApiResponse::<()>::fail(self.to_string())))
                    .into_response()
            }
            WizardError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ApiResponse::<()>::fail(message))).into_response()
            }
            WizardError::Session(e) => {
                error!("[PHASE: session] session store error: {}", e);
                internal()
            }
            WizardError::Internal(e) => {
                error!("[PHASE: wizard] internal error: {:#}", e);
                internal()
            }
        }
    }
}

fn internal() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::fail(
            "An unexpected error occurred. Please check the installer logs.",
        )),
    )
        .into_response()
}
