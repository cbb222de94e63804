// HTTP surface of the installer.

pub mod guard;
pub mod installer;
pub mod payment;
pub mod wizard;

use axum::extract::{FromRequest, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::SameSite;
use tower_sessions::{MemoryStore, SessionManagerLayer};

use crate::error::{redirect, WizardError};
use crate::models::forms::FormInput;
use crate::models::state::AppState;
use crate::routes::Route;
use crate::security::csrf;

pub const SESSION_COOKIE: &str = "licensehub_installer_session";

pub fn router(state: AppState) -> Router {
    let sessions = SessionManagerLayer::new(MemoryStore::default())
        .with_name(SESSION_COOKIE)
        .with_http_only(true)
        .with_same_site(SameSite::Lax)
        .with_secure(false);

    Router::new()
        .route(Route::Home.path(), get(home))
        .route(Route::Up.path(), get(health))
        .route(Route::Health.path(), get(health))
        .route(Route::InstallWelcome.path(), get(wizard::welcome))
        .route(
            Route::InstallLicense.path(),
            get(wizard::license).post(wizard::store_license),
        )
        .route(Route::InstallRequirements.path(), get(wizard::requirements))
        .route(
            Route::InstallDatabase.path(),
            get(wizard::database).post(wizard::store_database),
        )
        .route(Route::InstallTestDatabase.path(), post(wizard::test_database))
        .route(
            Route::InstallAdmin.path(),
            get(wizard::admin).post(wizard::store_admin),
        )
        .route(
            Route::InstallSettings.path(),
            get(wizard::settings).post(wizard::store_settings),
        )
        .route(Route::InstallInstall.path(), get(wizard::install))
        .route(Route::InstallCompletion.path(), get(wizard::completion))
        .route(Route::InstallProcess.path(), post(installer::process))
        .route(Route::InstallStatus.path(), get(installer::status))
        .route(Route::InstallEvents.path(), get(installer::events))
        .route(Route::InstallCancel.path(), post(installer::cancel))
        .route(Route::PaymentSuccessPage.path(), get(payment::success_page))
        .route(Route::PaymentFailurePage.path(), get(payment::failure_page))
        .route(Route::PaymentCancelPage.path(), get(payment::cancel_page))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            guard::installed_guard,
        ))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn home() -> Response {
    redirect(&Route::Login.url())
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not Found" })),
    )
        .into_response()
}

async fn health(State(app): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "installed": app.is_installed(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Whether the client expects JSON rather than a page.
pub fn wants_json(headers: &HeaderMap) -> bool {
    let has = |name: header::HeaderName, needle: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains(needle))
    };
    has(header::ACCEPT, "application/json")
        || has(header::CONTENT_TYPE, "application/json")
        || headers
            .get("x-requested-with")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
}

/// A submitted form, url-encoded or JSON, with the CSRF token it carried.
pub struct SubmittedForm {
    pub input: FormInput,
    pub token: Option<String>,
}

fn json_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl<S> FromRequest<S> for SubmittedForm
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let header_token = req
            .headers()
            .get(csrf::HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);

        let fields: HashMap<String, String> = if content_type.is_none() {
            HashMap::new()
        } else if content_type
            .as_deref()
            .is_some_and(|v| v.starts_with("application/json"))
        {
            let Json(raw) = Json::<HashMap<String, Value>>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            raw.into_iter().map(|(k, v)| (k, json_to_string(v))).collect()
        } else {
            let Form(raw) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            raw
        };

        let token = fields.get(csrf::FORM_FIELD).cloned().or(header_token);
        Ok(Self {
            input: FormInput::new(fields),
            token,
        })
    }
}

/// Shorthand used by handlers that finish with a redirect.
pub(crate) fn see_other(route: Route) -> Result<Response, WizardError> {
    Ok(redirect(&route.url()))
}
