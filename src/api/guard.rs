// Installed-state guard.
//
// Before installation every non-installer path is sent to the wizard; afterwards the wizard
// is closed, except for the completion page and the progress endpoints of the job that just
// finished.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::debug;
use serde_json::json;

use super::wants_json;
use crate::error::redirect;
use crate::models::state::AppState;
use crate::routes::Route;

const STATIC_PREFIXES: &[&str] = &["/build/", "/assets/", "/css/", "/js/", "/images/", "/storage/"];
const STATIC_FILES: &[&str] = &["/favicon.ico", "/robots.txt"];

fn always_allowed(path: &str) -> bool {
    path == Route::Up.path()
        || path == Route::Health.path()
        || STATIC_FILES.contains(&path)
        || STATIC_PREFIXES.iter().any(|p| path.starts_with(p))
}

pub async fn installed_guard(State(app): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if always_allowed(&path) {
        return next.run(req).await;
    }

    let installed = app.is_installed();
    let install_route = Route::is_install_route(&path);
    let json = wants_json(req.headers());
    let tr = &app.translator;
    let locale = app.default_locale;

    if !installed && !install_route {
        debug!("[PHASE: guard] {} blocked: not installed", path);
        return if json {
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": tr.get(locale, "guard.not_installed") })),
            )
                .into_response()
        } else {
            redirect(&Route::InstallWelcome.url())
        };
    }

    if installed && install_route {
        let finished_job_route = path == Route::InstallStatus.path()
            || path == Route::InstallEvents.path();
        let allowed = path == Route::InstallCompletion.path()
            || (finished_job_route && app.installs.observable().await.is_some());
        if !allowed {
            debug!("[PHASE: guard] {} blocked: already installed", path);
            return if json {
                (
                    StatusCode::FORBIDDEN,
                    Json(json!({ "error": tr.get(locale, "guard.already_installed") })),
                )
                    .into_response()
            } else {
                redirect(&Route::Login.url())
            };
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_and_assets_bypass_the_guard() {
        assert!(always_allowed("/up"));
        assert!(always_allowed("/health"));
        assert!(always_allowed("/build/app.js"));
        assert!(always_allowed("/favicon.ico"));
        assert!(!always_allowed("/install"));
        assert!(!always_allowed("/dashboard"));
    }
}
