// Install runner endpoints: start, observe (SSE or polling) and cancel.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use log::info;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use super::wizard::respond;
use super::SubmittedForm;
use crate::error::WizardError;
use crate::i18n::Locale;
use crate::installation::plan::InstallPlan;
use crate::installation::steps::InstallContext;
use crate::installation::{InstallError, InstallEvent, InstallJob, JobSnapshot, RunMessages};
use crate::models::responses::ApiResponse;
use crate::models::state::AppState;
use crate::models::wizard::{MissingStep, WizardStep};
use crate::routes::Route;
use crate::session::WizardSession;
use crate::wizard as steps;

/// Public URL of the application: configured, or derived from the request.
fn app_url(app: &AppState, headers: &HeaderMap) -> String {
    if !app.config.app.url.is_empty() {
        return app.config.app.url.trim_end_matches('/').to_string();
    }
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let scheme = header_str("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}

fn unprocessable(app: &AppState, locale: Locale, missing: MissingStep) -> WizardError {
    WizardError::Unprocessable {
        message: app.translator.get(locale, missing.step.missing_message_key()),
        errors: Default::default(),
    }
}

fn not_running(app: &AppState, locale: Locale) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::fail(
            app.translator.get(locale, "installation.not_running"),
        )),
    )
        .into_response()
}

/// `POST /install/process`: validate the collected state and spawn the job.
pub async fn process(
    State(app): State<AppState>,
    session: WizardSession,
    headers: HeaderMap,
    form: SubmittedForm,
) -> Response {
    let result = async {
        session.verify_csrf(form.token.as_deref()).await?;
        let state = session.state().await?;
        let locale = state.locale.unwrap_or(app.default_locale);

        steps::gate(WizardStep::Install, &state, app.requirements.as_ref())
            .await
            .map_err(|missing| unprocessable(&app, locale, missing))?;

        let url = app_url(&app, &headers);
        let plan = match InstallPlan::from_state(&state, &app.secrets, url).await {
            Ok(plan) => plan,
            Err(InstallError::MissingStep(missing)) => {
                return Err(unprocessable(&app, locale, missing))
            }
            Err(e) => return Err(e.into()),
        };

        let tr = &app.translator;
        let messages = RunMessages {
            completed: tr.get(locale, "installation.completed"),
            failed: tr.get(locale, "installation.failed"),
            cancelled: tr.get(locale, "installation.cancelled"),
            redirect_on_success: Route::Login.url(),
        };
        let ctx = InstallContext::new(
            plan,
            app.config.paths.clone(),
            app.config.database.clone(),
        );

        let job = match app.installs.start(app.engine.as_ref(), ctx, messages).await {
            Ok(job) => job,
            Err(InstallError::AlreadyRunning) => {
                let message = tr.get(locale, "installation.already_running");
                return Err(WizardError::Conflict(message));
            }
            Err(e) => return Err(e.into()),
        };
        info!("[PHASE: install] [STEP: start] job {} accepted", job.id());

        Ok::<Response, WizardError>(
            (
                StatusCode::ACCEPTED,
                Json(ApiResponse::ok(json!({ "job_id": job.id() }))),
            )
                .into_response(),
        )
    }
    .await;
    respond(&app, &session, result).await
}

/// `GET /install/status`: polling snapshot of the current job.
pub async fn status(State(app): State<AppState>, session: WizardSession) -> Response {
    let locale = session.locale(app.default_locale).await.unwrap_or_default();
    match app.installs.observable().await {
        Some(job) => Json(ApiResponse::ok(job.snapshot())).into_response(),
        None => not_running(&app, locale),
    }
}

/// `POST /install/cancel`: ask the running job to stop before its next step.
pub async fn cancel(
    State(app): State<AppState>,
    session: WizardSession,
    form: SubmittedForm,
) -> Response {
    let result = async {
        session.verify_csrf(form.token.as_deref()).await?;
        let locale = session.locale(app.default_locale).await?;
        match app.installs.cancel().await {
            Ok(job) => Ok(Json(ApiResponse::ok(json!({
                "job_id": job.id(),
                "cancel_requested": true,
            })))
            .into_response()),
            Err(InstallError::NotRunning) => Err(WizardError::Conflict(
                app.translator.get(locale, "installation.not_running"),
            )),
            Err(e) => Err(e.into()),
        }
    }
    .await;
    respond(&app, &session, result).await
}

fn sse_event<T: Serialize>(kind: &str, payload: &T) -> Event {
    Event::default()
        .event(kind)
        .data(serde_json::to_string(payload).unwrap_or_default())
}

enum Feed {
    Snapshot(Arc<InstallJob>, Receiver<InstallEvent>),
    Live(Arc<InstallJob>, Receiver<InstallEvent>, u64),
    Done,
}

/// Snapshot first, then every event newer than it, ending after the terminal event.
/// A lagging subscriber gets a fresh snapshot instead of a gap.
fn job_feed(job: Arc<InstallJob>) -> impl Stream<Item = Result<Event, Infallible>> {
    let (_, rx) = job.subscribe();
    stream::unfold(Feed::Snapshot(job, rx), |feed| async move {
        match feed {
            Feed::Snapshot(job, rx) => {
                let snapshot: JobSnapshot = job.snapshot();
                let next = if snapshot.finished.is_some() {
                    Feed::Done
                } else {
                    Feed::Live(job, rx, snapshot.last_sequence)
                };
                Some((Ok(sse_event("snapshot", &snapshot)), next))
            }
            Feed::Live(job, mut rx, last) => loop {
                match rx.recv().await {
                    Ok(event) if event.sequence() <= last => continue,
                    Ok(event) => {
                        let item = Ok(sse_event(event.kind(), &event));
                        let next = if event.is_terminal() {
                            Feed::Done
                        } else {
                            Feed::Live(job, rx, event.sequence())
                        };
                        return Some((item, next));
                    }
                    Err(RecvError::Lagged(_)) => {
                        let snapshot = job.snapshot();
                        let next = if snapshot.finished.is_some() {
                            Feed::Done
                        } else {
                            Feed::Live(job, rx, snapshot.last_sequence)
                        };
                        return Some((Ok(sse_event("snapshot", &snapshot)), next));
                    }
                    Err(RecvError::Closed) => return None,
                }
            },
            Feed::Done => None,
        }
    })
}

/// `GET /install/events`: Server-Sent Events for the current job.
pub async fn events(State(app): State<AppState>, session: WizardSession) -> Response {
    let locale = session.locale(app.default_locale).await.unwrap_or_default();
    match app.installs.observable().await {
        Some(job) => Sse::new(job_feed(job))
            .keep_alive(KeepAlive::default())
            .into_response(),
        None => not_running(&app, locale),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installation::tests::{context, messages, wait_finished, ScriptedEngine};
    use crate::installation::InstallManager;
    use futures::StreamExt;

    #[tokio::test]
    async fn feed_ends_after_terminal_event() {
        let manager = InstallManager::new();
        let engine = ScriptedEngine {
            fail_at: None,
            gate_at: None,
        };
        let job = manager
            .start(&engine, context().await, messages())
            .await
            .unwrap();
        wait_finished(&job).await;

        let items: Vec<_> = job_feed(job.clone()).collect().await;
        assert_eq!(items.len(), 1, "a finished job yields only its snapshot");
    }
}
