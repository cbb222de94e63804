// Wizard page and form handlers.
//
// GET handlers render a `PageView` as JSON. POST handlers validate, merge the step's
// section into the session and answer 303 to the next page, or flash the errors and old
// input and answer 303 back to the form.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{see_other, SubmittedForm};
use crate::error::WizardError;
use crate::i18n::Locale;
use crate::installation::files::read_installed_marker;
use crate::models::forms::Flash;
use crate::models::responses::ApiResponse;
use crate::models::state::AppState;
use crate::models::wizard::{StepUpdate, WizardStep};
use crate::session::WizardSession;
use crate::wizard::{self as steps, PageContext};

/// Turn a handler result into a response, flashing what the next page must show.
pub(crate) async fn respond(
    app: &AppState,
    session: &WizardSession,
    result: Result<Response, WizardError>,
) -> Response {
    let err = match result {
        Ok(resp) => return resp,
        Err(err) => err,
    };

    let flashed = match &err {
        WizardError::MissingStep(missing) => {
            let locale = session.locale(app.default_locale).await.unwrap_or_default();
            let message = app
                .translator
                .get(locale, missing.step.missing_message_key());
            info!(
                "[PHASE: wizard] [STEP: {}] redirecting: {}",
                missing.step.id(),
                message
            );
            session.flash(Flash::error(message)).await
        }
        WizardError::Invalid { result, .. } => session.flash(Flash::invalid(result.clone())).await,
        _ => Ok(()),
    };
    if let Err(e) = flashed {
        return e.into_response();
    }
    err.into_response()
}

async fn show(
    app: &AppState,
    session: &WizardSession,
    step: WizardStep,
) -> Result<Response, WizardError> {
    let state = session.state().await?;
    let locale = state.locale.unwrap_or(app.default_locale);
    steps::gate(step, &state, app.requirements.as_ref()).await?;

    let tr = &app.translator;
    let (data, can_continue) = match step {
        WizardStep::Welcome => (steps::welcome_data(tr, locale), true),
        WizardStep::Requirements => {
            let report = app.requirements.check().await;
            let passed = report.passed();
            (steps::requirements_data(&report, tr, locale), passed)
        }
        WizardStep::Database => (steps::database_data(tr, locale), true),
        WizardStep::Settings => (steps::settings_data(tr, locale), true),
        WizardStep::Install => {
            let snapshot = app.installs.current().await.map(|job| job.snapshot());
            (steps::install_data(&state, snapshot.as_ref(), tr, locale), true)
        }
        WizardStep::Completion => {
            let marker = read_installed_marker(&app.config.paths.installed_marker()).await?;
            let job_summary = app.installs.last_summary().await;
            let summary =
                steps::completion_summary(&state, job_summary.as_ref(), marker.as_ref())?;
            let language_key = format!("welcome.language_{}", summary.default_language.code());
            let language = tr.get(locale, &language_key);
            let mut data = serde_json::to_value(&summary).map_err(anyhow::Error::from)?;
            data["default_language_label"] = json!(language);
            (data, true)
        }
        WizardStep::License | WizardStep::Admin => (json!({}), true),
    };

    let ctx = PageContext {
        locale,
        csrf_token: session.csrf_token().await?,
        flash: session.take_flash().await?,
    };
    let view = steps::render(step, &state, ctx, tr, data, can_continue);
    Ok(Json(view).into_response())
}

#[derive(Debug, Deserialize)]
pub struct WelcomeQuery {
    lang: Option<String>,
}

pub async fn welcome(
    State(app): State<AppState>,
    session: WizardSession,
    Query(query): Query<WelcomeQuery>,
) -> Response {
    let result = async {
        if let Some(locale) = query.lang.as_deref().and_then(Locale::parse) {
            session.set_locale(locale).await?;
        }
        show(&app, &session, WizardStep::Welcome).await
    }
    .await;
    respond(&app, &session, result).await
}

pub async fn license(State(app): State<AppState>, session: WizardSession) -> Response {
    let result = show(&app, &session, WizardStep::License).await;
    respond(&app, &session, result).await
}

pub async fn requirements(State(app): State<AppState>, session: WizardSession) -> Response {
    let result = show(&app, &session, WizardStep::Requirements).await;
    respond(&app, &session, result).await
}

pub async fn database(State(app): State<AppState>, session: WizardSession) -> Response {
    let result = show(&app, &session, WizardStep::Database).await;
    respond(&app, &session, result).await
}

pub async fn admin(State(app): State<AppState>, session: WizardSession) -> Response {
    let result = show(&app, &session, WizardStep::Admin).await;
    respond(&app, &session, result).await
}

pub async fn settings(State(app): State<AppState>, session: WizardSession) -> Response {
    let result = show(&app, &session, WizardStep::Settings).await;
    respond(&app, &session, result).await
}

pub async fn install(State(app): State<AppState>, session: WizardSession) -> Response {
    let result = show(&app, &session, WizardStep::Install).await;
    respond(&app, &session, result).await
}

pub async fn completion(State(app): State<AppState>, session: WizardSession) -> Response {
    let result = show(&app, &session, WizardStep::Completion).await;
    respond(&app, &session, result).await
}

/// Shared prologue of every store: token, prerequisites, locale.
async fn begin_store(
    app: &AppState,
    session: &WizardSession,
    form: &SubmittedForm,
    step: WizardStep,
) -> Result<Locale, WizardError> {
    session.verify_csrf(form.token.as_deref()).await?;
    let state = session.state().await?;
    steps::gate(step, &state, app.requirements.as_ref()).await?;
    Ok(state.locale.unwrap_or(app.default_locale))
}

/// Merge the update, flash `success_key` if any, and move on to the next step.
async fn commit(
    app: &AppState,
    session: &WizardSession,
    update: StepUpdate,
    success_key: Option<&str>,
) -> Result<Response, WizardError> {
    let step = update.step();
    let state = session.apply(update).await?;
    if let Some(key) = success_key {
        let locale = state.locale.unwrap_or(app.default_locale);
        session.flash(Flash::success(app.translator.get(locale, key))).await?;
    }
    info!("[PHASE: wizard] [STEP: {}] stored", step.id());
    let next = step.next().unwrap_or(WizardStep::Completion);
    see_other(next.show_route())
}

pub async fn store_license(
    State(app): State<AppState>,
    session: WizardSession,
    headers: HeaderMap,
    form: SubmittedForm,
) -> Response {
    let result = async {
        let locale = begin_store(&app, &session, &form, WizardStep::License).await?;
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let domain = steps::domain_from_host(host);
        let update = steps::store_license(
            &form.input,
            &domain,
            app.license_verifier.as_ref(),
            &app.translator,
            locale,
        )
        .await?;
        commit(&app, &session, update, Some("license.verified")).await
    }
    .await;
    respond(&app, &session, result).await
}

pub async fn store_database(
    State(app): State<AppState>,
    session: WizardSession,
    form: SubmittedForm,
) -> Response {
    let result = async {
        let locale = begin_store(&app, &session, &form, WizardStep::Database).await?;
        let update = steps::store_database(
            &form.input,
            app.db_connector.as_ref(),
            &app.secrets,
            &app.translator,
            locale,
        )
        .await?;
        commit(&app, &session, update, Some("database.connection_ok")).await
    }
    .await;
    respond(&app, &session, result).await
}

pub async fn store_admin(
    State(app): State<AppState>,
    session: WizardSession,
    form: SubmittedForm,
) -> Response {
    let result = async {
        let locale = begin_store(&app, &session, &form, WizardStep::Admin).await?;
        let update = steps::store_admin(
            &form.input,
            app.config.app.bcrypt_rounds,
            &app.translator,
            locale,
        )?;
        commit(&app, &session, update, None).await
    }
    .await;
    respond(&app, &session, result).await
}

pub async fn store_settings(
    State(app): State<AppState>,
    session: WizardSession,
    form: SubmittedForm,
) -> Response {
    let result = async {
        let locale = begin_store(&app, &session, &form, WizardStep::Settings).await?;
        let update =
            steps::store_settings(&form.input, &app.secrets, &app.translator, locale).await?;
        commit(&app, &session, update, None).await
    }
    .await;
    respond(&app, &session, result).await
}

/// Connection test from the database form; JSON in, JSON out, nothing stored.
pub async fn test_database(
    State(app): State<AppState>,
    session: WizardSession,
    form: SubmittedForm,
) -> Response {
    let result = async {
        session.verify_csrf(form.token.as_deref()).await?;
        let locale = session.locale(app.default_locale).await?;
        let tr = &app.translator;

        let params = match steps::validate_database(&form.input, tr, locale) {
            Ok(params) => params,
            Err(invalid) => {
                let message = invalid
                    .errors
                    .values()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| tr.get(locale, "database.connection_failed"));
                return Err(WizardError::Unprocessable {
                    message,
                    errors: invalid.errors,
                });
            }
        };

        let checked = steps::check_database(app.db_connector.as_ref(), &params).await;
        let body: ApiResponse<Value> = match checked {
            Ok(()) => ApiResponse::ok_with_message(
                json!({"engine": params.engine}),
                tr.get(locale, "database.connection_ok"),
            ),
            Err(message) => {
                warn!("[PHASE: wizard] [STEP: test-database] {}", message);
                ApiResponse::fail(format!(
                    "{}: {}",
                    tr.get(locale, "database.connection_failed"),
                    message
                ))
            }
        };
        Ok::<Response, WizardError>((StatusCode::OK, Json(body)).into_response())
    }
    .await;
    respond(&app, &session, result).await
}
