// Payment result pages. Display only: whatever the gateway put in the redirect is shown.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::info;

use crate::error::WizardError;
use crate::models::state::AppState;
use crate::payment::{build_view, Gateway, PaymentOutcome, PaymentQuery};
use crate::session::WizardSession;

async fn page(
    app: &AppState,
    session: &WizardSession,
    outcome: PaymentOutcome,
    gateway: &str,
    query: &PaymentQuery,
) -> Response {
    let Some(gateway) = Gateway::parse(gateway) else {
        return WizardError::UnknownGateway(gateway.to_string()).into_response();
    };
    let locale = session.locale(app.default_locale).await.unwrap_or_default();
    info!(
        "[PHASE: payment] [STEP: {:?}] result page for {}",
        outcome,
        gateway.id()
    );
    Json(build_view(outcome, gateway, query, &app.translator, locale)).into_response()
}

pub async fn success_page(
    State(app): State<AppState>,
    session: WizardSession,
    Path(gateway): Path<String>,
    Query(query): Query<PaymentQuery>,
) -> Response {
    page(&app, &session, PaymentOutcome::Success, &gateway, &query).await
}

pub async fn failure_page(
    State(app): State<AppState>,
    session: WizardSession,
    Path(gateway): Path<String>,
    Query(query): Query<PaymentQuery>,
) -> Response {
    page(&app, &session, PaymentOutcome::Failure, &gateway, &query).await
}

pub async fn cancel_page(
    State(app): State<AppState>,
    session: WizardSession,
    Path(gateway): Path<String>,
    Query(query): Query<PaymentQuery>,
) -> Response {
    page(&app, &session, PaymentOutcome::Cancel, &gateway, &query).await
}
