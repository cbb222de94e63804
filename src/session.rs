//! Wizard view of the HTTP session.
//!
//! All wizard data lives under a handful of keys: the typed state, the CSRF token and the
//! one-shot flash bag.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use log::debug;
use tower_sessions::Session;

use crate::error::WizardError;
use crate::i18n::Locale;
use crate::models::forms::Flash;
use crate::models::wizard::{StepUpdate, WizardState};
use crate::security::csrf;

const STATE_KEY: &str = "install.state";
const CSRF_KEY: &str = "install.csrf";
const FLASH_KEY: &str = "install.flash";

type SessionResult<T> = Result<T, WizardError>;

#[derive(Clone, Debug)]
pub struct WizardSession {
    inner: Session,
}

impl<S> FromRequestParts<S> for WizardSession
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let inner = Session::from_request_parts(parts, state).await?;
        Ok(Self { inner })
    }
}

impl WizardSession {
    pub fn new(inner: Session) -> Self {
        Self { inner }
    }

    pub async fn state(&self) -> SessionResult<WizardState> {
        Ok(self.inner.get::<WizardState>(STATE_KEY).await?.unwrap_or_default())
    }

    pub async fn save_state(&self, state: &WizardState) -> SessionResult<()> {
        self.inner.insert(STATE_KEY, state).await?;
        Ok(())
    }

    /// Merge one validated section into the stored state.
    pub async fn apply(&self, update: StepUpdate) -> SessionResult<WizardState> {
        let mut state = self.state().await?;
        debug!(
            "[PHASE: wizard] [STEP: {}] merging section into session",
            update.step().id()
        );
        state.apply(update);
        self.save_state(&state).await?;
        Ok(state)
    }

    /// Session locale, falling back to `default` until one is chosen.
    pub async fn locale(&self, default: Locale) -> SessionResult<Locale> {
        Ok(self.state().await?.locale.unwrap_or(default))
    }

    pub async fn set_locale(&self, locale: Locale) -> SessionResult<()> {
        let mut state = self.state().await?;
        state.locale = Some(locale);
        self.save_state(&state).await
    }

    /// The session's CSRF token, issued on first use.
    pub async fn csrf_token(&self) -> SessionResult<String> {
        if let Some(token) = self.inner.get::<String>(CSRF_KEY).await? {
            return Ok(token);
        }
        let token = csrf::issue()?;
        self.inner.insert(CSRF_KEY, &token).await?;
        Ok(token)
    }

    pub async fn verify_csrf(&self, submitted: Option<&str>) -> SessionResult<()> {
        let expected = self.inner.get::<String>(CSRF_KEY).await?;
        if csrf::verify(expected.as_deref(), submitted) {
            Ok(())
        } else {
            Err(WizardError::CsrfMismatch)
        }
    }

    /// Replace the pending flash; it is shown on the next render only.
    pub async fn flash(&self, flash: Flash) -> SessionResult<()> {
        self.inner.insert(FLASH_KEY, &flash).await?;
        Ok(())
    }

    pub async fn take_flash(&self) -> SessionResult<Flash> {
        Ok(self.inner.remove::<Flash>(FLASH_KEY).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::forms::{FormInput, ValidationResult};
    use crate::models::wizard::AdminSection;
    use std::sync::Arc;
    use tower_sessions::MemoryStore;

    fn session() -> WizardSession {
        WizardSession::new(Session::new(None, Arc::new(MemoryStore::default()), None))
    }

    #[tokio::test]
    async fn flash_is_consumed_once() {
        let s = session();
        let input = FormInput::new([("name".to_string(), "Jane".to_string())].into());
        s.flash(Flash::invalid(ValidationResult::single("email", "required", &input)))
            .await
            .unwrap();

        let first = s.take_flash().await.unwrap();
        assert_eq!(first.old["name"], "Jane");
        assert!(s.take_flash().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn csrf_token_is_stable_per_session() {
        let s = session();
        let token = s.csrf_token().await.unwrap();
        assert_eq!(s.csrf_token().await.unwrap(), token);
        assert!(s.verify_csrf(Some(&token)).await.is_ok());
        assert!(matches!(
            s.verify_csrf(Some("forged")).await,
            Err(WizardError::CsrfMismatch)
        ));
    }

    #[tokio::test]
    async fn updates_merge_into_state() {
        let s = session();
        s.set_locale(Locale::Ar).await.unwrap();
        let state = s
            .apply(StepUpdate::Admin(AdminSection {
                name: "Jane".to_string(),
                email: "jane@example.com".to_string(),
                password_hash: "hash".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(state.locale, Some(Locale::Ar));
        assert_eq!(s.locale(Locale::En).await.unwrap(), Locale::Ar);
        assert!(s.state().await.unwrap().admin.is_some());
    }
}
