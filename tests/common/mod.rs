// Shared harness for the HTTP-level tests: stub collaborators and a client that carries the
// session cookie between requests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tower::ServiceExt;

use licensehub_installer::api;
use licensehub_installer::config::InstallerConfig;
use licensehub_installer::database::connection::{ConnectError, DatabaseParams, DbConnector};
use licensehub_installer::installation::files::{write_installed_marker, InstalledMarker};
use licensehub_installer::installation::steps::{InstallContext, InstallStep};
use licensehub_installer::installation::{InstallEngine, InstallStepName};
use licensehub_installer::licensing::{LicenseError, LicenseVerification, LicenseVerifier};
use licensehub_installer::models::state::AppState;
use licensehub_installer::requirements::{
    CheckStatus, RequirementCheck, RequirementsProbe, RequirementsReport,
};

pub const GOOD_CODE: &str = "ABCDE-12345-FGHIJ";
pub const REJECTED_CODE: &str = "REJECTED-0000";

pub struct StubLicense;

#[async_trait]
impl LicenseVerifier for StubLicense {
    async fn verify(
        &self,
        purchase_code: &str,
        _domain: &str,
    ) -> Result<LicenseVerification, LicenseError> {
        if purchase_code == REJECTED_CODE {
            return Err(LicenseError::Rejected("Invalid purchase code".to_string()));
        }
        Ok(LicenseVerification {
            license_type: Some("regular".to_string()),
            ..Default::default()
        })
    }
}

/// Accepts every database except the one named `missing`.
pub struct StubDb;

#[async_trait]
impl DbConnector for StubDb {
    async fn connect(&self, params: &DatabaseParams) -> Result<(), ConnectError> {
        if params.name == "missing" {
            return Err(ConnectError {
                user_message: "Unknown database 'missing'".to_string(),
                internal_details: "1049".to_string(),
            });
        }
        Ok(())
    }
}

/// Requirements probe whose verdict the test can flip.
pub struct SwitchProbe {
    pub passing: AtomicBool,
}

impl SwitchProbe {
    pub fn new(passing: bool) -> Arc<Self> {
        Arc::new(Self {
            passing: AtomicBool::new(passing),
        })
    }
}

#[async_trait]
impl RequirementsProbe for SwitchProbe {
    async fn check(&self) -> RequirementsReport {
        let status = if self.passing.load(Ordering::SeqCst) {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        };
        RequirementsReport::from_checks(
            vec![
                RequirementCheck::new("os", CheckStatus::Pass, "linux"),
                RequirementCheck::new("storage_writable", status, "storage"),
            ],
            false,
        )
    }
}

/// Install step that touches nothing but the marker file; `hold` parks it until notified.
struct FakeStep {
    name: InstallStepName,
    hold: Option<Arc<Notify>>,
}

#[async_trait]
impl InstallStep for FakeStep {
    fn name(&self) -> InstallStepName {
        self.name
    }

    async fn run(&self, ctx: &mut InstallContext) -> anyhow::Result<Option<String>> {
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        if self.name == InstallStepName::Complete {
            write_installed_marker(&ctx.paths().installed_marker(), &InstalledMarker::now())
                .await?;
        }
        Ok(None)
    }
}

pub struct FakeEngine {
    pub hold_at: Option<(InstallStepName, Arc<Notify>)>,
}

impl InstallEngine for FakeEngine {
    fn steps(&self) -> Vec<Box<dyn InstallStep>> {
        InstallStepName::ALL
            .iter()
            .map(|name| {
                let hold = self
                    .hold_at
                    .as_ref()
                    .filter(|(n, _)| n == name)
                    .map(|(_, h)| h.clone());
                Box::new(FakeStep { name: *name, hold }) as Box<dyn InstallStep>
            })
            .collect()
    }
}

pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub text: String,
}

impl Response {
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub probe: Arc<SwitchProbe>,
    router: Router,
    cookie: Option<String>,
    _root: tempfile::TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_engine(FakeEngine { hold_at: None })
    }

    pub fn with_engine(engine: FakeEngine) -> Self {
        Self::configured(engine, |_| {})
    }

    /// Test application with `configure` applied on top of the harness defaults.
    pub fn configured(engine: FakeEngine, configure: impl FnOnce(&mut InstallerConfig)) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = InstallerConfig::default();
        config.paths.app_root = root.path().to_path_buf();
        config.app.url = "http://licensehub.test".to_string();
        config.app.bcrypt_rounds = 4;
        configure(&mut config);

        let probe = SwitchProbe::new(true);
        let state = AppState::builder(config)
            .license_verifier(Arc::new(StubLicense))
            .db_connector(Arc::new(StubDb))
            .requirements(probe.clone())
            .engine(Arc::new(engine))
            .build()
            .unwrap();

        Self {
            router: api::router(state.clone()),
            state,
            probe,
            cookie: None,
            _root: root,
        }
    }

    /// Same application, fresh browser: no session cookie.
    pub fn forget_session(&mut self) {
        self.cookie = None;
    }

    async fn send(&mut self, mut req: Request<Body>) -> Response {
        if let Some(cookie) = &self.cookie {
            req.headers_mut()
                .insert(header::COOKIE, cookie.parse().unwrap());
        }
        let resp = self.router.clone().oneshot(req).await.unwrap();

        if let Some(set) = resp.headers().get(header::SET_COOKIE) {
            let pair = set.to_str().unwrap().split(';').next().unwrap().to_string();
            self.cookie = Some(pair);
        }

        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes).to_string();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Response {
            status,
            headers,
            body,
            text,
        }
    }

    pub async fn get(&mut self, uri: &str) -> Response {
        let req = Request::get(uri).body(Body::empty()).unwrap();
        self.send(req).await
    }

    pub async fn get_json(&mut self, uri: &str) -> Response {
        let req = Request::get(uri)
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap();
        self.send(req).await
    }

    /// URL-encoded form post; `_token` is added from the current session.
    pub async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let token = self.csrf_token().await;
        let mut all: Vec<(&str, &str)> = fields.to_vec();
        all.push(("_token", token.as_str()));
        self.post_raw_form(uri, &all).await
    }

    pub async fn post_raw_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.send(req).await
    }

    /// JSON post with the token in the `x-csrf-token` header.
    pub async fn post_json(&mut self, uri: &str, payload: Value) -> Response {
        let token = self.csrf_token().await;
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .header("x-csrf-token", token)
            .body(Body::from(payload.to_string()))
            .unwrap();
        self.send(req).await
    }

    /// Token of the current session, read from the welcome page.
    pub async fn csrf_token(&mut self) -> String {
        let page = self.get("/install").await;
        page.body["csrf_token"].as_str().unwrap().to_string()
    }

    pub async fn store_license(&mut self) -> Response {
        self.post_form("/install/license", &[("purchase_code", GOOD_CODE)])
            .await
    }

    pub async fn store_database(&mut self) -> Response {
        self.post_form(
            "/install/database",
            &[
                ("db_host", "127.0.0.1"),
                ("db_port", "3306"),
                ("db_name", "test"),
                ("db_username", "root"),
                ("db_password", ""),
            ],
        )
        .await
    }

    pub async fn store_admin(&mut self) -> Response {
        self.post_form(
            "/install/admin",
            &[
                ("name", "Jane Admin"),
                ("email", "Jane@Example.com"),
                ("password", "s3cret-pass"),
                ("password_confirmation", "s3cret-pass"),
            ],
        )
        .await
    }

    pub async fn store_settings(&mut self, site_name: &str) -> Response {
        self.post_form(
            "/install/settings",
            &[
                ("site_name", site_name),
                ("timezone", "UTC"),
                ("locale", "en"),
            ],
        )
        .await
    }

    /// Walk every form up to and including settings.
    pub async fn complete_forms(&mut self, site_name: &str) {
        assert_eq!(self.store_license().await.location(), Some("/install/requirements"));
        assert_eq!(self.store_database().await.location(), Some("/install/admin"));
        assert_eq!(self.store_admin().await.location(), Some("/install/settings"));
        assert_eq!(
            self.store_settings(site_name).await.location(),
            Some("/install/install")
        );
    }

    /// Poll the status endpoint until the job reports a terminal event.
    pub async fn wait_finished(&mut self) -> Value {
        for _ in 0..200 {
            let resp = self.get_json("/install/status").await;
            let finished = &resp.body["data"]["finished"];
            if !finished.is_null() {
                return finished.clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("installation did not finish");
    }
}
