//! Named routes.
//!
//! The router is built from these paths and views resolve links by name, so a
//! renamed path cannot leave a stale link behind.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    InstallWelcome,
    InstallLicense,
    InstallLicenseStore,
    InstallRequirements,
    InstallDatabase,
    InstallDatabaseStore,
    InstallTestDatabase,
    InstallAdmin,
    InstallAdminStore,
    InstallSettings,
    InstallSettingsStore,
    InstallInstall,
    InstallProcess,
    InstallStatus,
    InstallEvents,
    InstallCancel,
    InstallCompletion,
    Login,
    PaymentSuccessPage,
    PaymentFailurePage,
    PaymentCancelPage,
    Home,
    Up,
    Health,
}

impl Route {
    pub const ALL: [Route; 24] = [
        Route::InstallWelcome,
        Route::InstallLicense,
        Route::InstallLicenseStore,
        Route::InstallRequirements,
        Route::InstallDatabase,
        Route::InstallDatabaseStore,
        Route::InstallTestDatabase,
        Route::InstallAdmin,
        Route::InstallAdminStore,
        Route::InstallSettings,
        Route::InstallSettingsStore,
        Route::InstallInstall,
        Route::InstallProcess,
        Route::InstallStatus,
        Route::InstallEvents,
        Route::InstallCancel,
        Route::InstallCompletion,
        Route::Login,
        Route::PaymentSuccessPage,
        Route::PaymentFailurePage,
        Route::PaymentCancelPage,
        Route::Home,
        Route::Up,
        Route::Health,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Route::InstallWelcome => "install.welcome",
            Route::InstallLicense => "install.license",
            Route::InstallLicenseStore => "install.license.store",
            Route::InstallRequirements => "install.requirements",
            Route::InstallDatabase => "install.database",
            Route::InstallDatabaseStore => "install.database.store",
            Route::InstallTestDatabase => "install.test-database",
            Route::InstallAdmin => "install.admin",
            Route::InstallAdminStore => "install.admin.store",
            Route::InstallSettings => "install.settings",
            Route::InstallSettingsStore => "install.settings.store",
            Route::InstallInstall => "install.install",
            Route::InstallProcess => "install.process",
            Route::InstallStatus => "install.status",
            Route::InstallEvents => "install.events",
            Route::InstallCancel => "install.cancel",
            Route::InstallCompletion => "install.completion",
            Route::Login => "login",
            Route::PaymentSuccessPage => "payment.success-page",
            Route::PaymentFailurePage => "payment.failure-page",
            Route::PaymentCancelPage => "payment.cancel-page",
            Route::Home => "home",
            Route::Up => "up",
            Route::Health => "health",
        }
    }

    /// Path template; `{param}` segments use axum's syntax.
    pub fn path(self) -> &'static str {
        match self {
            Route::InstallWelcome => "/install",
            Route::InstallLicense | Route::InstallLicenseStore => "/install/license",
            Route::InstallRequirements => "/install/requirements",
            Route::InstallDatabase | Route::InstallDatabaseStore => "/install/database",
            Route::InstallTestDatabase => "/install/test-database",
            Route::InstallAdmin | Route::InstallAdminStore => "/install/admin",
            Route::InstallSettings | Route::InstallSettingsStore => "/install/settings",
            Route::InstallInstall => "/install/install",
            Route::InstallProcess => "/install/process",
            Route::InstallStatus => "/install/status",
            Route::InstallEvents => "/install/events",
            Route::InstallCancel => "/install/cancel",
            Route::InstallCompletion => "/install/completion",
            Route::Login => "/login",
            Route::PaymentSuccessPage => "/payment/success-page/{gateway}",
            Route::PaymentFailurePage => "/payment/failure-page/{gateway}",
            Route::PaymentCancelPage => "/payment/cancel-page/{gateway}",
            Route::Home => "/",
            Route::Up => "/up",
            Route::Health => "/health",
        }
    }

    /// URL for a route without parameters.
    pub fn url(self) -> String {
        self.path().to_string()
    }

    pub fn is_install_route(path: &str) -> bool {
        path == "/install" || path.starts_with("/install/")
    }
}

/// Resolve several route names into a `name -> url` map for a view.
pub fn links(routes: &[Route]) -> BTreeMap<String, String> {
    routes
        .iter()
        .map(|r| (r.name().to_string(), r.url()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let names: std::collections::HashSet<&str> = Route::ALL.iter().map(|r| r.name()).collect();
        assert_eq!(names.len(), Route::ALL.len());
    }

    #[test]
    fn install_route_detection() {
        assert!(Route::is_install_route("/install"));
        assert!(Route::is_install_route("/install/database"));
        assert!(!Route::is_install_route("/installer"));
        assert!(!Route::is_install_route("/login"));
    }
}
