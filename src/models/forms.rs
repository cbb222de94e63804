// Form input, validation results and flashed redisplay data

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Fields never replayed as old input.
const SECRET_FIELDS: &[&str] = &[
    "password",
    "password_confirmation",
    "db_password",
    "mail_password",
    "_token",
];

pub const DEFAULT_BAG: &str = "default";

/// Submitted form fields.
///
/// Values are trimmed on read and empty strings count as absent, except for
/// secret fields, which are read untouched.
#[derive(Debug, Clone, Default)]
pub struct FormInput {
    fields: HashMap<String, String>,
}

impl FormInput {
    pub fn new(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let raw = self.fields.get(name)?;
        if SECRET_FIELDS.contains(&name) {
            return if raw.is_empty() { None } else { Some(raw) };
        }
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Checkbox semantics.
    pub fn flag(&self, name: &str) -> bool {
        matches!(
            self.get(name).map(|v| v.to_ascii_lowercase()).as_deref(),
            Some("1" | "on" | "true" | "yes")
        )
    }

    /// Last submitted values to replay into the form, secrets excluded.
    pub fn old_input(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .filter(|(k, _)| !SECRET_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .collect()
    }
}

impl From<HashMap<String, String>> for FormInput {
    fn from(fields: HashMap<String, String>) -> Self {
        Self::new(fields)
    }
}

/// `field -> first error message`
pub type FieldErrors = BTreeMap<String, String>;

/// Error bags keyed by name; every wizard form writes [`DEFAULT_BAG`].
pub type ErrorBags = BTreeMap<String, FieldErrors>;

/// Outcome of a failed store: errors plus the input to replay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: FieldErrors,
    pub old: BTreeMap<String, String>,
}

impl ValidationResult {
    pub fn new(errors: FieldErrors, input: &FormInput) -> Self {
        Self {
            errors,
            old: input.old_input(),
        }
    }

    pub fn single(field: &str, message: impl Into<String>, input: &FormInput) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), message.into());
        Self::new(errors, input)
    }
}

/// Data that survives exactly one redirect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flash {
    #[serde(default)]
    pub errors: ErrorBags,
    #[serde(default)]
    pub old: BTreeMap<String, String>,
    #[serde(default)]
    pub success: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn invalid(result: ValidationResult) -> Self {
        let mut errors = ErrorBags::new();
        errors.insert(DEFAULT_BAG.to_string(), result.errors);
        Self {
            errors,
            old: result.old,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.old.is_empty() && self.success.is_none() && self.error.is_none()
    }
}
