// API response models

use super::forms::{ErrorBags, Flash};
use super::wizard::WizardStep;
use crate::i18n::{Direction, Locale};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =========================
// Generic wrapper
// =========================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: BTreeMap::new(),
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
            errors: BTreeMap::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            errors: BTreeMap::new(),
        }
    }

    pub fn invalid(message: impl Into<String>, errors: BTreeMap<String, String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            errors,
        }
    }
}

impl ApiResponse<()> {
    pub fn message(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            data: None,
            message: Some(message.into()),
            errors: BTreeMap::new(),
        }
    }
}

// =========================
// Wizard pages
// =========================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Completed,
    Active,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepItem {
    pub id: WizardStep,
    pub number: usize,
    pub title: String,
    pub state: StepState,
}

/// Everything a template needs to render one wizard page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageView {
    pub step: WizardStep,
    pub step_number: usize,
    pub total_steps: usize,
    pub progress: u8,
    pub steps: Vec<StepItem>,
    pub locale: Locale,
    pub direction: Direction,
    pub title: String,
    pub translations: BTreeMap<String, String>,
    pub csrf_token: String,
    #[serde(default)]
    pub old: BTreeMap<String, String>,
    #[serde(default)]
    pub errors: ErrorBags,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_error: Option<String>,
    pub can_continue: bool,
    #[serde(default)]
    pub data: Value,
    pub links: BTreeMap<String, String>,
}

impl PageView {
    /// First error for `field` in the default bag.
    pub fn error(&self, field: &str) -> Option<&str> {
        self.error_in(super::forms::DEFAULT_BAG, field)
    }

    pub fn error_in(&self, bag: &str, field: &str) -> Option<&str> {
        self.errors
            .get(bag)
            .and_then(|b| b.get(field))
            .map(String::as_str)
    }

    /// Value to pre-fill `field` with: old input first, then the stored section value.
    pub fn old_or_value(&self, field: &str) -> Option<String> {
        if let Some(old) = self.old.get(field) {
            return Some(old.clone());
        }
        match self.values.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub(crate) fn absorb_flash(&mut self, flash: Flash) {
        self.errors = flash.errors;
        self.old = flash.old;
        self.flash_success = flash.success;
        self.flash_error = flash.error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_response_skips_empty_fields() {
        let json = serde_json::to_value(ApiResponse::message(true, "ok")).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "ok");
        assert!(json.get("data").is_none());
        assert!(json.get("errors").is_none());
    }

    #[test]
    fn api_response_invalid_carries_errors() {
        let mut errors = BTreeMap::new();
        errors.insert("db_host".to_string(), "required".to_string());
        let json =
            serde_json::to_value(ApiResponse::<()>::invalid("Validation failed", errors)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errors"]["db_host"], "required");
    }
}
