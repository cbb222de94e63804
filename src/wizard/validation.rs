// Form rules for the wizard steps.
//
// Each rule records at most one message per field: the first failing rule wins. Messages
// come from the `validation.*` catalog of the page's locale.

use regex::Regex;
use std::sync::OnceLock;

use crate::i18n::{Locale, Translator};
use crate::models::forms::{FieldErrors, FormInput, ValidationResult};

pub const MAX_STRING: usize = 255;

pub const MAILERS: &[&str] = &["smtp", "mailgun", "ses", "postmark"];
pub const MAIL_ENCRYPTIONS: &[&str] = &["tls", "ssl"];

/// Timezones offered by the settings step.
pub const TIMEZONES: &[&str] = &[
    "UTC",
    "Africa/Cairo",
    "Africa/Casablanca",
    "Africa/Johannesburg",
    "Africa/Lagos",
    "Africa/Nairobi",
    "Africa/Tunis",
    "America/Argentina/Buenos_Aires",
    "America/Bogota",
    "America/Chicago",
    "America/Denver",
    "America/Halifax",
    "America/Los_Angeles",
    "America/Mexico_City",
    "America/New_York",
    "America/Phoenix",
    "America/Santiago",
    "America/Sao_Paulo",
    "America/Toronto",
    "America/Vancouver",
    "Asia/Amman",
    "Asia/Baghdad",
    "Asia/Bahrain",
    "Asia/Bangkok",
    "Asia/Beirut",
    "Asia/Dhaka",
    "Asia/Dubai",
    "Asia/Hong_Kong",
    "Asia/Jakarta",
    "Asia/Jerusalem",
    "Asia/Karachi",
    "Asia/Kolkata",
    "Asia/Kuwait",
    "Asia/Manila",
    "Asia/Muscat",
    "Asia/Qatar",
    "Asia/Riyadh",
    "Asia/Seoul",
    "Asia/Shanghai",
    "Asia/Singapore",
    "Asia/Tehran",
    "Asia/Tokyo",
    "Atlantic/Reykjavik",
    "Australia/Adelaide",
    "Australia/Brisbane",
    "Australia/Melbourne",
    "Australia/Perth",
    "Australia/Sydney",
    "Europe/Amsterdam",
    "Europe/Athens",
    "Europe/Berlin",
    "Europe/Brussels",
    "Europe/Dublin",
    "Europe/Helsinki",
    "Europe/Istanbul",
    "Europe/Kyiv",
    "Europe/Lisbon",
    "Europe/London",
    "Europe/Madrid",
    "Europe/Moscow",
    "Europe/Paris",
    "Europe/Prague",
    "Europe/Rome",
    "Europe/Stockholm",
    "Europe/Vienna",
    "Europe/Warsaw",
    "Europe/Zurich",
    "Pacific/Auckland",
    "Pacific/Honolulu",
];

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@.]+$").ok())
        .as_ref()
}

pub fn is_valid_email(value: &str) -> bool {
    match email_pattern() {
        Some(re) => re.is_match(value),
        None => value.contains('@'),
    }
}

/// Accumulates field errors for one submitted form.
pub struct Validator<'a> {
    input: &'a FormInput,
    translator: &'a Translator,
    locale: Locale,
    errors: FieldErrors,
}

impl<'a> Validator<'a> {
    pub fn new(input: &'a FormInput, translator: &'a Translator, locale: Locale) -> Self {
        Self {
            input,
            translator,
            locale,
            errors: FieldErrors::new(),
        }
    }

    fn attribute(&self, field: &str) -> String {
        let key = format!("validation.attributes.{}", field);
        let label = self.translator.get(self.locale, &key);
        if label == key {
            field.replace('_', " ")
        } else {
            label
        }
    }

    fn fail(&mut self, field: &str, rule: &str, extra: &[(&str, &str)]) {
        if self.errors.contains_key(field) {
            return;
        }
        let attribute = self.attribute(field);
        let mut replacements = vec![("attribute", attribute.as_str())];
        replacements.extend_from_slice(extra);
        let message = self.translator.get_with(
            self.locale,
            &format!("validation.{}", rule),
            &replacements,
        );
        self.errors.insert(field.to_string(), message);
    }

    pub fn required(&mut self, field: &str) -> Option<String> {
        match self.input.get(field) {
            Some(value) => Some(value.to_string()),
            None => {
                self.fail(field, "required", &[]);
                None
            }
        }
    }

    pub fn optional(&self, field: &str) -> Option<String> {
        self.input.get(field).map(str::to_string)
    }

    pub fn max_len(&mut self, field: &str, value: Option<&str>, max: usize) {
        if let Some(v) = value {
            if v.chars().count() > max {
                self.fail(field, "max_string", &[("max", &max.to_string())]);
            }
        }
    }

    pub fn min_len(&mut self, field: &str, value: Option<&str>, min: usize) {
        if let Some(v) = value {
            if v.chars().count() < min {
                self.fail(field, "min_string", &[("min", &min.to_string())]);
            }
        }
    }

    pub fn len_between(&mut self, field: &str, value: Option<&str>, min: usize, max: usize) {
        if let Some(v) = value {
            let len = v.chars().count();
            if len < min || len > max {
                self.fail(
                    field,
                    "between_string",
                    &[("min", &min.to_string()), ("max", &max.to_string())],
                );
            }
        }
    }

    /// Integer within `min..=max`; returns the parsed value when valid.
    pub fn integer_between(
        &mut self,
        field: &str,
        value: Option<&str>,
        min: i64,
        max: i64,
    ) -> Option<i64> {
        let v = value?;
        match v.parse::<i64>() {
            Ok(n) if (min..=max).contains(&n) => Some(n),
            Ok(_) => {
                self.fail(
                    field,
                    "between_numeric",
                    &[("min", &min.to_string()), ("max", &max.to_string())],
                );
                None
            }
            Err(_) => {
                self.fail(field, "integer", &[]);
                None
            }
        }
    }

    pub fn email(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value {
            if !is_valid_email(v) {
                self.fail(field, "email", &[]);
            }
        }
    }

    pub fn one_of(&mut self, field: &str, value: Option<&str>, allowed: &[&str]) {
        if let Some(v) = value {
            if !allowed.contains(&v) {
                self.fail(field, "in", &[]);
            }
        }
    }

    /// `<field>_confirmation` must equal `<field>`; the error lands on `field`.
    pub fn confirmed(&mut self, field: &str) {
        let confirmation = format!("{}_confirmation", field);
        if self.input.get(field) != self.input.get(&confirmation) {
            self.fail(field, "confirmed", &[]);
        }
    }

    pub fn finish(self) -> Result<(), ValidationResult> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationResult::new(self.errors, self.input))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(pairs: &[(&str, &str)]) -> FormInput {
        FormInput::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn first_failing_rule_wins() {
        let tr = Translator::embedded().unwrap();
        let form = input(&[("db_port", "abc")]);
        let mut v = Validator::new(&form, &tr, Locale::En);
        let port = v.required("db_port");
        v.integer_between("db_port", port.as_deref(), 1, 65535);
        v.max_len("db_port", port.as_deref(), 1);
        let result = v.finish().unwrap_err();
        assert_eq!(result.errors["db_port"], "The database port field must be an integer.");
    }

    #[test]
    fn confirmation_mismatch_is_reported_on_the_field() {
        let tr = Translator::embedded().unwrap();
        let form = input(&[("password", "secret123"), ("password_confirmation", "secret124")]);
        let mut v = Validator::new(&form, &tr, Locale::En);
        v.confirmed("password");
        let result = v.finish().unwrap_err();
        assert_eq!(
            result.errors["password"],
            "The password field confirmation does not match."
        );
        assert!(!result.errors.contains_key("password_confirmation"));
    }

    #[test]
    fn arabic_messages_stay_arabic() {
        let tr = Translator::embedded().unwrap();
        let form = input(&[]);
        let mut v = Validator::new(&form, &tr, Locale::Ar);
        v.required("site_name");
        let result = v.finish().unwrap_err();
        assert!(!result.errors["site_name"].contains("field"));
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("jane@example.com"));
        assert!(!is_valid_email("jane@example"));
        assert!(!is_valid_email("jane example@x.com"));
        assert!(!is_valid_email("@example.com"));
    }

    #[test]
    fn timezones_include_utc_and_are_unique() {
        assert_eq!(TIMEZONES[0], "UTC");
        let mut sorted = TIMEZONES.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), TIMEZONES.len());
    }
}
