//! Translation catalogs.
//!
//! Catalogs are embedded TOML files, flattened into dotted keys
//! (`[license] heading = ".."` becomes `license.heading`). A key missing from
//! the active locale renders as the key itself; there is no cross-locale
//! fallback, so a page never mixes languages.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const EN_CATALOG: &str = include_str!("../locales/en.toml");
const AR_CATALOG: &str = include_str!("../locales/ar.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ltr,
    Rtl,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::En, Locale::Ar];

    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Locale::En),
            "ar" => Some(Locale::Ar),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Ar => "ar",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Locale::En => Direction::Ltr,
            Locale::Ar => Direction::Rtl,
        }
    }

    /// Faker locale written to `APP_FAKER_LOCALE`.
    pub fn faker_locale(self) -> &'static str {
        match self {
            Locale::En => "en_US",
            Locale::Ar => "ar_SA",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Translator {
    catalogs: HashMap<Locale, HashMap<String, String>>,
}

impl Translator {
    /// Load the embedded catalogs.
    pub fn embedded() -> Result<Self> {
        let mut catalogs = HashMap::new();
        catalogs.insert(Locale::En, parse_catalog(EN_CATALOG).context("locales/en.toml")?);
        catalogs.insert(Locale::Ar, parse_catalog(AR_CATALOG).context("locales/ar.toml")?);
        Ok(Self { catalogs })
    }

    pub fn get(&self, locale: Locale, key: &str) -> String {
        self.catalogs
            .get(&locale)
            .and_then(|c| c.get(key))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Translate and substitute `:name` placeholders (longest names first).
    pub fn get_with(&self, locale: Locale, key: &str, replacements: &[(&str, &str)]) -> String {
        let mut sorted: Vec<&(&str, &str)> = replacements.iter().collect();
        sorted.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));

        let mut out = self.get(locale, key);
        for (name, value) in sorted {
            out = out.replace(&format!(":{}", name), value);
        }
        out
    }

    /// Every key under the given prefixes (e.g. `"license."`), all from one locale.
    pub fn section(&self, locale: Locale, prefixes: &[&str]) -> BTreeMap<String, String> {
        let Some(catalog) = self.catalogs.get(&locale) else {
            return BTreeMap::new();
        };
        catalog
            .iter()
            .filter(|(k, _)| prefixes.iter().any(|p| k.starts_with(p)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[cfg(test)]
    fn keys(&self, locale: Locale) -> std::collections::BTreeSet<String> {
        self.catalogs
            .get(&locale)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn parse_catalog(source: &str) -> Result<HashMap<String, String>> {
    let table: toml::Table = toml::from_str(source).context("Invalid translation catalog")?;
    let mut out = HashMap::new();
    flatten("", &table, &mut out)?;
    Ok(out)
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) -> Result<()> {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::String(s) => {
                out.insert(full, s.clone());
            }
            toml::Value::Table(t) => flatten(&full, t, out)?,
            other => anyhow::bail!("Translation '{}' must be a string, got {}", full, other.type_str()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_parse_and_direction() {
        assert_eq!(Locale::parse("AR"), Some(Locale::Ar));
        assert_eq!(Locale::parse("fr"), None);
        assert_eq!(Locale::Ar.direction(), Direction::Rtl);
        assert_eq!(Locale::En.direction(), Direction::Ltr);
        assert_eq!(Locale::Ar.faker_locale(), "ar_SA");
    }

    #[test]
    fn embedded_catalogs_have_identical_keys() {
        let t = Translator::embedded().unwrap();
        let en = t.keys(Locale::En);
        let ar = t.keys(Locale::Ar);
        let missing_in_ar: Vec<_> = en.difference(&ar).collect();
        let missing_in_en: Vec<_> = ar.difference(&en).collect();
        assert!(missing_in_ar.is_empty(), "missing in ar: {:?}", missing_in_ar);
        assert!(missing_in_en.is_empty(), "missing in en: {:?}", missing_in_en);
    }

    #[test]
    fn missing_key_renders_key_without_cross_locale_fallback() {
        let t = Translator::embedded().unwrap();
        assert_eq!(t.get(Locale::Ar, "no.such.key"), "no.such.key");
        assert_ne!(
            t.get(Locale::Ar, "license.heading"),
            t.get(Locale::En, "license.heading")
        );
    }

    #[test]
    fn placeholders_are_replaced_longest_first() {
        let t = Translator::embedded().unwrap();
        let msg = t.get_with(
            Locale::En,
            "validation.between_string",
            &[("attribute", "purchase code"), ("min", "5"), ("max", "100")],
        );
        assert_eq!(
            msg,
            "The purchase code field must be between 5 and 100 characters."
        );
    }

    #[test]
    fn section_only_returns_requested_prefixes() {
        let t = Translator::embedded().unwrap();
        let s = t.section(Locale::En, &["license."]);
        assert!(!s.is_empty());
        assert!(s.keys().all(|k| k.starts_with("license.")));
    }

    #[test]
    fn non_string_values_are_rejected() {
        assert!(parse_catalog("[a]\nb = 1\n").is_err());
    }
}
