//! `.env` rewriting.
//!
//! Keys already present are replaced on their own line, new keys are appended, and every
//! other line (comments, unrelated keys, blank lines) is kept as-is.

use anyhow::{Context, Result};
use log::{debug, info};
use regex::{NoExpand, Regex};
use std::path::Path;

use super::files::write_file_with_retries;

/// Quote a value when the dotenv parser would otherwise split or truncate it.
pub fn quote_env_value(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '=' | '$' | '\\'));
    if !needs_quotes {
        return value.to_string();
    }
    quote_env_value_always(value)
}

/// Double-quote a value unconditionally, escaping backslashes and quotes.
pub fn quote_env_value_always(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Apply `values` to dotenv `content`.
pub fn set_env_values(content: &str, values: &[(String, String)]) -> Result<String> {
    let mut out = content.to_string();
    for (key, value) in values {
        let line = format!("{}={}", key, value);
        let re = Regex::new(&format!(r"(?m)^[ \t]*{}[ \t]*=.*$", regex::escape(key)))
            .with_context(|| format!("invalid env key {}", key))?;
        if re.is_match(&out) {
            out = re.replace_all(&out, NoExpand(&line)).into_owned();
        } else {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&line);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Rewrite the env file at `env_path`, seeding it from `example_path` when it does not exist.
pub async fn update_env_file(
    env_path: &Path,
    example_path: &Path,
    values: &[(String, String)],
) -> Result<()> {
    let base = match tokio::fs::read_to_string(env_path).await {
        Ok(existing) => existing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            match tokio::fs::read_to_string(example_path).await {
                Ok(example) => {
                    debug!(
                        "[PHASE: installation] [STEP: env] seeding from {:?}",
                        example_path
                    );
                    example
                }
                Err(_) => String::new(),
            }
        }
        Err(e) => return Err(e).with_context(|| format!("cannot read {:?}", env_path)),
    };

    let updated = set_env_values(&base, values)?;
    if let Some(parent) = env_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("cannot create {:?}", parent))?;
    }
    write_file_with_retries(env_path, updated.as_bytes(), "env file").await?;

    info!(
        "[PHASE: installation] [STEP: env] wrote {} keys to {:?}",
        values.len(),
        env_path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn quoting_rules() {
        assert_eq!(quote_env_value("localhost"), "localhost");
        assert_eq!(quote_env_value("My Site"), "\"My Site\"");
        assert_eq!(quote_env_value("pa#ss"), "\"pa#ss\"");
        assert_eq!(quote_env_value("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote_env_value(""), "");
    }

    #[test]
    fn always_quoted_values_escape_backslash_and_quote() {
        assert_eq!(quote_env_value_always("Acme"), "\"Acme\"");
        assert_eq!(quote_env_value_always(""), "\"\"");
        assert_eq!(quote_env_value_always("Acme\\"), r#""Acme\\""#);
        assert_eq!(quote_env_value_always(r#"A\"B"#), r#""A\\\"B""#);
        assert_eq!(quote_env_value_always("Acme\\"), quote_env_value("Acme\\"));
    }

    #[test]
    fn existing_keys_are_replaced_in_place() {
        let content = "APP_NAME=Laravel\n# database\nDB_HOST=localhost\nDB_PORT=3306\n";
        let out = set_env_values(content, &kv(&[("DB_HOST", "10.0.0.5")])).unwrap();
        assert_eq!(
            out,
            "APP_NAME=Laravel\n# database\nDB_HOST=10.0.0.5\nDB_PORT=3306\n"
        );
    }

    #[test]
    fn missing_keys_are_appended() {
        let out = set_env_values("APP_NAME=Laravel", &kv(&[("DB_DATABASE", "licenses")])).unwrap();
        assert_eq!(out, "APP_NAME=Laravel\nDB_DATABASE=licenses\n");
    }

    #[test]
    fn commented_keys_are_not_touched() {
        let content = "# DB_HOST=example\n";
        let out = set_env_values(content, &kv(&[("DB_HOST", "127.0.0.1")])).unwrap();
        assert_eq!(out, "# DB_HOST=example\nDB_HOST=127.0.0.1\n");
    }

    #[test]
    fn replacement_is_literal() {
        let out = set_env_values("DB_PASSWORD=old\n", &kv(&[("DB_PASSWORD", "a$1b")])).unwrap();
        assert_eq!(out, "DB_PASSWORD=a$1b\n");
    }

    #[test]
    fn key_prefixes_do_not_collide() {
        let content = "DB_HOST_REPLICA=replica\nDB_HOST=primary\n";
        let out = set_env_values(content, &kv(&[("DB_HOST", "new")])).unwrap();
        assert_eq!(out, "DB_HOST_REPLICA=replica\nDB_HOST=new\n");
    }

    #[tokio::test]
    async fn env_is_seeded_from_example() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        let example = dir.path().join(".env.example");
        tokio::fs::write(&example, "APP_ENV=production\nDB_HOST=\n")
            .await
            .unwrap();

        update_env_file(&env, &example, &kv(&[("DB_HOST", "db.internal")]))
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(&env).await.unwrap();
        assert_eq!(written, "APP_ENV=production\nDB_HOST=db.internal\n");
        // The example stays untouched.
        assert_eq!(
            tokio::fs::read_to_string(&example).await.unwrap(),
            "APP_ENV=production\nDB_HOST=\n"
        );
    }

    #[tokio::test]
    async fn env_without_example_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        update_env_file(&env, &dir.path().join(".env.example"), &kv(&[("APP_URL", "http://x")]))
            .await
            .unwrap();
        assert_eq!(tokio::fs::read_to_string(&env).await.unwrap(), "APP_URL=http://x\n");
    }
}
