//! Runtime settings from the environment (`.env` honoured via dotenvy).

use crate::error::AppError;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/tablekeep";
pub const DEFAULT_SCHEMA: &str = "tablekeep";
pub const DEFAULT_MAX_UNDO: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    /// Schema holding the `_sys_*` catalog tables.
    pub schema: String,
    /// Actions kept per scope before the oldest are pruned.
    pub max_undo: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: DEFAULT_DATABASE_URL.into(),
            schema: DEFAULT_SCHEMA.into(),
            max_undo: DEFAULT_MAX_UNDO,
        }
    }
}

impl Settings {
    /// Load from `DATABASE_URL`, `TABLEKEEP_SCHEMA` and `TABLEKEEP_MAX_UNDO`.
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let database_url = lookup("DATABASE_URL").unwrap_or(defaults.database_url);
        let schema = lookup("TABLEKEEP_SCHEMA").unwrap_or(defaults.schema);
        if !is_plain_identifier(&schema) {
            return Err(AppError::Validation(format!(
                "TABLEKEEP_SCHEMA must be a plain identifier, got '{}'",
                schema
            )));
        }
        let max_undo = match lookup("TABLEKEEP_MAX_UNDO") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                AppError::Validation(format!("TABLEKEEP_MAX_UNDO must be a positive integer, got '{}'", raw))
            })?,
            None => defaults.max_undo,
        };
        if max_undo == 0 {
            return Err(AppError::Validation("TABLEKEEP_MAX_UNDO must be at least 1".into()));
        }
        Ok(Settings {
            database_url,
            schema,
            max_undo,
        })
    }
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn reads_overrides() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("TABLEKEEP_SCHEMA", "undo_catalog"),
            ("TABLEKEEP_MAX_UNDO", "20"),
        ]))
        .unwrap();
        assert_eq!(settings.database_url, "postgres://db/app");
        assert_eq!(settings.schema, "undo_catalog");
        assert_eq!(settings.max_undo, 20);
    }

    #[test]
    fn rejects_quoted_schema_and_bad_limits() {
        assert!(Settings::from_lookup(lookup_from(&[("TABLEKEEP_SCHEMA", "a\"b")])).is_err());
        assert!(Settings::from_lookup(lookup_from(&[("TABLEKEEP_MAX_UNDO", "0")])).is_err());
        assert!(Settings::from_lookup(lookup_from(&[("TABLEKEEP_MAX_UNDO", "many")])).is_err());
    }
}
