//! Environment variable loading with `.env` layering
//!
//! `EnvLoader` reads a `.env` file into an in-memory map without touching
//! the process environment. Lookups consult the process environment first,
//! then the file values, then the caller's default. The loader is a plain
//! value owned by the runtime, so tests construct and drop their own
//! instances instead of sharing global state.

use crate::{Result, ToolingError};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Layered environment access: process env > `.env` file > default
#[derive(Debug, Clone, Default)]
pub struct EnvLoader {
    file_values: HashMap<String, String>,
    source: Option<PathBuf>,
}

impl EnvLoader {
    /// Create a loader with no `.env` file backing
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader from a `.env` file
    ///
    /// A missing file is not an error; the loader simply has no file layer.
    /// Lines are `KEY=VALUE`; `#` comments and blank lines are skipped, and
    /// single or double quotes around the value are stripped.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut file_values = HashMap::new();

        if let Ok(contents) = std::fs::read_to_string(path) {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    if !key.is_empty() {
                        file_values.insert(key.to_string(), value.to_string());
                    }
                }
            }
        }

        Self {
            file_values,
            source: Some(path.to_path_buf()),
        }
    }

    /// Path of the backing `.env` file, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Look up a variable: process env first, then the `.env` layer
    pub fn get(&self, key: &str) -> Option<String> {
        match env::var(key) {
            Ok(val) => Some(val),
            Err(env::VarError::NotPresent) | Err(env::VarError::NotUnicode(_)) => {
                self.file_values.get(key).cloned()
            }
        }
    }

    /// Look up a variable with a default
    pub fn get_or(&self, key: &str, default: impl Into<String>) -> String {
        self.get(key).unwrap_or_else(|| default.into())
    }

    /// Look up and parse a variable
    ///
    /// Returns `Ok(None)` when the variable is absent and an error when it
    /// is present but fails to parse.
    pub fn get_parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(val) => {
                let parsed = val.parse::<T>().map_err(|e| {
                    ToolingError::General(format!(
                        "Failed to parse environment variable {}: {}",
                        key, e
                    ))
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Look up a boolean variable
    ///
    /// Recognizes true/1/yes/on and false/0/no/off, case-insensitive.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            Some(val) => match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                other => Err(ToolingError::General(format!(
                    "Invalid boolean value for {}: {}",
                    key, other
                ))),
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_key_returns_none() {
        let loader = EnvLoader::new();
        assert!(loader.get("TOOLING_TEST_MISSING_VAR_12345").is_none());
    }

    #[test]
    fn test_get_or_default() {
        let loader = EnvLoader::new();
        assert_eq!(
            loader.get_or("TOOLING_TEST_MISSING_VAR_12345", "fallback"),
            "fallback"
        );
    }

    #[test]
    fn test_env_file_layer() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment line").unwrap();
        writeln!(file, "TOOLING_TEST_FILE_ONLY=from_file").unwrap();
        writeln!(file, "TOOLING_TEST_QUOTED=\"quoted value\"").unwrap();
        writeln!(file).unwrap();

        let loader = EnvLoader::from_file(file.path());
        assert_eq!(
            loader.get("TOOLING_TEST_FILE_ONLY").as_deref(),
            Some("from_file")
        );
        assert_eq!(
            loader.get("TOOLING_TEST_QUOTED").as_deref(),
            Some("quoted value")
        );
    }

    #[test]
    fn test_process_env_wins_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "TOOLING_TEST_PRECEDENCE=from_file").unwrap();

        env::set_var("TOOLING_TEST_PRECEDENCE", "from_env");
        let loader = EnvLoader::from_file(file.path());
        assert_eq!(
            loader.get("TOOLING_TEST_PRECEDENCE").as_deref(),
            Some("from_env")
        );
        env::remove_var("TOOLING_TEST_PRECEDENCE");
    }

    #[test]
    fn test_loading_does_not_mutate_process_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "TOOLING_TEST_NO_MUTATION=value").unwrap();

        let _loader = EnvLoader::from_file(file.path());
        assert!(env::var("TOOLING_TEST_NO_MUTATION").is_err());
    }

    #[test]
    fn test_missing_file_is_empty_layer() {
        let loader = EnvLoader::from_file("/nonexistent/path/.env");
        assert!(loader.get("ANYTHING_AT_ALL_XYZ").is_none());
    }

    #[test]
    fn test_get_parse() {
        env::set_var("TOOLING_TEST_NUMBER", "42");
        let loader = EnvLoader::new();
        let parsed: Option<i32> = loader.get_parse("TOOLING_TEST_NUMBER").unwrap();
        assert_eq!(parsed, Some(42));
        env::remove_var("TOOLING_TEST_NUMBER");
    }

    #[test]
    fn test_get_parse_invalid() {
        env::set_var("TOOLING_TEST_BAD_NUMBER", "not_a_number");
        let loader = EnvLoader::new();
        let parsed: Result<Option<i32>> = loader.get_parse("TOOLING_TEST_BAD_NUMBER");
        assert!(parsed.is_err());
        env::remove_var("TOOLING_TEST_BAD_NUMBER");
    }

    #[test]
    fn test_get_bool() {
        env::set_var("TOOLING_TEST_BOOL", "on");
        let loader = EnvLoader::new();
        assert_eq!(loader.get_bool("TOOLING_TEST_BOOL").unwrap(), Some(true));
        env::set_var("TOOLING_TEST_BOOL", "maybe");
        assert!(loader.get_bool("TOOLING_TEST_BOOL").is_err());
        env::remove_var("TOOLING_TEST_BOOL");
    }
}
