use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "revisit";
pub const DEFAULT_DB_NAME: &str = "revisit.db";
pub const CONFIG_FILE: &str = "config.toml";

pub const DB_ENV: &str = "REVISIT_DB";
pub const USER_ENV: &str = "REVISIT_USER";
pub const SHEET_ENV: &str = "REVISIT_SHEET";

pub const DEFAULT_SHEET: &str = "default";

/// Optional defaults read from `<config_dir>/revisit/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: Option<PathBuf>,
    pub user: Option<String>,
    pub sheet: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        match config_dir() {
            Some(dir) => Self::load_from(&dir.join(CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    /// Missing file means defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path_with(|k| env::var(k).ok())
    }

    pub fn db_path_with<F>(&self, lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DB_ENV) {
            return PathBuf::from(path);
        }
        if let Some(path) = &self.db_path {
            return path.clone();
        }

        let dir = config_dir().unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).ok();
        dir.join(DEFAULT_DB_NAME)
    }

    pub fn user(&self) -> Option<String> {
        self.user_with(|k| env::var(k).ok())
    }

    pub fn user_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(USER_ENV)
            .or_else(|| self.user.clone())
            .or_else(|| lookup("USER"))
            .filter(|u| !u.trim().is_empty())
    }

    pub fn sheet(&self) -> String {
        self.sheet_with(|k| env::var(k).ok())
    }

    pub fn sheet_with<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(SHEET_ENV)
            .or_else(|| self.sheet.clone())
            .unwrap_or_else(|| DEFAULT_SHEET.to_string())
    }
}

fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    mod load_tests {
        use super::*;

        #[test]
        fn missing_file_gives_defaults() {
            let dir = tempfile::tempdir().unwrap();
            let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
            assert_eq!(config, Config::default());
        }

        #[test]
        fn parses_all_fields() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join(CONFIG_FILE);
            fs::write(
                &path,
                "db_path = \"/tmp/r.db\"\nuser = \"ana\"\nsheet = \"blind75\"\n",
            )
            .unwrap();

            let config = Config::load_from(&path).unwrap();
            assert_eq!(config.db_path, Some(PathBuf::from("/tmp/r.db")));
            assert_eq!(config.user.as_deref(), Some("ana"));
            assert_eq!(config.sheet.as_deref(), Some("blind75"));
        }

        #[test]
        fn partial_file_leaves_rest_unset() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join(CONFIG_FILE);
            fs::write(&path, "sheet = \"grind\"\n").unwrap();

            let config = Config::load_from(&path).unwrap();
            assert!(config.db_path.is_none());
            assert_eq!(config.sheet.as_deref(), Some("grind"));
        }

        #[test]
        fn malformed_file_is_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join(CONFIG_FILE);
            fs::write(&path, "user = [").unwrap();
            assert!(Config::load_from(&path).is_err());
        }
    }

    mod resolve_tests {
        use super::*;

        #[test]
        fn db_env_wins_over_file() {
            let config = Config {
                db_path: Some(PathBuf::from("/from/file.db")),
                ..Config::default()
            };
            let path = config.db_path_with(env_of(&[(DB_ENV, "/from/env.db")]));
            assert_eq!(path, PathBuf::from("/from/env.db"));

            let path = config.db_path_with(env_of(&[]));
            assert_eq!(path, PathBuf::from("/from/file.db"));
        }

        #[test]
        fn default_db_path_ends_with_db_name() {
            let path = Config::default().db_path_with(env_of(&[]));
            assert!(path.ends_with(DEFAULT_DB_NAME));
        }

        #[test]
        fn user_falls_back_through_env_file_and_login() {
            let config = Config {
                user: Some("from-file".into()),
                ..Config::default()
            };
            let lookup = env_of(&[(USER_ENV, "from-env"), ("USER", "login")]);
            assert_eq!(config.user_with(lookup).as_deref(), Some("from-env"));

            let lookup = env_of(&[("USER", "login")]);
            assert_eq!(config.user_with(lookup).as_deref(), Some("from-file"));

            let lookup = env_of(&[("USER", "login")]);
            assert_eq!(Config::default().user_with(lookup).as_deref(), Some("login"));

            assert_eq!(Config::default().user_with(env_of(&[])), None);
        }

        #[test]
        fn sheet_defaults_when_unset() {
            assert_eq!(Config::default().sheet_with(env_of(&[])), DEFAULT_SHEET);
            let lookup = env_of(&[(SHEET_ENV, "neetcode")]);
            assert_eq!(Config::default().sheet_with(lookup), "neetcode");
        }
    }
}
