use crate::conversations::KeyScheme;
use crate::entity::Viewer;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageKind,
    pub db_path: PathBuf,
    pub viewer: Viewer,
    pub key_scheme: KeyScheme,
    pub seed_posts: bool,
}

impl Config {
    /// Read settings from the process environment (after `.env` is loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let storage = match lookup("CUBEOFFERS_STORAGE").as_deref().map(str::trim) {
            None | Some("") | Some("sqlite") => StorageKind::Sqlite,
            Some("memory") => StorageKind::Memory,
            Some(other) => bail!("CUBEOFFERS_STORAGE must be sqlite or memory, got '{}'", other),
        };

        // We use ~/.cubeoffers/cubeoffers.db unless told otherwise
        let db_path = match lookup("CUBEOFFERS_DB_PATH") {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => {
                let home_dir = lookup("HOME").unwrap_or_else(|| ".".into());
                PathBuf::from(home_dir)
                    .join(".cubeoffers")
                    .join("cubeoffers.db")
            }
        };

        let viewer = Viewer::new(
            lookup("CUBEOFFERS_USER_ID").unwrap_or_else(|| "user-123".into()),
            lookup("CUBEOFFERS_USER_NAME").unwrap_or_else(|| "CurrentUser".into()),
        );

        let key_scheme = match lookup("CUBEOFFERS_CONVERSATION_KEYS") {
            Some(value) => value
                .parse()
                .context("Invalid CUBEOFFERS_CONVERSATION_KEYS")?,
            None => KeyScheme::default(),
        };

        let seed_posts = match lookup("CUBEOFFERS_SEED").as_deref().map(str::trim) {
            None | Some("") | Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => bail!("CUBEOFFERS_SEED must be true or false, got '{}'", other),
        };

        Ok(Self {
            storage,
            db_path,
            viewer,
            key_scheme,
            seed_posts,
        })
    }
}
