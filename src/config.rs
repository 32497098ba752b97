//! Startup configuration read from the environment.
//!
//! - `TASKLIST_STORAGE`: `sqlite` (default) | `file`
//! - `TASKLIST_DB_PATH`: SQLite database path (default `todo.db`)
//! - `TASKLIST_TASKS_FILE`: JSON file path for the file backend (default `tasks.json`)
//! - `TASKLIST_ADDR`: listen address (default `0.0.0.0:5876`)

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};

use crate::db::SqliteRepository;
use crate::file_store::JsonFileRepository;
use crate::repository::TaskRepository;

const DEFAULT_ADDR: &str = "0.0.0.0:5876";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite { path: PathBuf },
    File { path: PathBuf },
}

/// Who the caller is, decided once at startup by the storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    /// Every request is the same local user; the file backend has no owners.
    SingleUser,
    /// The caller is named by the authenticating proxy in front of the server.
    MultiUser,
}

impl IdentityMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleUser => "single-user",
            Self::MultiUser => "multi-user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub addr: SocketAddr,
    pub storage: StorageBackend,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let addr = var("TASKLIST_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr
            .trim()
            .parse::<SocketAddr>()
            .with_context(|| format!("TASKLIST_ADDR `{addr}` is not a socket address"))?;

        let storage = match var("TASKLIST_STORAGE").as_deref().map(str::trim) {
            None | Some("sqlite") => StorageBackend::Sqlite {
                path: var("TASKLIST_DB_PATH")
                    .map_or_else(|| PathBuf::from("todo.db"), PathBuf::from),
            },
            Some("file") => StorageBackend::File {
                path: var("TASKLIST_TASKS_FILE")
                    .map_or_else(|| PathBuf::from("tasks.json"), PathBuf::from),
            },
            Some(other) => bail!("TASKLIST_STORAGE `{other}` must be `sqlite` or `file`"),
        };

        Ok(Self { addr, storage })
    }

    pub fn identity_mode(&self) -> IdentityMode {
        match self.storage {
            StorageBackend::Sqlite { .. } => IdentityMode::MultiUser,
            StorageBackend::File { .. } => IdentityMode::SingleUser,
        }
    }

    pub fn open_repository(&self) -> anyhow::Result<Arc<dyn TaskRepository>> {
        let repo: Arc<dyn TaskRepository> = match &self.storage {
            StorageBackend::Sqlite { path } => Arc::new(SqliteRepository::open(path)?),
            StorageBackend::File { path } => {
                let repo = JsonFileRepository::new(path);
                repo.ensure_exists()
                    .with_context(|| format!("creating task file at {}", path.display()))?;
                Arc::new(repo)
            }
        };
        Ok(repo)
    }
}
