use std::path::PathBuf;
use std::time::Duration;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::StoreResult;
use crate::store::{FallbackStore, LocalMirror, PgStore};

/// Connection settings gathered from flags and the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub mirror_path: PathBuf,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Settings {
    /// Without a database URL every call is served by the mirror.
    pub fn open_store(&self) -> StoreResult<FallbackStore> {
        let remote = match &self.database_url {
            Some(url) => Some(PgStore::connect_lazy(
                url,
                self.max_connections,
                self.acquire_timeout,
            )?),
            None => None,
        };
        Ok(FallbackStore::new(remote, LocalMirror::open(&self.mirror_path)))
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_settings_open_without_remote() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            database_url: None,
            mirror_path: dir.path().join("mirror.json"),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(3),
        };
        let store = settings.open_store().unwrap();
        assert!(store.remote().is_none());
    }
}
