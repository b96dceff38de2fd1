use anyhow::{Context, Result};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use tracing::info;

pub struct Config {
    pub db_path: PathBuf,
    pub busy_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        let db_path = match env::var("PLACEMENT_DB") {
            Ok(path) => PathBuf::from(path),
            Err(_) => {
                let path = default_db_path();
                info!("PLACEMENT_DB not set, using default: {}", path.display());
                path
            }
        };
        let busy_timeout_ms: u64 = try_load("PLACEMENT_BUSY_TIMEOUT_MS", "5000")?;

        Ok(Self {
            db_path,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
        })
    }
}

fn default_db_path() -> PathBuf {
    // XDG data directory, else the current directory
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "placement") {
        proj_dirs.data_dir().join("placement.db")
    } else {
        PathBuf::from("placement.db")
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .with_context(|| format!("Invalid {key} value: '{raw}'"))
}
