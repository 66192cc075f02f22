use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

use huddle_gateway::dispatcher::FanoutMode;

const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub fanout: FanoutMode,
}

impl Config {
    /// Read `HUDDLE_*` variables from the process environment. Call after
    /// `dotenvy::dotenv()` so a local `.env` is honoured.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("HUDDLE_JWT_SECRET").unwrap_or_else(|| {
            warn!("HUDDLE_JWT_SECRET not set, using the development secret");
            DEV_SECRET.into()
        });
        let db_path = lookup("HUDDLE_DB_PATH").unwrap_or_else(|| "huddle.db".into());
        let host = lookup("HUDDLE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("HUDDLE_PORT") {
            Some(raw) => raw.parse().with_context(|| format!("invalid HUDDLE_PORT {raw:?}"))?,
            None => 3000,
        };
        let upload_dir = lookup("HUDDLE_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into());
        let fanout = match lookup("HUDDLE_FANOUT") {
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid HUDDLE_FANOUT {raw:?}: {e}"))?,
            None => FanoutMode::default(),
        };

        Ok(Self {
            jwt_secret,
            db_path: db_path.into(),
            host,
            port,
            upload_dir: upload_dir.into(),
            fanout,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
