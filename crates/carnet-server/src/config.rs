use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Secrets that ship in sample env files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "dev-secret-change-me", "secret"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("CARNET_JWT_SECRET").context("CARNET_JWT_SECRET is not set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("CARNET_JWT_SECRET is a placeholder, set a real secret");
        }

        let port = match lookup("CARNET_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("CARNET_PORT is not a port number: {raw}"))?,
            None => 3000,
        };

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(lookup("CARNET_DB_PATH").unwrap_or_else(|| "carnet.db".into())),
            host: lookup("CARNET_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("CARNET_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("carnet.db"));
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn secret_is_required_and_not_placeholder() {
        assert!(config(&[]).is_err());
        assert!(config(&[("CARNET_JWT_SECRET", "dev-secret-change-me")]).is_err());
        assert!(config(&[("CARNET_JWT_SECRET", "  ")]).is_err());
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = config(&[("CARNET_JWT_SECRET", "s3cr3t-value"), ("CARNET_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("CARNET_PORT"));
    }
}
