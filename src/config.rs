use serde::{Deserialize, Serialize};
use std::fs;

use crate::models::Tenant;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub static_dir: String,
    pub jwt_secret: String,
    pub default_tenant: Tenant,
    pub presence_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub min_frame_interval_ms: u64,
    pub viewer_tick_ms: u64,
    pub token_ttl_secs: i64,
    pub log_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 3001,
            data_dir: "data".to_string(),
            static_dir: "webui".to_string(),
            jwt_secret: "change-me-lookout".to_string(),
            default_tenant: Tenant::CLA1,
            presence_ttl_secs: 15,
            sweep_interval_secs: 3,
            min_frame_interval_ms: 250,
            viewer_tick_ms: 250,
            token_ttl_secs: 3600,
            log_buffer: 500,
        }
    }
}

pub fn load_config() -> Config {
    let mut cfg = match fs::read_to_string("config.toml") {
        Ok(content) => parse_config(&content),
        Err(_) => {
            tracing::info!("No config.toml found, using defaults");
            Config::default()
        }
    };
    apply_env(&mut cfg);
    cfg
}

fn parse_config(content: &str) -> Config {
    toml::from_str(content).unwrap_or_else(|e| {
        tracing::warn!("Failed to parse config.toml: {e}, using defaults");
        Config::default()
    })
}

/// Environment wins over the file: `PORT`, `JWT_SECRET`, `LOOKOUT_DEFAULT_TENANT`.
fn apply_env(cfg: &mut Config) {
    if let Ok(port) = std::env::var("PORT") {
        match port.parse() {
            Ok(p) => cfg.port = p,
            Err(_) => tracing::warn!("Ignoring non-numeric PORT: {port}"),
        }
    }
    if let Ok(secret) = std::env::var("JWT_SECRET") {
        if !secret.is_empty() {
            cfg.jwt_secret = secret;
        }
    }
    if let Ok(tenant) = std::env::var("LOOKOUT_DEFAULT_TENANT") {
        match tenant.parse() {
            Ok(t) => cfg.default_tenant = t,
            Err(_) => tracing::warn!("Ignoring unknown LOOKOUT_DEFAULT_TENANT: {tenant}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_is_garbage() {
        let cfg = parse_config("not even toml {{{");
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.default_tenant, Tenant::CLA1);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let cfg = parse_config("port = 9000\ndefault_tenant = \"DLA2\"\n");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.default_tenant, Tenant::DLA2);
        assert_eq!(cfg.presence_ttl_secs, 15);
        assert_eq!(cfg.min_frame_interval_ms, 250);
    }

    #[test]
    fn env_overrides_file() {
        std::env::set_var("PORT", "4444");
        std::env::set_var("LOOKOUT_DEFAULT_TENANT", "CLA2");
        let mut cfg = parse_config("port = 9000\n");
        apply_env(&mut cfg);
        assert_eq!(cfg.port, 4444);
        assert_eq!(cfg.default_tenant, Tenant::CLA2);
        std::env::remove_var("PORT");
        std::env::remove_var("LOOKOUT_DEFAULT_TENANT");
    }
}
