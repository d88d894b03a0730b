// nllb-sidecar: configuration, sourced from environment

use std::env;

use crate::error::SidecarError;

/// Process configuration. Every field is sourced from an environment
/// variable, matching the external interface the original server exposes;
/// there is no config-file layer since this runs as a single-tenant
/// sidecar with no shared config surface.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    pub api_key: Option<String>,

    pub model_name_override: Option<String>,
    pub params_override: Option<String>,
    pub device_override: Option<String>,
    pub compute_type_override: Option<String>,

    pub ct2_model_dir: String,

    pub vram_soft_mb: u64,
    pub vram_hard_mb: u64,
    pub ram_soft_mb: u64,
    pub ram_hard_mb: u64,
    pub swap_hard_mb: u64,
    pub normal_interval_s: f64,
    pub fast_interval_s: f64,
    pub log_interval_s: f64,

    pub failure_ledger_path: String,

    pub git_commit_date: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls_cert_path: "/tmp/tls/cert.pem".to_string(),
            tls_key_path: "/tmp/tls/key.pem".to_string(),
            api_key: None,
            model_name_override: None,
            params_override: None,
            device_override: None,
            compute_type_override: None,
            ct2_model_dir: "/tmp/nllb-ct2-models".to_string(),
            vram_soft_mb: 2000,
            vram_hard_mb: 500,
            ram_soft_mb: 4000,
            ram_hard_mb: 1000,
            swap_hard_mb: 0,
            normal_interval_s: 5.0,
            fast_interval_s: 0.25,
            log_interval_s: 30.0,
            failure_ledger_path: "/tmp/nllb-failure-ledger.json".to_string(),
            git_commit_date: None,
        }
    }
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, SidecarError> {
        let mut cfg = Config::default();

        if let Ok(v) = env::var("NLLB_BIND_ADDRESS") {
            cfg.bind_address = v;
        }
        if let Ok(v) = env::var("NLLB_TLS_CERT_PATH") {
            cfg.tls_cert_path = v;
        }
        if let Ok(v) = env::var("NLLB_TLS_KEY_PATH") {
            cfg.tls_key_path = v;
        }
        cfg.api_key = Self::load_api_key();

        cfg.model_name_override = env::var("MODEL_NAME").ok();
        cfg.params_override = env::var("NLLB_PARAMS").ok();
        cfg.device_override = env::var("NLLB_DEVICE").ok();
        cfg.compute_type_override = env::var("NLLB_COMPUTE_TYPE").ok();

        if let Ok(v) = env::var("CT2_MODEL_DIR") {
            cfg.ct2_model_dir = v;
        }
        if let Ok(v) = env::var("NLLB_FAILURE_LEDGER_PATH") {
            cfg.failure_ledger_path = v;
        }

        cfg.vram_soft_mb = Self::parse_env_or("NLLB_VRAM_SOFT_MB", cfg.vram_soft_mb)?;
        cfg.vram_hard_mb = Self::parse_env_or("NLLB_VRAM_HARD_MB", cfg.vram_hard_mb)?;
        cfg.ram_soft_mb = Self::parse_env_or("NLLB_RAM_SOFT_MB", cfg.ram_soft_mb)?;
        cfg.ram_hard_mb = Self::parse_env_or("NLLB_RAM_HARD_MB", cfg.ram_hard_mb)?;
        cfg.swap_hard_mb = Self::parse_env_or("NLLB_SWAP_HARD_MB", cfg.swap_hard_mb)?;
        cfg.normal_interval_s = Self::parse_env_or("NLLB_NORMAL_INTERVAL_S", cfg.normal_interval_s)?;
        cfg.fast_interval_s = Self::parse_env_or("NLLB_FAST_INTERVAL_S", cfg.fast_interval_s)?;
        cfg.log_interval_s = Self::parse_env_or("NLLB_LOG_INTERVAL_S", cfg.log_interval_s)?;

        cfg.git_commit_date = env::var("NLLB_GIT_COMMIT_DATE").ok();

        Ok(cfg)
    }

    fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, SidecarError> {
        match env::var(key) {
            Ok(v) => v
                .parse()
                .map_err(|_| SidecarError::ConfigError(format!("invalid value for {key}: {v}"))),
            Err(_) => Ok(default),
        }
    }

    /// `NLLB_API_KEY` env var, falling back to a mounted secret file.
    fn load_api_key() -> Option<String> {
        if let Ok(v) = env::var("NLLB_API_KEY") {
            return Some(v);
        }
        std::fs::read_to_string("/run/secrets/nllb-api-key")
            .ok()
            .map(|s| s.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.vram_hard_mb < cfg.vram_soft_mb);
        assert!(cfg.ram_hard_mb < cfg.ram_soft_mb);
        assert!(cfg.fast_interval_s < cfg.normal_interval_s);
    }
}
