use std::path::PathBuf;

use rand::distributions::Alphanumeric;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the intercepting proxy listens on.
    pub proxy_port: u16,
    /// Port the admin REST API + dashboard stream listen on.
    pub admin_port: u16,
    /// Directory holding policy.json, access_rules.json, and budget.db.
    pub data_dir: PathBuf,
    /// Admin API key required on mutating admin requests.
    pub api_key: String,
    /// True when the key was generated at startup rather than provided.
    pub api_key_generated: bool,
    /// Origins allowed by CORS on the admin surface.
    pub cors_origins: Vec<String>,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let (api_key, api_key_generated) = match std::env::var("PF_API_KEY") {
        Ok(k) if !k.trim().is_empty() => (k, false),
        _ => (generate_api_key(), true),
    };

    let cors_origins: Vec<String> = std::env::var("PF_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".into())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    Ok(Config {
        proxy_port: std::env::var("PF_PROXY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080),
        admin_port: std::env::var("PF_ADMIN_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8081),
        data_dir: std::env::var("PF_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data")),
        api_key,
        api_key_generated,
        cors_origins,
    })
}

/// 32-char alphanumeric admin key, printed in the startup banner when no
/// PF_API_KEY is provided.
fn generate_api_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
