use crate::http_client::DEFAULT_USER_AGENT;
use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

const CONFIG_PATH: &str = "data/config.yaml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Portal login, shared by every adapter.
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub use_test_instance: bool,
    #[serde(default)]
    pub union_portal: bool,
    /// Optional endpoint for room capacity and campus metadata.
    #[serde(default)]
    pub room_info_url: Option<String>,
    #[serde(default = "default_tracing_level")]
    pub tracing_level: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_rankings_path")]
    pub rankings_path: String,
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
    /// Base64 of the 32-byte key sealing the credential cookie. Only the
    /// server needs it.
    #[serde(default)]
    pub server_secret: String,
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
}

fn default_tracing_level() -> String {
    "info".to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_rankings_path() -> String {
    "data/rankings.json".to_string()
}

fn default_call_timeout_seconds() -> u64 {
    30
}

fn default_server_addr() -> String {
    "127.0.0.1:3000".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config: Config = if let Ok(config_str) = fs::read_to_string(CONFIG_PATH) {
            serde_yaml::from_str(&config_str)?
        } else {
            Config {
                username: String::new(),
                password: String::new(),
                use_test_instance: false,
                union_portal: false,
                room_info_url: None,
                tracing_level: default_tracing_level(),
                user_agent: default_user_agent(),
                rankings_path: default_rankings_path(),
                call_timeout_seconds: default_call_timeout_seconds(),
                server_secret: String::new(),
                server_addr: default_server_addr(),
            }
        };

        // Environment variables win over the file
        if let Ok(username) = env::var("ROOMBOOK_USERNAME") {
            config.username = username;
        }
        if let Ok(password) = env::var("ROOMBOOK_PASSWORD") {
            config.password = password;
        }
        if let Ok(test) = env::var("ROOMBOOK_TEST_INSTANCE") {
            config.use_test_instance = test
                .parse()
                .context("Failed to parse ROOMBOOK_TEST_INSTANCE environment variable")?;
        }
        if let Ok(union_portal) = env::var("ROOMBOOK_UNION_PORTAL") {
            config.union_portal = union_portal
                .parse()
                .context("Failed to parse ROOMBOOK_UNION_PORTAL environment variable")?;
        }
        if let Ok(url) = env::var("ROOMBOOK_ROOM_INFO_URL") {
            config.room_info_url = if url.is_empty() { None } else { Some(url) };
        }
        if let Ok(tracing_level) = env::var("ROOMBOOK_TRACING_LEVEL") {
            config.tracing_level = tracing_level;
        }
        if let Ok(user_agent) = env::var("ROOMBOOK_USER_AGENT") {
            config.user_agent = user_agent;
        }
        if let Ok(rankings_path) = env::var("ROOMBOOK_RANKINGS_PATH") {
            config.rankings_path = rankings_path;
        }
        if let Ok(timeout) = env::var("ROOMBOOK_CALL_TIMEOUT_SECONDS") {
            config.call_timeout_seconds = timeout
                .parse()
                .context("Failed to parse ROOMBOOK_CALL_TIMEOUT_SECONDS environment variable")?;
        }
        if let Ok(secret) = env::var("ROOMBOOK_SERVER_SECRET") {
            config.server_secret = secret;
        }
        if let Ok(addr) = env::var("ROOMBOOK_SERVER_ADDR") {
            config.server_addr = addr;
        }

        Ok(config)
    }

    /// Login checked lazily so the server, which gets credentials per request,
    /// can run without any in the config.
    pub fn require_login(&self) -> Result<()> {
        if self.username.is_empty() {
            anyhow::bail!(
                "username is required (set via {CONFIG_PATH} or ROOMBOOK_USERNAME env var)"
            );
        }
        if self.password.is_empty() {
            anyhow::bail!(
                "password is required (set via {CONFIG_PATH} or ROOMBOOK_PASSWORD env var)"
            );
        }
        Ok(())
    }

    /// Decodes the cookie-sealing key.
    pub fn secret_key(&self) -> Result<[u8; 32]> {
        if self.server_secret.is_empty() {
            anyhow::bail!(
                "server_secret is required (set via {CONFIG_PATH} or ROOMBOOK_SERVER_SECRET env var)"
            );
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.server_secret)
            .context("server_secret is not valid base64")?;
        bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("server_secret must decode to exactly 32 bytes"))
    }

    pub fn create_default() -> Result<()> {
        std::fs::create_dir_all("data")?;

        let default_config = Config {
            username: "YOUR_CID".to_string(),
            password: "YOUR_PASSWORD".to_string(),
            use_test_instance: false,
            union_portal: false,
            room_info_url: None,
            tracing_level: "info".to_string(),
            user_agent: default_user_agent(),
            rankings_path: default_rankings_path(),
            call_timeout_seconds: default_call_timeout_seconds(),
            server_secret: String::new(),
            server_addr: default_server_addr(),
        };

        let config_str = serde_yaml::to_string(&default_config)?;
        fs::write(CONFIG_PATH, config_str)?;
        Ok(())
    }
}
