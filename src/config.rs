use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded once at startup from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub llm_url: String,
    pub llm_model: String,
    /// Absent key means CHARON runs in offline/fallback mode.
    pub llm_api_key: Option<String>,
    pub llm_timeout_secs: u64,
    /// Root of the campaign data tree (persona config, galaxy locations).
    pub data_dir: PathBuf,
    /// Obsidian vault root for lore notes. Absent disables lore loading.
    pub vault_path: Option<PathBuf>,
    /// TTL for per-channel session keys, refreshed on every write.
    pub session_ttl_secs: u64,
    /// How many trailing conversation turns are sent to the model.
    pub history_window: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();
        Self::build()
    }

    fn build() -> Self {
        Config {
            llm_url: env::var("LLM_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "local-model".to_string()),
            llm_api_key: env::var("LLM_API_KEY").ok(),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            data_dir: env::var("CAMPAIGN_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            vault_path: env::var("OBSIDIAN_VAULT_PATH").ok().map(PathBuf::from),
            session_ttl_secs: env::var("SESSION_TTL_SECS")
                .unwrap_or_else(|_| "14400".to_string())
                .parse()
                .unwrap_or(14400),
            history_window: env::var("HISTORY_WINDOW")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

#[cfg(test)]
pub(crate) fn test_config(data_dir: impl Into<PathBuf>) -> Config {
    Config {
        llm_url: "http://localhost:0/v1".to_string(),
        llm_model: "test-model".to_string(),
        llm_api_key: None,
        llm_timeout_secs: 1,
        data_dir: data_dir.into(),
        vault_path: None,
        session_ttl_secs: 60,
        history_window: 10,
    }
}
