use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub file_logs: bool,
    pub log_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_logs = std::env::var("ENABLE_FILE_LOGS")
            .map(|value| env_flag(&value))
            .unwrap_or(false);

        let log_dir = std::env::var("LOG_DIR")
            .ok()
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./logs"));

        Self {
            log_level,
            file_logs,
            log_dir,
        }
    }
}

fn env_flag(value: &str) -> bool {
    value == "true" || value == "1"
}
