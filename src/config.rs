use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_TEST_DURATION_SECS: u64 = 90 * 60;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 6 * 60 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Spreadsheet webhook. `None` leaves submissions unconfigured.
    pub webhook_url: Option<String>,
    /// Shared secret for the admin surface. Compared in plain text, not an auth layer.
    pub admin_password: String,
    /// JSON file holding the edited question bank. `None` keeps edits in memory.
    pub question_bank_path: Option<String>,
    pub test_duration: Duration,
    pub submit_timeout: Duration,
    /// Participant sessions older than this are dropped when new ones are created.
    pub session_ttl: Duration,
    pub cors_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            webhook_url: None,
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
            question_bank_path: None,
            test_duration: Duration::from_secs(DEFAULT_TEST_DURATION_SECS),
            submit_timeout: Duration::from_secs(30),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            cors_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        let question_bank_path = non_blank_env("QUESTION_BANK_PATH")
            .or_else(|| Some(format!("{}/question_bank.json", env!("CARGO_MANIFEST_DIR"))));
        let cors_origins = non_blank_env("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or(default.cors_origins);

        Self {
            host: non_blank_env("BACKEND_HOST").unwrap_or(default.host),
            port: non_blank_env("BACKEND_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),
            webhook_url: non_blank_env("SHEETS_WEBHOOK_URL"),
            admin_password: non_blank_env("ADMIN_PASSWORD").unwrap_or(default.admin_password),
            question_bank_path,
            test_duration: non_blank_env("TEST_DURATION_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.test_duration),
            submit_timeout: non_blank_env("SUBMIT_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.submit_timeout),
            session_ttl: non_blank_env("SESSION_TTL_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.session_ttl),
            cors_origins,
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn uses_default_admin_password(&self) -> bool {
        self.admin_password == DEFAULT_ADMIN_PASSWORD
    }
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_timer_and_port() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.test_duration, Duration::from_secs(5400));
        assert_eq!(cfg.bind_addr().unwrap().port(), 8080);
        assert!(cfg.uses_default_admin_password());
        assert!(cfg.webhook_url.is_none());
        assert!(cfg.session_ttl > cfg.test_duration);
    }
}
