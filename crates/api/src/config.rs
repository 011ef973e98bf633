use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use promptreel_luma::api::DEFAULT_API_URL;
use promptreel_pipeline::poller::{DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use promptreel_pipeline::PollPolicy;

/// Server configuration, read once at startup.
///
/// Only the Luma credential may be absent. Without it the server still
/// starts, reports `configured: false` on `/health` and rejects every
/// generation request with a configuration error.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Deadline for producing a response head. Streamed batch bodies run
    /// past it.
    pub request_timeout_secs: u64,
    /// Grace period for compose tasks after the listener closes.
    pub shutdown_timeout_secs: u64,
    /// Root of stored assets, served under `/generated`.
    pub output_dir: PathBuf,
    pub luma_api_key: Option<String>,
    pub luma_api_url: String,
    /// Delay between status polls of one job.
    pub poll_interval_ms: u64,
    /// Polls per job before it is abandoned as timed out. At least 1.
    pub poll_max_attempts: u32,
}

impl ServerConfig {
    /// Load configuration from the environment (after `.env`, if any).
    ///
    /// | Env Var                 | Default                                    |
    /// |-------------------------|--------------------------------------------|
    /// | `HOST`                  | `0.0.0.0`                                  |
    /// | `PORT`                  | `3000`                                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` (comma-separated)  |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                                       |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                                       |
    /// | `OUTPUT_DIR`            | `generated`                                |
    /// | `LUMA_API_KEY`          | unset                                      |
    /// | `LUMA_API_URL`          | `https://api.lumalabs.ai/dream-machine/v1` |
    /// | `POLL_INTERVAL_MS`      | `2000`                                     |
    /// | `POLL_MAX_ATTEMPTS`     | `30`                                       |
    ///
    /// Panics on unparsable values.
    pub fn from_env() -> Self {
        let poll_max_attempts = parsed_var("POLL_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS);
        assert!(poll_max_attempts > 0, "POLL_MAX_ATTEMPTS must be at least 1");

        Self {
            host: string_var("HOST", "0.0.0.0"),
            port: parsed_var("PORT", 3000),
            cors_origins: split_origins(&string_var("CORS_ORIGINS", "http://localhost:5173")),
            request_timeout_secs: parsed_var("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: parsed_var("SHUTDOWN_TIMEOUT_SECS", 30),
            output_dir: PathBuf::from(string_var("OUTPUT_DIR", "generated")),
            luma_api_key: std::env::var("LUMA_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            luma_api_url: string_var("LUMA_API_URL", DEFAULT_API_URL),
            poll_interval_ms: parsed_var("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL.as_millis() as u64),
            poll_max_attempts,
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.poll_max_attempts,
        }
    }
}

fn string_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_var<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} has an invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_trimmed_and_blank_entries_dropped() {
        assert_eq!(
            split_origins(" http://a.test , ,http://b.test,"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }

    #[test]
    fn missing_variable_uses_default() {
        assert_eq!(parsed_var::<u32>("PROMPTREEL_TEST_UNSET_VARIABLE", 7), 7);
    }

    #[test]
    fn poll_policy_uses_milliseconds() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origins: vec![],
            request_timeout_secs: 30,
            shutdown_timeout_secs: 30,
            output_dir: PathBuf::from("out"),
            luma_api_key: None,
            luma_api_url: DEFAULT_API_URL.into(),
            poll_interval_ms: 250,
            poll_max_attempts: 4,
        };
        assert_eq!(
            config.poll_policy(),
            PollPolicy {
                interval: Duration::from_millis(250),
                max_attempts: 4,
            }
        );
    }
}
