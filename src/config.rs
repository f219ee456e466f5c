// Serde derives so the whole config can be read from a JSON file
use serde::Deserialize;

// Paths for the storage directory and config file
use std::path::{Path, PathBuf};

// Duration for the shutdown grace period
use std::time::Duration;

use crate::error::ConfigError;

//////////////////////
// LoggerConfig     //
//////////////////////

/// Everything the fern dispatcher needs to know
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum level, parsed into a `log::LevelFilter` ("debug", "info", ...)
    pub log_level: String,

    /// Write colored lines to stdout
    pub enable_console_log: bool,

    /// Also write to `<log_file_path>/<name>.log`
    pub enable_file_log: bool,

    /// Directory for the log file; empty means the working directory
    pub log_file_path: String,

    /// Emit JSON envelopes instead of plain text in the log file
    pub enable_json_log: bool,

    /// chrono format string used for timestamps
    pub date_format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_console_log: true,
            enable_file_log: false,
            log_file_path: String::new(),
            enable_json_log: false,
            date_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

//////////////////////
// ServerConfig     //
//////////////////////

/// All the settings the server needs. Missing keys fall back to defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP or hostname to listen on
    pub host: String,

    /// Port number; 0 asks the OS for a free one
    pub port: u16,

    /// Pending-connection queue length passed to `listen`
    pub backlog: u32,

    /// Directory holding one file per stored name
    pub storage_dir: PathBuf,

    /// Size of the single read that is treated as one command
    pub command_buffer_size: usize,

    /// Chunk size used when streaming file payloads
    pub chunk_size: usize,

    /// Milliseconds to wait for handler tasks after shutdown before aborting them
    pub shutdown_grace_ms: u64,

    /// Milliseconds to sleep after a failed accept
    pub accept_error_backoff_ms: u64,

    /// How many Tokio worker threads to spin up (defaults to cpu-1)
    pub worker_threads: usize,

    /// Logging settings
    pub logger: LoggerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10000,
            backlog: 5,
            storage_dir: PathBuf::from("file_storage"),
            command_buffer_size: 1024,
            chunk_size: 1024,
            shutdown_grace_ms: 2000,
            accept_error_backoff_ms: 100,
            worker_threads: num_cpus::get().saturating_sub(1).max(1),
            logger: LoggerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file. Keys that are absent keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Parse a config from JSON text and validate it.
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_buffer_size == 0 {
            return Err(ConfigError::Invalid("command_buffer_size must be > 0"));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0"));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be > 0"));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be > 0"));
        }
        Ok(())
    }

    /// The "host:port" string handed to the resolver.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = ServerConfig::from_json_str("{}").unwrap();
        assert_eq!(config.port, 10000);
        assert_eq!(config.backlog, 5);
        assert_eq!(config.command_buffer_size, 1024);
        assert_eq!(config.storage_dir, PathBuf::from("file_storage"));
        assert_eq!(config.logger.log_level, "info");
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = ServerConfig::from_json_str(
            r#"{ "port": 9000, "storage_dir": "/tmp/x", "logger": { "log_level": "debug" } }"#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.logger.log_level, "debug");
        assert!(config.logger.enable_console_log);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = ServerConfig::from_json_str(r#"{ "chunk_size": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = ServerConfig::from_json_str("{ port: ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ServerConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
