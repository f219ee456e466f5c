// Local time formatting for log timestamps
use chrono::Local;

// Global log level (Debug, Info, Warn, Error)
use log::LevelFilter;

// Dispatch builder plus level coloring for the console branch
use fern::Dispatch;
use fern::colors::{Color, ColoredLevelConfig};

// Standard I/O and filesystem operations (stdout, log directory creation)
use std::{fs, io};

// Initialize the global dispatcher exactly once per process
use std::sync::OnceLock;

use crate::config::LoggerConfig;

/// Zero-sized logging handle. Clone it into every task.
#[derive(Clone, Debug, Default)]
pub struct Logger;

impl Logger {
    pub fn debug(&self, msg: &str) {
        log::debug!("{}", msg);
    }

    pub fn info(&self, msg: &str) {
        log::info!("{}", msg);
    }

    pub fn warn(&self, msg: &str) {
        log::warn!("{}", msg);
    }

    pub fn error(&self, msg: &str) {
        log::error!("{}", msg);
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Path of the log file for `name` under `dir`; dots in the name become underscores.
fn log_file_path(dir: &str, name: &str) -> String {
    let file = format!("{}.log", name.replace('.', "_"));
    if dir.is_empty() {
        file
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), file)
    }
}

/// Initialize the global logger once, according to `cfg`.
///
/// Later calls return the same handle and ignore their arguments. A failure to
/// install the dispatcher (another logger already set) is reported on stderr
/// and the handle is still returned.
pub fn init_logger(name: &str, cfg: &LoggerConfig) -> Logger {
    LOGGER
        .get_or_init(|| {
            let level = cfg.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
            let mut base = Dispatch::new().level(level);

            // ── console branch ──────────────────────────────────────────
            if cfg.enable_console_log {
                let nm = name.to_string();
                let datefmt = cfg.date_format.clone();
                let colors = ColoredLevelConfig::new()
                    .info(Color::Green)
                    .warn(Color::Yellow)
                    .error(Color::Red)
                    .debug(Color::Blue);

                base = base.chain(
                    Dispatch::new()
                        .format(move |out, message, record| {
                            out.finish(format_args!(
                                "\x1b[92m{}\x1b[0m - \x1b[94m{}\x1b[0m - {} - {}",
                                Local::now().format(&datefmt),
                                nm,
                                colors.color(record.level()),
                                message
                            ))
                        })
                        .chain(io::stdout()),
                );
            }

            // ── file branch ─────────────────────────────────────────────
            if cfg.enable_file_log {
                if !cfg.log_file_path.is_empty() {
                    let _ = fs::create_dir_all(&cfg.log_file_path);
                }

                let nm = name.to_string();
                let datefmt = cfg.date_format.clone();
                let enable_json = cfg.enable_json_log;
                let filepath = log_file_path(&cfg.log_file_path, name);

                let file_output: Box<dyn io::Write + Send> = match fern::log_file(&filepath) {
                    Ok(fh) => Box::new(fh),
                    Err(err) => {
                        eprintln!("Warning: could not open log file {}: {}", filepath, err);
                        Box::new(io::sink())
                    }
                };

                base = base.chain(
                    Dispatch::new()
                        .format(move |out, message, record| {
                            if enable_json {
                                let envelope = serde_json::json!({
                                    "timestamp": Local::now().format(&datefmt).to_string(),
                                    "name":      nm,
                                    "level":     record.level().to_string(),
                                    "target":    record.target(),
                                    "message":   message.to_string(),
                                });
                                out.finish(format_args!("{}", envelope))
                            } else {
                                out.finish(format_args!(
                                    "{} - {} - {} - {}",
                                    Local::now().format(&datefmt),
                                    nm,
                                    record.level(),
                                    message
                                ))
                            }
                        })
                        .chain(file_output),
                );
            }

            if let Err(err) = base.apply() {
                eprintln!("Warning: logger already initialized: {}", err);
            }

            Logger
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_path_joins_dir_and_sanitized_name() {
        assert_eq!(log_file_path("", "file.exchange"), "file_exchange.log");
        assert_eq!(log_file_path("logs/", "server"), "logs/server.log");
        assert_eq!(log_file_path("logs", "server"), "logs/server.log");
    }
}
