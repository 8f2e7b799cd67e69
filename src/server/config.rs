//! Server configuration.

use crate::error::ConfigError;
use crate::{DEFAULT_PORT, DEFAULT_READER_THREADS};
use std::fs;
use std::path::{Path, PathBuf};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub ip: String,
    /// Port number
    pub port: u16,
    /// Password clients must present, `None` to disable authentication
    pub auth: Option<String>,
    /// IP prefixes allowed to connect (repeatable directive)
    pub allow: Vec<String>,
    /// IP prefixes denied (repeatable directive)
    pub deny: Vec<String>,
    /// Reader pool size
    pub readers: usize,
    /// Working directory
    pub work_dir: PathBuf,
    /// PID file path
    pub pidfile: Option<PathBuf>,
    /// Log file path (empty for stderr)
    pub logfile: Option<PathBuf>,
    /// Log level
    pub loglevel: LogLevel,
    /// Daemonize the server
    pub daemonize: bool,
}

/// Log verbosity, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter directive understood by the tracing subscriber.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            auth: None,
            allow: Vec::new(),
            deny: Vec::new(),
            readers: DEFAULT_READER_THREADS,
            work_dir: PathBuf::from("."),
            pidfile: None,
            logfile: None,
            loglevel: LogLevel::Info,
            daemonize: false,
        }
    }
}

impl Config {
    /// Address string to bind the listener to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Load configuration from a file.
    ///
    /// # Format
    /// ```text
    /// # Comment
    /// directive value
    /// directive "value with spaces"
    /// ```
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (directive, value) =
                Self::parse_line(line).ok_or_else(|| ConfigError::ParseError {
                    line: line_num + 1,
                    message: "Invalid directive format".to_string(),
                })?;

            config.apply_directive(&directive.to_lowercase(), value, line_num + 1)?;
        }

        Ok(config)
    }

    /// Parse a single config line into directive and value.
    fn parse_line(line: &str) -> Option<(&str, &str)> {
        let mut parts = line.splitn(2, |c: char| c.is_whitespace());
        let directive = parts.next()?.trim();
        let value = parts.next().map(|v| v.trim()).unwrap_or("");

        // Strip surrounding quotes
        let value = if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
            &value[1..value.len() - 1]
        } else {
            value
        };

        Some((directive, value))
    }

    /// Apply a single directive to the config.
    fn apply_directive(
        &mut self,
        directive: &str,
        value: &str,
        line: usize,
    ) -> Result<(), ConfigError> {
        match directive {
            "ip" => self.ip = value.to_string(),
            "port" => self.port = parse_number(value, line)?,
            "auth" => {
                if value.is_empty() {
                    self.auth = None;
                } else {
                    self.auth = Some(value.to_string());
                }
            }
            "allow" => self.allow.push(value.to_string()),
            "deny" => self.deny.push(value.to_string()),
            "readers" => self.readers = parse_number(value, line)?,
            "work_dir" => self.work_dir = PathBuf::from(value),
            "pidfile" => {
                if value.is_empty() {
                    self.pidfile = None;
                } else {
                    self.pidfile = Some(PathBuf::from(value));
                }
            }
            "logfile" => {
                if value.is_empty() {
                    self.logfile = None;
                } else {
                    self.logfile = Some(PathBuf::from(value));
                }
            }
            "loglevel" => {
                self.loglevel = match value.to_lowercase().as_str() {
                    "error" => LogLevel::Error,
                    "warn" | "warning" => LogLevel::Warn,
                    "info" | "notice" => LogLevel::Info,
                    "debug" => LogLevel::Debug,
                    "trace" => LogLevel::Trace,
                    _ => {
                        return Err(ConfigError::ParseError {
                            line,
                            message: format!("Invalid loglevel: {value}"),
                        })
                    }
                };
            }
            "daemonize" => self.daemonize = parse_bool(value, line)?,

            // Unknown directives are non-fatal
            _ => {
                tracing::warn!("Unknown config directive at line {}: {}", line, directive);
            }
        }

        Ok(())
    }

    /// Reject configurations the server must not start with.
    ///
    /// An empty password disables authentication entirely; a weak or
    /// sample password is worse than none, so both are fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(auth) = &self.auth {
            if auth.len() < 32 {
                return Err(ConfigError::Invalid(
                    "auth password must be at least 32 characters".to_string(),
                ));
            }
            if auth == "very-strong-password" {
                return Err(ConfigError::Invalid(
                    "auth password must be changed from the sample value".to_string(),
                ));
            }
        }
        if self.readers == 0 {
            return Err(ConfigError::Invalid(
                "readers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// Helper functions for parsing

fn parse_bool(value: &str, line: usize) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => Err(ConfigError::ParseError {
            line,
            message: format!("Invalid boolean: {value}"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, line: usize) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::ParseError {
        line,
        message: format!("Invalid number: {value}"),
    })
}
