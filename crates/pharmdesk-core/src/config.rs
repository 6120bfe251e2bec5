//! Desk configuration from the environment.

use std::path::PathBuf;

use thiserror::Error;

use crate::timefmt::TimeFormatter;

pub const ENV_DB_PATH: &str = "PHARMDESK_DB_PATH";
pub const ENV_DISPLAY_OFFSET_MINUTES: &str = "PHARMDESK_DISPLAY_OFFSET_MINUTES";
pub const ENV_MAX_SIGNIN_ATTEMPTS: &str = "PHARMDESK_MAX_SIGNIN_ATTEMPTS";

/// Configuration errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Runtime settings for the desk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeskConfig {
    /// SQLite file holding the document store
    pub db_path: PathBuf,
    /// Display offset from UTC, in minutes (-720..=840)
    pub display_offset_minutes: i32,
    /// Consecutive failed sign-ins before an account is throttled
    pub max_signin_attempts: u32,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("pharmdesk.db"),
            display_offset_minutes: 0,
            max_signin_attempts: 5,
        }
    }
}

impl DeskConfig {
    /// Read from process environment, falling back to defaults.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let db_path = get(ENV_DB_PATH)
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let display_offset_minutes = match get(ENV_DISPLAY_OFFSET_MINUTES) {
            Some(raw) => {
                let minutes = parse_value::<i32>(ENV_DISPLAY_OFFSET_MINUTES, &raw)?;
                if TimeFormatter::from_offset_minutes(minutes).is_none() {
                    return Err(invalid(ENV_DISPLAY_OFFSET_MINUTES, &raw));
                }
                minutes
            }
            None => defaults.display_offset_minutes,
        };

        let max_signin_attempts = match get(ENV_MAX_SIGNIN_ATTEMPTS) {
            Some(raw) => match parse_value::<u32>(ENV_MAX_SIGNIN_ATTEMPTS, &raw)? {
                0 => return Err(invalid(ENV_MAX_SIGNIN_ATTEMPTS, &raw)),
                n => n,
            },
            None => defaults.max_signin_attempts,
        };

        Ok(Self {
            db_path,
            display_offset_minutes,
            max_signin_attempts,
        })
    }

    /// Formatter for the configured display offset.
    pub fn formatter(&self) -> TimeFormatter {
        TimeFormatter::from_offset_minutes(self.display_offset_minutes).unwrap_or_default()
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> ConfigResult<T> {
    raw.trim().parse().map_err(|_| invalid(key, raw))
}

fn invalid(key: &str, raw: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    }
}
