//! Backend endpoint configuration.

use mysql_async::{Opts, OptsBuilder};
use thiserror::Error;

/// Invalid connection options string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    #[error("Malformed option '{0}', expected key=value")]
    Malformed(String),
    #[error("Invalid option name '{0}'")]
    InvalidName(String),
    #[error("Invalid character set '{0}'")]
    InvalidCharset(String),
}

/// Where and how to reach one backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendEndpoint {
    /// Host name or IP
    pub host: String,
    /// TCP port
    pub port: u16,
    /// User name
    pub user: String,
    /// Password
    pub pass: String,
    /// Default database (empty for none)
    pub database: String,
    /// `&`-separated `key=value` options, e.g. `charset=utf8mb4&sql_mode=ANSI`
    pub options: String,
}

impl BackendEndpoint {
    /// `host:port`, safe to log.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Default database, if one is configured.
    pub fn default_database(&self) -> Option<&str> {
        if self.database.is_empty() {
            None
        } else {
            Some(&self.database)
        }
    }

    /// Statements run on every new connection to apply the options string.
    ///
    /// `charset` becomes `SET NAMES`; any other key becomes a session
    /// variable assignment.
    pub fn init_statements(&self) -> Result<Vec<String>, OptionsError> {
        let mut statements = Vec::new();
        for pair in self.options.split('&').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| OptionsError::Malformed(pair.to_string()))?;
            let key = key.trim();
            let value = value.trim();
            if !is_identifier(key) {
                return Err(OptionsError::InvalidName(key.to_string()));
            }
            if key.eq_ignore_ascii_case("charset") {
                if !is_identifier(value) {
                    return Err(OptionsError::InvalidCharset(value.to_string()));
                }
                statements.push(format!("SET NAMES {value}"));
            } else if value.parse::<i64>().is_ok() {
                statements.push(format!("SET SESSION {key} = {value}"));
            } else {
                let escaped = value.replace('\\', "\\\\").replace('\'', "''");
                statements.push(format!("SET SESSION {key} = '{escaped}'"));
            }
        }
        Ok(statements)
    }

    /// Build `mysql_async` connection options.
    pub fn opts(&self) -> Result<Opts, OptionsError> {
        let builder = OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(Some(self.pass.clone()))
            .db_name(self.default_database().map(str::to_string))
            .init(self.init_statements()?);
        Ok(Opts::from(builder))
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
