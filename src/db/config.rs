use std::path::PathBuf;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;

/// Connection settings assembled from flags and `PG*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub options: Vec<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: None,
            user: None,
            password: None,
            options: Vec::new(),
        }
    }
}

impl DbConfig {
    pub fn new(
        host: Option<&str>,
        port: Option<&str>,
        database: Option<String>,
        user: Option<String>,
        options: Option<&str>,
    ) -> Result<Self, DbConfigError> {
        let host = host
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_HOST)
            .to_string();

        let port = match port.map(str::trim).filter(|value| !value.is_empty()) {
            Some(raw) => raw.parse::<u16>().map_err(|_| DbConfigError::InvalidPort {
                value: raw.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let options = match options {
            Some(raw) => parse_options(raw)?,
            None => Vec::new(),
        };

        let config = Self {
            host,
            port,
            database: database.filter(|value| !value.is_empty()),
            user: user.filter(|value| !value.is_empty()),
            password: None,
            options,
        };
        // Reject option values the connection builder would refuse later.
        config.connect_options()?;
        Ok(config)
    }

    /// Database name the server will use: the explicit one, else the user name.
    pub fn effective_database(&self) -> Option<&str> {
        self.database.as_deref().or(self.user.as_deref())
    }

    /// Looks the password up in the pgpass file, if there is one.
    pub fn password_from_pgpass(&self) -> Option<String> {
        let path = pgpass_path()?;
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "no usable pgpass file");
                return None;
            }
        };

        let password = lookup_pgpass(
            &contents,
            &self.host,
            self.port,
            self.effective_database(),
            self.user.as_deref(),
        );
        if password.is_some() {
            tracing::debug!(path = %path.display(), "password taken from pgpass file");
        }
        password
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, DbConfigError> {
        let mut connect = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port);

        if let Some(user) = &self.user {
            connect = connect.username(user);
        }
        if let Some(password) = &self.password {
            connect = connect.password(password);
        }
        if let Some(database) = &self.database {
            connect = connect.database(database);
        }

        let mut runtime_params = Vec::new();
        for (key, value) in &self.options {
            match key.as_str() {
                "sslmode" => {
                    let mode = value
                        .parse::<PgSslMode>()
                        .map_err(|_| DbConfigError::InvalidOption {
                            option: format!("{key}={value}"),
                        })?;
                    connect = connect.ssl_mode(mode);
                }
                "sslrootcert" => connect = connect.ssl_root_cert(value.as_str()),
                "application_name" => connect = connect.application_name(value),
                _ => runtime_params.push((key.as_str(), value.as_str())),
            }
        }
        if !runtime_params.is_empty() {
            connect = connect.options(runtime_params);
        }

        Ok(connect)
    }
}

/// Parses space-separated `key=value` connection options such as `sslmode=disable`.
pub fn parse_options(raw: &str) -> Result<Vec<(String, String)>, DbConfigError> {
    raw.split_whitespace()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(DbConfigError::InvalidOption {
                option: pair.to_string(),
            }),
        })
        .collect()
}

fn pgpass_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("PGPASSFILE").filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".pgpass"))
}

/// Finds the first `host:port:database:user:password` line matching the
/// connection. `*` matches anything; `\:` and `\\` are escapes.
pub fn lookup_pgpass(
    contents: &str,
    host: &str,
    port: u16,
    database: Option<&str>,
    user: Option<&str>,
) -> Option<String> {
    let port = port.to_string();
    let wanted = [Some(host), Some(port.as_str()), database, user];

    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(split_pgpass_line)
        .find(|fields| {
            fields[..4]
                .iter()
                .zip(wanted.iter())
                .all(|(field, want)| field == "*" || Some(field.as_str()) == *want)
        })
        .map(|mut fields| fields.swap_remove(4))
}

fn split_pgpass_line(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::with_capacity(5);
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' if fields.len() < 4 => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);

    (fields.len() == 5).then_some(fields)
}

#[derive(Debug, Error)]
pub enum DbConfigError {
    #[error("invalid port: {value}")]
    InvalidPort { value: String },
    #[error("invalid connection option: {option}")]
    InvalidOption { option: String },
}
