pub mod config;

use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection};
use thiserror::Error;

use crate::db::config::{DbConfig, DbConfigError};
use crate::driver::{ExecuteError, StatementExecutor};

/// SQLSTATE for a rejected password.
pub const INVALID_PASSWORD: &str = "28P01";

/// Executes statements over a single PostgreSQL connection.
pub struct PgExecutor {
    conn: Option<PgConnection>,
}

impl PgExecutor {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbInitError> {
        let options = config.connect_options()?;
        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(DbInitError::Sqlx)?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = config.effective_database().unwrap_or_default(),
            "connected to database"
        );

        Ok(Self { conn: Some(conn) })
    }
}

#[async_trait]
impl StatementExecutor for PgExecutor {
    async fn execute(&mut self, sql: &str) -> Result<u64, ExecuteError> {
        let conn: &mut PgConnection = self.conn.as_mut().ok_or(ExecuteError::Closed)?;

        // Simple query protocol: the text goes to the server unprepared.
        let result = Executor::execute(conn, sqlx::raw_sql(sql))
            .await
            .map_err(|err| ExecuteError::Statement(Box::new(err)))?;

        Ok(result.rows_affected())
    }

    async fn close(&mut self) -> Result<(), ExecuteError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.close()
            .await
            .map_err(|err| ExecuteError::Close(Box::new(err)))?;
        tracing::debug!("database connection closed");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error(transparent)]
    Config(#[from] DbConfigError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl DbInitError {
    /// True when the server rejected the password (or the lack of one).
    pub fn is_auth_failure(&self) -> bool {
        match self {
            DbInitError::Sqlx(sqlx::Error::Database(err)) => {
                err.code().as_deref() == Some(INVALID_PASSWORD)
            }
            _ => false,
        }
    }
}
