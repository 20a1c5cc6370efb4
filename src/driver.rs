use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::prompt::{Action, ActionPrompt};
use crate::segmenter::{SegmentError, Statement, StatementStream};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The database rejected the statement. The operator decides what happens next.
    #[error("{0}")]
    Statement(#[source] BoxError),
    #[error("getting rows affected count: {0}")]
    RowsAffected(#[source] BoxError),
    #[error("connection already closed")]
    Closed,
    #[error("closing connection: {0}")]
    Close(#[source] BoxError),
}

impl ExecuteError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExecuteError::Statement(_))
    }
}

#[async_trait]
pub trait StatementExecutor: Send {
    /// Runs one statement and returns the number of rows it affected.
    async fn execute(&mut self, sql: &str) -> Result<u64, ExecuteError>;

    /// Releases the connection. Later `execute` calls fail with `Closed`.
    async fn close(&mut self) -> Result<(), ExecuteError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: usize,
    pub skipped: usize,
    pub redone: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Quit(RunSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> RunSummary {
        match self {
            RunOutcome::Completed(summary) | RunOutcome::Quit(summary) => *summary,
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error("statement at line {line}: {source}")]
    Execute {
        line: usize,
        #[source]
        source: ExecuteError,
    },
    #[error("reading operator choice: {0}")]
    Prompt(#[source] io::Error),
}

enum Flow {
    Next,
    Quit,
}

pub struct Driver<E, P> {
    executor: E,
    prompt: P,
    summary: RunSummary,
}

impl<E, P> Driver<E, P>
where
    E: StatementExecutor,
    P: ActionPrompt,
{
    pub fn new(executor: E, prompt: P) -> Self {
        Self {
            executor,
            prompt,
            summary: RunSummary::default(),
        }
    }

    /// Executes every statement in order. The connection is closed before
    /// this returns, whatever the outcome.
    pub async fn run(mut self, statements: &mut StatementStream) -> Result<RunOutcome, DriverError> {
        let result = self.run_statements(statements).await;

        if let Err(err) = self.executor.close().await {
            warn!(error = %err, "failed to close database connection");
        }

        result
    }

    async fn run_statements(
        &mut self,
        statements: &mut StatementStream,
    ) -> Result<RunOutcome, DriverError> {
        while let Some(next) = statements.next().await {
            let statement = next.map_err(|err| {
                error!(error = %err, "Error reading SQL file");
                err
            })?;

            if let Flow::Quit = self.run_statement(&statement).await? {
                info!(
                    line = statement.line(),
                    executed = self.summary.executed,
                    skipped = self.summary.skipped,
                    "Quit requested, stopping run"
                );
                return Ok(RunOutcome::Quit(self.summary));
            }
        }

        info!(
            executed = self.summary.executed,
            skipped = self.summary.skipped,
            redone = self.summary.redone,
            "Done!"
        );
        Ok(RunOutcome::Completed(self.summary))
    }

    async fn run_statement(&mut self, statement: &Statement) -> Result<Flow, DriverError> {
        println!("\n---");
        info!(line = statement.line(), "Executing SQL: {statement}");

        loop {
            let err = match self.executor.execute(statement.sql()).await {
                Ok(rows) => {
                    self.summary.executed += 1;
                    info!(rows_affected = rows, "Rows affected: {rows}");
                    return Ok(Flow::Next);
                }
                Err(err) => err,
            };

            if !err.is_recoverable() {
                error!(line = statement.line(), error = %err, "Error executing statement");
                return Err(DriverError::Execute {
                    line: statement.line(),
                    source: err,
                });
            }

            error!(line = statement.line(), error = %err, "Error executing statement");
            let failure = format!("line {}: {err}", statement.line());
            match self.prompt.choose(&failure).await.map_err(DriverError::Prompt)? {
                Action::Continue => {
                    self.summary.skipped += 1;
                    warn!(line = statement.line(), "Skipping failed statement");
                    return Ok(Flow::Next);
                }
                Action::Quit => return Ok(Flow::Quit),
                Action::Redo => {
                    self.summary.redone += 1;
                    info!(line = statement.line(), "Redoing statement");
                }
            }
        }
    }
}
