#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pgrun::driver::{ExecuteError, StatementExecutor};
use pgrun::prompt::{Action, ActionPrompt};
use pgrun::segmenter::{statement_channel, StatementStream, Syntax};

pub fn stream(sql: &'static str) -> StatementStream {
    statement_channel(sql.as_bytes(), Syntax::default())
}

#[derive(Debug, Clone)]
pub enum Reply {
    Rows(u64),
    Fail(&'static str),
    RowsAffectedFailure,
}

/// Everything the scripted executor observed, shared with the test.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    pub submitted: Vec<String>,
    pub closed: bool,
}

/// Answers statements from a script. Once the script runs out every
/// statement succeeds with zero rows.
pub struct ScriptedExecutor {
    replies: VecDeque<Reply>,
    log: Arc<Mutex<ExecutionLog>>,
}

impl ScriptedExecutor {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> (Self, Arc<Mutex<ExecutionLog>>) {
        let log = Arc::new(Mutex::new(ExecutionLog::default()));
        let executor = Self {
            replies: replies.into_iter().collect(),
            log: Arc::clone(&log),
        };
        (executor, log)
    }
}

#[async_trait]
impl StatementExecutor for ScriptedExecutor {
    async fn execute(&mut self, sql: &str) -> Result<u64, ExecuteError> {
        let mut log = self.log.lock().unwrap();
        if log.closed {
            return Err(ExecuteError::Closed);
        }
        log.submitted.push(sql.to_string());

        match self.replies.pop_front().unwrap_or(Reply::Rows(0)) {
            Reply::Rows(rows) => Ok(rows),
            Reply::Fail(message) => Err(ExecuteError::Statement(message.into())),
            Reply::RowsAffectedFailure => {
                Err(ExecuteError::RowsAffected("driver returned no count".into()))
            }
        }
    }

    async fn close(&mut self) -> Result<(), ExecuteError> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Returns scripted choices; panics if asked more often than scripted.
/// Every failure message it was shown is kept in order.
pub struct ScriptedPrompt {
    choices: VecDeque<Action>,
    failures: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPrompt {
    pub fn new(choices: impl IntoIterator<Item = Action>) -> (Self, Arc<Mutex<Vec<String>>>) {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let prompt = Self {
            choices: choices.into_iter().collect(),
            failures: Arc::clone(&failures),
        };
        (prompt, failures)
    }
}

#[async_trait]
impl ActionPrompt for ScriptedPrompt {
    async fn choose(&mut self, failure: &str) -> io::Result<Action> {
        self.failures.lock().unwrap().push(failure.to_string());
        Ok(self
            .choices
            .pop_front()
            .expect("prompt asked more often than scripted"))
    }
}
