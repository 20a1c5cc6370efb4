use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

pub const ACTION_QUESTION: &str = "Continue, Quit, or Redo?  Enter c, q, or r: ";

/// What to do with a statement that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Skip the statement and move on.
    Continue,
    /// Stop the whole run.
    Quit,
    /// Submit the same statement again.
    Redo,
}

impl Action {
    pub const fn key(self) -> &'static str {
        match self {
            Action::Continue => "c",
            Action::Quit => "q",
            Action::Redo => "r",
        }
    }

    pub fn from_input(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "c" | "continue" => Some(Action::Continue),
            "q" | "quit" => Some(Action::Quit),
            "r" | "redo" => Some(Action::Redo),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ActionPrompt: Send {
    /// Shows why a statement failed and asks what to do about it.
    async fn choose(&mut self, failure: &str) -> io::Result<Action>;
}

/// Line-based prompt over an input and output stream, stdin/stdout in the CLI.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompt<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> TerminalPrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }

    /// Returns `None` when the input is closed.
    async fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        self.output.write_all(question.as_bytes()).await?;
        self.output.flush().await?;

        let mut answer = String::new();
        if self.input.read_line(&mut answer).await? == 0 {
            return Ok(None);
        }
        Ok(Some(answer))
    }

    // Input is echoed; callers wanting a hidden password should use PGPASSWORD or ~/.pgpass.
    pub async fn read_password(&mut self, user: &str) -> io::Result<Option<String>> {
        let answer = self.ask(&format!("Password for user {user}: ")).await?;
        Ok(answer.map(|line| line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

#[async_trait]
impl<R, W> ActionPrompt for TerminalPrompt<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn choose(&mut self, failure: &str) -> io::Result<Action> {
        self.output
            .write_all(format!("Error: {failure}\n").as_bytes())
            .await?;

        loop {
            let Some(answer) = self.ask(ACTION_QUESTION).await? else {
                tracing::warn!("prompt input closed, quitting");
                return Ok(Action::Quit);
            };

            if let Some(action) = Action::from_input(&answer) {
                return Ok(action);
            }
        }
    }
}
