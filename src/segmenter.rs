//! Splits a line-oriented SQL file into independently executable statements.
//!
//! A statement ends at a line whose trimmed text ends with `;` (optionally
//! followed by whitespace or a `--` comment). Function and procedure bodies
//! that contain line-ending semicolons can be wrapped in marker comments:
//!
//! ```sql
//! -- STATEMENT-BEGIN
//! CREATE FUNCTION touch() RETURNS trigger AS $$
//! BEGIN
//!     NEW.updated_at = now();
//!     RETURN NEW;
//! END;
//! $$ LANGUAGE plpgsql;
//! -- STATEMENT-END
//! ```
//!
//! Everything between the markers is emitted as one statement when the end
//! marker is reached.

use std::fmt;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const COMMENT_PREFIX: &str = "--";

/// Statements handed from the reader task to the driver at a time.
pub const HANDOFF_CAPACITY: usize = 1;

/// Compiled marker and terminator patterns.
#[derive(Debug, Clone)]
pub struct Syntax {
    block_begin: Regex,
    block_end: Regex,
    terminator: Regex,
}

impl Syntax {
    pub fn is_block_begin(&self, line: &str) -> bool {
        self.block_begin.is_match(line)
    }

    pub fn is_block_end(&self, line: &str) -> bool {
        self.block_end.is_match(line)
    }

    pub fn is_terminated(&self, line: &str) -> bool {
        self.terminator.is_match(line)
    }
}

impl Default for Syntax {
    fn default() -> Self {
        Self {
            block_begin: Regex::new(r"^\s*--\s*STATEMENT-BEGIN\s*$")
                .expect("block begin pattern compiles"),
            block_end: Regex::new(r"^\s*--\s*STATEMENT-END\s*$")
                .expect("block end pattern compiles"),
            terminator: Regex::new(r";\s*$|;\s*--.*$").expect("terminator pattern compiles"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    line: usize,
}

impl Statement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// 1-based input line of the first line in this statement.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn into_sql(self) -> String {
        self.sql
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql.trim_end())
    }
}

#[derive(Debug, Clone)]
pub struct Segmenter {
    syntax: Syntax,
    in_block: bool,
    buffer: String,
    buffer_line: usize,
    lines_read: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Segmenter {
    pub fn new() -> Self {
        Self::with_syntax(Syntax::default())
    }

    pub fn with_syntax(syntax: Syntax) -> Self {
        Self {
            syntax,
            in_block: false,
            buffer: String::new(),
            buffer_line: 0,
            lines_read: 0,
        }
    }

    pub fn in_block(&self) -> bool {
        self.in_block
    }

    /// Text accumulated for the statement currently being built.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn lines_read(&self) -> usize {
        self.lines_read
    }

    /// Feeds one input line, returning a statement if this line completes one.
    pub fn push_line(&mut self, raw: &str) -> Option<Statement> {
        self.lines_read += 1;

        let line = raw.trim();
        if line.is_empty() {
            return None;
        }

        if self.syntax.is_block_begin(line) {
            self.in_block = true;
            self.buffer.clear();
            return None;
        }

        if self.syntax.is_block_end(line) {
            self.in_block = false;
            return self.take();
        }

        if line.starts_with(COMMENT_PREFIX) {
            return None;
        }

        if self.buffer.is_empty() {
            self.buffer_line = self.lines_read;
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');

        if !self.in_block && self.syntax.is_terminated(line) {
            return self.take();
        }

        None
    }

    /// Feeds one raw input line. Bytes that are not UTF-8 are only an error
    /// when the line would become part of a statement; blank and comment
    /// lines are skipped whatever their encoding.
    pub fn push_bytes(&mut self, raw: &[u8]) -> Result<Option<Statement>, SegmentError> {
        match std::str::from_utf8(raw) {
            Ok(line) => Ok(self.push_line(line)),
            Err(source) => {
                let lossy = String::from_utf8_lossy(raw);
                let trimmed = lossy.trim();
                if trimmed.is_empty() || trimmed.starts_with(COMMENT_PREFIX) {
                    return Ok(self.push_line(&lossy));
                }
                Err(SegmentError::Encoding {
                    line: self.lines_read + 1,
                    source,
                })
            }
        }
    }

    /// Ends the input. Unterminated text is returned so the caller can
    /// report it; it is never turned into a statement.
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }

    fn take(&mut self) -> Option<Statement> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(Statement {
            sql: std::mem::take(&mut self.buffer),
            line: self.buffer_line,
        })
    }
}

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("opening {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("reading line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },
    #[error("line {line} is not valid UTF-8: {source}")]
    Encoding {
        line: usize,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("statement reader stopped unexpectedly: {0}")]
    Producer(String),
}

fn finish_input(segmenter: Segmenter) {
    let start = segmenter.buffer_line;
    if let Some(dropped) = segmenter.finish() {
        tracing::warn!(
            line = start,
            statement = dropped.trim_end(),
            "input ended inside an unterminated statement; it was not executed"
        );
    }
}

/// Pull-based statements over a blocking reader.
pub struct Statements<B> {
    lines: io::Split<B>,
    segmenter: Option<Segmenter>,
}

impl<B: BufRead> Statements<B> {
    pub fn new(reader: B) -> Self {
        Self::with_syntax(reader, Syntax::default())
    }

    pub fn with_syntax(reader: B, syntax: Syntax) -> Self {
        Self {
            lines: reader.split(b'\n'),
            segmenter: Some(Segmenter::with_syntax(syntax)),
        }
    }
}

impl<B: BufRead> Iterator for Statements<B> {
    type Item = Result<Statement, SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        let segmenter = self.segmenter.as_mut()?;
        loop {
            let result = match self.lines.next() {
                Some(Ok(raw)) => segmenter.push_bytes(&raw),
                Some(Err(source)) => Err(SegmentError::Read {
                    line: segmenter.lines_read() + 1,
                    source,
                }),
                None => {
                    if let Some(segmenter) = self.segmenter.take() {
                        finish_input(segmenter);
                    }
                    return None;
                }
            };

            match result {
                Ok(Some(statement)) => return Some(Ok(statement)),
                Ok(None) => {}
                Err(err) => {
                    self.segmenter = None;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Receiving end of the statement handoff channel.
pub struct StatementStream {
    rx: mpsc::Receiver<Result<Statement, SegmentError>>,
    producer: Option<JoinHandle<()>>,
}

impl StatementStream {
    /// Opens `path` and starts segmenting it in the background.
    pub async fn open(path: &Path, syntax: Syntax) -> Result<Self, SegmentError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| SegmentError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(statement_channel(BufReader::new(file), syntax))
    }

    /// Next statement in input order; `None` once the input is exhausted.
    pub async fn next(&mut self) -> Option<Result<Statement, SegmentError>> {
        if let Some(item) = self.rx.recv().await {
            return Some(item);
        }

        let producer = self.producer.take()?;
        match producer.await {
            Ok(()) => None,
            Err(err) => Some(Err(SegmentError::Producer(err.to_string()))),
        }
    }
}

/// Spawns the segmenter as a producer task feeding a bounded channel.
pub fn statement_channel<R>(reader: R, syntax: Syntax) -> StatementStream
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    let producer = tokio::spawn(produce(reader, Segmenter::with_syntax(syntax), tx));
    StatementStream {
        rx,
        producer: Some(producer),
    }
}

async fn produce<R>(
    reader: R,
    mut segmenter: Segmenter,
    tx: mpsc::Sender<Result<Statement, SegmentError>>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.split(b'\n');
    loop {
        let result = match lines.next_segment().await {
            Ok(Some(raw)) => segmenter.push_bytes(&raw),
            Ok(None) => {
                finish_input(segmenter);
                return;
            }
            Err(source) => Err(SegmentError::Read {
                line: segmenter.lines_read() + 1,
                source,
            }),
        };

        match result {
            Ok(Some(statement)) => {
                if tx.send(Ok(statement)).await.is_err() {
                    tracing::debug!("statement consumer gone, stopping reader");
                    return;
                }
            }
            Ok(None) => {}
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}
