use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, CommandFactory, Parser};
use thiserror::Error;

use pgrun::config::Config;
use pgrun::db::config::DbConfig;
use pgrun::db::{DbInitError, PgExecutor};
use pgrun::driver::{Driver, DriverError, RunOutcome};
use pgrun::logging;
use pgrun::prompt::TerminalPrompt;
use pgrun::segmenter::{SegmentError, StatementStream, Syntax};

const ENVIRONMENT_HELP: &str = "\
Database connection properties can be specified in three ways:
  * Environment variables
  * Program flags (override environment variables)
  * ~/.pgpass file (for the password, or the file named by PGPASSFILE)

Environment variables are:
  PGHOST     : host name where database is running (default is localhost)
  PGPORT     : port database is listening on (default is 5432)
  PGDATABASE : name of database you want to update
  PGUSER     : user in postgres you'll be executing the commands as
  PGPASSWORD : password for the user
  PGOPTION   : postgresql options (like sslmode=disable)

Statements end with a semicolon at the end of a line. Wrap bodies that
contain their own semicolons (functions, DO blocks) in
  -- STATEMENT-BEGIN
  -- STATEMENT-END";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Success = 0,
    Quit = 1,
    Usage = 2,
    NotFound = 3,
    Fatal = 4,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

/// Executes a file of SQL statements one statement at a time, asking what
/// to do whenever one of them fails.
#[derive(Debug, Parser)]
#[command(
    name = "pgrun",
    disable_help_flag = true,
    disable_version_flag = true,
    after_help = ENVIRONMENT_HELP
)]
struct Cli {
    /// Path of the SQL file to run (required)
    #[arg(short = 'f', long = "file", visible_alias = "filename", value_name = "PATH")]
    file: Option<PathBuf>,

    /// User in postgres to execute the commands as
    #[arg(short = 'U', long = "user", env = "PGUSER")]
    user: Option<String>,

    /// Host name where the database is running [default: localhost]
    #[arg(short = 'h', long = "host", env = "PGHOST")]
    host: Option<String>,

    /// Port the database is listening on [default: 5432]
    #[arg(short = 'p', long = "port", env = "PGPORT")]
    port: Option<String>,

    /// Database name
    #[arg(short = 'd', long = "dbname", env = "PGDATABASE")]
    dbname: Option<String>,

    /// Connection options, like "sslmode=disable"
    #[arg(short = 'O', long = "options", env = "PGOPTION")]
    options: Option<String>,

    /// Never issue a password prompt
    #[arg(short = 'w', long = "no-password", conflicts_with = "password")]
    no_password: bool,

    /// Force a password prompt
    #[arg(short = 'W', long = "password")]
    password: bool,

    /// Print the version of pgrun
    #[arg(short = 'V', long = "version")]
    version: bool,

    /// Print this summary of the accepted flags
    #[arg(short = '?', long = "help", action = ArgAction::Help)]
    #[allow(dead_code)]
    help: Option<bool>,
}

#[derive(Debug, Error)]
enum RunError {
    #[error("opening database: {0}")]
    Connect(#[from] DbInitError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("reading password: {0}")]
    Prompt(#[source] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if cli.version {
        print_version();
        return Exit::Success.into();
    }

    let (file, db_config) = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(exit) => return exit.into(),
    };

    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config);

    let result = run(&cli, &file, db_config).await;
    if let Err(err) = &result {
        eprintln!("Error {err}");
    }
    exit_for(&result).into()
}

/// Checks the arguments before anything touches the file or the database.
/// Problems are reported on stderr and turned into the matching exit code.
fn prepare(cli: &Cli) -> Result<(PathBuf, DbConfig), Exit> {
    let Some(file) = cli.file.clone() else {
        eprintln!("Missing required filename argument (-f)");
        eprint!("{}", Cli::command().render_help());
        return Err(Exit::Usage);
    };

    if !file.exists() {
        eprintln!("File does not exist: {}", file.display());
        return Err(Exit::NotFound);
    }

    let db_config = DbConfig::new(
        cli.host.as_deref(),
        cli.port.as_deref(),
        cli.dbname.clone(),
        cli.user.clone(),
        cli.options.as_deref(),
    )
    .map_err(|err| {
        eprintln!("Error {err}");
        Exit::Usage
    })?;

    Ok((file, db_config))
}

fn exit_for(result: &Result<RunOutcome, RunError>) -> Exit {
    match result {
        Ok(RunOutcome::Completed(_)) => Exit::Success,
        Ok(RunOutcome::Quit(_)) => Exit::Quit,
        Err(RunError::Connect(DbInitError::Config(_))) => Exit::Usage,
        Err(_) => Exit::Fatal,
    }
}

async fn run(cli: &Cli, file: &Path, mut db_config: DbConfig) -> Result<RunOutcome, RunError> {
    let mut prompt = TerminalPrompt::stdio();

    db_config.password = if cli.password {
        prompt
            .read_password(&prompt_user(&db_config))
            .await
            .map_err(RunError::Prompt)?
    } else {
        std::env::var("PGPASSWORD")
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| db_config.password_from_pgpass())
    };

    let mut statements = StatementStream::open(file, Syntax::default()).await?;

    let executor = match PgExecutor::connect(&db_config).await {
        Ok(executor) => executor,
        Err(err)
            if err.is_auth_failure()
                && db_config.password.is_none()
                && !cli.no_password
                && std::io::stdin().is_terminal() =>
        {
            tracing::warn!(error = %err, "server requires a password");
            db_config.password = prompt
                .read_password(&prompt_user(&db_config))
                .await
                .map_err(RunError::Prompt)?;
            PgExecutor::connect(&db_config).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(file = %file.display(), "running SQL file");
    Ok(Driver::new(executor, prompt).run(&mut statements).await?)
}

fn prompt_user(db_config: &DbConfig) -> String {
    db_config
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "postgres".to_string())
}

fn print_version() {
    eprintln!("pgrun version {}", env!("CARGO_PKG_VERSION"));
    eprintln!("Use of this source code is governed by the MIT license");
    eprintln!("that can be found here: http://opensource.org/licenses/MIT");
}
