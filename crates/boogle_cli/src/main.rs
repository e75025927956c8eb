//! `boogle` command line entry point.
//!
//! # Responsibility
//! - Expose schema, store and seeding operations of `boogle_core` for local
//!   runs and scripts.
//! - Print results as JSON on stdout; print the error cause chain on stderr.

mod catalog;

use boogle_core::{
    core_version, default_log_level, ensure_schema, init_logging, init_stderr_logging, open_pool,
    BookRecord, BookService, ConfigError, DbConfig, DbError, RepoError, SchemaOptions,
    SeedFilter, SeedService, SqliteBookRepository,
};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "boogle")]
#[command(about = "Book metadata store", long_about = None)]
struct Cli {
    /// trace|debug|info|warn|error
    #[arg(long, global = true, env = "BOOGLE_LOG_LEVEL")]
    log_level: Option<String>,
    /// Directory for rolling log files; logs go to stderr only when
    /// `--log-level` is given without it
    #[arg(long, global = true, env = "BOOGLE_LOG_DIR")]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring the database schema up to date and list the steps applied
    Schema,
    /// Store one JSON metadata payload
    Upsert {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print one record, or `null` when it does not exist
    Get { source: String, book_id: String },
    /// Case-insensitive substring search over titles and authors
    Search {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Seed the store from a JSON-lines catalog file
    Seed {
        #[arg(short, long)]
        input: PathBuf,
        /// Only seed this source
        #[arg(long, env = "SEED_SOURCE")]
        source: Option<String>,
        /// Maximum number of items attempted
        #[arg(long, env = "SEED_LIMIT")]
        limit: Option<usize>,
    },
    /// Print the core library version
    Version,
}

#[derive(Debug)]
enum CliError {
    Logging(String),
    Config(ConfigError),
    Db(DbError),
    Repo(RepoError),
    Read { path: PathBuf, source: std::io::Error },
    Payload { path: PathBuf, source: serde_json::Error },
    Output(serde_json::Error),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logging(message) => write!(f, "logging setup failed: {message}"),
            Self::Config(_) => write!(f, "invalid configuration"),
            Self::Db(_) => write!(f, "database setup failed"),
            Self::Repo(_) => write!(f, "store operation failed"),
            Self::Read { path, .. } => write!(f, "cannot read `{}`", path.display()),
            Self::Payload { path, .. } => {
                write!(f, "`{}` is not a valid metadata payload", path.display())
            }
            Self::Output(_) => write!(f, "cannot encode output"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Logging(_) => None,
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Read { source, .. } => Some(source),
            Self::Payload { source, .. } => Some(source),
            Self::Output(err) => Some(err),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for CliError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RepoError> for CliError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", error_chain(&err));
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    setup_logging(cli.log_level.as_deref(), cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Version => {
            println!("{}", core_version());
            Ok(())
        }
        Commands::Schema => {
            let config = DbConfig::from_env()?;
            let pool = open_pool(&config)?;
            let mut conn = pool.get().map_err(DbError::from)?;
            let report = ensure_schema(&mut conn, &SchemaOptions::from_config(&config))?;
            print_json(&serde_json::json!({ "applied": report.applied }))
        }
        Commands::Upsert { file } => {
            let record = read_payload(&file)?;
            with_service(|service| {
                service.upsert(&record)?;
                let stored = service.get_book(record.source.as_str(), record.book_id.as_str())?;
                print_json(&stored)
            })
        }
        Commands::Get { source, book_id } => with_service(|service| {
            let stored = service.get_book(&source, &book_id)?;
            print_json(&stored)
        }),
        Commands::Search {
            query,
            limit,
            source,
        } => with_service(|service| {
            let hits = service.search_books(&query, limit, source.as_deref())?;
            print_json(&hits)
        }),
        Commands::Seed {
            input,
            source,
            limit,
        } => {
            let text = std::fs::read_to_string(&input).map_err(|err| CliError::Read {
                path: input.clone(),
                source: err,
            })?;
            let loaded = catalog::parse_catalog(&text);
            info!(
                "event=seed_catalog module=seed status=ok sources={} items={} rejected={}",
                loaded.sources.len(),
                loaded
                    .sources
                    .iter()
                    .map(catalog::CatalogSource::len)
                    .sum::<usize>(),
                loaded.rejected.len()
            );

            with_service(|service| {
                let filter = SeedFilter { source, limit };
                let mut seeder = SeedService::new(service);
                for catalog_source in loaded.sources {
                    seeder.register(catalog_source);
                }
                let mut report = seeder.seed(&filter);

                for rejection in loaded.rejected {
                    if rejection.matches_source(filter.source.as_deref()) {
                        report.attempted += 1;
                        report.failures.push(rejection.into_failure());
                    }
                }
                print_json(&report)
            })
        }
    }
}

/// Opens the configured store, runs `f`, and closes the pool on every path.
fn with_service<F>(f: F) -> Result<(), CliError>
where
    F: FnOnce(&BookService<SqliteBookRepository>) -> Result<(), CliError>,
{
    let config = DbConfig::from_env()?;
    let repo = SqliteBookRepository::connect(&config)?;
    let service = BookService::new(repo, config.operation_timeout);
    let result = f(&service);
    service.repository().close();
    result
}

fn setup_logging(level: Option<&str>, log_dir: Option<&Path>) -> Result<(), CliError> {
    match (level, log_dir) {
        (level, Some(dir)) => {
            let dir = absolute_dir(dir)?;
            init_logging(
                level.unwrap_or(default_log_level()),
                &dir.to_string_lossy(),
            )
            .map_err(CliError::Logging)
        }
        (Some(level), None) => init_stderr_logging(level).map_err(CliError::Logging),
        (None, None) => Ok(()),
    }
}

fn absolute_dir(dir: &Path) -> Result<PathBuf, CliError> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(dir))
        .map_err(|err| CliError::Read {
            path: dir.to_path_buf(),
            source: err,
        })
}

fn read_payload(path: &Path) -> Result<BookRecord, CliError> {
    let text = std::fs::read_to_string(path).map_err(|err| CliError::Read {
        path: path.to_path_buf(),
        source: err,
    })?;
    serde_json::from_str(&text).map_err(|err| CliError::Payload {
        path: path.to_path_buf(),
        source: err,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(CliError::Output)?;
    println!("{text}");
    Ok(())
}

/// Renders `err` and every `source()` below it, one cause per line.
fn error_chain(err: &dyn Error) -> String {
    let mut rendered = format!("error: {err}");
    let mut current = err.source();
    while let Some(cause) = current {
        rendered.push_str(&format!("\n  caused by: {cause}"));
        current = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::{error_chain, read_payload, Cli, CliError, Commands};
    use boogle_core::{BookValidationError, RepoError};
    use clap::Parser;

    #[test]
    fn error_chain_lists_every_cause() {
        let err = CliError::Repo(RepoError::Validation(BookValidationError::EmptyUrl));

        let rendered = error_chain(&err);

        assert_eq!(
            rendered,
            "error: store operation failed\n  caused by: url must not be empty"
        );
    }

    #[test]
    fn seed_arguments_parse() {
        let cli = Cli::try_parse_from([
            "boogle",
            "seed",
            "--input",
            "books.jsonl",
            "--source",
            "gutenberg",
            "--limit",
            "5",
        ])
        .unwrap();

        match cli.command {
            Commands::Seed {
                input,
                source,
                limit,
            } => {
                assert_eq!(input.to_str(), Some("books.jsonl"));
                assert_eq!(source.as_deref(), Some("gutenberg"));
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn search_limit_defaults_to_ten() {
        let cli = Cli::try_parse_from(["boogle", "search", "moby"]).unwrap();

        match cli.command {
            Commands::Search { query, limit, source } => {
                assert_eq!(query, "moby");
                assert_eq!(limit, 10);
                assert!(source.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn payload_file_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.json");
        std::fs::write(
            &path,
            r#"{"source":"gutenberg","book_id":1342,"url":"https://www.gutenberg.org/ebooks/1342"}"#,
        )
        .unwrap();

        let record = read_payload(&path).unwrap();

        assert_eq!(record.book_id.as_str(), "1342");
        assert!(record.files.is_empty());
    }

    #[test]
    fn malformed_payload_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{").unwrap();

        let err = read_payload(&path).unwrap_err();

        assert!(matches!(err, CliError::Payload { .. }));
        assert!(err.to_string().contains("broken.json"));
    }
}
