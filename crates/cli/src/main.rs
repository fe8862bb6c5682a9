mod config;
mod error;

use std::path::PathBuf;

use capping::{CounterEngine, SessionSnapshot};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use store::{Backend, MemoryBackend, SqliteBackend};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::Result;

const APP_DIR: &str = "freqcap";
const CONFIG_FILE: &str = "freqcap.toml";
const DB_FILE: &str = "freq_cap.db";
const LOG_ENV: &str = "FREQCAP_LOG";

#[derive(Debug, Parser)]
#[command(name = "freqcap")]
#[command(about = "Per-session campaign frequency caps", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./freqcap.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the configured path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Keep counters in memory for this run only
    #[arg(long, global = true, conflicts_with = "db")]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Commands {
    /// Count one more impression of a campaign in a session
    #[command(name = "ADD", visible_alias = "add")]
    Add {
        session_id: String,
        campaign_id: String,
    },
    /// Forget a campaign's count in a session
    #[command(name = "DELETE", visible_aliases = ["DEL", "delete"])]
    Delete {
        session_id: String,
        campaign_id: String,
    },
    /// Print a session's counters
    #[command(name = "SHOW", visible_alias = "show")]
    Show { session_id: String },
    /// Drop every session
    #[command(name = "CLEAR", visible_alias = "clear")]
    Clear,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{e}");
            return;
        }
        Err(e) => {
            let (usage, detail) = usage_error(&e);
            println!("{usage}");
            eprint!("{detail}");
            std::process::exit(1);
        }
    };

    init_tracing();

    if let Err(e) = run(cli).await {
        if e.is_transient() {
            eprintln!("Error: {e} (transient, retry may succeed)");
        } else {
            eprintln!("Error: {e}");
        }
        std::process::exit(1);
    }
}

/// Usage line for stdout, and clap's message naming the offending argument
/// for stderr.
fn usage_error(err: &clap::Error) -> (String, String) {
    (
        Cli::command().render_usage().to_string(),
        err.render().to_string(),
    )
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let strategy = config.update_strategy()?;

    if cli.ephemeral {
        debug!("using in-memory store");
        let engine = CounterEngine::new(MemoryBackend::new(), strategy);
        return execute(&engine, cli.command).await;
    }

    let db_path = match cli.db.or_else(|| config.store.path.clone()) {
        Some(path) => path,
        None => {
            let dir = data_dir().unwrap_or_else(|| PathBuf::from(format!(".{APP_DIR}")));
            std::fs::create_dir_all(&dir)?;
            dir.join(DB_FILE)
        }
    };
    debug!(path = %db_path.display(), table = %config.store.table, "opening store");

    let backend = SqliteBackend::open(&db_path, &config.store.table, config.busy_timeout())?;
    let engine = CounterEngine::new(backend, strategy);
    execute(&engine, cli.command).await
}

async fn execute<B: Backend>(engine: &CounterEngine<B>, command: Commands) -> Result<()> {
    match command {
        Commands::Add {
            session_id,
            campaign_id,
        } => {
            engine.setup().await?;
            let increment = engine.increment(&session_id, &campaign_id).await?;
            info!(%session_id, %campaign_id, count = increment.count, "incremented");
            println!("{campaign_id}: {}", increment.count);
            print_session(&increment.snapshot);
        }
        Commands::Delete {
            session_id,
            campaign_id,
        } => {
            engine.setup().await?;
            let snapshot = engine.remove(&session_id, &campaign_id).await?;
            info!(%session_id, %campaign_id, "removed");
            print_session(&snapshot);
        }
        Commands::Show { session_id } => {
            engine.setup().await?;
            let table = engine.describe().await?;
            println!(
                "Table: {} (key: {}, items: {})",
                table.name, table.key_attribute, table.item_count
            );
            let snapshot = engine.fetch(&session_id).await?;
            print_session(&snapshot);
        }
        Commands::Clear => {
            println!("Deleting all sessions");
            engine.reset_store().await?;
            info!("store reset");
        }
    }
    Ok(())
}

fn print_session(session: &SessionSnapshot) {
    println!("Session: {}", session.session_id);
    if session.is_empty() {
        println!("  (no campaigns)");
        return;
    }
    let width = session.campaigns.keys().map(String::len).max().unwrap_or(0);
    for (campaign_id, count) in &session.campaigns {
        println!("  {campaign_id:<width$}  {count}");
    }
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Ok(Config::load(path)?);
    }

    let default_path = PathBuf::from(CONFIG_FILE);
    if default_path.exists() {
        Ok(Config::load(&default_path)?)
    } else {
        Ok(Config::default())
    }
}

/// Per-user data directory holding the default database.
fn data_dir() -> Option<PathBuf> {
    let home_share =
        || std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share"));
    let base = if cfg!(windows) {
        std::env::var_os("APPDATA").map(PathBuf::from)
    } else if cfg!(unix) {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .filter(|dir| dir.is_absolute())
            .or_else(home_share)
    } else {
        None
    };
    base.map(|dir| dir.join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use capping::{Error as CappingError, UpdateStrategy};

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("freqcap").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_upper_and_lower_case_commands() {
        let expected = Commands::Add {
            session_id: "s1".into(),
            campaign_id: "c1".into(),
        };
        assert_eq!(parse(&["ADD", "s1", "c1"]).unwrap().command, expected);
        assert_eq!(parse(&["add", "s1", "c1"]).unwrap().command, expected);

        let expected = Commands::Delete {
            session_id: "s1".into(),
            campaign_id: "c1".into(),
        };
        assert_eq!(parse(&["DELETE", "s1", "c1"]).unwrap().command, expected);
        assert_eq!(parse(&["DEL", "s1", "c1"]).unwrap().command, expected);

        assert_eq!(
            parse(&["SHOW", "s1"]).unwrap().command,
            Commands::Show {
                session_id: "s1".into()
            }
        );
        assert_eq!(parse(&["CLEAR"]).unwrap().command, Commands::Clear);
    }

    #[test]
    fn rejects_malformed_invocations() {
        assert!(parse(&[]).is_err());
        assert_eq!(
            parse(&["ADD", "s1"]).unwrap_err().kind(),
            ErrorKind::MissingRequiredArgument
        );
        assert!(parse(&["BUMP", "s1", "c1"]).is_err());
        assert!(parse(&["--ephemeral", "--db", "x.db", "CLEAR"]).is_err());
    }

    #[test]
    fn usage_errors_name_the_offending_argument() {
        let err = parse(&["BUMP", "s1", "c1"]).unwrap_err();
        let (usage, detail) = usage_error(&err);
        assert!(usage.starts_with("Usage:"));
        assert!(detail.contains("BUMP"), "{detail}");
    }

    #[test]
    fn data_dir_is_app_specific() {
        if let Some(dir) = data_dir() {
            assert!(dir.ends_with(APP_DIR));
        }
    }

    #[tokio::test]
    async fn executes_commands_against_a_store() {
        let engine = CounterEngine::new(MemoryBackend::new(), UpdateStrategy::default());

        for _ in 0..2 {
            execute(
                &engine,
                Commands::Add {
                    session_id: "s1".into(),
                    campaign_id: "c1".into(),
                },
            )
            .await
            .unwrap();
        }
        assert_eq!(engine.fetch("s1").await.unwrap().count("c1"), 2);

        execute(
            &engine,
            Commands::Delete {
                session_id: "s1".into(),
                campaign_id: "c1".into(),
            },
        )
        .await
        .unwrap();
        execute(&engine, Commands::Show { session_id: "s1".into() })
            .await
            .unwrap();

        execute(&engine, Commands::Clear).await.unwrap();
        let err = execute(&engine, Commands::Show { session_id: "s1".into() })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            error::Error::Capping(CappingError::NotFound { .. })
        ));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn reports_invalid_ids_as_permanent() {
        let engine = CounterEngine::new(MemoryBackend::new(), UpdateStrategy::default());
        let err = execute(
            &engine,
            Commands::Add {
                session_id: String::new(),
                campaign_id: "c1".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, error::Error::Capping(CappingError::InvalidArgument(_))));
        assert!(!err.is_transient());
    }
}
