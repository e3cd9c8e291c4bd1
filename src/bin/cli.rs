//! stratakv CLI
//!
//! Opens a durable store directory and runs one operation against it.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use stratakv::{
    clear_range, increment, Config, DiskEngine, Engine, MergeValue, Result, KEY_MAX,
    KEY_MIN,
};
use tracing_subscriber::{fmt, EnvFilter};

/// stratakv CLI
#[derive(Parser, Debug)]
#[command(name = "stratakv-cli")]
#[command(about = "Inspect and modify a stratakv data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./stratakv_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        key: String,
    },

    /// Set a key-value pair
    Put {
        key: String,
        value: String,
    },

    /// Delete a key
    Del {
        key: String,
    },

    /// List pairs in [START, END); defaults to the whole keyspace
    Scan {
        start: Option<String>,
        end: Option<String>,

        /// Maximum rows (0 = unbounded)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Add DELTA to the integer at KEY
    Incr {
        key: String,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },

    /// Append VALUE to KEY with the appender merge operator
    Append {
        key: String,
        value: String,
    },

    /// Delete every key in [START, END)
    ClearRange {
        start: String,
        end: String,

        /// Maximum keys to delete (0 = unbounded)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Remove the data directory
    Destroy,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,stratakv=info"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    let config = Config::builder().data_dir(&args.data_dir).build();

    match run(config, args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config, command: Commands) -> Result<()> {
    let engine = DiskEngine::new(config);

    if let Commands::Destroy = command {
        return engine.destroy();
    }

    engine.start()?;
    let outcome = execute(&engine, command);
    // Report the operation's error ahead of a close failure
    let closed = engine.close();
    outcome.and(closed)
}

fn execute(engine: &DiskEngine, command: Commands) -> Result<()> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", render_value(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.clear(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { start, end, limit } => {
            let start = start.as_deref().map_or(KEY_MIN, str::as_bytes);
            let end = end.as_deref().map_or(KEY_MAX, str::as_bytes);
            for kv in engine.scan(start, end, limit)? {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&kv.key),
                    render_value(&kv.value)
                );
            }
        }
        Commands::Incr { key, delta } => {
            println!("{}", increment(engine, key.as_bytes(), delta)?);
        }
        Commands::Append { key, value } => {
            let operand = MergeValue::Appender(value.into_bytes()).encode()?;
            engine.merge(key.as_bytes(), &operand)?;
            println!("OK");
        }
        Commands::ClearRange { start, end, limit } => {
            let cleared = clear_range(engine, start.as_bytes(), end.as_bytes(), limit)?;
            println!("{} keys cleared", cleared);
        }
        // Handled before start
        Commands::Destroy => {}
    }
    Ok(())
}

/// Merge values print as their decoded form, everything else as text
fn render_value(value: &[u8]) -> String {
    match MergeValue::decode(value) {
        Ok(MergeValue::Appender(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(MergeValue::Counter(n)) => n.to_string(),
        Err(_) => String::from_utf8_lossy(value).into_owned(),
    }
}
