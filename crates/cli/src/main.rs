mod config;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use protocol::{Direction, SchemaRegistry, Transport};
use runtime::CoreRuntime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "conduit.toml";

#[derive(Parser)]
#[command(name = "conduit")]
#[command(about = "Message router and tool engine between an IDE and its webview", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the core: webview on stdio, IDE backend spawned from config
    Serve,
    /// Print the tool catalog
    Tools {
        /// Print definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the message catalog
    Schema {
        /// Only this direction (e.g. core-to-webview)
        #[arg(short, long)]
        direction: Option<Direction>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    init_tracing(&config, cli.debug);

    match cli.command {
        Some(Commands::Serve) | None => cmd_serve(&config).await,
        Some(Commands::Tools { json }) => cmd_tools(json),
        Some(Commands::Schema { direction }) => cmd_schema(direction),
    }
}

/// Logs go to stderr: stdout carries the webview channel.
fn init_tracing(config: &Config, debug: bool) {
    let level = if debug { "debug" } else { config.log.level.as_str() };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn cmd_serve(config: &Config) -> Result<()> {
    let process = config.ide_process().ok_or(Error::MissingIde)?;
    let max_frame = config.router.max_frame_bytes;

    let ide = Transport::spawn(&process)?.with_max_frame(max_frame);
    let webview = Transport::stdio().with_max_frame(max_frame);
    let core = CoreRuntime::start(ide, webview, config.runtime_config())?;
    info!(ide = %process.command, "serving");

    tokio::select! {
        _ = core.closed() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "signal handler failed");
            }
            info!("interrupted, shutting down");
            core.shutdown();
            core.closed().await;
        }
    }
    Ok(())
}

fn cmd_tools(json: bool) -> Result<()> {
    let definitions = tools::catalog::definitions();

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    println!("{:<26}  {:<8}  DESCRIPTION", "TOOL", "ACCESS");
    println!("{}", "-".repeat(80));
    for definition in definitions {
        let access = if definition.readonly_hint == Some(true) {
            "read"
        } else {
            "write"
        };
        println!(
            "{:<26}  {:<8}  {}",
            definition.name, access, definition.description
        );
    }
    Ok(())
}

fn cmd_schema(only: Option<Direction>) -> Result<()> {
    let registry = SchemaRegistry::standard()?;
    println!("protocol v{}", registry.version());

    let directions = match only {
        Some(direction) => vec![direction],
        None => Direction::ALL.to_vec(),
    };
    for direction in directions {
        println!("\n{direction}");
        for spec in registry.schema(direction).iter() {
            let result = spec.result_type().unwrap_or("-");
            println!(
                "  {:<13} {:<28} {} -> {}",
                spec.kind().as_str(),
                spec.name(),
                short_type(spec.params_type()),
                short_type(result)
            );
        }
    }
    Ok(())
}

/// `alloc::vec::Vec<protocol::messages::ToolDefinition>` -> `Vec<ToolDefinition>`.
fn short_type(name: &str) -> String {
    let mut short = String::with_capacity(name.len());
    let mut segment = String::new();
    for c in name.chars() {
        match c {
            ':' => segment.clear(),
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                short.push_str(&segment);
                segment.clear();
                short.push(c);
            }
            _ => segment.push(c),
        }
    }
    short.push_str(&segment);
    short
}
