use annex_index::KvStore;
use annex_protocol::{
    serialize_json, CommandAction, CommandRequest, CommandResponse, DeletePayload, ErrorEnvelope,
    GetPayload,
};
use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub mod command;
pub mod config;

pub use command::CommandHandler;
use config::{FileConfig, Overrides, ResolvedConfig};

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "annex")]
#[command(about = "Mutable vector index with transactional document storage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (flags below override its values)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Document store file; omit to keep documents in memory
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Vector dimension
    #[arg(long, global = true)]
    dimension: Option<usize>,

    /// Distance metric: l2|inner_product|cosine
    #[arg(long, global = true)]
    metric: Option<String>,

    /// Engine index key: Flat, IVF<nlist>,Flat or HNSW<links>
    #[arg(long, global = true)]
    index_key: Option<String>,

    /// Inverted lists scanned per query (IVF only)
    #[arg(long, global = true)]
    nprobe: Option<usize>,

    /// Candidate list size while building the graph (HNSW only)
    #[arg(long, global = true)]
    ef_construction: Option<usize>,

    /// Candidate list size per query (HNSW only)
    #[arg(long, global = true)]
    ef_search: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one JSON command request
    Command(CommandArgs),

    /// Read JSON command requests line by line from stdin
    Serve,

    /// Print one document
    Get {
        /// Document id
        id: String,
    },

    /// Delete documents
    Delete {
        /// Document ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Print index statistics
    Stats,

    /// Rebuild the engine from the document store
    Rebuild,
}

#[derive(Args)]
struct CommandArgs {
    /// Inline JSON request (mutually exclusive with --file)
    #[arg(long, conflicts_with = "file")]
    json: Option<String>,

    /// Path to file containing the JSON request
    #[arg(long)]
    file: Option<PathBuf>,

    /// Pretty-print JSON response
    #[arg(long)]
    pretty: bool,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let file_config = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let resolved = config::resolve(
        file_config,
        Overrides {
            store: cli.store,
            dimension: cli.dimension,
            metric: cli.metric,
            index_key: cli.index_key,
            nprobe: cli.nprobe,
            ef_construction: cli.ef_construction,
            ef_search: cli.ef_search,
        },
    )?;
    let handler = open_handler(resolved)?;

    match cli.command {
        Commands::Command(args) => run_command(&handler, &args)?,
        Commands::Serve => serve(Arc::new(handler)).await?,
        Commands::Get { id } => {
            let request = CommandRequest::new(CommandAction::Get, &GetPayload { id })?;
            run_single(&handler, request, false)?;
        }
        Commands::Delete { ids } => {
            let request = CommandRequest::new(CommandAction::Delete, &DeletePayload { ids })?;
            run_single(&handler, request, false)?;
        }
        Commands::Stats => run_single(&handler, bare_request(CommandAction::Stats), false)?,
        Commands::Rebuild => run_single(&handler, bare_request(CommandAction::Rebuild), false)?,
    }

    Ok(())
}

fn bare_request(action: CommandAction) -> CommandRequest {
    CommandRequest {
        action,
        payload: serde_json::Value::Object(serde_json::Map::new()),
    }
}

fn open_handler(resolved: ResolvedConfig) -> Result<CommandHandler> {
    let store = match &resolved.store {
        Some(path) => KvStore::open(path)
            .with_context(|| format!("Failed to open document store {}", path.display()))?,
        None => {
            log::warn!("No --store given; documents live in memory for this process only");
            KvStore::in_memory()
        }
    };
    log::debug!(
        "Index config: dimension={} metric={} index_key={}",
        resolved.index.dimension,
        resolved.index.metric,
        resolved.index.index_key
    );
    CommandHandler::open(resolved.index, store).context("Failed to open index")
}

fn run_command(handler: &CommandHandler, args: &CommandArgs) -> Result<()> {
    let raw = read_payload(args)?;
    let request: CommandRequest =
        serde_json::from_str(&raw).context("Invalid JSON passed to --json/--file")?;
    run_single(handler, request, args.pretty)
}

fn run_single(handler: &CommandHandler, request: CommandRequest, pretty: bool) -> Result<()> {
    let response = handler.execute(request);

    let output = if pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serialize_json(&response)?
    };
    print_stdout(&output)?;

    if !response.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn read_payload(args: &CommandArgs) -> Result<String> {
    if let Some(raw) = &args.json {
        return Ok(raw.clone());
    }
    if let Some(path) = &args.file {
        return fs::read_to_string(path)
            .with_context(|| format!("Failed to read JSON from {}", path.display()));
    }
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read JSON request from stdin")?;
    Ok(raw)
}

/// Answers one JSON response line per request line until stdin closes.
///
/// Malformed lines get an `invalid_argument` response and a failed worker an
/// `internal` one; either way the loop keeps going.
async fn serve(handler: Arc<CommandHandler>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut served = 0usize;

    log::info!("Serving JSON-lines requests on stdin");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<CommandRequest>(line) {
            Ok(request) => {
                let action = request.action;
                let handler = Arc::clone(&handler);
                match tokio::task::spawn_blocking(move || handler.execute(request)).await {
                    Ok(response) => response,
                    Err(err) => {
                        log::error!("action={} worker failed: {err}", action.as_str());
                        CommandResponse::error(
                            Some(action),
                            ErrorEnvelope {
                                code: "internal".to_string(),
                                message: format!("Command worker failed: {err}"),
                                details: None,
                                hint: None,
                            },
                        )
                    }
                }
            }
            Err(err) => CommandResponse::error(
                None,
                ErrorEnvelope {
                    code: "invalid_argument".to_string(),
                    message: format!("Invalid request line: {err}"),
                    details: None,
                    hint: Some(
                        "Send one JSON object per line: {\"action\":..,\"payload\":..}"
                            .to_string(),
                    ),
                },
            ),
        };
        let mut output = serialize_json(&response)?;
        output.push('\n');
        stdout.write_all(output.as_bytes()).await?;
        stdout.flush().await?;
        served += 1;
    }
    log::info!("stdin closed after {served} requests");
    Ok(())
}
