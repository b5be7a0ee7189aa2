use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use hindsight::config::{self, HindsightConfig};
use hindsight::indexer::{self, IndexRequest};
use hindsight::ipc::{dispatch, IpcContext};
use hindsight::query::{QueryService, SearchRequest};
use hindsight::runner::{
    execute_worker_request, CurrentExeWorker, IndexingRunner, RunnerConfig, WorkerJobRequest,
};

#[derive(Parser)]
#[command(name = "hindsight", version, about = "Index and search AI coding-assistant sessions")]
struct Cli {
    /// Custom index database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to config file (default: ~/.hindsight/hindsight.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover provider session files and index them
    Index {
        /// Force a full re-index (ignore previously indexed state)
        #[arg(long)]
        force: bool,
    },

    /// Full-text search across indexed messages
    Search {
        /// Search query
        query: String,

        /// Filter by provider (claude, codex, gemini); repeatable
        #[arg(long)]
        provider: Vec<String>,

        /// Maximum number of results
        #[arg(long, default_value = "10")]
        limit: i64,
    },

    /// List indexed projects
    Projects,

    /// List indexed sessions
    Sessions {
        /// Restrict to one project id
        #[arg(long, default_value = "")]
        project: String,
    },

    /// Serve the request/response contract over stdio (one JSON object per line)
    Serve,

    /// Write a default config file to ~/.hindsight/hindsight.toml
    Init,

    /// One-shot indexing worker (request on stdin, response on stdout)
    #[command(hide = true)]
    IndexWorker,
}

fn main() {
    let cli = Cli::parse();

    // Load config before tracing init so log_level from config works.
    let cfg = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e:#}");
            std::process::exit(1);
        }
    };

    // Priority: RUST_LOG env > config file log_level > "info"
    let log_level = cfg.resolved_log_level().to_string();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => run_init(),
        Commands::Index { force } => run_index(&cli, &cfg, force),
        Commands::Search {
            ref query,
            ref provider,
            limit,
        } => run_search(&cli, &cfg, query, provider, limit),
        Commands::Projects => run_projects(&cli, &cfg),
        Commands::Sessions { ref project } => run_sessions(&cli, &cfg, project),
        Commands::Serve => run_serve(&cli, &cfg),
        Commands::IndexWorker => run_index_worker(),
    }
}

fn resolve_db_path(cli: &Cli, cfg: &HindsightConfig) -> PathBuf {
    cli.db.clone().unwrap_or_else(|| cfg.resolved_db_path())
}

fn run_init() {
    let path = config::default_config_path();
    if path.exists() {
        eprintln!("config file already exists: {}", path.display());
        std::process::exit(1);
    }
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("failed to create directory {}: {e}", parent.display());
            std::process::exit(1);
        }
    }
    let template = include_str!("config_template.toml");
    if let Err(e) = std::fs::write(&path, template) {
        eprintln!("failed to write config file: {e}");
        std::process::exit(1);
    }
    println!("wrote default config to {}", path.display());
}

fn run_index(cli: &Cli, cfg: &HindsightConfig, force: bool) {
    let request = IndexRequest {
        db_path: resolve_db_path(cli, cfg),
        force_reindex: force,
        discovery: cfg.discovery_config(),
        rule_overrides: cfg.rules.clone(),
    };
    match indexer::run_incremental_indexing(&request) {
        Ok(outcome) => print!("{outcome}"),
        Err(e) => {
            eprintln!("indexing failed: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run_search(cli: &Cli, cfg: &HindsightConfig, query: &str, providers: &[String], limit: i64) {
    let service = match QueryService::open(&resolve_db_path(cli, cfg)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open database: {e:#}");
            std::process::exit(1);
        }
    };

    let request = SearchRequest {
        query: query.to_string(),
        categories: None,
        providers: if providers.is_empty() {
            None
        } else {
            Some(providers.to_vec())
        },
        project_ids: None,
        project_query: String::new(),
        limit: limit.clamp(1, 500),
        offset: 0,
    };

    match service.search(&request) {
        Ok(response) => {
            println!("{} matches", response.total_count);
            for hit in response.results {
                println!(
                    "[{}] {} {}: {}",
                    hit.provider,
                    hit.created_at,
                    hit.session_title.unwrap_or_default(),
                    hit.snippet,
                );
            }
        }
        Err(e) => {
            eprintln!("search failed: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run_projects(cli: &Cli, cfg: &HindsightConfig) {
    let service = match QueryService::open(&resolve_db_path(cli, cfg)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open database: {e:#}");
            std::process::exit(1);
        }
    };
    match service.list_projects(None, "") {
        Ok(projects) => {
            for project in projects {
                println!(
                    "{}  {}  {} ({} sessions, last {})",
                    project.id,
                    project.provider,
                    project.path,
                    project.session_count,
                    project.last_activity.unwrap_or_else(|| "never".to_string()),
                );
            }
        }
        Err(e) => {
            eprintln!("listing projects failed: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run_sessions(cli: &Cli, cfg: &HindsightConfig, project: &str) {
    let service = match QueryService::open(&resolve_db_path(cli, cfg)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open database: {e:#}");
            std::process::exit(1);
        }
    };
    match service.list_sessions(project) {
        Ok(sessions) => {
            for session in sessions {
                println!(
                    "{}  {}  {} messages  {}",
                    session.id, session.provider, session.message_count, session.title,
                );
            }
        }
        Err(e) => {
            eprintln!("listing sessions failed: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Line-delimited JSON over stdio: `{id, channel, payload}` in,
/// `{id, ok, data | error, validation}` out.
fn run_serve(cli: &Cli, cfg: &HindsightConfig) {
    let db_path = resolve_db_path(cli, cfg);
    let settings_file = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    rt.block_on(async {
        let query = match QueryService::open(&db_path) {
            Ok(q) => q,
            Err(e) => {
                eprintln!("failed to open database: {e:#}");
                std::process::exit(1);
            }
        };
        let runner = IndexingRunner::new(
            RunnerConfig {
                db_path: db_path.clone(),
                discovery: cfg.discovery_config(),
                rule_overrides: cfg.rules.clone(),
            },
            Arc::new(CurrentExeWorker),
        );
        let ctx = IpcContext {
            query,
            runner,
            config: cfg.clone(),
            settings_file,
        };

        serve_stdio(&ctx).await;
    });
}

async fn serve_stdio(ctx: &IpcContext) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    tracing::info!("serving {} channels over stdio", hindsight::ipc::Channel::ALL.len());

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let envelope: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                println!(
                    "{}",
                    serde_json::json!({ "id": null, "ok": false, "error": format!("malformed request: {e}"), "validation": true })
                );
                continue;
            }
        };
        let id = envelope.get("id").cloned().unwrap_or(serde_json::Value::Null);
        let channel = envelope
            .get("channel")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();
        let payload = envelope
            .get("payload")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let response = match dispatch(ctx, &channel, payload) {
            Ok(data) => serde_json::json!({ "id": id, "ok": true, "data": data }),
            Err(e) => serde_json::json!({
                "id": id,
                "ok": false,
                "error": e.to_string(),
                "validation": e.is_validation(),
            }),
        };
        println!("{response}");
    }
}

/// Worker protocol: one request object on stdin, one `{ok, message?}` on
/// stdout. Exit code zero whenever the protocol was spoken.
fn run_index_worker() {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        eprintln!("failed to read worker request: {e}");
        std::process::exit(1);
    }
    let request: WorkerJobRequest = match serde_json::from_str(&input) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("malformed worker request: {e}");
            std::process::exit(1);
        }
    };
    let response = execute_worker_request(&request);
    match serde_json::to_string(&response) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("failed to encode worker response: {e}");
            std::process::exit(1);
        }
    }
}
