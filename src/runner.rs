//! Serialized refresh jobs.
//!
//! Indexing is the sole writer on the index database, so refresh jobs run
//! strictly one at a time through a FIFO consumed by a single task. When a
//! worker executable resolves, the job is offloaded to a one-shot child
//! process; any worker failure falls back to indexing in-process. After
//! every job the bookmark store is reconciled against the fresh index.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::bookmarks::BookmarkStore;
use crate::config::DiscoveryConfig;
use crate::db;
use crate::indexer::{self, IndexOutcome, IndexRequest};
use crate::rules::RuleOverrides;

/// Capability deciding whether (and where) a worker process exists.
pub trait WorkerSpawner: Send + Sync {
    fn resolve(&self) -> Option<PathBuf>;
}

/// Offload to this binary's own hidden `index-worker` subcommand.
pub struct CurrentExeWorker;

impl WorkerSpawner for CurrentExeWorker {
    fn resolve(&self) -> Option<PathBuf> {
        std::env::current_exe().ok()
    }
}

/// Never offload; jobs always run in-process.
pub struct NoWorker;

impl WorkerSpawner for NoWorker {
    fn resolve(&self) -> Option<PathBuf> {
        None
    }
}

/// What the worker process reads from stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerJobRequest {
    pub db_path: PathBuf,
    pub force_reindex: bool,
    #[serde(default)]
    pub system_message_regex_rules: RuleOverrides,
}

/// The single JSON object the worker writes to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerJobResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Worker-side execution of a job request. Used by the binary's
/// `index-worker` subcommand; never raises past the protocol.
pub fn execute_worker_request(request: &WorkerJobRequest) -> WorkerJobResponse {
    let index_request = IndexRequest {
        db_path: request.db_path.clone(),
        force_reindex: request.force_reindex,
        discovery: crate::config::HindsightConfig::default().discovery_config(),
        rule_overrides: request.system_message_regex_rules.clone(),
    };
    match indexer::run_incremental_indexing(&index_request) {
        Ok(_) => WorkerJobResponse {
            ok: true,
            message: None,
        },
        Err(e) => WorkerJobResponse {
            ok: false,
            message: Some(format!("{e:#}")),
        },
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub db_path: PathBuf,
    pub discovery: DiscoveryConfig,
    pub rule_overrides: RuleOverrides,
}

/// How a finished job ran.
#[derive(Debug)]
pub enum JobCompletion {
    /// The worker process indexed; per-run numbers stay with the worker.
    Worker,
    InProcess(IndexOutcome),
}

/// Handle to an enqueued refresh job.
pub struct RefreshJob {
    pub job_id: String,
    done: oneshot::Receiver<Result<JobCompletion>>,
}

impl RefreshJob {
    /// Await the job's completion. Dropping the handle instead is fine; the
    /// job still runs to completion.
    pub async fn wait(self) -> Result<JobCompletion> {
        self.done
            .await
            .context("indexing runner stopped before job completed")?
    }
}

struct Job {
    job_id: String,
    force: bool,
    done: oneshot::Sender<Result<JobCompletion>>,
}

pub struct IndexingRunner {
    sequence: AtomicU64,
    tx: mpsc::UnboundedSender<Job>,
}

impl IndexingRunner {
    /// Spawn the job loop on the current tokio runtime.
    pub fn new(config: RunnerConfig, worker: Arc<dyn WorkerSpawner>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                tracing::info!("starting indexing job {}", job.job_id);
                let result = run_job(&config, worker.as_ref(), job.force).await;
                if let Err(e) = &result {
                    tracing::error!("indexing job {} failed: {e:#}", job.job_id);
                }
                // Receiver may have been dropped; the job ran regardless.
                let _ = job.done.send(result);
            }
        });
        Self {
            sequence: AtomicU64::new(0),
            tx,
        }
    }

    /// Queue a refresh. The job id is assigned synchronously in enqueue
    /// order; execution is strictly serial.
    pub fn enqueue(&self, force: bool) -> RefreshJob {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = format!("refresh-{n}");
        let (done_tx, done_rx) = oneshot::channel();
        if let Err(send_error) = self.tx.send(Job {
            job_id: job_id.clone(),
            force,
            done: done_tx,
        }) {
            let _ = send_error
                .0
                .done
                .send(Err(anyhow::anyhow!("indexing runner is not running")));
        }
        RefreshJob {
            job_id,
            done: done_rx,
        }
    }
}

async fn run_job(
    config: &RunnerConfig,
    worker: &dyn WorkerSpawner,
    force: bool,
) -> Result<JobCompletion> {
    let completion = match worker.resolve() {
        Some(exe) => {
            let request = WorkerJobRequest {
                db_path: config.db_path.clone(),
                force_reindex: force,
                system_message_regex_rules: config.rule_overrides.clone(),
            };
            match run_worker(&exe, &request).await {
                Ok(()) => JobCompletion::Worker,
                Err(e) => {
                    tracing::warn!("index worker failed, falling back in-process: {e:#}");
                    run_in_process(config, force).await?
                }
            }
        }
        None => run_in_process(config, force).await?,
    };

    reconcile_bookmarks(config.db_path.clone()).await?;

    Ok(completion)
}

async fn run_in_process(config: &RunnerConfig, force: bool) -> Result<JobCompletion> {
    let request = IndexRequest {
        db_path: config.db_path.clone(),
        force_reindex: force,
        discovery: config.discovery.clone(),
        rule_overrides: config.rule_overrides.clone(),
    };
    let outcome = tokio::task::spawn_blocking(move || indexer::run_incremental_indexing(&request))
        .await
        .context("indexing task panicked")??;
    Ok(JobCompletion::InProcess(outcome))
}

/// One-shot worker protocol: request on stdin, a single `{ok, message?}`
/// object on stdout, exit code zero. Anything else is a failure.
async fn run_worker(exe: &Path, request: &WorkerJobRequest) -> Result<()> {
    let mut child = tokio::process::Command::new(exe)
        .arg("index-worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn index worker {}", exe.display()))?;

    let payload = serde_json::to_vec(request).context("failed to encode worker request")?;
    {
        let mut stdin = child
            .stdin
            .take()
            .context("worker stdin unavailable")?;
        stdin
            .write_all(&payload)
            .await
            .context("failed to write worker request")?;
        // Dropping closes stdin so the worker sees EOF.
    }

    let output = child
        .wait_with_output()
        .await
        .context("failed to wait for index worker")?;

    if !output.status.success() {
        anyhow::bail!("index worker exited with {}", output.status);
    }

    let response: WorkerJobResponse = serde_json::from_slice(&output.stdout)
        .context("index worker produced unparseable output")?;
    if !response.ok {
        anyhow::bail!(
            "index worker reported failure: {}",
            response.message.as_deref().unwrap_or("<no message>")
        );
    }

    Ok(())
}

/// A job never completes before its bookmark reconciliation has run against
/// the committed index.
async fn reconcile_bookmarks(db_path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let store = BookmarkStore::open(&db::bookmarks_db_path(&db_path))?;
        store.reconcile_with_indexed_data(&db_path)?;
        Ok::<_, anyhow::Error>(())
    })
    .await
    .context("bookmark reconciliation task panicked")?
}
