#![forbid(unsafe_code)]

//! jobrun: submit interview batches to the remote job service and follow
//! them to completion.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use jobrun_agent::client::{HttpRemoteClient, RemoteJobClient};
use jobrun_agent::config::AgentConfig;
use jobrun_agent::local_runner::{Credentials, PooledLocalRunner, UnconfiguredExecutor};
use jobrun_agent::{
    ExecutionOutcome, ExecutionStrategySelector, PollMode, RemoteExecutionCoordinator, RemoteRun,
    RunOptions,
};
use jobrun_core::cost::{CostReconciler, PriceTable};
use jobrun_core::model::{JobDescriptor, ResultSet};
use jobrun_core::progress::{reporter_for, ReporterKind};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "jobrun")]
struct Args {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Remote service base URL (overrides config).
    #[arg(long)]
    base_url: Option<String>,

    /// API key (overrides config).
    #[arg(long)]
    api_key: Option<String>,

    /// Only print the final JSON.
    #[arg(long)]
    quiet: bool,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a job file, remotely when the account allows it.
    Submit {
        #[arg(long)]
        file: PathBuf,
        /// Print the job id and return without polling.
        #[arg(long)]
        background: bool,
        /// Never contact the remote service.
        #[arg(long)]
        disable_remote: bool,
        /// Use a throwaway cache and ask the service for fresh answers.
        #[arg(long)]
        no_cache: bool,
    },
    /// Resume polling an already submitted job.
    Wait {
        #[arg(long)]
        job_id: String,
        /// Interviews submitted (interviews x iterations); caps reported counts.
        #[arg(long)]
        interviews: Option<u64>,
    },
    /// Fetch a single status snapshot.
    Status {
        #[arg(long)]
        job_id: String,
    },
    /// Reconcile costs for a results file offline.
    Cost {
        #[arg(long)]
        file: PathBuf,
        /// JSON price table used when results carry no prices.
        #[arg(long)]
        prices: Option<PathBuf>,
        #[arg(long)]
        include_cached: bool,
    },
}

/// What gets printed once a job is done.
#[derive(Serialize)]
struct RunSummary<'a> {
    job_id: &'a str,
    status: String,
    reason: Option<&'a str>,
    completed_interviews: u64,
    failed_interviews: u64,
    results: Option<usize>,
    total_credits: Option<u64>,
    error_report_url: Option<&'a str>,
}

impl<'a> From<&'a RemoteRun> for RunSummary<'a> {
    fn from(run: &'a RemoteRun) -> Self {
        Self {
            job_id: &run.job_id,
            status: run.status.to_string(),
            reason: run.reason.as_deref(),
            completed_interviews: run.interviews.completed_count,
            failed_interviews: run.interviews.failed_count,
            results: run.results.as_ref().map(ResultSet::len),
            total_credits: run.costs.as_ref().map(|c| c.total_credits),
            error_report_url: run.error_report_url.as_deref(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut cfg = AgentConfig::load_or_default(args.config.as_deref())?;
    if let Some(url) = args.base_url {
        cfg.base_url = url;
    }
    if args.api_key.is_some() {
        cfg.api_key = args.api_key;
    }

    let reporter = reporter_for(if args.quiet {
        ReporterKind::Silent
    } else {
        ReporterKind::Log
    });
    let client = Arc::new(HttpRemoteClient::new(&cfg.base_url, cfg.api_key.clone()));
    let coordinator = RemoteExecutionCoordinator::new(client.clone())
        .with_poll_interval(cfg.poll_interval())
        .with_cached_costs(cfg.include_cached_costs);

    match args.cmd {
        Cmd::Submit {
            file,
            background,
            disable_remote,
            no_cache,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("read {}", file.display()))?;
            let job: JobDescriptor = serde_json::from_slice(&bytes).context("parse job file")?;
            let options = RunOptions {
                disable_remote,
                cache: no_cache.then_some(false),
                poll_mode: if background {
                    PollMode::Background
                } else {
                    PollMode::Blocking
                },
            };
            let local =
                PooledLocalRunner::new(Arc::new(UnconfiguredExecutor), Credentials::from_env());
            let selector =
                ExecutionStrategySelector::new(coordinator, client, Arc::new(local), reporter)
                    .with_limits(cfg.concurrency_limits()?);

            match selector.run(&job, &options).await? {
                ExecutionOutcome::Remote(run) => {
                    println!("{}", serde_json::to_string_pretty(&RunSummary::from(&run))?);
                }
                ExecutionOutcome::RemotePending(pending) => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "job_id": pending.job_id(),
                            "status": "submitted",
                        }))?
                    );
                }
                ExecutionOutcome::Local(results) => {
                    let costs =
                        CostReconciler::default().summarize(&results, cfg.include_cached_costs);
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "mode": "local",
                            "results": results.len(),
                            "total_credits": costs.total_credits,
                        }))?
                    );
                }
            }
        }
        Cmd::Wait { job_id, interviews } => {
            let mut pending = coordinator.resume(job_id, reporter);
            if let Some(total) = interviews {
                pending = pending.with_submitted(total);
            }
            let run = pending.await?;
            println!("{}", serde_json::to_string_pretty(&RunSummary::from(&run))?);
        }
        Cmd::Status { job_id } => {
            let snapshot = client.get_status(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Cmd::Cost {
            file,
            prices,
            include_cached,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("read {}", file.display()))?;
            let results: ResultSet =
                serde_json::from_slice(&bytes).context("parse results file")?;
            let table = match prices {
                Some(path) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("read {}", path.display()))?;
                    serde_json::from_slice::<PriceTable>(&bytes).context("parse price table")?
                }
                None => PriceTable::new(),
            };
            let summary = CostReconciler::new(table).summarize(&results, include_cached);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
