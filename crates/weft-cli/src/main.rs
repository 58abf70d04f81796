use std::sync::Arc;

use anyhow::{Context, ensure};
use clap::Parser;
use serde::Serialize;
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use weft_core::app::{Config, Instance, InstanceContext, RunningInstance, TaskRegistry};
use weft_core::domain::{Content, TaskUuid};
use weft_core::impls::{InMemoryCluster, InMemoryExecutor, InMemoryStore};

/// In-memory demo: N instances share one cluster, M tasks get assigned,
/// the leader crashes and the survivors take over its work.
#[derive(Debug, Parser)]
#[command(name = "weft")]
struct Args {
    /// Number of worker instances (at least 2).
    #[arg(long, default_value_t = 3)]
    workers: usize,

    /// Number of tasks to submit.
    #[arg(long, default_value_t = 8)]
    tasks: usize,

    /// Liveness session timeout of the in-memory substrate.
    #[arg(long, default_value_t = 1_500)]
    session_timeout_ms: u64,

    /// Time given to watchers to settle after each step.
    #[arg(long, default_value_t = 300)]
    settle_ms: u64,

    /// Keep the survivors running until Ctrl-C.
    #[arg(long)]
    hold: bool,
}

/// One in-process "worker process" of the demo.
struct Node {
    running: RunningInstance,
    store: Arc<InMemoryStore>,
    executor: InMemoryExecutor,
}

#[derive(Debug, Serialize)]
struct Summary {
    workers: usize,
    tasks: usize,
    assigned: usize,
    running: usize,
    crashed: String,
    leader: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is reserved for the report
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    ensure!(args.workers >= 2, "--workers must be at least 2 to show a failover");
    ensure!(args.session_timeout_ms > 0, "--session-timeout-ms must be positive");

    // env (WEFT_*) first, flags on top
    let base = Config {
        session_timeout_ms: args.session_timeout_ms,
        ..Config::from_env()?
    };
    let settle = Duration::from_millis(args.settle_ms);
    let cluster = InMemoryCluster::new(base.session_timeout());

    // (A) start the instances; the first one becomes leader
    let mut nodes = Vec::with_capacity(args.workers);
    for i in 1..=args.workers {
        let config = Config {
            instance_id: format!("worker-{i}"),
            ..base.clone()
        };
        let ctx = InstanceContext::new(config)?;
        let store = Arc::new(cluster.connect().await);
        let executor = InMemoryExecutor::new();
        let running = Instance::new(ctx, store.clone(), store.clone(), Arc::new(executor.clone()))
            .start()
            .await
            .with_context(|| format!("starting worker-{i}"))?;
        nodes.push(Node {
            running,
            store,
            executor,
        });
    }

    // (B) submit tasks as an external producer
    let producer = TaskRegistry::new(Arc::new(cluster.connect().await), base.layout()?);
    for n in 0..args.tasks {
        let uuid = TaskUuid::parse(Ulid::new().to_string())?;
        producer
            .submit(&uuid, &Content::from(format!("job-{n}").as_str()))
            .await?;
    }
    sleep(settle).await;

    // (C) crash the leader; its marker goes away only after the session timeout
    let leader = nodes[0].running.status().current_leader().await?.map(|p| p.id);
    let victim = nodes
        .iter()
        .position(|node| Some(node.running.worker_id().as_str()) == leader.as_deref())
        .unwrap_or(0);
    let crashed = nodes.remove(victim);
    let crashed_id = crashed.running.worker_id().to_string();
    info!(worker = %crashed_id, "crashing instance");
    crashed.store.crash();
    crashed.running.halt().await;
    sleep(base.session_timeout() * 2 + settle).await;

    // (D) report from a survivor
    let report = nodes[0].running.status().snapshot().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let mut running = 0;
    for node in &nodes {
        running += node.executor.running().await.len();
    }
    let summary = Summary {
        workers: nodes.len(),
        tasks: args.tasks,
        assigned: report.total_assignments(),
        running,
        crashed: crashed_id,
        leader: report.leader.clone(),
    };
    println!("{}", serde_json::to_string(&summary)?);

    if args.hold {
        info!("holding; press Ctrl-C to stop");
        let signals: Vec<_> = nodes.iter().map(|n| n.running.shutdown_signal()).collect();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                for signal in signals {
                    signal.trigger();
                }
            }
        });
        for node in nodes {
            node.running.run_until_shutdown().await;
        }
    } else {
        for node in nodes {
            node.running.shutdown().await;
        }
    }
    Ok(())
}
