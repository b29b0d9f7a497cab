//! Command-line runner for JSON-described topologies.
//!
//! # Usage
//!
//! Deterministic stepping:
//! ```bash
//! qkdnet --topology net.json --ticks 20 --send alice:bob:hello
//! ```
//!
//! Paced scheduling, one driver per network:
//! ```bash
//! qkdnet --topology net.json --realtime --fps 10 --duration 5 --send alice:bob:hello
//! ```
//!
//! Add `--sequential` for a single coordinator, `--events` to print every
//! simulation event as a JSON line and `--audit <path>` to keep the audit
//! trail.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use qkdnet::sim::{AuditLog, ChannelSink, NodeKind, TopologyConfig, World};
use qkdnet::{EventSink, NodeId, NullSink};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "qkdnet")]
#[command(about = "Simulate classical traffic over QKD-gated links", long_about = None)]
struct Args {
    /// JSON topology file
    #[arg(long)]
    topology: PathBuf,

    /// Number of deterministic ticks to run (defaults to 50)
    #[arg(long)]
    ticks: Option<u64>,

    /// Run the paced scheduler instead of stepping
    #[arg(long)]
    realtime: bool,

    /// Ticks per second in realtime mode (defaults to the topology's tick rate)
    #[arg(long)]
    fps: Option<f64>,

    /// Tick all networks from one coordinator in realtime mode
    #[arg(long)]
    sequential: bool,

    /// Seconds to run in realtime mode
    #[arg(long, default_value = "10")]
    duration: f64,

    /// Message to send, as FROM:TO:MESSAGE (repeatable)
    #[arg(long = "send")]
    sends: Vec<String>,

    /// Append the audit trail to this file
    #[arg(long)]
    audit: Option<PathBuf>,

    /// Print simulation events as JSON lines on stdout
    #[arg(long)]
    events: bool,
}

fn parse_send(spec: &str) -> Result<(&str, &str, &str), String> {
    let mut parts = spec.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(from), Some(to), Some(message)) if !from.is_empty() && !to.is_empty() => {
            Ok((from, to, message))
        }
        _ => Err(format!("invalid --send value '{spec}', expected FROM:TO:MESSAGE")),
    }
}

fn report(world: &World) {
    let topology = world.topology();
    for index in 0..topology.node_count() {
        let id = NodeId::new(index as u32);
        let Ok(info) = topology.node_info(id) else {
            continue;
        };
        match info.kind {
            NodeKind::ClassicalHost => {
                let delivered = topology.delivered(id).unwrap_or_default();
                let messages: Vec<String> = delivered.iter().map(|p| p.payload_lossy()).collect();
                tracing::info!(host = %info.name, received = ?messages, "host summary");
            }
            NodeKind::QuantumAdapter => {
                if let Ok(status) = topology.adapter_status(id) {
                    tracing::info!(
                        adapter = %info.name,
                        phase = ?status.phase,
                        qkd_initiations = status.qkd_initiations,
                        pending = status.pending,
                        "adapter summary"
                    );
                }
            }
            NodeKind::ClassicalRouter => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let sends = args
        .sends
        .iter()
        .map(|spec| parse_send(spec))
        .collect::<Result<Vec<_>, _>>()?;

    let config = TopologyConfig::from_file(&args.topology)?;
    let tick_rate = config.sim.tick_rate;

    let audit = match &args.audit {
        Some(path) => AuditLog::to_file(path)?,
        None => AuditLog::disabled(),
    };

    let (sink, printer) = if args.events {
        let (sink, mut receiver) = ChannelSink::new();
        let printer = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => tracing::warn!(error = %err, "failed to encode event"),
                }
            }
        });
        let sink: Arc<dyn EventSink> = Arc::new(sink);
        (sink, Some(printer))
    } else {
        let sink: Arc<dyn EventSink> = Arc::new(NullSink);
        (sink, None)
    };

    let (world, _layer) = config.into_world(sink, audit)?;
    tracing::info!(
        topology = %args.topology.display(),
        nodes = world.topology().node_count(),
        networks = world.networks().len(),
        "simulation ready"
    );

    for (from, to, message) in sends {
        if let Err(err) = world.send_by_name(from, to, message) {
            tracing::error!(%from, %to, error = %err, "send failed");
        }
    }

    if args.realtime {
        let fps = args.fps.unwrap_or(tick_rate);
        if args.sequential {
            world.start_sequential(fps)?;
        } else {
            world.start(fps)?;
        }
        tokio::time::sleep(Duration::try_from_secs_f64(args.duration)?).await;
        world.shutdown().await;
    } else {
        world.run_ticks(args.ticks.unwrap_or(50));
    }

    report(&world);
    world.topology().audit().flush();
    drop(world);

    if let Some(printer) = printer {
        printer.await?;
    }
    Ok(())
}
