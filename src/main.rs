use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dis_multicast::config::{DIS_MAX_PDU_SIZE, default_groups};
use dis_multicast::pdu::frame::decode_frame;
use dis_multicast::pdu::{DecodeMode, EntityStatePdu, decode_entity_state_with};
use dis_multicast::{
    EntityConfig, ListenerWorker, MulticastEndpoint, SenderTotals, SenderWorker, Session,
    SessionConfig, StatisticsAggregator, StatisticsSnapshot, SyntheticEntity, TransportConfig,
};

#[derive(Parser, Debug)]
#[command(name = "dis-capture")]
#[command(about = "Send, capture and analyse DIS entity-state multicast traffic")]
#[command(version)]
struct Args {
    /// Verbose logging (default: false)
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct NetworkArgs {
    /// Multicast endpoints as group:port (comma-separated or repeated)
    #[arg(short, long = "group", value_delimiter = ',', default_values = ["224.0.0.1:6060", "224.0.0.2:6061"])]
    groups: Vec<MulticastEndpoint>,

    /// Interface IP used for group membership and outgoing multicast
    #[arg(short = 'i', long, default_value = "0.0.0.0")]
    interface: Ipv4Addr,

    /// Multicast TTL for outgoing PDUs
    #[arg(long, default_value = "2")]
    ttl: u32,

    /// Largest datagram accepted by the listener, in bytes
    #[arg(long, default_value_t = DIS_MAX_PDU_SIZE)]
    max_datagram: usize,

    /// Reject PDUs whose header is not a well-formed Entity State PDU
    #[arg(long, default_value = "false")]
    strict: bool,
}

impl NetworkArgs {
    fn transport(&self) -> TransportConfig {
        TransportConfig {
            interface: self.interface,
            ttl: self.ttl,
            max_datagram_size: self.max_datagram,
            ..TransportConfig::default()
        }
    }

    fn decode_mode(&self) -> DecodeMode {
        if self.strict {
            DecodeMode::Strict
        } else {
            DecodeMode::Permissive
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
struct EntityArgs {
    /// DIS exercise identifier stamped on sent PDUs
    #[arg(long, default_value = "1")]
    exercise: u8,

    /// Site identifier of the synthetic entities
    #[arg(long, default_value = "1")]
    site: u16,

    /// Application identifier of the synthetic entities
    #[arg(long, default_value = "1")]
    application: u16,
}

impl EntityArgs {
    fn entity(&self) -> EntityConfig {
        EntityConfig {
            exercise_id: self.exercise,
            site_id: self.site,
            application_id: self.application,
            ..EntityConfig::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run senders and a listener together, then print arrival statistics
    Capture {
        #[command(flatten)]
        network: NetworkArgs,

        #[command(flatten)]
        entity: EntityArgs,

        /// Send interval per group in milliseconds
        #[arg(long, default_value = "100")]
        interval_ms: u32,

        /// Time to run in seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "0")]
        time: u64,

        /// Packet count report interval in seconds
        #[arg(short = 'r', long, default_value = "1")]
        report: u64,

        /// Sliding rate window in seconds
        #[arg(long, default_value = "10")]
        window_secs: u64,
    },
    /// Only send synthetic entity-state PDUs
    Send {
        #[command(flatten)]
        network: NetworkArgs,

        #[command(flatten)]
        entity: EntityArgs,

        /// Send interval per group in milliseconds
        #[arg(long, default_value = "100")]
        interval_ms: u32,

        /// Time to run in seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "0")]
        time: u64,

        /// Report interval in seconds
        #[arg(short = 'r', long, default_value = "5")]
        report: u64,
    },
    /// Only listen on the groups and print arrival statistics
    Listen {
        #[command(flatten)]
        network: NetworkArgs,

        /// Time to run in seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "0")]
        time: u64,

        /// Packet count report interval in seconds
        #[arg(short = 'r', long, default_value = "1")]
        report: u64,

        /// Sliding rate window in seconds
        #[arg(long, default_value = "10")]
        window_secs: u64,
    },
    /// Decode one hex-encoded PDU or captured Ethernet frame
    Decode {
        /// Hex bytes; spaces and colons are ignored
        #[arg(long)]
        hex: String,

        /// Input is a full Ethernet/IPv4/UDP frame
        #[arg(long, default_value = "false")]
        ethernet: bool,

        /// Reject PDUs whose header is not a well-formed Entity State PDU
        #[arg(long, default_value = "false")]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Commands::Capture {
            network,
            entity,
            interval_ms,
            time,
            report,
            window_secs,
        } => {
            let mut config = SessionConfig::new(network.groups.clone(), interval_ms);
            config.transport = network.transport();
            config.decode_mode = network.decode_mode();
            config.entity = entity.entity();
            config.rate_window = Duration::from_secs(window_secs);

            info!("Starting DIS capture on {} group(s)", config.groups.len());
            let session = Session::start(config).context("Failed to start capture session")?;

            run_until_done(time, report, |elapsed| {
                info!(
                    "Total packets captured: {} ({:.0}s)",
                    session.poll_count(),
                    elapsed.as_secs_f64()
                );
            })
            .await;

            let senders = session.sender_totals();
            let snapshot = session.stop();
            print_sender_totals(&senders);
            print_statistics(&snapshot);
        }
        Commands::Send {
            network,
            entity,
            interval_ms,
            time,
            report,
        } => {
            let groups = groups_or_default(&network.groups);
            let entity_config = entity.entity();
            let transport = network.transport();
            transport.validate()?;
            if interval_ms == 0 {
                anyhow::bail!("Send interval must be non-zero");
            }

            let mut senders: Vec<SenderWorker> = Vec::with_capacity(groups.len());
            for (i, &endpoint) in groups.iter().enumerate() {
                let entity = SyntheticEntity::new(
                    &entity_config,
                    entity_config.first_entity_number.wrapping_add(i as u16),
                );
                let mut sender =
                    SenderWorker::new(endpoint, Duration::from_millis(interval_ms as u64), entity);
                sender
                    .start(&transport)
                    .with_context(|| format!("Failed to start sender for {}", endpoint))?;
                senders.push(sender);
            }

            run_until_done(time, report, |_| {
                let totals: Vec<_> = senders.iter().map(|s| (s.endpoint(), s.totals())).collect();
                let sent: u64 = totals.iter().map(|(_, t)| t.sent_packets).sum();
                info!("Sent {} packets across {} group(s)", sent, totals.len());
            })
            .await;

            for sender in senders.iter_mut() {
                sender.stop();
            }
            let totals: Vec<_> = senders.iter().map(|s| (s.endpoint(), s.totals())).collect();
            print_sender_totals(&totals);
        }
        Commands::Listen {
            network,
            time,
            report,
            window_secs,
        } => {
            let transport = network.transport();
            transport.validate()?;
            let stats = Arc::new(StatisticsAggregator::with_rate_window(Duration::from_secs(
                window_secs.max(1),
            )));
            let mut listener = ListenerWorker::new(
                groups_or_default(&network.groups),
                stats.clone(),
                network.decode_mode(),
            );
            listener.start(&transport).context("Failed to start listener")?;

            run_until_done(time, report, |_| {
                info!("Total packets captured: {}", stats.total_count());
            })
            .await;

            listener.stop();
            print_statistics(&stats.snapshot());
        }
        Commands::Decode {
            hex,
            ethernet,
            strict,
        } => {
            let bytes = parse_hex(&hex)?;
            let mode = if strict {
                DecodeMode::Strict
            } else {
                DecodeMode::Permissive
            };
            let pdu = if ethernet {
                decode_frame(&bytes, mode)?
            } else {
                decode_entity_state_with(&bytes, mode)?
            };
            print_pdu(&pdu);
        }
    }

    Ok(())
}

fn groups_or_default(groups: &[MulticastEndpoint]) -> Vec<MulticastEndpoint> {
    if groups.is_empty() {
        default_groups()
    } else {
        groups.to_vec()
    }
}

/// Waits for `time_secs` (0 = forever) or Ctrl+C, calling `report` every
/// `report_secs`.
async fn run_until_done<F>(time_secs: u64, report_secs: u64, mut report: F)
where
    F: FnMut(Duration),
{
    let start = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_secs(report_secs.max(1)));
    interval.tick().await;

    let deadline = async {
        if time_secs > 0 {
            tokio::time::sleep(Duration::from_secs(time_secs)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            _ = &mut deadline => {
                info!("Run duration ({} seconds) completed", time_secs);
                break;
            }
            _ = interval.tick() => report(start.elapsed()),
        }
    }
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if !digits.is_ascii() {
        anyhow::bail!("Hex input contains non-ASCII characters");
    }
    if digits.len() % 2 != 0 {
        anyhow::bail!("Hex input has an odd number of digits ({})", digits.len());
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("Invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

fn print_pdu(pdu: &EntityStatePdu) {
    let h = &pdu.header;
    println!("PDU Type: {}", h.pdu_type);
    println!("Protocol Version: {}", h.protocol_version);
    println!("Exercise ID: {}", h.exercise_id);
    println!("Protocol Family: {}", h.protocol_family);
    println!("PDU Length: {}", h.pdu_length);
    println!("Timestamp: {}", h.timestamp);
    println!("PDU Status: {}", h.pdu_status);
    println!(
        "Entity ID - Site: {}, Application: {}, Entity: {}",
        pdu.entity_id.site_id, pdu.entity_id.application_id, pdu.entity_id.entity_number
    );
    println!(
        "Position: ({}, {}, {})",
        pdu.position.x, pdu.position.y, pdu.position.z
    );
    println!(
        "Velocity: ({}, {}, {})",
        pdu.linear_velocity.x, pdu.linear_velocity.y, pdu.linear_velocity.z
    );
}

fn print_sender_totals(totals: &[(MulticastEndpoint, SenderTotals)]) {
    println!("\n=== DIS Sender Statistics ===");
    println!("{:<22} {:<12} {:<12} {:<8}", "Group", "Packets", "Bytes", "Errors");
    println!("{}", "─".repeat(56));
    for (endpoint, t) in totals {
        println!(
            "{:<22} {:<12} {:<12} {:<8}",
            endpoint.to_string(),
            t.sent_packets,
            t.sent_bytes,
            t.send_errors
        );
    }
}

fn print_statistics(snapshot: &StatisticsSnapshot) {
    println!("\n=== DIS Packet Capture Statistics ===");
    println!("Total packets captured: {}", snapshot.total_count);
    println!(
        "Average latency between packets: {:.2} ms",
        snapshot.mean_latency_ms
    );
    if let (Some(p50), Some(p95), Some(p99), Some(max)) = (
        snapshot.latency_percentile(50.0),
        snapshot.latency_percentile(95.0),
        snapshot.latency_percentile(99.0),
        snapshot.latency_percentile(100.0),
    ) {
        println!(
            "Latency (ms): p50={:.2} p95={:.2} p99={:.2} max={:.2}",
            p50, p95, p99, max
        );
    }
    println!(
        "Peak packets per {}s window: {}",
        snapshot.rate_window.as_secs(),
        snapshot.peak_rate()
    );
    println!("Capture span: {:.2} seconds", snapshot.span.as_secs_f64());
    println!(
        "Decode failures: {}, Oversized dropped: {}, Queue dropped: {}",
        snapshot.decode_failures, snapshot.oversized_dropped, snapshot.queue_dropped
    );

    if !snapshot.per_port.is_empty() {
        println!("{:<8} {:<12}", "Port", "Packets");
        println!("{}", "─".repeat(22));
        for (port, count) in &snapshot.per_port {
            println!("{:<8} {:<12}", port, count);
        }
    }
}
