//! DIS entity-state traffic over IP multicast.
//!
//! Senders emit synthetic Entity State PDUs on their own groups, a listener
//! joins every group and decodes what arrives, and a per-session aggregator
//! turns the arrivals into counts, inter-arrival latency and a sliding rate
//! series.
//!
//! ```no_run
//! use dis_multicast::{Session, SessionConfig, config::default_groups};
//! use std::time::Duration;
//!
//! let session = Session::start(SessionConfig::new(default_groups(), 100))?;
//! std::thread::sleep(Duration::from_secs(2));
//! let snapshot = session.stop();
//! println!("{} packets, {:.1} ms mean gap", snapshot.total_count, snapshot.mean_latency_ms);
//! # Ok::<(), dis_multicast::Error>(())
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod pdu;
pub mod sender;
pub mod session;
pub mod stats;
pub mod transport;
pub mod worker;

pub use config::{EntityConfig, SessionConfig, TransportConfig};
pub use endpoint::MulticastEndpoint;
pub use error::{Error, Result};
pub use listener::ListenerWorker;
pub use sender::{SenderTotals, SenderWorker, SyntheticEntity};
pub use session::Session;
pub use stats::{ArrivalRecord, StatisticsAggregator, StatisticsSnapshot};
pub use worker::WorkerState;
