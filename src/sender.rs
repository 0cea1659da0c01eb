use crossbeam::channel::{self, Receiver, Sender, select};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{EntityConfig, TransportConfig};
use crate::endpoint::MulticastEndpoint;
use crate::error::{Error, Result};
use crate::pdu::{EntityId, EntityStatePdu, Vector3};
use crate::transport::{IoResultExt, SenderHandle, open_sender};
use crate::worker::{StateCell, WorkerState};

/// Geocentric start point shared by synthetic entities (Monterey Bay).
const ORIGIN: Vector3<f64> = Vector3 {
    x: -2_707_000.0,
    y: -4_353_000.0,
    z: 3_781_000.0,
};

/// Source of the synthetic entity-state PDUs a sender emits.
///
/// The entity moves in a straight line at constant velocity; the header
/// timestamp counts PDUs so it strictly increases for the life of a run.
#[derive(Debug, Clone)]
pub struct SyntheticEntity {
    exercise_id: u8,
    entity_id: EntityId,
    origin: Vector3<f64>,
    velocity: Vector3<f32>,
    sequence: u32,
}

impl SyntheticEntity {
    pub fn new(config: &EntityConfig, entity_number: u16) -> Self {
        Self {
            exercise_id: config.exercise_id,
            entity_id: EntityId::new(config.site_id, config.application_id, entity_number),
            origin: ORIGIN,
            velocity: Vector3::new(10.0, entity_number as f32, 0.0),
            sequence: 0,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Builds the next PDU for an entity that has been moving for `elapsed`.
    pub fn next_pdu(&mut self, elapsed: Duration) -> EntityStatePdu {
        self.sequence = self.sequence.wrapping_add(1);
        let t = elapsed.as_secs_f64();
        let position = Vector3::new(
            self.origin.x + self.velocity.x as f64 * t,
            self.origin.y + self.velocity.y as f64 * t,
            self.origin.z + self.velocity.z as f64 * t,
        );
        EntityStatePdu::new(
            self.exercise_id,
            self.sequence,
            self.entity_id,
            position,
            self.velocity,
        )
    }
}

#[derive(Default)]
struct SenderCounters {
    sent_packets: AtomicU64,
    sent_bytes: AtomicU64,
    send_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderTotals {
    pub sent_packets: u64,
    pub sent_bytes: u64,
    pub send_errors: u64,
}

/// Periodically multicasts one synthetic entity to one group.
pub struct SenderWorker {
    endpoint: MulticastEndpoint,
    interval: Duration,
    entity: SyntheticEntity,
    state: StateCell,
    counters: Arc<SenderCounters>,
    stop_trigger: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SenderWorker {
    pub fn new(endpoint: MulticastEndpoint, interval: Duration, entity: SyntheticEntity) -> Self {
        Self {
            endpoint,
            interval,
            entity,
            state: StateCell::new(),
            counters: Arc::new(SenderCounters::default()),
            stop_trigger: None,
            thread: None,
        }
    }

    /// Opens the socket and starts sending. A socket failure is returned and
    /// the worker stays idle.
    pub fn start(&mut self, config: &TransportConfig) -> Result<()> {
        if self.state.get() != WorkerState::Idle {
            return Err(Error::Config(format!(
                "sender for {} is already {}",
                self.endpoint,
                self.state.get()
            )));
        }
        if self.interval.is_zero() {
            return Err(Error::Config("send interval must be non-zero".into()));
        }

        let handle = open_sender(self.endpoint, config)?;
        let (stop_trigger, stop) = channel::bounded::<()>(0);
        let ticker = channel::tick(self.interval);
        let entity = self.entity.clone();
        let counters = self.counters.clone();

        let thread = thread::Builder::new()
            .name(format!("dis-send-{}", self.endpoint.port()))
            .spawn(move || run_sender(handle, entity, stop, ticker, counters))
            .transport_context(|| format!("spawn sender for {}", self.endpoint))?;

        self.stop_trigger = Some(stop_trigger);
        self.thread = Some(thread);
        self.state.set(WorkerState::Running);
        info!(
            "Sender started for {} every {:?} (entity {:?})",
            self.endpoint,
            self.interval,
            self.entity.entity_id()
        );
        Ok(())
    }

    /// Signals the loop and waits for the thread to exit. Nothing is sent
    /// after this returns.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.state.set(WorkerState::Stopping);
        self.stop_trigger.take();

        if let Err(e) = thread.join() {
            warn!("Error joining sender thread for {}: {:?}", self.endpoint, e);
        }
        self.state.set(WorkerState::Idle);

        let totals = self.totals();
        info!(
            "Sender for {} stopped: {} packets, {} bytes, {} errors",
            self.endpoint, totals.sent_packets, totals.sent_bytes, totals.send_errors
        );
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub fn endpoint(&self) -> MulticastEndpoint {
        self.endpoint
    }

    pub fn totals(&self) -> SenderTotals {
        SenderTotals {
            sent_packets: self.counters.sent_packets.load(Ordering::Relaxed),
            sent_bytes: self.counters.sent_bytes.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SenderWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_sender(
    handle: SenderHandle,
    mut entity: SyntheticEntity,
    stop: Receiver<()>,
    ticker: Receiver<Instant>,
    counters: Arc<SenderCounters>,
) {
    let started = Instant::now();
    loop {
        let pdu = entity.next_pdu(started.elapsed());
        match pdu.encode().and_then(|bytes| handle.send(&bytes)) {
            Ok(bytes_sent) => {
                counters.sent_packets.fetch_add(1, Ordering::Relaxed);
                counters.sent_bytes.fetch_add(bytes_sent as u64, Ordering::Relaxed);
                debug!(
                    "Sent PDU {} to {} ({} bytes)",
                    pdu.header.timestamp,
                    handle.endpoint(),
                    bytes_sent
                );
            }
            Err(e) => {
                counters.send_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to send to {}: {}", handle.endpoint(), e);
            }
        }

        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {}
        }
    }
    debug!("Sender loop for {} exiting", handle.endpoint());
}
