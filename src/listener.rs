use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;
use crate::endpoint::MulticastEndpoint;
use crate::error::{Error, Result};
use crate::pdu::{DecodeMode, decode_entity_state_with};
use crate::stats::{ArrivalRecord, StatisticsAggregator};
use crate::transport::{Datagram, IoResultExt, ListenerHandle, open_listener};
use crate::worker::{StateCell, WorkerState};

/// Receives from every joined group, decodes each datagram and feeds the
/// session's aggregator. A bad datagram is counted and dropped; it never ends
/// the loop.
pub struct ListenerWorker {
    endpoints: Vec<MulticastEndpoint>,
    stats: Arc<StatisticsAggregator>,
    mode: DecodeMode,
    state: StateCell,
    handle: Option<Arc<ListenerHandle>>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerWorker {
    pub fn new(
        endpoints: Vec<MulticastEndpoint>,
        stats: Arc<StatisticsAggregator>,
        mode: DecodeMode,
    ) -> Self {
        Self {
            endpoints,
            stats,
            mode,
            state: StateCell::new(),
            handle: None,
            thread: None,
        }
    }

    pub fn start(&mut self, config: &TransportConfig) -> Result<()> {
        if self.state.get() != WorkerState::Idle {
            return Err(Error::Config(format!(
                "listener is already {}",
                self.state.get()
            )));
        }

        let handle = Arc::new(open_listener(&self.endpoints, config)?);
        let loop_handle = handle.clone();
        let stats = self.stats.clone();
        let mode = self.mode;

        let thread = thread::Builder::new()
            .name("dis-listener".into())
            .spawn(move || run_listener(loop_handle, stats, mode))
            .transport_context(|| "spawn listener".to_string())?;

        self.handle = Some(handle);
        self.thread = Some(thread);
        self.state.set(WorkerState::Running);
        info!("Listener started for {:?} ({:?} decoding)", self.endpoints, self.mode);
        Ok(())
    }

    /// Closes the sockets, which ends the blocked receive, and joins the loop.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.state.set(WorkerState::Stopping);
        if let Some(handle) = self.handle.take() {
            handle.close();
            let queue_drops = handle.queue_drops();
            self.stats.record_queue_drops(queue_drops);
            if queue_drops > 0 {
                warn!("Listener dropped {} datagrams on a full queue", queue_drops);
            }
        }

        if let Err(e) = thread.join() {
            warn!("Error joining listener thread: {:?}", e);
        }
        self.state.set(WorkerState::Idle);
        info!(
            "Listener stopped: {} decoded, {} decode failures, {} oversized",
            self.stats.total_count(),
            self.stats.decode_failures(),
            self.stats.oversized_dropped()
        );
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub fn statistics(&self) -> &Arc<StatisticsAggregator> {
        &self.stats
    }
}

impl Drop for ListenerWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_listener(handle: Arc<ListenerHandle>, stats: Arc<StatisticsAggregator>, mode: DecodeMode) {
    loop {
        let received = handle.receive();
        stats.record_queue_drops(handle.queue_drops());
        match received {
            Ok(datagram) => {
                process_datagram(&datagram, &stats, mode);
            }
            Err(Error::ListenerClosed) => break,
            Err(e @ Error::OversizedPacket { .. }) => {
                stats.record_oversized();
                debug!("Dropped datagram: {}", e);
            }
            Err(e) => {
                warn!("Unexpected receive error: {}", e);
            }
        }
    }
    debug!("Listener loop exiting");
}

/// Decodes one datagram and, on success, records exactly one arrival stamped
/// with the datagram's receive time. Returns whether it was ingested.
pub(crate) fn process_datagram(
    datagram: &Datagram,
    stats: &StatisticsAggregator,
    mode: DecodeMode,
) -> bool {
    match decode_entity_state_with(&datagram.payload, mode) {
        Ok(pdu) => {
            stats.ingest(ArrivalRecord::new(datagram.received_at, datagram.port));
            trace!(
                "Port {} from {}: entity {:?} ts {} position ({:.2}, {:.2}, {:.2}) velocity ({:.2}, {:.2}, {:.2})",
                datagram.port,
                datagram.source,
                pdu.entity_id,
                pdu.header.timestamp,
                pdu.position.x,
                pdu.position.y,
                pdu.position.z,
                pdu.linear_velocity.x,
                pdu.linear_velocity.y,
                pdu.linear_velocity.z
            );
            true
        }
        Err(e) => {
            stats.record_decode_failure();
            debug!(
                "Failed to decode packet from {} on port {}: {}",
                datagram.source, datagram.port, e
            );
            false
        }
    }
}
