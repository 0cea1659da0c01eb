use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{SessionConfig, TransportConfig};
use crate::endpoint::MulticastEndpoint;
use crate::error::Result;
use crate::listener::ListenerWorker;
use crate::sender::{SenderTotals, SenderWorker, SyntheticEntity};
use crate::stats::{StatisticsAggregator, StatisticsSnapshot};

/// One capture run: a sender per group plus a listener joined to all of them,
/// reporting into a fresh aggregator.
pub struct Session {
    senders: Vec<SenderWorker>,
    listener: ListenerWorker,
    stats: Arc<StatisticsAggregator>,
    started_at: Instant,
}

impl Session {
    /// Starts every worker or none. The listener comes up first so the
    /// opening PDUs are not missed.
    pub fn start(config: SessionConfig) -> Result<Session> {
        config.validate()?;

        let stats = Arc::new(StatisticsAggregator::with_rate_window(config.rate_window));
        let mut listener =
            ListenerWorker::new(config.groups.clone(), stats.clone(), config.decode_mode);
        listener.start(&config.transport)?;

        let mut senders: Vec<SenderWorker> = config
            .groups
            .iter()
            .enumerate()
            .map(|(i, &endpoint)| {
                let entity_number = config.entity.first_entity_number.wrapping_add(i as u16);
                let entity = SyntheticEntity::new(&config.entity, entity_number);
                SenderWorker::new(endpoint, config.send_interval(), entity)
            })
            .collect();

        if let Err(e) = start_all(&mut senders, &config.transport) {
            listener.stop();
            return Err(e);
        }

        info!(
            "Session started: {} sender(s) every {} ms",
            senders.len(),
            config.send_interval_ms
        );
        Ok(Session {
            senders,
            listener,
            stats,
            started_at: Instant::now(),
        })
    }

    /// Stops senders, then the listener, and returns the final statistics.
    pub fn stop(mut self) -> StatisticsSnapshot {
        for sender in self.senders.iter_mut() {
            sender.stop();
        }
        self.listener.stop();

        let snapshot = self.stats.snapshot();
        info!(
            "Session stopped after {:.2}s: {} packets, mean latency {:.2} ms",
            self.started_at.elapsed().as_secs_f64(),
            snapshot.total_count,
            snapshot.mean_latency_ms
        );
        snapshot
    }

    /// Running total of decoded packets. Never waits on the workers.
    pub fn poll_count(&self) -> u64 {
        self.stats.total_count()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    pub fn statistics(&self) -> Arc<StatisticsAggregator> {
        self.stats.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Per-group send counters.
    pub fn sender_totals(&self) -> Vec<(MulticastEndpoint, SenderTotals)> {
        self.senders
            .iter()
            .map(|sender| (sender.endpoint(), sender.totals()))
            .collect()
    }
}

/// Starts the senders in order. On the first failure the ones this call
/// started are stopped again before the error is returned.
fn start_all(senders: &mut [SenderWorker], transport: &TransportConfig) -> Result<()> {
    let failure = senders
        .iter_mut()
        .enumerate()
        .find_map(|(i, sender)| sender.start(transport).err().map(|e| (i, e)));

    let Some((failed, e)) = failure else {
        return Ok(());
    };
    warn!(
        "Failed to start sender for {}: {}; aborting session",
        senders[failed].endpoint(),
        e
    );
    for started in senders[..failed].iter_mut() {
        started.stop();
    }
    Err(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EntityConfig, default_groups};
    use crate::error::Error;
    use crate::worker::WorkerState;
    use std::net::Ipv4Addr;
    use std::thread;

    fn loopback_sender(endpoint: &str, entity_number: u16) -> SenderWorker {
        SenderWorker::new(
            endpoint.parse().unwrap(),
            Duration::from_millis(10),
            SyntheticEntity::new(&EntityConfig::default(), entity_number),
        )
    }

    #[test]
    fn test_failed_sender_rolls_back_started_ones() {
        let transport = TransportConfig {
            interface: Ipv4Addr::LOCALHOST,
            ..TransportConfig::default()
        };
        // The second sender is already running, so starting it again fails.
        let mut busy = loopback_sender("239.255.78.2:47102", 2);
        busy.start(&transport).unwrap();

        let mut senders = vec![
            loopback_sender("239.255.78.1:47101", 1),
            busy,
            loopback_sender("239.255.78.3:47103", 3),
        ];
        let result = start_all(&mut senders, &transport);
        assert!(matches!(result, Err(Error::Config(_))));

        assert_eq!(senders[0].state(), WorkerState::Idle);
        assert_eq!(senders[2].state(), WorkerState::Idle);
        assert_eq!(senders[2].totals(), SenderTotals::default());

        // The rolled-back sender sends nothing more.
        let frozen = senders[0].totals();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(senders[0].totals(), frozen);

        senders[1].stop();
    }

    #[test]
    fn test_start_all_starts_every_sender() {
        let transport = TransportConfig {
            interface: Ipv4Addr::LOCALHOST,
            ..TransportConfig::default()
        };
        let mut senders = vec![
            loopback_sender("239.255.78.4:47104", 1),
            loopback_sender("239.255.78.5:47105", 2),
        ];
        start_all(&mut senders, &transport).unwrap();
        assert!(senders.iter().all(|s| s.state() == WorkerState::Running));
        for sender in senders.iter_mut() {
            sender.stop();
        }
    }

    #[test]
    fn test_invalid_config_starts_nothing() {
        let result = Session::start(SessionConfig::new(Vec::new(), 100));
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Session::start(SessionConfig::new(default_groups(), 0));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
