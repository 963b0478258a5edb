use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info};

/// Configuration for the network monitor.
#[derive(Clone, Copy, Debug)]
pub struct MonitorConfig {
    /// How long a raw signal must hold before a transition is published.
    pub debounce: Duration,
    /// Connectivity assumed at startup, before the first raw signal.
    pub initial_online: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            initial_online: false,
        }
    }
}

/// Handle for feeding raw connectivity signals into the monitor.
///
/// Cloneable; `report` never blocks. The platform integration calls this
/// from wherever it learns about link changes.
#[derive(Clone)]
pub struct ConnectivityReporter {
    raw_tx: mpsc::UnboundedSender<bool>,
}

impl ConnectivityReporter {
    /// Report the raw link state. Repeated or flapping reports are fine;
    /// the monitor debounces them.
    pub fn report(&self, online: bool) {
        // Send only fails when the monitor is gone; nothing to do then.
        let _ = self.raw_tx.send(online);
    }
}

/// Process-wide connectivity state with debounced transitions.
///
/// The monitor's background task is the only writer of the published
/// state; every consumer reads through [`NetworkMonitor::is_online`] or a
/// [`watch`] subscription. A transition is published only once the raw
/// signal has held stable for the configured debounce window.
pub struct NetworkMonitor {
    state_rx: watch::Receiver<bool>,
    reporter: ConnectivityReporter,
}

impl NetworkMonitor {
    /// Spawn the monitor task on the current tokio runtime.
    pub fn spawn(config: MonitorConfig) -> Self {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(config.initial_online);

        tokio::spawn(debounce_loop(raw_rx, state_tx, config));

        Self {
            state_rx,
            reporter: ConnectivityReporter { raw_tx },
        }
    }

    /// Current debounced connectivity.
    pub fn is_online(&self) -> bool {
        *self.state_rx.borrow()
    }

    /// Subscribe to debounced transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state_rx.clone()
    }

    /// Handle for the platform integration to feed raw signals.
    pub fn reporter(&self) -> ConnectivityReporter {
        self.reporter.clone()
    }
}

async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<bool>,
    state_tx: watch::Sender<bool>,
    config: MonitorConfig,
) {
    let mut published = config.initial_online;

    while let Some(raw) = raw_rx.recv().await {
        let mut candidate = raw;
        loop {
            if candidate == published {
                // Flap returned to the published state inside the window.
                break;
            }
            match timeout(config.debounce, raw_rx.recv()).await {
                // Signal moved again before the window elapsed; the new
                // value restarts the wait.
                Ok(Some(next)) => {
                    debug!(candidate, next, "raw connectivity changed within debounce window");
                    candidate = next;
                }
                // All reporters dropped.
                Ok(None) => return,
                // Held stable for the full window: publish.
                Err(_) => {
                    published = candidate;
                    info!(online = published, "connectivity transition");
                    if state_tx.send(published).is_err() {
                        return;
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn config() -> MonitorConfig {
        MonitorConfig {
            debounce: Duration::from_millis(500),
            initial_online: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn starts_with_initial_state() {
        let monitor = NetworkMonitor::spawn(config());
        assert!(!monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn stable_signal_is_published_after_window() {
        let monitor = NetworkMonitor::spawn(config());
        monitor.reporter().report(true);

        sleep(Duration::from_millis(400)).await;
        assert!(!monitor.is_online()); // window not elapsed yet

        sleep(Duration::from_millis(200)).await;
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn flap_inside_window_is_swallowed() {
        let monitor = NetworkMonitor::spawn(config());
        let reporter = monitor.reporter();

        reporter.report(true);
        sleep(Duration::from_millis(200)).await;
        reporter.report(false); // back to published state before the window
        sleep(Duration::from_secs(2)).await;

        assert!(!monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn last_value_of_a_burst_wins() {
        let monitor = NetworkMonitor::spawn(config());
        let reporter = monitor.reporter();

        reporter.report(true);
        sleep(Duration::from_millis(100)).await;
        reporter.report(false);
        sleep(Duration::from_millis(100)).await;
        reporter.report(true);
        sleep(Duration::from_secs(1)).await;

        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_observe_transitions() {
        let monitor = NetworkMonitor::spawn(config());
        let mut rx = monitor.subscribe();

        monitor.reporter().report(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        monitor.reporter().report(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_equal_reports_do_not_retrigger() {
        let monitor = NetworkMonitor::spawn(config());
        let reporter = monitor.reporter();
        let mut rx = monitor.subscribe();

        reporter.report(true);
        sleep(Duration::from_secs(1)).await;
        rx.changed().await.unwrap();

        // Same value again: no new transition is published.
        reporter.report(true);
        sleep(Duration::from_secs(1)).await;
        assert!(!rx.has_changed().unwrap());
    }
}
