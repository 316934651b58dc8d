//! Edge-event subscriptions and bounded, timestamped waits.

use super::{monotonic_ns, EdgeEvent, EdgeEventSource, EdgeFlags, GpioChip};
use crate::error::{ControlError, ErrorKind, Result, ResultExt};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

struct EdgeSubscription {
    pin: u32,
    edges: EdgeFlags,
    source: Box<dyn EdgeEventSource>,
}

/// An edge together with the time it took to arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEdge {
    pub event: EdgeEvent,
    /// Microseconds from the start of the wait to the kernel timestamp
    pub elapsed_us: u64,
}

/// Holds at most one edge subscription and turns it into bounded waits.
pub struct EdgeWatcher {
    chip: Rc<dyn GpioChip>,
    consumer: String,
    subscription: Option<EdgeSubscription>,
}

impl EdgeWatcher {
    pub fn new(chip: Rc<dyn GpioChip>, consumer: impl Into<String>) -> Self {
        Self {
            chip,
            consumer: consumer.into(),
            subscription: None,
        }
    }

    /// Current subscription, if any.
    pub fn subscription(&self) -> Option<(u32, EdgeFlags)> {
        self.subscription.as_ref().map(|s| (s.pin, s.edges))
    }

    /// Subscribe to `edges` on `pin`.
    ///
    /// Identical parameters keep the existing subscription; anything else
    /// tears it down first.
    pub fn subscribe(&mut self, pin: u32, edges: EdgeFlags) -> Result<()> {
        if let Some(sub) = &self.subscription {
            if sub.pin == pin && sub.edges == edges {
                return Ok(());
            }
        }
        self.unsubscribe();

        let source = self
            .chip
            .request_events(pin, edges, &self.consumer)
            .with_context(|| format!("subscribe({}, {:?}) failed", pin, edges))?;
        info!("Subscribed to {:?} edges on line {}", edges, pin);
        self.subscription = Some(EdgeSubscription { pin, edges, source });
        Ok(())
    }

    pub fn unsubscribe(&mut self) {
        if let Some(sub) = self.subscription.take() {
            debug!(pin = sub.pin, edges = ?sub.edges, "edge subscription closed");
        }
    }

    fn source(&mut self) -> Result<&mut dyn EdgeEventSource> {
        match self.subscription.as_mut() {
            Some(sub) => Ok(sub.source.as_mut()),
            None => Err(ControlError::state("no edge subscription is active")),
        }
    }

    /// Wait up to `timeout` for the next edge.
    pub fn wait_next_edge(&mut self, timeout: Duration) -> Result<TimedEdge> {
        let start_ns = monotonic_ns();
        let source = self.source()?;
        match source.poll_event(timeout)? {
            Some(event) => Ok(TimedEdge {
                event,
                elapsed_us: event.timestamp_ns.saturating_sub(start_ns) / 1_000,
            }),
            None => Err(ControlError::timeout(format!(
                "no edge within {}µs",
                timeout.as_micros()
            ))),
        }
    }

    /// Microseconds until the next edge, waiting at most `timeout_us`.
    pub fn wait_next_edge_us(&mut self, timeout_us: u64) -> Result<u64> {
        self.wait_next_edge(Duration::from_micros(timeout_us))
            .map(|edge| edge.elapsed_us)
    }

    /// Capture up to `max_edges` edges under one overall deadline.
    ///
    /// The first delta runs from the call to the first edge, every later one
    /// between consecutive edges. Running out of time returns what was
    /// captured so far; only poll failures are errors.
    pub fn wait_edges_us(&mut self, max_edges: usize, total_timeout_us: u64) -> Result<Vec<u64>> {
        let start_ns = monotonic_ns();
        let deadline = Instant::now() + Duration::from_micros(total_timeout_us);
        let source = self.source()?;

        let mut deltas = Vec::with_capacity(max_edges);
        let mut previous_ns = start_ns;
        while deltas.len() < max_edges {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let event = match source.poll_event(deadline - now)? {
                Some(event) => event,
                None => break,
            };
            deltas.push(event.timestamp_ns.saturating_sub(previous_ns) / 1_000);
            previous_ns = event.timestamp_ns;
        }

        debug!(captured = deltas.len(), requested = max_edges, "edge capture done");
        Ok(deltas)
    }

    /// Collect `n` edges by repeated single waits sharing one deadline.
    ///
    /// Deltas follow the same convention as [`EdgeWatcher::wait_edges_us`].
    pub fn collect_edges(&mut self, n: usize, total_timeout_us: u64) -> Result<Vec<u64>> {
        let start_ns = monotonic_ns();
        let deadline = Instant::now() + Duration::from_micros(total_timeout_us);

        let mut deltas = Vec::with_capacity(n);
        let mut previous_ns = start_ns;
        for _ in 0..n {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let edge = match self.wait_next_edge(deadline - now) {
                Ok(edge) => edge,
                Err(e) if e.kind() == ErrorKind::Timeout => break,
                Err(e) => return Err(e),
            };
            deltas.push(edge.event.timestamp_ns.saturating_sub(previous_ns) / 1_000);
            previous_ns = edge.event.timestamp_ns;
        }
        Ok(deltas)
    }

    /// Subscribe to rising edges on `pin` and wait once.
    pub fn rising_edge_time(&mut self, pin: u32, timeout_us: u64) -> Result<u64> {
        self.subscribe(pin, EdgeFlags::Rising)?;
        self.wait_next_edge_us(timeout_us)
    }

    /// Subscribe to falling edges on `pin` and wait once.
    pub fn falling_edge_time(&mut self, pin: u32, timeout_us: u64) -> Result<u64> {
        self.subscribe(pin, EdgeFlags::Falling)?;
        self.wait_next_edge_us(timeout_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdev::sim::SimulatedChip;

    fn watcher() -> (SimulatedChip, EdgeWatcher) {
        let chip = SimulatedChip::new();
        let edges = EdgeWatcher::new(Rc::new(chip.clone()), "test");
        (chip, edges)
    }

    #[test]
    fn test_resubscribe_same_parameters_is_noop() {
        let (chip, mut edges) = watcher();
        edges.subscribe(4, EdgeFlags::Both).unwrap();
        edges.subscribe(4, EdgeFlags::Both).unwrap();
        assert_eq!(chip.event_opens(), 1);

        edges.subscribe(4, EdgeFlags::Rising).unwrap();
        assert_eq!(chip.event_opens(), 2);
        assert_eq!(edges.subscription(), Some((4, EdgeFlags::Rising)));
    }

    #[test]
    fn test_wait_without_subscription_is_state_error() {
        let (_chip, mut edges) = watcher();
        let err = edges.wait_next_edge_us(1_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn test_wait_next_edge_timeout() {
        let (_chip, mut edges) = watcher();
        edges.subscribe(4, EdgeFlags::Both).unwrap();
        let err = edges.wait_next_edge_us(2_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_wait_next_edge_elapsed_from_kernel_timestamp() {
        let (chip, mut edges) = watcher();
        edges.subscribe(4, EdgeFlags::Both).unwrap();
        chip.queue_events([EdgeEvent::rising(monotonic_ns() + 5_000_000)]);
        let elapsed = edges.wait_next_edge_us(10_000).unwrap();
        assert!((3_000..=5_000).contains(&elapsed), "elapsed {}", elapsed);
    }

    #[test]
    fn test_partial_capture_is_not_an_error() {
        let (chip, mut edges) = watcher();
        edges.subscribe(4, EdgeFlags::Both).unwrap();
        let base = monotonic_ns() + 1_000_000;
        chip.queue_events([
            EdgeEvent::rising(base),
            EdgeEvent::falling(base + 300_000),
            EdgeEvent::rising(base + 700_000),
        ]);
        let deltas = edges.wait_edges_us(5, 50_000).unwrap();
        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas[1], 300);
        assert_eq!(deltas[2], 400);
    }

    #[test]
    fn test_collect_edges_stops_at_requested_count() {
        let (chip, mut edges) = watcher();
        edges.subscribe(4, EdgeFlags::Both).unwrap();
        chip.queue_events((0..6).map(|i| EdgeEvent::rising(1_000_000 * (i + 1))));
        let deltas = edges.collect_edges(4, 50_000).unwrap();
        assert_eq!(deltas.len(), 4);
        assert_eq!(&deltas[1..], &[1_000, 1_000, 1_000]);
        assert_eq!(chip.pending_events(), 2);
    }

    #[test]
    fn test_poll_failure_propagates() {
        let (chip, mut edges) = watcher();
        edges.subscribe(4, EdgeFlags::Both).unwrap();
        chip.fail_polls();
        let err = edges.wait_edges_us(3, 10_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Poll);
        let err = edges.collect_edges(3, 10_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Poll);
    }
}
