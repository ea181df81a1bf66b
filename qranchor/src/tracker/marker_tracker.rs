//! Single-flight marker tracker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use super::detector::{DetectionAdapter, DetectionError};
use super::event::{EventReceiver, ReconciliationEvent};
use crate::marker::{CoordinateOrigin, Marker, MarkerIdentityResolver, Observation, TrackedSet};

/// Errors raised while constructing a tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// No Tokio runtime is available to run detections on.
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Configuration for the marker tracker.
#[derive(Debug, Clone, Default)]
pub struct TrackerConfig {
    /// Origin convention of the detector's bounding boxes.
    pub origin: CoordinateOrigin,
}

impl TrackerConfig {
    /// Set the detector's coordinate origin.
    pub fn with_origin(mut self, origin: CoordinateOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Result of handing a frame to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSubmission {
    /// The frame was accepted and a detection cycle started.
    Accepted { frame_id: u64 },
    /// A detection was already in flight; the frame was discarded.
    Dropped,
}

/// Result of a completed detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The tracked set changed and an event was emitted.
    Changed,
    /// The tracked set kept the same identities; no event.
    Unchanged,
    /// The detector failed; the cycle was skipped.
    DetectionFailed,
    /// A detection was already in flight; the frame was discarded.
    Dropped,
}

/// Point-in-time tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    pub cycles_completed: u64,
    pub detection_failures: u64,
    pub events_emitted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_submitted: AtomicU64,
    frames_dropped: AtomicU64,
    cycles_completed: AtomicU64,
    detection_failures: AtomicU64,
    events_emitted: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> TrackerStats {
        TrackerStats {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
        }
    }
}

struct TrackerState {
    tracked: TrackedSet,
    next_frame_id: u64,
}

struct Shared<D: DetectionAdapter> {
    detector: Arc<D>,
    resolver: MarkerIdentityResolver,
    in_flight: AtomicBool,
    state: Mutex<TrackerState>,
    events: mpsc::UnboundedSender<ReconciliationEvent<D::Frame>>,
    clock: watch::Sender<u64>,
    counters: Counters,
}

/// The frame currently submitted for detection.
///
/// Holding a token is the only way to run a cycle. Dropping it clears the
/// in-flight flag, whether the cycle succeeded, failed or was abandoned.
struct FrameToken<D: DetectionAdapter> {
    shared: Arc<Shared<D>>,
    frame_id: u64,
}

impl<D: DetectionAdapter> Drop for FrameToken<D> {
    fn drop(&mut self) {
        self.shared.in_flight.store(false, Ordering::Release);
    }
}

/// Tracks the set of visible markers across frames.
///
/// Cheap to clone; clones share the same state and event channel.
pub struct MarkerTracker<D: DetectionAdapter> {
    shared: Arc<Shared<D>>,
    runtime: Handle,
}

impl<D: DetectionAdapter> Clone for MarkerTracker<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            runtime: self.runtime.clone(),
        }
    }
}

impl<D: DetectionAdapter> MarkerTracker<D> {
    /// Create a tracker bound to the current Tokio runtime.
    ///
    /// Returns the tracker and the receiving end of its event channel.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::NoRuntime`] when called outside a runtime.
    pub fn new(
        detector: D,
        config: TrackerConfig,
    ) -> Result<(Self, EventReceiver<D::Frame>), TrackerError> {
        let handle = Handle::try_current().map_err(|e| TrackerError::NoRuntime(e.to_string()))?;
        Ok(Self::with_runtime(detector, config, handle))
    }

    /// Create a tracker that runs detections on the given runtime.
    ///
    /// Useful when frames arrive on threads the runtime does not own.
    pub fn with_runtime(
        detector: D,
        config: TrackerConfig,
        runtime: Handle,
    ) -> (Self, EventReceiver<D::Frame>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (clock, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            detector: Arc::new(detector),
            resolver: MarkerIdentityResolver::new(config.origin),
            in_flight: AtomicBool::new(false),
            state: Mutex::new(TrackerState {
                tracked: TrackedSet::new(),
                next_frame_id: 0,
            }),
            events,
            clock,
            counters: Counters::default(),
        });
        (Self { shared, runtime }, rx)
    }

    /// Submit a frame without waiting for the detection to finish.
    ///
    /// If a detection is already in flight the frame is dropped.
    pub fn submit_frame(&self, frame: D::Frame) -> FrameSubmission {
        match Shared::try_begin(&self.shared) {
            Some(token) => {
                let frame_id = token.frame_id;
                self.runtime.spawn(Shared::run_cycle(token, frame));
                FrameSubmission::Accepted { frame_id }
            }
            None => FrameSubmission::Dropped,
        }
    }

    /// Submit a frame and wait for its cycle to complete.
    ///
    /// Same single-flight rules as [`submit_frame`](Self::submit_frame).
    /// The cycle runs as its own task and keeps the tracker busy until it
    /// completes, even if this future is dropped.
    pub async fn process_frame(&self, frame: D::Frame) -> CycleOutcome {
        let Some(token) = Shared::try_begin(&self.shared) else {
            return CycleOutcome::Dropped;
        };
        let frame_id = token.frame_id;
        self.runtime
            .spawn(Shared::run_cycle(token, frame))
            .await
            .unwrap_or_else(|e| {
                debug!(frame_id, error = %e, "Detection cycle task failed");
                CycleOutcome::DetectionFailed
            })
    }

    /// Whether a detection is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// The markers currently tracked, sorted by payload.
    pub fn tracked(&self) -> Vec<Marker> {
        let state = self.shared.state.lock();
        let mut markers: Vec<Marker> = state.tracked.iter().cloned().collect();
        markers.sort_by(|a, b| a.payload().cmp(b.payload()));
        markers
    }

    /// Watch the id of the most recently completed cycle.
    ///
    /// Ticks on every completed cycle, including ones that emit no event.
    pub fn frame_clock(&self) -> watch::Receiver<u64> {
        self.shared.clock.subscribe()
    }

    /// Snapshot of the tracker counters.
    pub fn stats(&self) -> TrackerStats {
        self.shared.counters.snapshot()
    }
}

impl<D: DetectionAdapter> Shared<D> {
    fn try_begin(shared: &Arc<Self>) -> Option<FrameToken<D>> {
        shared
            .counters
            .frames_submitted
            .fetch_add(1, Ordering::Relaxed);

        if shared
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            shared.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Detection in flight, dropping frame");
            return None;
        }

        let frame_id = {
            let mut state = shared.state.lock();
            state.next_frame_id += 1;
            state.next_frame_id
        };

        Some(FrameToken {
            shared: Arc::clone(shared),
            frame_id,
        })
    }

    async fn run_cycle(token: FrameToken<D>, frame: D::Frame) -> CycleOutcome {
        let frame = Arc::new(frame);
        let detector = Arc::clone(&token.shared.detector);
        let detect_frame = Arc::clone(&frame);

        let result = tokio::task::spawn_blocking(move || detector.detect(&detect_frame))
            .await
            .unwrap_or_else(|e| Err(DetectionError::Backend(format!("detector task: {}", e))));

        token.shared.complete(token.frame_id, frame, result)
        // token dropped here: the in-flight flag clears after the event is sent
    }

    fn complete(
        &self,
        frame_id: u64,
        frame: Arc<D::Frame>,
        result: Result<Vec<Observation>, DetectionError>,
    ) -> CycleOutcome {
        self.counters.cycles_completed.fetch_add(1, Ordering::Relaxed);

        let observations = match result {
            Ok(observations) => observations,
            Err(e) => {
                debug!(frame_id, error = %e, "Detection failed, skipping cycle");
                self.counters
                    .detection_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.clock.send_replace(frame_id);
                return CycleOutcome::DetectionFailed;
            }
        };

        let next = self.resolver.resolve(&observations);

        let outcome = {
            let mut state = self.state.lock();
            let diff = state.tracked.diff(&next);
            // Replace even when identities match so midpoints stay fresh.
            state.tracked = next;

            match diff {
                Some(diff) => {
                    debug!(
                        frame_id,
                        persisted = diff.persisted.len(),
                        added = diff.added.len(),
                        removed = diff.removed.len(),
                        "Tracked markers changed"
                    );
                    let event = ReconciliationEvent::from_diff(frame_id, frame, diff);
                    // Sent under the state lock so events keep cycle order.
                    if self.events.send(event).is_err() {
                        trace!(frame_id, "No event receiver");
                    }
                    self.counters.events_emitted.fetch_add(1, Ordering::Relaxed);
                    CycleOutcome::Changed
                }
                None => CycleOutcome::Unchanged,
            }
        };

        self.clock.send_replace(frame_id);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::NormalizedRect;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    /// Detector whose frames are the observations themselves.
    struct EchoDetector {
        calls: Arc<AtomicUsize>,
    }

    type EchoFrame = Result<Vec<Observation>, DetectionError>;

    impl DetectionAdapter for EchoDetector {
        type Frame = EchoFrame;

        fn detect(&self, frame: &Self::Frame) -> Result<Vec<Observation>, DetectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            frame.clone()
        }
    }

    /// Detector that blocks until released, to hold a cycle in flight.
    struct GatedDetector {
        calls: Arc<AtomicUsize>,
        release: Mutex<std_mpsc::Receiver<()>>,
    }

    impl DetectionAdapter for GatedDetector {
        type Frame = Vec<Observation>;

        fn detect(&self, frame: &Self::Frame) -> Result<Vec<Observation>, DetectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.lock().recv_timeout(Duration::from_secs(5));
            Ok(frame.clone())
        }
    }

    fn frame(payloads: &[&str]) -> EchoFrame {
        Ok(payloads
            .iter()
            .enumerate()
            .map(|(i, p)| Observation::new(*p, NormalizedRect::new(0.1 * i as f64, 0.1, 0.1, 0.1)))
            .collect())
    }

    fn names(markers: &[Marker]) -> Vec<String> {
        markers.iter().map(|m| m.payload().to_string()).collect()
    }

    fn echo_tracker() -> (
        MarkerTracker<EchoDetector>,
        EventReceiver<EchoFrame>,
        Arc<AtomicUsize>,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let detector = EchoDetector {
            calls: Arc::clone(&calls),
        };
        let (tracker, rx) = MarkerTracker::new(detector, TrackerConfig::default()).unwrap();
        (tracker, rx, calls)
    }

    #[tokio::test]
    async fn test_first_detection_emits_added() {
        let (tracker, mut rx, _) = echo_tracker();

        let outcome = tracker.process_frame(frame(&["a", "b"])).await;
        assert_eq!(outcome, CycleOutcome::Changed);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.frame_id, 1);
        assert_eq!(event.added.len(), 2);
        assert!(event.persisted.is_empty());
        assert!(event.removed.is_empty());
    }

    #[tokio::test]
    async fn test_no_event_when_set_unchanged() {
        let (tracker, mut rx, _) = echo_tracker();

        tracker.process_frame(frame(&["a", "b"])).await;
        rx.try_recv().unwrap();

        let outcome = tracker.process_frame(frame(&["b", "a"])).await;
        assert_eq!(outcome, CycleOutcome::Unchanged);
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.stats().events_emitted, 1);
    }

    #[tokio::test]
    async fn test_unchanged_cycle_refreshes_midpoints() {
        let (tracker, _rx, _) = echo_tracker();

        tracker
            .process_frame(Ok(vec![Observation::new(
                "a",
                NormalizedRect::new(0.0, 0.0, 0.2, 0.2),
            )]))
            .await;
        tracker
            .process_frame(Ok(vec![Observation::new(
                "a",
                NormalizedRect::new(0.6, 0.6, 0.2, 0.2),
            )]))
            .await;

        let tracked = tracker.tracked();
        assert!((tracked[0].midpoint().x - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_diff_event_scenario() {
        let (tracker, mut rx, _) = echo_tracker();

        tracker.process_frame(frame(&["A", "B"])).await;
        rx.try_recv().unwrap();
        tracker.process_frame(frame(&["B", "C"])).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(names(&event.persisted), vec!["B"]);
        assert_eq!(names(&event.added), vec!["C"]);
        assert_eq!(names(&event.removed), vec!["A"]);
    }

    #[tokio::test]
    async fn test_detection_failure_is_silent_and_recoverable() {
        let (tracker, mut rx, _) = echo_tracker();

        let outcome = tracker
            .process_frame(Err(DetectionError::MalformedFrame("empty buffer".into())))
            .await;
        assert_eq!(outcome, CycleOutcome::DetectionFailed);
        assert!(rx.try_recv().is_err());
        assert!(!tracker.is_busy());

        // The tracked set is untouched and the next frame is accepted.
        let outcome = tracker.process_frame(frame(&["a"])).await;
        assert_eq!(outcome, CycleOutcome::Changed);
        assert_eq!(tracker.stats().detection_failures, 1);
    }

    #[tokio::test]
    async fn test_empty_detection_removes_everything() {
        let (tracker, mut rx, _) = echo_tracker();

        tracker.process_frame(frame(&["a"])).await;
        rx.try_recv().unwrap();
        tracker.process_frame(frame(&[])).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.removed.len(), 1);
        assert!(tracker.tracked().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_flight_drops_frames() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = std_mpsc::channel();
        let detector = GatedDetector {
            calls: Arc::clone(&calls),
            release: Mutex::new(release_rx),
        };
        let (tracker, mut rx) = MarkerTracker::new(detector, TrackerConfig::default()).unwrap();

        let first = tracker.submit_frame(vec![Observation::new(
            "a",
            NormalizedRect::new(0.1, 0.1, 0.1, 0.1),
        )]);
        assert_eq!(first, FrameSubmission::Accepted { frame_id: 1 });

        // Second frame while the first is still in flight.
        let second = tracker.submit_frame(vec![]);
        assert_eq!(second, FrameSubmission::Dropped);
        assert!(tracker.is_busy());

        release_tx.send(()).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.frame_id, 1);

        // Wait for the flag to clear, then a third frame is accepted.
        let mut clock = tracker.frame_clock();
        tokio::time::timeout(Duration::from_secs(5), clock.wait_for(|id| *id == 1))
            .await
            .unwrap()
            .unwrap();
        while tracker.is_busy() {
            tokio::task::yield_now().await;
        }

        release_tx.send(()).unwrap();
        let third = tracker.submit_frame(vec![]);
        assert_eq!(third, FrameSubmission::Accepted { frame_id: 2 });

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.frame_id, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = tracker.stats();
        assert_eq!(stats.frames_submitted, 3);
        assert_eq!(stats.frames_dropped, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_process_frame_stays_in_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = std_mpsc::channel();
        let detector = GatedDetector {
            calls: Arc::clone(&calls),
            release: Mutex::new(release_rx),
        };
        let (tracker, mut rx) = MarkerTracker::new(detector, TrackerConfig::default()).unwrap();

        let cycle = tracker.process_frame(vec![Observation::new(
            "a",
            NormalizedRect::new(0.1, 0.1, 0.1, 0.1),
        )]);
        let abandoned = tokio::time::timeout(Duration::from_millis(20), cycle).await;
        assert!(abandoned.is_err());

        // The detector is still running: no second detection may start.
        assert!(tracker.is_busy());
        assert_eq!(tracker.submit_frame(vec![]), FrameSubmission::Dropped);

        release_tx.send(()).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.frame_id, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let detector = EchoDetector {
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let result = MarkerTracker::new(detector, TrackerConfig::default());
        assert!(matches!(result, Err(TrackerError::NoRuntime(_))));
    }
}
