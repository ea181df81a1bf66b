//! Application bootstrap and lifecycle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::AppConfig;
use super::error::AppError;
use crate::anchor::{FallbackHitTester, WorldAnchorResolver};
use crate::asset::{AssetCacheManager, AssetError, AssetFetcher, HttpFetcher, LoadResult};
use crate::binding::{AssetAttachment, BindingSummary, SceneGraph, SceneReconciler};
use crate::tracker::{DetectionAdapter, EventReceiver, MarkerTracker, ReconciliationEvent};

type SharedReconciler<S, R> = Arc<Mutex<SceneReconciler<S, R>>>;

/// A finished asset resolution for a payload.
type Completion = (String, LoadResult);

/// The running application: tracker, reconciler and asset cache, wired
/// together by one consumer task.
///
/// The consumer task is the only writer of the scene. Frames go in through
/// [`QrAnchorApp::submit_frame`]; models for newly bound markers are resolved
/// in the background and attached when they arrive.
pub struct QrAnchorApp<D, S, R, F = HttpFetcher>
where
    D: DetectionAdapter,
    S: SceneGraph,
    F: AssetFetcher,
{
    tracker: MarkerTracker<D>,
    reconciler: SharedReconciler<S, R>,
    assets: AssetCacheManager<F>,
    cancellation: CancellationToken,
    consumer: JoinHandle<()>,
}

impl<D, S> QrAnchorApp<D, S, Arc<FallbackHitTester>, HttpFetcher>
where
    D: DetectionAdapter,
    S: SceneGraph + Send + 'static,
    S::Handle: Send,
{
    /// Start the application with the built-in hit-tester and an HTTP fetcher.
    pub async fn start(config: AppConfig, detector: D, scene: S) -> Result<Self, AppError> {
        let assets = AssetCacheManager::with_http(config.assets.clone())?;
        let hit_tester = Arc::new(FallbackHitTester::new(config.hit_test.clone()));
        Self::start_with(config, detector, scene, hit_tester, assets).await
    }

    /// The hit-tester; feed it scene snapshots as the session tracks.
    pub fn hit_tester(&self) -> Arc<FallbackHitTester> {
        Arc::clone(self.reconciler.lock().resolver())
    }
}

impl<D, S, R, F> QrAnchorApp<D, S, R, F>
where
    D: DetectionAdapter,
    S: SceneGraph + Send + 'static,
    S::Handle: Send,
    R: WorldAnchorResolver + 'static,
    F: AssetFetcher,
{
    /// Start the application with a caller-provided resolver and asset cache.
    pub async fn start_with(
        config: AppConfig,
        detector: D,
        scene: S,
        resolver: R,
        assets: AssetCacheManager<F>,
    ) -> Result<Self, AppError> {
        info!(
            removal_policy = %config.reconciler.removal_policy,
            infinite_plane = config.reconciler.infinite_plane,
            asset_dir = %config.assets.directory.display(),
            "Starting QrAnchor"
        );

        let (tracker, events) = MarkerTracker::new(detector, config.tracker.clone())?;
        let reconciler = Arc::new(Mutex::new(SceneReconciler::new(
            scene,
            resolver,
            config.reconciler.clone(),
        )));
        let cancellation = CancellationToken::new();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let consumer = Consumer {
            reconciler: Arc::clone(&reconciler),
            assets: assets.clone(),
            events,
            clock: tracker.frame_clock(),
            completions_tx,
            completions_rx,
            cancellation: cancellation.clone(),
        };
        let consumer = tokio::spawn(consumer.run());

        info!("QrAnchor started");

        Ok(Self {
            tracker,
            reconciler,
            assets,
            cancellation,
            consumer,
        })
    }

    /// Hand a camera frame to the tracker.
    pub fn submit_frame(&self, frame: D::Frame) -> crate::tracker::FrameSubmission {
        self.tracker.submit_frame(frame)
    }

    pub fn tracker(&self) -> &MarkerTracker<D> {
        &self.tracker
    }

    pub fn assets(&self) -> &AssetCacheManager<F> {
        &self.assets
    }

    /// Snapshot of the current bindings, sorted by payload.
    pub fn bindings(&self) -> Vec<BindingSummary> {
        self.reconciler.lock().store().summaries()
    }

    /// Run `f` against the reconciler. Do not block inside `f`: the consumer
    /// task waits on the same lock.
    pub fn inspect<T>(&self, f: impl FnOnce(&SceneReconciler<S, R>) -> T) -> T {
        f(&self.reconciler.lock())
    }

    /// Whether the consumer task is still running.
    pub fn is_running(&self) -> bool {
        !self.consumer.is_finished()
    }

    /// Stop the consumer task and wait for it to exit.
    ///
    /// Asset loads already in flight still complete into the disk cache.
    pub async fn shutdown(self) -> Result<(), AppError> {
        info!("Shutting down QrAnchor");
        self.cancellation.cancel();

        let result = self.consumer.await;
        if let Err(e) = result {
            warn!(error = %e, "Consumer task ended abnormally");
            return Err(AppError::Consumer(e.to_string()));
        }

        info!(bindings = self.reconciler.lock().store().len(), "QrAnchor shutdown complete");
        Ok(())
    }
}

/// State owned by the consumer task.
struct Consumer<S: SceneGraph, R, F: AssetFetcher, Frame> {
    reconciler: SharedReconciler<S, R>,
    assets: AssetCacheManager<F>,
    events: EventReceiver<Frame>,
    clock: watch::Receiver<u64>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    cancellation: CancellationToken,
}

impl<S, R, F, Frame> Consumer<S, R, F, Frame>
where
    S: SceneGraph,
    R: WorldAnchorResolver,
    F: AssetFetcher,
{
    async fn run(mut self) {
        debug!("Scene consumer started");
        loop {
            tokio::select! {
                biased;

                _ = self.cancellation.cancelled() => break,

                event = self.events.recv() => match event {
                    Some(event) => self.on_event(&event),
                    None => {
                        debug!("Tracker event channel closed");
                        break;
                    }
                },

                Some((payload, result)) = self.completions_rx.recv() => {
                    self.on_completion(&payload, result);
                }

                changed = self.clock.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let frame_id = *self.clock.borrow_and_update();
                    let expired = self.reconciler.lock().expire_stale(frame_id);
                    if !expired.is_empty() {
                        debug!(frame_id, count = expired.len(), "Expired stale bindings");
                    }
                }
            }
        }
        debug!("Scene consumer stopped");
    }

    /// Request models for new bindings, and again for visible bindings whose
    /// model is missing or failed. The cache stops retrying a key once it
    /// has been marked invalid.
    fn on_event(&self, event: &ReconciliationEvent<Frame>) {
        let requests = {
            let mut reconciler = self.reconciler.lock();
            let report = reconciler.apply(event);
            let retries = report.updated.into_iter().filter(|payload| {
                reconciler.store().get(payload).is_some_and(|binding| {
                    matches!(
                        binding.asset(),
                        AssetAttachment::Missing | AssetAttachment::Failed(_)
                    )
                })
            });
            let requests: Vec<String> = report.placed.into_iter().chain(retries).collect();
            for payload in &requests {
                reconciler.mark_asset_pending(payload);
            }
            requests
        };

        for payload in requests {
            self.request_asset(payload);
        }
    }

    fn request_asset(&self, payload: String) {
        let assets = self.assets.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = assets.resolve(&payload).await;
            // The consumer may already be gone during shutdown.
            let _ = tx.send((payload, result));
        });
    }

    fn on_completion(&self, payload: &str, result: LoadResult) {
        let mut reconciler = self.reconciler.lock();
        match result {
            Ok(asset) => {
                if reconciler.attach_asset(payload, &asset) {
                    info!(payload = %payload, scene = %asset.scene_path.display(), "Model attached");
                }
            }
            Err(e) => {
                if matches!(e, AssetError::InvalidAsset { .. }) {
                    debug!(payload = %payload, error = %e, "Model unavailable");
                } else {
                    warn!(payload = %payload, error = %e, "Model unavailable");
                }
                reconciler.mark_asset_failed(payload, e.to_string());
            }
        }
    }
}
