//! Replay command - feed recorded detections through the tracker and the
//! scene reconciler, printing what each frame changed.
//!
//! The input holds one JSON array of observations per line:
//!
//! ```text
//! [{"payload":"cup","bounding_box":{"x":0.4,"y":0.4,"width":0.1,"height":0.1}}]
//! []
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use qranchor::anchor::{FallbackHitTester, PinholeCamera, SceneSnapshot, Vec3};
use qranchor::app::AppConfig;
use qranchor::asset::AssetCacheManager;
use qranchor::binding::{HeadlessScene, RemovalPolicy, SceneReconciler};
use qranchor::marker::Observation;
use qranchor::tracker::{DetectionAdapter, DetectionError, MarkerTracker};
use tracing::{debug, warn};

use crate::error::CliError;
use crate::runner::CliRunner;

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// JSON lines file, one array of observations per frame
    pub file: PathBuf,

    /// Removal policy: retain, immediate, stale or stale:N (defaults to config)
    #[arg(long)]
    pub policy: Option<RemovalPolicy>,

    /// Camera height above the floor in meters
    #[arg(long, default_value_t = 1.5)]
    pub camera_height: f64,

    /// Resolve and attach models for newly bound markers
    #[arg(long)]
    pub fetch: bool,
}

/// Recorded frames carry their observations already decoded.
struct RecordedDetector;

impl DetectionAdapter for RecordedDetector {
    type Frame = Vec<Observation>;

    fn detect(&self, frame: &Self::Frame) -> Result<Vec<Observation>, DetectionError> {
        Ok(frame.clone())
    }
}

fn read_frames(args: &ReplayArgs) -> Result<Vec<Vec<Observation>>, CliError> {
    let text = fs::read_to_string(&args.file)
        .map_err(|e| CliError::Replay(format!("{}: {}", args.file.display(), e)))?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .map_err(|e| CliError::Replay(format!("line {}: {}", index + 1, e)))
        })
        .collect()
}

pub fn run(runner: &CliRunner, args: ReplayArgs) -> Result<(), CliError> {
    let frames = read_frames(&args)?;
    let mut config = AppConfig::from_config_file(runner.config());
    if let Some(policy) = args.policy {
        config = config.with_removal_policy(policy);
    }
    let assets = if args.fetch {
        Some(AssetCacheManager::with_http(config.assets.clone())?)
    } else {
        None
    };

    runner.block_on(replay(frames, config, args.camera_height, assets))?
}

async fn replay(
    frames: Vec<Vec<Observation>>,
    config: AppConfig,
    camera_height: f64,
    assets: Option<AssetCacheManager>,
) -> Result<(), CliError> {
    let (tracker, mut events) = MarkerTracker::new(RecordedDetector, config.tracker.clone())?;
    let clock = tracker.frame_clock();

    let hit_tester = Arc::new(FallbackHitTester::new(config.hit_test.clone()));
    hit_tester.update(SceneSnapshot::new(PinholeCamera::looking(
        Vec3::new(0.0, camera_height, 0.0),
        Vec3::new(0.0, -1.0, -1.0),
    )));
    let mut reconciler =
        SceneReconciler::new(HeadlessScene::new(), hit_tester, config.reconciler.clone());

    for frame in frames {
        let outcome = tracker.process_frame(frame).await;
        debug!(?outcome, "Replayed frame");

        while let Ok(event) = events.try_recv() {
            let report = reconciler.apply(&event);
            if !report.is_empty() {
                println!("{}", to_json(&report)?);
            }

            if let Some(assets) = &assets {
                for payload in &report.placed {
                    match assets.resolve(payload).await {
                        Ok(asset) => {
                            reconciler.attach_asset(payload, &asset);
                        }
                        Err(e) => {
                            warn!(payload = %payload, error = %e, "Model unavailable");
                            reconciler.mark_asset_failed(payload, e.to_string());
                        }
                    }
                }
            }
        }

        let frame_id = *clock.borrow();
        let expired = reconciler.expire_stale(frame_id);
        if !expired.is_empty() {
            println!(
                "{}",
                to_json(&serde_json::json!({ "frame_id": frame_id, "removed": expired }))?
            );
        }
    }

    let summaries = reconciler.store().summaries();
    println!(
        "{}",
        serde_json::to_string_pretty(&summaries).map_err(|e| CliError::Replay(e.to_string()))?
    );
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string(value).map_err(|e| CliError::Replay(e.to_string()))
}
