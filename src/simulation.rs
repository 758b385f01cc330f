//! Synthetic producers: a mapping system driving in circles and a camera driver.

use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use camsync_geometry::Pose;
use camsync_pipeline::{CameraInfo, GraphNode, Header, ImageFrame, MapRequest, MapUpdate};
use nalgebra::{UnitQuaternion, Vector3};
use rand::Rng;
use spin_sleep::SpinSleeper;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bus::Topic;
use crate::config::SimulationSettings;

/// Seconds since `start`, the shared clock of all producers.
fn now(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

/// Body pose at time `t` on the simulated circle, heading along the tangent.
pub fn circle_pose(settings: &SimulationSettings, t: f64) -> Pose {
    let angle = settings.angular_speed * t;
    let position = Vector3::new(
        settings.radius_m * angle.cos(),
        settings.radius_m * angle.sin(),
        0.0,
    );
    let heading = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle + core::f64::consts::FRAC_PI_2);
    Pose::new(position, heading)
}

/// A single-node map update at time `t`.
pub fn map_update(settings: &SimulationSettings, id: i64, t: f64) -> MapUpdate {
    MapUpdate {
        nodes: vec![GraphNode {
            id,
            stamp: t,
            pose: circle_pose(settings, t),
        }],
        // slow drift of the odometry frame
        map_to_odom: Pose::new(Vector3::new(0.001 * t, 0.0, 0.0), UnitQuaternion::identity()),
    }
}

/// Capture stamp of an image published at `now`, `latency` seconds late at most.
pub fn capture_stamp<R: Rng + ?Sized>(now: f64, latency: f64, rng: &mut R) -> f64 {
    if latency <= 0.0 {
        return now;
    }
    (now - rng.random_range(0.0..latency)).max(0.0)
}

fn period(rate_hz: f64) -> anyhow::Result<Duration> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        anyhow::bail!("simulation rate must be positive, got {}", rate_hz);
    }
    Ok(Duration::from_secs_f64(1.0 / rate_hz))
}

/// Spawns the mapping stand-in: publishes one trajectory node per period.
pub fn spawn_map_producer(
    settings: SimulationSettings,
    topic: Topic<MapUpdate>,
    start: Instant,
) -> anyhow::Result<JoinHandle<()>> {
    let period = period(settings.map_rate_hz)?;
    info!("Spawning map producer thread...");
    let handle = std::thread::Builder::new()
        .name("map-producer".into())
        .spawn(move || {
            info!(topic = topic.name(), "Map producer thread started.");
            let sleeper = SpinSleeper::new(10_000);
            let mut id = 0;
            loop {
                id += 1;
                topic.publish(map_update(&settings, id, now(start)));
                sleeper.sleep(period);
            }
        })?;
    Ok(handle)
}

/// Spawns the camera stand-in: publishes intrinsics once per second and images at the
/// configured rate with random capture latency.
pub fn spawn_camera_producer(
    settings: SimulationSettings,
    images: Topic<ImageFrame>,
    camera_info: Topic<CameraInfo>,
    start: Instant,
) -> anyhow::Result<JoinHandle<()>> {
    let period = period(settings.image_rate_hz)?;
    settings.intrinsics().validate()?;
    info!("Spawning camera producer thread...");
    let handle = std::thread::Builder::new()
        .name("camera-producer".into())
        .spawn(move || {
            info!(topic = images.name(), "Camera producer thread started.");
            let sleeper = SpinSleeper::new(1_000);
            let mut rng = rand::rng();
            let latency = settings.jitter_ms / 1000.0;
            let pixels: Arc<[u8]> = vec![0u8; (settings.width * settings.height) as usize].into();
            let mut last_info: Option<Instant> = None;

            loop {
                let t = now(start);
                if last_info.is_none_or(|sent| sent.elapsed() >= Duration::from_secs(1)) {
                    camera_info.publish(CameraInfo {
                        header: Header::new(t, "camera"),
                        width: settings.width,
                        height: settings.height,
                        intrinsics: settings.intrinsics(),
                    });
                    last_info = Some(Instant::now());
                }

                let stamp = capture_stamp(t, latency, &mut rng);
                images.publish(ImageFrame::new(
                    Header::new(stamp, "camera"),
                    settings.width,
                    settings.height,
                    "mono8",
                    pixels.clone(),
                ));
                sleeper.sleep(period);
            }
        })?;
    Ok(handle)
}

/// Stand-in for the web API: periodically asks for the current map.
pub async fn map_client(requests: mpsc::Sender<MapRequest>, period: Duration) -> anyhow::Result<()> {
    info!("Map client started.");
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let (reply, response) = oneshot::channel();
        requests.send(MapRequest { reply }).await?;
        match response.await {
            Ok(snapshot) => debug!(
                poses = snapshot.poses.len(),
                frame = %snapshot.frame_id,
                has_correction = snapshot.map_to_odom.is_some(),
                "Received current map"
            ),
            Err(_) => warn!("Map service dropped the request"),
        }
    }
}
