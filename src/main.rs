mod blackboard; // brings `blackboard.rs` in as `crate::blackboard`
mod bus; // brings `bus.rs` in as `crate::bus`
mod config; // brings `config.rs` in as `crate::config`
mod monitor; // brings `monitor.rs` in as `crate::monitor`
mod simulation; // brings `simulation.rs` in as `crate::simulation`

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use blackboard::Blackboard;
use bus::{OutputTopics, Topic};
use camsync_pipeline::{
    CameraInfo, ImageFrame, MapUpdate, SyncNode, TickReport, run_camera_info_handler,
    run_image_handler, run_map_service, run_map_update_handler, run_sync_task,
};
use crate::config::Settings;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

/// Input topics of the sync node.
struct InputTopics {
    map_data: Topic<MapUpdate>,
    image: Topic<ImageFrame>,
    camera_info: Topic<CameraInfo>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("camsync started. Loading configuration...");
    let settings = Settings::load()?;

    tokio::select! {
        result = run(settings) => {
            if let Err(e) = &result {
                error!("Sync pipeline failed: {:?}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down.");
            Ok(())
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let node = Arc::new(SyncNode::new(settings.sync_config()?)?);
    let capacity = settings.sync.topic_capacity;
    let topics = &settings.topics;

    let inputs = InputTopics {
        map_data: Topic::new(&topics.map_data, capacity),
        image: Topic::new(&topics.image, capacity),
        camera_info: Topic::new(&topics.camera_info, capacity),
    };
    let outputs = OutputTopics {
        image: Topic::new(&topics.image_out, capacity),
        camera_info: Topic::new(&topics.camera_info_out, capacity),
        tf: Topic::new(&topics.tf, capacity),
        synced: Topic::new(&topics.synced, capacity),
    };
    let (map_request_tx, map_request_rx) = mpsc::channel(8);
    let (report_tx, report_rx) = broadcast::channel::<Arc<TickReport>>(capacity);
    let bb: Blackboard = Arc::default();

    // Subscribe before the producers start so no early message is lost
    let map_rx = inputs.map_data.subscribe();
    let image_rx = inputs.image.subscribe();
    let camera_info_rx = inputs.camera_info.subscribe();
    let synced_rx = outputs.synced.subscribe();

    if settings.simulation.enabled {
        let start = Instant::now();
        simulation::spawn_map_producer(settings.simulation.clone(), inputs.map_data.clone(), start)?;
        simulation::spawn_camera_producer(
            settings.simulation.clone(),
            inputs.image.clone(),
            inputs.camera_info.clone(),
            start,
        )?;
    } else {
        info!(
            map_data = inputs.map_data.name(),
            image = inputs.image.name(),
            camera_info = inputs.camera_info.name(),
            "Simulation disabled, waiting for external producers"
        );
    }
    let map_period = Duration::from_millis(settings.simulation.map_request_period_ms);

    info!(get_map = %topics.get_map, "Starting sync tasks...");
    tokio::try_join!(
        run_sync_task(
            node.clone(),
            Arc::new(outputs),
            settings.sync.tick_period(),
            report_tx,
        ),
        run_map_update_handler(node.clone(), map_rx),
        run_image_handler(node.clone(), image_rx),
        run_camera_info_handler(node.clone(), camera_info_rx),
        run_map_service(node.clone(), map_request_rx),
        simulation::map_client(map_request_tx, map_period),
        monitor::record_reports(bb.clone(), report_rx),
        monitor::consume_synced(bb.clone(), synced_rx),
        monitor::watchdog(
            bb,
            Duration::from_millis(settings.sync.monitor_period_ms),
            Duration::from_millis(settings.sync.stall_timeout_ms),
        ),
    )?;
    info!("Sync tasks finished.");
    Ok(())
}
