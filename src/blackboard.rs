use parking_lot::RwLock;
use std::{sync::Arc, time::Instant};

use camsync_pipeline::TickReport;

/// Run statistics of the sync node.
#[derive(Clone, Debug)]
pub struct State {
    pub ticks: u64,
    pub frames_emitted: u64,
    pub frames_skipped: u64,
    pub pending_images: usize,
    pub trajectory_nodes: u64,
    pub last_tick_ts: Instant,
    /// Stamp of the last synced frame seen on the output topic
    pub last_synced_stamp: Option<f64>,
    pub faults: Vec<String>,
}

impl Default for State {
    fn default() -> Self {
        State {
            ticks: 0,
            frames_emitted: 0,
            frames_skipped: 0,
            pending_images: 0,
            trajectory_nodes: 0,
            last_tick_ts: Instant::now(),
            last_synced_stamp: None,
            faults: Vec::new(),
        }
    }
}

pub type Blackboard = Arc<RwLock<State>>;

pub fn snapshot(bb: &Blackboard) -> State {
    (*bb.read()).clone()
}

pub fn record_tick(bb: &Blackboard, report: &TickReport) {
    let mut g = bb.write();
    g.ticks += 1;
    g.frames_emitted += report.emitted as u64;
    g.frames_skipped += report.skipped as u64;
    g.pending_images = report.pending;
    if report.appended {
        g.trajectory_nodes += 1;
    }
    g.last_tick_ts = Instant::now();
}

pub fn record_synced(bb: &Blackboard, stamp: f64) {
    bb.write().last_synced_stamp = Some(stamp);
}

pub fn raise_fault(bb: &Blackboard, msg: &str) {
    let mut g = bb.write();
    if !g.faults.iter().any(|s| s == msg) {
        g.faults.push(msg.to_string());
    }
}
