use crate::model::{AudioStreamingState, HmiLevel, LockScreenStatus, SystemContext, TerminationReason};
use crate::playback::PlaybackState;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub type StatusHandle = Arc<Mutex<SessionStatus>>;

/// Snapshot of the live session, served by the status endpoint.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SessionStatus {
    pub connected: bool,
    pub started: bool,
    pub hmi_level: Option<HmiLevel>,
    pub audio_streaming_state: Option<AudioStreamingState>,
    pub system_context: Option<SystemContext>,
    pub playback: PlaybackState,
    pub lock_screen: LockScreenStatus,
    pub file_support: bool,
    pub remote_files: Vec<String>,
    pub pending_requests: usize,
    pub sessions_started: u64,
    pub last_end_reason: Option<TerminationReason>,
    pub updated_ts_unix_ms: Option<u64>,
}

pub fn new_status() -> StatusHandle {
    Arc::new(Mutex::new(SessionStatus::default()))
}

pub fn update_status<F>(status: &StatusHandle, f: F)
where
    F: FnOnce(&mut SessionStatus),
{
    let mut s = status.lock().unwrap();
    f(&mut s);
    s.updated_ts_unix_ms = Some(now_unix_ms());
}

pub fn snapshot(status: &StatusHandle) -> SessionStatus {
    status.lock().unwrap().clone()
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
