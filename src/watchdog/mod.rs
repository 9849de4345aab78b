use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

type FireAction = Box<dyn FnOnce() + Send + 'static>;

/// Single-shot deferred teardown for a session that never sees activity.
///
/// The timer task and `disarm` race on one mutex-guarded generation slot:
/// the timer only fires if its own generation is still armed when it takes
/// the lock, so a disarm that gets the lock first always wins.
#[derive(Default)]
pub struct ConnectionWatchdog {
    armed: Arc<Mutex<Option<u64>>>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl ConnectionWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the watchdog, replacing any earlier arming.
    pub fn arm<F>(&mut self, timeout: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.disarm();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        if let Ok(mut slot) = self.armed.lock() {
            *slot = Some(generation);
        }

        let armed = self.armed.clone();
        let on_fire: FireAction = Box::new(on_fire);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Ok(mut slot) = armed.lock() else {
                return;
            };
            if *slot != Some(generation) {
                return;
            }
            *slot = None;
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "connection watchdog fired");
            on_fire();
        }));
        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "connection watchdog armed");
    }

    /// Cancels a pending teardown. Returns true if this call prevented it.
    pub fn disarm(&mut self) -> bool {
        let cancelled = match self.armed.lock() {
            Ok(mut slot) => slot.take().is_some(),
            Err(_) => false,
        };
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if cancelled {
            tracing::debug!("connection watchdog disarmed");
        }
        cancelled
    }

    pub fn is_armed(&self) -> bool {
        self.armed.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

impl Drop for ConnectionWatchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
