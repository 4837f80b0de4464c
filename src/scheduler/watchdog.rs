//! Stall watchdog.
//!
//! A background thread samples the frame-completion counter once per
//! interval. If a frame is open, work is pending and the counter has not moved
//! since the previous sample, it logs the scheduler dump at `warn` once per
//! stall, and logs at `info` when frames complete again. It never intervenes.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::scheduler::pool::{panic_reason, Shared};

struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

pub(crate) struct Watchdog {
    stop: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    pub fn start(shared: Arc<Shared>, interval: Duration) -> Self {
        let stop = Arc::new(StopSignal { stopped: Mutex::new(false), wake: Condvar::new() });
        let signal = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("kinetic-watchdog".to_string())
            .spawn(move || watch(&shared, &signal, interval))
            .unwrap_or_else(|err| panic!("failed to spawn scheduler watchdog: {err}"));
        Self { stop, handle }
    }

    pub fn stop(self) {
        *self.stop.stopped.lock() = true;
        self.stop.wake.notify_all();
        if let Err(payload) = self.handle.join() {
            tracing::warn!(reason = panic_reason(payload.as_ref()), "scheduler watchdog exited with a panic");
        }
    }
}

fn watch(shared: &Shared, stop: &StopSignal, interval: Duration) {
    let mut last = shared.frames_completed();
    let mut stalled = false;
    loop {
        {
            let mut stopped = stop.stopped.lock();
            if !*stopped {
                stop.wake.wait_for(&mut stopped, interval);
            }
            if *stopped {
                return;
            }
        }
        let completed = shared.frames_completed();
        if completed != last {
            if stalled {
                tracing::info!(frames = completed, "scheduler progressing again");
            }
            stalled = false;
            last = completed;
        } else if shared.frame_active() && shared.pending() > 0 && !stalled {
            stalled = true;
            tracing::warn!(interval_ms = interval.as_millis() as u64, "no frame completed within the watchdog interval\n{}", shared.dump());
        }
    }
}
