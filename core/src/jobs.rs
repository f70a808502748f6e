//! Background periodic jobs.
//!
//! Each job is an owned thread with a stop flag and a join handle,
//! started at engine init and stopped at shutdown. The loop polls the
//! flag while sleeping so shutdown never waits for a full interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_SLICE: Duration = Duration::from_millis(200);

pub struct JobHandle {
    name: &'static str,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl JobHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the job to stop and wait for its thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("background job '{}' panicked", self.name);
            }
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn a named periodic job. The task runs once per interval; the
/// first run happens one interval after start.
pub fn spawn_periodic<F>(name: &'static str, interval: Duration, mut task: F) -> JobHandle
where
    F: FnMut() + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            log::info!("background job '{name}' started (every {interval:?})");
            let mut next = Instant::now() + interval;
            loop {
                while Instant::now() < next {
                    if flag.load(Ordering::Acquire) {
                        log::info!("background job '{name}' stopped");
                        return;
                    }
                    thread::sleep(POLL_SLICE.min(next.saturating_duration_since(Instant::now())));
                }
                if flag.load(Ordering::Acquire) {
                    log::info!("background job '{name}' stopped");
                    return;
                }
                task();
                next = Instant::now() + interval;
            }
        })
        .expect("failed to spawn background job thread");
    JobHandle {
        name,
        stop,
        handle: Some(handle),
    }
}
