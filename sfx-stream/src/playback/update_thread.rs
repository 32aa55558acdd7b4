//! Dedicated update driver
//!
//! Runs [`SoundSystem::update`] on a fixed period from its own thread. The
//! system is shared behind a mutex; the lock is held only for one update
//! pass, so application calls interleave between passes.

use crate::error::{Error, Result};
use crate::playback::system::SoundSystem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub struct UpdateThread {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateThread {
    pub fn spawn(system: Arc<Mutex<SoundSystem>>, interval: Duration) -> Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop_flag);

        let handle = thread::Builder::new()
            .name("sfx-update".to_string())
            .spawn(move || Self::run(system, interval, flag))?;

        info!("Update thread started ({:?} period)", interval);
        Ok(Self {
            stop_flag,
            handle: Some(handle),
        })
    }

    fn run(system: Arc<Mutex<SoundSystem>>, interval: Duration, stop_flag: Arc<AtomicBool>) {
        while !stop_flag.load(Ordering::Relaxed) {
            let started = Instant::now();
            match system.lock() {
                Ok(mut system) => system.update(),
                Err(_) => {
                    error!("Sound system mutex poisoned, update thread exiting");
                    break;
                }
            }

            let elapsed = started.elapsed();
            if elapsed > interval {
                warn!("Update pass took {:?} (period {:?})", elapsed, interval);
            } else {
                thread::sleep(interval - elapsed);
            }
        }
        debug!("Update thread stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the thread and wait for it to finish its current pass
    pub fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|_| Error::InvalidState("update thread panicked".to_string()))
    }
}

impl Drop for UpdateThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("{}", e);
        }
    }
}
