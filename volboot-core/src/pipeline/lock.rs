// volboot-core/src/pipeline/lock.rs
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use volboot_common::config::Config;
use volboot_common::lock::VolumeLock;

const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(15 * 60);
const DEFAULT_WAIT: Duration = Duration::from_secs(5 * 60);

pub(crate) enum LockAttempt {
    Held(VolumeLock),
    /// Another instance held the volume for the whole wait.
    Busy,
    /// The lock file could not be managed at all; work proceeds unlocked.
    Unavailable,
}

/// Takes the volume lock, polling while another live instance holds it.
pub(crate) async fn acquire_volume_lock(config: &Config) -> LockAttempt {
    let path = config.lock_path();
    let stale_after = config.lock.stale_after().unwrap_or_else(|e| {
        warn!("{}; using {:?}", e, DEFAULT_STALE_AFTER);
        DEFAULT_STALE_AFTER
    });
    let wait = config.lock.wait().unwrap_or_else(|e| {
        warn!("{}; using {:?}", e, DEFAULT_WAIT);
        DEFAULT_WAIT
    });
    let deadline = Instant::now() + wait;
    let mut announced = false;

    loop {
        match VolumeLock::try_acquire(&path, stale_after) {
            Ok(Some(lock)) => return LockAttempt::Held(lock),
            Ok(None) => {}
            Err(e) => {
                warn!("Cannot manage volume lock ({}); provisioning without it", e);
                return LockAttempt::Unavailable;
            }
        }
        if Instant::now() >= deadline {
            return LockAttempt::Busy;
        }
        if !announced {
            let holder = VolumeLock::read_holder(&path)
                .map(|h| format!("{} (pid {}, since {})", h.host, h.pid, h.acquired_at))
                .unwrap_or_else(|| "another instance".to_string());
            info!(
                "Volume is being provisioned by {}; waiting up to {}",
                holder,
                humantime::format_duration(wait)
            );
            announced = true;
        }
        debug!("Volume lock busy; retrying");
        sleep(config.lock.poll_interval()).await;
    }
}
