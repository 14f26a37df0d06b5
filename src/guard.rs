//! Connection state guard
//!
//! Whether the gateway is currently reachable. Every access takes the lock
//! with a bounded wait; a reader that times out sees "not connected".

use crate::SwitchError;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, with_timeout};

pub struct ConnectionGuard {
    connected: Mutex<CriticalSectionRawMutex, bool>,
    wait: Duration,
}

impl ConnectionGuard {
    pub const fn new(wait: Duration) -> Self {
        Self {
            connected: Mutex::new(false),
            wait,
        }
    }

    /// Current connection state, `false` when the lock is contended past the wait
    pub async fn read(&self) -> bool {
        match with_timeout(self.wait, self.connected.lock()).await {
            Ok(connected) => *connected,
            Err(_) => {
                log::warn!("[STATE] Connection state lock busy, reporting disconnected");
                false
            }
        }
    }

    pub async fn write(&self, connected: bool) -> Result<(), SwitchError> {
        let mut state = with_timeout(self.wait, self.connected.lock())
            .await
            .map_err(|_| SwitchError::StateLockTimeout)?;
        *state = connected;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn hold(
        &self,
    ) -> embassy_sync::mutex::MutexGuard<'_, CriticalSectionRawMutex, bool> {
        self.connected.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn starts_disconnected() {
        let guard = ConnectionGuard::new(Duration::from_millis(50));
        assert!(!block_on(guard.read()));
    }

    #[test]
    fn write_then_read() {
        let guard = ConnectionGuard::new(Duration::from_millis(50));
        block_on(async {
            guard.write(true).await.unwrap();
            assert!(guard.read().await);
            guard.write(false).await.unwrap();
            assert!(!guard.read().await);
        });
    }

    #[test]
    fn contended_read_reports_disconnected() {
        let guard = ConnectionGuard::new(Duration::from_millis(20));
        block_on(async {
            guard.write(true).await.unwrap();
            let _held = guard.hold().await;
            assert!(!guard.read().await);
        });
    }

    #[test]
    fn contended_write_times_out() {
        let guard = ConnectionGuard::new(Duration::from_millis(20));
        block_on(async {
            let held = guard.hold().await;
            assert_eq!(guard.write(true).await, Err(SwitchError::StateLockTimeout));
            drop(held);
            assert_eq!(guard.write(true).await, Ok(()));
        });
    }
}
