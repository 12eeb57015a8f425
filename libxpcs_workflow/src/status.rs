use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::error::StatusError;

#[derive(Debug, Clone, PartialEq)]
enum State {
    Pending,
    Succeeded,
    Failed(String),
}

#[derive(Debug)]
struct Inner {
    device: String,
    state: Mutex<State>,
    resolved: Condvar,
    started: Instant,
}

/// DeviceStatus is the completion handle of one hardware action.
///
/// It is resolved at most once, either with success or with a failure reason. Every
/// later resolution attempt is ignored and reports `false`. Clones share the same
/// state, so the handle can be given to the callback that resolves it.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    inner: Arc<Inner>,
}

impl DeviceStatus {
    pub fn new(device: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                device: device.to_string(),
                state: Mutex::new(State::Pending),
                resolved: Condvar::new(),
                started: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, outcome: State) -> bool {
        let mut state = self.lock();
        if *state != State::Pending {
            return false;
        }
        *state = outcome;
        self.inner.resolved.notify_all();
        true
    }

    /// Mark the action successful. Returns true if this call resolved the status.
    pub fn set_finished(&self) -> bool {
        let resolved = self.resolve(State::Succeeded);
        if resolved {
            spdlog::debug!(
                "{} finished after {:.3}s",
                self.inner.device,
                self.inner.started.elapsed().as_secs_f64()
            );
        }
        resolved
    }

    /// Mark the action failed. Returns true if this call resolved the status.
    pub fn set_exception(&self, reason: &str) -> bool {
        self.resolve(State::Failed(reason.to_string()))
    }

    pub fn device(&self) -> &str {
        &self.inner.device
    }

    pub fn done(&self) -> bool {
        *self.lock() != State::Pending
    }

    pub fn success(&self) -> bool {
        *self.lock() == State::Succeeded
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Block until the status resolves. With no timeout this waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), StatusError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        while *state == State::Pending {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StatusError::Timeout {
                            device: self.inner.device.clone(),
                            timeout: timeout.unwrap_or_default(),
                        });
                    }
                    state = self
                        .inner
                        .resolved
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                None => {
                    state = self
                        .inner
                        .resolved
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        match &*state {
            State::Failed(reason) => Err(StatusError::Failed {
                device: self.inner.device.clone(),
                reason: reason.clone(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_once() {
        let status = DeviceStatus::new("lambdadet");
        assert!(!status.done());
        assert!(status.set_finished());
        assert!(!status.set_finished());
        assert!(!status.set_exception("late failure"));
        assert!(status.success());
        assert!(status.wait(None).is_ok());
    }

    #[test]
    fn test_failure_is_reported() {
        let status = DeviceStatus::new("lambdadet");
        status.set_exception("detector fault");
        assert!(matches!(status.wait(None), Err(StatusError::Failed { .. })));
    }

    #[test]
    fn test_wait_across_threads() {
        let status = DeviceStatus::new("lambdadet");
        let remote = status.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.set_finished()
        });
        assert!(status.wait(Some(Duration::from_secs(5))).is_ok());
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wait_timeout() {
        let status = DeviceStatus::new("lambdadet");
        assert!(matches!(
            status.wait(Some(Duration::from_millis(20))),
            Err(StatusError::Timeout { .. })
        ));
    }
}
