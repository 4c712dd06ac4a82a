use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::sync::lock;

/// Case-insensitive exact match of a configured phrase.
///
/// Surrounding whitespace and punctuation are ignored, since recognizers
/// like to add a trailing period. Words inside the phrase must match.
#[derive(Debug, Clone)]
pub struct StopPhrase {
    normalized: String,
}

impl StopPhrase {
    pub fn new(phrase: &str) -> Self {
        Self {
            normalized: normalize(phrase),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        !self.normalized.is_empty() && normalize(text) == self.normalized
    }
}

fn normalize(text: &str) -> String {
    text.trim_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Cancellation plus the background threads that must observe it.
#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawns a named thread and keeps its handle for `join`.
    pub fn spawn<F>(&self, name: &str, f: F) -> std::io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = std::thread::Builder::new().name(name.to_string()).spawn(f)?;
        let mut threads = lock(&self.threads);
        threads.retain(|t| !t.is_finished());
        threads.push(handle);
        Ok(())
    }

    /// Waits up to `timeout` for tracked threads. Returns false if some are
    /// still running at the deadline; those are left detached.
    pub fn join(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let pending = {
                let mut threads = lock(&self.threads);
                let (done, running): (Vec<_>, Vec<_>) =
                    threads.drain(..).partition(|t| t.is_finished());
                *threads = running;
                for handle in done {
                    if handle.join().is_err() {
                        warn!("background thread panicked");
                    }
                }
                threads.len()
            };

            if pending == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(pending, "Shutdown deadline passed, detaching threads");
                return false;
            }
            trace!(pending, "Waiting for background threads");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
