use anyhow::Result;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::warn;

/// Cooperative cancellation, polled at batch boundaries
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    requested: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    /// Request cancellation on SIGINT (Ctrl-C) or SIGTERM.
    ///
    /// The in-flight batch still commits or rolls back before the run exits.
    pub fn install_signal_handlers(&self) -> Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let flag = self.clone();

        thread::spawn(move || {
            for sig in signals.forever() {
                let name = if sig == SIGINT { "SIGINT" } else { "SIGTERM" };
                warn!("Received {}, stopping after the current batch", name);
                flag.cancel();
            }
        });

        Ok(())
    }
}
