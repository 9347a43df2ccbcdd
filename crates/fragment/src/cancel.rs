//! Cooperative cancellation of an in-flight planning run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Checked by the parallelizer between planning phases.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

/// Held by whoever submitted the query.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    flag: Arc<AtomicBool>,
}

pub fn cancellation_pair() -> (CancellationToken, CancellationHandle) {
    let flag = Arc::new(AtomicBool::new(false));
    (
        CancellationToken {
            flag: Arc::clone(&flag),
        },
        CancellationHandle { flag },
    )
}

impl CancellationToken {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl CancellationHandle {
    /// Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
