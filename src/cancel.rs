use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::{MorphError, Result};

/// Cooperative cancellation flag, checked between frame batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(MorphError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Frames processed in parallel between two cancellation checks.
pub(crate) const FRAME_BATCH: usize = 256;
