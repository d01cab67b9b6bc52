//! Scoped release of backend-native handles.
//!
//! Backend libraries hand out handles the process must give back: TPM
//! transient objects and sessions stay resident in TPM memory until flushed,
//! even after the command context is finalized. The guard tracks a small,
//! bounded set of release actions and runs them in reverse acquisition order
//! on every exit path, including unwinds. Releasing twice is a no-op.

use crate::error::{HsmError, Result};

/// Upper bound on tracked handles per scope.
pub(crate) const GUARD_CAPACITY: usize = 16;

type Release = Box<dyn FnOnce() + Send>;

pub(crate) struct ResourceGuard {
    releases: Vec<Release>,
}

impl ResourceGuard {
    pub fn new() -> Self {
        Self { releases: Vec::new() }
    }

    /// Register a release action for a handle just acquired.
    pub fn track<F>(&mut self, release: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.releases.len() >= GUARD_CAPACITY {
            return Err(HsmError::Memory(format!(
                "resource guard already tracks {GUARD_CAPACITY} handles"
            )));
        }
        self.releases.push(Box::new(release));
        Ok(())
    }

    /// Run every release action, most recently acquired first.
    pub fn release_all(&mut self) {
        while let Some(release) = self.releases.pop() {
            release();
        }
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.releases.len()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.release_all();
    }
}
