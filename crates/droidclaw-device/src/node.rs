//! Scoped ownership of platform node handles.

use std::ops::Deref;

use crate::backend::NodeHandle;

/// Owns a [`NodeHandle`] and releases it when dropped, so every exit path
/// (success, refusal, early return, or error) gives the handle back.
pub struct ScopedNode {
    handle: Box<dyn NodeHandle>,
}

impl ScopedNode {
    pub fn new(handle: Box<dyn NodeHandle>) -> Self {
        Self { handle }
    }
}

impl Deref for ScopedNode {
    type Target = dyn NodeHandle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref()
    }
}

impl Drop for ScopedNode {
    fn drop(&mut self) {
        self.handle.release();
    }
}

impl std::fmt::Debug for ScopedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedNode").finish_non_exhaustive()
    }
}
