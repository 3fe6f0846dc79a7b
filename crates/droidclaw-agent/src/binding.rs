//! The currently bound device backend.

use std::sync::{Arc, RwLock};

use droidclaw_device::DeviceBackend;
use tracing::info;

/// Shared slot holding the device backend, if one is running.
///
/// A platform lifecycle hook calls [`bind`](Self::bind) when the device
/// service comes up and [`unbind`](Self::unbind) when it goes away. Readers
/// take a fresh [`current`](Self::current) for every operation.
#[derive(Clone, Default)]
pub struct BackendBinding {
    slot: Arc<RwLock<Option<Arc<dyn DeviceBackend>>>>,
}

impl BackendBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, backend: Arc<dyn DeviceBackend>) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = Some(backend);
        info!("device backend bound");
    }

    pub fn unbind(&self) {
        if self
            .slot
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
        {
            info!("device backend unbound");
        }
    }

    pub fn current(&self) -> Option<Arc<dyn DeviceBackend>> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_bound(&self) -> bool {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

impl std::fmt::Debug for BackendBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendBinding")
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use droidclaw_device::RecordingBackend;

    use super::*;

    #[test]
    fn bind_and_unbind() {
        let binding = BackendBinding::new();
        assert!(binding.current().is_none());

        binding.bind(Arc::new(RecordingBackend::new()));
        assert!(binding.is_bound());

        let clone = binding.clone();
        clone.unbind();
        assert!(binding.current().is_none());
    }
}
