//! Screen state collection and content fingerprinting.

use std::future::Future;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use droidclaw_types::ScreenElement;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::backend::DeviceBackend;
use crate::{DeviceError, DeviceResult};

/// What is on screen right now.
///
/// Exactly one of two shapes is produced: a non-empty element list with its
/// fingerprint, or an empty list with (at best) a captured frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenSnapshot {
    pub elements: Vec<ScreenElement>,
    pub fingerprint: Option<String>,
    /// Base64-encoded frame.
    pub screenshot: Option<String>,
    pub package_name: Option<String>,
}

/// Deterministic SHA-256 over the serialized elements, hex-encoded.
///
/// Each element is length-prefixed so that moving content between adjacent
/// elements changes the digest.
pub fn fingerprint(elements: &[ScreenElement]) -> String {
    let mut hasher = Sha256::new();
    for element in elements {
        let bytes = serde_json::to_vec(element.as_value()).unwrap_or_default();
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(&bytes);
    }
    hex::encode(hasher.finalize())
}

pub struct ScreenCollector;

impl ScreenCollector {
    /// Collect a snapshot from `backend`. Never fails: every unavailable
    /// piece is simply absent. With no backend the snapshot is empty.
    pub async fn collect(backend: Option<&dyn DeviceBackend>, bound: Duration) -> ScreenSnapshot {
        let Some(backend) = backend else {
            debug!("no backend bound, returning empty screen");
            return ScreenSnapshot::default();
        };

        let elements = best_effort(
            "element tree",
            bounded("current_element_tree", bound, backend.current_element_tree()),
        )
        .await
        .unwrap_or_default();

        let mut snapshot = ScreenSnapshot::default();
        if elements.is_empty() {
            let frame = best_effort(
                "frame capture",
                bounded("capture_frame", bound, backend.capture_frame()),
            )
            .await;
            snapshot.screenshot = frame.map(|bytes| STANDARD.encode(bytes));
        } else {
            snapshot.fingerprint = Some(fingerprint(&elements));
            snapshot.elements = elements;
        }

        snapshot.package_name = best_effort(
            "foreground package",
            bounded("foreground_package", bound, backend.foreground_package()),
        )
        .await;

        debug!(
            elements = snapshot.elements.len(),
            screenshot = snapshot.screenshot.is_some(),
            package = snapshot.package_name.as_deref().unwrap_or(""),
            "screen collected"
        );
        snapshot
    }
}

async fn bounded<T, F>(operation: &'static str, after: Duration, call: F) -> DeviceResult<T>
where
    F: Future<Output = DeviceResult<T>>,
{
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| DeviceError::Timeout { operation, after })?
}

async fn best_effort<T, F>(what: &'static str, call: F) -> Option<T>
where
    F: Future<Output = DeviceResult<Option<T>>>,
{
    match call.await {
        Ok(value) => value,
        Err(e) => {
            warn!(what, error = %e, "screen collection step failed");
            None
        }
    }
}
