//! Synthetic gestures and their asynchronous completion.
//!
//! The platform reports gesture completion through a callback some time
//! after dispatch. [`GestureCallback`] is the backend's half of a one-shot
//! channel; [`dispatch_and_wait`] holds the other half and suspends until
//! the backend resolves it. If the waiting future is dropped (the request
//! was abandoned), the callback notices through
//! [`GestureCallback::is_abandoned`] and resolving it becomes a no-op.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::backend::DeviceBackend;
use crate::{DeviceError, DeviceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// One continuous touch path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureStroke {
    pub path: Vec<Point>,
    pub start_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gesture {
    pub strokes: Vec<GestureStroke>,
}

impl Gesture {
    /// A single-point touch held for `duration_ms`. Used both for taps and,
    /// with a longer duration, for long presses.
    pub fn press(x: i32, y: i32, duration_ms: u64) -> Self {
        Self {
            strokes: vec![GestureStroke {
                path: vec![Point { x, y }],
                start_ms: 0,
                duration_ms,
            }],
        }
    }

    /// A straight drag from `(x1, y1)` to `(x2, y2)` over `duration_ms`.
    pub fn swipe(x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> Self {
        Self {
            strokes: vec![GestureStroke {
                path: vec![Point { x: x1, y: y1 }, Point { x: x2, y: y2 }],
                start_ms: 0,
                duration_ms,
            }],
        }
    }

    /// Time from dispatch until the last stroke ends.
    pub fn total_duration(&self) -> Duration {
        let end = self
            .strokes
            .iter()
            .map(|s| s.start_ms.saturating_add(s.duration_ms))
            .max()
            .unwrap_or(0);
        Duration::from_millis(end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureOutcome {
    Completed,
    Cancelled,
    /// The platform refused to start the gesture.
    Rejected,
}

/// Backend-side completion handle for one dispatched gesture.
#[derive(Debug)]
pub struct GestureCallback {
    tx: oneshot::Sender<GestureOutcome>,
}

impl GestureCallback {
    /// A fresh callback and the receiver its outcome is delivered to.
    pub fn channel() -> (Self, oneshot::Receiver<GestureOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn completed(self) {
        let _ = self.tx.send(GestureOutcome::Completed);
    }

    pub fn cancelled(self) {
        let _ = self.tx.send(GestureOutcome::Cancelled);
    }

    /// Whether nobody is waiting for this gesture any more.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Dispatch `gesture` and suspend until the backend reports its outcome.
///
/// The wait is bounded by `bound` on top of the gesture's own duration; a
/// backend that never reports yields [`DeviceError::Timeout`].
pub async fn dispatch_and_wait(
    backend: &dyn DeviceBackend,
    gesture: Gesture,
    bound: Duration,
) -> DeviceResult<GestureOutcome> {
    let limit = bound + gesture.total_duration();
    let (callback, rx) = GestureCallback::channel();

    let dispatch = backend.dispatch_gesture(gesture, callback);
    let accepted = tokio::time::timeout(bound, dispatch)
        .await
        .map_err(|_| DeviceError::Timeout {
            operation: "dispatch_gesture",
            after: bound,
        })??;
    if !accepted {
        return Ok(GestureOutcome::Rejected);
    }

    match tokio::time::timeout(limit, rx).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(_)) => {
            debug!("gesture callback dropped without a result");
            Ok(GestureOutcome::Cancelled)
        }
        Err(_) => Err(DeviceError::Timeout {
            operation: "gesture",
            after: limit,
        }),
    }
}
