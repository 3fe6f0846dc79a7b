//! Device-side building blocks for the droidclaw agent.
//!
//! The [`backend::DeviceBackend`] trait is the seam to whatever platform layer
//! can inspect the UI and synthesize input. On top of it sit the
//! [`executor::ActionExecutor`], which turns one abstract action into backend
//! calls with fallbacks, and the [`screen::ScreenCollector`], which reports
//! what is on screen.

pub mod backend;
pub mod executor;
pub mod gesture;
pub mod node;
pub mod recording;
pub mod screen;

use std::time::Duration;

use thiserror::Error;

pub use backend::{DeviceBackend, GlobalAction, LaunchIntent, NodeHandle};
pub use executor::ActionExecutor;
pub use gesture::{Gesture, GestureCallback, GestureOutcome, GestureStroke, Point};
pub use node::ScopedNode;
pub use recording::{BackendCall, GestureScript, NodeBehavior, RecordingBackend};
pub use screen::{fingerprint, ScreenCollector, ScreenSnapshot};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("{0}")]
    Failed(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;
