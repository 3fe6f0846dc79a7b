//! The device capability consumed by the executor and screen collector.
//!
//! A backend wraps the platform's accessibility, input, and capture
//! primitives. It may appear and disappear at runtime, and any individual
//! call may be unavailable; every method therefore resolves to an explicit
//! [`DeviceResult`] rather than assuming success.

use std::collections::BTreeMap;

use async_trait::async_trait;
use droidclaw_types::ScreenElement;
use serde::{Deserialize, Serialize};

use crate::gesture::{Gesture, GestureCallback};
use crate::DeviceResult;

/// System-wide navigation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalAction {
    Back,
    Home,
    Notifications,
}

/// A resolved request to start an activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchIntent {
    pub action: Option<String>,
    pub data: Option<String>,
    pub package: Option<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl LaunchIntent {
    /// An intent targeting `package`'s launcher activity.
    pub fn for_package(package: impl Into<String>) -> Self {
        Self {
            action: Some("android.intent.action.MAIN".into()),
            package: Some(package.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.action.is_none() && self.data.is_none() && self.package.is_none()
    }
}

/// A platform handle to one UI node.
///
/// Handles hold platform resources and must be released exactly once;
/// callers wrap them in [`crate::node::ScopedNode`], which releases on drop.
/// Each operation returns whether the platform accepted it.
pub trait NodeHandle: Send {
    fn click(&self) -> bool;
    fn long_click(&self) -> bool;
    fn set_text(&self, text: &str) -> bool;
    fn paste(&self) -> bool;
    /// Perform the IME "enter" action. `None` when the platform does not
    /// support it for this node.
    fn ime_enter(&self) -> Option<bool>;
    fn release(&mut self);
}

#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// The node under screen coordinate `(x, y)`, if one can be resolved.
    async fn find_node_at(&self, x: i32, y: i32) -> DeviceResult<Option<Box<dyn NodeHandle>>>;

    /// The node currently holding input focus.
    async fn find_focused_node(&self) -> DeviceResult<Option<Box<dyn NodeHandle>>>;

    /// Start a synthetic gesture. Returns `false` if the platform refused it.
    ///
    /// On acceptance the backend resolves `callback` once the gesture
    /// completes or is cancelled. Dropping the callback unresolved counts as
    /// cancellation.
    async fn dispatch_gesture(&self, gesture: Gesture, callback: GestureCallback)
        -> DeviceResult<bool>;

    async fn perform_global_action(&self, action: GlobalAction) -> DeviceResult<bool>;

    /// Resolve the launcher intent for `package`, `None` when not installed.
    async fn resolve_launch_intent(&self, package: &str) -> DeviceResult<Option<LaunchIntent>>;

    async fn start_activity(&self, intent: &LaunchIntent) -> DeviceResult<()>;

    /// Current primary clip as text, `None` when the clipboard is empty.
    async fn clipboard_read(&self) -> DeviceResult<Option<String>>;

    async fn clipboard_write(&self, text: &str) -> DeviceResult<()>;

    /// Inject a raw key code. Returns `false` when no injection mechanism is
    /// available.
    async fn inject_key(&self, code: i32) -> DeviceResult<bool>;

    async fn open_url(&self, uri: &str) -> DeviceResult<()>;

    async fn open_system_settings(&self) -> DeviceResult<()>;

    /// The visible element tree, `None` when the node tree is inaccessible.
    async fn current_element_tree(&self) -> DeviceResult<Option<Vec<ScreenElement>>>;

    /// An encoded frame of the current screen, `None` when capture is unavailable.
    async fn capture_frame(&self) -> DeviceResult<Option<Vec<u8>>>;

    async fn foreground_package(&self) -> DeviceResult<Option<String>>;
}
