//! Turns one abstract [`DeviceAction`] into backend calls.
//!
//! Spatial and text actions try the precise accessibility operation on a
//! resolved node first and fall back to synthetic input when no node is
//! found or the node refuses. Every path resolves to an [`ActionResult`]:
//! backend errors and timeouts become failed results at the top of
//! [`ActionExecutor::execute`] and are never propagated to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use droidclaw_types::protocol::KEYCODE_ENTER;
use droidclaw_types::{ActionResult, DeviceAction, ExecutorConfig};
use tracing::{debug, warn};

use crate::backend::{DeviceBackend, GlobalAction, LaunchIntent};
use crate::gesture::{dispatch_and_wait, Gesture, GestureOutcome};
use crate::node::ScopedNode;
use crate::{DeviceError, DeviceResult};

pub const ERR_GESTURE_CANCELLED: &str = "Gesture cancelled";
pub const ERR_GESTURE_REJECTED: &str = "Gesture dispatch rejected";
pub const ERR_NO_FOCUSED_EDITABLE: &str = "No focused editable node found";
pub const ERR_NO_FOCUSED_TO_CLEAR: &str = "No focused editable node to clear";
pub const ERR_NO_FOCUSED_TO_PASTE: &str = "No focused node to paste into";
pub const ERR_GLOBAL_ACTION: &str = "Global action failed";
pub const ERR_EMPTY_INTENT: &str = "Intent requires an action, uri, or package";

pub struct ActionExecutor {
    backend: Arc<dyn DeviceBackend>,
    config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(backend: Arc<dyn DeviceBackend>, config: ExecutorConfig) -> Self {
        Self { backend, config }
    }

    /// Execute `action`, always resolving to an [`ActionResult`].
    pub async fn execute(&self, action: &DeviceAction) -> ActionResult {
        match self.run(action).await {
            Ok(result) => {
                if let Some(error) = &result.error {
                    warn!(action = action.kind(), error = %error, "action reported failure");
                }
                result
            }
            Err(e) => {
                warn!(action = action.kind(), error = %e, "action failed");
                ActionResult::failure(e.to_string())
            }
        }
    }

    async fn run(&self, action: &DeviceAction) -> DeviceResult<ActionResult> {
        match action {
            DeviceAction::Tap { x, y } => self.tap(*x, *y).await,
            DeviceAction::LongPress { x, y } => self.long_press(*x, *y).await,
            DeviceAction::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => {
                self.gesture(Gesture::swipe(*x1, *y1, *x2, *y2, *duration_ms))
                    .await
            }
            DeviceAction::Type { text } => {
                self.set_focused_text(text, ERR_NO_FOCUSED_EDITABLE).await
            }
            DeviceAction::Clear => self.set_focused_text("", ERR_NO_FOCUSED_TO_CLEAR).await,
            DeviceAction::Enter => self.enter().await,
            DeviceAction::Paste => self.paste().await,
            DeviceAction::ClipboardSet { text } => {
                self.bounded("clipboard_write", self.backend.clipboard_write(text))
                    .await?;
                Ok(ActionResult::ok())
            }
            DeviceAction::ClipboardGet => {
                let text = self
                    .bounded("clipboard_read", self.backend.clipboard_read())
                    .await?;
                Ok(ActionResult::ok_with_data(text.unwrap_or_default()))
            }
            DeviceAction::Back => self.global(GlobalAction::Back).await,
            DeviceAction::Home => self.global(GlobalAction::Home).await,
            DeviceAction::Notifications => self.global(GlobalAction::Notifications).await,
            DeviceAction::Launch { package } | DeviceAction::SwitchApp { package } => {
                self.launch(package).await
            }
            DeviceAction::OpenUrl { url } => {
                self.bounded("open_url", self.backend.open_url(url)).await?;
                Ok(ActionResult::ok())
            }
            DeviceAction::OpenSettings => {
                self.bounded("open_system_settings", self.backend.open_system_settings())
                    .await?;
                Ok(ActionResult::ok())
            }
            DeviceAction::KeyEvent { code } => self.key_event(*code).await,
            DeviceAction::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                Ok(ActionResult::ok())
            }
            DeviceAction::Intent {
                action,
                uri,
                package,
                extras,
            } => {
                let intent = LaunchIntent {
                    action: action.clone(),
                    data: uri.clone(),
                    package: package.clone(),
                    extras: extras.clone(),
                };
                if intent.is_empty() {
                    return Ok(ActionResult::failure(ERR_EMPTY_INTENT));
                }
                self.bounded("start_activity", self.backend.start_activity(&intent))
                    .await?;
                Ok(ActionResult::ok())
            }
        }
    }

    /// Bound a single backend call by the configured timeout.
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> DeviceResult<T>
    where
        F: Future<Output = DeviceResult<T>>,
    {
        let after = self.config.call_timeout();
        tokio::time::timeout(after, call)
            .await
            .map_err(|_| DeviceError::Timeout { operation, after })?
    }

    async fn node_at(&self, x: i32, y: i32) -> DeviceResult<Option<ScopedNode>> {
        let node = self
            .bounded("find_node_at", self.backend.find_node_at(x, y))
            .await?;
        Ok(node.map(ScopedNode::new))
    }

    async fn focused_node(&self) -> DeviceResult<Option<ScopedNode>> {
        let node = self
            .bounded("find_focused_node", self.backend.find_focused_node())
            .await?;
        Ok(node.map(ScopedNode::new))
    }

    /// Node lookup for actions that have a synthetic fallback: a failed
    /// lookup counts as no node.
    fn or_fallback(lookup: DeviceResult<Option<ScopedNode>>) -> Option<ScopedNode> {
        lookup.unwrap_or_else(|e| {
            debug!(error = %e, "node lookup failed, using fallback");
            None
        })
    }

    async fn gesture(&self, gesture: Gesture) -> DeviceResult<ActionResult> {
        let outcome = dispatch_and_wait(self.backend.as_ref(), gesture, self.config.call_timeout())
            .await?;
        Ok(match outcome {
            GestureOutcome::Completed => ActionResult::ok(),
            GestureOutcome::Cancelled => ActionResult::failure(ERR_GESTURE_CANCELLED),
            GestureOutcome::Rejected => ActionResult::failure(ERR_GESTURE_REJECTED),
        })
    }

    async fn tap(&self, x: i32, y: i32) -> DeviceResult<ActionResult> {
        if let Some(node) = Self::or_fallback(self.node_at(x, y).await) {
            if node.click() {
                return Ok(ActionResult::ok());
            }
            debug!(x, y, "node refused click, falling back to gesture");
        }
        self.gesture(Gesture::press(x, y, self.config.tap_duration_ms))
            .await
    }

    async fn long_press(&self, x: i32, y: i32) -> DeviceResult<ActionResult> {
        if let Some(node) = Self::or_fallback(self.node_at(x, y).await) {
            if node.long_click() {
                return Ok(ActionResult::ok());
            }
            debug!(x, y, "node refused long click, falling back to gesture");
        }
        self.gesture(Gesture::press(x, y, self.config.long_press_duration_ms))
            .await
    }

    async fn set_focused_text(&self, text: &str, missing: &str) -> DeviceResult<ActionResult> {
        if let Some(node) = self.focused_node().await? {
            if node.set_text(text) {
                return Ok(ActionResult::ok());
            }
        }
        Ok(ActionResult::failure(missing))
    }

    async fn paste(&self) -> DeviceResult<ActionResult> {
        if let Some(node) = self.focused_node().await? {
            if node.paste() {
                return Ok(ActionResult::ok());
            }
        }
        Ok(ActionResult::failure(ERR_NO_FOCUSED_TO_PASTE))
    }

    async fn enter(&self) -> DeviceResult<ActionResult> {
        if let Some(node) = Self::or_fallback(self.focused_node().await) {
            if node.ime_enter() == Some(true) {
                return Ok(ActionResult::ok());
            }
            debug!("IME enter unavailable, injecting Enter key");
        }
        self.key_event(KEYCODE_ENTER).await
    }

    async fn key_event(&self, code: i32) -> DeviceResult<ActionResult> {
        let injected = match self.bounded("inject_key", self.backend.inject_key(code)).await {
            Ok(injected) => injected,
            Err(e) => return Ok(ActionResult::failure(format!("keyevent failed: {e}"))),
        };
        if injected {
            Ok(ActionResult::ok())
        } else {
            Ok(ActionResult::failure(
                "keyevent failed: no key injection mechanism available",
            ))
        }
    }

    async fn global(&self, action: GlobalAction) -> DeviceResult<ActionResult> {
        let accepted = self
            .bounded(
                "perform_global_action",
                self.backend.perform_global_action(action),
            )
            .await?;
        Ok(if accepted {
            ActionResult::ok()
        } else {
            ActionResult::failure(ERR_GLOBAL_ACTION)
        })
    }

    async fn launch(&self, package: &str) -> DeviceResult<ActionResult> {
        let intent = self
            .bounded(
                "resolve_launch_intent",
                self.backend.resolve_launch_intent(package),
            )
            .await?;
        let Some(intent) = intent else {
            return Ok(ActionResult::failure(format!(
                "Package not found: {package}"
            )));
        };
        self.bounded("start_activity", self.backend.start_activity(&intent))
            .await?;
        Ok(ActionResult::ok())
    }
}
