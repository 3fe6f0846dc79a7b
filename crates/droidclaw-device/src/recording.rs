//! In-memory [`DeviceBackend`] that records every call.
//!
//! Each capability is scripted up front (whether a node is found, how
//! gestures end, which packages are installed, ...). The test suites use it
//! to observe exactly which backend paths an action took. The agent binary
//! binds a [`RecordingBackend::logging_only`] instance in dry-run mode so the
//! whole protocol path can run without a device; that instance only logs
//! and keeps no call history.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use droidclaw_types::ScreenElement;
use tracing::info;

use crate::backend::{DeviceBackend, GlobalAction, LaunchIntent, NodeHandle};
use crate::gesture::{Gesture, GestureCallback};
use crate::{DeviceError, DeviceResult};

/// One observed backend interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    FindNodeAt { x: i32, y: i32 },
    FindFocusedNode,
    NodeClick,
    NodeLongClick,
    NodeSetText(String),
    NodePaste,
    NodeImeEnter,
    NodeRelease,
    DispatchGesture(Gesture),
    GlobalAction(GlobalAction),
    ResolveLaunchIntent(String),
    StartActivity(LaunchIntent),
    ClipboardRead,
    ClipboardWrite(String),
    InjectKey(i32),
    OpenUrl(String),
    OpenSystemSettings,
    ElementTree,
    CaptureFrame,
    ForegroundPackage,
}

/// How a resolved node responds to operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeBehavior {
    pub accepts: bool,
    /// Result of the IME enter action; `None` when unsupported.
    pub ime_enter: Option<bool>,
}

impl NodeBehavior {
    pub fn accepting() -> Self {
        Self {
            accepts: true,
            ime_enter: Some(true),
        }
    }

    pub fn refusing() -> Self {
        Self {
            accepts: false,
            ime_enter: Some(false),
        }
    }
}

/// How dispatched gestures end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GestureScript {
    #[default]
    Complete,
    Cancel,
    /// Refuse to start the gesture.
    Reject,
    /// Drop the callback without resolving it.
    DropCallback,
    /// Keep the callback pending until [`RecordingBackend::resolve_held`].
    Hold,
}

#[derive(Debug)]
struct Script {
    node_at: Option<NodeBehavior>,
    focused: Option<NodeBehavior>,
    gesture: GestureScript,
    global_actions: bool,
    key_injection: bool,
    packages: BTreeSet<String>,
    clipboard: Option<String>,
    elements: Option<Vec<ScreenElement>>,
    frame: Option<Vec<u8>>,
    foreground: Option<String>,
    error: Option<String>,
    node_error: Option<String>,
    stalled: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            node_at: None,
            focused: None,
            gesture: GestureScript::Complete,
            global_actions: true,
            key_injection: true,
            packages: BTreeSet::new(),
            clipboard: None,
            elements: None,
            frame: None,
            foreground: None,
            error: None,
            node_error: None,
            stalled: false,
        }
    }
}

#[derive(Debug)]
struct Inner {
    script: Script,
    /// Whether calls are kept in `calls`.
    recording: bool,
    calls: Vec<BackendCall>,
    held: Vec<GestureCallback>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            script: Script::default(),
            recording: true,
            calls: Vec::new(),
            held: Vec::new(),
        }
    }
}

impl Inner {
    fn record(&mut self, call: BackendCall) {
        if self.recording {
            self.calls.push(call);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingBackend {
    /// A backend with no nodes, no screen content, and every other call
    /// succeeding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`RecordingBackend::new`], but calls are only logged, never
    /// stored, so a long-running process does not accumulate history.
    pub fn logging_only() -> Self {
        let backend = Self::default();
        lock(&backend.inner).recording = false;
        backend
    }

    pub fn with_node_at(self, behavior: NodeBehavior) -> Self {
        lock(&self.inner).script.node_at = Some(behavior);
        self
    }

    pub fn with_focused_node(self, behavior: NodeBehavior) -> Self {
        lock(&self.inner).script.focused = Some(behavior);
        self
    }

    pub fn with_gestures(self, script: GestureScript) -> Self {
        lock(&self.inner).script.gesture = script;
        self
    }

    pub fn with_global_actions(self, accepted: bool) -> Self {
        lock(&self.inner).script.global_actions = accepted;
        self
    }

    pub fn with_key_injection(self, available: bool) -> Self {
        lock(&self.inner).script.key_injection = available;
        self
    }

    pub fn with_package(self, package: impl Into<String>) -> Self {
        lock(&self.inner).script.packages.insert(package.into());
        self
    }

    pub fn with_clipboard(self, text: impl Into<String>) -> Self {
        lock(&self.inner).script.clipboard = Some(text.into());
        self
    }

    pub fn with_elements(self, elements: Vec<ScreenElement>) -> Self {
        lock(&self.inner).script.elements = Some(elements);
        self
    }

    pub fn with_frame(self, frame: Vec<u8>) -> Self {
        lock(&self.inner).script.frame = Some(frame);
        self
    }

    pub fn with_foreground_package(self, package: impl Into<String>) -> Self {
        lock(&self.inner).script.foreground = Some(package.into());
        self
    }

    /// Make every backend call fail with `message`.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        lock(&self.inner).script.error = Some(message.into());
        self
    }

    /// Make node lookups fail with `message` while every other call works.
    pub fn with_node_lookup_error(self, message: impl Into<String>) -> Self {
        lock(&self.inner).script.node_error = Some(message.into());
        self
    }

    /// Make every backend call hang forever.
    pub fn stalled(self) -> Self {
        lock(&self.inner).script.stalled = true;
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn released_nodes(&self) -> usize {
        lock(&self.inner)
            .calls
            .iter()
            .filter(|c| matches!(c, BackendCall::NodeRelease))
            .count()
    }

    pub fn dispatched_gestures(&self) -> Vec<Gesture> {
        lock(&self.inner)
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::DispatchGesture(g) => Some(g.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of held gesture callbacks whose waiter has gone away.
    pub fn abandoned_gestures(&self) -> usize {
        lock(&self.inner)
            .held
            .iter()
            .filter(|cb| cb.is_abandoned())
            .count()
    }

    /// Resolve every held gesture callback. Returns how many were resolved.
    pub fn resolve_held(&self, completed: bool) -> usize {
        let held = std::mem::take(&mut lock(&self.inner).held);
        let count = held.len();
        for callback in held {
            if completed {
                callback.completed();
            } else {
                callback.cancelled();
            }
        }
        count
    }

    /// Record `call` and apply the scripted error/stall behavior.
    async fn enter(&self, call: BackendCall) -> DeviceResult<()> {
        info!(call = ?call, "backend call");
        let (error, stalled) = {
            let mut inner = lock(&self.inner);
            inner.record(call);
            (inner.script.error.clone(), inner.script.stalled)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        match error {
            Some(message) => Err(DeviceError::Failed(message)),
            None => Ok(()),
        }
    }

    /// Resolve a node lookup against the script.
    fn node(
        &self,
        pick: fn(&Script) -> Option<NodeBehavior>,
    ) -> DeviceResult<Option<Box<dyn NodeHandle>>> {
        let (behavior, error) = {
            let inner = lock(&self.inner);
            (pick(&inner.script), inner.script.node_error.clone())
        };
        if let Some(message) = error {
            return Err(DeviceError::Unavailable(message));
        }
        Ok(behavior.map(|behavior| {
            Box::new(RecordingNode {
                inner: Arc::clone(&self.inner),
                behavior,
            }) as Box<dyn NodeHandle>
        }))
    }
}

struct RecordingNode {
    inner: Arc<Mutex<Inner>>,
    behavior: NodeBehavior,
}

impl RecordingNode {
    fn record(&self, call: BackendCall) {
        info!(call = ?call, "node call");
        lock(&self.inner).record(call);
    }
}

impl NodeHandle for RecordingNode {
    fn click(&self) -> bool {
        self.record(BackendCall::NodeClick);
        self.behavior.accepts
    }

    fn long_click(&self) -> bool {
        self.record(BackendCall::NodeLongClick);
        self.behavior.accepts
    }

    fn set_text(&self, text: &str) -> bool {
        self.record(BackendCall::NodeSetText(text.to_string()));
        self.behavior.accepts
    }

    fn paste(&self) -> bool {
        self.record(BackendCall::NodePaste);
        self.behavior.accepts
    }

    fn ime_enter(&self) -> Option<bool> {
        self.record(BackendCall::NodeImeEnter);
        self.behavior.ime_enter
    }

    fn release(&mut self) {
        self.record(BackendCall::NodeRelease);
    }
}

#[async_trait]
impl DeviceBackend for RecordingBackend {
    async fn find_node_at(&self, x: i32, y: i32) -> DeviceResult<Option<Box<dyn NodeHandle>>> {
        self.enter(BackendCall::FindNodeAt { x, y }).await?;
        self.node(|script| script.node_at)
    }

    async fn find_focused_node(&self) -> DeviceResult<Option<Box<dyn NodeHandle>>> {
        self.enter(BackendCall::FindFocusedNode).await?;
        self.node(|script| script.focused)
    }

    async fn dispatch_gesture(
        &self,
        gesture: Gesture,
        callback: GestureCallback,
    ) -> DeviceResult<bool> {
        self.enter(BackendCall::DispatchGesture(gesture)).await?;
        let script = lock(&self.inner).script.gesture;
        match script {
            GestureScript::Complete => callback.completed(),
            GestureScript::Cancel => callback.cancelled(),
            GestureScript::Reject => return Ok(false),
            GestureScript::DropCallback => drop(callback),
            GestureScript::Hold => lock(&self.inner).held.push(callback),
        }
        Ok(true)
    }

    async fn perform_global_action(&self, action: GlobalAction) -> DeviceResult<bool> {
        self.enter(BackendCall::GlobalAction(action)).await?;
        Ok(lock(&self.inner).script.global_actions)
    }

    async fn resolve_launch_intent(&self, package: &str) -> DeviceResult<Option<LaunchIntent>> {
        self.enter(BackendCall::ResolveLaunchIntent(package.to_string()))
            .await?;
        let installed = lock(&self.inner).script.packages.contains(package);
        Ok(installed.then(|| LaunchIntent::for_package(package)))
    }

    async fn start_activity(&self, intent: &LaunchIntent) -> DeviceResult<()> {
        self.enter(BackendCall::StartActivity(intent.clone())).await
    }

    async fn clipboard_read(&self) -> DeviceResult<Option<String>> {
        self.enter(BackendCall::ClipboardRead).await?;
        Ok(lock(&self.inner).script.clipboard.clone())
    }

    async fn clipboard_write(&self, text: &str) -> DeviceResult<()> {
        self.enter(BackendCall::ClipboardWrite(text.to_string()))
            .await?;
        lock(&self.inner).script.clipboard = Some(text.to_string());
        Ok(())
    }

    async fn inject_key(&self, code: i32) -> DeviceResult<bool> {
        self.enter(BackendCall::InjectKey(code)).await?;
        Ok(lock(&self.inner).script.key_injection)
    }

    async fn open_url(&self, uri: &str) -> DeviceResult<()> {
        self.enter(BackendCall::OpenUrl(uri.to_string())).await
    }

    async fn open_system_settings(&self) -> DeviceResult<()> {
        self.enter(BackendCall::OpenSystemSettings).await
    }

    async fn current_element_tree(&self) -> DeviceResult<Option<Vec<ScreenElement>>> {
        self.enter(BackendCall::ElementTree).await?;
        Ok(lock(&self.inner).script.elements.clone())
    }

    async fn capture_frame(&self) -> DeviceResult<Option<Vec<u8>>> {
        self.enter(BackendCall::CaptureFrame).await?;
        Ok(lock(&self.inner).script.frame.clone())
    }

    async fn foreground_package(&self) -> DeviceResult<Option<String>> {
        self.enter(BackendCall::ForegroundPackage).await?;
        Ok(lock(&self.inner).script.foreground.clone())
    }
}
