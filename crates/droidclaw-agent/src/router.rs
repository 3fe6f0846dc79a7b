//! Inbound message classification and response correlation.
//!
//! The [`CommandRouter`] is the single entry point for every decoded inbound
//! message. Requests (`get_screen`, actions) are answered with exactly one
//! correlated response; `ping` gets a `pong`; goal lifecycle notifications
//! update the observable [`GoalSession`]; unknown types are logged and
//! otherwise ignored.

use droidclaw_channel::OutboundSink;
use droidclaw_device::{ActionExecutor, ScreenCollector};
use droidclaw_types::{
    ActionResult, DeviceAction, ExecutorConfig, GoalSession, GoalStep, InboundMessage,
    OutboundMessage, RequestId, ResultResponse, ScreenResponse,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::binding::BackendBinding;

/// Result error when no device backend is bound.
pub const ERR_BACKEND_NOT_RUNNING: &str = "backend not running";

pub struct CommandRouter<S> {
    sink: S,
    binding: BackendBinding,
    executor: ExecutorConfig,
    goal: watch::Sender<GoalSession>,
}

impl<S: OutboundSink> CommandRouter<S> {
    pub fn new(sink: S, binding: BackendBinding, executor: ExecutorConfig) -> Self {
        let (goal, _) = watch::channel(GoalSession::default());
        Self {
            sink,
            binding,
            executor,
            goal,
        }
    }

    /// Watch goal session changes.
    pub fn subscribe(&self) -> watch::Receiver<GoalSession> {
        self.goal.subscribe()
    }

    /// Current goal session snapshot.
    pub fn session(&self) -> GoalSession {
        self.goal.borrow().clone()
    }

    /// Return the goal session to `Idle`.
    pub fn reset(&self) {
        self.goal.send_modify(GoalSession::reset);
    }

    /// Handle one message that arrived on connection `generation`. Any
    /// response is addressed to that same connection.
    pub async fn handle(&self, generation: u64, message: InboundMessage) {
        match message {
            InboundMessage::GetScreen { request_id } => {
                let response = self.screen(request_id).await;
                self.respond(generation, OutboundMessage::ScreenResponse(response));
            }
            InboundMessage::Ping => self.respond(generation, OutboundMessage::Pong),
            InboundMessage::Action { request_id, action } => {
                let result = self.execute(&action).await;
                debug!(
                    request_id = %request_id,
                    action = action.kind(),
                    success = result.success,
                    "action finished"
                );
                self.respond(
                    generation,
                    OutboundMessage::ResultResponse(ResultResponse::new(request_id, result)),
                );
            }
            InboundMessage::GoalStarted { session_id, goal } => {
                info!(session_id = session_id.as_deref().unwrap_or(""), goal = %goal, "goal started");
                self.goal.send_modify(|s| s.start(goal, session_id));
            }
            InboundMessage::Step {
                index,
                action,
                reasoning,
            } => {
                debug!(index, action = %action, "goal step");
                self.goal
                    .send_modify(|s| s.push_step(GoalStep::new(index, action, reasoning)));
            }
            InboundMessage::GoalCompleted {
                success,
                steps_used,
            } => {
                info!(success, steps_used = ?steps_used, "goal completed");
                self.goal.send_modify(|s| s.complete(success));
            }
            InboundMessage::GoalFailed { message } => {
                info!(message = message.as_deref().unwrap_or(""), "goal failed");
                self.goal.send_modify(GoalSession::fail);
            }
            InboundMessage::Unknown { kind } => {
                info!(kind = %kind, "ignoring unknown message type");
            }
        }
    }

    /// Run `action` against whatever backend is bound right now.
    pub async fn execute(&self, action: &DeviceAction) -> ActionResult {
        let Some(backend) = self.binding.current() else {
            warn!(action = action.kind(), "no device backend bound");
            return ActionResult::failure(ERR_BACKEND_NOT_RUNNING);
        };
        ActionExecutor::new(backend, self.executor.clone())
            .execute(action)
            .await
    }

    async fn screen(&self, request_id: RequestId) -> ScreenResponse {
        let backend = self.binding.current();
        let snapshot =
            ScreenCollector::collect(backend.as_deref(), self.executor.call_timeout()).await;
        ScreenResponse {
            request_id,
            elements: snapshot.elements,
            screen_hash: snapshot.fingerprint,
            screenshot: snapshot.screenshot,
            package_name: snapshot.package_name,
        }
    }

    fn respond(&self, generation: u64, message: OutboundMessage) {
        let request_id = message.request_id().unwrap_or("").to_string();
        if let Err(e) = self.sink.send(generation, message) {
            warn!(generation, request_id = %request_id, error = %e, "response dropped");
        }
    }
}
