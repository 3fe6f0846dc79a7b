//! Core types shared across all droidclaw crates.
//!
//! Defines the control-server wire protocol, the normalized action outcome,
//! the observable goal session model, configuration, and error types used by
//! the device layer, the channel, and the agent.

pub mod config;
pub mod error;
pub mod goal;
pub mod protocol;

pub use config::{
    AgentConfig, BackendConfig, BackendKind, ExecutorConfig, ReconnectConfig, ServerConfig,
};
pub use error::{ConfigError, ProtocolError};
pub use goal::{GoalSession, GoalStatus, GoalStep};
pub use protocol::{
    ActionResult, DeviceAction, InboundMessage, OutboundMessage, RequestId, ResultResponse,
    ScreenElement, ScreenResponse,
};
