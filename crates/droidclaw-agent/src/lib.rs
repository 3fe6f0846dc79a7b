//! Device-resident remote-control agent.
//!
//! Wires the [`droidclaw_channel::ReliableChannel`] to a [`CommandRouter`]
//! through the single [`dispatch::run`] loop. The device backend is injected
//! through a [`BackendBinding`] that the router re-reads for every request.

pub mod binding;
pub mod dispatch;
pub mod router;

pub use binding::BackendBinding;
pub use router::{CommandRouter, ERR_BACKEND_NOT_RUNNING};
