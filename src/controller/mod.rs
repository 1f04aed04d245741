//! Smart-home controller integration (§4.E, §4.F, §6).
//!
//! Two halves, grounded on `ha/api.py` and `ha/websocket.py` respectively:
//! a request/response [`api::ControllerApiClient`] for CRUD and queries,
//! and a long-lived [`bridge::ControllerEventBridge`] for the streaming
//! socket that delivers inbound operator messages and other events.

pub mod api;
pub mod bridge;
pub mod types;

pub use api::{ApiError, ControllerApiClient};
pub use bridge::{ControllerEventBridge, EventHandler};
pub use types::{ControllerEvent, EntityState, InboundMessageEvent, Service};
