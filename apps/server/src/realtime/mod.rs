//! Real-time fan-out of queue and appointment changes over WebSocket

pub mod events;
pub mod hub;
pub mod relay;
pub mod ws;

pub use events::{ClientMessage, ControlMessage, EventKind, RealtimeEvent, Room};
pub use hub::{RealtimeHub, Subscription};
pub use relay::run_relay;
pub use ws::ws_handler;
