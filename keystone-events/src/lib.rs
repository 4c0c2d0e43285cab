//! The WebSocket event hub (C5) that fans dispatcher-emitted
//! [`event::Event`]s out to subscribed clients.

pub mod event;
pub mod hub;
pub mod ws;

pub mod prelude {
    //! Re-exports of the most commonly used event types.
    pub use crate::event::{Event, EventContext};
    pub use crate::hub::EventHub;
    pub use crate::ws::{ws_handler, WsState};
}
