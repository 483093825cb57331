//! Serial link to the PWM fan controller.

pub mod command;
pub mod discovery;
pub mod events;
pub mod link;
pub mod state;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

pub use command::ControllerCommand;
pub use state::ConnectionState;
pub use transport::{SerialTransport, TransportSettings, TransportStatus};
