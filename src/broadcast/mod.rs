//! Cross-context broadcast channels.
//!
//! - [`BroadcastRelay`]: per-context endpoint; stamps outgoing messages with its
//!   instance id and never hands a subscriber its own messages
//! - [`BroadcastTransport`]: moves serialized frames by channel name
//! - [`LocalHub`]: in-process transport (one bounded ring per channel)

mod envelope;
mod relay;
mod transport;

pub use relay::{BroadcastRelay, Subscription};
pub use transport::{BroadcastTransport, Frame, LocalHub};
