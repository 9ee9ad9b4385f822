//! # Conveyor RPC
//!
//! The wire contract between the Conveyor host and a plugin process, and
//! the channel machinery both sides share.
//!
//! The transport is deliberately plain: newline-delimited JSON envelopes
//! over the child's stdin/stdout pipe. Both sides may originate requests —
//! the host drives lifecycle and `execute`, the plugin calls back into the
//! host for its persistent configuration.
//!
//! Before any method is dispatched, every connection must complete the
//! [`handshake`]: a protocol-version integer plus a magic cookie pair.
//! Mismatch fails closed.
//!
//! [`RpcPeer`] is the bidirectional endpoint: it multiplexes outgoing calls
//! over an id-keyed pending map and serves incoming requests through a
//! [`ServiceHandler`], one task per request so a cheap `ping` never waits
//! behind a long `execute`.

pub mod handshake;
pub mod peer;
pub mod proto;

pub use peer::{CallError, RpcPeer, ServiceHandler};
pub use proto::{Envelope, methods};
