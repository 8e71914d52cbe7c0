//! PeerAuth - Mutual peer authentication over unreliable datagram transports.
//!
//! Both endpoints prove possession of a pre-shared 32-byte key with a
//! four-message SHA-256 challenge-response handshake. The state machine runs
//! on a per-session worker and is decoupled from the concrete datagram
//! carrier by a transport abstraction with a bounded receive queue.

mod crypto;
mod dtls;
mod handshake;
mod message;
mod ring;
mod session;
mod transport;
mod types;
mod udp;

pub use crypto::*;
pub use dtls::*;
pub use message::*;
pub use session::*;
pub use transport::*;
pub use types::*;
pub use udp::*;
