//! Networking: wire protocol, framing, the inbound dispatch queue and the
//! server connection

pub mod dispatch;
pub mod framing;
pub mod patch;
pub mod protocol;
pub mod transport;
