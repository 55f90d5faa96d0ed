pub mod channel;
pub mod handshake;
pub mod peer_info;
pub mod session;
pub mod wire;
