pub mod bitfield;
pub mod message;
pub mod request;

pub use bitfield::Bitfield;
pub use message::{Message, MessageError, MessageId};
pub use request::BlockRequest;
