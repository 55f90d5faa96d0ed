use super::message::{Message, MessageId};

/// The payload of a `request` message: one block of one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

impl BlockRequest {
    pub fn new(index: u32, begin: u32, length: u32) -> Self {
        Self {
            index,
            begin,
            length,
        }
    }

    /// Converts the request to its 12-byte payload form.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; 12];
        bytes[0..4].copy_from_slice(&self.index.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.begin.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    /// Parses a 12-byte `request` payload.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 12 {
            return None;
        }

        let mut field = [0; 4];
        field.copy_from_slice(&bytes[0..4]);
        let index = u32::from_be_bytes(field);
        field.copy_from_slice(&bytes[4..8]);
        let begin = u32::from_be_bytes(field);
        field.copy_from_slice(&bytes[8..12]);
        let length = u32::from_be_bytes(field);

        Some(Self::new(index, begin, length))
    }

    pub fn to_message(self) -> Message {
        Message::new(MessageId::Request, self.as_bytes())
    }
}
