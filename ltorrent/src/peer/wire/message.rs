use crate::REQUEST_LENGTH;

/// Frames larger than this are rejected as a protocol violation. The largest
/// legitimate frame is a `piece` message carrying one block; the slack covers
/// bitfields of very large torrents.
const MAX_FRAME_LENGTH: u32 = REQUEST_LENGTH * 10;

/// IDs of the messages defined in the protocol.
///
/// `KeepAlive` is the zero-length frame and has no id byte on the wire.
/// Ids this client does not know parse into `Unknown` so their frames can be
/// skipped instead of killing the connection.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum MessageId {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have,
    Bitfield,
    Request,
    Piece,
    Cancel,
    Port,
    Unknown(u8),
}

impl MessageId {
    fn from_byte(byte: u8) -> MessageId {
        match byte {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            9 => MessageId::Port,
            other => MessageId::Unknown(other),
        }
    }

    /// The wire id byte; `None` for the keep-alive, which has none.
    fn byte(&self) -> Option<u8> {
        match self {
            MessageId::KeepAlive => None,
            MessageId::Choke => Some(0),
            MessageId::Unchoke => Some(1),
            MessageId::Interested => Some(2),
            MessageId::NotInterested => Some(3),
            MessageId::Have => Some(4),
            MessageId::Bitfield => Some(5),
            MessageId::Request => Some(6),
            MessageId::Piece => Some(7),
            MessageId::Cancel => Some(8),
            MessageId::Port => Some(9),
            MessageId::Unknown(byte) => Some(*byte),
        }
    }
}

/// A framed peer-wire message: id and payload, without the length prefix.
#[derive(Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MessageError {
    FrameTooLong(u32),
}

impl Message {
    /// Creates a new `Message` from a message ID and a payload.
    pub fn new(id: MessageId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    pub fn keep_alive() -> Self {
        Self::new(MessageId::KeepAlive, vec![])
    }

    /// Converts a `Message` to its framed byte form:
    /// `length(4, big-endian) || id(1) || payload`.
    pub fn as_bytes(&self) -> Vec<u8> {
        let id = match self.id.byte() {
            Some(id) => id,
            None => return vec![0; 4],
        };

        let len = self.payload.len() + 1;
        let mut bytes = vec![0; 4 + len];
        bytes[0..4].copy_from_slice(&(len as u32).to_be_bytes());
        bytes[4] = id;
        bytes[5..].copy_from_slice(&self.payload);
        bytes
    }

    /// Tries to parse one framed message from the front of `buffer` without
    /// consuming it.
    ///
    /// Returns `Ok(Some((message, consumed)))` when a complete frame is
    /// present (the caller drains `consumed` bytes), `Ok(None)` when more
    /// bytes are needed, and `Err` when the frame length is implausible.
    pub fn try_parse(buffer: &[u8]) -> Result<Option<(Message, usize)>, MessageError> {
        if buffer.len() < 4 {
            return Ok(None);
        }

        let mut length = [0; 4];
        length.copy_from_slice(&buffer[0..4]);
        let length = u32::from_be_bytes(length);

        if length > MAX_FRAME_LENGTH {
            return Err(MessageError::FrameTooLong(length));
        }
        if length == 0 {
            return Ok(Some((Message::keep_alive(), 4)));
        }

        let total = 4 + length as usize;
        if buffer.len() < total {
            return Ok(None);
        }

        let id = MessageId::from_byte(buffer[4]);
        let payload = buffer[5..total].to_vec();

        Ok(Some((Message::new(id, payload), total)))
    }
}
