const PSTR: &[u8] = b"BitTorrent protocol";

/// Total size of a handshake frame on the wire.
pub const HANDSHAKE_LENGTH: usize = 68;

/// The first frame of a peer connection:
/// `0x13 || "BitTorrent protocol" || reserved(8) || info_hash(20) || peer_id(20)`.
#[derive(Debug, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeError {
    WrongLength,
    InvalidProtocolTag,
}

impl Handshake {
    /// Creates a new `Handshake` with zeroed reserved bytes.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    /// Converts the handshake to its 68-byte wire form.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HANDSHAKE_LENGTH);
        bytes.push(PSTR.len() as u8);
        bytes.extend(PSTR);
        bytes.extend(&self.reserved);
        bytes.extend(&self.info_hash);
        bytes.extend(&self.peer_id);
        bytes
    }

    /// Parses a 68-byte handshake frame.
    ///
    /// It returns a `HandshakeError` if the length or the fixed protocol
    /// prefix is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() != HANDSHAKE_LENGTH {
            return Err(HandshakeError::WrongLength);
        }
        if bytes[0] as usize != PSTR.len() || &bytes[1..20] != PSTR {
            return Err(HandshakeError::InvalidProtocolTag);
        }

        let mut reserved = [0; 8];
        reserved.copy_from_slice(&bytes[20..28]);
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&bytes[28..48]);
        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(&bytes[48..68]);

        Ok(Self {
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Whether the handshake belongs to the given swarm.
    pub fn matches_info_hash(&self, info_hash: &[u8; 20]) -> bool {
        self.info_hash == *info_hash
    }
}
