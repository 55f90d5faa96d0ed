use bencoding::bvalue::BValue;

/// Address and identity of a remote peer.
///
/// Equality and hashing use only `ip` and `port`: the tracker may or may not
/// report peer ids, and the id is only learned for sure at handshake time.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: Option<Vec<u8>>,
    pub ip: String,
    pub port: u16,
}

impl PartialEq for PeerInfo {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for PeerInfo {}

impl std::hash::Hash for PeerInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

#[derive(Debug, PartialEq)]
pub enum FromPeerInfoError {
    NotADict,
    InvalidIp,
    InvalidPort,
}

impl PeerInfo {
    pub fn new(ip: String, port: u16) -> Self {
        Self {
            peer_id: None,
            ip,
            port,
        }
    }

    /// Builds a `PeerInfo` from one entry of a non-compact tracker peer list.
    ///
    /// It returns a `FromPeerInfoError` if:
    /// - The entry is not a dictionary.
    /// - The ip is missing or not a UTF-8 string.
    /// - The port is missing or out of range.
    pub fn from(bencode: &BValue) -> Result<PeerInfo, FromPeerInfoError> {
        let d = bencode.as_dict().ok_or(FromPeerInfoError::NotADict)?;

        let ip = d
            .get(b"ip".as_slice())
            .and_then(|v| v.as_str())
            .ok_or(FromPeerInfoError::InvalidIp)?;

        let port = d
            .get(b"port".as_slice())
            .and_then(|v| v.as_int())
            .ok_or(FromPeerInfoError::InvalidPort)?;
        let port = u16::try_from(port).map_err(|_| FromPeerInfoError::InvalidPort)?;

        let peer_id = d
            .get(b"peer id".as_slice())
            .and_then(|v| v.as_bytes())
            .map(|bytes| bytes.to_vec());

        Ok(PeerInfo { peer_id, ip, port })
    }

    /// The `ip:port` form used for connecting and logging.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}
