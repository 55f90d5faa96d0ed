use urlenc::percent_encode;

/// The query string of an announce request.
///
/// To build the query params string use the method `build()`.
#[derive(Debug)]
pub struct AnnounceQuery {
    info_hash: [u8; 20],
    client_peer_id: String,
    client_port: u16,
    left: u64,
}

impl AnnounceQuery {
    pub fn new(
        info_hash: [u8; 20],
        client_peer_id: String,
        client_port: u16,
        left: u64,
    ) -> AnnounceQuery {
        AnnounceQuery {
            info_hash,
            client_peer_id,
            client_port,
            left,
        }
    }

    /// Builds the query string, percent-encoding the binary info hash.
    /// `compact=1` asks the tracker for the packed 6-byte peer format.
    pub fn build(&self) -> String {
        format!(
            "?info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1&event=started",
            percent_encode(&self.info_hash),
            percent_encode(self.client_peer_id.as_bytes()),
            self.client_port,
            self.left
        )
    }
}
