use bencoding::bvalue::{BValue, BValueError};

use crate::peer::peer_info::{FromPeerInfoError, PeerInfo};

/// A decoded tracker announce response.
///
/// To create a new `AnnounceResponse` use the method builder `from()`.
#[derive(Debug)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub complete: i64,
    pub incomplete: i64,
    pub peers: Vec<PeerInfo>,
}

/// Posible `AnnounceResponse` errors.
#[derive(Debug, PartialEq)]
pub enum FromResponseError {
    DecodeResponseError(BValueError),
    NotADict,
    Failure(String),
    InvalidPeers(FromPeerInfoError),
    InvalidPeersField,
}

impl AnnounceResponse {
    /// Builds a new `AnnounceResponse` decoding a bencoded tracker response.
    ///
    /// The `peers` field may be the compact byte string (6 bytes per peer,
    /// 4 of IPv4 address and 2 of big-endian port) or the older list of
    /// dictionaries; both are accepted.
    ///
    /// It returns a `FromResponseError` if:
    /// - The response is not valid bencode or not a dictionary.
    /// - The tracker reported a failure reason.
    /// - The peers field has an unknown shape or invalid entries.
    pub fn from(response: Vec<u8>) -> Result<AnnounceResponse, FromResponseError> {
        let decoded =
            BValue::decode(&response).map_err(FromResponseError::DecodeResponseError)?;
        let d = decoded.as_dict().ok_or(FromResponseError::NotADict)?;

        if let Some(reason) = d.get(b"failure reason".as_slice()) {
            let reason = reason.as_str().unwrap_or_default();
            return Err(FromResponseError::Failure(reason));
        }

        let interval = d
            .get(b"interval".as_slice())
            .and_then(|v| v.as_int())
            .unwrap_or(0);
        let complete = d
            .get(b"complete".as_slice())
            .and_then(|v| v.as_int())
            .unwrap_or(0);
        let incomplete = d
            .get(b"incomplete".as_slice())
            .and_then(|v| v.as_int())
            .unwrap_or(0);

        let peers = match d.get(b"peers".as_slice()) {
            Some(BValue::Bytes(compact)) => Self::create_peers_from_compact(compact),
            Some(BValue::List(list)) => Self::create_peers_from_list(list)?,
            Some(_) => return Err(FromResponseError::InvalidPeersField),
            None => vec![],
        };

        Ok(AnnounceResponse {
            interval,
            complete,
            incomplete,
            peers,
        })
    }

    fn create_peers_from_compact(compact: &[u8]) -> Vec<PeerInfo> {
        compact
            .chunks_exact(6)
            .map(|chunk| {
                let ip = format!("{}.{}.{}.{}", chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                PeerInfo::new(ip, port)
            })
            .collect()
    }

    fn create_peers_from_list(list: &[BValue]) -> Result<Vec<PeerInfo>, FromResponseError> {
        list.iter()
            .map(|entry| PeerInfo::from(entry).map_err(FromResponseError::InvalidPeers))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_from_compact_response() {
        let mut compact = vec![127, 0, 0, 1];
        compact.extend(6881u16.to_be_bytes());
        compact.extend([10, 0, 0, 2]);
        compact.extend(51413u16.to_be_bytes());

        let response = build_response(|dict| {
            dict.insert(b"peers".to_vec(), BValue::Bytes(compact.clone()));
        });

        let decoded = AnnounceResponse::from(response).unwrap();

        assert_eq!(decoded.interval, 1800);
        assert_eq!(decoded.complete, 3);
        assert_eq!(decoded.incomplete, 7);
        assert_eq!(decoded.peers.len(), 2);
        assert_eq!(decoded.peers[0], PeerInfo::new("127.0.0.1".to_string(), 6881));
        assert_eq!(decoded.peers[1], PeerInfo::new("10.0.0.2".to_string(), 51413));
    }

    #[test]
    fn test_from_compact_response_ignores_trailing_bytes() {
        let mut compact = vec![127, 0, 0, 1];
        compact.extend(6881u16.to_be_bytes());
        compact.extend([9, 9]); // truncated record

        let response = build_response(|dict| {
            dict.insert(b"peers".to_vec(), BValue::Bytes(compact.clone()));
        });

        let decoded = AnnounceResponse::from(response).unwrap();
        assert_eq!(decoded.peers.len(), 1);
    }

    #[test]
    fn test_from_dict_list_response() {
        let mut peer = BTreeMap::new();
        peer.insert(b"ip".to_vec(), BValue::Bytes(b"127.0.0.1".to_vec()));
        peer.insert(b"port".to_vec(), BValue::Int(6881));

        let response = build_response(|dict| {
            dict.insert(
                b"peers".to_vec(),
                BValue::List(vec![BValue::Dict(peer.clone())]),
            );
        });

        let decoded = AnnounceResponse::from(response).unwrap();
        assert_eq!(decoded.peers.len(), 1);
        assert_eq!(decoded.peers[0].port, 6881);
    }

    #[test]
    fn test_from_failure_response() {
        let mut dict = BTreeMap::new();
        dict.insert(
            b"failure reason".to_vec(),
            BValue::Bytes(b"unregistered torrent".to_vec()),
        );

        assert_eq!(
            AnnounceResponse::from(BValue::Dict(dict).encode()).unwrap_err(),
            FromResponseError::Failure("unregistered torrent".to_string())
        );
    }

    #[test]
    fn test_from_invalid_bencode() {
        assert!(matches!(
            AnnounceResponse::from(b"not bencode".to_vec()),
            Err(FromResponseError::DecodeResponseError(_))
        ));
    }

    #[test]
    fn test_from_invalid_peers_field() {
        let response = build_response(|dict| {
            dict.insert(b"peers".to_vec(), BValue::Int(1));
        });

        assert_eq!(
            AnnounceResponse::from(response).unwrap_err(),
            FromResponseError::InvalidPeersField
        );
    }

    // Auxiliary functions

    fn build_response(fill: impl FnOnce(&mut BTreeMap<Vec<u8>, BValue>)) -> Vec<u8> {
        let mut dict = BTreeMap::new();
        dict.insert(b"interval".to_vec(), BValue::Int(1800));
        dict.insert(b"complete".to_vec(), BValue::Int(3));
        dict.insert(b"incomplete".to_vec(), BValue::Int(7));
        fill(&mut dict);
        BValue::Dict(dict).encode()
    }
}
