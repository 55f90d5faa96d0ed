use std::fmt::Write;

use sha1::{Digest, Sha1};

use bencoding::bvalue::BValue;

use super::info::{FromInfoError, Info};

/// A parsed metainfo file: announce URL, `info` dictionary and the SHA-1 of
/// the bencoded `info` dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Torrent {
    pub announce_url: String,
    pub info: Info,
    pub info_hash: [u8; 20],
}

#[derive(Debug, PartialEq)]
pub enum FromTorrentError {
    MissingAnnounce,
    MissingInfo,
    FromInfoError(FromInfoError),
    PieceCountMismatch,
    NotADict,
}

impl Torrent {
    /// Builds a `Torrent` from a decoded metainfo dictionary.
    ///
    /// It returns a `FromTorrentError` if:
    /// - The announce URL or the info dictionary is missing.
    /// - The info dictionary is malformed.
    /// - The number of piece hashes does not cover the content length.
    pub fn from(bencode: BValue) -> Result<Torrent, FromTorrentError> {
        let d = match bencode {
            BValue::Dict(d) => d,
            _ => return Err(FromTorrentError::NotADict),
        };

        let announce_url = d
            .get(b"announce".as_slice())
            .and_then(|v| v.as_str())
            .ok_or(FromTorrentError::MissingAnnounce)?;

        let info_bencode = d
            .get(b"info".as_slice())
            .ok_or(FromTorrentError::MissingInfo)?;

        let info = Info::from(info_bencode).map_err(FromTorrentError::FromInfoError)?;
        let info_hash = Self::create_info_hash(info_bencode);

        let torrent = Torrent {
            announce_url,
            info,
            info_hash,
        };

        if torrent.info.pieces.len() as u64 != torrent.total_pieces() as u64 * 20 {
            return Err(FromTorrentError::PieceCountMismatch);
        }

        Ok(torrent)
    }

    /// Hashes the bencoded `info` dictionary. Re-encoding the decoded value
    /// is canonical because bencode dictionaries are sorted.
    fn create_info_hash(info: &BValue) -> [u8; 20] {
        let digest = Sha1::digest(info.encode());
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&digest);
        info_hash
    }

    /// Returns the name of the torrent.
    pub fn name(&self) -> String {
        self.info.name.clone()
    }

    /// Returns the info hash as a lowercase hex string, for logging.
    pub fn info_hash_hex(&self) -> String {
        let mut hex_string = String::with_capacity(self.info_hash.len() * 2);
        for b in self.info_hash {
            let _ = write!(&mut hex_string, "{:02x}", b);
        }
        hex_string
    }

    /// Returns the size of pieces of the torrent.
    pub fn piece_length(&self) -> u32 {
        self.info.piece_length as u32
    }

    /// Returns the overall content length in bytes.
    pub fn total_length(&self) -> u64 {
        self.info.length as u64
    }

    /// Returns the number of pieces of the torrent.
    pub fn total_pieces(&self) -> u32 {
        let piece_length = self.info.piece_length as u64;
        ((self.total_length() + piece_length - 1) / piece_length) as u32
    }

    /// Returns the real byte size of a piece; only the last one may be short.
    pub fn piece_size(&self, piece_index: u32) -> u32 {
        if piece_index + 1 == self.total_pieces() {
            let remainder = self.total_length() % self.info.piece_length as u64;
            if remainder == 0 {
                self.piece_length()
            } else {
                remainder as u32
            }
        } else {
            self.piece_length()
        }
    }

    /// Returns the expected SHA-1 of a piece, or `None` for an index past the
    /// last piece.
    pub fn piece_hash(&self, piece_index: u32) -> Option<&[u8]> {
        let start = piece_index as usize * 20;
        self.info.pieces.get(start..start + 20)
    }

    /// Returns the directory name the torrent downloads into: the torrent
    /// name without its extension.
    pub fn folder_name(&self) -> String {
        match self.info.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => self.info.name.clone(),
        }
    }
}
