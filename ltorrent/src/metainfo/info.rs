use bencoding::bvalue::BValue;

use crate::REQUEST_LENGTH;

/// One entry of a multi-file torrent: the path segments relative to the
/// torrent folder and the file length in bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: i64,
}

/// The `info` dictionary of a metainfo file.
///
/// `length` is always the overall content length: for multi-file torrents it
/// is the sum of the declared file lengths.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Info {
    pub name: String,
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub length: i64,
    pub files: Option<Vec<FileEntry>>,
}

#[derive(Debug, PartialEq)]
pub enum FromInfoError {
    NotADict,
    MissingName,
    MissingPieceLength,
    MissingPieces,
    MissingLength,
    InvalidFiles,
    InvalidPieces,
    UnalignedPieceLength,
}

impl Info {
    /// Builds an `Info` from the decoded `info` dictionary.
    ///
    /// It returns a `FromInfoError` if:
    /// - A required key is missing or has the wrong type.
    /// - The pieces string is not a multiple of 20 bytes.
    /// - The piece length is not a positive multiple of the block size.
    pub fn from(bencode: &BValue) -> Result<Info, FromInfoError> {
        let d = bencode.as_dict().ok_or(FromInfoError::NotADict)?;

        let name = d
            .get(b"name".as_slice())
            .and_then(|v| v.as_str())
            .ok_or(FromInfoError::MissingName)?;

        let piece_length = d
            .get(b"piece length".as_slice())
            .and_then(|v| v.as_int())
            .ok_or(FromInfoError::MissingPieceLength)?;

        if piece_length <= 0 || piece_length % REQUEST_LENGTH as i64 != 0 {
            return Err(FromInfoError::UnalignedPieceLength);
        }

        let pieces = d
            .get(b"pieces".as_slice())
            .and_then(|v| v.as_bytes())
            .ok_or(FromInfoError::MissingPieces)?
            .to_vec();

        if pieces.len() % 20 != 0 {
            return Err(FromInfoError::InvalidPieces);
        }

        let files = match d.get(b"files".as_slice()) {
            Some(value) => Some(Self::create_files(value)?),
            None => None,
        };

        let length = match &files {
            Some(entries) => entries.iter().map(|entry| entry.length).sum(),
            None => d
                .get(b"length".as_slice())
                .and_then(|v| v.as_int())
                .ok_or(FromInfoError::MissingLength)?,
        };

        Ok(Info {
            name,
            piece_length,
            pieces,
            length,
            files,
        })
    }

    fn create_files(bencode: &BValue) -> Result<Vec<FileEntry>, FromInfoError> {
        let list = bencode.as_list().ok_or(FromInfoError::InvalidFiles)?;
        if list.is_empty() {
            return Err(FromInfoError::InvalidFiles);
        }

        let mut entries = Vec::with_capacity(list.len());
        for element in list {
            entries.push(Self::create_file_entry(element)?);
        }
        Ok(entries)
    }

    fn create_file_entry(bencode: &BValue) -> Result<FileEntry, FromInfoError> {
        let d = bencode.as_dict().ok_or(FromInfoError::InvalidFiles)?;

        let length = d
            .get(b"length".as_slice())
            .and_then(|v| v.as_int())
            .ok_or(FromInfoError::InvalidFiles)?;
        if length < 0 {
            return Err(FromInfoError::InvalidFiles);
        }

        let path = d
            .get(b"path".as_slice())
            .and_then(|v| v.as_list())
            .ok_or(FromInfoError::InvalidFiles)?;
        if path.is_empty() {
            return Err(FromInfoError::InvalidFiles);
        }

        let segments = path
            .iter()
            .map(|segment| segment.as_str().ok_or(FromInfoError::InvalidFiles))
            .collect::<Result<Vec<String>, FromInfoError>>()?;

        Ok(FileEntry {
            path: segments,
            length,
        })
    }
}
