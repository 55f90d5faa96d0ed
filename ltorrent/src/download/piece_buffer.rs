use crate::REQUEST_LENGTH;

/// One block of a piece. Blocks are `REQUEST_LENGTH` bytes except the last
/// block of the last piece, which may be shorter.
#[derive(Debug)]
struct Block {
    expected_length: u32,
    payload: Vec<u8>,
    filled: bool,
}

#[derive(Debug)]
struct Piece {
    blocks: Vec<Block>,
    written: bool,
}

/// In-memory staging area for the content being downloaded.
///
/// Block payloads are held per piece until the piece validates and is
/// flushed, after which `clear_piece` releases the memory again. Block
/// positions are addressed either as `(piece, block_in_piece)` or as a
/// single overall block index; the two forms map bijectively through
/// `overall_index` / `piece_and_block`.
#[derive(Debug)]
pub struct PieceBuffer {
    pieces: Vec<Piece>,
    blocks_per_full_piece: u32,
    total_blocks: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PieceBufferError {
    BadBlockIndex,
    BadBlockLength,
}

impl PieceBuffer {
    /// Lays out `total_length` bytes as pieces of `piece_length` bytes.
    /// `piece_length` must be a positive multiple of `REQUEST_LENGTH`
    /// (enforced at metainfo load).
    pub fn new(total_length: u64, piece_length: u32) -> PieceBuffer {
        let blocks_per_full_piece = piece_length / REQUEST_LENGTH;
        let piece_count = (total_length + piece_length as u64 - 1) / piece_length as u64;

        let mut pieces = Vec::with_capacity(piece_count as usize);
        let mut total_blocks = 0;

        for piece_index in 0..piece_count {
            let piece_start = piece_index * piece_length as u64;
            let piece_size = (total_length - piece_start).min(piece_length as u64) as u32;

            let full_blocks = piece_size / REQUEST_LENGTH;
            let tail = piece_size % REQUEST_LENGTH;

            let mut blocks = Vec::with_capacity((full_blocks + (tail != 0) as u32) as usize);
            for _ in 0..full_blocks {
                blocks.push(Block::new(REQUEST_LENGTH));
            }
            if tail != 0 {
                blocks.push(Block::new(tail));
            }

            total_blocks += blocks.len() as u32;
            pieces.push(Piece {
                blocks,
                written: false,
            });
        }

        PieceBuffer {
            pieces,
            blocks_per_full_piece,
            total_blocks,
        }
    }

    /// Stores one block payload and marks it filled.
    ///
    /// It returns a `PieceBufferError` if:
    /// - The piece or block index is out of range.
    /// - The payload length differs from the block's expected length.
    pub fn write(
        &mut self,
        piece_index: u32,
        block_index: u32,
        bytes: &[u8],
    ) -> Result<(), PieceBufferError> {
        let block = self
            .pieces
            .get_mut(piece_index as usize)
            .and_then(|piece| piece.blocks.get_mut(block_index as usize))
            .ok_or(PieceBufferError::BadBlockIndex)?;

        if bytes.len() != block.expected_length as usize {
            return Err(PieceBufferError::BadBlockLength);
        }

        block.payload = bytes.to_vec();
        block.filled = true;
        Ok(())
    }

    /// Whether every block of the piece is filled.
    pub fn piece_is_full(&self, piece_index: u32) -> bool {
        match self.pieces.get(piece_index as usize) {
            Some(piece) => piece.blocks.iter().all(|block| block.filled),
            None => false,
        }
    }

    /// Concatenation of the piece's block payloads, for hashing and flushing.
    pub fn piece_bytes(&self, piece_index: u32) -> Vec<u8> {
        match self.pieces.get(piece_index as usize) {
            Some(piece) => {
                let mut bytes = Vec::new();
                for block in &piece.blocks {
                    bytes.extend_from_slice(&block.payload);
                }
                bytes
            }
            None => vec![],
        }
    }

    /// Drops every block payload of the piece and marks them unfilled. Used
    /// after a hash mismatch and after a validated piece was flushed.
    pub fn clear_piece(&mut self, piece_index: u32) {
        if let Some(piece) = self.pieces.get_mut(piece_index as usize) {
            for block in &mut piece.blocks {
                block.payload = vec![];
                block.filled = false;
            }
        }
    }

    /// Marks the piece as hash-validated and flushed to disk.
    pub fn mark_written(&mut self, piece_index: u32) {
        if let Some(piece) = self.pieces.get_mut(piece_index as usize) {
            piece.written = true;
        }
    }

    pub fn is_written(&self, piece_index: u32) -> bool {
        self.pieces
            .get(piece_index as usize)
            .map(|piece| piece.written)
            .unwrap_or(false)
    }

    pub fn piece_count(&self) -> u32 {
        self.pieces.len() as u32
    }

    pub fn block_count(&self, piece_index: u32) -> u32 {
        self.pieces
            .get(piece_index as usize)
            .map(|piece| piece.blocks.len() as u32)
            .unwrap_or(0)
    }

    /// The expected byte length of a block, or `None` for indices that do
    /// not exist (including tail-piece positions past its real block count).
    pub fn block_length(&self, piece_index: u32, block_index: u32) -> Option<u32> {
        self.pieces
            .get(piece_index as usize)
            .and_then(|piece| piece.blocks.get(block_index as usize))
            .map(|block| block.expected_length)
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Maps `(piece, block_in_piece)` to the overall block index.
    pub fn overall_index(&self, piece_index: u32, block_index: u32) -> u32 {
        piece_index * self.blocks_per_full_piece + block_index
    }

    /// Maps an overall block index back to `(piece, block_in_piece)`.
    pub fn piece_and_block(&self, overall: u32) -> (u32, u32) {
        (
            overall / self.blocks_per_full_piece,
            overall % self.blocks_per_full_piece,
        )
    }
}

impl Block {
    fn new(expected_length: u32) -> Block {
        Block {
            expected_length,
            payload: vec![],
            filled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_short_block_layout() {
        // 10 bytes in one 16 KiB piece: one block of 10 bytes.
        let buffer = PieceBuffer::new(10, 16384);

        assert_eq!(buffer.piece_count(), 1);
        assert_eq!(buffer.total_blocks(), 1);
        assert_eq!(buffer.block_length(0, 0), Some(10));
    }

    #[test]
    fn test_short_tail_piece_layout() {
        // 20000 bytes: piece 0 is one full block, piece 1 one 3616-byte block.
        let buffer = PieceBuffer::new(20000, 16384);

        assert_eq!(buffer.piece_count(), 2);
        assert_eq!(buffer.total_blocks(), 2);
        assert_eq!(buffer.block_length(0, 0), Some(16384));
        assert_eq!(buffer.block_length(1, 0), Some(3616));
        assert_eq!(buffer.block_length(1, 1), None);
    }

    #[test]
    fn test_multi_block_piece_layout() {
        let buffer = PieceBuffer::new(3 * 16384 + 5, 2 * 16384);

        assert_eq!(buffer.piece_count(), 2);
        assert_eq!(buffer.block_count(0), 2);
        assert_eq!(buffer.block_count(1), 2);
        assert_eq!(buffer.block_length(1, 0), Some(16384));
        assert_eq!(buffer.block_length(1, 1), Some(5));
        assert_eq!(buffer.total_blocks(), 4);
    }

    #[test]
    fn test_exactly_divisible_length() {
        let buffer = PieceBuffer::new(2 * 16384, 16384);

        assert_eq!(buffer.piece_count(), 2);
        assert_eq!(buffer.block_length(1, 0), Some(16384));
    }

    #[test]
    fn test_write_and_full() {
        let mut buffer = PieceBuffer::new(2 * 16384, 2 * 16384);

        assert!(!buffer.piece_is_full(0));
        buffer.write(0, 0, &[1; 16384]).unwrap();
        assert!(!buffer.piece_is_full(0));
        buffer.write(0, 1, &[2; 16384]).unwrap();
        assert!(buffer.piece_is_full(0));

        let bytes = buffer.piece_bytes(0);
        assert_eq!(bytes.len(), 2 * 16384);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[16384], 2);
    }

    #[test]
    fn test_write_wrong_length() {
        let mut buffer = PieceBuffer::new(10, 16384);
        assert_eq!(
            buffer.write(0, 0, &[0; 16384]),
            Err(PieceBufferError::BadBlockLength)
        );
    }

    #[test]
    fn test_write_out_of_range() {
        let mut buffer = PieceBuffer::new(10, 16384);
        assert_eq!(
            buffer.write(0, 1, &[0; 10]),
            Err(PieceBufferError::BadBlockIndex)
        );
        assert_eq!(
            buffer.write(1, 0, &[0; 10]),
            Err(PieceBufferError::BadBlockIndex)
        );
    }

    #[test]
    fn test_clear_piece_resets_blocks() {
        let mut buffer = PieceBuffer::new(10, 16384);
        buffer.write(0, 0, &[9; 10]).unwrap();
        assert!(buffer.piece_is_full(0));

        buffer.clear_piece(0);

        assert!(!buffer.piece_is_full(0));
        assert!(buffer.piece_bytes(0).is_empty());
    }

    #[test]
    fn test_mark_written() {
        let mut buffer = PieceBuffer::new(10, 16384);
        assert!(!buffer.is_written(0));
        buffer.mark_written(0);
        assert!(buffer.is_written(0));
    }

    #[test]
    fn test_index_mapping_round_trip() {
        let buffer = PieceBuffer::new(5 * 2 * 16384 + 100, 2 * 16384);

        for overall in 0..buffer.total_blocks() {
            let (piece_index, block_index) = buffer.piece_and_block(overall);
            assert!(block_index < buffer.block_count(piece_index));
            assert_eq!(buffer.overall_index(piece_index, block_index), overall);
        }
    }
}
