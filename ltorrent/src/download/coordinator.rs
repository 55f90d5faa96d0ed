use std::{
    collections::HashMap,
    fs::File,
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{sync_channel, Receiver, SyncSender},
        Arc, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::{
    config::cfg::Cfg,
    metainfo::torrent::Torrent,
    peer::{
        channel::PeerChannel,
        peer_info::PeerInfo,
        wire::{Bitfield, BlockRequest},
    },
    storage::manager,
    REQUEST_LENGTH,
};

use super::piece_buffer::{PieceBuffer, PieceBufferError};

/// A block request that was sent and not yet answered.
#[derive(Debug, Clone)]
struct PendingRequest {
    peer: PeerInfo,
    since: Instant,
}

/// Block and piece bookkeeping of one torrent. Only mutated while the state
/// lock is held, so every public operation is atomic.
///
/// Between operations: an overall block index is in `pending_timeout` exactly
/// when its `requested` bit is set and its `have` bit is not.
#[derive(Debug)]
struct DownloadState {
    piece_buffer: PieceBuffer,
    requested: Bitfield,
    have: Bitfield,
    pending_timeout: HashMap<u32, PendingRequest>,
    have_count: u32,
    temp_file: File,
}

/// Shared per-torrent download coordinator.
///
/// It owns the piece buffer, the two per-block bitmaps, the pending-request
/// table and the temp file, and tracks the connected peer channels so the
/// periodic sweeps can write to them. Peer sessions call in with received
/// blocks and ask it which block to request next.
///
/// `new()` also returns a `Receiver` that reports each peer disconnect with
/// the remaining peer count, so a caller that reached its connection limit
/// can block until a slot frees up.
#[derive(Debug)]
pub struct DownloadCoordinator {
    torrent: Torrent,
    config: Cfg,
    state: Mutex<DownloadState>,
    peers: Mutex<HashMap<PeerInfo, Arc<PeerChannel>>>,
    current_peers: AtomicUsize,
    all_current_peers: AtomicUsize,
    finished_pieces: AtomicUsize,
    total_seeders_count: AtomicUsize,
    total_leechers_count: AtomicUsize,
    done: AtomicBool,
    aborted: AtomicBool,
    disconnect_sender: SyncSender<usize>,
}

/// Posible coordinator errors.
#[derive(Debug)]
pub enum CoordinatorError {
    PoisonedStateLock,
    PoisonedPeersLock,
    BadBlock(PieceBufferError),
    UnknownPiece,
    TempFileError(io::Error),
    NoPeersConnected,
}

impl DownloadCoordinator {
    /// Creates the coordinator for a torrent and opens its temp file.
    ///
    /// # Errors
    /// - `TempFileError` if the torrent folder or temp file can not be
    ///   created.
    pub fn new(torrent: &Torrent, config: Cfg) -> Result<(Self, Receiver<usize>), CoordinatorError> {
        let temp_file = manager::open_temp_file(&config.download_directory, &torrent.folder_name())
            .map_err(CoordinatorError::TempFileError)?;

        let piece_buffer = PieceBuffer::new(torrent.total_length(), torrent.piece_length());
        let total_blocks = piece_buffer.total_blocks();

        let (disconnect_sender, disconnect_receiver) =
            sync_channel((config.max_peers_per_torrent * 100) as usize);

        let state = DownloadState {
            requested: Bitfield::with_bit_count(total_blocks as usize),
            have: Bitfield::with_bit_count(total_blocks as usize),
            pending_timeout: HashMap::new(),
            have_count: 0,
            piece_buffer,
            temp_file,
        };

        Ok((
            Self {
                torrent: torrent.clone(),
                config,
                state: Mutex::new(state),
                peers: Mutex::new(HashMap::new()),
                current_peers: AtomicUsize::new(0),
                all_current_peers: AtomicUsize::new(0),
                finished_pieces: AtomicUsize::new(0),
                total_seeders_count: AtomicUsize::new(0),
                total_leechers_count: AtomicUsize::new(0),
                done: AtomicBool::new(false),
                aborted: AtomicBool::new(false),
                disconnect_sender,
            },
            disconnect_receiver,
        ))
    }

    /// True once every block of the torrent is stored and validated.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    /// True after an unrecoverable error (temp file I/O).
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Returns the number of pieces that are already downloaded.
    pub fn downloaded_pieces(&self) -> usize {
        self.finished_pieces.load(Ordering::Relaxed)
    }

    /// Stores a `piece` message payload delivered by a peer session.
    ///
    /// Duplicate blocks are dropped. When the block completes its piece, the
    /// piece is hashed: a matching hash flushes it to the temp file, a
    /// mismatch clears the piece and its bookkeeping bits so the blocks get
    /// re-requested.
    ///
    /// # Errors
    /// - `BadBlock` if the offset is not block-aligned, the indices are out
    ///   of range, or the payload length is wrong.
    /// - `TempFileError` if flushing a validated piece fails; the torrent is
    ///   aborted.
    pub fn on_block_received(
        &self,
        piece_index: u32,
        begin: u32,
        block: &[u8],
    ) -> Result<(), CoordinatorError> {
        if begin % REQUEST_LENGTH != 0 {
            return Err(CoordinatorError::BadBlock(PieceBufferError::BadBlockIndex));
        }
        let block_index = begin / REQUEST_LENGTH;

        let mut state = self.lock_state()?;

        if block_index >= state.piece_buffer.block_count(piece_index) {
            return Err(CoordinatorError::BadBlock(PieceBufferError::BadBlockIndex));
        }
        let overall = state.piece_buffer.overall_index(piece_index, block_index);

        if state.have.has(overall) {
            debug!("Duplicate block {} of piece {} dropped", block_index, piece_index);
            return Ok(());
        }

        state
            .piece_buffer
            .write(piece_index, block_index, block)
            .map_err(CoordinatorError::BadBlock)?;
        state.have.set(overall, true);
        state.have_count += 1;
        state.pending_timeout.remove(&overall);

        if state.piece_buffer.piece_is_full(piece_index) && !state.piece_buffer.is_written(piece_index)
        {
            self.validate_piece(&mut state, piece_index)?;
        }
        Ok(())
    }

    /// Hashes a freshly completed piece, flushing or clearing it.
    fn validate_piece(
        &self,
        state: &mut MutexGuard<DownloadState>,
        piece_index: u32,
    ) -> Result<(), CoordinatorError> {
        let bytes = state.piece_buffer.piece_bytes(piece_index);
        let digest = Sha1::digest(&bytes);
        let expected = self
            .torrent
            .piece_hash(piece_index)
            .ok_or(CoordinatorError::UnknownPiece)?;

        if digest.as_slice() != expected {
            warn!("Piece {} hash mismatch, clearing its blocks", piece_index);
            self.clear_piece(state, piece_index);
            return Ok(());
        }

        let offset = piece_index as u64 * self.torrent.piece_length() as u64;
        if let Err(err) = manager::write_at_offset(&mut state.temp_file, &bytes, offset) {
            // Roll the piece back so its blocks are not counted as present;
            // a piece that never reached the disk must not count towards
            // completion.
            self.aborted.store(true, Ordering::Relaxed);
            self.clear_piece(state, piece_index);
            return Err(CoordinatorError::TempFileError(err));
        }
        state.piece_buffer.mark_written(piece_index);
        state.piece_buffer.clear_piece(piece_index);

        let finished = self.finished_pieces.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "Torrent {}: piece {} downloaded ({} / {})",
            self.torrent.name(),
            piece_index,
            finished,
            self.torrent.total_pieces()
        );

        self.check_completion(state);
        Ok(())
    }

    /// Resets a piece and its bookkeeping after a hash mismatch.
    fn clear_piece(&self, state: &mut MutexGuard<DownloadState>, piece_index: u32) {
        for block_index in 0..state.piece_buffer.block_count(piece_index) {
            let overall = state.piece_buffer.overall_index(piece_index, block_index);
            if state.have.has(overall) {
                state.have.set(overall, false);
                state.have_count -= 1;
            }
            state.requested.set(overall, false);
            state.pending_timeout.remove(&overall);
        }
        state.piece_buffer.clear_piece(piece_index);
    }

    /// Flips the torrent to done once every block is present. An aborted
    /// torrent never reads as done, its temp file is not trustworthy.
    fn check_completion(&self, state: &mut MutexGuard<DownloadState>) {
        if state.have_count == state.piece_buffer.total_blocks() && !self.is_aborted() {
            let _ = state.temp_file.flush();
            self.done.store(true, Ordering::Relaxed);
            info!("Torrent {} completely downloaded", self.torrent.name());
        }
    }

    /// Picks the next block to request from `peer`, marks it requested and
    /// starts its timeout.
    ///
    /// The policy is lowest-index-first over blocks that are neither
    /// requested nor present, gated by the peer's advertised pieces when it
    /// sent any. Returns `None` when the torrent is done, the peer already
    /// has a full request pipeline, or nothing is requestable.
    pub fn next_request_for(
        &self,
        peer: &PeerInfo,
        advertised: &Bitfield,
    ) -> Result<Option<BlockRequest>, CoordinatorError> {
        if self.is_done() {
            return Ok(None);
        }

        let mut state = self.lock_state()?;

        let outstanding = state
            .pending_timeout
            .values()
            .filter(|pending| pending.peer == *peer)
            .count();
        if outstanding >= self.config.pipelining_size as usize {
            return Ok(None);
        }

        for overall in 0..state.piece_buffer.total_blocks() {
            if state.requested.has(overall) || state.have.has(overall) {
                continue;
            }
            let (piece_index, _) = state.piece_buffer.piece_and_block(overall);
            if !advertised.is_empty() && !advertised.has(piece_index) {
                continue;
            }
            if let Some(request) = Self::claim_block(&mut state, overall, peer) {
                return Ok(Some(request));
            }
        }
        Ok(None)
    }

    /// Marks a free block as requested by `peer` and builds its request.
    fn claim_block(
        state: &mut MutexGuard<DownloadState>,
        overall: u32,
        peer: &PeerInfo,
    ) -> Option<BlockRequest> {
        if state.requested.has(overall) || state.have.has(overall) {
            return None;
        }
        let (piece_index, block_index) = state.piece_buffer.piece_and_block(overall);
        let length = state.piece_buffer.block_length(piece_index, block_index)?;

        state.requested.set(overall, true);
        state.pending_timeout.insert(
            overall,
            PendingRequest {
                peer: peer.clone(),
                since: Instant::now(),
            },
        );
        Some(BlockRequest::new(
            piece_index,
            block_index * REQUEST_LENGTH,
            length,
        ))
    }

    /// Expires requests older than the configured timeout and redispatches
    /// each expired block to a currently ready peer. Blocks that find no
    /// ready peer stay unrequested and are picked up by the regular
    /// request flow.
    pub fn sweep_expired_requests(&self) -> Result<(), CoordinatorError> {
        let timeout = Duration::from_secs(self.config.pending_timeout_seconds);

        let expired: Vec<u32> = {
            let mut state = self.lock_state()?;
            let expired: Vec<u32> = state
                .pending_timeout
                .iter()
                .filter(|(_, pending)| pending.since.elapsed() > timeout)
                .map(|(overall, _)| *overall)
                .collect();
            for overall in &expired {
                state.requested.set(*overall, false);
                state.pending_timeout.remove(overall);
            }
            expired
        };
        if expired.is_empty() {
            return Ok(());
        }
        debug!("{} block requests expired", expired.len());

        let ready: Vec<(PeerInfo, Arc<PeerChannel>)> = self
            .lock_peers()?
            .iter()
            .filter(|(_, channel)| channel.is_ready())
            .map(|(peer, channel)| (peer.clone(), channel.clone()))
            .collect();
        if ready.is_empty() {
            return Ok(());
        }

        let mut targets = ready.iter().cycle();
        for overall in expired {
            let (peer, channel) = match targets.next() {
                Some(target) => target,
                None => break,
            };

            let request = {
                let mut state = self.lock_state()?;
                match Self::claim_block(&mut state, overall, peer) {
                    Some(request) => request,
                    None => continue, // claimed or arrived meanwhile
                }
            };

            if let Err(err) = channel.send(&request.to_message()) {
                warn!(
                    "Could not redispatch block {} to {}: {:?}",
                    overall,
                    peer.addr(),
                    err
                );
                let mut state = self.lock_state()?;
                state.requested.set(overall, false);
                state.pending_timeout.remove(&overall);
            }
        }
        Ok(())
    }

    /// Sends a keep-alive to every peer whose connection was idle on the
    /// send side for longer than the configured timeout.
    pub fn sweep_keep_alives(&self) -> Result<(), CoordinatorError> {
        let idle = Duration::from_secs(self.config.keep_alive_timeout_seconds);

        let channels: Vec<(PeerInfo, Arc<PeerChannel>)> = self
            .lock_peers()?
            .iter()
            .map(|(peer, channel)| (peer.clone(), channel.clone()))
            .collect();

        for (peer, channel) in channels {
            match channel.send_keep_alive_if_idle(idle) {
                Ok(true) => debug!("Keep alive sent to {}", peer.addr()),
                Ok(false) => (),
                Err(err) => warn!("Could not keep-alive {}: {:?}", peer.addr(), err),
            }
        }
        Ok(())
    }

    /// Adds a peer that started connecting to the connection count.
    pub fn peer_connecting(&self) {
        self.all_current_peers.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes a peer whose connection attempt failed.
    pub fn peer_connecting_failed(&self) {
        self.all_current_peers.fetch_sub(1, Ordering::Relaxed);
        self.notify_peer_disconnected();
    }

    /// Registers the write channel of a connected peer.
    ///
    /// # Errors
    /// - `PoisonedPeersLock` if the lock on the peers table is poisoned.
    pub fn peer_connected(
        &self,
        peer: &PeerInfo,
        channel: Arc<PeerChannel>,
    ) -> Result<(), CoordinatorError> {
        self.current_peers.fetch_add(1, Ordering::Relaxed);
        let mut peers = self.lock_peers()?;
        peers.insert(peer.clone(), channel);
        Ok(())
    }

    /// Unregisters a disconnected peer. Its outstanding requests are left to
    /// expire and redispatch.
    ///
    /// # Errors
    /// - `PoisonedPeersLock` if the lock on the peers table is poisoned.
    /// - `NoPeersConnected` if there are no peers connected.
    pub fn peer_disconnected(&self, peer: &PeerInfo) -> Result<(), CoordinatorError> {
        let mut peers = self.lock_peers()?;
        if self.current_peers.load(Ordering::Relaxed) == 0 {
            return Err(CoordinatorError::NoPeersConnected);
        }
        self.current_peers.fetch_sub(1, Ordering::Relaxed);
        self.all_current_peers.fetch_sub(1, Ordering::Relaxed);

        peers.remove(peer);
        drop(peers);

        self.notify_peer_disconnected();
        Ok(())
    }

    fn notify_peer_disconnected(&self) {
        // If the value couldn't be sent, the receiver side is gone; nothing
        // to wake up.
        let _ = self
            .disconnect_sender
            .send(self.all_current_peers.load(Ordering::Relaxed));
    }

    /// Returns the number of connected peers.
    pub fn current_peers(&self) -> usize {
        self.current_peers.load(Ordering::Relaxed)
    }

    /// Returns the number of peers connected and connecting.
    pub fn all_current_peers(&self) -> usize {
        self.all_current_peers.load(Ordering::Relaxed)
    }

    /// Whether the peer already has a registered channel.
    pub fn is_connected(&self, peer: &PeerInfo) -> Result<bool, CoordinatorError> {
        Ok(self.lock_peers()?.contains_key(peer))
    }

    /// Updates the swarm totals reported by the tracker.
    pub fn update_total_peers(&self, seeders_count: usize, leechers_count: usize) {
        self.total_seeders_count
            .store(seeders_count, Ordering::Relaxed);
        self.total_leechers_count
            .store(leechers_count, Ordering::Relaxed);
    }

    /// Returns a tuple containing the number of seeders and leechers.
    pub fn get_total_peers(&self) -> (usize, usize) {
        let seeders = self.total_seeders_count.load(Ordering::Relaxed);
        let leechers = self.total_leechers_count.load(Ordering::Relaxed);
        (seeders, leechers)
    }

    /// Sum of the per-peer average download speeds, in kilobits per second.
    pub fn download_speed(&self) -> Result<f64, CoordinatorError> {
        let peers = self.lock_peers()?;
        Ok(peers
            .values()
            .map(|channel| channel.download_speed().unwrap_or(0.0))
            .sum())
    }

    fn lock_state(&self) -> Result<MutexGuard<DownloadState>, CoordinatorError> {
        self.state
            .lock()
            .map_err(|_| CoordinatorError::PoisonedStateLock)
    }

    fn lock_peers(
        &self,
    ) -> Result<MutexGuard<HashMap<PeerInfo, Arc<PeerChannel>>>, CoordinatorError> {
        self.peers
            .lock()
            .map_err(|_| CoordinatorError::PoisonedPeersLock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bencoding::bvalue::BValue;
    use std::collections::BTreeMap;
    use std::env;
    use std::fs;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn test_single_block_torrent_completes() {
        let data = b"0123456789".to_vec();
        let (coordinator, _recv, dir) =
            build_coordinator("single_block", &data, 16384, default_config());
        let peer = test_peer(1);

        let request = coordinator
            .next_request_for(&peer, &Bitfield::new(vec![]))
            .unwrap()
            .unwrap();
        assert_eq!(request, BlockRequest::new(0, 0, 10));

        coordinator.on_block_received(0, 0, &data).unwrap();

        assert!(coordinator.is_done());
        assert_eq!(coordinator.downloaded_pieces(), 1);
        let state = coordinator.state.lock().unwrap();
        assert!(state.pending_timeout.is_empty());
        drop(state);

        let temp = manager::temp_file_path(dir.to_str().unwrap(), "torrent_single_block");
        assert_eq!(fs::read(temp).unwrap(), data);
        cleanup(&dir);
    }

    #[test]
    fn test_tail_piece_request_has_short_length() {
        let data = vec![7u8; 20000];
        let (coordinator, _recv, dir) =
            build_coordinator("tail_piece", &data, 16384, default_config());
        let peer = test_peer(1);

        let first = coordinator
            .next_request_for(&peer, &Bitfield::new(vec![]))
            .unwrap()
            .unwrap();
        assert_eq!(first, BlockRequest::new(0, 0, 16384));

        let second = coordinator
            .next_request_for(&peer, &Bitfield::new(vec![]))
            .unwrap()
            .unwrap();
        assert_eq!(second, BlockRequest::new(1, 0, 3616));

        assert!(coordinator
            .next_request_for(&peer, &Bitfield::new(vec![]))
            .unwrap()
            .is_none());
        cleanup(&dir);
    }

    #[test]
    fn test_next_request_respects_pipeline_cap() {
        let mut config = default_config();
        config.pipelining_size = 1;
        let data = vec![1u8; 20000];
        let (coordinator, _recv, dir) = build_coordinator("pipeline_cap", &data, 16384, config);
        let peer = test_peer(1);
        let other = test_peer(2);

        assert!(coordinator
            .next_request_for(&peer, &Bitfield::new(vec![]))
            .unwrap()
            .is_some());
        assert!(coordinator
            .next_request_for(&peer, &Bitfield::new(vec![]))
            .unwrap()
            .is_none());
        // The cap is per peer, another peer still gets a request.
        assert!(coordinator
            .next_request_for(&other, &Bitfield::new(vec![]))
            .unwrap()
            .is_some());
        cleanup(&dir);
    }

    #[test]
    fn test_next_request_honors_advertised_pieces() {
        let data = vec![1u8; 20000];
        let (coordinator, _recv, dir) =
            build_coordinator("advertised", &data, 16384, default_config());
        let peer = test_peer(1);

        // Peer advertises only piece 1.
        let advertised = Bitfield::new(vec![0b0100_0000]);
        let request = coordinator
            .next_request_for(&peer, &advertised)
            .unwrap()
            .unwrap();
        assert_eq!(request.index, 1);
        cleanup(&dir);
    }

    #[test]
    fn test_duplicate_block_is_dropped() {
        let data = b"0123456789".to_vec();
        let (coordinator, _recv, dir) =
            build_coordinator("duplicate", &data, 16384, default_config());

        coordinator.on_block_received(0, 0, &data).unwrap();
        coordinator.on_block_received(0, 0, &data).unwrap();

        let state = coordinator.state.lock().unwrap();
        assert_eq!(state.have_count, 1);
        cleanup(&dir);
    }

    #[test]
    fn test_bad_block_length_is_rejected() {
        let data = b"0123456789".to_vec();
        let (coordinator, _recv, dir) =
            build_coordinator("bad_length", &data, 16384, default_config());

        let result = coordinator.on_block_received(0, 0, &[0u8; 16384]);
        assert!(matches!(
            result,
            Err(CoordinatorError::BadBlock(PieceBufferError::BadBlockLength))
        ));
        cleanup(&dir);
    }

    #[test]
    fn test_misaligned_begin_is_rejected() {
        let data = b"0123456789".to_vec();
        let (coordinator, _recv, dir) =
            build_coordinator("misaligned", &data, 16384, default_config());

        let result = coordinator.on_block_received(0, 3, &data);
        assert!(matches!(
            result,
            Err(CoordinatorError::BadBlock(PieceBufferError::BadBlockIndex))
        ));
        cleanup(&dir);
    }

    #[test]
    fn test_out_of_range_piece_is_rejected() {
        let data = b"0123456789".to_vec();
        let (coordinator, _recv, dir) =
            build_coordinator("out_of_range", &data, 16384, default_config());

        let result = coordinator.on_block_received(5, 0, &data);
        assert!(matches!(
            result,
            Err(CoordinatorError::BadBlock(PieceBufferError::BadBlockIndex))
        ));
        cleanup(&dir);
    }

    #[test]
    fn test_hash_mismatch_clears_piece_and_bits() {
        let data = b"0123456789".to_vec();
        let mut torrent = build_torrent("torrent_hash_mismatch", data.len() as i64, 16384, &data);
        // Corrupt the expected hash so validation fails.
        torrent.info.pieces = vec![0u8; 20];
        let dir = test_dir("hash_mismatch");
        let config = config_for(&dir);
        let (coordinator, _recv) = DownloadCoordinator::new(&torrent, config).unwrap();
        let peer = test_peer(1);

        let request = coordinator
            .next_request_for(&peer, &Bitfield::new(vec![]))
            .unwrap()
            .unwrap();
        coordinator.on_block_received(0, 0, &data).unwrap();

        assert!(!coordinator.is_done());
        {
            let state = coordinator.state.lock().unwrap();
            assert_eq!(state.have_count, 0);
            assert!(!state.have.has(0));
            assert!(!state.requested.has(0));
            assert!(state.pending_timeout.is_empty());
            assert!(!state.piece_buffer.piece_is_full(0));
        }

        // The block is requestable again.
        let again = coordinator
            .next_request_for(&peer, &Bitfield::new(vec![]))
            .unwrap()
            .unwrap();
        assert_eq!(again, request);
        cleanup(&dir);
    }

    #[test]
    fn test_expired_request_is_redispatched() {
        let data = b"0123456789".to_vec();
        let (coordinator, _recv, dir) =
            build_coordinator("redispatch", &data, 16384, default_config());
        let ghost = test_peer(1);

        // A request that will never be answered.
        coordinator
            .next_request_for(&ghost, &Bitfield::new(vec![]))
            .unwrap()
            .unwrap();
        backdate_pending(&coordinator, 0, 120);

        // A connected, unchoked and interested peer to redispatch to.
        let (ready_peer, channel, mut remote) = connected_peer(2);
        channel.set_interested(true);
        channel.set_choked(false);
        coordinator.peer_connected(&ready_peer, channel).unwrap();

        coordinator.sweep_expired_requests().unwrap();

        let mut frame = [0u8; 17];
        remote.read_exact(&mut frame).unwrap();
        assert_eq!(&frame[0..5], &[0, 0, 0, 13, 6]);
        let request = BlockRequest::from_bytes(&frame[5..]).unwrap();
        assert_eq!(request, BlockRequest::new(0, 0, 10));

        let state = coordinator.state.lock().unwrap();
        assert!(state.requested.has(0));
        let pending = state.pending_timeout.get(&0).unwrap();
        assert_eq!(pending.peer, ready_peer);
        assert!(pending.since.elapsed() < Duration::from_secs(60));
        cleanup(&dir);
    }

    #[test]
    fn test_expired_request_without_ready_peer_stays_free() {
        let data = b"0123456789".to_vec();
        let (coordinator, _recv, dir) =
            build_coordinator("expired_no_peer", &data, 16384, default_config());
        let ghost = test_peer(1);

        coordinator
            .next_request_for(&ghost, &Bitfield::new(vec![]))
            .unwrap()
            .unwrap();
        backdate_pending(&coordinator, 0, 120);

        coordinator.sweep_expired_requests().unwrap();

        let state = coordinator.state.lock().unwrap();
        assert!(!state.requested.has(0));
        assert!(state.pending_timeout.is_empty());
        cleanup(&dir);
    }

    #[test]
    fn test_keep_alive_sweep_sends_single_frame() {
        let data = b"0123456789".to_vec();
        let mut config = default_config();
        config.keep_alive_timeout_seconds = 0;
        let (coordinator, _recv, dir) = build_coordinator("keep_alive", &data, 16384, config);

        let (peer, channel, mut remote) = connected_peer(3);
        coordinator.peer_connected(&peer, channel).unwrap();

        coordinator.sweep_keep_alives().unwrap();

        let mut frame = [0u8; 4];
        remote.read_exact(&mut frame).unwrap();
        assert_eq!(frame, [0, 0, 0, 0]);

        // Nothing else was written.
        remote
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let mut extra = [0u8; 1];
        assert!(remote.read_exact(&mut extra).is_err());
        cleanup(&dir);
    }

    #[test]
    fn test_temp_file_error_aborts_instead_of_completing() {
        let data = vec![3u8; 20000];
        let (coordinator, _recv, dir) =
            build_coordinator("temp_file_error", &data, 16384, default_config());

        // Swap the temp file for a read-only handle so piece flushes fail.
        let temp = manager::temp_file_path(dir.to_str().unwrap(), "torrent_temp_file_error");
        {
            let mut state = coordinator.state.lock().unwrap();
            state.temp_file = fs::File::open(&temp).unwrap();
        }

        let result = coordinator.on_block_received(0, 0, &data[..16384]);
        assert!(matches!(result, Err(CoordinatorError::TempFileError(_))));
        assert!(coordinator.is_aborted());
        assert!(!coordinator.is_done());

        // The failed piece was rolled back, not left counted as present.
        {
            let state = coordinator.state.lock().unwrap();
            assert_eq!(state.have_count, 0);
            assert!(!state.have.has(0));
            assert!(!state.piece_buffer.piece_is_full(0));
        }

        // Even after every remaining block arrives, the torrent must not
        // read as done.
        let result = coordinator.on_block_received(1, 0, &data[16384..]);
        assert!(matches!(result, Err(CoordinatorError::TempFileError(_))));
        assert!(coordinator.is_aborted());
        assert!(!coordinator.is_done());
        cleanup(&dir);
    }

    #[test]
    fn test_peer_accounting() {
        let data = b"0123456789".to_vec();
        let (coordinator, receiver, dir) =
            build_coordinator("peer_accounting", &data, 16384, default_config());
        let (peer, channel, _remote) = connected_peer(4);

        coordinator.peer_connecting();
        coordinator.peer_connected(&peer, channel).unwrap();
        assert_eq!(coordinator.current_peers(), 1);
        assert!(coordinator.is_connected(&peer).unwrap());

        coordinator.peer_disconnected(&peer).unwrap();
        assert_eq!(coordinator.current_peers(), 0);
        assert!(!coordinator.is_connected(&peer).unwrap());
        assert_eq!(receiver.recv().unwrap(), 0);
        cleanup(&dir);
    }

    #[test]
    fn test_peer_disconnected_without_connections_fails() {
        let data = b"0123456789".to_vec();
        let (coordinator, _recv, dir) =
            build_coordinator("disconnect_error", &data, 16384, default_config());

        assert!(coordinator.peer_disconnected(&test_peer(1)).is_err());
        cleanup(&dir);
    }

    #[test]
    fn test_multi_piece_download_in_any_order() {
        // Three pieces, delivered tail first.
        let piece_length = 16384u32;
        let mut data = vec![0u8; 2 * piece_length as usize + 100];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        let (coordinator, _recv, dir) =
            build_coordinator("any_order", &data, piece_length, default_config());

        coordinator
            .on_block_received(2, 0, &data[2 * piece_length as usize..])
            .unwrap();
        coordinator
            .on_block_received(0, 0, &data[..piece_length as usize])
            .unwrap();
        coordinator
            .on_block_received(1, 0, &data[piece_length as usize..2 * piece_length as usize])
            .unwrap();

        assert!(coordinator.is_done());
        let temp = manager::temp_file_path(dir.to_str().unwrap(), "torrent_any_order");
        assert_eq!(fs::read(temp).unwrap(), data);
        cleanup(&dir);
    }

    // Auxiliary functions

    fn default_config() -> Cfg {
        Cfg {
            tcp_port: 6881,
            download_directory: String::new(),
            pipelining_size: 5,
            read_write_seconds_timeout: 5,
            max_peers_per_torrent: 5,
            pending_timeout_seconds: 30,
            keep_alive_timeout_seconds: 120,
        }
    }

    fn config_for(dir: &std::path::Path) -> Cfg {
        let mut config = default_config();
        config.download_directory = dir.to_str().unwrap().to_string();
        config
    }

    fn test_dir(name: &str) -> std::path::PathBuf {
        let dir = env::temp_dir().join(format!("ltorrent_coordinator_{}", name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &std::path::Path) {
        let _ = fs::remove_dir_all(dir);
    }

    fn build_coordinator(
        name: &str,
        data: &[u8],
        piece_length: u32,
        mut config: Cfg,
    ) -> (DownloadCoordinator, Receiver<usize>, std::path::PathBuf) {
        let dir = test_dir(name);
        config.download_directory = dir.to_str().unwrap().to_string();
        let torrent = build_torrent(
            &format!("torrent_{}.bin", name),
            data.len() as i64,
            piece_length as i64,
            data,
        );
        let (coordinator, receiver) = DownloadCoordinator::new(&torrent, config).unwrap();
        (coordinator, receiver, dir)
    }

    fn build_torrent(name: &str, length: i64, piece_length: i64, data: &[u8]) -> Torrent {
        let piece_count = ((length + piece_length - 1) / piece_length) as usize;
        let mut pieces = Vec::with_capacity(piece_count * 20);
        for piece_index in 0..piece_count {
            let start = piece_index * piece_length as usize;
            let end = (start + piece_length as usize).min(data.len());
            pieces.extend(Sha1::digest(&data[start..end]));
        }

        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), BValue::Int(length));
        info.insert(b"name".to_vec(), BValue::Bytes(name.as_bytes().to_vec()));
        info.insert(b"piece length".to_vec(), BValue::Int(piece_length));
        info.insert(b"pieces".to_vec(), BValue::Bytes(pieces));

        let mut dict = BTreeMap::new();
        dict.insert(
            b"announce".to_vec(),
            BValue::Bytes(b"http://example.com/announce".to_vec()),
        );
        dict.insert(b"info".to_vec(), BValue::Dict(info));

        Torrent::from(BValue::Dict(dict)).unwrap()
    }

    fn test_peer(index: u8) -> PeerInfo {
        PeerInfo::new(format!("10.0.0.{}", index), 6881)
    }

    fn connected_peer(index: u8) -> (PeerInfo, Arc<PeerChannel>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let local = TcpStream::connect(addr).unwrap();
        let (remote, _) = listener.accept().unwrap();
        (
            test_peer(index),
            Arc::new(PeerChannel::new(local)),
            remote,
        )
    }

    fn backdate_pending(coordinator: &DownloadCoordinator, overall: u32, seconds: u64) {
        let mut state = coordinator.state.lock().unwrap();
        if let Some(pending) = state.pending_timeout.get_mut(&overall) {
            pending.since = Instant::now()
                .checked_sub(Duration::from_secs(seconds))
                .expect("monotonic clock too close to its origin");
        }
    }
}
