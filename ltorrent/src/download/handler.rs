use super::coordinator::{CoordinatorError, DownloadCoordinator};
use crate::{
    config::cfg::Cfg,
    metainfo::torrent::Torrent,
    peer::{peer_info::PeerInfo, session::PeerSession},
    storage::manager,
    tracker::{
        announcer::{Announcer, AnnouncerError},
        response::AnnounceResponse,
    },
};
use std::{
    io,
    sync::{
        mpsc::{self, Receiver},
        Arc,
    },
    thread,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Drives one torrent from announce to assembled output files.
///
/// To create a new `TorrentHandler`, use TorrentHandler::new(torrent, config, client_peer_id).
#[derive(Debug)]
pub struct TorrentHandler {
    torrent: Torrent,
    config: Cfg,
    coordinator: Arc<DownloadCoordinator>,
    disconnect_receiver: Receiver<usize>,
    client_peer_id: String,
}

/// Posible torrent handler errors.
#[derive(Debug)]
pub enum TorrentHandlerError {
    TrackerError(AnnouncerError),
    CoordinatorError(CoordinatorError),
    DisconnectRecvError(mpsc::RecvError),
    AssembleError(io::Error),
    TorrentAborted,
}

impl TorrentHandler {
    /// Creates a new `TorrentHandler`, including the torrent's coordinator
    /// and temp file.
    ///
    /// # Errors
    /// - `CoordinatorError` if the temp file can not be created.
    pub fn new(
        torrent: Torrent,
        config: Cfg,
        client_peer_id: String,
    ) -> Result<Self, TorrentHandlerError> {
        let (coordinator, disconnect_receiver) =
            DownloadCoordinator::new(&torrent, config.clone())
                .map_err(TorrentHandlerError::CoordinatorError)?;

        Ok(Self {
            coordinator: Arc::new(coordinator),
            torrent,
            config,
            disconnect_receiver,
            client_peer_id,
        })
    }

    /// Runs the torrent download.
    ///
    /// Announces to the tracker, connects to peers up to the configured
    /// limit (waiting for disconnects when full), and re-announces when the
    /// peer list runs dry. Once the coordinator reports completion the temp
    /// file is turned into the final output files.
    ///
    /// # Errors
    ///
    /// - `TrackerError` if announcing failed.
    /// - `TorrentAborted` if the coordinator hit a fatal disk error.
    /// - `AssembleError` if the finished download could not be laid out.
    pub fn handle(&mut self) -> Result<(), TorrentHandlerError> {
        let announcer = Announcer::new(
            &self.torrent,
            self.config.tcp_port,
            self.client_peer_id.clone(),
        )
        .map_err(TorrentHandlerError::TrackerError)?;

        while !self.coordinator.is_done() {
            if self.coordinator.is_aborted() {
                return Err(TorrentHandlerError::TorrentAborted);
            }

            let response = announcer.announce().map_err(TorrentHandlerError::TrackerError)?;
            self.update_total_peers(&response);
            info!(
                "Torrent {}: tracker returned {} peers",
                self.torrent.name(),
                response.peers.len()
            );

            let interval = response.interval;
            for peer in response.peers {
                self.wait_for_peer_capacity()?;
                if self.coordinator.is_done() || self.coordinator.is_aborted() {
                    break;
                }

                // Avoid connecting to the same peer twice.
                if self
                    .coordinator
                    .is_connected(&peer)
                    .map_err(TorrentHandlerError::CoordinatorError)?
                {
                    continue;
                }

                if self.coordinator.all_current_peers()
                    < self.config.max_peers_per_torrent as usize
                {
                    self.connect_to_peer(peer);
                }
            }

            if !self.coordinator.is_done() {
                debug!(
                    "Torrent {}: {} peers connected, {:.1} kb/s",
                    self.torrent.name(),
                    self.coordinator.current_peers(),
                    self.coordinator.download_speed().unwrap_or(0.0)
                );
                // Wait out the announce interval; any disconnect (including
                // the ones triggered by completion) wakes us early.
                let _ = self
                    .disconnect_receiver
                    .recv_timeout(Duration::from_secs(interval.max(1) as u64));
            }
        }

        manager::assemble_output(&self.torrent, &self.config.download_directory)
            .map_err(TorrentHandlerError::AssembleError)?;
        info!("Torrent {} download finished", self.torrent.name());
        Ok(())
    }

    /// Gets the shared coordinator of the torrent.
    pub fn status(&self) -> Arc<DownloadCoordinator> {
        self.coordinator.clone()
    }

    /// Blocks until the connection count is below the configured maximum.
    fn wait_for_peer_capacity(&self) -> Result<(), TorrentHandlerError> {
        if self.coordinator.all_current_peers() >= self.config.max_peers_per_torrent as usize {
            self.disconnect_receiver
                .recv()
                .map_err(TorrentHandlerError::DisconnectRecvError)?;
            // Drain queued notifications so several simultaneous disconnects
            // do not let us overshoot the limit later.
            while self
                .disconnect_receiver
                .recv_timeout(Duration::from_nanos(1))
                .is_ok()
            {
                continue;
            }
        }
        Ok(())
    }

    /// Updates the coordinator with the swarm totals.
    ///
    /// If the tracker response did not contain them, the peer list length is
    /// used instead.
    fn update_total_peers(&self, response: &AnnounceResponse) {
        if response.complete == 0 && response.incomplete == 0 {
            self.coordinator.update_total_peers(response.peers.len(), 0);
        } else {
            self.coordinator
                .update_total_peers(response.complete as usize, response.incomplete as usize);
        }
    }

    fn connect_to_peer(&self, peer: PeerInfo) {
        let peer_name = peer.addr();
        let mut session = PeerSession::new(
            peer,
            self.torrent.clone(),
            self.coordinator.clone(),
            self.config.clone(),
            self.client_peer_id.clone(),
        );

        let builder = thread::Builder::new().name(format!(
            "torrent: {} / peer: {}",
            self.torrent.name(),
            peer_name
        ));

        let spawned = builder.spawn(move || match session.run() {
            Ok(_) => (),
            Err(err) => {
                warn!("Peer session ended with {:?}", err);
            }
        });
        if let Err(err) = spawned {
            warn!("Could not spawn peer session thread: {:?}", err);
        }
    }
}
