use std::{io, sync::Arc, thread, time::Duration};

use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, warn};

use crate::{
    config::cfg::Cfg,
    download::{
        coordinator::DownloadCoordinator,
        handler::{TorrentHandler, TorrentHandlerError},
    },
    metainfo::torrent::Torrent,
};

/// Owns every torrent download of one client run: a handler thread per
/// torrent plus the two periodic sweeper threads feeding each torrent's
/// coordinator (request expiry and keep-alives).
pub struct Engine {
    torrents: Vec<Torrent>,
    config: Cfg,
    client_peer_id: String,
}

/// Posible engine errors.
#[derive(Debug)]
pub enum EngineError {
    TorrentHandlerError(TorrentHandlerError),
    SpawnError(io::Error),
}

impl Engine {
    pub fn new(torrents: Vec<Torrent>, config: Cfg) -> Self {
        Self {
            torrents,
            config,
            client_peer_id: Self::generate_peer_id(),
        }
    }

    /// The 20-byte id this client presents to trackers and peers.
    fn generate_peer_id() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        format!("-LT0100-{}", suffix)
    }

    /// Downloads every torrent and returns once all of them finished or
    /// failed.
    pub fn run(self) -> Result<(), EngineError> {
        let mut handler_threads = Vec::new();

        for torrent in &self.torrents {
            let mut handler = TorrentHandler::new(
                torrent.clone(),
                self.config.clone(),
                self.client_peer_id.clone(),
            )
            .map_err(EngineError::TorrentHandlerError)?;

            self.spawn_sweepers(torrent, handler.status())?;

            let builder = thread::Builder::new().name(format!("torrent: {}", torrent.name()));
            let join = builder
                .spawn(move || match handler.handle() {
                    Ok(_) => (),
                    Err(err) => warn!("Torrent failed: {:?}", err),
                })
                .map_err(EngineError::SpawnError)?;
            handler_threads.push(join);
        }

        for join in handler_threads {
            if join.join().is_err() {
                warn!("A torrent handler thread panicked");
            }
        }
        info!("All torrents finished downloading");
        Ok(())
    }

    /// Starts the periodic request-expiry and keep-alive sweeps of one
    /// torrent. The threads end themselves once the torrent is done.
    fn spawn_sweepers(
        &self,
        torrent: &Torrent,
        coordinator: Arc<DownloadCoordinator>,
    ) -> Result<(), EngineError> {
        let expiry_interval = Duration::from_secs(self.config.pending_timeout_seconds.max(1));
        let keep_alive_interval =
            Duration::from_secs((self.config.keep_alive_timeout_seconds / 2).max(1));

        let expiry_coordinator = coordinator.clone();
        thread::Builder::new()
            .name(format!("request sweep: {}", torrent.name()))
            .spawn(move || loop {
                thread::sleep(expiry_interval);
                if expiry_coordinator.is_done() || expiry_coordinator.is_aborted() {
                    break;
                }
                if let Err(err) = expiry_coordinator.sweep_expired_requests() {
                    warn!("Request sweep failed: {:?}", err);
                }
            })
            .map_err(EngineError::SpawnError)?;

        thread::Builder::new()
            .name(format!("keep-alive sweep: {}", torrent.name()))
            .spawn(move || loop {
                thread::sleep(keep_alive_interval);
                if coordinator.is_done() || coordinator.is_aborted() {
                    break;
                }
                if let Err(err) = coordinator.sweep_keep_alives() {
                    warn!("Keep-alive sweep failed: {:?}", err);
                }
            })
            .map_err(EngineError::SpawnError)?;
        Ok(())
    }
}
