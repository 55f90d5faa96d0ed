use std::{
    io::{self, Read, Write},
    net::TcpStream,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::{
    config::cfg::Cfg,
    download::coordinator::{CoordinatorError, DownloadCoordinator},
    metainfo::torrent::Torrent,
};

use super::{
    channel::{PeerChannel, PeerChannelError},
    handshake::{Handshake, HandshakeError, HANDSHAKE_LENGTH},
    peer_info::PeerInfo,
    wire::{Bitfield, Message, MessageError, MessageId},
};

/// Posible peer session errors. Any of them closes this session only.
#[derive(Debug)]
pub enum PeerSessionError {
    CouldNotConnectToPeer,
    ErrorSettingStreamTimeout,
    ErrorCloningStream(io::Error),
    ErrorSendingHandshake(io::Error),
    ErrorReadingHandshake(io::Error),
    InvalidHandshake(HandshakeError),
    InfoHashMismatch,
    PeerIsOurself,
    ErrorReadingMessage(io::Error),
    ProtocolError(MessageError),
    MalformedPayload(MessageId),
    ChannelError(PeerChannelError),
    CoordinatorError(CoordinatorError),
}

/// One outgoing connection to a remote peer.
///
/// The session performs the handshake, then loops reading frames from its
/// receive buffer and feeding `piece` payloads to the coordinator, topping
/// up its request pipeline whenever the peer lets it. The socket read
/// timeout doubles as an idle tick so the pipeline is refilled even when the
/// peer is silent.
pub struct PeerSession {
    torrent: Torrent,
    peer: PeerInfo,
    coordinator: Arc<DownloadCoordinator>,
    config: Cfg,
    client_peer_id: String,
    /// Pieces the remote peer advertised via `bitfield`/`have`. Empty until
    /// it sends either, which reads as "request anything".
    advertised: Bitfield,
    recv_buffer: Vec<u8>,
    started: DateTime<Local>,
    downloaded_bytes: u64,
}

impl PeerSession {
    pub fn new(
        peer: PeerInfo,
        torrent: Torrent,
        coordinator: Arc<DownloadCoordinator>,
        config: Cfg,
        client_peer_id: String,
    ) -> Self {
        Self {
            torrent,
            peer,
            coordinator,
            config,
            client_peer_id,
            advertised: Bitfield::new(vec![]),
            recv_buffer: Vec::new(),
            started: Local::now(),
            downloaded_bytes: 0,
        }
    }

    /// Connects to the peer and runs the session until the torrent is done,
    /// the peer hangs up, or a protocol violation occurs.
    ///
    /// Peer bookkeeping in the coordinator is balanced on every exit path.
    pub fn run(&mut self) -> Result<(), PeerSessionError> {
        self.coordinator.peer_connecting();
        let mut stream = match self.connect() {
            Ok(stream) => stream,
            Err(err) => {
                self.coordinator.peer_connecting_failed();
                return Err(err);
            }
        };

        let channel = Arc::new(PeerChannel::new(
            stream
                .try_clone()
                .map_err(PeerSessionError::ErrorCloningStream)?,
        ));
        self.coordinator
            .peer_connected(&self.peer, channel.clone())
            .map_err(PeerSessionError::CoordinatorError)?;

        let result = self.message_loop(&mut stream, &channel);

        self.coordinator
            .peer_disconnected(&self.peer)
            .map_err(PeerSessionError::CoordinatorError)?;
        result
    }

    /// Establishes the TCP connection and exchanges handshakes.
    fn connect(&mut self) -> Result<TcpStream, PeerSessionError> {
        let mut stream = TcpStream::connect(self.peer.addr())
            .map_err(|_| PeerSessionError::CouldNotConnectToPeer)?;

        self.set_stream_timeouts(&stream)?;

        let handshake = Handshake::new(
            self.torrent.info_hash,
            Self::peer_id_bytes(&self.client_peer_id),
        );
        stream
            .write_all(&handshake.as_bytes())
            .map_err(PeerSessionError::ErrorSendingHandshake)?;

        let mut buffer = [0; HANDSHAKE_LENGTH];
        stream
            .read_exact(&mut buffer)
            .map_err(PeerSessionError::ErrorReadingHandshake)?;
        let remote = Handshake::from_bytes(&buffer).map_err(PeerSessionError::InvalidHandshake)?;

        if !remote.matches_info_hash(&self.torrent.info_hash) {
            return Err(PeerSessionError::InfoHashMismatch);
        }
        if remote.peer_id == Self::peer_id_bytes(&self.client_peer_id) {
            return Err(PeerSessionError::PeerIsOurself);
        }
        self.peer.peer_id = Some(remote.peer_id.to_vec());

        info!("Handshake with {} successful", self.peer.addr());
        Ok(stream)
    }

    fn message_loop(
        &mut self,
        stream: &mut TcpStream,
        channel: &Arc<PeerChannel>,
    ) -> Result<(), PeerSessionError> {
        channel
            .send(&Message::new(MessageId::Interested, vec![]))
            .map_err(PeerSessionError::ChannelError)?;
        channel.set_interested(true);

        let mut scratch = [0u8; 4096];
        loop {
            if self.coordinator.is_done() || self.coordinator.is_aborted() {
                return Ok(());
            }

            match stream.read(&mut scratch) {
                // Remote EOF is a regular end of session.
                Ok(0) => return Ok(()),
                Ok(n) => {
                    channel
                        .touch_recv()
                        .map_err(PeerSessionError::ChannelError)?;
                    self.recv_buffer.extend_from_slice(&scratch[..n]);
                    self.drain_frames(channel)?;
                }
                // The read timeout is the idle tick.
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(err) => return Err(PeerSessionError::ErrorReadingMessage(err)),
            }

            if channel.is_ready() {
                self.fill_request_pipeline(channel)?;
            }
        }
    }

    /// Parses every complete frame sitting in the receive buffer.
    fn drain_frames(&mut self, channel: &Arc<PeerChannel>) -> Result<(), PeerSessionError> {
        loop {
            match Message::try_parse(&self.recv_buffer).map_err(PeerSessionError::ProtocolError)? {
                None => return Ok(()),
                Some((message, consumed)) => {
                    self.recv_buffer.drain(..consumed);
                    self.handle_message(message, channel)?;
                }
            }
        }
    }

    fn handle_message(
        &mut self,
        message: Message,
        channel: &Arc<PeerChannel>,
    ) -> Result<(), PeerSessionError> {
        match message.id {
            MessageId::Choke => channel.set_choked(true),
            MessageId::Unchoke => channel.set_choked(false),
            MessageId::Have => {
                let index = Self::read_u32(&message.payload)
                    .ok_or(PeerSessionError::MalformedPayload(MessageId::Have))?;
                self.advertised.set(index, true);
            }
            MessageId::Bitfield => self.advertised = Bitfield::new(message.payload),
            MessageId::Piece => self.handle_piece(message, channel)?,
            MessageId::KeepAlive => {}
            // We do not serve data.
            MessageId::Interested
            | MessageId::NotInterested
            | MessageId::Request
            | MessageId::Cancel
            | MessageId::Port => {}
            MessageId::Unknown(id) => debug!("Ignoring unknown message id {}", id),
        }
        Ok(())
    }

    /// Delivers a received block to the coordinator.
    fn handle_piece(
        &mut self,
        message: Message,
        channel: &Arc<PeerChannel>,
    ) -> Result<(), PeerSessionError> {
        if message.payload.len() < 8 {
            return Err(PeerSessionError::MalformedPayload(MessageId::Piece));
        }

        let mut index: [u8; 4] = [0; 4];
        let mut begin: [u8; 4] = [0; 4];
        index.copy_from_slice(&message.payload[0..4]);
        begin.copy_from_slice(&message.payload[4..8]);
        let block = &message.payload[8..];

        self.coordinator
            .on_block_received(u32::from_be_bytes(index), u32::from_be_bytes(begin), block)
            .map_err(PeerSessionError::CoordinatorError)?;

        self.downloaded_bytes += block.len() as u64;
        let _ = channel.set_download_speed(self.average_speed_kbps());
        Ok(())
    }

    /// Requests blocks until the coordinator caps this peer's pipeline or
    /// runs out of requestable blocks.
    fn fill_request_pipeline(
        &mut self,
        channel: &Arc<PeerChannel>,
    ) -> Result<(), PeerSessionError> {
        while let Some(request) = self
            .coordinator
            .next_request_for(&self.peer, &self.advertised)
            .map_err(PeerSessionError::CoordinatorError)?
        {
            channel
                .send(&request.to_message())
                .map_err(PeerSessionError::ChannelError)?;
        }
        Ok(())
    }

    /// Average session download speed in kilobits per second.
    fn average_speed_kbps(&self) -> f64 {
        let elapsed = Local::now().signed_duration_since(self.started);
        match elapsed.num_microseconds() {
            Some(microseconds) if microseconds > 0 => {
                (self.downloaded_bytes as f64 / (microseconds as f64 / 1_000_000.0)) * 8.0 / 1024.0
            }
            _ => 0.0,
        }
    }

    /// Sets read and write timeouts for the stream.
    fn set_stream_timeouts(&self, stream: &TcpStream) -> Result<(), PeerSessionError> {
        stream
            .set_read_timeout(Some(Duration::from_secs(
                self.config.read_write_seconds_timeout.max(1),
            )))
            .map_err(|_| PeerSessionError::ErrorSettingStreamTimeout)?;

        stream
            .set_write_timeout(Some(Duration::from_secs(
                self.config.read_write_seconds_timeout.max(1),
            )))
            .map_err(|_| PeerSessionError::ErrorSettingStreamTimeout)?;
        Ok(())
    }

    fn read_u32(payload: &[u8]) -> Option<u32> {
        let bytes: [u8; 4] = payload.get(0..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    fn peer_id_bytes(peer_id: &str) -> [u8; 20] {
        let mut bytes = [0u8; 20];
        for (slot, byte) in bytes.iter_mut().zip(peer_id.as_bytes()) {
            *slot = *byte;
        }
        bytes
    }
}
