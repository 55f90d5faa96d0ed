use std::{
    io::{self, Write},
    net::TcpStream,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use super::wire::Message;

/// The write half of a peer connection, shared between the owning session
/// and the coordinator sweeps.
///
/// The session keeps the read half to itself; keep-alives and redispatched
/// requests are written through this handle. Writes are serialized by the
/// internal lock so frames never interleave.
#[derive(Debug)]
pub struct PeerChannel {
    writer: Mutex<TcpStream>,
    last_send: Mutex<Instant>,
    last_recv: Mutex<Instant>,
    /// The remote peer is choking us. Starts true.
    choked: AtomicBool,
    /// We declared interest to the remote peer. Starts false.
    interested: AtomicBool,
    download_speed: Mutex<f64>,
}

#[derive(Debug)]
pub enum PeerChannelError {
    PoisonedLock,
    WriteError(io::Error),
}

impl PeerChannel {
    pub fn new(writer: TcpStream) -> Self {
        Self {
            writer: Mutex::new(writer),
            last_send: Mutex::new(Instant::now()),
            last_recv: Mutex::new(Instant::now()),
            choked: AtomicBool::new(true),
            interested: AtomicBool::new(false),
            download_speed: Mutex::new(0.0),
        }
    }

    /// Writes one framed message and refreshes the send timestamp.
    pub fn send(&self, message: &Message) -> Result<(), PeerChannelError> {
        let mut writer = Self::lock(&self.writer)?;
        writer
            .write_all(&message.as_bytes())
            .map_err(PeerChannelError::WriteError)?;
        drop(writer);

        *Self::lock(&self.last_send)? = Instant::now();
        Ok(())
    }

    /// Sends a keep-alive frame if nothing was written for longer than
    /// `idle`. Returns whether a frame was sent.
    pub fn send_keep_alive_if_idle(&self, idle: Duration) -> Result<bool, PeerChannelError> {
        let idle_for = Self::lock(&self.last_send)?.elapsed();
        if idle_for <= idle {
            return Ok(false);
        }
        self.send(&Message::keep_alive())?;
        Ok(true)
    }

    /// Refreshes the receive timestamp; called on every successful read.
    pub fn touch_recv(&self) -> Result<(), PeerChannelError> {
        *Self::lock(&self.last_recv)? = Instant::now();
        Ok(())
    }

    pub fn set_choked(&self, choked: bool) {
        self.choked.store(choked, Ordering::Relaxed);
    }

    pub fn set_interested(&self, interested: bool) {
        self.interested.store(interested, Ordering::Relaxed);
    }

    /// Whether requests may be sent to this peer right now.
    pub fn is_ready(&self) -> bool {
        self.interested.load(Ordering::Relaxed) && !self.choked.load(Ordering::Relaxed)
    }

    pub fn set_download_speed(&self, kilobits_per_second: f64) -> Result<(), PeerChannelError> {
        *Self::lock(&self.download_speed)? = kilobits_per_second;
        Ok(())
    }

    pub fn download_speed(&self) -> Result<f64, PeerChannelError> {
        Ok(*Self::lock(&self.download_speed)?)
    }

    fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<T>, PeerChannelError> {
        mutex.lock().map_err(|_| PeerChannelError::PoisonedLock)
    }
}
