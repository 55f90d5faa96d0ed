use super::http::client::{HttpClient, HttpClientError};
use super::http::query::AnnounceQuery;
use super::http::url::{ConnectionProtocol, TrackerUrl, TrackerUrlError};
use super::response::{AnnounceResponse, FromResponseError};
use crate::metainfo::torrent::Torrent;

/// Announce client for one torrent's tracker.
///
/// To get the tracker's peer list use the method `announce()`.
#[derive(Debug)]
pub struct Announcer {
    torrent: Torrent,
    tracker_url: TrackerUrl,
    client_port: u16,
    client_peer_id: String,
}

/// Posible `Announcer` errors.
#[derive(Debug)]
pub enum AnnouncerError {
    UrlParseError(TrackerUrlError),
    HttpClientError(HttpClientError),
    FromResponseError(FromResponseError),
}

impl Announcer {
    /// Builds a new `Announcer` for a torrent.
    ///
    /// It returns an `AnnouncerError` if the torrent's announce url can not
    /// be parsed.
    pub fn new(
        torrent: &Torrent,
        client_port: u16,
        client_peer_id: String,
    ) -> Result<Self, AnnouncerError> {
        let tracker_url =
            TrackerUrl::parse(&torrent.announce_url).map_err(AnnouncerError::UrlParseError)?;

        Ok(Self {
            torrent: torrent.clone(),
            tracker_url,
            client_port,
            client_peer_id,
        })
    }

    /// Asks the tracker for the peer list.
    ///
    /// On success it returns an `AnnounceResponse` with the swarm peers and
    /// totals.
    ///
    /// It returns an `AnnouncerError` if:
    /// - The HTTP request failed.
    /// - The response could not be decoded.
    pub fn announce(&self) -> Result<AnnounceResponse, AnnouncerError> {
        let query = AnnounceQuery::new(
            self.torrent.info_hash,
            self.client_peer_id.clone(),
            self.client_port,
            self.torrent.total_length(),
        );

        let client = HttpClient::new(self.tracker_url.clone(), query);

        let raw = match self.tracker_url.protocol {
            ConnectionProtocol::Https => client.https_request(),
            ConnectionProtocol::Http => client.http_request(),
        }
        .map_err(AnnouncerError::HttpClientError)?;

        AnnounceResponse::from(raw).map_err(AnnouncerError::FromResponseError)
    }
}
