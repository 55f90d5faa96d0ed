use native_tls::Error;
use native_tls::HandshakeError;
use native_tls::TlsConnector;
use std::io::Error as IoError;
use std::io::{Read, Write};
use std::net::TcpStream;

use super::query::AnnounceQuery;
use super::url::TrackerUrl;

/// Minimal blocking HTTP GET client for tracker announces.
///
/// To make a **HTTPS** request use the method `https_request()`.
///
/// To make a **HTTP** request use the method `http_request()`.
#[derive(Debug)]
pub struct HttpClient {
    tracker_url: TrackerUrl,
    query: AnnounceQuery,
}

/// Posible `HttpClient` errors.
#[derive(Debug)]
pub enum HttpClientError {
    CreateTlsConnectorError(Error),
    TcpStreamConnectError(IoError),
    TlsStreamConnectError,
    ErrorWritingStream(IoError),
    ErrorReadingStream(IoError),
    BadStatusLine(String),
    MissingResponseBody,
}

impl HttpClient {
    /// Builds a new `HttpClient` from a **TrackerUrl** and an **AnnounceQuery**.
    pub fn new(tracker_url: TrackerUrl, query: AnnounceQuery) -> Self {
        Self { tracker_url, query }
    }

    /// Makes a **HTTPS** request to the tracker url.
    ///
    /// On success it returns a `Vec<u8>` cointaining the response body.
    ///
    /// It returns an `HttpClientError` if:
    /// - There was a problem creating a TlsConnector.
    /// - There was a problem connecting to the tracker url.
    /// - There was a problem writing or reading the tracker stream.
    /// - The tracker did not answer with a 200 status.
    pub fn https_request(&self) -> Result<Vec<u8>, HttpClientError> {
        let connector =
            TlsConnector::new().map_err(HttpClientError::CreateTlsConnectorError)?;
        let stream = self.connect_tcp_stream()?;
        let stream = connector
            .connect(self.tracker_url.host.as_str(), stream)
            .map_err(|err| match err {
                HandshakeError::Failure(_) | HandshakeError::WouldBlock(_) => {
                    HttpClientError::TlsStreamConnectError
                }
            })?;
        self.request_and_decode(stream)
    }

    /// Makes a **HTTP** request to the tracker url.
    ///
    /// On success it returns a `Vec<u8>` cointaining the response body.
    ///
    /// It returns an `HttpClientError` if:
    /// - There was a problem connecting to the tracker url.
    /// - There was a problem writing or reading the tracker stream.
    /// - The tracker did not answer with a 200 status.
    pub fn http_request(&self) -> Result<Vec<u8>, HttpClientError> {
        self.request_and_decode(self.connect_tcp_stream()?)
    }

    fn connect_tcp_stream(&self) -> Result<TcpStream, HttpClientError> {
        let connect_url = format!("{}:{}", self.tracker_url.host, self.tracker_url.port);
        TcpStream::connect(connect_url).map_err(HttpClientError::TcpStreamConnectError)
    }

    fn request_and_decode<A>(&self, mut stream: A) -> Result<Vec<u8>, HttpClientError>
    where
        A: Write + Read,
    {
        let request = format!(
            "GET /{}{} HTTP/1.1\r\nHost: {}\r\nUser-Agent: LTorrent/0.1\r\nConnection: close\r\n\r\n",
            self.tracker_url.endpoint,
            self.query.build(),
            self.tracker_url.host
        );

        stream
            .write_all(request.as_bytes())
            .map_err(HttpClientError::ErrorWritingStream)?;

        let mut response = vec![];
        stream
            .read_to_end(&mut response)
            .map_err(HttpClientError::ErrorReadingStream)?;

        Self::parse_http_response(&response).map(|body| body.to_vec())
    }

    /// Splits off the headers and checks the status line.
    fn parse_http_response(response: &[u8]) -> Result<&[u8], HttpClientError> {
        let header_end = response
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .ok_or(HttpClientError::MissingResponseBody)?;

        let status_line = response
            .split(|byte| *byte == b'\r')
            .next()
            .unwrap_or_default();
        let status_line = String::from_utf8_lossy(status_line);
        if !status_line.contains(" 200 ") {
            return Err(HttpClientError::BadStatusLine(status_line.to_string()));
        }

        Ok(&response[header_end + 4..])
    }
}
