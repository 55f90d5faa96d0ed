/// `TrackerUrl` struct containing a tracker url information.
///
/// To create a new `TrackerUrl` use the method builder `parse()`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TrackerUrl {
    pub protocol: ConnectionProtocol,
    pub host: String,
    pub port: u16,
    pub endpoint: String,
}

/// Posible `TrackerUrl` Connection Protocol values.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ConnectionProtocol {
    Http,
    Https,
}

/// Posible `TrackerUrl` Errors.
#[derive(Debug, PartialEq, Eq)]
pub enum TrackerUrlError {
    InvalidTrackerUrl,
    UnsupportedConnectionProtocol,
    InvalidPortNumber,
}

impl TrackerUrl {
    /// Builds a new `TrackerUrl` from a &str tracker url.
    ///
    /// It returns a `TrackerUrlError` if:
    /// - The url format is invalid.
    /// - The url connection protocol is unsupported.
    /// - The url port number is not a number.
    pub fn parse(url: &str) -> Result<Self, TrackerUrlError> {
        let (protocol_name, rest) = url
            .split_once("://")
            .ok_or(TrackerUrlError::InvalidTrackerUrl)?;

        let protocol = match protocol_name {
            "http" => ConnectionProtocol::Http,
            "https" => ConnectionProtocol::Https,
            _ => return Err(TrackerUrlError::UnsupportedConnectionProtocol),
        };

        let (authority, endpoint) = rest
            .split_once('/')
            .ok_or(TrackerUrlError::InvalidTrackerUrl)?;
        if authority.is_empty() {
            return Err(TrackerUrlError::InvalidTrackerUrl);
        }

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| TrackerUrlError::InvalidPortNumber)?;
                (host.to_string(), port)
            }
            None => {
                let default_port = match protocol {
                    ConnectionProtocol::Https => 443,
                    ConnectionProtocol::Http => 80,
                };
                (authority.to_string(), default_port)
            }
        };

        Ok(Self {
            protocol,
            host,
            port,
            endpoint: endpoint.to_string(),
        })
    }
}
