use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::str::FromStr;

use super::constants;

/// Runtime settings of the client, loaded with `Cfg::new`.
#[derive(Debug, Clone)]
pub struct Cfg {
    /// Port announced to the tracker.
    pub tcp_port: u16,
    /// Directory downloads are stored in.
    pub download_directory: String,
    /// Outstanding block requests kept in flight per peer.
    pub pipelining_size: u32,
    /// Socket read/write timeout towards peers, in seconds.
    pub read_write_seconds_timeout: u64,
    /// Connection limit per torrent.
    pub max_peers_per_torrent: u32,
    /// Age in seconds at which an unanswered block request is retried
    /// elsewhere.
    pub pending_timeout_seconds: u64,
    /// Send-side idle seconds after which a peer gets a keep-alive.
    pub keep_alive_timeout_seconds: u64,
}

/// Posible config errors.
#[derive(Debug)]
pub enum CfgError {
    IoError(io::Error),
    MalformedLine(String),
    UnknownSetting(String),
    MissingSetting(String),
    InvalidValue(String),
}

impl Cfg {
    /// Loads the settings file at `path`: one `NAME=value` setting per
    /// line, blank lines skipped. Every known setting must be present, and
    /// unknown names are rejected so a typo does not silently leave a
    /// setting at some default.
    ///
    /// It returns a `CfgError` if:
    /// - The file can not be opened or read.
    /// - A non-blank line has no `=` separator.
    /// - A setting name is unknown or missing.
    /// - A numeric value does not parse into the setting's type.
    pub fn new(path: &str) -> Result<Self, CfgError> {
        let file = File::open(path).map_err(CfgError::IoError)?;
        let settings = Self::read_settings(BufReader::new(file))?;

        for name in settings.keys() {
            if !constants::SETTING_NAMES.contains(&name.as_str()) {
                return Err(CfgError::UnknownSetting(name.clone()));
            }
        }

        Ok(Self {
            tcp_port: Self::number(&settings, constants::TCP_PORT)?,
            download_directory: Self::text(&settings, constants::DOWNLOAD_DIRECTORY)?.to_string(),
            pipelining_size: Self::number(&settings, constants::PIPELINING_SIZE)?,
            read_write_seconds_timeout: Self::number(
                &settings,
                constants::READ_WRITE_SECONDS_TIMEOUT,
            )?,
            max_peers_per_torrent: Self::number(&settings, constants::MAX_PEERS_PER_TORRENT)?,
            pending_timeout_seconds: Self::number(&settings, constants::PENDING_TIMEOUT_SECONDS)?,
            keep_alive_timeout_seconds: Self::number(
                &settings,
                constants::KEEP_ALIVE_TIMEOUT_SECONDS,
            )?,
        })
    }

    /// Collects the raw `NAME=value` pairs of the file.
    fn read_settings(reader: impl BufRead) -> Result<HashMap<String, String>, CfgError> {
        let mut settings = HashMap::new();
        for line in reader.lines() {
            let line = line.map_err(CfgError::IoError)?;
            if line.trim().is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once('=')
                .ok_or_else(|| CfgError::MalformedLine(line.clone()))?;
            settings.insert(name.to_string(), value.to_string());
        }
        Ok(settings)
    }

    fn text<'a>(settings: &'a HashMap<String, String>, name: &str) -> Result<&'a str, CfgError> {
        settings
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| CfgError::MissingSetting(name.to_string()))
    }

    fn number<N: FromStr>(
        settings: &HashMap<String, String>,
        name: &str,
    ) -> Result<N, CfgError> {
        let value = Self::text(settings, name)?;
        value
            .parse()
            .map_err(|_| CfgError::InvalidValue(format!("{}={}", name, value)))
    }
}
