pub const TCP_PORT: &str = "TCP_PORT";
pub const DOWNLOAD_DIRECTORY: &str = "DOWNLOAD_DIRECTORY";
pub const PIPELINING_SIZE: &str = "PIPELINING_SIZE";
pub const READ_WRITE_SECONDS_TIMEOUT: &str = "READ_WRITE_SECONDS_TIMEOUT";
pub const MAX_PEERS_PER_TORRENT: &str = "MAX_PEERS_PER_TORRENT";
pub const PENDING_TIMEOUT_SECONDS: &str = "PENDING_TIMEOUT_SECONDS";
pub const KEEP_ALIVE_TIMEOUT_SECONDS: &str = "KEEP_ALIVE_TIMEOUT_SECONDS";

/// Every setting a config file must define; anything else is rejected.
pub const SETTING_NAMES: [&str; 7] = [
    TCP_PORT,
    DOWNLOAD_DIRECTORY,
    PIPELINING_SIZE,
    READ_WRITE_SECONDS_TIMEOUT,
    MAX_PEERS_PER_TORRENT,
    PENDING_TIMEOUT_SECONDS,
    KEEP_ALIVE_TIMEOUT_SECONDS,
];
