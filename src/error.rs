use pki_types::InvalidDnsNameError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("{source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },

    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: httparse::Error,
    },

    // Framing errors
    #[error("RSV bits must be zero")]
    RsvNotZero,

    #[error("only unfragmented text frames are accepted")]
    UnsupportedFragmentation,

    #[error("invalid opcode byte `{0:#x}`")]
    InvalidOpcode(u8),

    #[error("frame payload of {0} bytes exceeds the {1} byte cap")]
    MessageTooLarge(u64, usize),

    #[error("64-bit extended length has the high bit set")]
    InvalidExtendedLength,

    #[error("could not draw a masking key from the entropy source")]
    EntropyUnavailable,

    // Handshake errors
    #[error("server did not reply with HTTP/1.1 101")]
    NoUpgrade,

    #[error("Upgrade: websocket header missing or mismatched in the response")]
    NoUpgradeHeader,

    #[error("Connection: Upgrade header missing in the response")]
    NoConnectionHeader,

    #[error("Sec-WebSocket-Accept did not match the expected value")]
    InvalidAcceptKey,

    #[error("incomplete HTTP response from server")]
    IncompleteHttpResponse,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    // Session errors
    #[error("no frame received for {0}s, session considered stale")]
    StaleSession(u64),

    #[error("more than 4 consecutive send errors on this session")]
    SendLoopBurst,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("failed to persist host config atomically: {0}")]
    ConfigPersistFailed(String),

    #[error("ping requires raw socket capability (run as root / with CAP_NET_RAW): {0}")]
    PingPermissionDenied(String),

    #[error("failed to launch command: {0}")]
    CommandLaunchFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
