use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Model manifest could not be read.
    Read,
    /// Signed document or package metadata is structurally malformed.
    Decode,
    /// Signed document decoded fine but is not the expected kind.
    TypeMismatch,
    /// Package or boot configuration could not be located.
    NotFound,
    Download,
    Copy,
    /// Target root already holds a system state marker.
    AlreadyBootstrapped,
    /// Package container could not be opened.
    Open,
    Extract,
    BootVar,
    Config,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Read => "read",
            ErrorKind::Decode => "decode",
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Download => "download",
            ErrorKind::Copy => "copy",
            ErrorKind::AlreadyBootstrapped => "already-bootstrapped",
            ErrorKind::Open => "open",
            ErrorKind::Extract => "extract",
            ErrorKind::BootVar => "boot-var",
            ErrorKind::Config => "config",
            ErrorKind::Other => "other",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Other, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    // Prefix more context but keep the original kind, so callers can still match on it.
    pub fn context<C: fmt::Display>(self, ctx: C) -> Self {
        Self {
            kind: self.kind,
            msg: format!("{ctx}: {}", self.msg),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::new(ErrorKind::Config, err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Decode, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
