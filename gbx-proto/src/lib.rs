pub mod value;
pub mod framing;
pub mod xmlrpc;

pub use value::*;
pub use framing::*;
pub use xmlrpc::*;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connect failed: {0}")]
    Connect(std::io::Error),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(u32, u32),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Envelope decode error: {0}")]
    Decode(String),

    #[error("Server fault {code}: {message}")]
    Fault { code: i32, message: String },

    #[error("No response within {0} frames")]
    FrameBudgetExceeded(usize),

    #[error("Call handles exhausted")]
    HandlesExhausted,
}

impl From<quick_xml::Error> for ProtocolError {
    fn from(e: quick_xml::Error) -> Self {
        ProtocolError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
