mod codec;
mod message;
mod payload;

pub use codec::{decode_frame, encode_frame, read_frame, write_frame, MAX_FRAME_LEN};
pub use message::{AgentMessage, MessageType};
pub use payload::{IdentitiesAnswer, SignRequest, SignResponse};

pub type Result<T> = std::result::Result<T, ProtoError>;

#[derive(thiserror::Error, Debug)]
pub enum ProtoError {
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("unexpected end of frame")]
    UnexpectedEof,
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
