use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Failure = 5,
    RequestIdentities = 11,
    IdentitiesAnswer = 12,
    SignRequest = 13,
    SignResponse = 14,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            x if x == Self::Failure as u8 => Some(Self::Failure),
            x if x == Self::RequestIdentities as u8 => Some(Self::RequestIdentities),
            x if x == Self::IdentitiesAnswer as u8 => Some(Self::IdentitiesAnswer),
            x if x == Self::SignRequest as u8 => Some(Self::SignRequest),
            x if x == Self::SignResponse as u8 => Some(Self::SignResponse),
            _ => None,
        }
    }
}

/// One agent protocol message: a type byte plus optional contents.
///
/// Empty contents are stored as `None`, since both encode to the same
/// one-byte body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMessage {
    message_type: u8,
    contents: Option<Bytes>,
}

impl AgentMessage {
    pub fn new(message_type: u8, contents: Option<Bytes>) -> Self {
        Self {
            message_type,
            contents: contents.filter(|bytes| !bytes.is_empty()),
        }
    }

    pub fn with_contents(message_type: MessageType, contents: impl Into<Bytes>) -> Self {
        Self::new(message_type as u8, Some(contents.into()))
    }

    pub fn failure() -> Self {
        Self::new(MessageType::Failure as u8, None)
    }

    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    /// The recognised message type, or `None` for codes this agent does not handle.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    pub fn contents(&self) -> Option<&Bytes> {
        self.contents.as_ref()
    }

    /// Length of type byte plus contents, as written in the frame header.
    pub fn body_len(&self) -> usize {
        1 + self.contents.as_ref().map_or(0, Bytes::len)
    }
}
