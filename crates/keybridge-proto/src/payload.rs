use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{read_string, write_string};
use crate::{ProtoError, Result};

/// `SSH_AGENT_IDENTITIES_ANSWER` contents carrying a single identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitiesAnswer {
    pub key_blob: Vec<u8>,
}

impl IdentitiesAnswer {
    pub fn new(key_blob: Vec<u8>) -> Self {
        Self { key_blob }
    }

    /// `count(=1) | keylen | key | commentlen(=0)`
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + 4 + self.key_blob.len() + 4);
        buf.put_u32(1);
        write_string(&mut buf, &self.key_blob);
        write_string(&mut buf, b"");
        buf.freeze()
    }

    /// Decodes an answer holding exactly one identity. The comment is discarded.
    pub fn decode(contents: &[u8]) -> Result<Self> {
        let mut buf = contents;
        if buf.remaining() < 4 {
            return Err(ProtoError::UnexpectedEof);
        }
        if buf.get_u32() != 1 {
            return Err(ProtoError::InvalidMessage("expected exactly one identity"));
        }
        let key_blob = read_string(&mut buf)?;
        read_string(&mut buf)?;
        Ok(Self { key_blob })
    }
}

/// `SSH_AGENTC_SIGN_REQUEST` contents: `datalen | data | flags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub data: Vec<u8>,
    pub flags: u32,
}

impl SignRequest {
    pub fn decode(contents: &[u8]) -> Result<Self> {
        let mut buf = contents;
        let data = read_string(&mut buf)?;
        if buf.remaining() < 4 {
            return Err(ProtoError::UnexpectedEof);
        }
        let flags = buf.get_u32();
        Ok(Self { data, flags })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.data.len() + 4);
        write_string(&mut buf, &self.data);
        buf.put_u32(self.flags);
        buf.freeze()
    }
}

/// `SSH_AGENT_SIGN_RESPONSE` contents: `siglen | signature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignResponse {
    pub signature: Vec<u8>,
}

impl SignResponse {
    pub fn new(signature: Vec<u8>) -> Self {
        Self { signature }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.signature.len());
        write_string(&mut buf, &self.signature);
        buf.freeze()
    }

    pub fn decode(contents: &[u8]) -> Result<Self> {
        let mut buf = contents;
        let signature = read_string(&mut buf)?;
        Ok(Self { signature })
    }
}
