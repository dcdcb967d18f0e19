use bytes::Bytes;

/// Frame type tag as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FrameType {
    Response = 0,
    Error = 1,
    Message = 2,
}

impl FrameType {
    pub const fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Response),
            1 => Some(Self::Error),
            2 => Some(Self::Message),
            _ => None,
        }
    }
}

/// An inbound unit, already decoded by the transport's frame reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    /// Raw message body; decoding it is the consumer's job.
    Message(Bytes),
}

impl Frame {
    /// Build a frame from its wire tag and payload.
    pub fn from_parts(frame_type: FrameType, data: Bytes) -> Self {
        match frame_type {
            FrameType::Response => Self::Response(data),
            FrameType::Error => Self::Error(data),
            FrameType::Message => Self::Message(data),
        }
    }

    pub const fn frame_type(&self) -> FrameType {
        match self {
            Self::Response(_) => FrameType::Response,
            Self::Error(_) => FrameType::Error,
            Self::Message(_) => FrameType::Message,
        }
    }

    pub fn data(&self) -> &Bytes {
        match self {
            Self::Response(d) | Self::Error(d) | Self::Message(d) => d,
        }
    }

    /// `OK` response.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Response(d) if d.as_ref() == b"OK")
    }

    /// `_heartbeat_` response; answered with NOP, never correlated.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Response(d) if d.as_ref() == b"_heartbeat_")
    }

    /// `CLOSE_WAIT` response to CLS.
    pub fn is_close_wait(&self) -> bool {
        matches!(self, Self::Response(d) if d.as_ref() == b"CLOSE_WAIT")
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Payload as text, lossily.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.data())
    }
}
