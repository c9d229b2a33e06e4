use bincode::{Decode, Encode};

use crate::{FireError, VertexId};

/// Everything exchanged between ranks. Worker loops and the aggregator
/// dispatch on this with an exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Message {
    /// Worker -> aggregator. Newly discovered directed edges; empty means
    /// "alive, no progress".
    Heartbeat {
        sample: u32,
        edges: Vec<(VertexId, VertexId)>,
    },
    Continue,
    Reset,
    Kill,
    /// Worker -> aggregator once local state for `sample` is cleared.
    ResetAck { sample: u32 },
    /// Worker -> worker, best effort.
    BurnRequest { sample: u32, vertices: Vec<VertexId> },
    /// Aggregator -> worker, new spread burst length.
    FireStep(u32),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Heartbeat { .. } => "HEARTBEAT",
            Message::Continue => "CONTINUE",
            Message::Reset => "RESET",
            Message::Kill => "KILL",
            Message::ResetAck { .. } => "RESET_ACK",
            Message::BurnRequest { .. } => "BURN_REQUEST",
            Message::FireStep(_) => "FIRE_STEP",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FireError> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, FireError> {
        let (msg, _): (Message, usize) = bincode::decode_from_slice(frame, bincode::config::standard())?;
        Ok(msg)
    }
}

/// Control broadcast after each heartbeat round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Reset,
    Kill,
}

impl Directive {
    pub fn message(self) -> Message {
        match self {
            Directive::Continue => Message::Continue,
            Directive::Reset => Message::Reset,
            Directive::Kill => Message::Kill,
        }
    }
}

impl TryFrom<Message> for Directive {
    type Error = FireError;

    fn try_from(msg: Message) -> Result<Self, Self::Error> {
        match msg {
            Message::Continue => Ok(Directive::Continue),
            Message::Reset => Ok(Directive::Reset),
            Message::Kill => Ok(Directive::Kill),
            other => Err(FireError::ProtocolViolation(format!(
                "expected a directive, got {}",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_frame_decodes_to_same_edges() {
        let msg = Message::Heartbeat {
            sample: 3,
            edges: vec![(1, 2), (2, 1), (u64::MAX, 0)],
        };
        let frame = msg.encode().unwrap();
        assert_eq!(Message::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_garbage_frame_is_an_error() {
        assert!(Message::decode(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_only_control_messages_are_directives() {
        assert_eq!(Directive::try_from(Message::Kill).unwrap(), Directive::Kill);
        let err = Directive::try_from(Message::ResetAck { sample: 0 }).unwrap_err();
        assert!(!err.is_fatal());
    }
}
