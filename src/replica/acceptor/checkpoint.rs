use crate::actor::WeakActorClient;
use crate::commitlog::Offset;
use crate::messages::{collect_from_proto, decode_versioned, encode_versioned, CodecError, Collect, ProtoCollect};
use crate::replica::acceptor::Watermark;
use crate::replica::PaxosError;
use bytes::Bytes;
use prost::Message;
use std::fmt;

/// CheckpointHandle captures an acceptor/learner's durable state at one point: its watermark and
/// the last Collect it promised to. The application stores it next to its own snapshot, and hands
/// it back on restart, or to a lagging peer.
///
/// A handle produced by a running replica stays attached to it. `saved()` tells that replica
/// the application has durably stored its snapshot, so the log up to the watermark can go.
#[derive(Clone)]
pub struct CheckpointHandle {
    watermark: Watermark,
    last_collect: Option<Collect>,
    origin: Option<WeakActorClient>,
}

impl CheckpointHandle {
    /// The handle to open a replica that has never checkpointed.
    pub fn initial() -> Self {
        CheckpointHandle {
            watermark: Watermark::initial(),
            last_collect: None,
            origin: None,
        }
    }

    pub(crate) fn new(watermark: Watermark, last_collect: Option<Collect>, origin: WeakActorClient) -> Self {
        CheckpointHandle {
            watermark,
            last_collect,
            origin: Some(origin),
        }
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn last_collect(&self) -> Option<&Collect> {
        self.last_collect.as_ref()
    }

    pub fn is_newer_than(&self, other: &CheckpointHandle) -> bool {
        self.watermark.seq_num > other.watermark.seq_num
    }

    /// saved tells the issuing replica that this checkpoint is durable on the application side.
    pub async fn saved(&self) -> Result<(), PaxosError> {
        let client = self
            .origin
            .as_ref()
            .and_then(WeakActorClient::upgrade)
            .ok_or(PaxosError::DetachedCheckpoint)?;

        client.checkpoint_saved(self.clone()).await
    }

    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        encode_versioned(&ProtoCheckpoint::from(self))
    }

    /// Restore a handle written by `to_bytes()`. The result is detached from any replica, and its
    /// log offset is only meaningful to the replica that took it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let proto: ProtoCheckpoint = decode_versioned(bytes)?;

        let watermark = match proto.watermark_offset {
            offset if offset < 0 => Watermark::without_offset(proto.watermark_seq_num),
            offset => Watermark::new(proto.watermark_seq_num, Offset::new(offset as u64)),
        };
        let last_collect = proto.last_collect.map(collect_from_proto).transpose()?;

        Ok(CheckpointHandle {
            watermark,
            last_collect,
            origin: None,
        })
    }
}

impl PartialEq for CheckpointHandle {
    fn eq(&self, other: &Self) -> bool {
        self.watermark == other.watermark && self.last_collect == other.last_collect
    }
}

impl fmt::Debug for CheckpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointHandle")
            .field("watermark", &self.watermark)
            .field("last_collect", &self.last_collect)
            .field("attached", &self.origin.is_some())
            .finish()
    }
}

#[derive(Clone, PartialEq, Message)]
struct ProtoCheckpoint {
    #[prost(sint64, tag = "1")]
    watermark_seq_num: i64,
    // -1 when the watermark has no local offset.
    #[prost(sint64, tag = "2")]
    watermark_offset: i64,
    #[prost(message, optional, tag = "3")]
    last_collect: Option<ProtoCollect>,
}

impl From<&CheckpointHandle> for ProtoCheckpoint {
    fn from(handle: &CheckpointHandle) -> Self {
        ProtoCheckpoint {
            watermark_seq_num: handle.watermark.seq_num,
            watermark_offset: handle.watermark.log_offset.map_or(-1, |offset| offset.as_u64() as i64),
            last_collect: handle.last_collect.as_ref().map(ProtoCollect::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::NodeId;
    use std::net::SocketAddr;

    #[test]
    fn checkpoint_survives_serialization_detached() {
        // -- setup --
        let (client, _rx) = crate::actor::ActorClient::new(1);
        let handle = CheckpointHandle::new(
            Watermark::new(7, Offset::new(21)),
            Some(Collect {
                seq_num: 5,
                round: 3,
                leader: NodeId::new(SocketAddr::from(([127, 0, 0, 1], 4000))),
            }),
            client.weak(),
        );

        // -- execute --
        let restored = CheckpointHandle::from_bytes(&handle.to_bytes().unwrap()).unwrap();

        // -- verify --
        assert_eq!(restored, handle);
        assert!(restored.origin.is_none());
        assert!(restored.is_newer_than(&CheckpointHandle::initial()));
    }

    #[test]
    fn unrecognized_checkpoint_bytes_are_rejected() {
        assert!(matches!(
            CheckpointHandle::from_bytes(&[9, 1, 2]),
            Err(CodecError::UnsupportedVersion(9))
        ));
        assert!(matches!(CheckpointHandle::from_bytes(&[]), Err(CodecError::Empty)));
    }

    #[tokio::test]
    async fn detached_handle_cannot_be_saved() {
        let handle = CheckpointHandle::initial();

        assert!(matches!(handle.saved().await, Err(PaxosError::DetachedCheckpoint)));
    }
}
