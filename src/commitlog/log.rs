use bytes::Bytes;
use std::{fmt, io};

/// Offset is the position of a record in the log. Offsets are assigned in append order
/// starting from 0.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Offset(u64);

impl Offset {
    pub fn new(offset: u64) -> Self {
        Offset(offset)
    }

    pub fn start() -> Self {
        Offset(0)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LogStorage is the durable, append only record log owned by a replica's acceptor/learner.
///
/// The acceptor/learner is the only writer. Readers (recovery streaming) may replay the log
/// concurrently with appends, so implementations take `&self` and synchronize internally.
pub trait LogStorage: Send + Sync {
    fn open(&self) -> Result<(), io::Error>;

    fn close(&self) -> Result<(), io::Error>;

    /// put() appends a record and returns its offset. When `force` is set, the record must be
    /// durable before this returns.
    fn put(&self, record: Bytes, force: bool) -> Result<Offset, io::Error>;

    /// Read the record at `offset`, if it hasn't been discarded.
    fn get(&self, offset: Offset) -> Result<Option<Bytes>, io::Error>;

    /// Feed every retained record at or after `from` to `consumer`, in append order.
    fn replay(&self, from: Offset, consumer: &mut dyn FnMut(Offset, Bytes)) -> Result<(), io::Error>;

    /// Records a checkpoint at `offset`. Records before it are no longer needed and may be
    /// discarded.
    fn mark(&self, offset: Offset, force: bool) -> Result<(), io::Error>;
}
