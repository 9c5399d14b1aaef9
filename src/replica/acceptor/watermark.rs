use crate::commitlog::Offset;
use crate::messages::{SeqNum, UNKNOWN_SEQ};

/// Watermark is the highest sequence number for which this replica has a contiguous run of
/// decisions, plus where the decision record for it sits in the local log.
///
/// The offset is local to this replica's log. It's `None` before the first decision, and after
/// adopting another replica's checkpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Watermark {
    pub seq_num: SeqNum,
    pub log_offset: Option<Offset>,
}

impl Watermark {
    pub fn initial() -> Self {
        Watermark {
            seq_num: UNKNOWN_SEQ,
            log_offset: None,
        }
    }

    pub(crate) fn new(seq_num: SeqNum, log_offset: Offset) -> Self {
        Watermark {
            seq_num,
            log_offset: Some(log_offset),
        }
    }

    pub(crate) fn without_offset(seq_num: SeqNum) -> Self {
        Watermark {
            seq_num,
            log_offset: None,
        }
    }
}
