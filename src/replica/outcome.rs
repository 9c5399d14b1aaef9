use crate::messages::{NodeId, Proposal, Round, SeqNum};

/// Why a vote ended, or what happened to the local acceptor/learner.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Outcome {
    Decision,
    OtherLeader,
    VoteTimeout,
    BadMembership,
    OutOfDate,
    UpToDate,
    /// A previously accepted value was driven to completion in place of the submitted one.
    OtherValue,
}

impl Outcome {
    /// Stable numeric code, for applications that persist or forward outcomes.
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Decision => 0,
            Outcome::OtherLeader => 1,
            Outcome::VoteTimeout => 2,
            Outcome::BadMembership => 3,
            Outcome::OutOfDate => 4,
            Outcome::UpToDate => 5,
            Outcome::OtherValue => 6,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VoteOutcome {
    pub outcome: Outcome,
    pub seq_num: SeqNum,
    pub round: Round,
    pub value: Proposal,
    /// The leader responsible for the outcome, when known.
    pub leader: Option<NodeId>,
}

impl VoteOutcome {
    pub(crate) fn new(
        outcome: Outcome,
        seq_num: SeqNum,
        round: Round,
        value: Proposal,
        leader: Option<NodeId>,
    ) -> Self {
        VoteOutcome {
            outcome,
            seq_num,
            round,
            value,
            leader,
        }
    }

    pub fn is_decision(&self) -> bool {
        self.outcome == Outcome::Decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn outcome_codes_are_distinct() {
        let all = [
            Outcome::Decision,
            Outcome::OtherLeader,
            Outcome::VoteTimeout,
            Outcome::BadMembership,
            Outcome::OutOfDate,
            Outcome::UpToDate,
            Outcome::OtherValue,
        ];

        let codes: HashSet<i32> = all.iter().map(Outcome::code).collect();
        assert_eq!(codes.len(), all.len());
    }
}
