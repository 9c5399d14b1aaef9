//! This mod is meant to hold most of the code for the library's client-facing API.
mod client;
mod options;
mod outcome_stream;
mod wiring;

pub use client::PaxosClient;
pub use options::PaxosOptions;
pub use outcome_stream::OutcomeStream;
pub use wiring::try_create_paxos_client;
pub use wiring::PaxosClientConfig;
pub use wiring::PaxosClientCreationError;

// So the acceptor/learner can publish outcomes.
pub(crate) use outcome_stream::OutcomePublisher;
