mod acceptor_learner;
mod checkpoint;
mod recovery;
mod streamer;
mod watermark;

pub(crate) use acceptor_learner::AcceptorLearner;
pub(crate) use acceptor_learner::AcceptorLearnerConfig;
pub use checkpoint::CheckpointHandle;
pub use watermark::Watermark;
