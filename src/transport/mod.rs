mod in_memory;
#[cfg(test)]
mod test_utils;
mod transport;

pub use in_memory::LocalNetwork;
pub use in_memory::LocalTransport;
pub use transport::Destination;
pub use transport::Stream;
pub use transport::Transport;

#[cfg(test)]
pub(crate) use test_utils::RecordingTransport;
