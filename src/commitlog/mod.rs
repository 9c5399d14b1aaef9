mod in_memory;
mod log;

pub use in_memory::InMemoryLog;
pub use log::LogStorage;
pub use log::Offset;
