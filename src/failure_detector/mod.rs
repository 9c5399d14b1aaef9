mod detector;
mod heartbeater;
mod membership;

pub use detector::FailureDetector;
pub use detector::FailureDetectorError;
pub use detector::MemberInfo;
pub use detector::Members;

pub(crate) use heartbeater::HeartbeaterHandle;
pub(crate) use membership::Membership;
