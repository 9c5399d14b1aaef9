mod factory;
mod leader;

pub(crate) use factory::AcceptorView;
pub(crate) use factory::LeaderFactory;
pub(crate) use leader::LeaderContext;
