pub mod fingerprint;
pub mod pool;

pub use fingerprint::Fingerprint;
pub use pool::{LeasedSession, SessionPool};
