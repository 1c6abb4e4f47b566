pub mod classifier;
pub mod notify;
pub mod pool;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use classifier::{classify, ErrorClassifier};
pub use notify::{Notifier, TerminalBell};
pub use pool::{spawn_idle_reaper, SessionPool};
pub use session::{Session, SessionSettings};
