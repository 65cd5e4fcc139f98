pub mod basic_lock;
pub mod lock_word;
pub mod monitor;

pub use basic_lock::{visit_held_locks, BasicObjectLock, StackFrame};
pub use lock_word::{LockState, LockWord};
pub use monitor::{Monitor, MonitorInfo, MonitorRegistry};
