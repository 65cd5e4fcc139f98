//! Per-object monitors for managed-object runtimes.
//!
//! Every managed object doubles as a mutual-exclusion lock and as a
//! condition variable with wait/notify semantics; language-level
//! `synchronized` blocks and `wait`/`notify`/`notifyAll` lower onto the
//! operations in [`sync::monitor`]. Lock state is kept thin — owner id and
//! recursion count packed into the object's header word — until contention
//! or a `wait` inflates it into a heap-allocated [`sync::Monitor`], and the
//! [`sync::MonitorRegistry`] gives the garbage collector a way to sweep
//! monitors of dead objects and fix back-references after relocation.
//!
//! The embedding runtime supplies its side of the contract through the
//! [`VirtualMachine`] trait and the [`threads::Threads`] registry; the
//! [`mock`] module carries a trivial binding used by the tests.

pub mod errors;
pub mod mock;
pub mod objectmodel;
pub mod options;
pub mod sync;
pub mod threads;

pub use errors::MonitorError;
pub use objectmodel::{HeapObjectHeader, ObjectReference};
pub use sync::monitor::LockSite;
pub use sync::{LockState, LockWord, Monitor, MonitorInfo, MonitorRegistry};
pub use threads::{Thread, ThreadId, ThreadState, Threads, INVALID_THREAD_ID};

/// The runtime binding: everything the monitor subsystem consumes from the
/// rest of a virtual machine.
pub trait VirtualMachine: 'static + Send + Sync + Sized {
    /// The process-wide thread registry, used to find thin-lock owners and
    /// to suspend them for inflation.
    fn threads() -> &'static Threads;

    /// The registry of inflated monitors. Owned by this subsystem but
    /// published here so the collector can reach `disallow_new`,
    /// `allow_new` and `sweep`.
    fn monitors() -> &'static MonitorRegistry<Self>;

    /// Human-readable description of an object for diagnostics and error
    /// messages; a runtime typically prints the object's type here.
    fn describe_object(object: ObjectReference) -> String {
        format!("object@{:#x}", object.to_address())
    }

    /// The method and bytecode offset `thread` is executing, recorded as
    /// the lock site when lock profiling is enabled. `thread` is either
    /// the calling thread or one the caller has suspended.
    fn current_location(thread: &Thread) -> Option<LockSite> {
        let _ = thread;
        None
    }
}
