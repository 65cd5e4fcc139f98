//! Simple MockVM used in tests.

use crate::sync::monitor::MonitorRegistry;
use crate::threads::Threads;
use crate::VirtualMachine;

#[derive(Default)]
pub struct MockVM;

static THREADS: Threads = Threads::new();
static MONITORS: MonitorRegistry<MockVM> = MonitorRegistry::new();

impl VirtualMachine for MockVM {
    fn threads() -> &'static Threads {
        &THREADS
    }

    fn monitors() -> &'static MonitorRegistry<Self> {
        &MONITORS
    }
}
