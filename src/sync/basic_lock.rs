use std::mem::offset_of;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::objectmodel::reference::ObjectReference;

/// One synchronized-region slot embedded in an interpreter or compiled
/// frame. The slot records the object a frame has entered so the collector
/// can treat thin-locked objects as roots; an empty slot holds zero.
#[repr(C)]
pub struct BasicObjectLock {
    obj: AtomicUsize,
}

impl BasicObjectLock {
    pub const OBJ_OFFSET: usize = offset_of!(Self, obj);

    pub const fn new() -> Self {
        Self {
            obj: AtomicUsize::new(0),
        }
    }

    pub fn object(&self) -> Option<ObjectReference> {
        ObjectReference::from_address(self.obj.load(Ordering::Relaxed))
    }

    pub fn set_object(&self, object: Option<ObjectReference>) {
        self.obj.store(
            object.map_or(0, ObjectReference::to_address),
            Ordering::Relaxed,
        );
    }
}

impl Default for BasicObjectLock {
    fn default() -> Self {
        Self::new()
    }
}

/// View of one stack frame's monitor slots, handed to the monitor
/// subsystem by whoever walks the stack.
pub struct StackFrame<'a> {
    lock_records: &'a [BasicObjectLock],
}

impl<'a> StackFrame<'a> {
    pub fn new(lock_records: &'a [BasicObjectLock]) -> Self {
        Self { lock_records }
    }
}

/// Calls `callback` for every object the frame currently holds locked.
/// Used for GC root enumeration of locks that are held but not (yet)
/// represented by an inflated monitor.
pub fn visit_held_locks(frame: &StackFrame<'_>, mut callback: impl FnMut(ObjectReference)) {
    for record in frame.lock_records {
        if let Some(object) = record.object() {
            callback(object);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectmodel::header::HeapObjectHeader;

    #[test]
    fn visits_only_occupied_slots() {
        let a = HeapObjectHeader::new();
        let b = HeapObjectHeader::new();
        let records = [
            BasicObjectLock::new(),
            BasicObjectLock::new(),
            BasicObjectLock::new(),
        ];
        records[0].set_object(Some(ObjectReference::from_header(&a)));
        records[2].set_object(Some(ObjectReference::from_header(&b)));

        let mut seen = Vec::new();
        visit_held_locks(&StackFrame::new(&records), |object| seen.push(object));
        assert_eq!(
            seen,
            vec![
                ObjectReference::from_header(&a),
                ObjectReference::from_header(&b)
            ]
        );

        records[0].set_object(None);
        let mut seen = Vec::new();
        visit_held_locks(&StackFrame::new(&records), |object| seen.push(object));
        assert_eq!(seen, vec![ObjectReference::from_header(&b)]);
    }
}
