//! Mock collaborators for tests: a heap backed [`mock_platform::MockPlatform`], a simple object
//! format, and mark and copy pools on top of it. The mutator helpers here stand in for the
//! loads and stores of a real mutator, delivering a protection fault whenever the mock
//! platform says the access would trap.

use crate::arena::Arena;
use crate::util::{Address, ObjectReference};
use crate::vm::{AccessSet, FaultDisposition, FaultHandler};
use lazy_static::lazy_static;
use mock_format::MockFormat;
use mock_platform::MockPlatform;
use std::panic;
use std::sync::Mutex;

pub mod fixtures;
pub mod mock_format;
pub mod mock_platform;
pub mod mock_pool;

lazy_static! {
    // A global lock to make tests serial.
    // If we do want more parallelism, we can allow each set of tests to have their own locks. But it seems unnecessary for now.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

// force some tests to be executed serially
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // If one test fails, the lock will become poisoned. We would want to continue for other tests anyway.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

// Always execute a cleanup closure no matter the test panics or not.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}

/// Deliver a fault for `access` to `addr` if the mock platform would trap it. Returns whether a
/// fault was delivered.
pub fn touch(arena: &mut Arena, addr: Address, access: AccessSet) -> bool {
    let denied = arena
        .platform::<MockPlatform>()
        .is_some_and(|p| p.denies(addr, access));
    if denied {
        let disposition = arena.handle_fault(addr, access).unwrap();
        assert_eq!(disposition, FaultDisposition::Handled);
        assert!(
            !arena.platform::<MockPlatform>().unwrap().denies(addr, access),
            "{} is still protected after the fault",
            addr
        );
    }
    denied
}

/// Load a reference from `slot` as the mutator.
pub fn read_slot(arena: &mut Arena, slot: Address) -> ObjectReference {
    touch(arena, slot, AccessSet::READ);
    ObjectReference::from_raw_address(unsafe { slot.load::<Address>() })
}

/// Store a reference to `slot` as the mutator.
pub fn write_slot(arena: &mut Arena, slot: Address, value: ObjectReference) {
    touch(arena, slot, AccessSet::WRITE);
    unsafe { slot.store(value.to_raw_address()) };
}

pub fn get_field(arena: &mut Arena, object: ObjectReference, index: usize) -> ObjectReference {
    read_slot(arena, MockFormat::field_slot(object, index))
}

pub fn set_field(arena: &mut Arena, object: ObjectReference, index: usize, value: ObjectReference) {
    write_slot(arena, MockFormat::field_slot(object, index), value)
}
