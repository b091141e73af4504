use crate::util::constants::BYTES_IN_WORD;
use crate::util::{Address, ObjectReference};
use crate::vm::{Format, SlotVisitor};

const FORWARDED: usize = 0b01;
const PAD: usize = 0b10;
const FLAG_BITS: usize = 2;

/// A simple object format. The first word of an object is a header holding the size of the
/// object in words and two flags. Every other word is a reference slot. A forwarded object
/// keeps its header and stores the new location in its first slot.
#[derive(Copy, Clone, Debug, Default)]
pub struct MockFormat;

impl MockFormat {
    /// Objects have room for a forwarding address.
    pub const MIN_WORDS: usize = 2;

    /// The size of an object with `fields` reference slots.
    pub const fn object_size(fields: usize) -> usize {
        let words = fields + 1;
        if words < Self::MIN_WORDS {
            Self::MIN_WORDS * BYTES_IN_WORD
        } else {
            words * BYTES_IN_WORD
        }
    }

    fn header(object: ObjectReference) -> usize {
        unsafe { object.to_raw_address().load::<usize>() }
    }

    fn set_header(addr: Address, words: usize, flags: usize) {
        unsafe { addr.store::<usize>((words << FLAG_BITS) | flags) }
    }

    /// Lay out an object of `size` bytes at `addr` with every slot null.
    pub fn init(addr: Address, size: usize) -> ObjectReference {
        debug_assert!(size >= Self::MIN_WORDS * BYTES_IN_WORD && size % BYTES_IN_WORD == 0);
        let words = size / BYTES_IN_WORD;
        Self::set_header(addr, words, 0);
        for i in 1..words {
            unsafe { (addr + i * BYTES_IN_WORD).store::<usize>(0) };
        }
        ObjectReference::from_raw_address(addr)
    }

    pub fn size(object: ObjectReference) -> usize {
        (Self::header(object) >> FLAG_BITS) * BYTES_IN_WORD
    }

    pub fn fields(object: ObjectReference) -> usize {
        Self::size(object) / BYTES_IN_WORD - 1
    }

    pub fn field_slot(object: ObjectReference, index: usize) -> Address {
        object.to_raw_address() + (index + 1) * BYTES_IN_WORD
    }
}

impl Format for MockFormat {
    fn scan(&self, object: ObjectReference, visitor: &mut dyn SlotVisitor) {
        if Self::header(object) & (FORWARDED | PAD) != 0 {
            return;
        }
        for i in 0..Self::fields(object) {
            visitor.visit_slot(Self::field_slot(object, i));
        }
    }

    fn skip(&self, object: ObjectReference) -> Address {
        object.to_raw_address() + Self::size(object)
    }

    fn is_forwarded(&self, object: ObjectReference) -> Option<ObjectReference> {
        if Self::header(object) & FORWARDED != 0 {
            let to = unsafe { Self::field_slot(object, 0).load::<Address>() };
            Some(ObjectReference::from_raw_address(to))
        } else {
            None
        }
    }

    fn forward(&self, old: ObjectReference, new: ObjectReference) {
        let words = Self::size(old) / BYTES_IN_WORD;
        Self::set_header(old.to_raw_address(), words, FORWARDED);
        unsafe { Self::field_slot(old, 0).store(new.to_raw_address()) };
    }

    fn copy(&self, object: ObjectReference, to: Address) -> ObjectReference {
        let size = Self::size(object);
        unsafe {
            std::ptr::copy_nonoverlapping(
                object.to_raw_address().to_ptr::<u8>(),
                to.to_mut_ptr::<u8>(),
                size,
            )
        };
        ObjectReference::from_raw_address(to)
    }

    fn pad(&self, addr: Address, size: usize) {
        Self::set_header(addr, size / BYTES_IN_WORD, PAD);
    }

    fn is_pad(&self, object: ObjectReference) -> bool {
        Self::header(object) & PAD != 0
    }
}
