use crate::util::{Address, ObjectReference};
use crate::vm::SlotVisitor;

/// The object format of a pool, supplied by the embedding.
///
/// The engine never looks inside an object. Pools use a format to walk the objects in a
/// segment, report the reference slots of an object, and relocate objects. An object
/// reference is the address of the first byte of the object.
pub trait Format: Send {
    /// Report the address of every reference slot of `object` to `visitor`. A slot holds the raw
    /// word of an [`ObjectReference`], zero being null.
    fn scan(&self, object: ObjectReference, visitor: &mut dyn SlotVisitor);

    /// The address just past `object`. This is where the next object in a segment starts.
    fn skip(&self, object: ObjectReference) -> Address;

    /// If `object` has been moved, return its new location.
    fn is_forwarded(&self, object: ObjectReference) -> Option<ObjectReference>;

    /// Overwrite `old` so that [`Format::is_forwarded`] returns `new` for it. The object must
    /// have been copied already.
    fn forward(&self, old: ObjectReference, new: ObjectReference);

    /// Copy `object` to `to`, which has room for `skip(object) - object`, and return the copy.
    fn copy(&self, object: ObjectReference, to: Address) -> ObjectReference;

    /// Fill `[addr, addr + size)` with a padding object that `skip` steps over and `scan`
    /// reports no slots for.
    fn pad(&self, addr: Address, size: usize);

    /// Is `object` a padding object?
    fn is_pad(&self, object: ObjectReference) -> bool;
}

/// Call `f` for every object that is not padding in `[base, limit)`.
pub fn walk_objects<F: FnMut(ObjectReference)>(
    format: &dyn Format,
    base: Address,
    limit: Address,
    mut f: F,
) {
    let mut cursor = base;
    while cursor < limit {
        let object = ObjectReference::from_raw_address(cursor);
        let next = format.skip(object);
        debug_assert!(next > cursor, "object at {} has no size", cursor);
        if !format.is_pad(object) {
            f(object);
        }
        cursor = next;
    }
}
