use crate::util::{Address, ObjectReference};
use downcast_rs::{impl_downcast, Downcast};

/// Callback trait of scanning functions that report reference slots.
pub trait SlotVisitor {
    /// Call this function for each slot.
    fn visit_slot(&mut self, slot: Address);
}

/// This lets us use closures as SlotVisitor.
impl<F: FnMut(Address)> SlotVisitor for F {
    fn visit_slot(&mut self, slot: Address) {
        self(slot)
    }
}

/// Callback trait of scanning functions that directly trace through references.
pub trait ObjectTracer {
    /// Call this function for the content of each reference,
    /// and assign the returned value back to the reference.
    fn trace_object(&mut self, object: ObjectReference) -> ObjectReference;
}

/// This lets us use closures as ObjectTracer.
impl<F: FnMut(ObjectReference) -> ObjectReference> ObjectTracer for F {
    fn trace_object(&mut self, object: ObjectReference) -> ObjectReference {
        self(object)
    }
}

/// A set of references held outside managed memory: registers, stacks, globals.
///
/// The arena scans every root when a trace flips. A root must pass each reference it holds to
/// the tracer and store the returned reference back, since the referent may have moved.
pub trait Root: Downcast + Send {
    fn scan(&mut self, tracer: &mut dyn ObjectTracer);
}

impl_downcast!(Root);

/// A root that is a table of references.
#[derive(Default, Debug, Clone)]
pub struct TableRoot {
    refs: Vec<ObjectReference>,
}

impl TableRoot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refs(refs: Vec<ObjectReference>) -> Self {
        TableRoot { refs }
    }

    pub fn push(&mut self, object: ObjectReference) -> usize {
        self.refs.push(object);
        self.refs.len() - 1
    }

    pub fn get(&self, index: usize) -> ObjectReference {
        self.refs[index]
    }

    pub fn set(&mut self, index: usize, object: ObjectReference) {
        self.refs[index] = object;
    }

    pub fn refs(&self) -> &[ObjectReference] {
        &self.refs
    }

    pub fn clear(&mut self) {
        self.refs.clear();
    }
}

impl Root for TableRoot {
    fn scan(&mut self, tracer: &mut dyn ObjectTracer) {
        for r in self.refs.iter_mut() {
            if !r.is_null() {
                *r = tracer.trace_object(*r);
            }
        }
    }
}
