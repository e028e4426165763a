//! What the translator needs to know about the running VM
//!
//! The translator never looks at VM data structures directly. Everything goes through the
//! `FrontEnd` trait: constant pool lookups, field and method resolution, class hierarchy queries,
//! and the few reads of live heap state (values of static final fields, method handle thunks).
//! Those heap reads are only possible through a `VmAccess` guard, which holds the VM access lock
//! for as long as it is alive.

mod vm;

pub use vm::*;

use crate::il::MethodKind;
use crate::jvm::{
    BinaryName, ConstantPool, FieldFacts, FieldType, MemberRef, MethodAccessFlags,
    MethodDescriptor, UnqualifiedName,
};
use parking_lot::MutexGuard;
use std::collections::{HashMap, HashSet};
use std::ops::Deref;

/// Field that resolved successfully
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedField {
    /// Class declaring the field (may be a superclass of the referenced class)
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub field_type: FieldType,
    pub is_static: bool,
    pub is_final: bool,
    pub is_volatile: bool,

    /// Has the declaring class finished its static initializer?
    pub class_initialized: bool,
}

/// Method that resolved successfully
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMethod {
    /// Class declaring the method (may be a superclass of the referenced class)
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    pub class_is_interface: bool,
    pub class_is_final: bool,
    pub vtable_slot: Option<u16>,
}

impl ResolvedMethod {
    /// Can calls to this method never be overridden?
    pub fn is_final(&self) -> bool {
        self.class_is_final
            || self
                .access_flags
                .intersects(MethodAccessFlags::FINAL | MethodAccessFlags::PRIVATE)
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }
}

/// Class that has been loaded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: BinaryName,
    pub is_interface: bool,
    pub is_final: bool,
    pub is_initialized: bool,
}

/// Snapshot of the field facts of one class
///
/// Taken once, at the start of translation, so that the answers cannot change under the
/// translator's feet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassLookahead {
    pub class: Option<BinaryName>,
    fields: HashMap<UnqualifiedName, FieldFacts>,
}

impl ClassLookahead {
    pub fn new(class: BinaryName) -> ClassLookahead {
        ClassLookahead {
            class: Some(class),
            fields: HashMap::new(),
        }
    }

    pub fn add_field(&mut self, name: UnqualifiedName, facts: FieldFacts) {
        self.fields.insert(name, facts);
    }

    fn facts(&self, class: &BinaryName, name: &UnqualifiedName) -> Option<&FieldFacts> {
        if self.class.as_ref() == Some(class) {
            self.fields.get(name)
        } else {
            None
        }
    }

    /// Is the field known to never hold `null`?
    pub fn is_non_null(&self, class: &BinaryName, name: &UnqualifiedName) -> bool {
        self.facts(class, name).map_or(false, |f| f.non_null)
    }

    /// Length of the array the field always holds, if known
    pub fn array_length(&self, class: &BinaryName, name: &UnqualifiedName) -> Option<i32> {
        self.facts(class, name).and_then(|f| f.array_length)
    }

    /// Exact class of the object the field always holds, if known
    pub fn exact_class(&self, class: &BinaryName, name: &UnqualifiedName) -> Option<&BinaryName> {
        self.facts(class, name).and_then(|f| f.exact_class.as_ref())
    }
}

/// What to do with an instruction the translator does not handle
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnknownByteCodeAction {
    /// Fail the compilation
    Abort,
    /// Skip the byte and carry on
    Ignore,
}

/// Value of a static field, as read from the heap
#[derive(Clone, Debug, PartialEq)]
pub enum StaticValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Null,
}

/// Live VM state that may only be read while holding VM access
#[derive(Default, Debug)]
pub struct Heap {
    statics: HashMap<(BinaryName, UnqualifiedName), StaticValue>,
    shareable_thunks: HashSet<u64>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap::default()
    }

    pub fn set_static(&mut self, class: BinaryName, name: UnqualifiedName, value: StaticValue) {
        self.statics.insert((class, name), value);
    }

    pub fn static_value(&self, class: &BinaryName, name: &UnqualifiedName) -> Option<&StaticValue> {
        self.statics.get(&(class.clone(), name.clone()))
    }

    /// Record that the thunk of a method handle may be shared between equivalent handles
    pub fn mark_thunk_shareable(&mut self, handle: u64) {
        self.shareable_thunks.insert(handle);
    }

    pub fn is_thunk_shareable(&self, handle: u64) -> bool {
        self.shareable_thunks.contains(&handle)
    }
}

/// Proof of holding VM access
///
/// Access is released when the guard is dropped, on every path out of the critical section.
pub struct VmAccess<'a> {
    heap: MutexGuard<'a, Heap>,
}

impl<'a> VmAccess<'a> {
    pub fn new(heap: MutexGuard<'a, Heap>) -> VmAccess<'a> {
        VmAccess { heap }
    }
}

impl<'a> Deref for VmAccess<'a> {
    type Target = Heap;

    fn deref(&self) -> &Heap {
        &self.heap
    }
}

/// Queries the translator makes of the VM
pub trait FrontEnd {
    /// Constant pool of a loaded class
    fn constant_pool(&self, class: &BinaryName) -> Option<&ConstantPool>;

    /// Information about a class, if it has been loaded
    fn class_info(&self, class: &BinaryName) -> Option<ClassInfo>;

    /// Resolve a field reference (`None` if resolution has to wait until runtime)
    fn resolve_field(&self, field: &MemberRef<FieldType>, is_static: bool)
        -> Option<ResolvedField>;

    /// Resolve a method reference (`None` if resolution has to wait until runtime)
    fn resolve_method(
        &self,
        method: &MemberRef<MethodDescriptor>,
        kind: MethodKind,
    ) -> Option<ResolvedMethod>;

    /// Find the implementation a virtual or interface call would dispatch to on an instance of
    /// exactly `receiver_class`
    fn find_implementation(
        &self,
        receiver_class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Option<ResolvedMethod>;

    /// Field facts of a class (`None` if no facts are available)
    fn class_lookahead(&self, class: &BinaryName) -> Option<ClassLookahead>;

    /// Enter the VM access critical section
    fn acquire_vm_access(&self) -> VmAccess<'_>;

    /// Decide what to do with an instruction the translator does not handle
    fn unknown_byte_code(&self, byte_code: u8, bc_index: usize) -> UnknownByteCodeAction;
}
