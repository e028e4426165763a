//! Helpers for building methods and VMs in unit tests

use super::{generate_il, Error, MethodDetails, TranslatorConfig};
use crate::frontend::{Heap, JavaVm};
use crate::il::MethodIl;
use crate::jvm::{
    BinaryName, ClassAccessFlags, ClassData, ClassGraph, ClassGraphArenas, Code, ConstantPool,
    ExceptionHandler, Method, MethodAccessFlags, MethodData, MethodDescriptor, Name,
    ParseDescriptor, UnqualifiedName,
};

pub(crate) fn test_class_name() -> BinaryName {
    BinaryName::from_string("Test".to_owned()).unwrap()
}

/// Builder for a method of the class `Test`
pub(crate) struct MethodBuilder {
    method: Method,
}

impl MethodBuilder {
    pub(crate) fn new(descriptor: &str, is_static: bool) -> MethodBuilder {
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        let mut access_flags = MethodAccessFlags::PUBLIC;
        if is_static {
            access_flags |= MethodAccessFlags::STATIC;
        }
        let max_locals = descriptor.parameter_length(!is_static) as u16 + 8;
        MethodBuilder {
            method: Method {
                class: test_class_name(),
                class_is_interface: false,
                name: name("test"),
                descriptor,
                access_flags,
                code: Code {
                    max_stack: 16,
                    max_locals,
                    bytes: vec![],
                    exception_table: vec![],
                },
            },
        }
    }

    pub(crate) fn code(mut self, bytes: &[u8]) -> MethodBuilder {
        self.method.code.bytes = bytes.to_vec();
        self
    }

    /// Add access flags (on top of `public` and, maybe, `static`)
    pub(crate) fn access(mut self, flags: MethodAccessFlags) -> MethodBuilder {
        self.method.access_flags |= flags;
        self
    }

    pub(crate) fn handler(mut self, handler: ExceptionHandler) -> MethodBuilder {
        self.method.code.exception_table.push(handler);
        self
    }

    /// Make `Test` an interface
    pub(crate) fn interface(mut self) -> MethodBuilder {
        self.method.class_is_interface = true;
        self
    }

    pub(crate) fn build(self) -> Method {
        self.method
    }
}

/// Run `body` against a VM whose class graph was filled in by `setup`
pub(crate) fn with_vm<S, B, R>(setup: S, body: B) -> R
where
    S: for<'g> FnOnce(&'g ClassGraph<'g>),
    B: FnOnce(&JavaVm<'_>) -> R,
{
    with_vm_and_heap(setup, Heap::new(), body)
}

/// Same as `with_vm`, but with static field values already in the heap
pub(crate) fn with_vm_and_heap<S, B, R>(setup: S, heap: Heap, body: B) -> R
where
    S: for<'g> FnOnce(&'g ClassGraph<'g>),
    B: FnOnce(&JavaVm<'_>) -> R,
{
    let arenas = ClassGraphArenas::new();
    let graph = ClassGraph::new(&arenas);
    setup(&graph);
    let vm = JavaVm::with_heap(&graph, heap);
    body(&vm)
}

pub(crate) fn name(name: &str) -> UnqualifiedName {
    UnqualifiedName::from_string(name.to_owned()).unwrap()
}

/// Add `java/lang/Object` (if missing) and an initialized class `Test` using `pool`
pub(crate) fn add_test_class<'g>(
    graph: &'g ClassGraph<'g>,
    pool: ConstantPool,
    access_flags: ClassAccessFlags,
) -> &'g ClassData<'g> {
    let object = match graph.lookup_class(&BinaryName::OBJECT) {
        Some(object) => object,
        None => graph.add_class(ClassData::new(
            BinaryName::OBJECT,
            None,
            ClassAccessFlags::PUBLIC,
        )),
    };
    let mut class = ClassData::new(test_class_name(), Some(object), access_flags);
    class.constant_pool = pool;
    let class = graph.add_class(class);
    class.initialized.set(true);
    class
}

/// Generate IL for a method that uses no constants
pub(crate) fn generate(method: &Method) -> Result<MethodIl, Error> {
    generate_with(
        method,
        ConstantPool::new(),
        &MethodDetails::Ordinary,
        &TranslatorConfig::new(),
    )
}

pub(crate) fn generate_with(
    method: &Method,
    pool: ConstantPool,
    details: &MethodDetails,
    config: &TranslatorConfig,
) -> Result<MethodIl, Error> {
    generate_in(method, pool, details, config, Heap::new(), |_| {})
}

/// Generate IL with more classes (added by `setup`, after `Test`) and a prepared heap
pub(crate) fn generate_in<S>(
    method: &Method,
    pool: ConstantPool,
    details: &MethodDetails,
    config: &TranslatorConfig,
    heap: Heap,
    setup: S,
) -> Result<MethodIl, Error>
where
    S: for<'g> FnOnce(&'g ClassGraph<'g>),
{
    let access_flags = if method.class_is_interface {
        ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT
    } else {
        ClassAccessFlags::PUBLIC
    };
    with_vm_and_heap(
        move |graph| {
            add_test_class(graph, pool, access_flags);
            setup(graph);
        },
        heap,
        |vm| generate_il(method, details, vm, config),
    )
}

/// Add an initialized class extending `java/lang/Object` (which must already be there)
pub(crate) fn add_class<'g>(
    graph: &'g ClassGraph<'g>,
    class: &BinaryName,
    access_flags: ClassAccessFlags,
) -> &'g ClassData<'g> {
    let object = graph.lookup_class(&BinaryName::OBJECT);
    let class = graph.add_class(ClassData::new(class.clone(), object, access_flags));
    class.initialized.set(true);
    class
}

pub(crate) fn add_method<'g>(
    graph: &'g ClassGraph<'g>,
    class: &'g ClassData<'g>,
    name: &UnqualifiedName,
    descriptor: &str,
    access_flags: MethodAccessFlags,
) -> &'g MethodData<'g> {
    let vtable_slot = if access_flags.intersects(MethodAccessFlags::STATIC | MethodAccessFlags::PRIVATE) {
        None
    } else {
        Some(class.methods.len() as u16)
    };
    graph.add_method(MethodData {
        class,
        name: name.clone(),
        descriptor: MethodDescriptor::parse(descriptor).unwrap(),
        access_flags,
        vtable_slot,
    })
}
