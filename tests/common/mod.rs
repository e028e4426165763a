//! Shared setup for the integration tests: a one-class VM and a method builder

#![allow(dead_code)]

use jbc2il::frontend::{JavaVm, UnknownByteCodeAction};
use jbc2il::il::{BlockId, ILOpCode, MethodIl};
use jbc2il::ilgen::{generate_il, Error, MethodDetails, TranslatorConfig};
use jbc2il::jvm::{
    BinaryName, ClassAccessFlags, ClassData, ClassGraph, ClassGraphArenas, Code, ConstantPool,
    ExceptionHandler, Method, MethodAccessFlags, MethodDescriptor, Name, ParseDescriptor,
    UnqualifiedName,
};

pub struct TestMethod {
    pub method: Method,
    pub pool: ConstantPool,
    pub details: MethodDetails,
    pub config: TranslatorConfig,
    pub unknown_byte_codes: UnknownByteCodeAction,
}

impl TestMethod {
    pub fn new(class: &str, descriptor: &str, is_static: bool, code: &[u8]) -> TestMethod {
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        let mut access_flags = MethodAccessFlags::PUBLIC;
        if is_static {
            access_flags |= MethodAccessFlags::STATIC;
        }
        let max_locals = descriptor.parameter_length(!is_static) as u16 + 4;
        TestMethod {
            method: Method {
                class: BinaryName::from_string(class.to_owned()).unwrap(),
                class_is_interface: false,
                name: UnqualifiedName::from_string("run".to_owned()).unwrap(),
                descriptor,
                access_flags,
                code: Code {
                    max_stack: 8,
                    max_locals,
                    bytes: code.to_vec(),
                    exception_table: vec![],
                },
            },
            pool: ConstantPool::new(),
            details: MethodDetails::Ordinary,
            config: TranslatorConfig::new(),
            unknown_byte_codes: UnknownByteCodeAction::Abort,
        }
    }

    /// Static method of `Test`
    pub fn of_static(descriptor: &str, code: &[u8]) -> TestMethod {
        TestMethod::new("Test", descriptor, true, code)
    }

    pub fn access(mut self, flags: MethodAccessFlags) -> TestMethod {
        self.method.access_flags |= flags;
        self
    }

    pub fn handler(mut self, start_pc: usize, end_pc: usize, handler_pc: usize) -> TestMethod {
        self.method.code.exception_table.push(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type: None,
        });
        self
    }

    pub fn translate(&self) -> Result<MethodIl, Error> {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let object = graph.add_class(ClassData::new(
            BinaryName::OBJECT,
            None,
            ClassAccessFlags::PUBLIC,
        ));
        object.initialized.set(true);
        let mut class = ClassData::new(
            self.method.class.clone(),
            Some(object),
            ClassAccessFlags::PUBLIC,
        );
        class.constant_pool = self.pool.clone();
        let class = graph.add_class(class);
        class.initialized.set(true);

        let mut vm = JavaVm::new(&graph);
        vm.set_unknown_byte_code_action(self.unknown_byte_codes);
        generate_il(&self.method, &self.details, &vm, &self.config)
    }
}

/// Opcodes of the tree roots of a block
pub fn root_ops(il: &MethodIl, block: BlockId) -> Vec<ILOpCode> {
    il.tree_nodes(block)
        .iter()
        .map(|root| il.nodes[*root].op())
        .collect()
}
