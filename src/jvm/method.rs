use super::{BinaryName, ConstantIndex, MethodAccessFlags, MethodDescriptor, UnqualifiedName};

/// Method whose bytecode is being translated
#[derive(Debug, Clone)]
pub struct Method {
    /// Class declaring the method
    pub class: BinaryName,

    /// Whether the declaring class is an interface
    pub class_is_interface: bool,

    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    pub code: Code,
}

/// `Code` attribute of a method
#[derive(Debug, Clone, Default)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytes: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
}

/// Entry in the exception table
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive)
    pub start_pc: usize,

    /// End of the protected range (exclusive)
    pub end_pc: usize,

    /// Start of the handler
    pub handler_pc: usize,

    /// Class of exceptions caught (`None` catches everything)
    pub catch_type: Option<ConstantIndex>,
}

impl ExceptionHandler {
    /// Whether the bytecode offset lies in the protected range
    pub fn covers(&self, bc_index: usize) -> bool {
        self.start_pc <= bc_index && bc_index < self.end_pc
    }
}

impl Method {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_synchronized(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SYNCHRONIZED)
    }

    /// Number of local variable slots taken by the parameters (including `this`)
    pub fn parameter_slots(&self) -> usize {
        self.descriptor.parameter_length(!self.is_static())
    }
}
