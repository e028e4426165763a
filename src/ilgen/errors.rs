use crate::jvm::{ByteCode, ConstantIndex};

/// Reasons IL generation for a method can fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Bug in the translator, or bytecode that should never have passed verification
    Internal(InternalError),

    /// Construct that cannot be compiled under the current configuration
    Aborted(CompilationAbort),
}

impl Error {
    /// Could compiling the same method under other constraints (another optimization level, no
    /// ahead-of-time relocation, ...) succeed?
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    /// Popped an empty operand stack
    StackUnderflow,

    /// Walked into a bytecode index that has already been generated
    RegeneratedBlock(usize),

    /// Branch to an offset that is not the start of an instruction (or has no block)
    MissingBranchTarget(usize),

    /// Predecessors of the block at this offset disagree on the operand stack shape
    InconsistentStackShape(usize),

    /// Execution can run past the last instruction
    FellOffEnd(usize),

    /// Instruction at this offset could not be decoded
    MalformedByteCode(usize),

    MissingConstant(ConstantIndex),

    /// Constant pool entry has the wrong kind for the instruction using it
    UnexpectedConstant(ConstantIndex),

    BadDescriptor(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilationAbort {
    /// The front end refused an instruction the translator does not handle
    UnknownByteCode { byte_code: u8, bc_index: usize },

    AotHasInvokeHandle,
    AotHasInvokeDynamic,
    FsdHasInvokeHandle,
    AotHasInvokeSpecialInInterface,

    /// Lambda form methods may only be compiled at the highest optimization level
    LambdaFormMustBeScorching,

    /// The target can't execute this instruction (eg. floating point without an FPU)
    UnimplementedOpcode(ByteCode),
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Error {
        Error::Internal(err)
    }
}

impl From<CompilationAbort> for Error {
    fn from(err: CompilationAbort) -> Error {
        Error::Aborted(err)
    }
}
