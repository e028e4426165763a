use crate::jvm::FieldType;

/// Which flavour of a method is being compiled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MethodDetails {
    /// Plain compilation of the method's bytecode
    Ordinary,

    /// Method handle archetype specialized for a particular argument list
    ///
    /// Loading the `int` local at `placeholder_slot` produces a placeholder standing for every
    /// one of the `parameters`, which are passed in consecutive local slots starting at
    /// `placeholder_slot`.
    ArchetypeSpecimen {
        placeholder_slot: u16,
        parameters: Vec<FieldType>,
    },

    /// Thunk for one method handle (`handle` identifies the handle object)
    MethodHandleThunk { handle: u64, custom: bool },

    /// Body entered from the interpreter in the middle of a loop
    DltInProgress { bc_index: usize },
}

impl MethodDetails {
    pub fn is_archetype_specimen(&self) -> bool {
        matches!(self, MethodDetails::ArchetypeSpecimen { .. })
    }
}

impl Default for MethodDetails {
    fn default() -> Self {
        MethodDetails::Ordinary
    }
}
