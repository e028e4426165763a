use super::DataType;
use crate::jvm::{
    BinaryName, ConstantIndex, FieldType, MethodDescriptor, Name, RefType, RenderDescriptor,
    UnqualifiedName,
};
use std::collections::HashMap;
use std::fmt;
use std::ops::Index;

/// Handle to an interned symbol reference
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SymRefId(pub u32);

impl fmt::Display for SymRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a method symbol gets called
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum MethodKind {
    Static,
    Special,
    Virtual,
    Interface,
    /// Signature-polymorphic call through a `MethodHandle` (`invokeExact` and friends)
    Computed,
}

/// Runtime helpers the generated IL calls
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Helper {
    /// Throws `IncompatibleClassChangeError` for a receiver failing an inserted type test
    ThrowIncompatibleClassChange,
    /// Marks a point where execution may transition to the interpreter
    PotentialOsrPoint,
    /// Polls for asynchronous events (eg. thread suspension) on back edges
    AsyncCheck,
    /// Throws `WrongMethodTypeException` for a method handle whose type differs from its call
    /// site's
    MethodHandleTypeMismatch,
}

/// What a symbol reference refers to
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Symbol {
    /// Incoming parameter in local variable slot `slot`
    Parm { slot: u16, data_type: DataType },
    /// Local variable that isn't a parameter
    Auto { slot: u16, data_type: DataType },
    /// Value carried on the operand stack across a block boundary or OSR point
    PendingPush { slot: u16, data_type: DataType },
    /// Temporary introduced by the translator
    Temp { index: u16, data_type: DataType },
    StaticField {
        class: BinaryName,
        name: UnqualifiedName,
        field_type: FieldType,
    },
    InstanceField {
        class: BinaryName,
        name: UnqualifiedName,
        field_type: FieldType,
    },
    Method {
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        kind: MethodKind,
    },
    /// Class object (used with `loadaddr`)
    Class(RefType),
    StringConstant(ConstantIndex),
    MethodTypeConstant(ConstantIndex),
    MethodHandleConstant(ConstantIndex),
    /// Method type a signature-polymorphic call site expects, from the method type table
    MethodTypeTableEntry(ConstantIndex),
    /// Entry of the call site table holding an `invokedynamic`'s bound method handle
    CallSiteTableEntry(u16),
    /// Memory of all array elements of one type
    ArrayShadow(DataType),
    /// Virtual function table pointer in an object header
    Vft,
    /// `type` field of a `java/lang/invoke/MethodHandle`
    MethodHandleType,
    /// `thunks` field of a `java/lang/invoke/MethodHandle`
    MethodHandleThunks,
    /// Compiled entry point of a thunk tuple's `invokeExact` thunk
    InvokeExactTargetAddress,
    /// `java/lang/Class` instance of a class
    JavaLangClassFromClass,
    /// Exception caught by a handler
    ExceptionObject,
    /// Buffer of interpreter locals handed over on a dynamic loop transfer
    DltBlock,
    /// Slot within the dynamic loop transfer buffer: locals first, then the operand stack
    /// (so slots go past the `u16` range of local variable indices)
    DltSlot { slot: u32, data_type: DataType },
    Helper(Helper),
    /// Archetype argument list that has not been expanded yet
    Placeholder { parameters: Vec<FieldType> },
}

/// Symbol together with how it is referenced
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SymbolReference {
    pub symbol: Symbol,

    /// Constant pool entry the reference came from
    pub cp_index: Option<ConstantIndex>,

    /// Whether the entry still needs to be resolved at runtime
    pub unresolved: bool,
}

impl SymbolReference {
    pub fn new(symbol: Symbol) -> SymbolReference {
        SymbolReference {
            symbol,
            cp_index: None,
            unresolved: false,
        }
    }
}

/// Interned table of every symbol reference used by the generated IL
#[derive(Default, Debug)]
pub struct SymbolReferenceTable {
    refs: Vec<SymbolReference>,
    interned: HashMap<SymbolReference, SymRefId>,
}

impl SymbolReferenceTable {
    pub fn new() -> SymbolReferenceTable {
        SymbolReferenceTable::default()
    }

    /// Get the handle of a symbol reference, creating it if needed
    pub fn find_or_create(&mut self, symref: SymbolReference) -> SymRefId {
        if let Some(id) = self.interned.get(&symref) {
            return *id;
        }
        let id = SymRefId(self.refs.len() as u32);
        self.refs.push(symref.clone());
        self.interned.insert(symref, id);
        id
    }

    /// Shorthand for resolved symbols not tied to a constant pool entry
    pub fn find_or_create_symbol(&mut self, symbol: Symbol) -> SymRefId {
        self.find_or_create(SymbolReference::new(symbol))
    }

    pub fn pending_push(&mut self, slot: u16, data_type: DataType) -> SymRefId {
        self.find_or_create_symbol(Symbol::PendingPush { slot, data_type })
    }

    pub fn get(&self, id: SymRefId) -> &SymbolReference {
        &self.refs[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymRefId, &SymbolReference)> {
        self.refs
            .iter()
            .enumerate()
            .map(|(idx, symref)| (SymRefId(idx as u32), symref))
    }
}

impl Index<SymRefId> for SymbolReferenceTable {
    type Output = SymbolReference;

    fn index(&self, id: SymRefId) -> &SymbolReference {
        self.get(id)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Parm { slot, data_type } => write!(f, "<parm {} {:?}>", slot, data_type),
            Symbol::Auto { slot, data_type } => write!(f, "<auto {} {:?}>", slot, data_type),
            Symbol::PendingPush { slot, data_type } => {
                write!(f, "<pending push {} {:?}>", slot, data_type)
            }
            Symbol::Temp { index, data_type } => write!(f, "<temp {} {:?}>", index, data_type),
            Symbol::StaticField {
                class,
                name,
                field_type,
            }
            | Symbol::InstanceField {
                class,
                name,
                field_type,
            } => write!(
                f,
                "{}.{} {}",
                class.as_str(),
                name.as_str(),
                field_type.render()
            ),
            Symbol::Method {
                class,
                name,
                descriptor,
                ..
            } => write!(
                f,
                "{}.{}{}",
                class.as_str(),
                name.as_str(),
                descriptor.render()
            ),
            Symbol::Class(class) => write!(f, "<class {}>", class.render()),
            Symbol::StringConstant(idx) => write!(f, "<string #{}>", idx.0),
            Symbol::MethodTypeConstant(idx) => write!(f, "<method type #{}>", idx.0),
            Symbol::MethodHandleConstant(idx) => write!(f, "<method handle #{}>", idx.0),
            Symbol::MethodTypeTableEntry(idx) => write!(f, "<method type table #{}>", idx.0),
            Symbol::CallSiteTableEntry(idx) => write!(f, "<call site {}>", idx),
            Symbol::ArrayShadow(data_type) => write!(f, "<array shadow {:?}>", data_type),
            Symbol::Vft => f.write_str("<vft>"),
            Symbol::MethodHandleType => f.write_str("java/lang/invoke/MethodHandle.type"),
            Symbol::MethodHandleThunks => f.write_str("java/lang/invoke/MethodHandle.thunks"),
            Symbol::InvokeExactTargetAddress => {
                f.write_str("java/lang/invoke/ThunkTuple.invokeExactThunk")
            }
            Symbol::JavaLangClassFromClass => f.write_str("<javaLangClassFromClass>"),
            Symbol::ExceptionObject => f.write_str("<exception>"),
            Symbol::DltBlock => f.write_str("<dlt block>"),
            Symbol::DltSlot { slot, data_type } => {
                write!(f, "<dlt slot {} {:?}>", slot, data_type)
            }
            Symbol::Helper(helper) => write!(f, "<helper {:?}>", helper),
            Symbol::Placeholder { parameters } => {
                f.write_str("<placeholder ")?;
                for parameter in parameters {
                    f.write_str(&parameter.render())?;
                }
                f.write_str(">")
            }
        }
    }
}

impl fmt::Display for SymbolReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.symbol.fmt(f)?;
        if self.unresolved {
            f.write_str(" [unresolved]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning() {
        let mut table = SymbolReferenceTable::new();
        let a = table.pending_push(0, DataType::Int32);
        let b = table.pending_push(1, DataType::Int32);
        let c = table.pending_push(0, DataType::Int64);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.pending_push(0, DataType::Int32), a);

        let resolved = table.find_or_create_symbol(Symbol::Vft);
        let unresolved = table.find_or_create(SymbolReference {
            symbol: Symbol::Vft,
            cp_index: None,
            unresolved: true,
        });
        assert_ne!(resolved, unresolved);
        assert_eq!(table.len(), 5);
        assert_eq!(table[unresolved].to_string(), "<vft> [unresolved]");
    }
}
