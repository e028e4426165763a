use super::{
    BinaryName, FieldType, MethodDescriptor, Offset, OffsetVec, RefType, UnqualifiedName, Width,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Index into the constant pool
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ConstantIndex(pub u16);

/// Reference to a field or method, as it appears in the constant pool
///
/// The descriptor is `FieldType` for fields and `MethodDescriptor` for methods.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MemberRef<Descriptor> {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: Descriptor,
}

/// Kind of a `CONSTANT_MethodHandle`
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-5.html#jvms-5.4.3.5
#[repr(u8)]
#[derive(TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum HandleKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

/// Resolved view of a constant pool entry
///
/// Strings and names have already been followed through their `CONSTANT_Utf8` and
/// `CONSTANT_NameAndType` indirections, since the translator never needs those on their own.
#[derive(Clone, PartialEq, Debug)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(RefType),
    FieldRef(MemberRef<FieldType>),
    MethodRef(MemberRef<MethodDescriptor>),
    InterfaceMethodRef(MemberRef<MethodDescriptor>),
    MethodType(MethodDescriptor),
    MethodHandle(HandleKind, MemberRef<MethodDescriptor>),
    InvokeDynamic {
        bootstrap_method: u16,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    },
}

impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Constant pool of one class
///
/// Indexing starts at 1 and `long`/`double` entries take up two indices.
#[derive(Clone, Debug)]
pub struct ConstantPool {
    constants: OffsetVec<Constant>,
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
        }
    }

    /// Append a constant, returning its index
    pub fn push(&mut self, constant: Constant) -> ConstantIndex {
        let Offset(offset) = self.constants.push(constant);
        ConstantIndex(offset as u16)
    }

    /// Get a constant from the pool
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        self.constants.get_offset(Offset(index.0 as usize)).ok()
    }

    /// Index into the call site table of an `invokedynamic` constant
    ///
    /// Call sites are numbered in the order their constants appear in the pool.
    pub fn call_site_index(&self, index: ConstantIndex) -> Option<u16> {
        let mut call_site = 0;
        for (Offset(offset), _, constant) in &self.constants {
            if let Constant::InvokeDynamic { .. } = constant {
                if offset == index.0 as usize {
                    return Some(call_site);
                }
                call_site += 1;
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{Name, ParseDescriptor};

    #[test]
    fn wide_constants_take_two_indices() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.push(Constant::Integer(1)), ConstantIndex(1));
        assert_eq!(pool.push(Constant::Long(2)), ConstantIndex(2));
        assert_eq!(pool.push(Constant::Double(3.0)), ConstantIndex(4));
        assert_eq!(pool.push(Constant::Float(4.0)), ConstantIndex(6));

        assert_eq!(pool.get(ConstantIndex(2)), Some(&Constant::Long(2)));
        assert_eq!(pool.get(ConstantIndex(3)), None);
        assert_eq!(pool.get(ConstantIndex(0)), None);
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn call_sites_are_numbered_in_order() {
        let mut pool = ConstantPool::new();
        let indy = |name: &str| Constant::InvokeDynamic {
            bootstrap_method: 0,
            name: UnqualifiedName::from_string(name.to_owned()).unwrap(),
            descriptor: MethodDescriptor::parse("()V").unwrap(),
        };
        let first = pool.push(indy("a"));
        pool.push(Constant::Integer(0));
        let second = pool.push(indy("b"));

        assert_eq!(pool.call_site_index(first), Some(0));
        assert_eq!(pool.call_site_index(second), Some(1));
        assert_eq!(pool.call_site_index(ConstantIndex(2)), None);
    }
}
