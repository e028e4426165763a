use crate::jvm::{BaseType, FieldType, Width};
use std::fmt;

/// Type of the value an IL node produces
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DataType {
    NoType,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Address,
}

impl DataType {
    /// Type a value of the given field type has in memory
    pub fn from_field_type(field_type: &FieldType) -> DataType {
        match field_type {
            FieldType::Base(BaseType::Boolean | BaseType::Byte) => DataType::Int8,
            FieldType::Base(BaseType::Char | BaseType::Short) => DataType::Int16,
            FieldType::Base(BaseType::Int) => DataType::Int32,
            FieldType::Base(BaseType::Long) => DataType::Int64,
            FieldType::Base(BaseType::Float) => DataType::Float,
            FieldType::Base(BaseType::Double) => DataType::Double,
            FieldType::Ref(_) => DataType::Address,
        }
    }

    /// Type a value has once it is on the operand stack (sub-int types are widened)
    pub fn stack_type(self) -> DataType {
        match self {
            DataType::Int8 | DataType::Int16 => DataType::Int32,
            other => other,
        }
    }

    /// Does this type take up two words on the operand stack and in locals?
    pub fn is_wide(self) -> bool {
        matches!(self, DataType::Int64 | DataType::Double)
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    /// Size in bytes of an array element of this type
    pub fn element_size(self) -> i32 {
        match self {
            DataType::NoType => 0,
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float | DataType::Address => 4,
            DataType::Int64 | DataType::Double => 8,
        }
    }

    /// Prefix used in opcode names (`i` in `iadd`, `l` in `lload`, ...)
    pub fn prefix(self) -> &'static str {
        match self {
            DataType::NoType => "",
            DataType::Int8 => "b",
            DataType::Int16 => "s",
            DataType::Int32 => "i",
            DataType::Int64 => "l",
            DataType::Float => "f",
            DataType::Double => "d",
            DataType::Address => "a",
        }
    }
}

impl Width for DataType {
    fn width(&self) -> usize {
        match self {
            DataType::NoType => 0,
            other if other.is_wide() => 2,
            _ => 1,
        }
    }
}

/// Value of a constant node
///
/// Floating point values are kept as their bit patterns so that constants can be compared and
/// hashed exactly (`NaN` included).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ConstValue {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Address(u64),
}

impl ConstValue {
    pub fn float(value: f32) -> ConstValue {
        ConstValue::Float(value.to_bits())
    }

    pub fn double(value: f64) -> ConstValue {
        ConstValue::Double(value.to_bits())
    }

    pub const NULL: ConstValue = ConstValue::Address(0);

    pub fn data_type(self) -> DataType {
        match self {
            ConstValue::Int(_) => DataType::Int32,
            ConstValue::Long(_) => DataType::Int64,
            ConstValue::Float(_) => DataType::Float,
            ConstValue::Double(_) => DataType::Double,
            ConstValue::Address(_) => DataType::Address,
        }
    }

    /// Integral value, if this is an integral constant
    pub fn as_integer(self) -> Option<i64> {
        match self {
            ConstValue::Int(i) => Some(i as i64),
            ConstValue::Long(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(i) => write!(f, "{}", i),
            ConstValue::Long(l) => write!(f, "{}", l),
            ConstValue::Float(bits) => write!(f, "{:?}", f32::from_bits(*bits)),
            ConstValue::Double(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            ConstValue::Address(0) => f.write_str("NULL"),
            ConstValue::Address(a) => write!(f, "{:#x}", a),
        }
    }
}
