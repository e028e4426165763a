use super::DataType;
use std::fmt;

/// Condition of a compare-and-branch
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CompareCondition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CompareCondition {
    pub fn name(self) -> &'static str {
        match self {
            CompareCondition::Eq => "eq",
            CompareCondition::Ne => "ne",
            CompareCondition::Lt => "lt",
            CompareCondition::Ge => "ge",
            CompareCondition::Gt => "gt",
            CompareCondition::Le => "le",
        }
    }
}

/// Three-way compare producing `-1`, `0`, or `1`
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CompareKind {
    Long,
    /// `NaN` compares as less than everything
    FloatL,
    /// `NaN` compares as greater than everything
    FloatG,
    DoubleL,
    DoubleG,
}

impl CompareKind {
    /// Type of the operands
    pub fn operand_type(self) -> DataType {
        match self {
            CompareKind::Long => DataType::Int64,
            CompareKind::FloatL | CompareKind::FloatG => DataType::Float,
            CompareKind::DoubleL | CompareKind::DoubleG => DataType::Double,
        }
    }

    /// Whether `NaN` makes the comparison come out as `-1`
    pub fn nan_is_less(self) -> bool {
        matches!(self, CompareKind::FloatL | CompareKind::DoubleL)
    }
}

/// Arithmetic and bitwise operations
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Shl,
    Shr,
    UShr,
    And,
    Or,
    Xor,
    Max,
    Min,
    Abs,
    Sqrt,
    PopCount,
    LeadingZeros,
    ByteSwap,
}

impl ArithOp {
    pub fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
            ArithOp::Neg => "neg",
            ArithOp::Shl => "shl",
            ArithOp::Shr => "shr",
            ArithOp::UShr => "ushr",
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Xor => "xor",
            ArithOp::Max => "max",
            ArithOp::Min => "min",
            ArithOp::Abs => "abs",
            ArithOp::Sqrt => "sqrt",
            ArithOp::PopCount => "popcnt",
            ArithOp::LeadingZeros => "nolz",
            ArithOp::ByteSwap => "byteswap",
        }
    }
}

/// Opcodes of the tree IL
///
/// The opcode set is data driven: the type (and for branches, the condition) is a field rather
/// than part of the variant name, but the dump still prints the conventional names (`iadd`,
/// `iflcmplt`, `bloadi`, ...).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ILOpCode {
    // Structure
    BBStart,
    BBEnd,
    /// Anchors a value-producing node so that it is evaluated at this point
    TreeTop,

    // Values
    Const(DataType),
    /// Load of a symbol (local, parameter, static, pending push slot, ...)
    Load(DataType),
    Store(DataType),
    /// Load through an address (instance fields, array elements, virtual function table, ...)
    LoadIndirect(DataType),
    StoreIndirect(DataType),
    /// Address of a symbol (eg. a class)
    LoadAddr,
    /// Address plus byte offset (`aiadd`)
    AddressAdd,
    Arith(ArithOp, DataType),
    Convert {
        from: DataType,
        to: DataType,
        unsigned: bool,
    },
    Compare(CompareKind),
    /// Produces `1` when the condition holds and `0` otherwise (`acmpeq`, `icmplt`, ...)
    Cmp {
        data_type: DataType,
        condition: CompareCondition,
    },
    /// Produces its only child (used to hang a check off a value without evaluating more)
    PassThrough,

    // Control flow
    IfCmp {
        data_type: DataType,
        condition: CompareCondition,
        /// Condition also holds when either operand is `NaN`
        unordered: bool,
    },
    Goto,
    Table,
    Lookup,
    Return(DataType),
    AThrow,

    // Calls
    Call {
        return_type: DataType,
        indirect: bool,
    },

    // Objects
    New,
    NewArray,
    ANewArray,
    MultiANewArray,
    ArrayLength,
    CheckCast,
    InstanceOf,
    MonEnter,
    MonExit,

    // Checks
    NullChk,
    ResolveChk,
    ResolveAndNullChk,
    BndChk,
    SpineChk,
    BndChkWithSpineChk,
    ArrayStoreChk,
    DivChk,
    /// Calls its helper when the child evaluates to zero
    ZeroChk,
    AsyncCheck,
}

impl ILOpCode {
    /// Type of the value produced
    pub fn data_type(self) -> DataType {
        match self {
            ILOpCode::Const(t) | ILOpCode::Load(t) | ILOpCode::LoadIndirect(t) => t,
            ILOpCode::LoadAddr | ILOpCode::AddressAdd | ILOpCode::PassThrough => DataType::Address,
            ILOpCode::Arith(ArithOp::PopCount | ArithOp::LeadingZeros, _) => DataType::Int32,
            ILOpCode::Arith(_, t) => t,
            ILOpCode::Convert { to, .. } => to,
            ILOpCode::Compare(_) | ILOpCode::Cmp { .. } => DataType::Int32,
            ILOpCode::Call { return_type, .. } => return_type,
            ILOpCode::New
            | ILOpCode::NewArray
            | ILOpCode::ANewArray
            | ILOpCode::MultiANewArray => DataType::Address,
            ILOpCode::ArrayLength | ILOpCode::InstanceOf => DataType::Int32,
            _ => DataType::NoType,
        }
    }

    /// Can the node be the root of a tree (without a `treetop` wrapped around it)?
    pub fn is_tree_top(self) -> bool {
        matches!(
            self,
            ILOpCode::BBStart
                | ILOpCode::BBEnd
                | ILOpCode::TreeTop
                | ILOpCode::Store(_)
                | ILOpCode::StoreIndirect(_)
                | ILOpCode::IfCmp { .. }
                | ILOpCode::Goto
                | ILOpCode::Table
                | ILOpCode::Lookup
                | ILOpCode::Return(_)
                | ILOpCode::AThrow
                | ILOpCode::CheckCast
                | ILOpCode::MonEnter
                | ILOpCode::MonExit
        ) || self.is_check()
    }

    /// Exception checks (the first child is the checked tree)
    pub fn is_check(self) -> bool {
        matches!(
            self,
            ILOpCode::NullChk
                | ILOpCode::ResolveChk
                | ILOpCode::ResolveAndNullChk
                | ILOpCode::BndChk
                | ILOpCode::SpineChk
                | ILOpCode::BndChkWithSpineChk
                | ILOpCode::ArrayStoreChk
                | ILOpCode::DivChk
                | ILOpCode::ZeroChk
                | ILOpCode::AsyncCheck
        )
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self,
            ILOpCode::IfCmp { .. } | ILOpCode::Goto | ILOpCode::Table | ILOpCode::Lookup
        )
    }

    /// Does control never reach the next tree?
    pub fn is_unconditional_transfer(self) -> bool {
        matches!(
            self,
            ILOpCode::Goto
                | ILOpCode::Table
                | ILOpCode::Lookup
                | ILOpCode::Return(_)
                | ILOpCode::AThrow
        )
    }

    pub fn is_call(self) -> bool {
        matches!(self, ILOpCode::Call { .. })
    }

    /// Loads that read memory some store or call could change
    pub fn is_memory_load(self) -> bool {
        matches!(self, ILOpCode::Load(_) | ILOpCode::LoadIndirect(_))
    }
}

impl fmt::Display for ILOpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ILOpCode::BBStart => f.write_str("BBStart"),
            ILOpCode::BBEnd => f.write_str("BBEnd"),
            ILOpCode::TreeTop => f.write_str("treetop"),
            ILOpCode::Const(t) => write!(f, "{}const", t.prefix()),
            ILOpCode::Load(t) => write!(f, "{}load", t.prefix()),
            ILOpCode::Store(t) => write!(f, "{}store", t.prefix()),
            ILOpCode::LoadIndirect(t) => write!(f, "{}loadi", t.prefix()),
            ILOpCode::StoreIndirect(t) => write!(f, "{}storei", t.prefix()),
            ILOpCode::LoadAddr => f.write_str("loadaddr"),
            ILOpCode::AddressAdd => f.write_str("aiadd"),
            ILOpCode::Arith(op, t) => write!(f, "{}{}", t.prefix(), op.name()),
            ILOpCode::Convert { from, to, unsigned } => {
                let u = if unsigned { "u" } else { "" };
                write!(f, "{}{}2{}", from.prefix(), u, to.prefix())
            }
            ILOpCode::Compare(kind) => f.write_str(match kind {
                CompareKind::Long => "lcmp",
                CompareKind::FloatL => "fcmpl",
                CompareKind::FloatG => "fcmpg",
                CompareKind::DoubleL => "dcmpl",
                CompareKind::DoubleG => "dcmpg",
            }),
            ILOpCode::Cmp {
                data_type,
                condition,
            } => write!(f, "{}cmp{}", data_type.prefix(), condition.name()),
            ILOpCode::PassThrough => f.write_str("PassThrough"),
            ILOpCode::IfCmp {
                data_type,
                condition,
                unordered,
            } => {
                let u = if unordered { "u" } else { "" };
                write!(f, "if{}cmp{}{}", data_type.prefix(), condition.name(), u)
            }
            ILOpCode::Goto => f.write_str("goto"),
            ILOpCode::Table => f.write_str("table"),
            ILOpCode::Lookup => f.write_str("lookup"),
            ILOpCode::Return(t) => write!(f, "{}return", t.prefix()),
            ILOpCode::AThrow => f.write_str("athrow"),
            ILOpCode::Call {
                return_type,
                indirect,
            } => {
                let i = if indirect { "i" } else { "" };
                write!(f, "{}call{}", return_type.prefix(), i)
            }
            ILOpCode::New => f.write_str("new"),
            ILOpCode::NewArray => f.write_str("newarray"),
            ILOpCode::ANewArray => f.write_str("anewarray"),
            ILOpCode::MultiANewArray => f.write_str("multianewarray"),
            ILOpCode::ArrayLength => f.write_str("arraylength"),
            ILOpCode::CheckCast => f.write_str("checkcast"),
            ILOpCode::InstanceOf => f.write_str("instanceof"),
            ILOpCode::MonEnter => f.write_str("monent"),
            ILOpCode::MonExit => f.write_str("monexit"),
            ILOpCode::NullChk => f.write_str("NULLCHK"),
            ILOpCode::ResolveChk => f.write_str("ResolveCHK"),
            ILOpCode::ResolveAndNullChk => f.write_str("ResolveAndNULLCHK"),
            ILOpCode::BndChk => f.write_str("BNDCHK"),
            ILOpCode::SpineChk => f.write_str("SpineCHK"),
            ILOpCode::BndChkWithSpineChk => f.write_str("BNDCHKwithSpineCHK"),
            ILOpCode::ArrayStoreChk => f.write_str("ArrayStoreCHK"),
            ILOpCode::DivChk => f.write_str("DIVCHK"),
            ILOpCode::ZeroChk => f.write_str("ZEROCHK"),
            ILOpCode::AsyncCheck => f.write_str("asynccheck"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn conventional_names() {
        assert_eq!(ILOpCode::Arith(ArithOp::Add, DataType::Int32).to_string(), "iadd");
        assert_eq!(ILOpCode::LoadIndirect(DataType::Int8).to_string(), "bloadi");
        assert_eq!(
            ILOpCode::Convert {
                from: DataType::Int16,
                to: DataType::Int32,
                unsigned: true
            }
            .to_string(),
            "su2i"
        );
        assert_eq!(
            ILOpCode::IfCmp {
                data_type: DataType::Float,
                condition: CompareCondition::Lt,
                unordered: true
            }
            .to_string(),
            "iffcmpltu"
        );
        assert_eq!(ILOpCode::Return(DataType::NoType).to_string(), "return");
        assert_eq!(
            ILOpCode::Cmp {
                data_type: DataType::Address,
                condition: CompareCondition::Eq
            }
            .to_string(),
            "acmpeq"
        );
        assert_eq!(ILOpCode::ZeroChk.to_string(), "ZEROCHK");
    }

    #[test]
    fn tree_top_classification() {
        assert!(ILOpCode::NullChk.is_tree_top());
        assert!(ILOpCode::ZeroChk.is_check());
        assert!(!ILOpCode::Call {
            return_type: DataType::Int32,
            indirect: false
        }
        .is_tree_top());
        assert!(ILOpCode::AThrow.is_unconditional_transfer());
        assert!(!ILOpCode::IfCmp {
            data_type: DataType::Int32,
            condition: CompareCondition::Eq,
            unordered: false
        }
        .is_unconditional_transfer());
        assert_eq!(
            ILOpCode::Arith(ArithOp::PopCount, DataType::Int64).data_type(),
            DataType::Int32
        );
    }
}
