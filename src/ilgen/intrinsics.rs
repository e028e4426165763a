//! Calls replaced by inline IL
//!
//! Recognition is by declaring class, name, and descriptor of the resolved method. Replacement is
//! opportunistic: an intrinsic the target can't do in one instruction, or a macro whose operands
//! aren't in the expected shape, just stays a call.

use super::signature::ArtificialSignature;
use super::{Error, IlGenerator, MethodDetails, TargetCapabilities};
use crate::il::{ArithOp, DataType, ILOpCode, NodeFlags, NodeId, Symbol};
use crate::jvm::{BinaryName, MethodDescriptor, RenderDescriptor, UnqualifiedName};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(super) enum Intrinsic {
    /// Single arithmetic node over the arguments
    Arith(ArithOp, DataType),
    GetClass,
    NumArguments,
    FirstN,
    DropFirstN,
    LastN,
    IsCustomThunk,
    IsShareableThunk,
    Placeholder,
}

static INTRINSICS: [(BinaryName, UnqualifiedName, &str, Intrinsic); 28] = [
    (BinaryName::MATH, UnqualifiedName::MAX, "(II)I", Intrinsic::Arith(ArithOp::Max, DataType::Int32)),
    (BinaryName::MATH, UnqualifiedName::MAX, "(JJ)J", Intrinsic::Arith(ArithOp::Max, DataType::Int64)),
    (BinaryName::MATH, UnqualifiedName::MIN, "(II)I", Intrinsic::Arith(ArithOp::Min, DataType::Int32)),
    (BinaryName::MATH, UnqualifiedName::MIN, "(JJ)J", Intrinsic::Arith(ArithOp::Min, DataType::Int64)),
    (BinaryName::MATH, UnqualifiedName::ABS, "(I)I", Intrinsic::Arith(ArithOp::Abs, DataType::Int32)),
    (BinaryName::MATH, UnqualifiedName::ABS, "(J)J", Intrinsic::Arith(ArithOp::Abs, DataType::Int64)),
    (BinaryName::MATH, UnqualifiedName::ABS, "(F)F", Intrinsic::Arith(ArithOp::Abs, DataType::Float)),
    (BinaryName::MATH, UnqualifiedName::ABS, "(D)D", Intrinsic::Arith(ArithOp::Abs, DataType::Double)),
    (BinaryName::MATH, UnqualifiedName::SQRT, "(D)D", Intrinsic::Arith(ArithOp::Sqrt, DataType::Double)),
    (BinaryName::STRICTMATH, UnqualifiedName::MAX, "(II)I", Intrinsic::Arith(ArithOp::Max, DataType::Int32)),
    (BinaryName::STRICTMATH, UnqualifiedName::MAX, "(JJ)J", Intrinsic::Arith(ArithOp::Max, DataType::Int64)),
    (BinaryName::STRICTMATH, UnqualifiedName::MIN, "(II)I", Intrinsic::Arith(ArithOp::Min, DataType::Int32)),
    (BinaryName::STRICTMATH, UnqualifiedName::MIN, "(JJ)J", Intrinsic::Arith(ArithOp::Min, DataType::Int64)),
    (BinaryName::STRICTMATH, UnqualifiedName::ABS, "(I)I", Intrinsic::Arith(ArithOp::Abs, DataType::Int32)),
    (BinaryName::STRICTMATH, UnqualifiedName::SQRT, "(D)D", Intrinsic::Arith(ArithOp::Sqrt, DataType::Double)),
    (BinaryName::INTEGER, UnqualifiedName::BITCOUNT, "(I)I", Intrinsic::Arith(ArithOp::PopCount, DataType::Int32)),
    (BinaryName::LONG, UnqualifiedName::BITCOUNT, "(J)I", Intrinsic::Arith(ArithOp::PopCount, DataType::Int64)),
    (BinaryName::INTEGER, UnqualifiedName::NUMBEROFLEADINGZEROS, "(I)I", Intrinsic::Arith(ArithOp::LeadingZeros, DataType::Int32)),
    (BinaryName::LONG, UnqualifiedName::NUMBEROFLEADINGZEROS, "(J)I", Intrinsic::Arith(ArithOp::LeadingZeros, DataType::Int64)),
    (BinaryName::INTEGER, UnqualifiedName::REVERSEBYTES, "(I)I", Intrinsic::Arith(ArithOp::ByteSwap, DataType::Int32)),
    (BinaryName::OBJECT, UnqualifiedName::GETCLASS, "()Ljava/lang/Class;", Intrinsic::GetClass),
    (BinaryName::ILGENMACROS, UnqualifiedName::NUMARGUMENTS, "(I)I", Intrinsic::NumArguments),
    (BinaryName::ILGENMACROS, UnqualifiedName::FIRSTN, "(II)I", Intrinsic::FirstN),
    (BinaryName::ILGENMACROS, UnqualifiedName::DROPFIRSTN, "(II)I", Intrinsic::DropFirstN),
    (BinaryName::ILGENMACROS, UnqualifiedName::LASTN, "(II)I", Intrinsic::LastN),
    (BinaryName::ILGENMACROS, UnqualifiedName::ISCUSTOMTHUNK, "()Z", Intrinsic::IsCustomThunk),
    (BinaryName::ILGENMACROS, UnqualifiedName::ISSHAREABLETHUNK, "()Z", Intrinsic::IsShareableThunk),
    (BinaryName::ILGENMACROS, UnqualifiedName::PLACEHOLDER, "(I)I", Intrinsic::Placeholder),
];

/// Intrinsic a resolved method corresponds to
pub(super) fn recognize(
    class: &BinaryName,
    name: &UnqualifiedName,
    descriptor: &MethodDescriptor,
) -> Option<Intrinsic> {
    let rendered = descriptor.render();
    INTRINSICS
        .iter()
        .find(|(c, n, d, _)| c == class && n == name && *d == rendered)
        .map(|(_, _, _, intrinsic)| *intrinsic)
}

impl Intrinsic {
    /// Can the target do this without a call?
    pub(super) fn is_supported(self, target: &TargetCapabilities) -> bool {
        match self {
            Intrinsic::Arith(ArithOp::Max | ArithOp::Min, DataType::Int32) => target.int_max_min,
            Intrinsic::Arith(ArithOp::Max | ArithOp::Min, DataType::Int64) => target.long_max_min,
            Intrinsic::Arith(ArithOp::Sqrt, _) => target.sqrt,
            Intrinsic::Arith(ArithOp::PopCount, _) => target.popcount,
            Intrinsic::Arith(ArithOp::LeadingZeros, _) => target.leading_zeros,
            Intrinsic::Arith(ArithOp::ByteSwap, _) => target.byte_swap,
            _ => true,
        }
    }
}

impl<'a> IlGenerator<'a> {
    /// Inline replacement for a call whose arguments have been popped
    ///
    /// Returns `None` when the call should be generated after all. The arguments are left alone
    /// in that case.
    pub(super) fn gen_intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        arguments: &[NodeId],
    ) -> Result<Option<NodeId>, Error> {
        if !intrinsic.is_supported(&self.config.target) {
            log::trace!("{:?} is not supported by the target", intrinsic);
            return Ok(None);
        }

        let result = match intrinsic {
            Intrinsic::Arith(op, data_type) => Some(self.create(ILOpCode::Arith(op, data_type), arguments)),
            Intrinsic::GetClass => match arguments {
                [receiver] => Some(self.gen_get_class(*receiver)),
                _ => None,
            },
            Intrinsic::NumArguments => match arguments {
                [placeholder] if self.is_placeholder(*placeholder) => {
                    let count = self.il.nodes[*placeholder].children().len() as i32;
                    self.release(*placeholder);
                    Some(self.il.nodes.iconst(self.bc_index, count))
                }
                _ => None,
            },
            Intrinsic::FirstN | Intrinsic::DropFirstN | Intrinsic::LastN => match arguments {
                [count, placeholder] => self.slice_placeholder(intrinsic, *count, *placeholder),
                _ => None,
            },
            Intrinsic::IsCustomThunk => {
                let custom = matches!(self.details, MethodDetails::MethodHandleThunk { custom: true, .. });
                Some(self.il.nodes.iconst(self.bc_index, custom as i32))
            }
            Intrinsic::IsShareableThunk => {
                let shareable = match self.details {
                    MethodDetails::MethodHandleThunk { handle, .. } => {
                        let access = self.front_end.acquire_vm_access();
                        access.is_thunk_shareable(*handle)
                    }
                    _ => false,
                };
                Some(self.il.nodes.iconst(self.bc_index, shareable as i32))
            }
            Intrinsic::Placeholder => match arguments {
                [placeholder] if self.is_placeholder(*placeholder) => Some(*placeholder),
                _ => None,
            },
        };

        if let Some(result) = result {
            log::trace!("{:?} at {} became {}", intrinsic, self.bc_index, result);
        }
        Ok(result)
    }

    /// `java/lang/Class` of the receiver, read through its virtual function table
    fn gen_get_class(&mut self, receiver: NodeId) -> NodeId {
        let vft = self.create_with_symbol(ILOpCode::LoadIndirect(DataType::Address), Symbol::Vft, &[receiver]);
        if !self.is_non_null(receiver) {
            self.append_check(ILOpCode::NullChk, vft, &[]);
            self.il.nodes.add_flags(receiver, NodeFlags::NON_NULL);
        }
        let class = self.create_with_symbol(
            ILOpCode::LoadIndirect(DataType::Address),
            Symbol::JavaLangClassFromClass,
            &[vft],
        );
        self.il.nodes.add_flags(class, NodeFlags::NON_NULL);
        class
    }

    /// New placeholder standing for part of the arguments of another one
    fn slice_placeholder(
        &mut self,
        intrinsic: Intrinsic,
        count: NodeId,
        placeholder: NodeId,
    ) -> Option<NodeId> {
        if !self.is_placeholder(placeholder) {
            return None;
        }
        let parameters = match self.symbol_of(placeholder) {
            Some(Symbol::Placeholder { parameters }) => parameters.clone(),
            _ => return None,
        };
        let n = self.il.nodes.integer_value(count)?;
        if n < 0 {
            return None;
        }
        let n = n as usize;

        let signature = ArtificialSignature::new(parameters, None);
        let len = signature.parameters.len();
        let (signature, range) = match intrinsic {
            Intrinsic::FirstN => (signature.first_n(n), 0..n.min(len)),
            Intrinsic::DropFirstN => (signature.drop_first_n(n), n.min(len)..len),
            _ => (signature.last_n(n), len.saturating_sub(n)..len),
        };
        let values = self.il.nodes[placeholder].children()[range].to_vec();

        let symref = self.il.symbols.find_or_create_symbol(Symbol::Placeholder {
            parameters: signature.parameters,
        });
        let sliced = self.placeholder_call(symref, self.bc_index, &values);
        self.release(placeholder);
        self.release(count);
        Some(sliced)
    }

    /// Drop a node that lost its last parent
    pub(super) fn release(&mut self, node: NodeId) {
        if !self.il.nodes[node].is_anchored() {
            self.il.nodes.discard_orphan(node);
        }
    }
}
