//! Array element accesses, lengths, and allocations
//!
//! An element access is `loadi`/`storei` through `aiadd(array, iadd(imul(index, size), header))`
//! on the array shadow of the element type. Ahead of it come the checks that can't be proven
//! redundant:
//!
//!  - `NULLCHK(arraylength(array))`, unless the array is known to be non-null
//!  - `BNDCHK(arraylength, index)`, unless the index is a constant below a known length
//!
//! With hybrid arraylets, the element may live in a leaf hanging off a spine, so the bound check
//! becomes `BNDCHKwithSpineCHK(access, array, arraylength, index)` (or `SpineCHK(access, array,
//! index)` when the bound check itself is redundant), anchoring the access.

use super::pending_push::SideEffect;
use super::walker::{malformed, Flow};
use super::{Error, IlGenerator, Instruction, Operands};
use crate::il::{ArithOp, ConstValue, DataType, ILOpCode, MethodFlags, NodeFlags, NodeId, Symbol};
use crate::jvm::{BaseType, BinaryName, ByteCode, FieldType, RefType};

/// Type of the elements accessed by an `*aload` or `*astore`
fn element_type(op: ByteCode) -> Option<FieldType> {
    use ByteCode::*;
    Some(match op {
        IALoad | IAStore => FieldType::int(),
        LALoad | LAStore => FieldType::long(),
        FALoad | FAStore => FieldType::float(),
        DALoad | DAStore => FieldType::double(),
        AALoad | AAStore => FieldType::object(BinaryName::OBJECT),
        BALoad | BAStore => FieldType::Base(BaseType::Byte),
        CALoad | CAStore => FieldType::Base(BaseType::Char),
        SALoad | SAStore => FieldType::Base(BaseType::Short),
        _ => return None,
    })
}

/// Element type of a `newarray`
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-6.html#jvms-6.5.newarray
fn primitive_array_type(code: u8) -> Option<BaseType> {
    Some(match code {
        4 => BaseType::Boolean,
        5 => BaseType::Char,
        6 => BaseType::Float,
        7 => BaseType::Double,
        8 => BaseType::Byte,
        9 => BaseType::Short,
        10 => BaseType::Int,
        11 => BaseType::Long,
        _ => return None,
    })
}

pub(super) fn gen_array_load(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let element = element_type(insn.byte_code()?).ok_or_else(|| malformed(insn))?;
    let data_type = DataType::from_field_type(&element);
    let index = gen.pop()?;
    let array = gen.pop()?;

    let address = gen.element_address(array, index, data_type);
    let load = gen.create_with_symbol(
        ILOpCode::LoadIndirect(data_type),
        Symbol::ArrayShadow(data_type),
        &[address],
    );
    let (length, in_bounds) = gen.null_check_array(array, index);
    gen.bound_check(load, array, length, index, in_bounds);

    let value = gen.widen(load, &element);
    gen.push(value);
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_array_store(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let op = insn.byte_code()?;
    let element = element_type(op).ok_or_else(|| malformed(insn))?;
    let data_type = DataType::from_field_type(&element);
    let value = gen.pop()?;
    let index = gen.pop()?;
    let array = gen.pop()?;

    gen.handle_side_effect(SideEffect::ArrayStore(data_type));
    let value = gen.narrow(value, &element);
    let address = gen.element_address(array, index, data_type);
    let store = gen.create_with_symbol(
        ILOpCode::StoreIndirect(data_type),
        Symbol::ArrayShadow(data_type),
        &[address, value],
    );

    // Storing `null` can't violate the array's element type
    let is_null = gen.il.nodes[value].constant() == Some(ConstValue::NULL);
    let store_check = op == ByteCode::AAStore && !is_null;

    let (length, in_bounds) = gen.null_check_array(array, index);
    if gen.config.object_model.hybrid_arraylets {
        if store_check {
            gen.append_check(ILOpCode::ArrayStoreChk, value, &[array]);
        }
        gen.bound_check(store, array, length, index, in_bounds);
    } else {
        gen.bound_check(store, array, length, index, in_bounds);
        if store_check {
            gen.append_check(ILOpCode::ArrayStoreChk, store, &[array]);
        } else {
            gen.append(store);
        }
    }
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_array_length(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let array = gen.pop()?;
    let known = gen.array_lengths.get(&array).copied();
    let length = match known {
        Some(length) if gen.is_non_null(array) => {
            if !gen.il.nodes[array].is_anchored() {
                gen.il.nodes.discard_orphan(array);
            }
            gen.il.nodes.iconst(gen.bc_index, length)
        }
        _ => {
            let length = gen.create(ILOpCode::ArrayLength, &[array]);
            if !gen.is_non_null(array) {
                gen.append_check(ILOpCode::NullChk, length, &[]);
                gen.il.nodes.add_flags(array, NodeFlags::NON_NULL);
            }
            length
        }
    };
    gen.push(length);
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_new_array(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let element = match insn.operands {
        Operands::ArrayType(code) => primitive_array_type(code).ok_or_else(|| malformed(insn))?,
        _ => return Err(malformed(insn)),
    };
    let count = gen.pop()?;
    let array_type = RefType::array(FieldType::Base(element));
    let array = gen.create_with_symbol(ILOpCode::NewArray, Symbol::Class(array_type), &[count]);
    gen.append(array);
    gen.allocated_array(array, &[count]);
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_anew_array(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let cp_index = insn.constant_index()?;
    let count = gen.pop()?;
    let (class, unresolved) = gen.load_class_address(cp_index)?;
    let array = gen.create(ILOpCode::ANewArray, &[count, class]);
    if unresolved {
        gen.append_check(ILOpCode::ResolveChk, array, &[]);
    } else {
        gen.append(array);
    }
    gen.allocated_array(array, &[count]);
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_multi_anew_array(
    gen: &mut IlGenerator<'_>,
    insn: &Instruction,
) -> Result<Flow, Error> {
    let (cp_index, dimensions) = match insn.operands {
        Operands::MultiArray { index, dimensions } => (index, dimensions),
        _ => return Err(malformed(insn)),
    };
    let counts = gen.stack.pop_n(&mut gen.il.nodes, dimensions as usize)?;
    let (class, unresolved) = gen.load_class_address(cp_index)?;

    let mut children = vec![gen.il.nodes.iconst(gen.bc_index, dimensions as i32)];
    children.extend_from_slice(&counts);
    children.push(class);
    let array = gen.create(ILOpCode::MultiANewArray, &children);
    if unresolved {
        gen.append_check(ILOpCode::ResolveChk, array, &[]);
    } else {
        gen.append(array);
    }
    gen.allocated_array(array, &counts);
    Ok(Flow::Continue(insn.next_index()))
}

impl<'a> IlGenerator<'a> {
    /// `aiadd(array, iadd(imul(index, size), header))`
    fn element_address(&mut self, array: NodeId, index: NodeId, data_type: DataType) -> NodeId {
        let size = self.il.nodes.iconst(self.bc_index, data_type.element_size());
        let header_size = self.config.object_model.array_header_size;
        let header = self.il.nodes.iconst(self.bc_index, header_size);
        let offset = self.create(ILOpCode::Arith(ArithOp::Mul, DataType::Int32), &[index, size]);
        let offset = self.create(ILOpCode::Arith(ArithOp::Add, DataType::Int32), &[offset, header]);
        self.create(ILOpCode::AddressAdd, &[array, offset])
    }

    /// Null check the array of an element access
    ///
    /// Returns the `arraylength` node the bound check will need (if any), and whether the index
    /// is provably in bounds.
    fn null_check_array(&mut self, array: NodeId, index: NodeId) -> (Option<NodeId>, bool) {
        let in_bounds = match (
            self.array_lengths.get(&array),
            self.il.nodes.integer_value(index),
        ) {
            (Some(length), Some(index)) => 0 <= index && index < *length as i64,
            _ => false,
        };
        let non_null = self.is_non_null(array);
        if non_null && in_bounds {
            return (None, true);
        }

        let length = self.create(ILOpCode::ArrayLength, &[array]);
        if !non_null {
            self.append_check(ILOpCode::NullChk, length, &[]);
            self.il.nodes.add_flags(array, NodeFlags::NON_NULL);
        }
        (Some(length), in_bounds)
    }

    /// Bound check (and, with arraylets, spine check) an element access
    ///
    /// With hybrid arraylets the access ends up anchored under the check.
    fn bound_check(
        &mut self,
        access: NodeId,
        array: NodeId,
        length: Option<NodeId>,
        index: NodeId,
        in_bounds: bool,
    ) {
        let hybrid = self.config.object_model.hybrid_arraylets;
        match (length, in_bounds, hybrid) {
            (Some(length), false, false) => {
                self.append_check(ILOpCode::BndChk, length, &[index]);
            }
            (Some(length), false, true) => {
                self.append_check(ILOpCode::BndChkWithSpineChk, access, &[array, length, index]);
            }
            (_, _, true) => {
                self.append_check(ILOpCode::SpineChk, access, &[array, index]);
            }
            _ => {}
        }
    }

    /// Bookkeeping after any array allocation
    fn allocated_array(&mut self, array: NodeId, counts: &[NodeId]) {
        self.il.nodes.add_flags(array, NodeFlags::NON_NULL);
        self.il.flags |= MethodFlags::HAS_NEWS;
        let length = counts
            .first()
            .and_then(|count| self.il.nodes.integer_value(*count));
        if let Some(length) = length {
            if 0 <= length && length <= i32::MAX as i64 {
                self.array_lengths.insert(array, length as i32);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ilgen::testing::{generate, generate_with, MethodBuilder};
    use crate::ilgen::{MethodDetails, TranslatorConfig};
    use crate::jvm::ConstantPool;

    #[test]
    fn store_checks_come_in_order() {
        // aload_1; iload_0; iconst_5; iastore; return
        let method = MethodBuilder::new("(I[I)V", true)
            .code(&[0x2b, 0x1a, 0x08, 0x4f, 0xb1])
            .build();
        let il = generate(&method).unwrap();
        let block = il.cfg.layout()[0];
        let roots = il.tree_nodes(block);
        assert_eq!(roots.len(), 4);

        assert_eq!(il.nodes[roots[0]].op(), ILOpCode::NullChk);
        let length = il.nodes[roots[0]].child(0).unwrap();
        assert_eq!(il.nodes[length].op(), ILOpCode::ArrayLength);

        assert_eq!(il.nodes[roots[1]].op(), ILOpCode::BndChk);
        assert_eq!(il.nodes[roots[1]].child(0), Some(length));

        let store = roots[2];
        assert_eq!(il.nodes[store].op(), ILOpCode::StoreIndirect(DataType::Int32));
        let address = il.nodes[store].child(0).unwrap();
        assert_eq!(il.nodes[address].op(), ILOpCode::AddressAdd);
        let offset = il.nodes[address].child(1).unwrap();
        let scaled = il.nodes[offset].child(0).unwrap();
        let header = il.nodes[offset].child(1).unwrap();
        assert_eq!(il.nodes.integer_value(header), Some(16));
        let size = il.nodes[scaled].child(1).unwrap();
        assert_eq!(il.nodes.integer_value(size), Some(4));
    }

    #[test]
    fn fresh_array_needs_no_checks() {
        // iconst_5; newarray int; dup; iconst_2; bipush 7; iastore; arraylength; ireturn
        let method = MethodBuilder::new("()I", true)
            .code(&[0x08, 0xbc, 0x0a, 0x59, 0x05, 0x10, 0x07, 0x4f, 0xbe, 0xac])
            .build();
        let il = generate(&method).unwrap();
        assert!(il.flags.contains(MethodFlags::HAS_NEWS));
        let block = il.cfg.layout()[0];
        let roots = il.tree_nodes(block);
        assert_eq!(roots.len(), 3);
        assert_eq!(il.nodes[roots[0]].op(), ILOpCode::TreeTop);
        assert_eq!(il.nodes[roots[1]].op(), ILOpCode::StoreIndirect(DataType::Int32));
        let length = il.nodes[roots[2]].child(0).unwrap();
        assert_eq!(il.nodes.integer_value(length), Some(5));
    }

    #[test]
    fn out_of_range_constant_index_is_checked() {
        // iconst_2; newarray int; iconst_3; iaload; ireturn
        let method = MethodBuilder::new("()I", true)
            .code(&[0x05, 0xbc, 0x0a, 0x06, 0x2e, 0xac])
            .build();
        let il = generate(&method).unwrap();
        let block = il.cfg.layout()[0];
        let ops: Vec<ILOpCode> = il
            .tree_nodes(block)
            .iter()
            .map(|r| il.nodes[*r].op())
            .collect();
        assert_eq!(
            ops,
            vec![ILOpCode::TreeTop, ILOpCode::BndChk, ILOpCode::Return(DataType::Int32)]
        );
    }

    #[test]
    fn arraylets_need_spine_checks() {
        // aload_0; iload_1; caload; ireturn
        let method = MethodBuilder::new("([CI)I", true)
            .code(&[0x2a, 0x1b, 0x34, 0xac])
            .build();
        let mut config = TranslatorConfig::new();
        config.object_model.hybrid_arraylets = true;
        let il = generate_with(&method, ConstantPool::new(), &MethodDetails::Ordinary, &config)
            .unwrap();
        let block = il.cfg.layout()[0];
        let roots = il.tree_nodes(block);
        assert_eq!(il.nodes[roots[0]].op(), ILOpCode::NullChk);
        let check = roots[1];
        assert_eq!(il.nodes[check].op(), ILOpCode::BndChkWithSpineChk);
        assert_eq!(il.nodes[check].children().len(), 4);
        let load = il.nodes[check].child(0).unwrap();
        assert_eq!(il.nodes[load].op(), ILOpCode::LoadIndirect(DataType::Int16));

        // `caload` zero extends
        let value = il.nodes[roots[2]].child(0).unwrap();
        assert_eq!(
            il.nodes[value].op(),
            ILOpCode::Convert {
                from: DataType::Int16,
                to: DataType::Int32,
                unsigned: true
            }
        );
    }

    #[test]
    fn storing_null_needs_no_store_check() {
        // aload_0; iconst_0; aconst_null; aastore; aload_0; iconst_0; aload_1; aastore; return
        let method = MethodBuilder::new("([Ljava/lang/Object;Ljava/lang/Object;)V", true)
            .code(&[0x2a, 0x03, 0x01, 0x53, 0x2a, 0x03, 0x2b, 0x53, 0xb1])
            .build();
        let il = generate(&method).unwrap();
        let block = il.cfg.layout()[0];
        let ops: Vec<ILOpCode> = il
            .tree_nodes(block)
            .iter()
            .map(|r| il.nodes[*r].op())
            .collect();

        assert_eq!(
            ops,
            vec![
                ILOpCode::NullChk,
                ILOpCode::BndChk,
                ILOpCode::StoreIndirect(DataType::Address),
                ILOpCode::NullChk,
                ILOpCode::BndChk,
                ILOpCode::ArrayStoreChk,
                ILOpCode::Return(DataType::NoType),
            ]
        );
    }
}
