//! Local variable loads and stores

use super::pending_push::SideEffect;
use super::walker::{malformed, Flow};
use super::{Error, IlGenerator, Instruction, MethodDetails, Operands};
use crate::il::{ArithOp, DataType, ILOpCode, NodeFlags, NodeId, Symbol};
use crate::jvm::{ByteCode, Width};

/// Slot and type of a local variable instruction
fn local_operand(insn: &Instruction) -> Result<(u16, DataType), Error> {
    use ByteCode::*;
    let raw = insn.raw as u16;
    Ok(match insn.byte_code()? {
        ILoad | IStore => (insn.local()?, DataType::Int32),
        LLoad | LStore => (insn.local()?, DataType::Int64),
        FLoad | FStore => (insn.local()?, DataType::Float),
        DLoad | DStore => (insn.local()?, DataType::Double),
        ALoad | AStore => (insn.local()?, DataType::Address),
        ILoad0 | ILoad1 | ILoad2 | ILoad3 => (raw - 0x1a, DataType::Int32),
        LLoad0 | LLoad1 | LLoad2 | LLoad3 => (raw - 0x1e, DataType::Int64),
        FLoad0 | FLoad1 | FLoad2 | FLoad3 => (raw - 0x22, DataType::Float),
        DLoad0 | DLoad1 | DLoad2 | DLoad3 => (raw - 0x26, DataType::Double),
        ALoad0 | ALoad1 | ALoad2 | ALoad3 => (raw - 0x2a, DataType::Address),
        IStore0 | IStore1 | IStore2 | IStore3 => (raw - 0x3b, DataType::Int32),
        LStore0 | LStore1 | LStore2 | LStore3 => (raw - 0x3f, DataType::Int64),
        FStore0 | FStore1 | FStore2 | FStore3 => (raw - 0x43, DataType::Float),
        DStore0 | DStore1 | DStore2 | DStore3 => (raw - 0x47, DataType::Double),
        AStore0 | AStore1 | AStore2 | AStore3 => (raw - 0x4b, DataType::Address),
        _ => return Err(malformed(insn)),
    })
}

pub(super) fn gen_load(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let (slot, data_type) = local_operand(insn)?;
    let node = gen.load_local(slot, data_type);
    gen.push(node);
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_store(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let (slot, data_type) = local_operand(insn)?;
    let value = gen.pop()?;
    gen.store_local(slot, data_type, value);
    Ok(Flow::Continue(insn.next_index()))
}

/// `iinc` is `istore(iadd(iload, iconst))`
pub(super) fn gen_iinc(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let (slot, delta) = match insn.operands {
        Operands::Increment { local, delta } => (local, delta),
        _ => return Err(malformed(insn)),
    };
    let load = gen.load_variable(slot, DataType::Int32);
    let delta = gen.il.nodes.iconst(gen.bc_index, delta as i32);
    let add = gen.create(ILOpCode::Arith(ArithOp::Add, DataType::Int32), &[load, delta]);
    gen.store_local(slot, DataType::Int32, add);
    Ok(Flow::Continue(insn.next_index()))
}

impl<'a> IlGenerator<'a> {
    /// Does an incoming parameter of this type start at this slot?
    fn is_parameter(&self, slot: u16, data_type: DataType) -> bool {
        let mut next: u16 = 0;
        if !self.method.is_static() {
            if slot == 0 {
                return data_type == DataType::Address;
            }
            next = 1;
        }
        for parameter in &self.method.descriptor.parameters {
            if next == slot {
                return DataType::from_field_type(parameter).stack_type() == data_type;
            }
            next += parameter.width() as u16;
            if next > slot {
                break;
            }
        }
        false
    }

    /// Parameter or auto symbol for a local variable slot
    pub(super) fn local_symbol(&self, slot: u16, data_type: DataType) -> Symbol {
        if self.is_parameter(slot, data_type) {
            Symbol::Parm { slot, data_type }
        } else {
            Symbol::Auto { slot, data_type }
        }
    }

    /// Load of a local variable, or of the placeholder in an archetype specimen
    pub(super) fn load_local(&mut self, slot: u16, data_type: DataType) -> NodeId {
        let details = self.details;
        if let MethodDetails::ArchetypeSpecimen {
            placeholder_slot,
            parameters,
        } = details
        {
            if slot == *placeholder_slot && data_type == DataType::Int32 {
                let mut arguments = vec![];
                let mut next = *placeholder_slot;
                for parameter in parameters {
                    let data_type = DataType::from_field_type(parameter).stack_type();
                    arguments.push(self.load_variable(next, data_type));
                    next += parameter.width() as u16;
                }
                log::trace!("Placeholder for {} archetype arguments", arguments.len());
                let placeholder = Symbol::Placeholder {
                    parameters: parameters.clone(),
                };
                let symref = self.il.symbols.find_or_create_symbol(placeholder);
                return self.placeholder_call(symref, self.bc_index, &arguments);
            }
        }
        self.load_variable(slot, data_type)
    }

    /// Load of a local variable slot
    pub(super) fn load_variable(&mut self, slot: u16, data_type: DataType) -> NodeId {
        let symbol = self.local_symbol(slot, data_type);
        let node = self.create_with_symbol(ILOpCode::Load(data_type), symbol, &[]);
        let is_this = slot == 0 && data_type == DataType::Address && !self.method.is_static();
        if is_this && !self.this_changed {
            self.il
                .nodes
                .add_flags(node, NodeFlags::NON_NULL | NodeFlags::THIS);
        }
        node
    }

    pub(super) fn store_local(&mut self, slot: u16, data_type: DataType, value: NodeId) {
        let end = slot + data_type.width() as u16;
        self.handle_side_effect(SideEffect::LocalStore(slot..end));
        let symbol = self.local_symbol(slot, data_type);
        let store = self.create_with_symbol(ILOpCode::Store(data_type), symbol, &[value]);
        self.append(store);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ilgen::testing::{generate, generate_with, MethodBuilder};
    use crate::ilgen::TranslatorConfig;
    use crate::jvm::{ConstantPool, FieldType};

    #[test]
    fn parameters_and_autos() {
        // aload_0; pop; iload_1; istore_3; return
        let method = MethodBuilder::new("(IJ)V", false)
            .code(&[0x2a, 0x57, 0x1b, 0x3e, 0xb1])
            .build();
        let il = generate(&method).unwrap();
        let symbols: Vec<&Symbol> = il.symbols.iter().map(|(_, s)| &s.symbol).collect();
        assert!(symbols.contains(&&Symbol::Parm {
            slot: 0,
            data_type: DataType::Address
        }));
        assert!(symbols.contains(&&Symbol::Parm {
            slot: 1,
            data_type: DataType::Int32
        }));
        assert!(symbols.contains(&&Symbol::Auto {
            slot: 3,
            data_type: DataType::Int32
        }));
    }

    #[test]
    fn receiver_is_non_null_until_overwritten() {
        // aload_0; areturn
        let method = MethodBuilder::new("()Ljava/lang/Object;", false)
            .code(&[0x2a, 0xb0])
            .build();
        let il = generate(&method).unwrap();
        let block = il.cfg.layout()[0];
        let ret = il.tree_nodes(block)[0];
        let this = il.nodes[ret].child(0).unwrap();
        assert!(il.nodes[this].flags().contains(NodeFlags::NON_NULL | NodeFlags::THIS));

        // aconst_null; astore_0; aload_0; areturn
        let method = MethodBuilder::new("()Ljava/lang/Object;", false)
            .code(&[0x01, 0x4b, 0x2a, 0xb0])
            .build();
        let il = generate(&method).unwrap();
        let block = il.cfg.layout()[0];
        let ret = il.tree_nodes(block)[1];
        let this = il.nodes[ret].child(0).unwrap();
        assert!(!il.nodes[this].is_non_null());
    }

    #[test]
    fn load_is_anchored_before_overwriting_store() {
        // iload_0; iconst_5; istore_0; ireturn
        let method = MethodBuilder::new("(I)I", true)
            .code(&[0x1a, 0x08, 0x3b, 0xac])
            .build();
        let il = generate(&method).unwrap();
        let block = il.cfg.layout()[0];
        let roots = il.tree_nodes(block);
        assert_eq!(roots.len(), 3);
        assert_eq!(il.nodes[roots[0]].op(), ILOpCode::TreeTop);
        let load = il.nodes[roots[0]].child(0).unwrap();
        assert_eq!(il.nodes[load].op(), ILOpCode::Load(DataType::Int32));
        assert_eq!(il.nodes[roots[1]].op(), ILOpCode::Store(DataType::Int32));
        assert_eq!(il.nodes[roots[2]].child(0), Some(load));
    }

    #[test]
    fn iinc_is_load_add_store() {
        // iinc 0 -3; return
        let method = MethodBuilder::new("(I)V", true)
            .code(&[0x84, 0x00, 0xfd, 0xb1])
            .build();
        let il = generate(&method).unwrap();
        let block = il.cfg.layout()[0];
        let store = il.tree_nodes(block)[0];
        assert_eq!(il.nodes[store].op(), ILOpCode::Store(DataType::Int32));
        let add = il.nodes[store].child(0).unwrap();
        assert_eq!(
            il.nodes[add].op(),
            ILOpCode::Arith(ArithOp::Add, DataType::Int32)
        );
        let delta = il.nodes[add].child(1).unwrap();
        assert_eq!(il.nodes.integer_value(delta), Some(-3));
    }

    #[test]
    fn archetype_placeholder_loads_every_argument() {
        // iload_1; pop; return (the placeholder is saved nowhere, so it just gets dropped)
        let method = MethodBuilder::new("(Ljava/lang/Object;IJ)V", true)
            .code(&[0x1b, 0x57, 0xb1])
            .build();
        let details = MethodDetails::ArchetypeSpecimen {
            placeholder_slot: 1,
            parameters: vec![FieldType::int(), FieldType::long()],
        };
        let il = generate_with(&method, ConstantPool::new(), &details, &TranslatorConfig::new())
            .unwrap();
        let placeholder = il
            .symbols
            .iter()
            .find(|(_, s)| matches!(s.symbol, Symbol::Placeholder { .. }));
        assert!(placeholder.is_some());
        assert!(il.symbols.iter().any(|(_, s)| s.symbol
            == Symbol::Parm {
                slot: 2,
                data_type: DataType::Int64
            }));
    }
}
