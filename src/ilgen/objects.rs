//! Object allocation, type tests, monitors, throws, and `ldc`

use super::pending_push::SideEffect;
use super::walker::{malformed, Flow};
use super::{Error, IlGenerator, Instruction, InternalError};
use crate::il::{ConstValue, DataType, ILOpCode, MethodFlags, NodeFlags, NodeId, Symbol};
use crate::jvm::{BinaryName, ByteCode, Constant, ConstantIndex, RefType};

pub(super) fn gen_new(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let cp_index = insn.constant_index()?;
    let (class, unresolved) = gen.load_class_address(cp_index)?;
    let object = gen.create(ILOpCode::New, &[class]);
    if unresolved {
        gen.append_check(ILOpCode::ResolveChk, object, &[]);
    } else {
        gen.append(object);
    }

    if let Constant::Class(RefType::Object(name)) = gen.constant(cp_index)? {
        gen.exact_types.insert(object, name.clone());
    }
    gen.il.nodes.add_flags(object, NodeFlags::NON_NULL);
    gen.il.flags |= MethodFlags::HAS_NEWS;
    gen.push(object);
    Ok(Flow::Continue(insn.next_index()))
}

/// `checkcast` leaves the object on the stack
///
/// Against an unresolved class, an object that may be null leaves the resolution to the
/// post-walk expansion, which keeps null objects from triggering it.
pub(super) fn gen_checkcast(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let cp_index = insn.constant_index()?;
    let object = gen.peek()?;
    let (class, unresolved) = gen.load_class_address(cp_index)?;
    let cast = gen.create(ILOpCode::CheckCast, &[object, class]);
    match (unresolved, gen.is_non_null(object)) {
        (true, true) => {
            gen.append_check(ILOpCode::ResolveChk, cast, &[]);
        }
        (true, false) => {
            let tree = gen.append(cast);
            gen.unresolved_type_tests.push(tree);
        }
        (false, _) => {
            gen.append(cast);
        }
    }
    gen.il.flags |= MethodFlags::HAS_CHECKCASTS_OR_INSTANCEOFS;
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_instanceof(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let cp_index = insn.constant_index()?;
    let object = gen.pop()?;
    let (class, unresolved) = gen.load_class_address(cp_index)?;
    let test = gen.create(ILOpCode::InstanceOf, &[object, class]);
    match (unresolved, gen.is_non_null(object)) {
        (true, true) => {
            gen.append_check(ILOpCode::ResolveChk, test, &[]);
        }
        (true, false) => {
            let tree = gen.append(test);
            gen.unresolved_type_tests.push(tree);
        }
        (false, _) => {}
    }
    gen.il.flags |= MethodFlags::HAS_CHECKCASTS_OR_INSTANCEOFS;
    gen.push(test);
    Ok(Flow::Continue(insn.next_index()))
}

/// `monitorenter` and `monitorexit`
pub(super) fn gen_monitor(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let op = match insn.byte_code()? {
        ByteCode::MonitorEnter => ILOpCode::MonEnter,
        ByteCode::MonitorExit => ILOpCode::MonExit,
        _ => return Err(malformed(insn)),
    };
    let object = gen.pop()?;

    // Other threads get to run their stores once the monitor changes hands
    gen.handle_side_effect(SideEffect::Call);
    let monitor = gen.create(op, &[object]);
    if gen.is_non_null(object) {
        gen.append(monitor);
    } else {
        gen.append_check(ILOpCode::NullChk, monitor, &[]);
        gen.il.nodes.add_flags(object, NodeFlags::NON_NULL);
    }
    gen.il.flags |= MethodFlags::HAS_MONITORS;
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_athrow(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let exception = gen.pop()?;
    let throw = gen.create(ILOpCode::AThrow, &[exception]);
    let tree = if gen.is_non_null(exception) {
        throw
    } else {
        gen.create(ILOpCode::NullChk, &[throw])
    };
    log::trace!("Throw at {} in {}", insn.bc_index, gen.current_block);

    // Parented before the rest of the stack lets go of it
    gen.stack.discard_entire_stack(&mut gen.il.nodes);
    gen.append(tree);

    let end = gen.il.cfg.end();
    gen.il.cfg.add_edge(gen.current_block, end);
    Ok(Flow::End)
}

/// `ldc`, `ldc_w`, and `ldc2_w`
pub(super) fn gen_ldc(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let cp_index = insn.constant_index()?;
    let node = match gen.constant(cp_index)? {
        Constant::Integer(i) => gen.il.nodes.iconst(gen.bc_index, *i),
        Constant::Float(f) => gen.il.nodes.create_const(gen.bc_index, ConstValue::float(*f)),
        Constant::Long(l) => gen.il.nodes.create_const(gen.bc_index, ConstValue::Long(*l)),
        Constant::Double(d) => gen.il.nodes.create_const(gen.bc_index, ConstValue::double(*d)),
        Constant::String(_) => {
            let unresolved = gen.config.relocatable;
            gen.load_constant_object(Symbol::StringConstant(cp_index), cp_index, unresolved)
        }
        Constant::MethodType(_) => {
            gen.load_constant_object(Symbol::MethodTypeConstant(cp_index), cp_index, true)
        }
        Constant::MethodHandle(..) => {
            gen.load_constant_object(Symbol::MethodHandleConstant(cp_index), cp_index, true)
        }
        Constant::Class(_) => {
            let (class, unresolved) = gen.load_class_address(cp_index)?;
            let java_class = gen.create_with_symbol(
                ILOpCode::LoadIndirect(DataType::Address),
                Symbol::JavaLangClassFromClass,
                &[class],
            );
            if unresolved {
                gen.append_check(ILOpCode::ResolveChk, java_class, &[]);
            }
            gen.il.nodes.add_flags(java_class, NodeFlags::NON_NULL);
            gen.exact_types.insert(java_class, BinaryName::CLASS);
            java_class
        }
        _ => return Err(Error::Internal(InternalError::UnexpectedConstant(cp_index))),
    };
    gen.push(node);
    Ok(Flow::Continue(insn.next_index()))
}

impl<'a> IlGenerator<'a> {
    /// `loadaddr` of the class named by a constant pool entry, and whether it still has to be
    /// resolved at runtime
    pub(super) fn load_class_address(
        &mut self,
        cp_index: ConstantIndex,
    ) -> Result<(NodeId, bool), Error> {
        let ref_type = match self.constant(cp_index)? {
            Constant::Class(ref_type) => ref_type,
            _ => return Err(Error::Internal(InternalError::UnexpectedConstant(cp_index))),
        };
        let loaded = match ref_type {
            RefType::Object(name) => self.front_end.class_info(name).is_some(),
            RefType::ObjectArray(array) => self.front_end.class_info(&array.element_type).is_some(),
            RefType::PrimitiveArray(_) => true,
        };
        let unresolved = self.config.relocatable || !loaded;
        let symref = self.constant_symref(Symbol::Class(ref_type.clone()), cp_index, unresolved);
        let class = self.create_with_symref(ILOpCode::LoadAddr, symref, &[]);
        self.il.nodes.add_flags(class, NodeFlags::NON_NULL);
        Ok((class, unresolved))
    }

    /// Load of a string, method type or method handle constant
    fn load_constant_object(
        &mut self,
        symbol: Symbol,
        cp_index: ConstantIndex,
        unresolved: bool,
    ) -> NodeId {
        let symref = self.constant_symref(symbol, cp_index, unresolved);
        let load = self.create_with_symref(ILOpCode::Load(DataType::Address), symref, &[]);
        if unresolved {
            self.append_check(ILOpCode::ResolveChk, load, &[]);
        }
        self.il.nodes.add_flags(load, NodeFlags::NON_NULL);
        load
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ilgen::testing::{generate, generate_with, test_class_name, MethodBuilder};
    use crate::ilgen::{MethodDetails, TranslatorConfig};
    use crate::il::{BlockId, CompareCondition, MethodIl};
    use crate::jvm::{ConstantPool, Name};

    fn generate_with_constant(
        constant: Constant,
        descriptor: &str,
        code: &[u8],
        config: &TranslatorConfig,
    ) -> MethodIl {
        let mut pool = ConstantPool::new();
        pool.push(constant);
        let method = MethodBuilder::new(descriptor, true).code(code).build();
        generate_with(&method, pool, &MethodDetails::Ordinary, config).unwrap()
    }

    #[test]
    fn new_object_is_exact_and_non_null() {
        // new #1; areturn
        let il = generate_with_constant(
            Constant::Class(RefType::Object(test_class_name())),
            "()Ljava/lang/Object;",
            &[0xbb, 0x00, 0x01, 0xb0],
            &TranslatorConfig::new(),
        );
        assert!(il.flags.contains(MethodFlags::HAS_NEWS));
        let block = il.cfg.layout()[0];
        let roots = il.tree_nodes(block);
        assert_eq!(il.nodes[roots[0]].op(), ILOpCode::TreeTop);
        let object = il.nodes[roots[1]].child(0).unwrap();
        assert_eq!(il.nodes[object].op(), ILOpCode::New);
        assert!(il.nodes[object].is_non_null());
    }

    #[test]
    fn throwing_a_nullable_exception() {
        // aload_0; athrow
        let method = MethodBuilder::new("(Ljava/lang/Throwable;)V", true)
            .code(&[0x2a, 0xbf])
            .build();
        let il = generate(&method).unwrap();
        let block = il.cfg.layout()[0];
        let roots = il.tree_nodes(block);
        assert_eq!(roots.len(), 1);
        assert_eq!(il.nodes[roots[0]].op(), ILOpCode::NullChk);
        let throw = il.nodes[roots[0]].child(0).unwrap();
        assert_eq!(il.nodes[throw].op(), ILOpCode::AThrow);
        assert!(il.ends_in_unconditional_transfer(block));
        assert!(il.cfg.successors(block).any(|b| b == il.cfg.end()));
    }

    #[test]
    fn monitors_on_this_need_no_null_check() {
        // aload_0; monitorenter; aload_0; monitorexit; return
        let method = MethodBuilder::new("()V", false)
            .code(&[0x2a, 0xc2, 0x2a, 0xc3, 0xb1])
            .build();
        let il = generate(&method).unwrap();
        assert!(il.flags.contains(MethodFlags::HAS_MONITORS));
        let block = il.cfg.layout()[0];
        let ops: Vec<ILOpCode> = il
            .tree_nodes(block)
            .iter()
            .map(|r| il.nodes[*r].op())
            .collect();
        assert_eq!(
            ops,
            vec![
                ILOpCode::MonEnter,
                ILOpCode::MonExit,
                ILOpCode::Return(DataType::NoType)
            ]
        );
    }

    #[test]
    fn class_constants_load_the_class_object() {
        // ldc #1; areturn
        let code = [0x12, 0x01, 0xb0];
        let class = Constant::Class(RefType::Object(test_class_name()));
        let il = generate_with_constant(
            class.clone(),
            "()Ljava/lang/Class;",
            &code,
            &TranslatorConfig::new(),
        );
        let block = il.cfg.layout()[0];
        let roots = il.tree_nodes(block);
        assert_eq!(roots.len(), 1);
        let java_class = il.nodes[roots[0]].child(0).unwrap();
        assert_eq!(
            il.nodes[java_class].op(),
            ILOpCode::LoadIndirect(DataType::Address)
        );
        let address = il.nodes[java_class].child(0).unwrap();
        assert_eq!(il.nodes[address].op(), ILOpCode::LoadAddr);

        let mut config = TranslatorConfig::new();
        config.relocatable = true;
        let il = generate_with_constant(class, "()Ljava/lang/Class;", &code, &config);
        let block = il.cfg.layout()[0];
        assert_eq!(il.nodes[il.tree_nodes(block)[0]].op(), ILOpCode::ResolveChk);
    }

    fn missing_class() -> Constant {
        Constant::Class(RefType::Object(
            BinaryName::from_string("Missing".to_owned()).unwrap(),
        ))
    }

    fn ops(il: &MethodIl, block: BlockId) -> Vec<ILOpCode> {
        il.tree_nodes(block)
            .iter()
            .map(|root| il.nodes[*root].op())
            .collect()
    }

    #[test]
    fn checkcast_to_an_unloaded_class() {
        // aload_0; checkcast #1; areturn
        let il = generate_with_constant(
            missing_class(),
            "(Ljava/lang/Object;)Ljava/lang/Object;",
            &[0x2a, 0xc0, 0x00, 0x01, 0xb0],
            &TranslatorConfig::new(),
        );
        assert!(il.flags.contains(MethodFlags::HAS_CHECKCASTS_OR_INSTANCEOFS));
        assert!(il.flags.contains(MethodFlags::HAS_UNRESOLVED_REFERENCES));
        assert!(il.flags.contains(MethodFlags::HAS_BRANCHES));

        let layout = il.cfg.layout().to_vec();
        assert_eq!(layout.len(), 3);
        let (head, test, tail) = (layout[0], layout[1], layout[2]);
        assert_eq!(
            ops(&il, head),
            vec![
                ILOpCode::TreeTop,
                ILOpCode::Store(DataType::Address),
                ILOpCode::IfCmp {
                    data_type: DataType::Address,
                    condition: CompareCondition::Eq,
                    unordered: false
                }
            ]
        );
        assert_eq!(ops(&il, test), vec![ILOpCode::ResolveChk]);
        assert_eq!(ops(&il, tail), vec![ILOpCode::Return(DataType::Address)]);

        // Null objects branch straight to the return, past the resolution
        let branch = il.tree_nodes(head)[2];
        assert_eq!(il.nodes[branch].branch_target(), Some(tail));
        let null = il.nodes[branch].child(1).unwrap();
        assert_eq!(il.nodes[null].constant(), Some(ConstValue::NULL));
        let mut successors: Vec<BlockId> = il.cfg.successors(head).collect();
        successors.sort();
        assert_eq!(successors, vec![test, tail]);
        assert_eq!(il.cfg.successors(test).collect::<Vec<_>>(), vec![tail]);

        let cast = il.nodes[il.tree_nodes(test)[0]].child(0).unwrap();
        assert_eq!(il.nodes[cast].op(), ILOpCode::CheckCast);
        let returned = il.nodes[il.tree_nodes(tail)[0]].child(0).unwrap();
        let cast_object = il.nodes[cast].child(0).unwrap();
        assert_ne!(returned, cast_object);
        assert_eq!(il.nodes[returned].symref(), il.nodes[cast_object].symref());
    }

    #[test]
    fn checkcast_of_a_non_null_object_resolves_in_place() {
        // aload_0; checkcast #1; areturn
        let mut pool = ConstantPool::new();
        pool.push(missing_class());
        let method = MethodBuilder::new("()Ljava/lang/Object;", false)
            .code(&[0x2a, 0xc0, 0x00, 0x01, 0xb0])
            .build();
        let il = generate_with(&method, pool, &MethodDetails::Ordinary, &TranslatorConfig::new())
            .unwrap();
        assert_eq!(il.cfg.layout().len(), 1);
        let block = il.cfg.layout()[0];
        assert_eq!(
            ops(&il, block),
            vec![ILOpCode::ResolveChk, ILOpCode::Return(DataType::Address)]
        );
        let roots = il.tree_nodes(block);
        let cast = il.nodes[roots[0]].child(0).unwrap();
        assert_eq!(il.nodes[cast].op(), ILOpCode::CheckCast);
        assert_eq!(il.nodes[roots[1]].child(0), il.nodes[cast].child(0));
    }

    #[test]
    fn instanceof_of_null_against_an_unloaded_class() {
        // aload_0; instanceof #1; ireturn
        let il = generate_with_constant(
            missing_class(),
            "(Ljava/lang/Object;)I",
            &[0x2a, 0xc1, 0x00, 0x01, 0xac],
            &TranslatorConfig::new(),
        );
        let layout = il.cfg.layout().to_vec();
        assert_eq!(layout.len(), 4);
        let (head, test, tail, null_block) = (layout[0], layout[1], layout[2], layout[3]);

        let branch = *il.tree_nodes(head).last().unwrap();
        assert_eq!(il.nodes[branch].branch_target(), Some(null_block));
        assert!(il.cfg.block(null_block).is_cold);
        assert!(!ops(&il, null_block).contains(&ILOpCode::ResolveChk));
        assert!(!ops(&il, head).contains(&ILOpCode::ResolveChk));
        assert!(!ops(&il, tail).contains(&ILOpCode::ResolveChk));

        // The null path sets the result to 0 and rejoins the tail
        let null_roots = il.tree_nodes(null_block);
        assert_eq!(il.nodes[null_roots[0]].op(), ILOpCode::Store(DataType::Int32));
        let result = il.nodes[null_roots[0]].symref();
        let zero = il.nodes[null_roots[0]].child(0).unwrap();
        assert_eq!(il.nodes.integer_value(zero), Some(0));
        assert_eq!(il.nodes[null_roots[1]].op(), ILOpCode::Goto);
        assert_eq!(il.nodes[null_roots[1]].branch_target(), Some(tail));
        assert_eq!(il.cfg.successors(null_block).collect::<Vec<_>>(), vec![tail]);

        // The resolving path stores the test's outcome into the same temporary
        assert_eq!(
            ops(&il, test),
            vec![ILOpCode::ResolveChk, ILOpCode::Store(DataType::Int32)]
        );
        let roots = il.tree_nodes(test);
        let instance_of = il.nodes[roots[0]].child(0).unwrap();
        assert_eq!(il.nodes[instance_of].op(), ILOpCode::InstanceOf);
        assert_eq!(il.nodes[roots[1]].child(0), Some(instance_of));
        assert_eq!(il.nodes[roots[1]].symref(), result);
        assert_eq!(il.cfg.successors(test).collect::<Vec<_>>(), vec![tail]);

        let ret = il.tree_nodes(tail)[0];
        let value = il.nodes[ret].child(0).unwrap();
        assert_eq!(il.nodes[value].op(), ILOpCode::Load(DataType::Int32));
        assert_eq!(il.nodes[value].symref(), result);
    }

    #[test]
    fn string_constants_are_non_null() {
        // ldc #1; areturn
        let il = generate_with_constant(
            Constant::String("hello".to_owned()),
            "()Ljava/lang/String;",
            &[0x12, 0x01, 0xb0],
            &TranslatorConfig::new(),
        );
        let block = il.cfg.layout()[0];
        let string = il.nodes[il.tree_nodes(block)[0]].child(0).unwrap();
        assert!(il.nodes[string].is_non_null());
        assert_eq!(
            il.symbols[il.nodes[string].symref().unwrap()].symbol,
            Symbol::StringConstant(ConstantIndex(1))
        );
    }
}
