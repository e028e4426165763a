//! Static and instance field accesses

use super::pending_push::SideEffect;
use super::walker::Flow;
use super::{Error, IlGenerator, Instruction, InternalError};
use crate::frontend::{ResolvedField, StaticValue};
use crate::il::{ConstValue, DataType, ILOpCode, NodeFlags, NodeId, Symbol};
use crate::jvm::{
    BaseType, BinaryName, Constant, ConstantIndex, FieldType, MemberRef, UnqualifiedName,
};

/// Conversion of a sub-`int` value, as stored in memory, to the `int` it is on the stack
fn widening(field_type: &FieldType) -> Option<ILOpCode> {
    let (from, unsigned) = match field_type {
        FieldType::Base(BaseType::Boolean | BaseType::Byte) => (DataType::Int8, false),
        FieldType::Base(BaseType::Char) => (DataType::Int16, true),
        FieldType::Base(BaseType::Short) => (DataType::Int16, false),
        _ => return None,
    };
    Some(ILOpCode::Convert {
        from,
        to: DataType::Int32,
        unsigned,
    })
}

/// Truncation of an `int` on the stack to a sub-`int` memory type
fn narrowing(field_type: &FieldType) -> Option<ILOpCode> {
    let to = match field_type {
        FieldType::Base(BaseType::Boolean | BaseType::Byte) => DataType::Int8,
        FieldType::Base(BaseType::Char | BaseType::Short) => DataType::Int16,
        _ => return None,
    };
    Some(ILOpCode::Convert {
        from: DataType::Int32,
        to,
        unsigned: false,
    })
}

fn field_ref<'a>(
    gen: &IlGenerator<'a>,
    index: ConstantIndex,
) -> Result<&'a MemberRef<FieldType>, Error> {
    match gen.constant(index)? {
        Constant::FieldRef(field) => Ok(field),
        _ => Err(Error::Internal(InternalError::UnexpectedConstant(index))),
    }
}

/// Field symbol, naming the declaring class once the field has been resolved
fn field_symbol(
    field: &MemberRef<FieldType>,
    resolved: Option<&ResolvedField>,
    is_static: bool,
) -> Symbol {
    let class = resolved.map_or(&field.class, |r| &r.class).clone();
    let name = field.name.clone();
    let field_type = field.descriptor.clone();
    if is_static {
        Symbol::StaticField {
            class,
            name,
            field_type,
        }
    } else {
        Symbol::InstanceField {
            class,
            name,
            field_type,
        }
    }
}

pub(super) fn gen_get_static(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let cp_index = insn.constant_index()?;
    let field = field_ref(gen, cp_index)?;
    let resolved = gen.front_end.resolve_field(field, true);

    if let Some(constant) = resolved.as_ref().and_then(|r| gen.fold_static_final(r)) {
        gen.push(constant);
        return Ok(Flow::Continue(insn.next_index()));
    }

    // Until `<clinit>` has run, the first access has to go through the runtime
    let unresolved = resolved.as_ref().map_or(true, |r| !r.class_initialized);
    let symbol = field_symbol(field, resolved.as_ref(), true);
    let data_type = DataType::from_field_type(&field.descriptor);
    let symref = gen.constant_symref(symbol, cp_index, unresolved);
    let load = gen.create_with_symref(ILOpCode::Load(data_type), symref, &[]);
    if unresolved {
        gen.append_check(ILOpCode::ResolveChk, load, &[]);
    }

    let value = gen.widen(load, &field.descriptor);
    let class = resolved.as_ref().map_or(&field.class, |r| &r.class);
    gen.apply_field_facts(value, class, &field.name);
    gen.push(value);
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_put_static(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let cp_index = insn.constant_index()?;
    let field = field_ref(gen, cp_index)?;
    let value = gen.pop()?;
    let resolved = gen.front_end.resolve_field(field, true);
    let unresolved = resolved.as_ref().map_or(true, |r| !r.class_initialized);

    let value = gen.narrow(value, &field.descriptor);
    let symbol = field_symbol(field, resolved.as_ref(), true);
    let symref = gen.constant_symref(symbol, cp_index, unresolved);
    let field_symref = gen.il.symbols[symref].clone();
    gen.handle_side_effect(SideEffect::FieldStore(field_symref));
    let data_type = DataType::from_field_type(&field.descriptor);
    let store = gen.create_with_symref(ILOpCode::Store(data_type), symref, &[value]);
    if unresolved {
        gen.append_check(ILOpCode::ResolveChk, store, &[]);
    } else {
        gen.append(store);
    }
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_get_field(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let cp_index = insn.constant_index()?;
    let field = field_ref(gen, cp_index)?;
    let object = gen.pop()?;
    let resolved = gen.front_end.resolve_field(field, false);

    let symbol = field_symbol(field, resolved.as_ref(), false);
    let data_type = DataType::from_field_type(&field.descriptor);
    let symref = gen.constant_symref(symbol, cp_index, resolved.is_none());
    let load = gen.create_with_symref(ILOpCode::LoadIndirect(data_type), symref, &[object]);
    gen.check_field_access(load, object, resolved.is_none());

    let value = gen.widen(load, &field.descriptor);
    let class = resolved.as_ref().map_or(&field.class, |r| &r.class);
    gen.apply_field_facts(value, class, &field.name);
    gen.push(value);
    Ok(Flow::Continue(insn.next_index()))
}

pub(super) fn gen_put_field(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let cp_index = insn.constant_index()?;
    let field = field_ref(gen, cp_index)?;
    let value = gen.pop()?;
    let object = gen.pop()?;
    let resolved = gen.front_end.resolve_field(field, false);

    let value = gen.narrow(value, &field.descriptor);
    let symbol = field_symbol(field, resolved.as_ref(), false);
    let symref = gen.constant_symref(symbol, cp_index, resolved.is_none());
    let field_symref = gen.il.symbols[symref].clone();
    gen.handle_side_effect(SideEffect::FieldStore(field_symref));
    let data_type = DataType::from_field_type(&field.descriptor);
    let op = ILOpCode::StoreIndirect(data_type);
    let store = gen.create_with_symref(op, symref, &[object, value]);
    if !gen.check_field_access(store, object, resolved.is_none()) {
        gen.append(store);
    }
    Ok(Flow::Continue(insn.next_index()))
}

impl<'a> IlGenerator<'a> {
    pub(super) fn widen(&mut self, value: NodeId, field_type: &FieldType) -> NodeId {
        match widening(field_type) {
            Some(op) => self.create(op, &[value]),
            None => value,
        }
    }

    pub(super) fn narrow(&mut self, value: NodeId, field_type: &FieldType) -> NodeId {
        match narrowing(field_type) {
            Some(op) => self.create(op, &[value]),
            None => value,
        }
    }

    /// Wrap an instance field access in whatever checks it needs, returning whether it was
    /// anchored by a check
    fn check_field_access(&mut self, access: NodeId, object: NodeId, unresolved: bool) -> bool {
        let check = match (unresolved, self.is_non_null(object)) {
            (true, false) => ILOpCode::ResolveAndNullChk,
            (true, true) => ILOpCode::ResolveChk,
            (false, false) => ILOpCode::NullChk,
            (false, true) => return false,
        };
        self.append_check(check, access, &[]);
        self.il.nodes.add_flags(object, NodeFlags::NON_NULL);
        true
    }

    /// Record what class lookahead knows about the value of a field
    fn apply_field_facts(&mut self, value: NodeId, class: &BinaryName, name: &UnqualifiedName) {
        if let Some(lookahead) = &self.lookahead {
            if lookahead.is_non_null(class, name) {
                self.il.nodes.add_flags(value, NodeFlags::NON_NULL);
            }
            if let Some(length) = lookahead.array_length(class, name) {
                self.array_lengths.insert(value, length);
            }
            if let Some(exact) = lookahead.exact_class(class, name) {
                self.exact_types.insert(value, exact.clone());
            }
        }
    }

    /// Current value of a `static final` field, as a constant node
    ///
    /// Reading the value needs VM access. Strings aren't folded since there is no constant node
    /// for an object.
    fn fold_static_final(&mut self, field: &ResolvedField) -> Option<NodeId> {
        let config = self.config;
        if !config.fold_static_finals || config.relocatable {
            return None;
        }
        if !field.is_final || !field.class_initialized {
            return None;
        }

        let value = {
            let access = self.front_end.acquire_vm_access();
            access.static_value(&field.class, &field.name).cloned()
        }?;
        let constant = match value {
            StaticValue::Int(i) => ConstValue::Int(i),
            StaticValue::Long(l) => ConstValue::Long(l),
            StaticValue::Float(f) => ConstValue::float(f),
            StaticValue::Double(d) => ConstValue::double(d),
            StaticValue::Null => ConstValue::NULL,
            StaticValue::String(_) => return None,
        };
        log::trace!("Folded {:?}.{:?} to {}", field.class, field.name, constant);
        Some(self.il.nodes.create_const(self.bc_index, constant))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frontend::Heap;
    use crate::ilgen::testing::{
        add_test_class, name, test_class_name, with_vm_and_heap, MethodBuilder,
    };
    use crate::ilgen::{generate_il, MethodDetails, TranslatorConfig};
    use crate::il::MethodIl;
    use crate::jvm::{
        ClassAccessFlags, ConstantPool, FieldAccessFlags, FieldData, FieldFacts, Name,
    };

    /// Generate a method of `Test`, which has a field `f` of the given type
    fn generate_with_field(
        code: &[u8],
        descriptor: &str,
        field_type: FieldType,
        field_flags: FieldAccessFlags,
        heap: Heap,
        config: &TranslatorConfig,
    ) -> Result<MethodIl, Error> {
        let mut pool = ConstantPool::new();
        pool.push(Constant::FieldRef(MemberRef {
            class: test_class_name(),
            name: name("f"),
            descriptor: field_type.clone(),
        }));
        let is_static = field_flags.contains(FieldAccessFlags::STATIC);
        let method = MethodBuilder::new(descriptor, is_static).code(code).build();
        with_vm_and_heap(
            move |graph| {
                let class = add_test_class(graph, pool, ClassAccessFlags::PUBLIC);
                graph.add_field(FieldData {
                    class,
                    name: name("f"),
                    descriptor: field_type,
                    access_flags: field_flags,
                    facts: FieldFacts::default(),
                });
            },
            heap,
            |vm| generate_il(&method, &MethodDetails::Ordinary, vm, config),
        )
    }

    fn static_final() -> FieldAccessFlags {
        FieldAccessFlags::STATIC | FieldAccessFlags::FINAL
    }

    fn heap_with(value: StaticValue) -> Heap {
        let mut heap = Heap::new();
        heap.set_static(test_class_name(), name("f"), value);
        heap
    }

    #[test]
    fn static_final_is_folded() {
        // getstatic #1; ireturn
        let code = [0xb2, 0x00, 0x01, 0xac];
        let config = TranslatorConfig::new();
        let il = generate_with_field(
            &code,
            "()I",
            FieldType::int(),
            static_final(),
            heap_with(StaticValue::Int(42)),
            &config,
        )
        .unwrap();
        let block = il.cfg.layout()[0];
        let ret = il.tree_nodes(block)[0];
        let value = il.nodes[ret].child(0).unwrap();
        assert_eq!(il.nodes[value].constant(), Some(ConstValue::Int(42)));
    }

    #[test]
    fn folding_is_idempotent() {
        let code = [0xb2, 0x00, 0x01, 0xac];
        let config = TranslatorConfig::new();
        let dumps: Vec<String> = (0..2)
            .map(|_| {
                let il = generate_with_field(
                    &code,
                    "()I",
                    FieldType::int(),
                    static_final(),
                    heap_with(StaticValue::Int(42)),
                    &config,
                )
                .unwrap();
                il.to_string()
            })
            .collect();
        assert_eq!(dumps[0], dumps[1]);
    }

    #[test]
    fn relocatable_code_loads_static_finals() {
        let code = [0xb2, 0x00, 0x01, 0xac];
        let mut config = TranslatorConfig::new();
        config.relocatable = true;
        let il = generate_with_field(
            &code,
            "()I",
            FieldType::int(),
            static_final(),
            heap_with(StaticValue::Int(42)),
            &config,
        )
        .unwrap();
        let block = il.cfg.layout()[0];
        let ret = il.tree_nodes(block)[0];
        let value = il.nodes[ret].child(0).unwrap();
        assert_eq!(il.nodes[value].op(), ILOpCode::Load(DataType::Int32));
        assert!(matches!(
            il.symbols[il.nodes[value].symref().unwrap()].symbol,
            Symbol::StaticField { .. }
        ));
    }

    #[test]
    fn byte_field_is_widened_and_narrowed() {
        // aload_0; dup; getfield #1; putfield #1; return
        let code = [0x2a, 0x59, 0xb4, 0x00, 0x01, 0xb5, 0x00, 0x01, 0xb1];
        let il = generate_with_field(
            &code,
            "()V",
            FieldType::Base(BaseType::Byte),
            FieldAccessFlags::PRIVATE,
            Heap::new(),
            &TranslatorConfig::new(),
        )
        .unwrap();
        let block = il.cfg.layout()[0];
        let roots = il.tree_nodes(block);

        // `this` is non-null, so the store needs no check
        let store = roots[0];
        assert_eq!(il.nodes[store].op(), ILOpCode::StoreIndirect(DataType::Int8));
        let narrowed = il.nodes[store].child(1).unwrap();
        assert_eq!(
            il.nodes[narrowed].op(),
            ILOpCode::Convert {
                from: DataType::Int32,
                to: DataType::Int8,
                unsigned: false
            }
        );
        let widened = il.nodes[narrowed].child(0).unwrap();
        assert_eq!(
            il.nodes[widened].op(),
            ILOpCode::Convert {
                from: DataType::Int8,
                to: DataType::Int32,
                unsigned: false
            }
        );
        let load = il.nodes[widened].child(0).unwrap();
        assert_eq!(il.nodes[load].op(), ILOpCode::LoadIndirect(DataType::Int8));
    }

    #[test]
    fn unresolved_field_on_nullable_object() {
        // aload_0; getfield #1; ireturn, in a static method so the object may be null
        let code = [0x2a, 0xb4, 0x00, 0x01, 0xac];
        let mut pool = ConstantPool::new();
        let missing = BinaryName::from_string("Missing".to_owned()).unwrap();
        pool.push(Constant::FieldRef(MemberRef {
            class: missing,
            name: name("f"),
            descriptor: FieldType::int(),
        }));
        let method = MethodBuilder::new("(LMissing;)I", true).code(&code).build();
        let il = crate::ilgen::testing::generate_with(
            &method,
            pool,
            &MethodDetails::Ordinary,
            &TranslatorConfig::new(),
        )
        .unwrap();
        let block = il.cfg.layout()[0];
        let check = il.tree_nodes(block)[0];
        assert_eq!(il.nodes[check].op(), ILOpCode::ResolveAndNullChk);
        let load = il.nodes[check].child(0).unwrap();
        let symref = il.nodes[load].symref().unwrap();
        assert!(il.symbols[symref].unresolved);
        assert!(il.flags.contains(crate::il::MethodFlags::HAS_UNRESOLVED_REFERENCES));
    }

    #[test]
    fn unresolved_store_may_overwrite_a_resolved_load() {
        // getstatic #1 (Test.f); iconst_1; putstatic #2 (Missing.f); ireturn
        // Missing may turn out to be a subclass of Test, so the load must happen before the store
        let code = [0xb2, 0x00, 0x01, 0x04, 0xb3, 0x00, 0x02, 0xac];
        let missing = BinaryName::from_string("Missing".to_owned()).unwrap();
        let mut pool = ConstantPool::new();
        for class in [test_class_name(), missing] {
            pool.push(Constant::FieldRef(MemberRef {
                class,
                name: name("f"),
                descriptor: FieldType::int(),
            }));
        }
        let method = MethodBuilder::new("()I", true).code(&code).build();
        let config = TranslatorConfig::new();
        let il = with_vm_and_heap(
            move |graph| {
                let class = add_test_class(graph, pool, ClassAccessFlags::PUBLIC);
                graph.add_field(FieldData {
                    class,
                    name: name("f"),
                    descriptor: FieldType::int(),
                    access_flags: FieldAccessFlags::STATIC,
                    facts: FieldFacts::default(),
                });
            },
            Heap::new(),
            |vm| generate_il(&method, &MethodDetails::Ordinary, vm, &config),
        )
        .unwrap();

        let block = il.cfg.layout()[0];
        let roots = il.tree_nodes(block);
        let ops: Vec<ILOpCode> = roots.iter().map(|r| il.nodes[*r].op()).collect();
        assert_eq!(
            ops,
            vec![
                ILOpCode::TreeTop,
                ILOpCode::ResolveChk,
                ILOpCode::Return(DataType::Int32)
            ]
        );
        let load = il.nodes[roots[0]].child(0).unwrap();
        assert_eq!(il.nodes[roots[2]].child(0), Some(load));
        let symref = &il.symbols[il.nodes[load].symref().unwrap()];
        assert!(!symref.unresolved);
        assert!(matches!(
            &symref.symbol,
            Symbol::StaticField { class, .. } if *class == test_class_name()
        ));
    }
}
