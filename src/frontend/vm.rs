use super::{
    ClassInfo, ClassLookahead, FrontEnd, Heap, ResolvedField, ResolvedMethod,
    UnknownByteCodeAction, VmAccess,
};
use crate::il::MethodKind;
use crate::jvm::{
    BinaryName, ClassData, ClassGraph, ConstantPool, FieldAccessFlags, FieldType, MemberRef,
    MethodAccessFlags, MethodData, MethodDescriptor, UnqualifiedName,
};
use parking_lot::Mutex;

/// Front end backed by an in-memory class graph
pub struct JavaVm<'g> {
    graph: &'g ClassGraph<'g>,
    heap: Mutex<Heap>,
    unknown_byte_codes: UnknownByteCodeAction,
}

impl<'g> JavaVm<'g> {
    pub fn new(graph: &'g ClassGraph<'g>) -> JavaVm<'g> {
        JavaVm::with_heap(graph, Heap::new())
    }

    pub fn with_heap(graph: &'g ClassGraph<'g>, heap: Heap) -> JavaVm<'g> {
        JavaVm {
            graph,
            heap: Mutex::new(heap),
            unknown_byte_codes: UnknownByteCodeAction::Abort,
        }
    }

    /// Choose how instructions the translator does not handle get treated
    pub fn set_unknown_byte_code_action(&mut self, action: UnknownByteCodeAction) {
        self.unknown_byte_codes = action;
    }

    /// Heap, for setting up state outside of translation
    pub fn heap_mut(&mut self) -> &mut Heap {
        self.heap.get_mut()
    }

    fn resolved_method(method: &MethodData<'g>) -> ResolvedMethod {
        ResolvedMethod {
            class: method.class.name.clone(),
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
            access_flags: method.access_flags,
            class_is_interface: method.class.is_interface(),
            class_is_final: method.class.is_final(),
            vtable_slot: method.vtable_slot,
        }
    }

    fn class_data(&self, class: &BinaryName) -> Option<&'g ClassData<'g>> {
        self.graph.lookup_class(class)
    }
}

impl<'g> FrontEnd for JavaVm<'g> {
    fn constant_pool(&self, class: &BinaryName) -> Option<&ConstantPool> {
        self.class_data(class).map(|c| &c.constant_pool)
    }

    fn class_info(&self, class: &BinaryName) -> Option<ClassInfo> {
        self.class_data(class).map(|c| ClassInfo {
            name: c.name.clone(),
            is_interface: c.is_interface(),
            is_final: c.is_final(),
            is_initialized: c.initialized.get(),
        })
    }

    fn resolve_field(
        &self,
        field: &MemberRef<FieldType>,
        is_static: bool,
    ) -> Option<ResolvedField> {
        let class = self.class_data(&field.class)?;
        let found = ClassGraph::find_field(class, &field.name, &field.descriptor)?;

        // Static-ness mismatches throw `IncompatibleClassChangeError` at runtime
        if found.access_flags.contains(FieldAccessFlags::STATIC) != is_static {
            log::debug!("Field {:?} resolved with the wrong static-ness", found);
            return None;
        }

        Some(ResolvedField {
            class: found.class.name.clone(),
            name: found.name.clone(),
            field_type: found.descriptor.clone(),
            is_static,
            is_final: found.access_flags.contains(FieldAccessFlags::FINAL),
            is_volatile: found.access_flags.contains(FieldAccessFlags::VOLATILE),
            class_initialized: found.class.initialized.get(),
        })
    }

    fn resolve_method(
        &self,
        method: &MemberRef<MethodDescriptor>,
        kind: MethodKind,
    ) -> Option<ResolvedMethod> {
        let class = self.class_data(&method.class)?;
        let found = ClassGraph::find_method(class, &method.name, &method.descriptor)?;

        let is_static = found.access_flags.contains(MethodAccessFlags::STATIC);
        let kind_ok = match kind {
            MethodKind::Static => is_static,
            MethodKind::Special | MethodKind::Virtual | MethodKind::Interface => !is_static,
            MethodKind::Computed => true,
        };
        if !kind_ok {
            log::debug!("Method {:?} resolved with the wrong kind {:?}", found, kind);
            return None;
        }

        Some(Self::resolved_method(found))
    }

    fn find_implementation(
        &self,
        receiver_class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Option<ResolvedMethod> {
        let class = self.class_data(receiver_class)?;
        let found = ClassGraph::find_method(class, name, descriptor)?;
        if found.access_flags.contains(MethodAccessFlags::ABSTRACT) {
            return None;
        }
        Some(Self::resolved_method(found))
    }

    fn class_lookahead(&self, class: &BinaryName) -> Option<ClassLookahead> {
        let class = self.class_data(class)?;

        // Facts about fields are only stable once the static initializer has run
        if !class.initialized.get() {
            return None;
        }

        let mut lookahead = ClassLookahead::new(class.name.clone());
        for field in class.fields.iter() {
            lookahead.add_field(field.name.clone(), field.facts.clone());
        }
        Some(lookahead)
    }

    fn acquire_vm_access(&self) -> VmAccess<'_> {
        log::trace!("Acquiring VM access");
        VmAccess::new(self.heap.lock())
    }

    fn unknown_byte_code(&self, byte_code: u8, bc_index: usize) -> UnknownByteCodeAction {
        log::debug!(
            "Unknown bytecode {:#04x} at {}: {:?}",
            byte_code,
            bc_index,
            self.unknown_byte_codes
        );
        self.unknown_byte_codes
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frontend::StaticValue;
    use crate::jvm::{
        ClassAccessFlags, ClassGraphArenas, FieldData, FieldFacts, Name, ParseDescriptor,
    };

    #[test]
    fn resolution_follows_the_class_graph() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let object = graph.add_class(ClassData::new(
            BinaryName::OBJECT,
            None,
            ClassAccessFlags::PUBLIC,
        ));
        let point_name = BinaryName::from_string("Point".to_owned()).unwrap();
        let point = graph.add_class(ClassData::new(
            point_name.clone(),
            Some(object),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL,
        ));
        point.initialized.set(true);
        let x = UnqualifiedName::from_string("x".to_owned()).unwrap();
        graph.add_field(FieldData {
            class: point,
            name: x.clone(),
            descriptor: FieldType::int(),
            access_flags: FieldAccessFlags::PRIVATE,
            facts: FieldFacts::default(),
        });
        let hash_code = UnqualifiedName::from_string("hashCode".to_owned()).unwrap();
        let int_method = MethodDescriptor::parse("()I").unwrap();
        graph.add_method(MethodData {
            class: object,
            name: hash_code.clone(),
            descriptor: int_method.clone(),
            access_flags: MethodAccessFlags::PUBLIC,
            vtable_slot: Some(2),
        });

        let vm = JavaVm::new(&graph);
        let x_ref = MemberRef {
            class: point_name.clone(),
            name: x,
            descriptor: FieldType::int(),
        };
        assert!(vm.resolve_field(&x_ref, false).is_some());
        assert!(vm.resolve_field(&x_ref, true).is_none());

        let hash_ref = MemberRef {
            class: point_name.clone(),
            name: hash_code,
            descriptor: int_method,
        };
        let resolved = vm.resolve_method(&hash_ref, MethodKind::Virtual).unwrap();
        assert_eq!(resolved.class, BinaryName::OBJECT);
        assert!(!resolved.is_final());
        assert!(vm.resolve_method(&hash_ref, MethodKind::Static).is_none());

        assert!(vm.class_info(&point_name).unwrap().is_final);
        assert!(vm.class_lookahead(&point_name).is_some());
        assert!(vm.class_lookahead(&BinaryName::OBJECT).is_none());
    }

    #[test]
    fn heap_reads_need_access() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        let mut vm = JavaVm::new(&graph);
        let name = UnqualifiedName::from_string("SIZE".to_owned()).unwrap();
        vm.heap_mut()
            .set_static(BinaryName::INTEGER, name.clone(), StaticValue::Int(32));

        let access = vm.acquire_vm_access();
        assert_eq!(
            access.static_value(&BinaryName::INTEGER, &name),
            Some(&StaticValue::Int(32))
        );
        drop(access);
        assert!(vm.heap.try_lock().is_some());
    }
}
