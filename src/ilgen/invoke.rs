//! Method invocations

use super::intrinsics;
use super::pending_push::SideEffect;
use super::signature::ArtificialSignature;
use super::walker::{malformed, Flow};
use super::{CompilationAbort, Error, IlGenerator, Instruction, InternalError};
use crate::il::{DataType, ILOpCode, MethodFlags, MethodKind, NodeFlags, NodeId, Symbol};
use crate::jvm::{
    BinaryName, ByteCode, Constant, ConstantIndex, MemberRef, MethodDescriptor, UnqualifiedName,
};

/// `invokevirtual`, `invokespecial`, `invokestatic`, `invokeinterface`, and `invokedynamic`
pub(super) fn gen_invoke(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let cp_index = insn.constant_index()?;
    let kind = match insn.byte_code()? {
        ByteCode::InvokeDynamic => {
            gen.gen_invoke_dynamic(cp_index)?;
            return Ok(Flow::Continue(insn.next_index()));
        }
        ByteCode::InvokeStatic => MethodKind::Static,
        ByteCode::InvokeSpecial => MethodKind::Special,
        ByteCode::InvokeVirtual => MethodKind::Virtual,
        ByteCode::InvokeInterface => MethodKind::Interface,
        _ => return Err(malformed(insn)),
    };
    gen.gen_invoke_method(kind, cp_index)?;
    Ok(Flow::Continue(insn.next_index()))
}

/// Signature-polymorphic methods of `java/lang/invoke/MethodHandle`
fn is_method_handle_invoke(method: &MemberRef<MethodDescriptor>) -> bool {
    method.class == BinaryName::METHODHANDLE
        && (method.name == UnqualifiedName::INVOKEEXACT || method.name == UnqualifiedName::INVOKE)
}

/// Final methods of `java/lang/Object` (which `invokespecial` may call from an interface)
fn is_final_object_method(method: &MemberRef<MethodDescriptor>) -> bool {
    method.class == BinaryName::OBJECT
        && [
            UnqualifiedName::GETCLASS,
            UnqualifiedName::NOTIFY,
            UnqualifiedName::NOTIFYALL,
            UnqualifiedName::WAIT,
        ]
        .contains(&method.name)
}

/// Everything about the method being called that decides the shape of the call tree
struct CallTarget {
    class: BinaryName,
    name: UnqualifiedName,
    descriptor: MethodDescriptor,
    kind: MethodKind,
    cp_index: ConstantIndex,
    unresolved: bool,

    /// Number of operand stack entries the call pops
    stack_arguments: usize,

    /// Receiver that isn't on the operand stack (the bound handle of an `invokedynamic`)
    hidden_receiver: Option<NodeId>,

    /// Dispatch through the receiver's virtual function table
    indirect: bool,
}

impl CallTarget {
    fn has_receiver(&self) -> bool {
        self.kind != MethodKind::Static
    }
}

impl<'a> IlGenerator<'a> {
    fn gen_invoke_method(&mut self, kind: MethodKind, cp_index: ConstantIndex) -> Result<(), Error> {
        let method = match (self.constant(cp_index)?, kind) {
            (Constant::InterfaceMethodRef(method), _) => method,
            (Constant::MethodRef(method), kind) if kind != MethodKind::Interface => method,
            _ => return Err(Error::Internal(InternalError::UnexpectedConstant(cp_index))),
        };

        let handle_invoke = kind == MethodKind::Virtual && is_method_handle_invoke(method);
        let kind = if handle_invoke {
            self.check_method_handle_invoke(CompilationAbort::AotHasInvokeHandle)?;
            self.il.invoke_handle_calls.insert(self.bc_index);
            self.il.flags |= MethodFlags::HAS_METHOD_HANDLE_INVOKES;
            MethodKind::Computed
        } else {
            kind
        };
        let resolved = match kind {
            MethodKind::Computed => None,
            _ => self.front_end.resolve_method(method, kind),
        };
        let stack_arguments =
            method.descriptor.parameters.len() + (kind != MethodKind::Static) as usize;

        if kind == MethodKind::Special
            && self.method.class_is_interface
            && method.name != UnqualifiedName::INIT
            && !is_final_object_method(method)
        {
            if self.config.relocatable {
                log::debug!("invokespecial in interface at {} under AOT", self.bc_index);
                return Err(Error::Aborted(CompilationAbort::AotHasInvokeSpecialInInterface));
            }
            if !self.config.skip_invoke_special_interface_type_checks {
                self.il.invoke_special_interface_calls.insert(self.bc_index);
            }
        }

        if let Some(resolved) = &resolved {
            if let Some(intrinsic) =
                intrinsics::recognize(&resolved.class, &resolved.name, &resolved.descriptor)
            {
                let arguments = self.stack.pop_n(&mut self.il.nodes, stack_arguments)?;
                match self.gen_intrinsic(intrinsic, &arguments)? {
                    Some(result) => {
                        self.push(result);
                        return Ok(());
                    }
                    None => {
                        for argument in arguments {
                            self.push(argument);
                        }
                    }
                }
            }
        }

        let mut class = resolved.as_ref().map_or(&method.class, |r| &r.class).clone();
        let indirect = match (kind, &resolved) {
            (MethodKind::Virtual | MethodKind::Interface, Some(resolved)) if resolved.is_final() => {
                false
            }
            (MethodKind::Virtual | MethodKind::Interface, Some(_)) => {
                match self.devirtualize(method, stack_arguments)? {
                    Some(implementation) => {
                        log::trace!("Devirtualized call at {} to {:?}", self.bc_index, implementation);
                        class = implementation;
                        false
                    }
                    None => true,
                }
            }
            (MethodKind::Virtual | MethodKind::Interface, None) => true,
            _ => false,
        };

        self.gen_call(CallTarget {
            class,
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
            kind,
            cp_index,
            unresolved: resolved.is_none() && kind != MethodKind::Computed,
            stack_arguments,
            hidden_receiver: None,
            indirect,
        })
    }

    /// Class whose implementation a virtual call must reach, when the receiver's exact type is
    /// known
    fn devirtualize(
        &self,
        method: &MemberRef<MethodDescriptor>,
        stack_arguments: usize,
    ) -> Result<Option<BinaryName>, Error> {
        let depth = self
            .stack
            .len()
            .checked_sub(stack_arguments)
            .ok_or(Error::Internal(InternalError::StackUnderflow))?;
        let receiver = self
            .stack
            .element(depth)
            .ok_or(Error::Internal(InternalError::StackUnderflow))?;
        Ok(self.exact_types.get(&receiver).and_then(|exact| {
            self.front_end
                .find_implementation(exact, &method.name, &method.descriptor)
                .map(|implementation| implementation.class)
        }))
    }

    /// `invokedynamic` is an `invokeExact` of the handle bound to its call site
    fn gen_invoke_dynamic(&mut self, cp_index: ConstantIndex) -> Result<(), Error> {
        self.check_method_handle_invoke(CompilationAbort::AotHasInvokeDynamic)?;
        let descriptor = match self.constant(cp_index)? {
            Constant::InvokeDynamic { descriptor, .. } => descriptor,
            _ => return Err(Error::Internal(InternalError::UnexpectedConstant(cp_index))),
        };
        let call_site = self
            .constant_pool
            .and_then(|pool| pool.call_site_index(cp_index))
            .ok_or(Error::Internal(InternalError::MissingConstant(cp_index)))?;

        let handle = self.create_with_symbol(
            ILOpCode::Load(DataType::Address),
            Symbol::CallSiteTableEntry(call_site),
            &[],
        );
        self.il.nodes.add_flags(handle, NodeFlags::NON_NULL);
        self.il.invoke_dynamic_calls.insert(self.bc_index);
        self.il.flags |= MethodFlags::HAS_METHOD_HANDLE_INVOKES;

        self.gen_call(CallTarget {
            class: BinaryName::METHODHANDLE,
            name: UnqualifiedName::INVOKEEXACT,
            descriptor: descriptor.clone(),
            kind: MethodKind::Computed,
            cp_index,
            unresolved: false,
            stack_arguments: descriptor.parameters.len(),
            hidden_receiver: Some(handle),
            indirect: false,
        })
    }

    /// Method handle invocations can't be compiled ahead of time or under full speed debug
    fn check_method_handle_invoke(&self, aot_abort: CompilationAbort) -> Result<(), Error> {
        if self.config.relocatable {
            log::debug!("Method handle invocation at {} under AOT", self.bc_index);
            return Err(Error::Aborted(aot_abort));
        }
        if self.config.full_speed_debug {
            log::debug!("Method handle invocation at {} under FSD", self.bc_index);
            return Err(Error::Aborted(CompilationAbort::FsdHasInvokeHandle));
        }
        Ok(())
    }

    fn gen_call(&mut self, target: CallTarget) -> Result<(), Error> {
        if self.config.enable_osr {
            self.osr_induction_point(target.stack_arguments)?;
        }
        let mut arguments = self.stack.pop_n(&mut self.il.nodes, target.stack_arguments)?;
        if let Some(receiver) = target.hidden_receiver {
            arguments.insert(0, receiver);
        }
        self.handle_side_effect(SideEffect::Call);

        // Placeholders pass their own children, and take their parameters into the signature
        let receivers = target.has_receiver() as usize;
        let mut children = vec![];
        let mut placeholders = vec![];
        for (idx, argument) in arguments.iter().enumerate() {
            if idx >= receivers && self.is_placeholder(*argument) {
                children.extend_from_slice(self.il.nodes[*argument].children());
                placeholders.push((idx - receivers, *argument));
            } else {
                children.push(*argument);
            }
        }
        let descriptor = if placeholders.is_empty() {
            target.descriptor
        } else {
            let mut signature = ArtificialSignature::from_descriptor(&target.descriptor);
            for (position, placeholder) in placeholders.iter().rev() {
                if let Some(Symbol::Placeholder { parameters }) = self.symbol_of(*placeholder) {
                    let parameters = parameters.clone();
                    signature = signature.splice(*position, &parameters);
                }
            }
            log::trace!("Expanded placeholders at {} into {:?}", self.bc_index, signature);
            signature.to_descriptor()
        };

        let return_type = descriptor
            .return_type
            .as_ref()
            .map_or(DataType::NoType, |t| DataType::from_field_type(t).stack_type());
        let symbol = Symbol::Method {
            class: target.class,
            name: target.name,
            descriptor,
            kind: target.kind,
        };
        let symref = self.constant_symref(symbol, target.cp_index, target.unresolved);

        let receiver = if receivers > 0 { children.first().copied() } else { None };
        if target.indirect {
            let receiver = receiver.ok_or(Error::Internal(InternalError::StackUnderflow))?;
            let vft = self.create_with_symbol(
                ILOpCode::LoadIndirect(DataType::Address),
                Symbol::Vft,
                &[receiver],
            );
            children.insert(0, vft);
            self.il.flags |= MethodFlags::MAY_HAVE_INDIRECT_CALLS;
        } else {
            self.il.flags |= MethodFlags::MAY_HAVE_INLINEABLE_CALLS;
        }
        let call = self.create_with_symref(
            ILOpCode::Call {
                return_type,
                indirect: target.indirect,
            },
            symref,
            &children,
        );
        for (_, placeholder) in placeholders {
            self.release(placeholder);
        }

        let null_check = receiver.map_or(false, |r| !self.is_non_null(r));
        let check = match (target.unresolved, null_check) {
            (true, true) => Some(ILOpCode::ResolveAndNullChk),
            (true, false) => Some(ILOpCode::ResolveChk),
            (false, true) => Some(ILOpCode::NullChk),
            (false, false) => None,
        };
        match check {
            Some(check) => {
                self.append_check(check, call, &[]);
            }
            None => {
                self.append(call);
            }
        }
        if let (Some(receiver), true) = (receiver, null_check) {
            self.il.nodes.add_flags(receiver, NodeFlags::NON_NULL);
        }

        if self.config.involuntary_osr() {
            self.potential_osr_point();
        }
        if return_type != DataType::NoType {
            self.push(call);
        }
        Ok(())
    }
}
