//! Rewrites of the finished IL
//!
//! These run once the walk has translated every reachable instruction, since each of them needs
//! to see the whole method: every return (synchronized exit), the final set of loop headers
//! (dynamic loop transfer), or blocks that have to be split around a call or type test.

use super::{Error, IlGenerator, InternalError, MethodDetails};
use crate::il::{
    BlockId, CompareCondition, ConstValue, DataType, Helper, ILOpCode, MethodFlags, MethodKind,
    NodeFlags, NodeId, SymRefId, Symbol, TreeTopId,
};
use crate::jvm::RefType;
use std::collections::{HashMap, HashSet};

impl<'a> IlGenerator<'a> {
    /// Add a block in front of the method entry, returning it along with the old entry
    ///
    /// The caller is responsible for the new block's outgoing edges.
    fn insert_entry_block(&mut self) -> Result<(BlockId, BlockId), Error> {
        let start = self.il.cfg.start();
        let first = self
            .il
            .cfg
            .successors(start)
            .next()
            .ok_or(Error::Internal(InternalError::MissingBranchTarget(0)))?;
        let entry = self.il.new_block(None);
        self.il.cfg.remove_edge(start, first);
        self.il.cfg.add_edge(start, entry);
        self.il.cfg.prepend_to_layout(entry);
        Ok((entry, first))
    }

    /// Let the entry block fall (or jump) into `next`
    fn continue_to(&mut self, block: BlockId, next: BlockId) {
        if self.il.cfg.layout_successor(block) != Some(next) {
            let goto = self.il.nodes.create_branch(ILOpCode::Goto, 0, &[], next);
            self.il.append_tree(block, goto);
        }
        self.il.cfg.add_edge(block, next);
    }

    /// `java/lang/Class` object of the method's class
    fn load_own_class_object(&mut self, bc_index: usize) -> NodeId {
        let class = self
            .il
            .symbols
            .find_or_create_symbol(Symbol::Class(RefType::Object(self.method.class.clone())));
        let address = self
            .il
            .nodes
            .create_with_symref(ILOpCode::LoadAddr, bc_index, class, &[]);
        self.il.nodes.add_flags(address, NodeFlags::NON_NULL);
        let java_class = self
            .il
            .symbols
            .find_or_create_symbol(Symbol::JavaLangClassFromClass);
        let object = self.il.nodes.create_with_symref(
            ILOpCode::LoadIndirect(DataType::Address),
            bc_index,
            java_class,
            &[address],
        );
        self.il.nodes.add_flags(object, NodeFlags::NON_NULL);
        object
    }

    fn load_symref(&mut self, symref: SymRefId, data_type: DataType, bc_index: usize) -> NodeId {
        self.il
            .nodes
            .create_with_symref(ILOpCode::Load(data_type), bc_index, symref, &[])
    }

    /// Lock the monitor on entry of a synchronized method and unlock it before every return
    ///
    /// The monitor is the receiver, or the class object for static methods. The entry block
    /// stores it to the sync object temporary before locking it, and every exit unlocks whatever
    /// that temporary holds, since local 0 may have been overwritten in the meantime.
    pub(super) fn generate_synchronized_entry(&mut self) -> Result<(), Error> {
        if !self.method.is_synchronized() {
            return Ok(());
        }
        self.il.flags |= MethodFlags::HAS_MONITORS;
        let (entry, first) = self.insert_entry_block()?;

        let lock = if self.method.is_static() {
            self.load_own_class_object(0)
        } else {
            let parm = self.il.symbols.find_or_create_symbol(Symbol::Parm {
                slot: 0,
                data_type: DataType::Address,
            });
            let this = self.load_symref(parm, DataType::Address, 0);
            self.il.nodes.add_flags(this, NodeFlags::NON_NULL);
            this
        };
        let temp = self.new_temp(DataType::Address);
        let temp = self.il.symbols.find_or_create_symbol(temp);
        self.il.sync_object_temp = Some(temp);
        let store = self.il.nodes.create_with_symref(
            ILOpCode::Store(DataType::Address),
            0,
            temp,
            &[lock],
        );
        self.il.append_tree(entry, store);
        let enter = self.il.nodes.create(ILOpCode::MonEnter, 0, &[lock]);
        self.il.append_tree(entry, enter);
        self.continue_to(entry, first);

        let mut exits = 0;
        let layout = self.il.cfg.layout().to_vec();
        for block in layout {
            let last = match self.il.last_tree(block) {
                Some(last) => last,
                None => continue,
            };
            let ret = self.il.tree_tops.node(last);
            if !matches!(self.il.nodes[ret].op(), ILOpCode::Return(_)) {
                continue;
            }
            let bc_index = self.il.nodes[ret].bc_index();

            // The returned value is computed while the monitor is still held
            if let Some(value) = self.il.nodes[ret].child(0) {
                if self.il.nodes[value].constant().is_none() {
                    let anchor = self.il.nodes.create(ILOpCode::TreeTop, bc_index, &[value]);
                    self.il.insert_tree_before(last, anchor);
                }
            }
            let monitor = self.load_symref(temp, DataType::Address, bc_index);
            self.il.nodes.add_flags(monitor, NodeFlags::NON_NULL);
            let exit = self.il.nodes.create(ILOpCode::MonExit, bc_index, &[monitor]);
            self.il.insert_tree_before(last, exit);
            exits += 1;
        }
        log::debug!(
            "Synchronized entry {} locking {} with {} exits",
            entry,
            temp,
            exits
        );
        Ok(())
    }

    /// Entry point for a method entered from the interpreter in the middle of a loop
    ///
    /// When the runtime hands over a buffer of the interpreter's locals, the new entry block
    /// reloads every local (and the operand stack the loop header expects) from it and jumps to
    /// the loop header. Without a buffer, execution starts at the regular entry.
    pub(super) fn generate_dlt_entry(&mut self) -> Result<(), Error> {
        let bc_index = match self.details {
            MethodDetails::DltInProgress { bc_index } => *bc_index,
            _ => return Ok(()),
        };
        let target = self
            .blocks
            .get(bc_index)
            .copied()
            .flatten()
            .filter(|block| self.il.cfg.block(*block).added_to_cfg)
            .ok_or(Error::Internal(InternalError::MissingBranchTarget(bc_index)))?;
        self.il.flags |= MethodFlags::HAS_BRANCHES;

        let (entry, first) = self.insert_entry_block()?;
        let transfer = self.il.new_block(None);
        self.il.cfg.insert_in_layout_after(entry, transfer);

        let buffer = self.il.symbols.find_or_create_symbol(Symbol::DltBlock);
        let load = self.load_symref(buffer, DataType::Address, bc_index);
        let null = self.il.nodes.create_const(bc_index, ConstValue::NULL);
        let test = self.il.nodes.create_branch(
            ILOpCode::IfCmp {
                data_type: DataType::Address,
                condition: CompareCondition::Eq,
                unordered: false,
            },
            bc_index,
            &[load, null],
            first,
        );
        self.il.append_tree(entry, test);
        self.il.cfg.add_edge(entry, first);
        self.il.cfg.add_edge(entry, transfer);

        let mut reloads: Vec<(Symbol, u32, DataType)> = self
            .il
            .symbols
            .iter()
            .filter_map(|(_, symref)| match symref.symbol {
                Symbol::Parm { slot, data_type } | Symbol::Auto { slot, data_type } => {
                    Some((symref.symbol.clone(), u32::from(slot), data_type))
                }
                _ => None,
            })
            .collect();
        let max_locals = u32::from(self.method.code.max_locals);
        if let Some(shape) = self.entry_shapes.get(&bc_index) {
            for slot in shape {
                reloads.push((
                    Symbol::PendingPush {
                        slot: slot.slot,
                        data_type: slot.data_type,
                    },
                    max_locals + u32::from(slot.slot),
                    slot.data_type,
                ));
            }
        }

        let buffer = self.load_symref(buffer, DataType::Address, bc_index);
        self.il.nodes.add_flags(buffer, NodeFlags::NON_NULL);
        for (symbol, slot, data_type) in &reloads {
            let dlt_slot = self.il.symbols.find_or_create_symbol(Symbol::DltSlot {
                slot: *slot,
                data_type: *data_type,
            });
            let value = self.il.nodes.create_with_symref(
                ILOpCode::LoadIndirect(*data_type),
                bc_index,
                dlt_slot,
                &[buffer],
            );
            let symref = self.il.symbols.find_or_create_symbol(symbol.clone());
            let store = self.il.nodes.create_with_symref(
                ILOpCode::Store(*data_type),
                bc_index,
                symref,
                &[value],
            );
            self.il.append_tree(transfer, store);
        }
        let goto = self
            .il
            .nodes
            .create_branch(ILOpCode::Goto, bc_index, &[], target);
        self.il.append_tree(transfer, goto);
        self.il.cfg.add_edge(transfer, target);

        log::debug!(
            "Loop transfer entry {} reloads {} values before {}",
            entry,
            reloads.len(),
            target
        );
        Ok(())
    }

    /// Guard each recorded `invokespecial` inside an interface with a receiver type test
    ///
    /// The call's block is split in front of the call. The receiver goes to a temporary, and
    /// the first half ends by testing it against the interface: receivers implementing it branch
    /// to the call, the others fall into a cold block throwing `IncompatibleClassChangeError`.
    pub(super) fn expand_invoke_special_interface_calls(&mut self) -> Result<(), Error> {
        let calls: Vec<usize> = self.il.invoke_special_interface_calls.iter().copied().collect();
        for bc_index in calls {
            match self.find_call(bc_index, MethodKind::Special) {
                Some((block, tree, call)) => self.guard_special_call(block, tree, call)?,
                None => log::debug!("No call left at {} to guard", bc_index),
            }
        }
        Ok(())
    }

    /// Block, tree, and node of the call of this kind at this bytecode index
    fn find_call(
        &self,
        bc_index: usize,
        kind: MethodKind,
    ) -> Option<(BlockId, TreeTopId, NodeId)> {
        for block in self.il.cfg.layout() {
            for tree in self.il.trees(*block) {
                let root = self.il.tree_tops.node(tree);
                let op = self.il.nodes[root].op();
                let node = match self.il.nodes[root].child(0) {
                    Some(child) if op == ILOpCode::TreeTop || op.is_check() => child,
                    _ => root,
                };
                let is_kind = matches!(
                    self.symbol_of(node),
                    Some(Symbol::Method { kind: k, .. }) if *k == kind
                );
                if self.il.nodes[node].op().is_call()
                    && self.il.nodes[node].bc_index() == bc_index
                    && is_kind
                {
                    return Some((*block, tree, node));
                }
            }
        }
        None
    }

    fn guard_special_call(
        &mut self,
        block: BlockId,
        tree: TreeTopId,
        call: NodeId,
    ) -> Result<(), Error> {
        let bc_index = self.il.nodes[call].bc_index();
        let receiver = self.il.nodes[call]
            .child(0)
            .ok_or(Error::Internal(InternalError::MalformedByteCode(bc_index)))?;

        let temp = self.new_temp(DataType::Address);
        let temp = self.il.symbols.find_or_create_symbol(temp);
        let store = self.il.nodes.create_with_symref(
            ILOpCode::Store(DataType::Address),
            bc_index,
            temp,
            &[receiver],
        );
        self.il.insert_tree_before(tree, store);

        let mut temps = HashMap::new();
        temps.insert(receiver, temp);
        let call_block = self.split_block_before(block, tree, temps);

        // The null check has to come before the type test, since `instanceof` of null is false
        let root = self.il.tree_tops.node(tree);
        let root_op = self.il.nodes[root].op();
        if matches!(root_op, ILOpCode::NullChk | ILOpCode::ResolveAndNullChk) {
            let load = self.load_symref(temp, DataType::Address, bc_index);
            let pass = self.il.nodes.create(ILOpCode::PassThrough, bc_index, &[load]);
            let check = self.il.nodes.create(ILOpCode::NullChk, bc_index, &[pass]);
            self.il.append_tree(block, check);

            let op = match root_op {
                ILOpCode::ResolveAndNullChk => ILOpCode::ResolveChk,
                _ => ILOpCode::TreeTop,
            };
            self.replace_root(tree, op, call);
        }

        let load = self.load_symref(temp, DataType::Address, bc_index);
        self.il.nodes.add_flags(load, NodeFlags::NON_NULL);
        let interface = self
            .il
            .symbols
            .find_or_create_symbol(Symbol::Class(RefType::Object(self.method.class.clone())));
        let address = self
            .il
            .nodes
            .create_with_symref(ILOpCode::LoadAddr, bc_index, interface, &[]);
        let instance_of = self
            .il
            .nodes
            .create(ILOpCode::InstanceOf, bc_index, &[load, address]);
        let zero = self.il.nodes.iconst(bc_index, 0);
        let test = self.il.nodes.create_branch(
            ILOpCode::IfCmp {
                data_type: DataType::Int32,
                condition: CompareCondition::Ne,
                unordered: false,
            },
            bc_index,
            &[instance_of, zero],
            call_block,
        );
        self.il.append_tree(block, test);

        let throw_block = self.il.new_block(None);
        self.il.cfg.block_mut(throw_block).is_cold = true;
        self.il.cfg.insert_in_layout_after(block, throw_block);
        let helper = self
            .il
            .symbols
            .find_or_create_symbol(Symbol::Helper(Helper::ThrowIncompatibleClassChange));
        let load = self.load_symref(temp, DataType::Address, bc_index);
        let throw = self.il.nodes.create_with_symref(
            ILOpCode::Call {
                return_type: DataType::NoType,
                indirect: false,
            },
            bc_index,
            helper,
            &[load],
        );
        self.il.append_tree(throw_block, throw);

        let handlers: Vec<BlockId> = self.il.cfg.exception_successors(block).collect();
        for handler in handlers {
            self.il.cfg.add_exception_edge(throw_block, handler);
        }
        let end = self.il.cfg.end();
        self.il.cfg.add_edge(block, call_block);
        self.il.cfg.add_edge(block, throw_block);
        self.il.cfg.add_edge(throw_block, end);
        self.il.flags |= MethodFlags::HAS_BRANCHES | MethodFlags::HAS_CHECKCASTS_OR_INSTANCEOFS;

        log::debug!(
            "Guarded invokespecial at {}: test in {}, call in {}, throw in {}",
            bc_index,
            block,
            call_block,
            throw_block
        );
        Ok(())
    }

    /// Block in the layout holding `tree`
    fn block_of_tree(&self, tree: TreeTopId) -> Option<BlockId> {
        self.il
            .cfg
            .layout()
            .iter()
            .copied()
            .find(|block| self.il.trees(*block).contains(&tree))
    }

    /// Make `op` applied to `child` the new root of `tree`
    fn replace_root(&mut self, tree: TreeTopId, op: ILOpCode, child: NodeId) {
        let old_root = self.il.tree_tops.node(tree);
        let bc_index = self.il.nodes[old_root].bc_index();
        let new_root = self.il.nodes.create(op, bc_index, &[child]);
        self.il.nodes.inc_ref(new_root);
        self.il.nodes.mark_anchored(new_root);
        self.il.tree_tops.set_node(tree, new_root);
        self.il.nodes.recursively_dec_ref(old_root);
    }

    /// End `block` with a branch to `target` taken when `object` is null
    fn branch_if_null(&mut self, block: BlockId, object: NodeId, target: BlockId) {
        let bc_index = self.il.nodes[object].bc_index();
        let null = self.il.nodes.create_const(bc_index, ConstValue::NULL);
        let test = self.il.nodes.create_branch(
            ILOpCode::IfCmp {
                data_type: DataType::Address,
                condition: CompareCondition::Eq,
                unordered: false,
            },
            bc_index,
            &[object, null],
            target,
        );
        self.il.append_tree(block, test);
    }

    /// Keep null objects away from the class resolution of `checkcast` and `instanceof`
    ///
    /// A `checkcast` of null succeeds and an `instanceof` of null is false whether or not the
    /// class can be loaded, so the resolution only happens once the object is known to be
    /// non-null. Each recorded test moves to a block of its own, skipped by a null test on the
    /// object at the end of the block before it.
    pub(super) fn expand_unresolved_class_type_tests(&mut self) -> Result<(), Error> {
        let tests = std::mem::take(&mut self.unresolved_type_tests);
        for tree in tests {
            let block = match self.block_of_tree(tree) {
                Some(block) => block,
                None => {
                    log::debug!("Type test {} is no longer in the method", tree);
                    continue;
                }
            };
            let root = self.il.tree_tops.node(tree);
            let bc_index = self.il.nodes[root].bc_index();
            let malformed = || Error::Internal(InternalError::MalformedByteCode(bc_index));
            let test = match self.il.nodes[root].op() {
                ILOpCode::CheckCast => root,
                ILOpCode::TreeTop => self.il.nodes[root].child(0).ok_or_else(malformed)?,
                _ => return Err(malformed()),
            };
            let object = self.il.nodes[test].child(0).ok_or_else(malformed)?;
            match self.il.nodes[test].op() {
                ILOpCode::CheckCast => self.expand_unresolved_checkcast(block, tree, test, object)?,
                ILOpCode::InstanceOf => {
                    self.expand_unresolved_instanceof(block, tree, test, object)?
                }
                _ => return Err(malformed()),
            }
        }
        Ok(())
    }

    /// Move the trees `first..=last` into a block between the rest of `block` and a new tail
    /// block, returning the test block and the tail
    ///
    /// `object` gets evaluated before the split, so that `block` can still test it. Values the
    /// test block reloads from temporaries (and the ones in `temps`) are reloaded from the same
    /// temporaries in the tail, which is also reached without going through the test block.
    fn isolate_type_test(
        &mut self,
        block: BlockId,
        first: TreeTopId,
        last: TreeTopId,
        object: NodeId,
        mut temps: HashMap<NodeId, SymRefId>,
    ) -> Result<(BlockId, BlockId), Error> {
        let bc_index = self.il.nodes[object].bc_index();
        let anchor = self.il.nodes.create(ILOpCode::TreeTop, bc_index, &[object]);
        self.il.insert_tree_before(first, anchor);
        let test_block = self.split_block_before(block, first, HashMap::new());

        for node in self.il.block_nodes(test_block) {
            let symref = match self.il.nodes[node].symref() {
                Some(symref) => symref,
                None => continue,
            };
            let is_temp_load = matches!(self.il.nodes[node].op(), ILOpCode::Load(_))
                && matches!(self.il.symbols[symref].symbol, Symbol::Temp { .. });
            if is_temp_load {
                temps.entry(node).or_insert(symref);
            }
        }
        let rest = self
            .il
            .tree_tops
            .next(last)
            .ok_or(Error::Internal(InternalError::MalformedByteCode(bc_index)))?;
        let tail = self.split_block_before(test_block, rest, temps);
        self.il.flags |= MethodFlags::HAS_BRANCHES;
        Ok((test_block, tail))
    }

    fn expand_unresolved_checkcast(
        &mut self,
        block: BlockId,
        tree: TreeTopId,
        cast: NodeId,
        object: NodeId,
    ) -> Result<(), Error> {
        self.replace_root(tree, ILOpCode::ResolveChk, cast);
        let (test_block, tail) =
            self.isolate_type_test(block, tree, tree, object, HashMap::new())?;
        self.branch_if_null(block, object, tail);
        self.il.cfg.add_edge(block, test_block);
        self.il.cfg.add_edge(block, tail);
        self.il.cfg.add_edge(test_block, tail);
        log::debug!(
            "Unresolved checkcast at {} moved to {}, null objects skip to {}",
            self.il.nodes[cast].bc_index(),
            test_block,
            tail
        );
        Ok(())
    }

    /// The result goes through a temporary set by the test block, or to `0` by a cold block
    /// taken for null objects
    fn expand_unresolved_instanceof(
        &mut self,
        block: BlockId,
        tree: TreeTopId,
        test: NodeId,
        object: NodeId,
    ) -> Result<(), Error> {
        let bc_index = self.il.nodes[test].bc_index();
        let result = self.new_temp(DataType::Int32);
        let result = self.il.symbols.find_or_create_symbol(result);
        self.replace_root(tree, ILOpCode::ResolveChk, test);
        let store = self.il.nodes.create_with_symref(
            ILOpCode::Store(DataType::Int32),
            bc_index,
            result,
            &[test],
        );
        let store = self.il.insert_tree_after(tree, store);

        let mut temps = HashMap::new();
        temps.insert(test, result);
        let (test_block, tail) = self.isolate_type_test(block, tree, store, object, temps)?;

        let null_block = self.il.new_block(None);
        self.il.cfg.block_mut(null_block).is_cold = true;
        self.il.cfg.append_to_layout(null_block);
        let zero = self.il.nodes.iconst(bc_index, 0);
        let store_zero = self.il.nodes.create_with_symref(
            ILOpCode::Store(DataType::Int32),
            bc_index,
            result,
            &[zero],
        );
        self.il.append_tree(null_block, store_zero);
        let goto = self
            .il
            .nodes
            .create_branch(ILOpCode::Goto, bc_index, &[], tail);
        self.il.append_tree(null_block, goto);

        self.branch_if_null(block, object, null_block);
        self.il.cfg.add_edge(block, test_block);
        self.il.cfg.add_edge(block, null_block);
        self.il.cfg.add_edge(test_block, tail);
        self.il.cfg.add_edge(null_block, tail);
        log::debug!(
            "Unresolved instanceof at {} moved to {}, null objects take {}",
            bc_index,
            test_block,
            null_block
        );
        Ok(())
    }

    /// Route every `MethodHandle` invocation through the handle's `invokeExact` thunk
    ///
    /// Each call becomes an indirect call whose first child is the compiled entry point of the
    /// thunk, loaded from the receiver handle. A signature-polymorphic `invokevirtual` first
    /// checks that the handle's type is exactly the call site's method type, and calls a helper
    /// throwing `WrongMethodTypeException` otherwise. The handle bound to an `invokedynamic`
    /// call site always has the call site's type.
    pub(super) fn expand_method_handle_invokes(&mut self) -> Result<(), Error> {
        let handle_calls = self.il.invoke_handle_calls.iter().map(|bc| (*bc, true));
        let dynamic_calls = self.il.invoke_dynamic_calls.iter().map(|bc| (*bc, false));
        let calls: Vec<(usize, bool)> = handle_calls.chain(dynamic_calls).collect();
        for (bc_index, check_type) in calls {
            match self.find_call(bc_index, MethodKind::Computed) {
                Some((_, tree, call)) => self.expand_method_handle_invoke(tree, call, check_type)?,
                None => log::debug!("No method handle invocation left at {}", bc_index),
            }
        }
        Ok(())
    }

    fn expand_method_handle_invoke(
        &mut self,
        tree: TreeTopId,
        call: NodeId,
        check_type: bool,
    ) -> Result<(), Error> {
        let bc_index = self.il.nodes[call].bc_index();
        let handle = self.il.nodes[call]
            .child(0)
            .ok_or(Error::Internal(InternalError::MalformedByteCode(bc_index)))?;

        // The handle's fields are read before the call, so its null check moves ahead of them
        let root = self.il.tree_tops.node(tree);
        if self.il.nodes[root].op() == ILOpCode::NullChk {
            let pass = self.il.nodes.create(ILOpCode::PassThrough, bc_index, &[handle]);
            let check = self.il.nodes.create(ILOpCode::NullChk, bc_index, &[pass]);
            self.il.insert_tree_before(tree, check);
            self.replace_root(tree, ILOpCode::TreeTop, call);
        }
        let arguments = self.il.nodes[call].children().to_vec();
        for argument in arguments {
            if self.il.nodes[argument].constant().is_none() {
                let anchor = self.il.nodes.create(ILOpCode::TreeTop, bc_index, &[argument]);
                self.il.insert_tree_before(tree, anchor);
            }
        }

        if check_type {
            let cp_index = self.il.nodes[call]
                .symref()
                .and_then(|symref| self.il.symbols[symref].cp_index)
                .ok_or(Error::Internal(InternalError::MalformedByteCode(bc_index)))?;
            let site_type =
                self.constant_symref(Symbol::MethodTypeTableEntry(cp_index), cp_index, true);
            let expected = self.load_symref(site_type, DataType::Address, bc_index);
            let resolve = self.il.nodes.create(ILOpCode::ResolveChk, bc_index, &[expected]);
            self.il.insert_tree_before(tree, resolve);

            let handle_type = self
                .il
                .symbols
                .find_or_create_symbol(Symbol::MethodHandleType);
            let actual = self.il.nodes.create_with_symref(
                ILOpCode::LoadIndirect(DataType::Address),
                bc_index,
                handle_type,
                &[handle],
            );
            let same = self.il.nodes.create(
                ILOpCode::Cmp {
                    data_type: DataType::Address,
                    condition: CompareCondition::Eq,
                },
                bc_index,
                &[expected, actual],
            );
            let helper = self
                .il
                .symbols
                .find_or_create_symbol(Symbol::Helper(Helper::MethodHandleTypeMismatch));
            let check = self
                .il
                .nodes
                .create_with_symref(ILOpCode::ZeroChk, bc_index, helper, &[same]);
            self.il.insert_tree_before(tree, check);
        }

        let thunks = self
            .il
            .symbols
            .find_or_create_symbol(Symbol::MethodHandleThunks);
        let thunks = self.il.nodes.create_with_symref(
            ILOpCode::LoadIndirect(DataType::Address),
            bc_index,
            thunks,
            &[handle],
        );
        self.il.nodes.add_flags(thunks, NodeFlags::NON_NULL);
        let target_address = self
            .il
            .symbols
            .find_or_create_symbol(Symbol::InvokeExactTargetAddress);
        let target = self.il.nodes.create_with_symref(
            ILOpCode::LoadIndirect(DataType::Int64),
            bc_index,
            target_address,
            &[thunks],
        );
        let anchor = self.il.nodes.create(ILOpCode::TreeTop, bc_index, &[target]);
        self.il.insert_tree_before(tree, anchor);

        let return_type = self.il.nodes[call].data_type();
        self.il.nodes.insert_child(call, 0, target);
        self.il.nodes.set_op(
            call,
            ILOpCode::Call {
                return_type,
                indirect: true,
            },
        );
        self.il.flags |= MethodFlags::MAY_HAVE_INDIRECT_CALLS;
        log::debug!(
            "Method handle invocation {} at {} goes through its invokeExact thunk{}",
            call,
            bc_index,
            if check_type { " after a type check" } else { "" }
        );
        Ok(())
    }

    /// Move `tree` and everything after it in `block` into a new block placed right after it
    ///
    /// Nodes evaluated in the first half and used again in the second go through temporaries:
    /// `temps` lists the ones already stored, and the others get stored at the end of `block`.
    /// The new block takes over the normal successors of `block`, which is left without any, and
    /// shares its exception successors. Splitting before the `BBEnd` leaves the new block empty.
    fn split_block_before(
        &mut self,
        block: BlockId,
        tree: TreeTopId,
        mut temps: HashMap<NodeId, SymRefId>,
    ) -> BlockId {
        let entry = self.il.cfg.block(block).entry;
        let mut evaluated = HashSet::new();
        for first_half in self.il.tree_tops.between(entry, tree) {
            let root = self.il.tree_tops.node(first_half);
            evaluated.extend(self.il.nodes.subtree(root));
        }

        let bc_index = self.il.nodes[self.il.tree_tops.node(tree)].bc_index();
        let second = self.il.new_block(None);
        let moves_trees = tree != self.il.cfg.block(block).exit;
        match self.il.last_tree(block) {
            Some(last) if moves_trees => {
                let exit = self.il.cfg.block(second).exit;
                self.il.tree_tops.move_before(tree, last, exit);
            }
            _ => {}
        }
        self.il.cfg.move_successors(block, second);
        let handlers: Vec<BlockId> = self.il.cfg.exception_successors(block).collect();
        for handler in handlers {
            self.il.cfg.add_exception_edge(second, handler);
        }
        self.il.cfg.insert_in_layout_after(block, second);

        let mut reloads: HashMap<NodeId, NodeId> = HashMap::new();
        let mut visited = HashSet::new();
        let mut to_visit = self.il.tree_nodes(second);
        while let Some(parent) = to_visit.pop() {
            let children = self.il.nodes[parent].children().to_vec();
            for (index, child) in children.into_iter().enumerate() {
                if !evaluated.contains(&child) {
                    if visited.insert(child) {
                        to_visit.push(child);
                    }
                    continue;
                }

                let replacement = match self.il.nodes[child].constant() {
                    Some(value) => self.il.nodes.create_const(bc_index, value),
                    None => match reloads.get(&child) {
                        Some(load) => *load,
                        None => {
                            let data_type = self.il.nodes.data_type(child);
                            let temp = match temps.get(&child) {
                                Some(temp) => *temp,
                                None => {
                                    let symbol = self.new_temp(data_type);
                                    let temp = self.il.symbols.find_or_create_symbol(symbol);
                                    let store = self.il.nodes.create_with_symref(
                                        ILOpCode::Store(data_type),
                                        bc_index,
                                        temp,
                                        &[child],
                                    );
                                    self.il.append_tree(block, store);
                                    temps.insert(child, temp);
                                    temp
                                }
                            };
                            let load = self.load_symref(temp, data_type, bc_index);
                            if self.il.nodes[child].is_non_null() {
                                self.il.nodes.add_flags(load, NodeFlags::NON_NULL);
                            }
                            reloads.insert(child, load);
                            load
                        }
                    },
                };
                self.il.nodes.set_child(parent, index, replacement);
                self.il.nodes.mark_anchored(replacement);
            }
        }
        log::trace!("Split {} before {}: {} values reloaded", block, second, reloads.len());
        second
    }
}
