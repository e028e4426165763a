//! Discovery of blocks and the walk over extents of bytecode

use super::walker::{Flow, DISPATCH};
use super::{ByteCodeIterator, CompilationAbort, Error, IlGenerator, InternalError, MethodDetails};
use crate::il::{
    BlockId, CatchInfo, DataType, ILOpCode, MethodFlags, NodeFlags, NodeId, PendingPushSlot,
    Symbol,
};
use crate::jvm::{ByteCode, Constant, RefType};

impl<'a> IlGenerator<'a> {
    /// Scan the bytecode once to find every index where a block has to start
    ///
    /// Blocks start at method entry, at branch and switch targets, after any instruction that
    /// branches or ends the flow of control, at the boundaries of protected ranges, at exception
    /// handlers, and at the dynamic loop transfer entry point.
    pub(super) fn find_and_mark_branch_targets(&mut self) -> Result<(), Error> {
        let len = self.code_len();
        if len == 0 {
            return Err(Error::Internal(InternalError::FellOffEnd(0)));
        }

        let method = self.method;
        let mut targets = vec![];
        for insn in ByteCodeIterator::new(&method.code.bytes) {
            let insn = insn?;
            self.instruction_starts[insn.bc_index] = true;
            let op = match insn.op {
                Some(op) => op,
                None => continue,
            };

            if !self.config.target.has_fpu && op.uses_floating_point() {
                log::debug!("No FPU for {:?} at {}", op, insn.bc_index);
                return Err(Error::Aborted(CompilationAbort::UnimplementedOpcode(op)));
            }

            use ByteCode::*;
            let stores_local_0 = match op {
                IStore0 | LStore0 | FStore0 | DStore0 | AStore0 => true,
                IStore | LStore | FStore | DStore | AStore | IInc => insn.local()? == 0,
                _ => false,
            };
            if stores_local_0 {
                self.this_changed = true;
            }

            let branch_targets = insn.branch_targets();
            let next = insn.next_index();
            if (!branch_targets.is_empty() || op.ends_flow()) && next < len {
                self.block_starts[next] = true;
            }
            targets.extend(branch_targets);
        }

        self.block_starts[0] = true;
        for target in targets {
            self.mark_block_start(target)?;
        }

        for handler in &method.code.exception_table {
            self.mark_block_start(handler.start_pc)?;
            self.mark_block_start(handler.handler_pc)?;
            if handler.end_pc < len {
                self.mark_block_start(handler.end_pc)?;
            }
        }

        if let MethodDetails::DltInProgress { bc_index } = self.details {
            self.mark_block_start(*bc_index)?;
        }

        log::trace!(
            "Block starts: {:?}",
            self.block_starts
                .iter()
                .enumerate()
                .filter(|(_, starts)| **starts)
                .map(|(bc_index, _)| bc_index)
                .collect::<Vec<_>>()
        );
        Ok(())
    }

    fn mark_block_start(&mut self, bc_index: usize) -> Result<(), Error> {
        if !self.instruction_starts.get(bc_index).copied().unwrap_or(false) {
            return Err(Error::Internal(InternalError::MissingBranchTarget(bc_index)));
        }
        self.block_starts[bc_index] = true;
        Ok(())
    }

    /// Block starting at a bytecode index, created on first request
    pub(super) fn block_at(&mut self, bc_index: usize) -> Result<BlockId, Error> {
        if !self.instruction_starts.get(bc_index).copied().unwrap_or(false) {
            return Err(Error::Internal(InternalError::MissingBranchTarget(bc_index)));
        }
        if let Some(block) = self.blocks[bc_index] {
            return Ok(block);
        }

        // Already generated as the middle of some other block
        if self.generated[bc_index] {
            return Err(Error::Internal(InternalError::MissingBranchTarget(bc_index)));
        }

        let block = self.il.new_block(Some(bc_index));
        self.blocks[bc_index] = Some(block);
        self.block_starts[bc_index] = true;
        Ok(block)
    }

    /// Queue a block for generation
    pub(super) fn queue(&mut self, bc_index: usize) {
        if !self.generated[bc_index] {
            self.todo.push_back(bc_index);
        }
    }

    /// Generate every queued block (and whatever those fall into)
    pub(super) fn walk_pending(&mut self) -> Result<(), Error> {
        while let Some(bc_index) = self.todo.pop_front() {
            if !self.generated[bc_index] {
                self.walk_extent(bc_index)?;
            }
        }
        Ok(())
    }

    /// Make `bc_index` the start of the current block, restoring its entry stack
    pub(super) fn start_block(&mut self, bc_index: usize) -> Result<BlockId, Error> {
        let block = self.block_at(bc_index)?;
        self.current_block = block;
        self.stack.discard_entire_stack(&mut self.il.nodes);
        self.stack_temps.clear();

        let saved = self.saved_stacks.get(&bc_index).cloned().unwrap_or_default();
        let shape = self.entry_shapes.get(&bc_index).cloned().unwrap_or_default();
        let mut slots = shape.iter();
        for node in saved {
            self.push(node);

            // Entries that are loads of the slots they would be saved to need no store
            let needed = self.entry_slot_count(node);
            let entry_slots: Vec<PendingPushSlot> = slots.by_ref().take(needed).copied().collect();
            let loaded = self.pending_push_slots_loaded(node);
            let memo = match (entry_slots.first(), loaded == entry_slots) {
                (Some(first), true) => Some((node, first.slot)),
                _ => None,
            };
            self.stack_temps.push(memo);
        }

        log::debug!("Starting {} at {} with stack {:?}", block, bc_index, self.stack.entries());
        Ok(block)
    }

    /// Pending push slots a stack entry is a plain load of
    fn pending_push_slots_loaded(&self, node: NodeId) -> Vec<PendingPushSlot> {
        let loads = if self.is_placeholder(node) {
            self.il.nodes[node].children().to_vec()
        } else {
            vec![node]
        };
        loads
            .into_iter()
            .filter_map(|load| match (self.il.nodes[load].op(), self.symbol_of(load)) {
                (ILOpCode::Load(_), Some(Symbol::PendingPush { slot, data_type })) => {
                    Some(PendingPushSlot {
                        slot: *slot,
                        data_type: *data_type,
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// Generate consecutive bytecode starting at `start` until control stops falling through
    fn walk_extent(&mut self, start: usize) -> Result<(), Error> {
        let len = self.code_len();
        let mut extent = vec![self.start_block(start)?];
        let mut bc_index = start;

        loop {
            if self.generated[bc_index] {
                return Err(Error::Internal(InternalError::RegeneratedBlock(bc_index)));
            }
            self.generated[bc_index] = true;
            self.bc_index = bc_index;

            let insn = self.code.decode(bc_index)?;
            log::trace!(
                "{:>5}: {:?} {:?} (stack depth {})",
                bc_index,
                insn.op,
                insn.operands,
                self.stack.len()
            );
            let flow = (DISPATCH[insn.raw as usize])(self, &insn)?;

            let next = match flow {
                Flow::End => break,
                Flow::Continue(next) | Flow::FallThrough(next) if next >= len => {
                    return Err(Error::Internal(InternalError::FellOffEnd(bc_index)))
                }
                Flow::Continue(next) if !self.block_starts[next] => {
                    bc_index = next;
                    continue;
                }
                Flow::Continue(next) => {
                    self.save_stack(Some(next))?;
                    next
                }
                Flow::FallThrough(next) => next,
            };

            let successor = self.block_at(next)?;
            self.il.cfg.add_edge(self.current_block, successor);
            self.fall_through.insert(self.current_block, successor);
            if self.generated[next] {
                break;
            }
            extent.push(self.start_block(next)?);
            bc_index = next;
        }

        self.stitch(&extent);
        Ok(())
    }

    /// Place the blocks of an extent in the layout
    ///
    /// Blocks inside the extent fall through to one another. The last one may fall into a block
    /// placed earlier, in which case it needs an explicit `goto` (or, if it already ends in a
    /// conditional branch, a new block holding the `goto`).
    fn stitch(&mut self, extent: &[BlockId]) {
        for (idx, block) in extent.iter().enumerate() {
            self.il.cfg.append_to_layout(*block);
            let target = match self.fall_through.get(block) {
                Some(target) => *target,
                None => continue,
            };
            if extent.get(idx + 1) == Some(&target) {
                continue;
            }

            let bc_index = self.il.cfg.block(target).bc_index.unwrap_or(0);
            let goto = self
                .il
                .nodes
                .create_branch(ILOpCode::Goto, bc_index, &[], target);
            let ends_in_branch = self.il.last_tree(*block).map_or(false, |tt| {
                let node = self.il.tree_tops.node(tt);
                self.il.nodes[node].op().is_branch()
            });

            if ends_in_branch {
                let goto_block = self.il.new_block(None);
                self.il.append_tree(goto_block, goto);
                self.il.cfg.remove_edge(*block, target);
                self.il.cfg.add_edge(*block, goto_block);
                self.il.cfg.add_edge(goto_block, target);
                self.il.cfg.insert_in_layout_after(*block, goto_block);
                log::debug!("{} falls into {} through {}", block, target, goto_block);
            } else {
                self.il.append_tree(*block, goto);
                log::debug!("{} falls into {} through a goto", block, target);
            }
        }
    }

    /// Generate every exception handler and connect protected blocks to their handlers
    pub(super) fn generate_exception_handlers(&mut self) -> Result<(), Error> {
        let method = self.method;
        let handlers = &method.code.exception_table;
        if handlers.is_empty() {
            return Ok(());
        }
        self.il.flags |= MethodFlags::HAS_EXCEPTION_HANDLERS;

        let mut handler_blocks = vec![];
        for (handler_index, handler) in handlers.iter().enumerate() {
            let catch_type = match handler.catch_type {
                None => None,
                Some(index) => match self.constant(index)? {
                    Constant::Class(RefType::Object(class)) => Some(class.clone()),
                    _ => return Err(Error::Internal(InternalError::UnexpectedConstant(index))),
                },
            };

            let code = &method.code.bytes;
            let is_synchronized_handler = handler.start_pc > 0
                && handler.end_pc > handler.start_pc
                && code.get(handler.start_pc - 1) == Some(&(ByteCode::MonitorEnter as u8))
                && code.get(handler.end_pc - 1) == Some(&(ByteCode::MonitorExit as u8));

            let handler_pc = handler.handler_pc;
            let block = self.block_at(handler_pc)?;
            handler_blocks.push(block);
            let block_data = self.il.cfg.block_mut(block);
            if block_data.catch.is_none() {
                block_data.catch = Some(CatchInfo {
                    catch_type,
                    handler_index,
                    is_synchronized_handler,
                });
            }

            if !self.generated[handler_pc] && !self.saved_stacks.contains_key(&handler_pc) {
                let exception = self.il.symbols.find_or_create_symbol(Symbol::ExceptionObject);
                let load = self.il.nodes.create_with_symref(
                    ILOpCode::Load(DataType::Address),
                    handler_pc,
                    exception,
                    &[],
                );
                self.il.nodes.add_flags(load, NodeFlags::NON_NULL);
                self.il.nodes.inc_ref(load);
                self.saved_stacks.insert(handler_pc, vec![load]);
                self.entry_shapes.insert(
                    handler_pc,
                    vec![PendingPushSlot {
                        slot: 0,
                        data_type: DataType::Address,
                    }],
                );
                self.todo.push_back(handler_pc);
            }
        }
        self.walk_pending()?;

        // Protected ranges are block aligned, so a block is covered iff its first index is
        let layout = self.il.cfg.layout().to_vec();
        for block in layout {
            let bc_index = match self.il.cfg.block(block).bc_index {
                Some(bc_index) => bc_index,
                None => continue,
            };
            for (handler, handler_block) in handlers.iter().zip(&handler_blocks) {
                if handler.covers(bc_index) {
                    self.il.cfg.add_exception_edge(block, *handler_block);
                }
            }
        }
        Ok(())
    }
}
