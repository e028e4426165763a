//! Saving the operand stack into pending push slots, and keeping loads ahead of the stores that
//! would change what they read

use super::{Error, IlGenerator, InternalError};
use crate::il::{
    DataType, Helper, ILOpCode, NodeId, PendingPushSlot, Symbol, SymRefId, SymbolReference,
};
use crate::jvm::Width;
use std::collections::HashSet;
use std::ops::Range;

/// Something about to happen that can change what an earlier, not yet evaluated, load reads
#[derive(Clone, Debug)]
pub(super) enum SideEffect {
    /// Store into local variable slots
    LocalStore(Range<u16>),

    /// Stores into pending push slots
    PendingPushStore(Vec<Range<u16>>),

    /// Store into a field (given by its symbol reference)
    FieldStore(SymbolReference),

    /// Store into an array with elements of this type
    ArrayStore(DataType),

    /// Anything can happen to the heap (calls, monitors)
    Call,
}

fn overlaps(a: &Range<u16>, b: &Range<u16>) -> bool {
    a.start < b.end && b.start < a.end
}

fn slot_range(slot: u16, data_type: DataType) -> Range<u16> {
    slot..slot + data_type.width() as u16
}

/// Could both references be to the same field (ignoring the declared type)?
///
/// A resolved reference names the class declaring the field, while an unresolved one names the
/// class it was referenced through, so the class only tells fields apart when both are resolved.
fn same_field(a: &SymbolReference, b: &SymbolReference) -> bool {
    match (&a.symbol, &b.symbol) {
        (
            Symbol::StaticField {
                class: c1,
                name: n1,
                field_type: t1,
            },
            Symbol::StaticField {
                class: c2,
                name: n2,
                field_type: t2,
            },
        )
        | (
            Symbol::InstanceField {
                class: c1,
                name: n1,
                field_type: t1,
            },
            Symbol::InstanceField {
                class: c2,
                name: n2,
                field_type: t2,
            },
        ) => {
            if a.unresolved || b.unresolved {
                n1 == n2 && t1 == t2
            } else {
                c1 == c2 && n1 == n2
            }
        }
        _ => false,
    }
}

impl<'a> IlGenerator<'a> {
    /// Is the node a placeholder standing for a whole list of archetype arguments?
    pub(super) fn is_placeholder(&self, node: NodeId) -> bool {
        self.il.nodes[node].op().is_call()
            && matches!(self.symbol_of(node), Some(Symbol::Placeholder { .. }))
    }

    /// Number of pending push slots (not words) a stack entry is saved into
    pub(super) fn entry_slot_count(&self, node: NodeId) -> usize {
        if self.is_placeholder(node) {
            self.il.nodes[node].children().len()
        } else {
            1
        }
    }

    /// Pending push slots of every stack entry, bottom entry first
    ///
    /// Slots are numbered by word depth, so a `long` at the bottom of the stack is in slot 0 and
    /// the entry above it in slot 2. A placeholder is saved one argument at a time.
    pub(super) fn stack_shape(&self) -> Vec<Vec<PendingPushSlot>> {
        let mut slot: u16 = 0;
        let mut shape = vec![];
        for node in self.stack.entries() {
            let values = if self.is_placeholder(*node) {
                self.il.nodes[*node].children().to_vec()
            } else {
                vec![*node]
            };
            let mut entry = vec![];
            for value in values {
                let data_type = self.il.nodes.data_type(value);
                entry.push(PendingPushSlot { slot, data_type });
                slot += data_type.width() as u16;
            }
            shape.push(entry);
        }
        shape
    }

    /// Save the operand stack to pending push slots
    ///
    /// With a target, the stack becomes the entry stack of the block at that index: the first
    /// time a block is targeted, its entry stack is created as fresh loads of the slots.
    pub(super) fn save_stack(&mut self, target: Option<usize>) -> Result<(), Error> {
        self.save_stack_protecting(target, &[])
    }

    /// Save the operand stack, also protecting pending push loads reachable from `operands`
    /// (values already popped for the instruction being translated)
    pub(super) fn save_stack_protecting(
        &mut self,
        target: Option<usize>,
        operands: &[NodeId],
    ) -> Result<(), Error> {
        let shape = self.stack_shape();
        let flat: Vec<PendingPushSlot> = shape.iter().flatten().copied().collect();
        if let Some(target) = target {
            if let Some(existing) = self.entry_shapes.get(&target) {
                if existing != &flat {
                    log::debug!(
                        "Entry stack of {} is {:?} but {} saves {:?}",
                        target,
                        existing,
                        self.bc_index,
                        flat
                    );
                    return Err(Error::Internal(InternalError::InconsistentStackShape(target)));
                }
            }
        }

        // Entries whose value isn't already in their slots
        self.stack_temps.resize(self.stack.len(), None);
        let entries = self.stack.entries().to_vec();
        let writes: Vec<usize> = (0..entries.len())
            .filter(|idx| {
                let first_slot = shape[*idx].first().map(|s| s.slot);
                match (self.stack_temps[*idx], first_slot) {
                    (Some((node, slot)), Some(first)) => node != entries[*idx] || slot != first,
                    (_, None) => false,
                    (None, Some(_)) => true,
                }
            })
            .collect();

        if !writes.is_empty() {
            let ranges = writes
                .iter()
                .flat_map(|idx| shape[*idx].iter())
                .map(|s| slot_range(s.slot, s.data_type))
                .collect();
            self.handle_pending_push_save_side_effects(ranges, operands);
        }

        for idx in writes {
            let node = entries[idx];
            let values = if self.is_placeholder(node) {
                self.il.nodes[node].children().to_vec()
            } else {
                vec![node]
            };
            for (value, slot) in values.into_iter().zip(&shape[idx]) {
                let symref = self.il.symbols.pending_push(slot.slot, slot.data_type);
                let store = self.create_with_symref(ILOpCode::Store(slot.data_type), symref, &[value]);
                self.append(store);
            }

            let written: Vec<Range<u16>> = shape[idx]
                .iter()
                .map(|s| slot_range(s.slot, s.data_type))
                .collect();
            for (other, other_shape) in shape.iter().enumerate() {
                let clobbered = other_shape.iter().any(|s| {
                    let range = slot_range(s.slot, s.data_type);
                    written.iter().any(|w| overlaps(w, &range))
                });
                if clobbered && other != idx {
                    self.stack_temps[other] = None;
                }
            }
            self.stack_temps[idx] = shape[idx].first().map(|s| (node, s.slot));
        }

        if let Some(target) = target {
            if !self.saved_stacks.contains_key(&target) {
                let mut loads = vec![];
                for (idx, entry) in shape.iter().enumerate() {
                    let node = entries[idx];
                    let mut values = vec![];
                    for slot in entry {
                        let symref = self.il.symbols.pending_push(slot.slot, slot.data_type);
                        values.push(self.il.nodes.create_with_symref(
                            ILOpCode::Load(slot.data_type),
                            target,
                            symref,
                            &[],
                        ));
                    }
                    let load = match self.il.nodes[node].symref() {
                        Some(placeholder) if self.is_placeholder(node) => {
                            self.placeholder_call(placeholder, target, &values)
                        }
                        _ => values[0],
                    };
                    self.il.nodes.inc_ref(load);
                    loads.push(load);
                }
                log::trace!("Entry stack of {} is {:?}", target, flat);
                self.saved_stacks.insert(target, loads);
                self.entry_shapes.insert(target, flat);
            }
        }
        Ok(())
    }

    /// New placeholder call standing for the given argument values
    pub(super) fn placeholder_call(
        &mut self,
        placeholder: SymRefId,
        bc_index: usize,
        values: &[NodeId],
    ) -> NodeId {
        self.il.nodes.create_with_symref(
            ILOpCode::Call {
                return_type: DataType::Int32,
                indirect: false,
            },
            bc_index,
            placeholder,
            values,
        )
    }

    /// Anchor every unevaluated load of a pending push slot that is about to be overwritten
    fn handle_pending_push_save_side_effects(&mut self, ranges: Vec<Range<u16>>, operands: &[NodeId]) {
        self.handle_side_effect_with(SideEffect::PendingPushStore(ranges), operands);
    }

    /// Anchor every unevaluated load on the operand stack whose value the side effect could change
    pub(super) fn handle_side_effect(&mut self, effect: SideEffect) {
        self.handle_side_effect_with(effect, &[]);
    }

    pub(super) fn handle_side_effect_with(&mut self, effect: SideEffect, operands: &[NodeId]) {
        let mut seen = HashSet::new();
        let roots: Vec<NodeId> = self
            .stack
            .entries()
            .iter()
            .chain(operands)
            .copied()
            .collect();
        for root in roots {
            for node in self.il.nodes.subtree(root) {
                if !seen.insert(node) || self.il.nodes[node].is_anchored() {
                    continue;
                }
                if self.is_affected_by(node, &effect) {
                    log::trace!("Anchoring {} ahead of {:?}", node, effect);
                    let tree = self.create(ILOpCode::TreeTop, &[node]);
                    self.append(tree);
                }
            }
        }
    }

    fn is_affected_by(&self, node: NodeId, effect: &SideEffect) -> bool {
        let op = self.il.nodes[node].op();
        if !op.is_memory_load() {
            return false;
        }
        let symref = match self.il.nodes[node].symref() {
            Some(symref) => &self.il.symbols[symref],
            None => return false,
        };
        match (effect, &symref.symbol) {
            (
                SideEffect::LocalStore(range),
                Symbol::Parm { slot, data_type } | Symbol::Auto { slot, data_type },
            ) => overlaps(range, &slot_range(*slot, *data_type)),
            (SideEffect::PendingPushStore(ranges), Symbol::PendingPush { slot, data_type }) => {
                let range = slot_range(*slot, *data_type);
                ranges.iter().any(|r| overlaps(r, &range))
            }
            (SideEffect::FieldStore(field), _) => same_field(field, symref),
            (SideEffect::ArrayStore(element), Symbol::ArrayShadow(shadow)) => element == shadow,
            (SideEffect::Call, Symbol::StaticField { .. }) => true,
            (SideEffect::Call, _) => matches!(op, ILOpCode::LoadIndirect(_)),
            _ => false,
        }
    }

    /// Make the current instruction (a call) an OSR induction point
    ///
    /// The whole stack, arguments included, is saved so that the interpreter can pick up with the
    /// same operand stack. `arguments` is the number of stack entries the call pops.
    pub(super) fn osr_induction_point(&mut self, arguments: usize) -> Result<(), Error> {
        let shape = self.stack_shape();
        if arguments > shape.len() {
            return Err(Error::Internal(InternalError::StackUnderflow));
        }
        self.save_stack(None)?;

        let argument_slots: Vec<PendingPushSlot> =
            shape[shape.len() - arguments..].iter().flatten().copied().collect();
        let total: usize = shape.iter().map(Vec::len).sum();
        if let Some(threshold) = self.config.osr_pending_push_threshold {
            if total > threshold {
                log::trace!(
                    "OSR point at {} saves {} pending push slots (threshold {})",
                    self.bc_index,
                    total,
                    threshold
                );
            }
        }
        self.il.osr_argument_slots.insert(self.bc_index, argument_slots);
        Ok(())
    }

    /// Call the helper marking a point where the VM may force a transition to the interpreter
    pub(super) fn potential_osr_point(&mut self) {
        let helper = self.create_with_symbol(
            ILOpCode::Call {
                return_type: DataType::NoType,
                indirect: false,
            },
            Symbol::Helper(Helper::PotentialOsrPoint),
            &[],
        );
        self.append(helper);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ilgen::testing::{with_vm, MethodBuilder};

    #[test]
    fn pending_push_load_is_anchored_before_overwrite() {
        // Entry stack [pp0]; then `iconst_5; swap` leaves [5, pp0] so saving stores slot 0 before
        // slot 1, while slot 1 gets the old value of slot 0
        with_vm(
            |_| {},
            |vm| {
                let method = MethodBuilder::new("()V", true).code(&[0x00]).build();
                let details = Default::default();
                let config = Default::default();
                let mut gen = IlGenerator::new(&method, &details, vm, &config);
                gen.find_and_mark_branch_targets().unwrap();
                let block = gen.block_at(0).unwrap();
                gen.current_block = block;

                let pp0 = gen.il.symbols.pending_push(0, DataType::Int32);
                let load = gen.il.nodes.create_with_symref(ILOpCode::Load(DataType::Int32), 0, pp0, &[]);
                gen.push(load);
                gen.stack_temps = vec![Some((load, 0))];
                let five = gen.il.nodes.iconst(0, 5);
                gen.push(five);
                gen.stack.swap().unwrap();

                gen.save_stack(None).unwrap();

                let roots = gen.il.tree_nodes(block);
                let anchor = roots
                    .iter()
                    .position(|r| gen.il.nodes[*r].child(0) == Some(load))
                    .unwrap();
                let overwrite = roots
                    .iter()
                    .position(|r| {
                        gen.il.nodes[*r].op() == ILOpCode::Store(DataType::Int32)
                            && gen.il.nodes[*r].symref() == Some(pp0)
                    })
                    .unwrap();
                assert_eq!(gen.il.nodes[roots[anchor]].op(), ILOpCode::TreeTop);
                assert!(anchor < overwrite);
                assert_eq!(roots.len(), 3);
            },
        );
    }

    #[test]
    fn unchanged_stack_needs_no_stores() {
        with_vm(
            |_| {},
            |vm| {
                let method = MethodBuilder::new("()V", true).code(&[0x00]).build();
                let details = Default::default();
                let config = Default::default();
                let mut gen = IlGenerator::new(&method, &details, vm, &config);
                gen.find_and_mark_branch_targets().unwrap();
                let block = gen.block_at(0).unwrap();
                gen.current_block = block;

                let one = gen.il.nodes.iconst(0, 1);
                let wide = gen.il.nodes.create_const(0, crate::il::ConstValue::Long(2));
                gen.push(one);
                gen.push(wide);
                assert_eq!(
                    gen.stack_shape(),
                    vec![
                        vec![PendingPushSlot {
                            slot: 0,
                            data_type: DataType::Int32
                        }],
                        vec![PendingPushSlot {
                            slot: 1,
                            data_type: DataType::Int64
                        }],
                    ]
                );

                gen.save_stack(None).unwrap();
                assert_eq!(gen.il.tree_nodes(block).len(), 2);
                gen.save_stack(None).unwrap();
                assert_eq!(gen.il.tree_nodes(block).len(), 2);
            },
        );
    }
}
