use super::InternalError;
use crate::il::{NodeId, NodePool};
use crate::jvm::Width;

/// Simulated operand stack
///
/// Each entry is a node producing the value at that depth. `long` and `double` values take up a
/// single entry, even though they count as two words in the JVM's own accounting. Entries hold a
/// reference to their node, so every operation here adjusts reference counts.
#[derive(Clone, Default, Debug)]
pub struct OperandStack {
    entries: Vec<NodeId>,
}

impl OperandStack {
    pub fn new() -> OperandStack {
        OperandStack { entries: vec![] }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from the bottom of the stack up
    pub fn entries(&self) -> &[NodeId] {
        &self.entries
    }

    /// Entry at a given depth (0 is the bottom of the stack)
    pub fn element(&self, index: usize) -> Option<NodeId> {
        self.entries.get(index).copied()
    }

    pub fn top(&self) -> Result<NodeId, InternalError> {
        self.entries
            .last()
            .copied()
            .ok_or(InternalError::StackUnderflow)
    }

    pub fn push(&mut self, nodes: &mut NodePool, node: NodeId) {
        nodes.inc_ref(node);
        self.entries.push(node);
    }

    /// Pop the top entry
    ///
    /// The stack's reference is dropped, but the node is not released even if that was the last
    /// reference: the caller is expected to give it a new parent.
    pub fn pop(&mut self, nodes: &mut NodePool) -> Result<NodeId, InternalError> {
        let node = self.entries.pop().ok_or(InternalError::StackUnderflow)?;
        nodes.dec_ref(node);
        Ok(node)
    }

    /// Pop `count` entries, returned bottom-most first
    pub fn pop_n(
        &mut self,
        nodes: &mut NodePool,
        count: usize,
    ) -> Result<Vec<NodeId>, InternalError> {
        if count > self.entries.len() {
            return Err(InternalError::StackUnderflow);
        }
        let popped = self.entries.split_off(self.entries.len() - count);
        for node in &popped {
            nodes.dec_ref(*node);
        }
        Ok(popped)
    }

    /// Pop the top entry for good, releasing it if nothing else refers to it
    pub fn discard(&mut self, nodes: &mut NodePool) -> Result<(), InternalError> {
        let node = self.pop(nodes)?;
        if !nodes[node].is_anchored() {
            nodes.discard_orphan(node);
        }
        Ok(())
    }

    /// Empty the stack (at returns, throws, and before installing a block's entry stack)
    pub fn discard_entire_stack(&mut self, nodes: &mut NodePool) {
        while let Some(node) = self.entries.pop() {
            if nodes.dec_ref(node) == 0 && !nodes[node].is_anchored() {
                nodes.discard_orphan(node);
            }
        }
    }

    /// Depth of the stack as the JVM counts it (`long` and `double` take two words)
    pub fn depth_in_words(&self, nodes: &NodePool) -> usize {
        self.entries
            .iter()
            .map(|node| nodes.data_type(*node).width())
            .sum()
    }

    fn is_category_2(nodes: &NodePool, node: NodeId) -> bool {
        nodes.data_type(node).is_wide()
    }

    /// Category of the entry `depth` positions below the top (0 is the top)
    fn is_category_2_at(&self, nodes: &NodePool, depth: usize) -> Result<bool, InternalError> {
        let index = self
            .entries
            .len()
            .checked_sub(depth + 1)
            .ok_or(InternalError::StackUnderflow)?;
        Ok(Self::is_category_2(nodes, self.entries[index]))
    }

    /// Copy the top `group` entries and insert the copies below the `skip` entries under them
    fn duplicate(
        &mut self,
        nodes: &mut NodePool,
        group: usize,
        skip: usize,
    ) -> Result<(), InternalError> {
        let len = self.entries.len();
        if group + skip > len {
            return Err(InternalError::StackUnderflow);
        }
        let copies: Vec<NodeId> = self.entries[len - group..].to_vec();
        for node in &copies {
            nodes.inc_ref(*node);
        }
        let insert_at = len - group - skip;
        self.entries.splice(insert_at..insert_at, copies);
        Ok(())
    }

    /// Entries in the group duplicated by the `dup2` family (one category 2 value or two
    /// category 1 values)
    fn dup2_group(&self, nodes: &NodePool) -> Result<usize, InternalError> {
        Ok(if self.is_category_2_at(nodes, 0)? { 1 } else { 2 })
    }

    /// `..., v ⇒ ..., v, v`
    pub fn dup(&mut self, nodes: &mut NodePool) -> Result<(), InternalError> {
        self.duplicate(nodes, 1, 0)
    }

    /// `..., v2, v1 ⇒ ..., v1, v2, v1`
    pub fn dup_x1(&mut self, nodes: &mut NodePool) -> Result<(), InternalError> {
        self.duplicate(nodes, 1, 1)
    }

    /// `..., v3, v2, v1 ⇒ ..., v1, v3, v2, v1` (or `v2` is category 2 and `v3` absent)
    pub fn dup_x2(&mut self, nodes: &mut NodePool) -> Result<(), InternalError> {
        let skip = if self.is_category_2_at(nodes, 1)? { 1 } else { 2 };
        self.duplicate(nodes, 1, skip)
    }

    /// `..., v2, v1 ⇒ ..., v2, v1, v2, v1` (or a single category 2 `v1`)
    pub fn dup2(&mut self, nodes: &mut NodePool) -> Result<(), InternalError> {
        let group = self.dup2_group(nodes)?;
        self.duplicate(nodes, group, 0)
    }

    /// `..., v3, v2, v1 ⇒ ..., v2, v1, v3, v2, v1` (or a single category 2 `v1`)
    pub fn dup2_x1(&mut self, nodes: &mut NodePool) -> Result<(), InternalError> {
        let group = self.dup2_group(nodes)?;
        self.duplicate(nodes, group, 1)
    }

    /// All four forms of `dup2_x2`, told apart by the categories of the values involved
    pub fn dup2_x2(&mut self, nodes: &mut NodePool) -> Result<(), InternalError> {
        let group = self.dup2_group(nodes)?;
        let skip = if self.is_category_2_at(nodes, group)? { 1 } else { 2 };
        self.duplicate(nodes, group, skip)
    }

    /// `..., v2, v1 ⇒ ..., v1, v2`
    pub fn swap(&mut self) -> Result<(), InternalError> {
        let len = self.entries.len();
        if len < 2 {
            return Err(InternalError::StackUnderflow);
        }
        self.entries.swap(len - 1, len - 2);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::{ArithOp, ConstValue, DataType, ILOpCode};

    fn setup(values: &[ConstValue]) -> (NodePool, OperandStack, Vec<NodeId>) {
        let mut nodes = NodePool::new();
        let mut stack = OperandStack::new();
        let mut ids = vec![];
        for value in values {
            let id = nodes.create_const(0, *value);
            stack.push(&mut nodes, id);
            ids.push(id);
        }
        (nodes, stack, ids)
    }

    #[test]
    fn dup_shares_nodes() {
        let (mut nodes, mut stack, ids) = setup(&[ConstValue::Int(1)]);
        stack.dup(&mut nodes).unwrap();
        assert_eq!(stack.entries(), &[ids[0], ids[0]]);
        assert_eq!(nodes[ids[0]].ref_count(), 2);
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn dup_x2_forms() {
        let (mut nodes, mut stack, ids) =
            setup(&[ConstValue::Int(3), ConstValue::Int(2), ConstValue::Int(1)]);
        stack.dup_x2(&mut nodes).unwrap();
        assert_eq!(stack.entries(), &[ids[2], ids[0], ids[1], ids[2]]);

        let (mut nodes, mut stack, ids) = setup(&[ConstValue::Long(2), ConstValue::Int(1)]);
        stack.dup_x2(&mut nodes).unwrap();
        assert_eq!(stack.entries(), &[ids[1], ids[0], ids[1]]);
    }

    #[test]
    fn dup2_forms() {
        let (mut nodes, mut stack, ids) = setup(&[ConstValue::Int(2), ConstValue::Int(1)]);
        stack.dup2(&mut nodes).unwrap();
        assert_eq!(stack.entries(), &[ids[0], ids[1], ids[0], ids[1]]);

        let (mut nodes, mut stack, ids) = setup(&[ConstValue::double(1.0)]);
        stack.dup2(&mut nodes).unwrap();
        assert_eq!(stack.entries(), &[ids[0], ids[0]]);
        assert_eq!(stack.depth_in_words(&nodes), 4);

        let (mut nodes, mut stack, ids) = setup(&[ConstValue::Int(2), ConstValue::Long(1)]);
        stack.dup2_x1(&mut nodes).unwrap();
        assert_eq!(stack.entries(), &[ids[1], ids[0], ids[1]]);
    }

    #[test]
    fn dup2_x2_forms() {
        // Form 1: four category 1 values
        let (mut nodes, mut stack, ids) = setup(&[
            ConstValue::Int(4),
            ConstValue::Int(3),
            ConstValue::Int(2),
            ConstValue::Int(1),
        ]);
        stack.dup2_x2(&mut nodes).unwrap();
        assert_eq!(
            stack.entries(),
            &[ids[2], ids[3], ids[0], ids[1], ids[2], ids[3]]
        );

        // Form 2: category 2 on top of two category 1 values
        let (mut nodes, mut stack, ids) =
            setup(&[ConstValue::Int(3), ConstValue::Int(2), ConstValue::Long(1)]);
        stack.dup2_x2(&mut nodes).unwrap();
        assert_eq!(stack.entries(), &[ids[2], ids[0], ids[1], ids[2]]);

        // Form 3: two category 1 values on top of a category 2 value
        let (mut nodes, mut stack, ids) =
            setup(&[ConstValue::Long(3), ConstValue::Int(2), ConstValue::Int(1)]);
        stack.dup2_x2(&mut nodes).unwrap();
        assert_eq!(stack.entries(), &[ids[1], ids[2], ids[0], ids[1], ids[2]]);

        // Form 4: two category 2 values
        let (mut nodes, mut stack, ids) = setup(&[ConstValue::Long(2), ConstValue::double(1.0)]);
        stack.dup2_x2(&mut nodes).unwrap();
        assert_eq!(stack.entries(), &[ids[1], ids[0], ids[1]]);
    }

    #[test]
    fn underflow_is_an_error() {
        let (mut nodes, mut stack, _) = setup(&[ConstValue::Int(1)]);
        assert_eq!(stack.dup_x1(&mut nodes), Err(InternalError::StackUnderflow));
        assert_eq!(stack.swap(), Err(InternalError::StackUnderflow));
        stack.pop(&mut nodes).unwrap();
        assert_eq!(stack.pop(&mut nodes), Err(InternalError::StackUnderflow));
    }

    #[test]
    fn discarding_releases_orphans() {
        let mut nodes = NodePool::new();
        let mut stack = OperandStack::new();
        let one = nodes.iconst(0, 1);
        let two = nodes.iconst(0, 2);
        let add = nodes.create(ILOpCode::Arith(ArithOp::Add, DataType::Int32), 0, &[one, two]);
        stack.push(&mut nodes, add);
        stack.push(&mut nodes, one);

        stack.discard_entire_stack(&mut nodes);
        assert!(stack.is_empty());
        assert_eq!(nodes[add].ref_count(), 0);
        assert_eq!(nodes[one].ref_count(), 0);
        assert_eq!(nodes[two].ref_count(), 0);
    }
}
