use super::{BlockId, ConstValue, DataType, ILOpCode, SymRefId};
use bitflags::bitflags;
use std::fmt;
use std::ops::Index;

/// Handle to a node in a `NodePool`
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}n", self.0)
    }
}

bitflags! {
    /// Facts about a node's value
    pub struct NodeFlags: u8 {
        /// Value is known not to be `null`
        const NON_NULL = 0x01;

        /// Node is reachable from a tree top, so it has already been evaluated by the time any
        /// later tree runs
        const ANCHORED = 0x02;

        /// Load of the receiver (`this`) of the method
        const THIS = 0x04;
    }
}

/// Targets of a `table` or `lookup` node
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SwitchTargets {
    pub default: BlockId,

    /// Case keys and targets (for `table`, keys are consecutive starting at the low bound)
    pub cases: Vec<(i32, BlockId)>,
}

/// A node of the tree IL
///
/// Nodes form a DAG: a node used by more than one parent is "commoned" and evaluated only once,
/// at its first reference in tree top order.
#[derive(Clone, Debug)]
pub struct Node {
    op: ILOpCode,
    children: Vec<NodeId>,
    symref: Option<SymRefId>,
    constant: Option<ConstValue>,
    branch_target: Option<BlockId>,
    switch: Option<Box<SwitchTargets>>,
    ref_count: u32,
    bc_index: usize,
    flags: NodeFlags,
}

impl Node {
    pub fn op(&self) -> ILOpCode {
        self.op
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<NodeId> {
        self.children.get(index).copied()
    }

    pub fn symref(&self) -> Option<SymRefId> {
        self.symref
    }

    pub fn constant(&self) -> Option<ConstValue> {
        self.constant
    }

    pub fn branch_target(&self) -> Option<BlockId> {
        self.branch_target
    }

    pub fn switch(&self) -> Option<&SwitchTargets> {
        self.switch.as_deref()
    }

    /// Number of parents, tree tops, and operand stack entries referring to the node
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Bytecode index of the instruction the node was generated for
    pub fn bc_index(&self) -> usize {
        self.bc_index
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn data_type(&self) -> DataType {
        self.op.data_type()
    }

    pub fn is_non_null(&self) -> bool {
        self.flags.contains(NodeFlags::NON_NULL)
    }

    pub fn is_anchored(&self) -> bool {
        self.flags.contains(NodeFlags::ANCHORED)
    }
}

/// Arena of IL nodes for one method
///
/// Reference counts are explicit: creating a node increments the count of each of its children,
/// and anything else holding a `NodeId` (tree tops, the simulated operand stack) must call
/// `inc_ref`/`dec_ref` itself.
#[derive(Default, Debug)]
pub struct NodePool {
    nodes: Vec<Node>,
}

impl NodePool {
    pub fn new() -> NodePool {
        NodePool { nodes: vec![] }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: Node) -> NodeId {
        for child in &node.children {
            self.nodes[child.0 as usize].ref_count += 1;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn blank(op: ILOpCode, bc_index: usize, children: &[NodeId]) -> Node {
        Node {
            op,
            children: children.to_vec(),
            symref: None,
            constant: None,
            branch_target: None,
            switch: None,
            ref_count: 0,
            bc_index,
            flags: NodeFlags::empty(),
        }
    }

    /// Create a node with the given children
    pub fn create(&mut self, op: ILOpCode, bc_index: usize, children: &[NodeId]) -> NodeId {
        self.push(Self::blank(op, bc_index, children))
    }

    /// Create a node referring to a symbol
    pub fn create_with_symref(
        &mut self,
        op: ILOpCode,
        bc_index: usize,
        symref: SymRefId,
        children: &[NodeId],
    ) -> NodeId {
        let mut node = Self::blank(op, bc_index, children);
        node.symref = Some(symref);
        self.push(node)
    }

    /// Create a constant node
    pub fn create_const(&mut self, bc_index: usize, value: ConstValue) -> NodeId {
        let mut node = Self::blank(ILOpCode::Const(value.data_type()), bc_index, &[]);
        node.constant = Some(value);
        if let ConstValue::Address(a) = value {
            if a != 0 {
                node.flags |= NodeFlags::NON_NULL;
            }
        }
        self.push(node)
    }

    pub fn iconst(&mut self, bc_index: usize, value: i32) -> NodeId {
        self.create_const(bc_index, ConstValue::Int(value))
    }

    /// Create a branch (`goto` or `if*cmp*`)
    pub fn create_branch(
        &mut self,
        op: ILOpCode,
        bc_index: usize,
        children: &[NodeId],
        target: BlockId,
    ) -> NodeId {
        let mut node = Self::blank(op, bc_index, children);
        node.branch_target = Some(target);
        self.push(node)
    }

    /// Create a `table` or `lookup` on the selector
    pub fn create_switch(
        &mut self,
        op: ILOpCode,
        bc_index: usize,
        selector: NodeId,
        targets: SwitchTargets,
    ) -> NodeId {
        let mut node = Self::blank(op, bc_index, &[selector]);
        node.switch = Some(Box::new(targets));
        self.push(node)
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn data_type(&self, id: NodeId) -> DataType {
        self.get(id).data_type()
    }

    pub fn inc_ref(&mut self, id: NodeId) {
        self.nodes[id.0 as usize].ref_count += 1;
    }

    /// Drop one reference to the node, returning the remaining count
    pub fn dec_ref(&mut self, id: NodeId) -> u32 {
        let node = &mut self.nodes[id.0 as usize];
        node.ref_count = node.ref_count.saturating_sub(1);
        node.ref_count
    }

    /// Drop one reference to the node, and if that was the last one, release its children too
    pub fn recursively_dec_ref(&mut self, id: NodeId) {
        let mut to_release = vec![id];
        while let Some(id) = to_release.pop() {
            if self.dec_ref(id) == 0 {
                to_release.extend(self.nodes[id.0 as usize].children.iter().copied());
            }
        }
    }

    /// Release the children of a node nothing refers to anymore
    ///
    /// Does nothing if the node is still referenced.
    pub fn discard_orphan(&mut self, id: NodeId) {
        if self.get(id).ref_count == 0 {
            let children = self.nodes[id.0 as usize].children.clone();
            for child in children {
                self.recursively_dec_ref(child);
            }
        }
    }

    /// Replace the child at `index`, fixing up reference counts
    pub fn set_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        let old = std::mem::replace(&mut self.nodes[parent.0 as usize].children[index], child);
        self.inc_ref(child);
        self.dec_ref(old);
    }

    /// Insert a child at `index`, shifting the later ones
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.nodes[parent.0 as usize].children.insert(index, child);
        self.inc_ref(child);
    }

    /// Change the opcode of a node in place (its parents keep seeing the same node)
    pub fn set_op(&mut self, id: NodeId, op: ILOpCode) {
        self.nodes[id.0 as usize].op = op;
    }

    /// Replace the symbol a node refers to
    pub fn set_symref(&mut self, id: NodeId, symref: SymRefId) {
        self.nodes[id.0 as usize].symref = Some(symref);
    }

    /// Replace the target of a branch
    pub fn set_branch_target(&mut self, id: NodeId, target: BlockId) {
        self.nodes[id.0 as usize].branch_target = Some(target);
    }

    pub fn add_flags(&mut self, id: NodeId, flags: NodeFlags) {
        self.nodes[id.0 as usize].flags |= flags;
    }

    /// Mark the node and everything under it as evaluated
    pub fn mark_anchored(&mut self, id: NodeId) {
        let mut to_mark = vec![id];
        while let Some(id) = to_mark.pop() {
            let node = &mut self.nodes[id.0 as usize];
            if !node.flags.contains(NodeFlags::ANCHORED) {
                node.flags |= NodeFlags::ANCHORED;
                to_mark.extend(node.children.iter().copied());
            }
        }
    }

    /// Integral constant value of the node, if it is an integral constant
    pub fn integer_value(&self, id: NodeId) -> Option<i64> {
        self.get(id).constant.and_then(ConstValue::as_integer)
    }

    /// Every node in the DAG rooted at `root`, each listed once, parents before children
    pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut seen = std::collections::HashSet::new();
        let mut order = vec![];
        let mut to_visit = vec![root];
        while let Some(id) = to_visit.pop() {
            if seen.insert(id) {
                order.push(id);
                to_visit.extend(self.get(id).children.iter().rev().copied());
            }
        }
        order
    }
}

impl Index<NodeId> for NodePool {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        self.get(id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::il::ArithOp;

    #[test]
    fn creation_counts_children() {
        let mut pool = NodePool::new();
        let one = pool.iconst(0, 1);
        let two = pool.iconst(1, 2);
        let add = pool.create(ILOpCode::Arith(ArithOp::Add, DataType::Int32), 2, &[one, two]);
        let mul = pool.create(ILOpCode::Arith(ArithOp::Mul, DataType::Int32), 3, &[add, add]);

        assert_eq!(pool[one].ref_count(), 1);
        assert_eq!(pool[add].ref_count(), 2);
        assert_eq!(pool[mul].ref_count(), 0);
        assert_eq!(pool.subtree(mul), vec![mul, add, one, two]);
    }

    #[test]
    fn recursive_release() {
        let mut pool = NodePool::new();
        let one = pool.iconst(0, 1);
        let neg = pool.create(ILOpCode::Arith(ArithOp::Neg, DataType::Int32), 1, &[one]);
        pool.inc_ref(neg);
        pool.recursively_dec_ref(neg);
        assert_eq!(pool[neg].ref_count(), 0);
        assert_eq!(pool[one].ref_count(), 0);
    }

    #[test]
    fn replacing_children() {
        let mut pool = NodePool::new();
        let one = pool.iconst(0, 1);
        let two = pool.iconst(0, 2);
        let neg = pool.create(ILOpCode::Arith(ArithOp::Neg, DataType::Int32), 1, &[one]);
        pool.set_child(neg, 0, two);
        assert_eq!(pool[one].ref_count(), 0);
        assert_eq!(pool[two].ref_count(), 1);
        assert_eq!(pool[neg].child(0), Some(two));
    }

    #[test]
    fn inserting_children() {
        let mut pool = NodePool::new();
        let target = pool.create_const(0, ConstValue::Long(8));
        let arg = pool.iconst(0, 1);
        let call = ILOpCode::Call {
            return_type: DataType::NoType,
            indirect: false,
        };
        let node = pool.create(call, 0, &[arg]);
        pool.insert_child(node, 0, target);
        pool.set_op(
            node,
            ILOpCode::Call {
                return_type: DataType::NoType,
                indirect: true,
            },
        );
        assert_eq!(pool[node].children(), &[target, arg]);
        assert_eq!(pool[target].ref_count(), 1);
        assert_eq!(pool[node].op().to_string(), "calli");
    }

    #[test]
    fn anchoring_marks_subtree() {
        let mut pool = NodePool::new();
        let one = pool.iconst(0, 1);
        let neg = pool.create(ILOpCode::Arith(ArithOp::Neg, DataType::Int32), 1, &[one]);
        pool.mark_anchored(neg);
        assert!(pool[one].is_anchored());
        assert!(!pool[neg].is_non_null());

        let address = pool.create_const(2, ConstValue::Address(8));
        let null = pool.create_const(2, ConstValue::NULL);
        assert!(pool[address].is_non_null());
        assert!(!pool[null].is_non_null());
    }
}
