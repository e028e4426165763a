//! Tree IL produced by the translator
//!
//! A method is a control flow graph of blocks. Each block is a list of tree tops, and each tree
//! top is the root of a DAG of nodes. Nodes with several parents are "commoned": they are
//! evaluated once, at their first reference in tree top order, and every later reference reuses
//! that value. This is why the order of tree tops matters even for side-effect free loads: a load
//! anchored under a tree top before a store sees the old value, while the same load first
//! referenced after the store sees the new one.
//!
//! All of the storage is arena based (`NodePool`, `TreeTops`, `ControlFlowGraph`,
//! `SymbolReferenceTable`) and addressed through small copyable ids.

mod cfg;
mod dump;
mod node;
mod opcodes;
mod symbols;
mod treetop;
mod types;

pub use cfg::*;
pub use node::*;
pub use opcodes::*;
pub use symbols::*;
pub use treetop::*;
pub use types::*;

use bitflags::bitflags;
use std::collections::{BTreeMap, BTreeSet};

bitflags! {
    /// Summary facts about the generated IL, consumed by later compiler phases
    pub struct MethodFlags: u16 {
        const HAS_MONITORS = 0x0001;
        const HAS_NEWS = 0x0002;
        const MAY_HAVE_INDIRECT_CALLS = 0x0004;
        const MAY_HAVE_LOOPS = 0x0008;
        const HAS_BRANCHES = 0x0010;
        const HAS_CHECKCASTS_OR_INSTANCEOFS = 0x0020;
        const HAS_EXCEPTION_HANDLERS = 0x0040;
        const MAY_HAVE_INLINEABLE_CALLS = 0x0080;
        const HAS_METHOD_HANDLE_INVOKES = 0x0100;
        const HAS_UNRESOLVED_REFERENCES = 0x0200;
    }
}

/// Pending push slot holding one value of the operand stack
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PendingPushSlot {
    /// Word offset from the bottom of the operand stack
    pub slot: u16,
    pub data_type: DataType,
}

/// IL of one method
#[derive(Debug)]
pub struct MethodIl {
    pub symbols: SymbolReferenceTable,
    pub nodes: NodePool,
    pub tree_tops: TreeTops,
    pub cfg: ControlFlowGraph,
    pub flags: MethodFlags,

    /// For each call that is an OSR induction point, the pending push slots its arguments were
    /// saved to (bottom-most argument first)
    pub osr_argument_slots: BTreeMap<usize, Vec<PendingPushSlot>>,

    /// Bytecode indices of `invokespecial`s inside interfaces that needed a receiver type test
    pub invoke_special_interface_calls: BTreeSet<usize>,

    /// Bytecode indices of `invokedynamic`s
    pub invoke_dynamic_calls: BTreeSet<usize>,

    /// Bytecode indices of signature-polymorphic `MethodHandle` invocations
    pub invoke_handle_calls: BTreeSet<usize>,

    /// Temporary holding the object a synchronized method locked, so the runtime can find and
    /// unlock it when an exception leaves the method
    pub sync_object_temp: Option<SymRefId>,
}

impl MethodIl {
    pub fn new() -> MethodIl {
        let mut nodes = NodePool::new();
        let mut tree_tops = TreeTops::new();
        let mut pseudo_block = || {
            let (entry, exit) = Self::block_trees(&mut nodes, &mut tree_tops, None);
            Block {
                entry,
                exit,
                bc_index: None,
                added_to_cfg: false,
                catch: None,
                is_cold: false,
            }
        };
        let start = pseudo_block();
        let end = pseudo_block();
        MethodIl {
            symbols: SymbolReferenceTable::new(),
            cfg: ControlFlowGraph::new(start, end),
            nodes,
            tree_tops,
            flags: MethodFlags::empty(),
            osr_argument_slots: BTreeMap::new(),
            invoke_special_interface_calls: BTreeSet::new(),
            invoke_dynamic_calls: BTreeSet::new(),
            invoke_handle_calls: BTreeSet::new(),
            sync_object_temp: None,
        }
    }

    fn block_trees(
        nodes: &mut NodePool,
        tree_tops: &mut TreeTops,
        bc_index: Option<usize>,
    ) -> (TreeTopId, TreeTopId) {
        let bc = bc_index.unwrap_or(0);
        let start = nodes.create(ILOpCode::BBStart, bc, &[]);
        let end = nodes.create(ILOpCode::BBEnd, bc, &[]);
        nodes.inc_ref(start);
        nodes.inc_ref(end);
        tree_tops.create_pair(start, end)
    }

    /// Create a block (not yet placed in the layout)
    pub fn new_block(&mut self, bc_index: Option<usize>) -> BlockId {
        let (entry, exit) = Self::block_trees(&mut self.nodes, &mut self.tree_tops, bc_index);
        self.cfg.add_block(Block {
            entry,
            exit,
            bc_index,
            added_to_cfg: false,
            catch: None,
            is_cold: false,
        })
    }

    fn root(&mut self, node: NodeId) -> NodeId {
        let root = if self.nodes[node].op().is_tree_top() {
            node
        } else {
            let bc_index = self.nodes[node].bc_index();
            self.nodes.create(ILOpCode::TreeTop, bc_index, &[node])
        };
        self.nodes.inc_ref(root);
        self.nodes.mark_anchored(root);
        root
    }

    /// Add a tree at the end of a block (wrapping it in a `treetop` if needed)
    pub fn append_tree(&mut self, block: BlockId, node: NodeId) -> TreeTopId {
        let exit = self.cfg.block(block).exit;
        self.insert_tree_before(exit, node)
    }

    /// Add a tree at the start of a block (wrapping it in a `treetop` if needed)
    pub fn prepend_tree(&mut self, block: BlockId, node: NodeId) -> TreeTopId {
        let entry = self.cfg.block(block).entry;
        self.insert_tree_after(entry, node)
    }

    pub fn insert_tree_before(&mut self, anchor: TreeTopId, node: NodeId) -> TreeTopId {
        let root = self.root(node);
        self.tree_tops.insert_before(anchor, root)
    }

    pub fn insert_tree_after(&mut self, anchor: TreeTopId, node: NodeId) -> TreeTopId {
        let root = self.root(node);
        self.tree_tops.insert_after(anchor, root)
    }

    /// Tree tops of a block, excluding the `BBStart` and `BBEnd`
    pub fn trees(&self, block: BlockId) -> Vec<TreeTopId> {
        let block = self.cfg.block(block);
        self.tree_tops.between(block.entry, block.exit)
    }

    /// Root nodes of the trees of a block, excluding the `BBStart` and `BBEnd`
    pub fn tree_nodes(&self, block: BlockId) -> Vec<NodeId> {
        self.trees(block)
            .into_iter()
            .map(|tt| self.tree_tops.node(tt))
            .collect()
    }

    /// Last tree of a block, excluding the `BBEnd`
    pub fn last_tree(&self, block: BlockId) -> Option<TreeTopId> {
        let block = self.cfg.block(block);
        self.tree_tops
            .prev(block.exit)
            .filter(|tt| *tt != block.entry)
    }

    /// Does the block end in a return, throw, `goto`, or switch?
    pub fn ends_in_unconditional_transfer(&self, block: BlockId) -> bool {
        self.last_tree(block).map_or(false, |tt| {
            let node = self.tree_tops.node(tt);
            let node = match self.nodes[node].op() {
                // `NULLCHK(athrow)` and friends
                op if op.is_check() => self.nodes[node].child(0).unwrap_or(node),
                _ => node,
            };
            self.nodes[node].op().is_unconditional_transfer()
        })
    }

    /// Block in the layout whose first instruction is at the given bytecode index
    pub fn block_at_bc_index(&self, bc_index: usize) -> Option<BlockId> {
        self.cfg
            .layout()
            .iter()
            .copied()
            .find(|b| self.cfg.block(*b).bc_index == Some(bc_index))
    }

    /// Every node reachable from the trees of a block, parents before children
    pub fn block_nodes(&self, block: BlockId) -> Vec<NodeId> {
        let mut seen = std::collections::HashSet::new();
        let mut nodes = vec![];
        for root in self.tree_nodes(block) {
            for node in self.nodes.subtree(root) {
                if seen.insert(node) {
                    nodes.push(node);
                }
            }
        }
        nodes
    }
}

impl Default for MethodIl {
    fn default() -> Self {
        MethodIl::new()
    }
}
