use super::TreeTopId;
use crate::jvm::BinaryName;
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Handle to a block in a `ControlFlowGraph`
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_{}", self.0)
    }
}

/// Catch information of a block starting an exception handler
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CatchInfo {
    /// Class caught (`None` for `finally`-style handlers that catch everything)
    pub catch_type: Option<BinaryName>,

    /// Position of the handler in the exception table
    pub handler_index: usize,

    /// The protected range is a `synchronized` block: it follows a `monitorenter` and ends with
    /// the matching `monitorexit`, so the handler releases the monitor
    pub is_synchronized_handler: bool,
}

/// Basic block
#[derive(Clone, Debug)]
pub struct Block {
    /// Tree top holding the `BBStart` node
    pub entry: TreeTopId,

    /// Tree top holding the `BBEnd` node
    pub exit: TreeTopId,

    /// Bytecode index of the first instruction (`None` for blocks the translator synthesized)
    pub bc_index: Option<usize>,

    /// Has the block been placed in the layout?
    pub added_to_cfg: bool,

    pub catch: Option<CatchInfo>,

    /// Rarely executed (eg. the failure path of an inserted type test)
    pub is_cold: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EdgeKind {
    Normal,
    Exception,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Edge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

/// Control flow graph of one method
///
/// Besides the blocks holding trees, there are two synthetic blocks with no trees: the start
/// (whose only successor is the method entry) and the end (successor of every block that returns
/// or throws). Edges are recorded once per control transfer, so a switch with several cases
/// aimed at the same block contributes several parallel edges.
#[derive(Debug)]
pub struct ControlFlowGraph {
    blocks: Vec<Block>,
    edges: Vec<Edge>,
    layout: Vec<BlockId>,
    start: BlockId,
    end: BlockId,
}

impl ControlFlowGraph {
    /// New graph, given the start and end pseudo-blocks
    pub fn new(start: Block, end: Block) -> ControlFlowGraph {
        ControlFlowGraph {
            blocks: vec![start, end],
            edges: vec![],
            layout: vec![],
            start: BlockId(0),
            end: BlockId(1),
        }
    }

    pub fn start(&self) -> BlockId {
        self.start
    }

    pub fn end(&self) -> BlockId {
        self.end
    }

    pub fn add_block(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    /// Number of blocks ever created (including the start and end)
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.edges.push(Edge {
            from,
            to,
            kind: EdgeKind::Normal,
        });
    }

    /// Add an exception edge, unless the same one already exists
    pub fn add_exception_edge(&mut self, from: BlockId, to: BlockId) {
        let edge = Edge {
            from,
            to,
            kind: EdgeKind::Exception,
        };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    /// Remove one normal edge between the blocks, returning whether there was one
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) -> bool {
        let found = self
            .edges
            .iter()
            .position(|e| e.from == from && e.to == to && e.kind == EdgeKind::Normal);
        match found {
            Some(idx) => {
                self.edges.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Move every outgoing edge of `from` so that it leaves `to` instead
    pub fn move_successors(&mut self, from: BlockId, to: BlockId) {
        for edge in &mut self.edges {
            if edge.from == from && edge.kind == EdgeKind::Normal {
                edge.from = to;
            }
        }
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Normal successors (with repetition for parallel edges)
    pub fn successors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.from == id && e.kind == EdgeKind::Normal)
            .map(|e| e.to)
    }

    pub fn exception_successors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.from == id && e.kind == EdgeKind::Exception)
            .map(|e| e.to)
    }

    /// Normal predecessors (with repetition for parallel edges)
    pub fn predecessors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.to == id && e.kind == EdgeKind::Normal)
            .map(|e| e.from)
    }

    /// Number of normal edges into the block
    pub fn in_degree(&self, id: BlockId) -> usize {
        self.predecessors(id).count()
    }

    /// Blocks in their physical order
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    /// Place a block at the end of the layout
    pub fn append_to_layout(&mut self, id: BlockId) {
        self.layout.push(id);
        self.block_mut(id).added_to_cfg = true;
    }

    /// Place a block in the layout right after another one
    pub fn insert_in_layout_after(&mut self, after: BlockId, id: BlockId) {
        let position = self
            .layout
            .iter()
            .position(|b| *b == after)
            .map_or(self.layout.len(), |p| p + 1);
        self.layout.insert(position, id);
        self.block_mut(id).added_to_cfg = true;
    }

    /// Place a block at the front of the layout (it becomes the method entry)
    pub fn prepend_to_layout(&mut self, id: BlockId) {
        self.layout.insert(0, id);
        self.block_mut(id).added_to_cfg = true;
    }

    /// Block physically following this one
    pub fn layout_successor(&self, id: BlockId) -> Option<BlockId> {
        let position = self.layout.iter().position(|b| *b == id)?;
        self.layout.get(position + 1).copied()
    }

    /// Drop blocks that cannot be reached from the start, along with their edges
    ///
    /// Returns the removed blocks.
    pub fn remove_unreachable_blocks(&mut self) -> Vec<BlockId> {
        let mut reachable: HashSet<BlockId> = HashSet::new();
        let mut to_visit = VecDeque::from(vec![self.start]);
        reachable.insert(self.start);
        while let Some(id) = to_visit.pop_front() {
            for edge in self.edges.iter().filter(|e| e.from == id) {
                if reachable.insert(edge.to) {
                    to_visit.push_back(edge.to);
                }
            }
        }

        let removed: Vec<BlockId> = self
            .layout
            .iter()
            .copied()
            .filter(|b| !reachable.contains(b))
            .collect();
        self.layout.retain(|b| reachable.contains(b));
        self.edges.retain(|e| reachable.contains(&e.from));
        for id in &removed {
            self.block_mut(*id).added_to_cfg = false;
        }
        removed
    }
}
