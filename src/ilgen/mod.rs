//! Translation of a method's bytecode into tree IL
//!
//! Generation is a single walk over the bytecode, simulating the operand stack with IL nodes.
//! Each instruction pops the nodes for its operands, builds the node for its result, and either
//! pushes that node or anchors it under a tree top in the current block. Blocks are created
//! lazily, the first time something refers to their bytecode index, and the walk proceeds in
//! "extents": runs of consecutive bytecode that end when control can no longer fall through or
//! falls into code that was already generated.
//!
//! Values still on the operand stack at the end of a block are stored into pending push slots,
//! and the successor block starts with loads of those slots on its stack. The same mechanism
//! saves the stack at OSR induction points.
//!
//! Once the walk is done, a few expansions run over the finished IL: exception handlers, null
//! tests guarding the resolution of classes in type tests, the receiver type test for
//! `invokespecial`s inside interfaces, method handle invocations, synchronized method entry and
//! exit, and dynamic loop transfer entry.

mod arrays;
mod blocks;
mod bytecode_iterator;
mod config;
mod details;
mod errors;
mod expansions;
mod fields;
mod intrinsics;
mod invoke;
mod locals;
mod objects;
mod pending_push;
mod signature;
mod stack;
mod walker;

pub use bytecode_iterator::*;
pub use config::*;
pub use details::*;
pub use errors::*;
pub use signature::*;
pub use stack::*;

use crate::frontend::{ClassLookahead, FrontEnd};
use crate::il::{
    BlockId, DataType, ILOpCode, MethodFlags, MethodIl, NodeId, PendingPushSlot, SymRefId, Symbol,
    SymbolReference, TreeTopId,
};
use crate::jvm::{BinaryName, Constant, ConstantIndex, ConstantPool, Method};
use std::collections::{HashMap, VecDeque};

/// State of the translation of one method
pub struct IlGenerator<'a> {
    method: &'a Method,
    details: &'a MethodDetails,
    front_end: &'a dyn FrontEnd,
    config: &'a TranslatorConfig,
    constant_pool: Option<&'a ConstantPool>,
    code: ByteCodeIterator<'a>,

    il: MethodIl,
    stack: OperandStack,

    /// Bytecode indices where an instruction starts
    instruction_starts: Vec<bool>,

    /// Bytecode indices where a block must start
    block_starts: Vec<bool>,

    /// Block at each bytecode index (created lazily)
    blocks: Vec<Option<BlockId>>,

    /// Bytecode indices whose instruction has been translated
    generated: Vec<bool>,

    /// Operand stack each block starts with, keyed by the block's bytecode index
    saved_stacks: HashMap<usize, Vec<NodeId>>,

    /// Pending push slots making up the entry stack of each block
    entry_shapes: HashMap<usize, Vec<PendingPushSlot>>,

    /// For each operand stack entry of the current block, the node last stored into pending push
    /// slots at that depth (and the first slot it went to)
    stack_temps: Vec<Option<(NodeId, u16)>>,

    /// Bytecode indices of blocks waiting to be generated
    todo: VecDeque<usize>,

    /// Block control falls into at the end of each block that doesn't end in a transfer
    fall_through: HashMap<BlockId, BlockId>,

    current_block: BlockId,

    /// Bytecode index of the instruction being translated
    bc_index: usize,

    /// Is local 0 ever overwritten (so it can't be assumed to hold `this`)?
    this_changed: bool,

    /// Nodes whose value is known to be an instance of exactly this class
    exact_types: HashMap<NodeId, BinaryName>,

    /// Nodes whose value is known to be an array of this length
    array_lengths: HashMap<NodeId, i32>,

    lookahead: Option<ClassLookahead>,

    /// Trees of `checkcast`s and `instanceof`s of possibly null objects against unresolved classes
    unresolved_type_tests: Vec<TreeTopId>,

    temp_count: u16,
}

impl<'a> IlGenerator<'a> {
    pub fn new(
        method: &'a Method,
        details: &'a MethodDetails,
        front_end: &'a dyn FrontEnd,
        config: &'a TranslatorConfig,
    ) -> IlGenerator<'a> {
        let len = method.code.bytes.len();
        let lookahead = if config.use_class_lookahead {
            front_end.class_lookahead(&method.class)
        } else {
            None
        };
        let il = MethodIl::new();
        let current_block = il.cfg.start();
        IlGenerator {
            method,
            details,
            front_end,
            config,
            constant_pool: front_end.constant_pool(&method.class),
            code: ByteCodeIterator::new(&method.code.bytes),
            il,
            stack: OperandStack::new(),
            instruction_starts: vec![false; len],
            block_starts: vec![false; len],
            blocks: vec![None; len],
            generated: vec![false; len],
            saved_stacks: HashMap::new(),
            entry_shapes: HashMap::new(),
            stack_temps: vec![],
            todo: VecDeque::new(),
            fall_through: HashMap::new(),
            current_block,
            bc_index: 0,
            this_changed: false,
            exact_types: HashMap::new(),
            array_lengths: HashMap::new(),
            lookahead,
            unresolved_type_tests: vec![],
            temp_count: 0,
        }
    }

    /// Translate the method
    pub fn generate(mut self) -> Result<MethodIl, Error> {
        log::debug!(
            "Generating IL for {:?}.{:?} ({} bytes, {:?})",
            self.method.class,
            self.method.name,
            self.method.code.bytes.len(),
            self.details
        );
        self.check_policies()?;
        self.find_and_mark_branch_targets()?;

        let first = self.block_at(0)?;
        let start = self.il.cfg.start();
        self.il.cfg.add_edge(start, first);
        self.todo.push_back(0);
        self.walk_pending()?;

        self.generate_exception_handlers()?;
        self.expand_unresolved_class_type_tests()?;
        self.expand_invoke_special_interface_calls()?;
        self.expand_method_handle_invokes()?;
        self.generate_synchronized_entry()?;
        self.generate_dlt_entry()?;

        let removed = self.il.cfg.remove_unreachable_blocks();
        if !removed.is_empty() {
            log::debug!("Removed unreachable blocks {:?}", removed);
        }

        self.stack.discard_entire_stack(&mut self.il.nodes);
        Ok(self.il)
    }

    /// Refuse methods that can't be compiled under the current configuration at all
    fn check_policies(&self) -> Result<(), Error> {
        if self.method.class.is_lambda_form()
            && self.config.lambda_forms_must_be_scorching
            && self.config.opt_level < OptLevel::Scorching
        {
            log::debug!("Lambda form {:?} below scorching", self.method.class);
            return Err(Error::Aborted(CompilationAbort::LambdaFormMustBeScorching));
        }
        Ok(())
    }

    /// Number of bytes of bytecode
    fn code_len(&self) -> usize {
        self.code.len()
    }

    fn push(&mut self, node: NodeId) {
        self.stack.push(&mut self.il.nodes, node);
    }

    fn pop(&mut self) -> Result<NodeId, Error> {
        Ok(self.stack.pop(&mut self.il.nodes)?)
    }

    fn peek(&self) -> Result<NodeId, Error> {
        Ok(self.stack.top()?)
    }

    /// Create a node for the current instruction
    fn create(&mut self, op: ILOpCode, children: &[NodeId]) -> NodeId {
        self.il.nodes.create(op, self.bc_index, children)
    }

    /// Create a node referring to a symbol, for the current instruction
    fn create_with_symbol(&mut self, op: ILOpCode, symbol: Symbol, children: &[NodeId]) -> NodeId {
        let symref = self.il.symbols.find_or_create_symbol(symbol);
        self.il
            .nodes
            .create_with_symref(op, self.bc_index, symref, children)
    }

    fn create_with_symref(&mut self, op: ILOpCode, symref: SymRefId, children: &[NodeId]) -> NodeId {
        self.il
            .nodes
            .create_with_symref(op, self.bc_index, symref, children)
    }

    /// Interned reference to a symbol coming from the constant pool
    fn constant_symref(
        &mut self,
        symbol: Symbol,
        cp_index: ConstantIndex,
        unresolved: bool,
    ) -> SymRefId {
        if unresolved {
            self.il.flags |= MethodFlags::HAS_UNRESOLVED_REFERENCES;
        }
        self.il.symbols.find_or_create(SymbolReference {
            symbol,
            cp_index: Some(cp_index),
            unresolved,
        })
    }

    /// Add a tree at the end of the current block
    fn append(&mut self, node: NodeId) -> TreeTopId {
        log::trace!(
            "  {} {} in {}",
            node,
            self.il.nodes[node].op(),
            self.current_block
        );
        self.il.append_tree(self.current_block, node)
    }

    /// Wrap a node in a check and anchor it
    fn append_check(&mut self, check: ILOpCode, node: NodeId, extra: &[NodeId]) -> NodeId {
        let mut children = vec![node];
        children.extend_from_slice(extra);
        let check = self.create(check, &children);
        self.append(check);
        check
    }

    /// Constant pool entry of the method's class
    fn constant(&self, index: ConstantIndex) -> Result<&'a Constant, Error> {
        self.constant_pool
            .and_then(|pool| pool.get(index))
            .ok_or(Error::Internal(InternalError::MissingConstant(index)))
    }

    fn is_non_null(&self, node: NodeId) -> bool {
        self.il.nodes[node].is_non_null()
    }

    /// Symbol of the node, if it has one
    fn symbol_of(&self, node: NodeId) -> Option<&Symbol> {
        self.il.nodes[node]
            .symref()
            .map(|symref| &self.il.symbols[symref].symbol)
    }

    /// Fresh temporary symbol
    fn new_temp(&mut self, data_type: DataType) -> Symbol {
        let index = self.temp_count;
        self.temp_count += 1;
        Symbol::Temp { index, data_type }
    }
}

/// Translate a method into IL
pub fn generate_il(
    method: &Method,
    details: &MethodDetails,
    front_end: &dyn FrontEnd,
    config: &TranslatorConfig,
) -> Result<MethodIl, Error> {
    IlGenerator::new(method, details, front_end, config).generate()
}

#[cfg(test)]
pub(crate) mod testing;
