mod common;

use common::{root_ops, TestMethod};
use jbc2il::il::{CompareCondition, ConstValue, DataType, EdgeKind, ILOpCode, MethodFlags, Symbol};
use jbc2il::ilgen::{CompilationAbort, Error, MethodDetails, OptLevel};
use jbc2il::jvm::{ByteCode, MethodAccessFlags};

#[test]
fn constant_addition() {
    // iconst_1; iconst_2; iadd; ireturn
    let il = TestMethod::of_static("()I", &[0x04, 0x05, 0x60, 0xac])
        .translate()
        .unwrap();
    assert_eq!(il.cfg.layout().len(), 1);
    let block = il.cfg.layout()[0];
    let roots = il.tree_nodes(block);
    assert_eq!(roots.len(), 1);

    let ret = &il.nodes[roots[0]];
    assert_eq!(ret.op(), ILOpCode::Return(DataType::Int32));
    let add = ret.child(0).unwrap();
    assert_eq!(
        il.nodes[add].op(),
        ILOpCode::Arith(jbc2il::il::ArithOp::Add, DataType::Int32)
    );
    let operands: Vec<Option<i64>> = il.nodes[add]
        .children()
        .iter()
        .map(|c| il.nodes.integer_value(*c))
        .collect();
    assert_eq!(operands, vec![Some(1), Some(2)]);
    assert!(il.cfg.successors(block).eq(Some(il.cfg.end())));
}

#[test]
fn ifnull_splits_into_two_blocks() {
    // aload_0; ifnull L5; return; L5: return
    let il = TestMethod::of_static("(Ljava/lang/Object;)V", &[0x2a, 0xc6, 0x00, 0x04, 0xb1, 0xb1])
        .translate()
        .unwrap();
    let first = il.cfg.layout()[0];
    let fall_through = il.block_at_bc_index(4).unwrap();
    let taken = il.block_at_bc_index(5).unwrap();
    assert_ne!(fall_through, taken);

    let roots = il.tree_nodes(first);
    assert_eq!(roots.len(), 1);
    let branch = &il.nodes[roots[0]];
    assert_eq!(
        branch.op(),
        ILOpCode::IfCmp {
            data_type: DataType::Address,
            condition: CompareCondition::Eq,
            unordered: false
        }
    );
    assert_eq!(branch.branch_target(), Some(taken));
    let null = branch.child(1).unwrap();
    assert_eq!(il.nodes[null].constant(), Some(ConstValue::NULL));

    let mut successors: Vec<_> = il.cfg.successors(first).collect();
    successors.sort();
    let mut expected = vec![fall_through, taken];
    expected.sort();
    assert_eq!(successors, expected);
    assert!(il.flags.contains(MethodFlags::HAS_BRANCHES));
}

#[test]
fn array_store_checks() {
    // aload_0; iload_1; iload_2; iastore; return
    let il = TestMethod::of_static("([III)V", &[0x2a, 0x1b, 0x1c, 0x4f, 0xb1])
        .translate()
        .unwrap();
    let block = il.cfg.layout()[0];
    assert_eq!(
        root_ops(&il, block),
        vec![
            ILOpCode::NullChk,
            ILOpCode::BndChk,
            ILOpCode::StoreIndirect(DataType::Int32),
            ILOpCode::Return(DataType::NoType),
        ]
    );
    let roots = il.tree_nodes(block);
    let length = il.nodes[roots[0]].child(0).unwrap();
    assert_eq!(il.nodes[length].op(), ILOpCode::ArrayLength);
    let bound_check = &il.nodes[roots[1]];
    assert_eq!(bound_check.child(0), Some(length));
    let index = bound_check.child(1).unwrap();
    assert!(matches!(
        il.symbols[il.nodes[index].symref().unwrap()].symbol,
        Symbol::Parm { slot: 1, .. }
    ));
}

#[test]
fn switch_cases_sharing_a_target() {
    // iload_0; lookupswitch { 1: L37, 2: L37, 3: L37, default: L36 }; L36: return; L37: return
    let mut code = vec![0x1a, 0xab, 0x00, 0x00];
    code.extend_from_slice(&35i32.to_be_bytes());
    code.extend_from_slice(&3i32.to_be_bytes());
    for key in 1..=3i32 {
        code.extend_from_slice(&key.to_be_bytes());
        code.extend_from_slice(&36i32.to_be_bytes());
    }
    code.extend_from_slice(&[0xb1, 0xb1]);
    assert_eq!(code.len(), 38);

    let il = TestMethod::of_static("(I)V", &code).translate().unwrap();
    let shared = il.block_at_bc_index(37).unwrap();
    let default = il.block_at_bc_index(36).unwrap();
    assert_eq!(il.cfg.in_degree(shared), 3);
    assert_eq!(il.cfg.in_degree(default), 1);
    let blocks_at_37 = il
        .cfg
        .layout()
        .iter()
        .filter(|b| il.cfg.block(**b).bc_index == Some(37))
        .count();
    assert_eq!(blocks_at_37, 1);
}

#[test]
fn stack_carried_across_a_join() {
    // iload_0; ifeq L8; iconst_1; goto L9; L8: iconst_2; L9: ireturn
    let code = [0x1a, 0x99, 0x00, 0x07, 0x04, 0xa7, 0x00, 0x04, 0x05, 0xac];
    let il = TestMethod::of_static("(I)I", &code).translate().unwrap();
    let slot = Symbol::PendingPush {
        slot: 0,
        data_type: DataType::Int32,
    };

    for bc_index in [4, 8] {
        let block = il.block_at_bc_index(bc_index).unwrap();
        let stores: Vec<_> = il
            .tree_nodes(block)
            .into_iter()
            .filter(|root| il.nodes[*root].op() == ILOpCode::Store(DataType::Int32))
            .collect();
        assert_eq!(stores.len(), 1, "predecessor at {}", bc_index);
        let symref = il.nodes[stores[0]].symref().unwrap();
        assert_eq!(il.symbols[symref].symbol, slot);
    }

    let join = il.block_at_bc_index(9).unwrap();
    let ret = il.tree_nodes(join)[0];
    let value = il.nodes[ret].child(0).unwrap();
    assert_eq!(il.nodes[value].op(), ILOpCode::Load(DataType::Int32));
    assert_eq!(il.symbols[il.nodes[value].symref().unwrap()].symbol, slot);
}

#[test]
fn catch_all_handler() {
    // iconst_1; pop; return; L3: pop; return
    let il = TestMethod::of_static("()V", &[0x04, 0x57, 0xb1, 0x57, 0xb1])
        .handler(0, 3, 3)
        .translate()
        .unwrap();
    assert!(il.flags.contains(MethodFlags::HAS_EXCEPTION_HANDLERS));
    let protected = il.block_at_bc_index(0).unwrap();
    let handler = il.block_at_bc_index(3).unwrap();
    let catch = il.cfg.block(handler).catch.as_ref().unwrap();
    assert_eq!(catch.catch_type, None);
    assert_eq!(catch.handler_index, 0);
    assert!(il.cfg.edges().iter().any(|e| e.from == protected
        && e.to == handler
        && e.kind == EdgeKind::Exception));
    assert_eq!(il.cfg.in_degree(handler), 0);
}

#[test]
fn synchronized_static_method() {
    // iconst_0; ireturn
    let il = TestMethod::of_static("()I", &[0x03, 0xac])
        .access(MethodAccessFlags::SYNCHRONIZED)
        .translate()
        .unwrap();
    assert!(il.flags.contains(MethodFlags::HAS_MONITORS));
    let layout = il.cfg.layout();
    assert_eq!(
        root_ops(&il, layout[0]),
        vec![ILOpCode::Store(DataType::Address), ILOpCode::MonEnter]
    );
    assert!(il.sync_object_temp.is_some());
    assert_eq!(
        root_ops(&il, layout[1]),
        vec![ILOpCode::MonExit, ILOpCode::Return(DataType::Int32)]
    );
}

#[test]
fn floating_point_without_fpu() {
    // fconst_1; freturn
    let mut method = TestMethod::of_static("()F", &[0x0c, 0xae]);
    method.config.target.has_fpu = false;
    assert_eq!(
        method.translate().unwrap_err(),
        Error::Aborted(CompilationAbort::UnimplementedOpcode(ByteCode::FConst1))
    );

    method.config.target.has_fpu = true;
    assert!(method.translate().is_ok());
}

#[test]
fn unknown_instructions() {
    // breakpoint; return
    let mut method = TestMethod::of_static("()V", &[0xca, 0xb1]);
    let err = method.translate().unwrap_err();
    assert_eq!(
        err,
        Error::Aborted(CompilationAbort::UnknownByteCode {
            byte_code: 0xca,
            bc_index: 0
        })
    );
    assert!(err.is_recoverable());

    method.unknown_byte_codes = jbc2il::frontend::UnknownByteCodeAction::Ignore;
    let il = method.translate().unwrap();
    let block = il.cfg.layout()[0];
    assert_eq!(root_ops(&il, block), vec![ILOpCode::Return(DataType::NoType)]);
}

#[test]
fn lambda_forms_wait_for_scorching() {
    let mut method = TestMethod::new("java/lang/invoke/LambdaForm$MH", "()V", true, &[0xb1]);
    assert_eq!(
        method.translate().unwrap_err(),
        Error::Aborted(CompilationAbort::LambdaFormMustBeScorching)
    );

    method.config.opt_level = OptLevel::Scorching;
    assert!(method.translate().is_ok());

    method.config.opt_level = OptLevel::Cold;
    method.config.lambda_forms_must_be_scorching = false;
    assert!(method.translate().is_ok());
}

#[test]
fn loop_transfer_entry() {
    // iconst_0; istore_1; L2: iload_1; iload_0; if_icmpge L13; iinc 1 1; goto L2; L13: iload_1; ireturn
    let code = [
        0x03, 0x3c, 0x1b, 0x1a, 0xa2, 0x00, 0x09, 0x84, 0x01, 0x01, 0xa7, 0xff, 0xf8, 0x1b, 0xac,
    ];
    let mut method = TestMethod::of_static("(I)I", &code);
    method.details = MethodDetails::DltInProgress { bc_index: 2 };
    let il = method.translate().unwrap();

    let entry = il.cfg.layout()[0];
    assert_eq!(il.cfg.block(entry).bc_index, None);
    let header = il.block_at_bc_index(2).unwrap();
    assert_eq!(il.cfg.in_degree(header), 3);

    // An entry at a bytecode index that isn't an instruction is rejected
    method.details = MethodDetails::DltInProgress { bc_index: 5 };
    assert!(matches!(method.translate(), Err(Error::Internal(_))));
}

#[test]
fn dump_lists_every_block() {
    let code = [0x1a, 0x99, 0x00, 0x07, 0x04, 0xa7, 0x00, 0x04, 0x05, 0xac];
    let il = TestMethod::of_static("(I)I", &code).translate().unwrap();
    let dump = il.to_string();
    for block in il.cfg.layout() {
        assert!(dump.contains(&block.to_string()), "{} missing from\n{}", block, dump);
    }
    assert!(dump.contains("ireturn"));
}
