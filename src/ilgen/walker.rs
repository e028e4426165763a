//! Per-instruction translation
//!
//! Every opcode byte maps to a handler in `DISPATCH`. A handler translates one instruction (two,
//! when a compare is fused with the `if` after it) and tells the walker where control goes next.
//! Handlers for fields, arrays, objects, locals and calls live in their own modules; the ones here
//! cover constants, stack shuffling, arithmetic, and control flow.

use super::arrays::{
    gen_anew_array, gen_array_length, gen_array_load, gen_array_store, gen_multi_anew_array,
    gen_new_array,
};
use super::fields::{gen_get_field, gen_get_static, gen_put_field, gen_put_static};
use super::invoke::gen_invoke;
use super::locals::{gen_iinc, gen_load, gen_store};
use super::objects::{gen_athrow, gen_checkcast, gen_instanceof, gen_ldc, gen_monitor, gen_new};
use super::{CompilationAbort, Error, IlGenerator, Instruction, InternalError, Operands};
use crate::frontend::UnknownByteCodeAction;
use crate::il::{
    ArithOp, CompareCondition, CompareKind, ConstValue, DataType, Helper, ILOpCode, MethodFlags,
    NodeId, SwitchTargets, Symbol,
};
use crate::jvm::ByteCode;

/// Where the walk continues after an instruction
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(super) enum Flow {
    /// Next instruction (the walker saves the stack if a block starts there)
    Continue(usize),

    /// Next instruction, which starts a block; the handler already saved the stack for it
    FallThrough(usize),

    /// Control never reaches the next instruction
    End,
}

pub(super) type Handler = fn(&mut IlGenerator<'_>, &Instruction) -> Result<Flow, Error>;

pub(super) static DISPATCH: [Handler; 256] = build_dispatch_table();

const fn fill(mut table: [Handler; 256], first: usize, last: usize, handler: Handler) -> [Handler; 256] {
    let mut op = first;
    while op <= last {
        table[op] = handler;
        op += 1;
    }
    table
}

const fn build_dispatch_table() -> [Handler; 256] {
    let table = [gen_unknown as Handler; 256];
    let table = fill(table, 0x00, 0x00, gen_nop);
    let table = fill(table, 0x01, 0x11, gen_constant);
    let table = fill(table, 0x12, 0x14, gen_ldc);
    let table = fill(table, 0x15, 0x2d, gen_load);
    let table = fill(table, 0x2e, 0x35, gen_array_load);
    let table = fill(table, 0x36, 0x4e, gen_store);
    let table = fill(table, 0x4f, 0x56, gen_array_store);
    let table = fill(table, 0x57, 0x5f, gen_stack_op);
    let table = fill(table, 0x60, 0x83, gen_arith);
    let table = fill(table, 0x84, 0x84, gen_iinc);
    let table = fill(table, 0x85, 0x93, gen_convert);
    let table = fill(table, 0x94, 0x98, gen_compare);
    let table = fill(table, 0x99, 0x9e, gen_if_zero);
    let table = fill(table, 0x9f, 0xa6, gen_if_cmp);
    let table = fill(table, 0xa7, 0xa7, gen_goto);
    let table = fill(table, 0xaa, 0xab, gen_switch);
    let table = fill(table, 0xac, 0xb1, gen_return);
    let table = fill(table, 0xb2, 0xb2, gen_get_static);
    let table = fill(table, 0xb3, 0xb3, gen_put_static);
    let table = fill(table, 0xb4, 0xb4, gen_get_field);
    let table = fill(table, 0xb5, 0xb5, gen_put_field);
    let table = fill(table, 0xb6, 0xba, gen_invoke);
    let table = fill(table, 0xbb, 0xbb, gen_new);
    let table = fill(table, 0xbc, 0xbc, gen_new_array);
    let table = fill(table, 0xbd, 0xbd, gen_anew_array);
    let table = fill(table, 0xbe, 0xbe, gen_array_length);
    let table = fill(table, 0xbf, 0xbf, gen_athrow);
    let table = fill(table, 0xc0, 0xc0, gen_checkcast);
    let table = fill(table, 0xc1, 0xc1, gen_instanceof);
    let table = fill(table, 0xc2, 0xc3, gen_monitor);
    let table = fill(table, 0xc5, 0xc5, gen_multi_anew_array);
    let table = fill(table, 0xc6, 0xc7, gen_if_null);
    fill(table, 0xc8, 0xc8, gen_goto)
}

pub(super) fn malformed(insn: &Instruction) -> Error {
    Error::Internal(InternalError::MalformedByteCode(insn.bc_index))
}

fn gen_nop(_gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    Ok(Flow::Continue(insn.next_index()))
}

/// `jsr`, `ret`, `breakpoint`, `impdep*`, and bytes with no instruction assigned
fn gen_unknown(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    match gen.front_end.unknown_byte_code(insn.raw, insn.bc_index) {
        UnknownByteCodeAction::Abort => {
            log::debug!("Aborting on bytecode {:#04x} at {}", insn.raw, insn.bc_index);
            Err(Error::Aborted(CompilationAbort::UnknownByteCode {
                byte_code: insn.raw,
                bc_index: insn.bc_index,
            }))
        }
        UnknownByteCodeAction::Ignore => Ok(Flow::Continue(insn.next_index())),
    }
}

fn gen_constant(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    use ByteCode::*;
    let value = match insn.byte_code()? {
        AConstNull => ConstValue::NULL,
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
            ConstValue::Int(insn.raw as i32 - 0x03)
        }
        LConst0 | LConst1 => ConstValue::Long(insn.raw as i64 - 0x09),
        FConst0 | FConst1 | FConst2 => ConstValue::float((insn.raw - 0x0b) as f32),
        DConst0 | DConst1 => ConstValue::double((insn.raw - 0x0e) as f64),
        BiPush | SiPush => match insn.operands {
            Operands::Immediate(value) => ConstValue::Int(value),
            _ => return Err(malformed(insn)),
        },
        _ => return Err(malformed(insn)),
    };
    let node = gen.il.nodes.create_const(gen.bc_index, value);
    gen.push(node);
    Ok(Flow::Continue(insn.next_index()))
}

fn gen_stack_op(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    use ByteCode::*;
    let nodes = &mut gen.il.nodes;
    let stack = &mut gen.stack;
    match insn.byte_code()? {
        Pop => stack.discard(nodes)?,
        Pop2 => {
            let top = stack.top()?;
            stack.discard(nodes)?;
            if !nodes.data_type(top).is_wide() {
                stack.discard(nodes)?;
            }
        }
        Dup => stack.dup(nodes)?,
        DupX1 => stack.dup_x1(nodes)?,
        DupX2 => stack.dup_x2(nodes)?,
        Dup2 => stack.dup2(nodes)?,
        Dup2X1 => stack.dup2_x1(nodes)?,
        Dup2X2 => stack.dup2_x2(nodes)?,
        Swap => stack.swap()?,
        _ => return Err(malformed(insn)),
    }
    Ok(Flow::Continue(insn.next_index()))
}

/// Operation and type of the arithmetic bytecodes
fn arith_op(op: ByteCode) -> Option<(ArithOp, DataType)> {
    use ByteCode::*;
    let arith = match op {
        IAdd | LAdd | FAdd | DAdd => ArithOp::Add,
        ISub | LSub | FSub | DSub => ArithOp::Sub,
        IMul | LMul | FMul | DMul => ArithOp::Mul,
        IDiv | LDiv | FDiv | DDiv => ArithOp::Div,
        IRem | LRem | FRem | DRem => ArithOp::Rem,
        INeg | LNeg | FNeg | DNeg => ArithOp::Neg,
        IShl | LShl => ArithOp::Shl,
        IShr | LShr => ArithOp::Shr,
        IUShr | LUShr => ArithOp::UShr,
        IAnd | LAnd => ArithOp::And,
        IOr | LOr => ArithOp::Or,
        IXor | LXor => ArithOp::Xor,
        _ => return None,
    };

    // Within `iadd..=dneg` the type cycles int, long, float, double; shifts and bitwise ops
    // alternate int and long
    let raw = u8::from(op);
    let data_type = if raw <= u8::from(DNeg) {
        [DataType::Int32, DataType::Int64, DataType::Float, DataType::Double]
            [((raw - u8::from(IAdd)) % 4) as usize]
    } else if (raw - u8::from(IShl)) % 2 == 0 {
        DataType::Int32
    } else {
        DataType::Int64
    };
    Some((arith, data_type))
}

fn gen_arith(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let (arith, data_type) = arith_op(insn.byte_code()?).ok_or_else(|| malformed(insn))?;
    let op = ILOpCode::Arith(arith, data_type);

    if arith == ArithOp::Neg {
        let value = gen.pop()?;
        let node = gen.create(op, &[value]);
        gen.push(node);
        return Ok(Flow::Continue(insn.next_index()));
    }

    let right = gen.pop()?;
    let left = gen.pop()?;
    let node = gen.create(op, &[left, right]);

    let divides = matches!(arith, ArithOp::Div | ArithOp::Rem) && !data_type.is_floating_point();
    let safe_divisor = gen.il.nodes.integer_value(right).map_or(false, |v| v != 0);
    if divides && !safe_divisor {
        gen.append_check(ILOpCode::DivChk, node, &[]);
    }
    gen.push(node);
    Ok(Flow::Continue(insn.next_index()))
}

fn convert(from: DataType, to: DataType) -> ILOpCode {
    ILOpCode::Convert {
        from,
        to,
        unsigned: false,
    }
}

fn gen_convert(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    use ByteCode::*;
    use DataType::*;
    let value = gen.pop()?;

    // Truncations to sub-int types are sign or zero extended straight back
    let (narrow, widen) = match insn.byte_code()? {
        I2L => (None, convert(Int32, Int64)),
        I2F => (None, convert(Int32, Float)),
        I2D => (None, convert(Int32, Double)),
        L2I => (None, convert(Int64, Int32)),
        L2F => (None, convert(Int64, Float)),
        L2D => (None, convert(Int64, Double)),
        F2I => (None, convert(Float, Int32)),
        F2L => (None, convert(Float, Int64)),
        F2D => (None, convert(Float, Double)),
        D2I => (None, convert(Double, Int32)),
        D2L => (None, convert(Double, Int64)),
        D2F => (None, convert(Double, Float)),
        I2B => (Some(convert(Int32, Int8)), convert(Int8, Int32)),
        I2S => (Some(convert(Int32, Int16)), convert(Int16, Int32)),
        I2C => (
            Some(convert(Int32, Int16)),
            ILOpCode::Convert {
                from: Int16,
                to: Int32,
                unsigned: true,
            },
        ),
        _ => return Err(malformed(insn)),
    };

    let value = match narrow {
        Some(narrow) => gen.create(narrow, &[value]),
        None => value,
    };
    let node = gen.create(widen, &[value]);
    gen.push(node);
    Ok(Flow::Continue(insn.next_index()))
}

fn condition(op: ByteCode) -> Option<CompareCondition> {
    use ByteCode::*;
    Some(match op {
        IfEq | IfICmpEq | IfACmpEq | IfNull => CompareCondition::Eq,
        IfNe | IfICmpNe | IfACmpNe | IfNonNull => CompareCondition::Ne,
        IfLt | IfICmpLt => CompareCondition::Lt,
        IfGe | IfICmpGe => CompareCondition::Ge,
        IfGt | IfICmpGt => CompareCondition::Gt,
        IfLe | IfICmpLe => CompareCondition::Le,
        _ => return None,
    })
}

/// `lcmp`, `fcmp<op>`, `dcmp<op>`, fused with a directly following `if<cond>` when possible
fn gen_compare(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    use ByteCode::*;
    let kind = match insn.byte_code()? {
        LCmp => CompareKind::Long,
        FCmpL => CompareKind::FloatL,
        FCmpG => CompareKind::FloatG,
        DCmpL => CompareKind::DoubleL,
        DCmpG => CompareKind::DoubleG,
        _ => return Err(malformed(insn)),
    };

    let next = insn.next_index();
    if next < gen.code_len() && !gen.block_starts[next] && !gen.generated[next] {
        let branch = gen.code.decode(next)?;
        if let Some(condition) = branch.op.filter(|op| op.is_if_zero()).and_then(condition) {
            let right = gen.pop()?;
            let left = gen.pop()?;
            gen.generated[next] = true;
            gen.bc_index = next;
            log::trace!("{:>5}: {:?} fused with {:?}", next, branch.op, kind);

            // The comparison yields -1 or 1 for NaN, so conditions that hold for that value hold
            // for unordered operands too
            let unordered = match kind {
                CompareKind::Long => false,
                _ if kind.nan_is_less() => matches!(
                    condition,
                    CompareCondition::Lt | CompareCondition::Le | CompareCondition::Ne
                ),
                _ => matches!(
                    condition,
                    CompareCondition::Gt | CompareCondition::Ge | CompareCondition::Ne
                ),
            };
            let op = ILOpCode::IfCmp {
                data_type: kind.operand_type(),
                condition,
                unordered,
            };
            return conditional_branch(gen, &branch, op, left, right);
        }
    }

    let right = gen.pop()?;
    let left = gen.pop()?;
    let node = gen.create(ILOpCode::Compare(kind), &[left, right]);
    gen.push(node);
    Ok(Flow::Continue(next))
}

fn gen_if_zero(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let condition = condition(insn.byte_code()?).ok_or_else(|| malformed(insn))?;
    let value = gen.pop()?;
    let zero = gen.il.nodes.iconst(gen.bc_index, 0);
    let op = ILOpCode::IfCmp {
        data_type: DataType::Int32,
        condition,
        unordered: false,
    };
    conditional_branch(gen, insn, op, value, zero)
}

/// `if_icmp<cond>` and `if_acmp<cond>`
fn gen_if_cmp(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let op = insn.byte_code()?;
    let condition = condition(op).ok_or_else(|| malformed(insn))?;
    let data_type = match op {
        ByteCode::IfACmpEq | ByteCode::IfACmpNe => DataType::Address,
        _ => DataType::Int32,
    };
    let right = gen.pop()?;
    let left = gen.pop()?;
    let op = ILOpCode::IfCmp {
        data_type,
        condition,
        unordered: false,
    };
    conditional_branch(gen, insn, op, left, right)
}

fn gen_if_null(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let condition = condition(insn.byte_code()?).ok_or_else(|| malformed(insn))?;
    let value = gen.pop()?;
    let null = gen.il.nodes.create_const(gen.bc_index, ConstValue::NULL);
    let op = ILOpCode::IfCmp {
        data_type: DataType::Address,
        condition,
        unordered: false,
    };
    conditional_branch(gen, insn, op, value, null)
}

fn branch_target(insn: &Instruction) -> Result<usize, Error> {
    match insn.operands {
        Operands::Branch(target) => Ok(target),
        _ => Err(malformed(insn)),
    }
}

/// Loop bookkeeping for a branch that may go backwards
fn note_branch(gen: &mut IlGenerator<'_>, target: usize) {
    if target > gen.bc_index {
        return;
    }
    gen.il.flags |= MethodFlags::MAY_HAVE_LOOPS;
    if gen.config.insert_async_checks {
        let check = gen.create_with_symbol(
            ILOpCode::AsyncCheck,
            Symbol::Helper(Helper::AsyncCheck),
            &[],
        );
        gen.append(check);
    }
}

/// Emit a two-way branch on `left` and `right`, ending the current block
///
/// Both successors get the operand stack as it is once the operands are popped.
fn conditional_branch(
    gen: &mut IlGenerator<'_>,
    insn: &Instruction,
    op: ILOpCode,
    left: NodeId,
    right: NodeId,
) -> Result<Flow, Error> {
    let target = branch_target(insn)?;
    let next = insn.next_index();
    if next >= gen.code_len() {
        return Err(Error::Internal(InternalError::FellOffEnd(insn.bc_index)));
    }

    note_branch(gen, target);
    gen.save_stack_protecting(Some(target), &[left, right])?;
    gen.save_stack_protecting(Some(next), &[left, right])?;

    let target_block = gen.block_at(target)?;
    let branch = gen
        .il
        .nodes
        .create_branch(op, gen.bc_index, &[left, right], target_block);
    gen.append(branch);
    gen.il.cfg.add_edge(gen.current_block, target_block);
    gen.queue(target);
    gen.il.flags |= MethodFlags::HAS_BRANCHES;
    Ok(Flow::FallThrough(next))
}

/// `goto` and `goto_w`
fn gen_goto(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let target = branch_target(insn)?;
    note_branch(gen, target);
    gen.save_stack(Some(target))?;

    let target_block = gen.block_at(target)?;
    let goto = gen
        .il
        .nodes
        .create_branch(ILOpCode::Goto, gen.bc_index, &[], target_block);
    gen.append(goto);
    gen.il.cfg.add_edge(gen.current_block, target_block);
    gen.queue(target);
    Ok(Flow::End)
}

/// `tableswitch` and `lookupswitch`
///
/// Every case gets its own edge, even when several cases share a target.
fn gen_switch(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    let (op, default, cases): (ILOpCode, usize, Vec<(i32, usize)>) = match &insn.operands {
        Operands::TableSwitch {
            default,
            low,
            targets,
        } => (
            ILOpCode::Table,
            *default,
            targets
                .iter()
                .enumerate()
                .map(|(i, target)| (low.wrapping_add(i as i32), *target))
                .collect(),
        ),
        Operands::LookupSwitch { default, pairs } => (ILOpCode::Lookup, *default, pairs.clone()),
        _ => return Err(malformed(insn)),
    };
    let selector = gen.pop()?;

    let mut distinct: Vec<usize> = vec![];
    for target in cases.iter().map(|(_, target)| *target).chain(Some(default)) {
        if !distinct.contains(&target) {
            distinct.push(target);
        }
    }
    for target in &distinct {
        gen.save_stack_protecting(Some(*target), &[selector])?;
    }
    if distinct.iter().any(|target| *target <= gen.bc_index) {
        gen.il.flags |= MethodFlags::MAY_HAVE_LOOPS;
    }

    let mut targets = vec![];
    for (key, target) in cases {
        let block = gen.block_at(target)?;
        gen.il.cfg.add_edge(gen.current_block, block);
        targets.push((key, block));
    }
    let default_block = gen.block_at(default)?;
    gen.il.cfg.add_edge(gen.current_block, default_block);

    let switch = gen.il.nodes.create_switch(
        op,
        gen.bc_index,
        selector,
        SwitchTargets {
            default: default_block,
            cases: targets,
        },
    );
    gen.append(switch);
    for target in distinct {
        gen.queue(target);
    }
    gen.il.flags |= MethodFlags::HAS_BRANCHES;
    Ok(Flow::End)
}

fn gen_return(gen: &mut IlGenerator<'_>, insn: &Instruction) -> Result<Flow, Error> {
    use ByteCode::*;
    let data_type = match insn.byte_code()? {
        IReturn => DataType::Int32,
        LReturn => DataType::Int64,
        FReturn => DataType::Float,
        DReturn => DataType::Double,
        AReturn => DataType::Address,
        Return => DataType::NoType,
        _ => return Err(malformed(insn)),
    };
    let children = if data_type == DataType::NoType {
        vec![]
    } else {
        vec![gen.pop()?]
    };

    // Parent the value before the rest of the stack lets go of it
    let ret = gen.create(ILOpCode::Return(data_type), &children);
    gen.stack.discard_entire_stack(&mut gen.il.nodes);
    gen.append(ret);

    let end = gen.il.cfg.end();
    gen.il.cfg.add_edge(gen.current_block, end);
    Ok(Flow::End)
}
