//! Bytecode peephole optimization (§4.10b): a fixed-point sweep of local
//! rewrite rules over an already-emitted instruction stream, plus jump
//! threading.
//!
//! Every pass works over [`Inst`], a decoded view that remembers each
//! logical instruction's *original* byte offset(s). A jump's argument is
//! always either an original absolute offset (emitted by the builder) or,
//! after threading, some OTHER original offset that was itself a valid
//! jump target — it's never a "new" position invented mid-pass. Only the
//! final [`reencode`] step maps every surviving original offset to its
//! post-rewrite position and rewrites jump arguments (and the line table)
//! through that map in one place.

use std::collections::HashMap;
use std::collections::HashSet;

use num_traits::ToPrimitive;
use smallvec::SmallVec;

use crate::bytecode::builder::{compute_stack_size, decode_at};
use crate::bytecode::{Code, ConstValue, LineEntry, Opcode};
use crate::intern::{Interner, StringId};

#[derive(Clone, Debug)]
struct Inst {
    orig_starts: SmallVec<[usize; 2]>,
    opcode: Opcode,
    arg: u32,
}

impl Inst {
    fn start(&self) -> usize {
        self.orig_starts[0]
    }

    fn single(offset: usize, opcode: Opcode, arg: u32) -> Self {
        let mut orig_starts = SmallVec::new();
        orig_starts.push(offset);
        Self { orig_starts, opcode, arg }
    }

    fn merged(parts: &[&Inst], opcode: Opcode, arg: u32) -> Self {
        let mut orig_starts = SmallVec::new();
        for part in parts {
            orig_starts.extend(part.orig_starts.iter().copied());
        }
        Self { orig_starts, opcode, arg }
    }
}

/// Entry point called from [`crate::compiler::Compiler::finish`] once a
/// code object's bytecode and provisional `stack_size` are in hand.
#[must_use]
pub fn optimize_code(mut code: Code) -> Code {
    let mut insts = decode_all(&code.code);
    if insts.is_empty() {
        return code;
    }
    let live = collect_jump_targets(&insts);

    loop {
        let mut changed = false;

        let (next, c) = pass1_redundant_load_pop(&insts, &live);
        insts = next;
        changed |= c;
        let (next, c) = pass2_dup_pop(&insts, &live);
        insts = next;
        changed |= c;
        let (next, c) = pass3_jump_folding(&insts, &live, &code.constants);
        insts = next;
        changed |= c;
        changed |= pass4_specialize_fast_slots(&mut insts);
        changed |= pass5_specialize_const(&mut insts, &code.constants);
        let (next, c) = pass6_inc_dec(&insts, &live, &code.constants);
        insts = next;
        changed |= c;
        let (next, c) = pass7_negate(&insts, &live);
        insts = next;
        changed |= c;
        let (next, c) = pass8_add_const(&insts, &live, &code.constants);
        insts = next;
        changed |= c;
        let (next, c) = pass9_super_fusion(&insts, &live, &code.constants);
        insts = next;
        changed |= c;
        changed |= pass10_empty_collections(&mut insts);
        let (next, c) = pass11_compare_jump_fusion(&insts, &live);
        insts = next;
        changed |= c;
        let (next, c) = pass12_compare_local_jump(&insts, &live);
        insts = next;
        changed |= c;
        let (next, c) = pass13_store_load_elim(&insts, &live);
        insts = next;
        changed |= c;
        changed |= pass14_thread_jumps(&mut insts);
        let (next, c) = pass15_inline_len(&insts, &live, &code.names);
        insts = next;
        changed |= c;
        changed |= pass16_binop_specialize(&mut insts, &code.constants);

        if !changed {
            break;
        }
    }

    let (bytecode, offset_map) = reencode(&insts);
    code.stack_size = compute_stack_size(&bytecode);
    code.line_table = remap_line_table(&code.line_table, &offset_map);
    code.code = bytecode;
    code
}

fn decode_all(bytecode: &[u8]) -> Vec<Inst> {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < bytecode.len() {
        let (opcode, arg, len) = decode_at(bytecode, pc);
        out.push(Inst::single(pc, opcode, arg));
        pc += len;
    }
    out
}

// ---------------------------------------------------------------------
// Jump-target bookkeeping.
// ---------------------------------------------------------------------

fn is_jump_opcode(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Jump
            | Opcode::PopJumpIfTrue
            | Opcode::PopJumpIfFalse
            | Opcode::JumpIfTrueOrPop
            | Opcode::JumpIfFalseOrPop
            | Opcode::ForIter
            | Opcode::SetupExcept
            | Opcode::SetupFinally
            | Opcode::SetupWith
            | Opcode::SetupExceptStar
            | Opcode::ContinueLoop
            | Opcode::CompareLtJump
            | Opcode::CompareLeJump
            | Opcode::CompareEqJump
            | Opcode::CompareNeJump
            | Opcode::CompareGtJump
            | Opcode::CompareGeJump
    )
}

fn jump_target(op: Opcode, arg: u32) -> Option<usize> {
    if is_jump_opcode(op) {
        Some(arg as usize)
    } else if op == Opcode::CompareLtLocalJump {
        Some((arg >> 16) as usize)
    } else {
        None
    }
}

fn collect_jump_targets(insts: &[Inst]) -> HashSet<usize> {
    insts.iter().filter_map(|i| jump_target(i.opcode, i.arg)).collect()
}

fn is_live(inst: &Inst, live: &HashSet<usize>) -> bool {
    live.contains(&inst.start())
}

// ---------------------------------------------------------------------
// Constant-pool helpers.
// ---------------------------------------------------------------------

fn const_as_int(consts: &[ConstValue], idx: u32) -> Option<i64> {
    match consts.get(idx as usize)? {
        ConstValue::Int(i) => i.to_i64(),
        _ => None,
    }
}

fn const_as_bool(consts: &[ConstValue], idx: u32) -> Option<bool> {
    match consts.get(idx as usize)? {
        ConstValue::Bool(b) => Some(*b),
        _ => None,
    }
}

// ---------------------------------------------------------------------
// Fast-slot helpers, used to make passes 6/7/8/13 indifferent to whether
// pass 4 has already specialized their `LOAD_FAST`/`STORE_FAST` operands.
// ---------------------------------------------------------------------

fn as_load_fast(op: Opcode, arg: u32) -> Option<u32> {
    match op {
        Opcode::LoadFast => Some(arg),
        Opcode::LoadFast0 => Some(0),
        Opcode::LoadFast1 => Some(1),
        Opcode::LoadFast2 => Some(2),
        Opcode::LoadFast3 => Some(3),
        _ => None,
    }
}

fn as_store_fast_target(op: Opcode, arg: u32) -> Option<u32> {
    match op {
        Opcode::StoreFast => Some(arg),
        Opcode::StoreFast0 => Some(0),
        Opcode::StoreFast1 => Some(1),
        Opcode::StoreFast2 => Some(2),
        Opcode::StoreFast3 => Some(3),
        _ => None,
    }
}

// ---------------------------------------------------------------------
// Pass 1: redundant `LOAD_*; POP`.
// ---------------------------------------------------------------------

fn is_elidable_load(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::LoadConst
            | Opcode::LoadNone
            | Opcode::LoadTrue
            | Opcode::LoadFalse
            | Opcode::LoadZero
            | Opcode::LoadOne
            | Opcode::LoadEmptyList
            | Opcode::LoadEmptyTuple
            | Opcode::LoadEmptyDict
            | Opcode::LoadFast
            | Opcode::LoadFast0
            | Opcode::LoadFast1
            | Opcode::LoadFast2
            | Opcode::LoadFast3
            | Opcode::LoadDeref
    )
}

fn pass1_redundant_load_pop(insts: &[Inst], live: &HashSet<usize>) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 1 < insts.len()
            && is_elidable_load(insts[i].opcode)
            && insts[i + 1].opcode == Opcode::Pop
            && !is_live(&insts[i], live)
            && !is_live(&insts[i + 1], live)
        {
            i += 2;
            changed = true;
            continue;
        }
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 2: `DUP ; POP`.
// ---------------------------------------------------------------------

fn pass2_dup_pop(insts: &[Inst], live: &HashSet<usize>) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 1 < insts.len()
            && insts[i].opcode == Opcode::Dup
            && insts[i + 1].opcode == Opcode::Pop
            && !is_live(&insts[i], live)
            && !is_live(&insts[i + 1], live)
        {
            i += 2;
            changed = true;
            continue;
        }
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 3: jump folding over a statically known boolean.
// ---------------------------------------------------------------------

fn as_known_bool(op: Opcode, arg: u32, consts: &[ConstValue]) -> Option<bool> {
    match op {
        Opcode::LoadTrue => Some(true),
        Opcode::LoadFalse => Some(false),
        Opcode::LoadConst => const_as_bool(consts, arg),
        _ => None,
    }
}

fn pass3_jump_folding(insts: &[Inst], live: &HashSet<usize>, consts: &[ConstValue]) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 1 < insts.len() && !is_live(&insts[i], live) && insts[i + 1].opcode == Opcode::PopJumpIfFalse {
            if let Some(value) = as_known_bool(insts[i].opcode, insts[i].arg, consts) {
                if value {
                    if !is_live(&insts[i + 1], live) {
                        i += 2;
                        changed = true;
                        continue;
                    }
                } else {
                    out.push(Inst::single(insts[i + 1].start(), Opcode::Jump, insts[i + 1].arg));
                    i += 2;
                    changed = true;
                    continue;
                }
            }
        }
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 4/5: same-width specialization, done in place.
// ---------------------------------------------------------------------

fn pass4_specialize_fast_slots(insts: &mut [Inst]) -> bool {
    let mut changed = false;
    for inst in insts.iter_mut() {
        let replacement = match (inst.opcode, inst.arg) {
            (Opcode::LoadFast, 0) => Some((Opcode::LoadFast0, 0)),
            (Opcode::LoadFast, 1) => Some((Opcode::LoadFast1, 0)),
            (Opcode::LoadFast, 2) => Some((Opcode::LoadFast2, 0)),
            (Opcode::LoadFast, 3) => Some((Opcode::LoadFast3, 0)),
            (Opcode::StoreFast, 0) => Some((Opcode::StoreFast0, 0)),
            (Opcode::StoreFast, 1) => Some((Opcode::StoreFast1, 0)),
            (Opcode::StoreFast, 2) => Some((Opcode::StoreFast2, 0)),
            (Opcode::StoreFast, 3) => Some((Opcode::StoreFast3, 0)),
            _ => None,
        };
        if let Some((op, arg)) = replacement {
            inst.opcode = op;
            inst.arg = arg;
            changed = true;
        }
    }
    changed
}

fn pass5_specialize_const(insts: &mut [Inst], consts: &[ConstValue]) -> bool {
    let mut changed = false;
    for inst in insts.iter_mut() {
        if inst.opcode != Opcode::LoadConst {
            continue;
        }
        let Some(value) = consts.get(inst.arg as usize) else { continue };
        let replacement = match value {
            ConstValue::None => Some(Opcode::LoadNone),
            ConstValue::Bool(true) => Some(Opcode::LoadTrue),
            ConstValue::Bool(false) => Some(Opcode::LoadFalse),
            ConstValue::Int(i) if i.to_i64() == Some(0) => Some(Opcode::LoadZero),
            ConstValue::Int(i) if i.to_i64() == Some(1) => Some(Opcode::LoadOne),
            _ => None,
        };
        if let Some(op) = replacement {
            inst.opcode = op;
            inst.arg = 0;
            changed = true;
        }
    }
    changed
}

// ---------------------------------------------------------------------
// Pass 6: increment/decrement detection.
// ---------------------------------------------------------------------

fn pass6_inc_dec(insts: &[Inst], live: &HashSet<usize>, consts: &[ConstValue]) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 3 < insts.len() {
            if let Some(x) = as_load_fast(insts[i].opcode, insts[i].arg) {
                let one = insts[i + 1].opcode == Opcode::LoadOne || (insts[i + 1].opcode == Opcode::LoadConst && const_as_int(consts, insts[i + 1].arg) == Some(1));
                let binop = match insts[i + 2].opcode {
                    Opcode::BinaryAdd => Some(Opcode::IncrementFast),
                    Opcode::BinarySub => Some(Opcode::DecrementFast),
                    _ => None,
                };
                if one {
                    if let Some(result_op) = binop {
                        if as_store_fast_target(insts[i + 3].opcode, insts[i + 3].arg) == Some(x)
                            && !is_live(&insts[i + 1], live)
                            && !is_live(&insts[i + 2], live)
                            && !is_live(&insts[i + 3], live)
                        {
                            out.push(Inst::merged(&[&insts[i], &insts[i + 1], &insts[i + 2], &insts[i + 3]], result_op, x));
                            i += 4;
                            changed = true;
                            continue;
                        }
                    }
                }
            }
        }
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 7: negate-in-place.
// ---------------------------------------------------------------------

fn pass7_negate(insts: &[Inst], live: &HashSet<usize>) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 2 < insts.len() {
            if let Some(x) = as_load_fast(insts[i].opcode, insts[i].arg) {
                if insts[i + 1].opcode == Opcode::UnaryNeg
                    && as_store_fast_target(insts[i + 2].opcode, insts[i + 2].arg) == Some(x)
                    && !is_live(&insts[i + 1], live)
                    && !is_live(&insts[i + 2], live)
                {
                    out.push(Inst::merged(&[&insts[i], &insts[i + 1], &insts[i + 2]], Opcode::NegateFast, x));
                    i += 3;
                    changed = true;
                    continue;
                }
            }
        }
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 8: add-const fusion (augmented assignment `x = x + c`, `c != 1`).
// ---------------------------------------------------------------------

fn pass8_add_const(insts: &[Inst], live: &HashSet<usize>, consts: &[ConstValue]) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 3 < insts.len() {
            if let Some(x) = as_load_fast(insts[i].opcode, insts[i].arg) {
                let const_val = match insts[i + 1].opcode {
                    Opcode::LoadConst => const_as_int(consts, insts[i + 1].arg),
                    Opcode::LoadZero => Some(0),
                    _ => None,
                };
                if let Some(c) = const_val {
                    if c != 1
                        && insts[i + 2].opcode == Opcode::BinaryAdd
                        && as_store_fast_target(insts[i + 3].opcode, insts[i + 3].arg) == Some(x)
                        && x <= u32::from(u8::MAX)
                        && (0..=i64::from(u8::MAX)).contains(&c)
                        && !is_live(&insts[i + 1], live)
                        && !is_live(&insts[i + 2], live)
                        && !is_live(&insts[i + 3], live)
                    {
                        let packed = x | ((c as u32) << 8);
                        out.push(Inst::merged(&[&insts[i], &insts[i + 1], &insts[i + 2], &insts[i + 3]], Opcode::AddConstFast, packed));
                        i += 4;
                        changed = true;
                        continue;
                    }
                }
            }
        }
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 9: super-instruction fusion.
// ---------------------------------------------------------------------

fn fits_u8(v: u32) -> bool {
    v <= u32::from(u8::MAX)
}

fn pass9_super_fusion(insts: &[Inst], live: &HashSet<usize>, consts: &[ConstValue]) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 1 < insts.len() && !is_live(&insts[i + 1], live) {
            let a = &insts[i];
            let b = &insts[i + 1];

            if let (Some(x), Some(y)) = (as_load_fast(a.opcode, a.arg), as_load_fast(b.opcode, b.arg)) {
                if fits_u8(x) && fits_u8(y) {
                    out.push(Inst::merged(&[a, b], Opcode::LoadFastLoadFast, x | (y << 8)));
                    i += 2;
                    changed = true;
                    continue;
                }
            }
            if let Some(x) = as_load_fast(a.opcode, a.arg) {
                if b.opcode == Opcode::LoadConst && fits_u8(x) && fits_u8(b.arg) {
                    out.push(Inst::merged(&[a, b], Opcode::LoadFastLoadConst, x | (b.arg << 8)));
                    i += 2;
                    changed = true;
                    continue;
                }
            }
            if a.opcode == Opcode::LoadConst {
                if let Some(x) = as_load_fast(b.opcode, b.arg) {
                    if fits_u8(a.arg) && fits_u8(x) {
                        out.push(Inst::merged(&[a, b], Opcode::LoadConstLoadFast, a.arg | (x << 8)));
                        i += 2;
                        changed = true;
                        continue;
                    }
                }
            }
            if let Some(x) = as_store_fast_target(a.opcode, a.arg) {
                if let Some(y) = as_load_fast(b.opcode, b.arg) {
                    if fits_u8(x) && fits_u8(y) {
                        out.push(Inst::merged(&[a, b], Opcode::StoreFastLoadFast, x | (y << 8)));
                        i += 2;
                        changed = true;
                        continue;
                    }
                }
            }
        }
        let _ = consts; // reserved for future const-kind checks in this pass
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 10: empty-collection specialization.
// ---------------------------------------------------------------------

fn pass10_empty_collections(insts: &mut [Inst]) -> bool {
    let mut changed = false;
    for inst in insts.iter_mut() {
        let replacement = match (inst.opcode, inst.arg) {
            (Opcode::BuildList, 0) => Some(Opcode::LoadEmptyList),
            (Opcode::BuildTuple, 0) => Some(Opcode::LoadEmptyTuple),
            (Opcode::BuildMap, 0) => Some(Opcode::LoadEmptyDict),
            _ => None,
        };
        if let Some(op) = replacement {
            inst.opcode = op;
            inst.arg = 0;
            changed = true;
        }
    }
    changed
}

// ---------------------------------------------------------------------
// Pass 11: compare+jump fusion.
// ---------------------------------------------------------------------

fn compare_jump_opcode(op: Opcode) -> Option<Opcode> {
    match op {
        Opcode::CompareLt => Some(Opcode::CompareLtJump),
        Opcode::CompareLe => Some(Opcode::CompareLeJump),
        Opcode::CompareEq => Some(Opcode::CompareEqJump),
        Opcode::CompareNe => Some(Opcode::CompareNeJump),
        Opcode::CompareGt => Some(Opcode::CompareGtJump),
        Opcode::CompareGe => Some(Opcode::CompareGeJump),
        _ => None,
    }
}

fn pass11_compare_jump_fusion(insts: &[Inst], live: &HashSet<usize>) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 1 < insts.len() && insts[i + 1].opcode == Opcode::PopJumpIfFalse && !is_live(&insts[i + 1], live) {
            if let Some(fused) = compare_jump_opcode(insts[i].opcode) {
                out.push(Inst::merged(&[&insts[i], &insts[i + 1]], fused, insts[i + 1].arg));
                i += 2;
                changed = true;
                continue;
            }
        }
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 12: compare-local-jump fusion.
// ---------------------------------------------------------------------

fn pass12_compare_local_jump(insts: &[Inst], live: &HashSet<usize>) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 3 < insts.len() {
            if let (Some(x), Some(y)) = (as_load_fast(insts[i].opcode, insts[i].arg), as_load_fast(insts[i + 1].opcode, insts[i + 1].arg)) {
                if insts[i + 2].opcode == Opcode::CompareLt
                    && insts[i + 3].opcode == Opcode::PopJumpIfFalse
                    && fits_u8(x)
                    && fits_u8(y)
                    && insts[i + 3].arg <= u32::from(u16::MAX)
                    && !is_live(&insts[i + 1], live)
                    && !is_live(&insts[i + 2], live)
                    && !is_live(&insts[i + 3], live)
                {
                    let packed = x | (y << 8) | (insts[i + 3].arg << 16);
                    out.push(Inst::merged(&[&insts[i], &insts[i + 1], &insts[i + 2], &insts[i + 3]], Opcode::CompareLtLocalJump, packed));
                    i += 4;
                    changed = true;
                    continue;
                }
            }
        }
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 13: store-load elimination.
// ---------------------------------------------------------------------

fn pass13_store_load_elim(insts: &[Inst], live: &HashSet<usize>) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 1 < insts.len() && !is_live(&insts[i], live) && !is_live(&insts[i + 1], live) {
            if let Some(x) = as_store_fast_target(insts[i].opcode, insts[i].arg) {
                if as_load_fast(insts[i + 1].opcode, insts[i + 1].arg) == Some(x) {
                    out.push(Inst::single(insts[i].start(), Opcode::Dup, 0));
                    out.push(Inst::single(insts[i + 1].start(), insts[i].opcode, insts[i].arg));
                    i += 2;
                    changed = true;
                    continue;
                }
            }
        }
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 14: jump threading.
// ---------------------------------------------------------------------

fn pass14_thread_jumps(insts: &mut [Inst]) -> bool {
    let index: HashMap<usize, usize> = insts.iter().enumerate().map(|(idx, inst)| (inst.start(), idx)).collect();
    let mut changed = false;
    for i in 0..insts.len() {
        let Some(old_target) = jump_target(insts[i].opcode, insts[i].arg) else { continue };
        let Some(&target_idx) = index.get(&old_target) else { continue };
        if target_idx == i || insts[target_idx].opcode != Opcode::Jump {
            continue;
        }
        let next = insts[target_idx].arg as usize;
        if next == old_target {
            continue;
        }
        set_jump_target(&mut insts[i], next);
        changed = true;
    }
    changed
}

fn set_jump_target(inst: &mut Inst, target: usize) {
    if inst.opcode == Opcode::CompareLtLocalJump {
        let low = inst.arg & 0xFFFF;
        inst.arg = low | ((target as u32) << 16);
    } else {
        inst.arg = target as u32;
    }
}

// ---------------------------------------------------------------------
// Pass 15: inline `len`.
// ---------------------------------------------------------------------

fn is_safe_single_value_load(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::LoadFast
            | Opcode::LoadFast0
            | Opcode::LoadFast1
            | Opcode::LoadFast2
            | Opcode::LoadFast3
            | Opcode::LoadConst
            | Opcode::LoadDeref
            | Opcode::LoadGlobal
            | Opcode::LoadName
            | Opcode::LoadNone
            | Opcode::LoadTrue
            | Opcode::LoadFalse
            | Opcode::LoadZero
            | Opcode::LoadOne
            | Opcode::LoadEmptyList
            | Opcode::LoadEmptyTuple
            | Opcode::LoadEmptyDict
    )
}

fn is_global_named_len(idx: u32, names: &[StringId]) -> bool {
    names.get(idx as usize).is_some_and(|id| Interner::new().resolve(*id) == "len")
}

fn pass15_inline_len(insts: &[Inst], live: &HashSet<usize>, names: &[StringId]) -> (Vec<Inst>, bool) {
    let mut out = Vec::with_capacity(insts.len());
    let mut i = 0;
    let mut changed = false;
    while i < insts.len() {
        if i + 2 < insts.len()
            && insts[i].opcode == Opcode::LoadGlobal
            && is_global_named_len(insts[i].arg, names)
            && is_safe_single_value_load(insts[i + 1].opcode)
            && insts[i + 2].opcode == Opcode::Call
            && insts[i + 2].arg == 1
            && !is_live(&insts[i + 1], live)
            && !is_live(&insts[i + 2], live)
        {
            out.push(insts[i + 1].clone());
            out.push(Inst::merged(&[&insts[i], &insts[i + 2]], Opcode::LenGeneric, 0));
            i += 3;
            changed = true;
            continue;
        }
        out.push(insts[i].clone());
        i += 1;
    }
    (out, changed)
}

// ---------------------------------------------------------------------
// Pass 16: binary-op type specialization (local lookback heuristic — this
// repo does no static type inference, per its explicit non-goal, so this
// only ever looks at the one or two instructions immediately before a
// binary/compare op).
// ---------------------------------------------------------------------

fn is_local_fast(insts: &[Inst], idx: usize) -> bool {
    matches!(insts[idx].opcode, Opcode::LoadFast | Opcode::LoadFast0 | Opcode::LoadFast1 | Opcode::LoadFast2 | Opcode::LoadFast3)
}

fn is_known_int(insts: &[Inst], idx: usize, consts: &[ConstValue]) -> bool {
    match insts[idx].opcode {
        Opcode::LoadZero
        | Opcode::LoadOne
        | Opcode::IncrementFast
        | Opcode::DecrementFast
        | Opcode::NegateFast
        | Opcode::AddConstFast
        | Opcode::BinaryAddInt
        | Opcode::BinarySubInt
        | Opcode::BinaryMulInt => true,
        Opcode::LoadConst => const_as_int(consts, insts[idx].arg).is_some(),
        _ => false,
    }
}

fn produces_float(insts: &[Inst], idx: usize, consts: &[ConstValue]) -> bool {
    match insts[idx].opcode {
        Opcode::LoadConst => matches!(consts.get(insts[idx].arg as usize), Some(ConstValue::Float(_))),
        Opcode::BinaryAddFloat | Opcode::BinaryDivideFloat => true,
        _ => false,
    }
}

fn both_operands_int(insts: &[Inst], op_idx: usize, consts: &[ConstValue]) -> bool {
    let a = op_idx - 2;
    let b = op_idx - 1;
    (is_known_int(insts, a, consts) && is_known_int(insts, b, consts))
        || (is_local_fast(insts, a) && is_known_int(insts, b, consts))
        || (is_known_int(insts, a, consts) && is_local_fast(insts, b))
}

fn pass16_binop_specialize(insts: &mut [Inst], consts: &[ConstValue]) -> bool {
    let mut changed = false;
    for i in 0..insts.len() {
        let new_op = match insts[i].opcode {
            Opcode::BinaryDivide => Some(Opcode::BinaryDivideFloat),
            Opcode::BinaryAdd if i >= 1 && produces_float(insts, i - 1, consts) => Some(Opcode::BinaryAddFloat),
            Opcode::BinaryAdd if i >= 2 && both_operands_int(insts, i, consts) => Some(Opcode::BinaryAddInt),
            Opcode::BinarySub if i >= 2 && both_operands_int(insts, i, consts) => Some(Opcode::BinarySubInt),
            Opcode::BinaryMul if i >= 2 && both_operands_int(insts, i, consts) => Some(Opcode::BinaryMulInt),
            Opcode::CompareLt if i >= 2 && both_operands_int(insts, i, consts) => Some(Opcode::CompareLtInt),
            Opcode::CompareLe if i >= 2 && both_operands_int(insts, i, consts) => Some(Opcode::CompareLeInt),
            Opcode::CompareEq if i >= 2 && both_operands_int(insts, i, consts) => Some(Opcode::CompareEqInt),
            Opcode::CompareNe if i >= 2 && both_operands_int(insts, i, consts) => Some(Opcode::CompareNeInt),
            Opcode::CompareGt if i >= 2 && both_operands_int(insts, i, consts) => Some(Opcode::CompareGtInt),
            Opcode::CompareGe if i >= 2 && both_operands_int(insts, i, consts) => Some(Opcode::CompareGeInt),
            _ => None,
        };
        if let Some(op) = new_op {
            insts[i].opcode = op;
            insts[i].arg = 0;
            changed = true;
        }
    }
    changed
}

// ---------------------------------------------------------------------
// Final re-encoding: byte layout, jump-target remap, line-table remap.
// ---------------------------------------------------------------------

fn inst_len(op: Opcode) -> usize {
    match op.arg_width() {
        crate::bytecode::ArgWidth::None => 1,
        crate::bytecode::ArgWidth::Narrow => 3,
        crate::bytecode::ArgWidth::Wide32 => 5,
    }
}

fn reencode(insts: &[Inst]) -> (Vec<u8>, HashMap<usize, usize>) {
    let mut positions = Vec::with_capacity(insts.len());
    let mut pos = 0usize;
    for inst in insts {
        positions.push(pos);
        pos += inst_len(inst.opcode);
    }

    let mut offset_map = HashMap::new();
    for (inst, &final_pos) in insts.iter().zip(&positions) {
        for &orig in &inst.orig_starts {
            offset_map.insert(orig, final_pos);
        }
    }

    let mut bytecode = Vec::with_capacity(pos);
    for inst in insts {
        let arg = remap_arg(inst, &offset_map);
        bytecode.push(inst.opcode as u8);
        match inst.opcode.arg_width() {
            crate::bytecode::ArgWidth::None => {}
            crate::bytecode::ArgWidth::Narrow => {
                let a = u16::try_from(arg).expect("narrow arg fits u16 after re-encoding");
                bytecode.extend_from_slice(&a.to_le_bytes());
            }
            crate::bytecode::ArgWidth::Wide32 => bytecode.extend_from_slice(&arg.to_le_bytes()),
        }
    }
    (bytecode, offset_map)
}

fn remap_arg(inst: &Inst, offset_map: &HashMap<usize, usize>) -> u32 {
    if is_jump_opcode(inst.opcode) {
        let target = offset_map.get(&(inst.arg as usize)).copied().unwrap_or(inst.arg as usize);
        u32::try_from(target).expect("remapped offset fits u32")
    } else if inst.opcode == Opcode::CompareLtLocalJump {
        let low = inst.arg & 0xFFFF;
        let old_target = (inst.arg >> 16) as usize;
        let new_target = offset_map.get(&old_target).copied().unwrap_or(old_target);
        low | ((new_target as u32) << 16)
    } else {
        inst.arg
    }
}

fn remap_line_table(table: &[LineEntry], offset_map: &HashMap<usize, usize>) -> Vec<LineEntry> {
    let mut out: Vec<LineEntry> = table
        .iter()
        .map(|e| LineEntry {
            offset: offset_map.get(&(e.offset as usize)).map_or(e.offset, |&p| p as u32),
            line: e.line,
        })
        .collect();
    out.sort_by_key(|e| e.offset);
    out.dedup_by_key(|e| e.offset);
    out
}
