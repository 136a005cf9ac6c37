//! Builder for emitting bytecode during compilation.
//!
//! `CodeBuilder` encodes opcodes and operands into raw bytes, hands out
//! [`JumpLabel`]s for forward jumps that get patched once their target is
//! known, and tracks a line table. Unlike the classic `.expect()`-panics
//! approach, argument and jump-target overflow are reported as
//! `CompileError`s so a pathologically large function fails compilation
//! instead of aborting the process.

use crate::bytecode::code::{Code, CodeFlags, ConstValue, LineEntry, Pool};
use crate::bytecode::op::{ArgWidth, Opcode};
use crate::diagnostics::{CodeRange, CompileError};
use crate::intern::StringId;

/// A forward-jump placeholder. Call [`CodeBuilder::patch_jump`] once the
/// jump target is known.
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel(usize);

#[derive(Debug, Default)]
pub struct CodeBuilder {
    bytecode: Vec<u8>,
    constants: Pool<ConstValue>,
    names: Pool<StringId>,
    line_table: Vec<LineEntry>,
    current_line: u32,
    first_line: u32,
    current_position: Option<CodeRange>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the source position of the next instruction; only a change
    /// in line number produces a new [`LineEntry`], per the monotonic
    /// line-table invariant.
    pub fn set_position(&mut self, range: CodeRange) {
        self.current_position = Some(range);
        let line = range.start.line;
        if self.line_table.is_empty() {
            self.first_line = line;
        }
        if self.line_table.last().is_none_or(|e| e.line != line) {
            self.line_table.push(LineEntry {
                offset: u32::try_from(self.bytecode.len()).expect("bytecode length exceeds u32"),
                line,
            });
        }
        self.current_line = line;
    }

    #[must_use]
    pub fn current_position(&self) -> Option<CodeRange> {
        self.current_position
    }

    /// Emits an argument-less instruction.
    pub fn emit(&mut self, op: Opcode) {
        debug_assert_eq!(op.arg_width(), ArgWidth::None, "{op:?} requires an argument");
        self.bytecode.push(op as u8);
    }

    /// Emits an instruction with a 16-bit argument.
    pub fn emit_arg(&mut self, op: Opcode, arg: u32, position: CodeRange) -> Result<(), CompileError> {
        debug_assert_eq!(op.arg_width(), ArgWidth::Narrow, "{op:?} does not take a narrow argument");
        let arg16 = u16::try_from(arg).map_err(|_| CompileError::argument_out_of_range(position))?;
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&arg16.to_le_bytes());
        Ok(())
    }

    /// Emits a forward jump with a placeholder argument, returning a label
    /// to patch once the target offset is known.
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        debug_assert_eq!(op.arg_width(), ArgWidth::Narrow);
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&0u16.to_le_bytes());
        label
    }

    /// Patches a forward jump to target the current bytecode offset.
    pub fn patch_jump(&mut self, label: JumpLabel, position: CodeRange) -> Result<(), CompileError> {
        self.patch_jump_to(label, self.bytecode.len(), position)
    }

    /// Patches a forward jump to target an explicit offset (used when the
    /// target is a label materialized earlier in the same pass, e.g. a
    /// `for`/`while` loop's test).
    pub fn patch_jump_to(&mut self, label: JumpLabel, target: usize, position: CodeRange) -> Result<(), CompileError> {
        let target16 = u16::try_from(target).map_err(|_| CompileError::jump_out_of_range(position))?;
        let bytes = target16.to_le_bytes();
        self.bytecode[label.0 + 1] = bytes[0];
        self.bytecode[label.0 + 2] = bytes[1];
        Ok(())
    }

    /// Emits a jump straight to a known (already-emitted) target, used for
    /// loop-back edges where the target precedes the jump.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize, position: CodeRange) -> Result<(), CompileError> {
        let target16 = u16::try_from(target).map_err(|_| CompileError::jump_out_of_range(position))?;
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&target16.to_le_bytes());
        Ok(())
    }

    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    /// Interns a constant, returning its pool index as a raw `LOAD_CONST`
    /// argument.
    pub fn add_const(&mut self, value: ConstValue, position: CodeRange) -> Result<u32, CompileError> {
        let idx = self.constants.intern(value);
        if idx > u32::from(u16::MAX) {
            return Err(CompileError::argument_out_of_range(position));
        }
        Ok(idx)
    }

    /// Interns a name (attribute, global, import target), returning its
    /// pool index as a `LOAD_GLOBAL`/`LOAD_ATTR`/... argument.
    pub fn add_name(&mut self, name: StringId, position: CodeRange) -> Result<u32, CompileError> {
        let idx = self.names.intern(name);
        if idx > u32::from(u16::MAX) {
            return Err(CompileError::argument_out_of_range(position));
        }
        Ok(idx)
    }

    /// Finalizes the builder into a [`Code`] object. `var_names`,
    /// `free_vars`, and `cell_vars` are supplied by the symbol table rather
    /// than built incrementally here, since their order is fixed by slot
    /// assignment, not emission order.
    #[must_use]
    pub fn build(
        self,
        var_names: Vec<StringId>,
        free_vars: Vec<StringId>,
        cell_vars: Vec<StringId>,
        arg_count: u32,
        kw_only_arg_count: u32,
        flags: CodeFlags,
        name: StringId,
        filename: StringId,
    ) -> Code {
        let stack_size = compute_stack_size(&self.bytecode);
        Code {
            code: self.bytecode,
            constants: self.constants.into_vec(),
            names: self.names.into_vec(),
            var_names,
            free_vars,
            cell_vars,
            arg_count,
            kw_only_arg_count,
            flags,
            stack_size,
            first_line: self.first_line,
            line_table: self.line_table,
            name,
            filename,
        }
    }
}

/// Decodes one instruction at `pc`, returning `(opcode, arg, instruction_len)`.
#[must_use]
pub fn decode_at(bytecode: &[u8], pc: usize) -> (Opcode, u32, usize) {
    let opcode = Opcode::try_from(bytecode[pc]).expect("invalid opcode byte");
    match opcode.arg_width() {
        ArgWidth::None => (opcode, 0, 1),
        ArgWidth::Narrow => {
            let arg = u16::from_le_bytes([bytecode[pc + 1], bytecode[pc + 2]]);
            (opcode, u32::from(arg), 3)
        }
        ArgWidth::Wide32 => {
            let arg = u32::from_le_bytes([bytecode[pc + 1], bytecode[pc + 2], bytecode[pc + 3], bytecode[pc + 4]]);
            (opcode, arg, 5)
        }
    }
}

/// A conservative upper bound on the maximum stack depth: a single linear
/// scan summing each instruction's declared stack effect, tracking the
/// running high-water mark. Does not attempt to model unreachable code or
/// control-flow-dependent depths precisely; it only needs to never
/// under-count.
#[must_use]
pub fn compute_stack_size(bytecode: &[u8]) -> u32 {
    let mut depth: i64 = 0;
    let mut max_depth: i64 = 0;
    let mut pc = 0;
    while pc < bytecode.len() {
        let (opcode, arg, len) = decode_at(bytecode, pc);
        depth += i64::from(opcode.stack_effect(arg));
        max_depth = max_depth.max(depth);
        pc += len;
    }
    u32::try_from(max_depth.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    fn pos() -> CodeRange {
        let interner = Interner::new();
        CodeRange::synthetic(interner.intern("t.py"))
    }

    #[test]
    fn emit_and_patch_forward_jump() {
        let mut b = CodeBuilder::new();
        let label = b.emit_jump(Opcode::Jump);
        b.emit(Opcode::LoadNone);
        b.patch_jump(label, pos()).unwrap();
        let (op, arg, len) = decode_at(&b.bytecode, 0);
        assert_eq!(op, Opcode::Jump);
        assert_eq!(len, 3);
        assert_eq!(arg as usize, b.bytecode.len() - 1);
    }

    #[test]
    fn const_pool_dedupes() {
        let mut b = CodeBuilder::new();
        let p = pos();
        let a = b.add_const(ConstValue::Int(5.into()), p).unwrap();
        let c = b.add_const(ConstValue::Int(5.into()), p).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn stack_size_tracks_high_water_mark() {
        let mut b = CodeBuilder::new();
        let p = pos();
        b.emit(Opcode::LoadNone);
        b.emit(Opcode::LoadNone);
        b.emit(Opcode::Pop);
        let _ = b.add_name(Interner::new().intern("x"), p);
        let code = b.build(vec![], vec![], vec![], 0, 0, CodeFlags::empty(), Interner::new().intern("f"), Interner::new().intern("t.py"));
        assert_eq!(code.stack_size, 2);
    }
}
