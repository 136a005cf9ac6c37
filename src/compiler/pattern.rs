//! `match`/`case` emission (§4.8).
//!
//! Every pattern-compiling routine shares one contract: on entry the
//! subject is on top of the stack; on exit the subject is still on top
//! and a matched/not-matched boolean sits above it. Building every pattern
//! kind to this same shape is what lets `compile_match`'s case dispatcher,
//! and patterns that recurse into sub-patterns (`MatchAs`, sequence/mapping/
//! class elements, `MatchOr`), treat a nested pattern as a black box.

use num_bigint::BigInt;
use ruff_python_ast::{self as ast, Pattern};
use ruff_text_size::Ranged;

use crate::bytecode::{ConstValue, Opcode};
use crate::diagnostics::CodeRange;
use crate::symtab::SymbolTableArena;

use super::{Compiler, PendingJump};

impl<'a> Compiler<'a> {
    /// Dispatcher: duplicates the subject before each case, runs the
    /// pattern, branches on its boolean, evaluates the guard, then the
    /// case body, collecting jump sites to a shared epilogue.
    pub(crate) fn compile_match(&mut self, arena: &mut SymbolTableArena, s: &ast::StmtMatch) {
        let pos = self.position(s.range());
        self.compile_expr(arena, &s.subject);

        let mut end_sites: Vec<PendingJump> = Vec::new();
        let last = s.cases.len().saturating_sub(1);
        for (i, case) in s.cases.iter().enumerate() {
            let case_pos = self.line_index.code_range(self.filename, case.range());
            self.builder.emit(Opcode::Dup);
            self.compile_pattern(arena, &case.pattern, case_pos);
            let next_case = self.builder.emit_jump(Opcode::PopJumpIfFalse);
            self.builder.emit(Opcode::Pop);

            if let Some(guard) = &case.guard {
                self.compile_expr(arena, guard);
                let guard_fail = self.builder.emit_jump(Opcode::PopJumpIfFalse);
                for stmt in &case.body {
                    self.compile_stmt(arena, stmt);
                }
                end_sites.push(self.builder.emit_jump(Opcode::Jump));
                self.builder.patch_jump(guard_fail, case_pos).unwrap_or_else(|e| self.error(e));
            } else {
                for stmt in &case.body {
                    self.compile_stmt(arena, stmt);
                }
                end_sites.push(self.builder.emit_jump(Opcode::Jump));
            }

            self.builder.patch_jump(next_case, case_pos).unwrap_or_else(|e| self.error(e));
            if i == last {
                self.builder.emit(Opcode::Pop);
            }
        }
        for site in end_sites {
            self.builder.patch_jump(site, pos).unwrap_or_else(|e| self.error(e));
        }
    }

    pub(crate) fn compile_pattern(&mut self, arena: &mut SymbolTableArena, pattern: &Pattern, pos: CodeRange) {
        match pattern {
            Pattern::MatchValue(p) => self.compile_value_pattern(arena, p, pos),
            Pattern::MatchSingleton(p) => self.compile_singleton_pattern(p, pos),
            Pattern::MatchAs(p) => self.compile_as_pattern(arena, p, pos),
            Pattern::MatchSequence(p) => self.compile_sequence_pattern(arena, p, pos),
            Pattern::MatchMapping(p) => self.compile_mapping_pattern(arena, p, pos),
            Pattern::MatchClass(p) => self.compile_class_pattern(arena, p, pos),
            Pattern::MatchOr(p) => self.compile_or_pattern(arena, p, pos),
            // A bare `*rest` only ever appears as an element of a sequence
            // pattern, handled directly by `compile_sequence_pattern`; one
            // reached through any other path is a parser bug upstream, so
            // this conservatively reports a match rather than panicking.
            Pattern::MatchStar(_) => self.builder.emit(Opcode::LoadTrue),
        }
    }

    fn compile_value_pattern(&mut self, arena: &mut SymbolTableArena, p: &ast::PatternMatchValue, _pos: CodeRange) {
        self.builder.emit(Opcode::Dup);
        self.compile_expr(arena, &p.value);
        self.builder.emit(Opcode::CompareEq);
    }

    fn compile_singleton_pattern(&mut self, p: &ast::PatternMatchSingleton, _pos: CodeRange) {
        self.builder.emit(Opcode::Dup);
        match p.value {
            ast::Singleton::None => self.builder.emit(Opcode::LoadNone),
            ast::Singleton::True => self.builder.emit(Opcode::LoadTrue),
            ast::Singleton::False => self.builder.emit(Opcode::LoadFalse),
        }
        self.builder.emit(Opcode::CompareIs);
    }

    /// Capture / wildcard / as-pattern (§4.8): a bare name (or `_`) always
    /// matches; a sub-pattern is recursed into first and only binds on its
    /// success, with both branches converging on a uniform stack shape.
    fn compile_as_pattern(&mut self, arena: &mut SymbolTableArena, p: &ast::PatternMatchAs, pos: CodeRange) {
        match &p.pattern {
            None => {
                if let Some(name) = &p.name {
                    self.builder.emit(Opcode::Dup);
                    let id = self.interner.intern(name.as_str());
                    self.compile_store_name(arena, id, pos);
                }
                self.builder.emit(Opcode::LoadTrue);
            }
            Some(inner) => {
                self.compile_pattern(arena, inner, pos);
                let fail = self.builder.emit_jump(Opcode::PopJumpIfFalse);
                if let Some(name) = &p.name {
                    self.builder.emit(Opcode::Dup);
                    let id = self.interner.intern(name.as_str());
                    self.compile_store_name(arena, id, pos);
                }
                self.builder.emit(Opcode::LoadTrue);
                let end = self.builder.emit_jump(Opcode::Jump);
                self.builder.patch_jump(fail, pos).unwrap_or_else(|e| self.error(e));
                self.builder.emit(Opcode::LoadFalse);
                self.builder.patch_jump(end, pos).unwrap_or_else(|e| self.error(e));
            }
        }
    }

    /// Emits the common tail shared by sequence/mapping/class patterns:
    /// a `True` success path plus, for every failure site, exactly the
    /// number of leftover probed values that still need popping before the
    /// uniform `subject, False` exit. Each site gets its own small cleanup
    /// stub rather than a literally shared jump target, since sites can
    /// require different pop counts and a shared target would otherwise
    /// have to tolerate more than one incoming stack depth.
    fn emit_pattern_epilogue(&mut self, fail_sites: Vec<(PendingJump, usize)>, pos: CodeRange) {
        self.builder.emit(Opcode::LoadTrue);
        let mut joins = vec![self.builder.emit_jump(Opcode::Jump)];
        for (site, leftover) in fail_sites {
            self.builder.patch_jump(site, pos).unwrap_or_else(|e| self.error(e));
            for _ in 0..leftover {
                self.builder.emit(Opcode::Pop);
            }
            self.builder.emit(Opcode::LoadFalse);
            joins.push(self.builder.emit_jump(Opcode::Jump));
        }
        for j in joins {
            self.builder.patch_jump(j, pos).unwrap_or_else(|e| self.error(e));
        }
    }

    /// Fixed-index and star sequence patterns (§4.8).
    fn compile_sequence_pattern(&mut self, arena: &mut SymbolTableArena, p: &ast::PatternMatchSequence, pos: CodeRange) {
        let star_at = p.patterns.iter().position(|e| matches!(e, Pattern::MatchStar(_)));
        let n = if star_at.is_some() { 65535 } else { u32::try_from(p.patterns.len()).unwrap_or(0) };
        self.emit_arg_or_error(Opcode::MatchSequence, n, pos);
        let mut fail_sites: Vec<(PendingJump, usize)> = vec![(self.builder.emit_jump(Opcode::PopJumpIfFalse), 0)];

        match star_at {
            None => {
                for (i, sub) in p.patterns.iter().enumerate() {
                    self.emit_subscript_probe(arena, i as i64, pos);
                    self.compile_pattern(arena, sub, pos);
                    fail_sites.push((self.builder.emit_jump(Opcode::PopJumpIfFalse), 1));
                    self.builder.emit(Opcode::Pop);
                }
            }
            Some(star_at) => {
                let before = star_at;
                let after = p.patterns.len() - star_at - 1;
                let minlen = u32::try_from(before + after).unwrap_or(0);
                self.emit_arg_or_error(Opcode::MatchStar, minlen, pos);
                fail_sites.push((self.builder.emit_jump(Opcode::PopJumpIfFalse), 0));

                for (i, sub) in p.patterns[..before].iter().enumerate() {
                    self.emit_subscript_probe(arena, i as i64, pos);
                    self.compile_pattern(arena, sub, pos);
                    fail_sites.push((self.builder.emit_jump(Opcode::PopJumpIfFalse), 1));
                    self.builder.emit(Opcode::Pop);
                }
                for (j, sub) in p.patterns[star_at + 1..].iter().enumerate() {
                    let neg = -(i64::try_from(after - j).unwrap_or(0));
                    self.emit_subscript_probe(arena, neg, pos);
                    self.compile_pattern(arena, sub, pos);
                    fail_sites.push((self.builder.emit_jump(Opcode::PopJumpIfFalse), 1));
                    self.builder.emit(Opcode::Pop);
                }

                let packed = (u32::try_from(before).unwrap_or(0) << 8) | u32::try_from(after).unwrap_or(0);
                self.emit_arg_or_error(Opcode::ExtractStar, packed, pos);
                if let Pattern::MatchStar(star) = &p.patterns[star_at] {
                    match &star.name {
                        Some(name) => {
                            let id = self.interner.intern(name.as_str());
                            self.compile_store_name(arena, id, pos);
                        }
                        None => self.builder.emit(Opcode::Pop),
                    }
                }
            }
        }
        self.emit_pattern_epilogue(fail_sites, pos);
    }

    fn emit_subscript_probe(&mut self, arena: &mut SymbolTableArena, index: i64, pos: CodeRange) {
        self.builder.emit(Opcode::Dup);
        let idx = self.const_or_error(ConstValue::Int(BigInt::from(index)), pos);
        self.emit_arg_or_error(Opcode::LoadConst, idx, pos);
        self.builder.emit(Opcode::BinarySubscr);
        let _ = arena;
    }

    /// Mapping pattern (§4.8). `MATCH_KEYS` pushes one value per key on
    /// success (topmost value corresponds to the last key), so sub-patterns
    /// are matched top-down; a failure at the `p`-th site (0-indexed from
    /// the top) still has `n - p` unmatched values under it to discard.
    fn compile_mapping_pattern(&mut self, arena: &mut SymbolTableArena, p: &ast::PatternMatchMapping, pos: CodeRange) {
        let n = p.keys.len();
        self.emit_arg_or_error(Opcode::MatchMapping, u32::try_from(n).unwrap_or(0), pos);
        let mut fail_sites: Vec<(PendingJump, usize)> = vec![(self.builder.emit_jump(Opcode::PopJumpIfFalse), 0)];

        for key in &p.keys {
            self.compile_expr(arena, key);
        }
        let n_idx = self.const_or_error(ConstValue::Int(BigInt::from(n)), pos);
        self.emit_arg_or_error(Opcode::LoadConst, n_idx, pos);
        self.builder.emit(Opcode::MatchKeys);
        fail_sites.push((self.builder.emit_jump(Opcode::PopJumpIfFalse), 0));

        for (processed, sub) in p.patterns.iter().rev().enumerate() {
            self.compile_pattern(arena, sub, pos);
            fail_sites.push((self.builder.emit_jump(Opcode::PopJumpIfFalse), n - processed));
            self.builder.emit(Opcode::Pop);
        }

        if let Some(rest) = &p.rest {
            self.builder.emit(Opcode::Dup);
            for key in &p.keys {
                self.compile_expr(arena, key);
            }
            self.emit_arg_or_error(Opcode::BuildTuple, u32::try_from(n).unwrap_or(0), pos);
            self.builder.emit(Opcode::CopyDict);
            let id = self.interner.intern(rest.as_str());
            self.compile_store_name(arena, id, pos);
        }

        self.emit_pattern_epilogue(fail_sites, pos);
    }

    /// Class pattern (§4.8): `MATCH_CLASS n` resolves `__match_args__` and
    /// extracts the `n` positional sub-values in one step (top-down, same
    /// convention as mapping patterns); keyword patterns are then checked
    /// by name via plain attribute loads.
    fn compile_class_pattern(&mut self, arena: &mut SymbolTableArena, p: &ast::PatternMatchClass, pos: CodeRange) {
        let n_pos = p.arguments.patterns.len();
        self.builder.emit(Opcode::Dup);
        self.compile_expr(arena, &p.cls);
        self.emit_arg_or_error(Opcode::MatchClass, u32::try_from(n_pos).unwrap_or(0), pos);
        let mut fail_sites: Vec<(PendingJump, usize)> = vec![(self.builder.emit_jump(Opcode::PopJumpIfFalse), 0)];

        for (processed, sub) in p.arguments.patterns.iter().rev().enumerate() {
            self.compile_pattern(arena, sub, pos);
            fail_sites.push((self.builder.emit_jump(Opcode::PopJumpIfFalse), n_pos - processed));
            self.builder.emit(Opcode::Pop);
        }

        for kw in &p.arguments.keywords {
            self.builder.emit(Opcode::Dup);
            let attr = self.interner.intern(kw.attr.as_str());
            let idx = self.name_or_error(attr, pos);
            self.emit_arg_or_error(Opcode::LoadAttr, idx, pos);
            self.compile_pattern(arena, &kw.pattern, pos);
            fail_sites.push((self.builder.emit_jump(Opcode::PopJumpIfFalse), 1));
            self.builder.emit(Opcode::Pop);
        }

        self.emit_pattern_epilogue(fail_sites, pos);
    }

    /// Or-pattern (§4.8). Every alternative, including the last, gets its
    /// own subject copy so every arrival path into the join reaches the
    /// same stack shape (`subject, spare-copy, bool`); one `ROT2`/`POP`
    /// after the join collapses that to the uniform `subject, bool` exit.
    fn compile_or_pattern(&mut self, arena: &mut SymbolTableArena, p: &ast::PatternMatchOr, pos: CodeRange) {
        let last = p.patterns.len().saturating_sub(1);
        let mut short_circuits: Vec<PendingJump> = Vec::new();
        for (i, alt) in p.patterns.iter().enumerate() {
            self.builder.emit(Opcode::Dup);
            self.compile_pattern(arena, alt, pos);
            if i != last {
                short_circuits.push(self.builder.emit_jump(Opcode::JumpIfTrueOrPop));
                self.builder.emit(Opcode::Pop);
            }
        }
        for site in short_circuits {
            self.builder.patch_jump(site, pos).unwrap_or_else(|e| self.error(e));
        }
        self.builder.emit(Opcode::Rot2);
        self.builder.emit(Opcode::Pop);
    }
}
