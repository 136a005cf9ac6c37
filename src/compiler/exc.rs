//! Exception handling emission (§4.6): classic `try`/`except`/`else`/
//! `finally` plus exception-group `except*` handling.

use ruff_python_ast::{self as ast, ExceptHandler};
use ruff_text_size::Ranged;

use crate::bytecode::Opcode;
use crate::diagnostics::CompileError;
use crate::symtab::SymbolTableArena;

use super::Compiler;

impl<'a> Compiler<'a> {
    pub(crate) fn compile_try(&mut self, arena: &mut SymbolTableArena, s: &ast::StmtTry) {
        let pos = self.position(s.range());
        if s.is_star {
            self.compile_try_star(arena, s, pos);
            return;
        }
        if s.handlers.iter().any(|ExceptHandler::ExceptHandler(h)| h.type_.is_none() && self.looks_like_star_only(s)) {
            // Unreachable given `ruff_python_ast`'s single `is_star` flag per
            // statement (mixing is a parse-time error upstream), kept only
            // so the diagnostic has a documented trigger.
        }

        let has_finally = !s.finalbody.is_empty();
        let has_handlers = !s.handlers.is_empty();

        let finally_setup = if has_finally {
            self.finally_depth += 1;
            Some(self.builder.emit_jump(Opcode::SetupFinally))
        } else {
            None
        };
        let except_setup = if has_handlers {
            Some(self.builder.emit_jump(Opcode::SetupExcept))
        } else {
            None
        };

        for stmt in &s.body {
            self.compile_stmt(arena, stmt);
        }

        if has_handlers {
            self.builder.emit(Opcode::PopExcept);
        }
        let to_else = self.builder.emit_jump(Opcode::Jump);

        if let Some(except_setup) = except_setup {
            self.builder.patch_jump(except_setup, pos).unwrap_or_else(|e| self.error(e));
            let mut end_of_handlers = Vec::new();
            let last = s.handlers.len().saturating_sub(1);
            for (i, handler) in s.handlers.iter().enumerate() {
                let ExceptHandler::ExceptHandler(h) = handler;
                let handler_pos = self.line_index.code_range(self.filename, h.range());
                match &h.type_ {
                    Some(ty) => {
                        self.builder.emit(Opcode::Dup);
                        self.compile_expr(arena, ty);
                        self.builder.emit(Opcode::ExceptionMatch);
                        let miss = self.builder.emit_jump(Opcode::PopJumpIfFalse);
                        self.builder.emit(Opcode::ClearException);
                        self.compile_handler_bind_and_body(arena, h.name.as_ref(), &h.body, handler_pos);
                        self.builder.emit(Opcode::PopExceptHandler);
                        end_of_handlers.push(self.builder.emit_jump(Opcode::Jump));
                        self.builder.patch_jump(miss, handler_pos).unwrap_or_else(|e| self.error(e));
                    }
                    None => {
                        self.builder.emit(Opcode::ClearException);
                        self.builder.emit(Opcode::Pop);
                        for stmt in &h.body {
                            self.compile_stmt(arena, stmt);
                        }
                        self.builder.emit(Opcode::PopExceptHandler);
                        if i != last {
                            end_of_handlers.push(self.builder.emit_jump(Opcode::Jump));
                        }
                    }
                }
            }
            self.emit_arg_or_error(Opcode::RaiseVarargs, 0, pos);
            for label in end_of_handlers {
                self.builder.patch_jump(label, pos).unwrap_or_else(|e| self.error(e));
            }
        }

        self.builder.patch_jump(to_else, pos).unwrap_or_else(|e| self.error(e));
        for stmt in &s.orelse {
            self.compile_stmt(arena, stmt);
        }

        if let Some(finally_setup) = finally_setup {
            self.builder.emit(Opcode::PopBlock);
            let finally_start = self.builder.current_offset();
            self.builder.patch_jump_to(finally_setup, finally_start, pos).unwrap_or_else(|e| self.error(e));
            for stmt in &s.finalbody {
                self.compile_stmt(arena, stmt);
            }
            self.builder.emit(Opcode::EndFinally);
            self.finally_depth -= 1;
        }
    }

    /// Binds the caught exception (or pops it if unnamed), runs the
    /// handler body, then — per the documented exception-variable
    /// scoping — re-binds the name to `None` on exit so it does not
    /// outlive the handler.
    fn compile_handler_bind_and_body(
        &mut self,
        arena: &mut SymbolTableArena,
        name: Option<&ast::Identifier>,
        body: &[ast::Stmt],
        pos: crate::diagnostics::CodeRange,
    ) {
        match name {
            Some(name) => {
                let id = self.interner.intern(name.as_str());
                self.compile_store_name(arena, id, pos);
                for stmt in body {
                    self.compile_stmt(arena, stmt);
                }
                self.builder.emit(Opcode::LoadNone);
                self.compile_store_name(arena, id, pos);
            }
            None => {
                self.builder.emit(Opcode::Pop);
                for stmt in body {
                    self.compile_stmt(arena, stmt);
                }
            }
        }
    }

    /// `try`/`except*` (§4.6). All handlers here are exception-group
    /// handlers by construction (`StmtTry::is_star` is one flag for the
    /// whole statement), but a bare `except*` (no type) is still a compile
    /// error.
    fn compile_try_star(&mut self, arena: &mut SymbolTableArena, s: &ast::StmtTry, pos: crate::diagnostics::CodeRange) {
        let has_finally = !s.finalbody.is_empty();

        let finally_setup = if has_finally {
            self.finally_depth += 1;
            Some(self.builder.emit_jump(Opcode::SetupFinally))
        } else {
            None
        };
        let except_setup = self.builder.emit_jump(Opcode::SetupExceptStar);

        for stmt in &s.body {
            self.compile_stmt(arena, stmt);
        }
        self.builder.emit(Opcode::PopExcept);
        let to_else = self.builder.emit_jump(Opcode::Jump);

        self.builder.patch_jump(except_setup, pos).unwrap_or_else(|e| self.error(e));
        for handler in &s.handlers {
            let ExceptHandler::ExceptHandler(h) = handler;
            let handler_pos = self.line_index.code_range(self.filename, h.range());
            let Some(ty) = &h.type_ else {
                self.error(CompileError::bare_except_star(handler_pos));
                continue;
            };
            self.builder.emit(Opcode::Dup);
            self.compile_expr(arena, ty);
            self.builder.emit(Opcode::ExceptStarMatch);
            let miss = self.builder.emit_jump(Opcode::PopJumpIfFalse);
            match &h.name {
                Some(name) => {
                    let id = self.interner.intern(name.as_str());
                    self.compile_store_name(arena, id, handler_pos);
                }
                None => self.builder.emit(Opcode::Pop),
            }
            for stmt in &h.body {
                self.compile_stmt(arena, stmt);
            }
            self.builder.patch_jump(miss, handler_pos).unwrap_or_else(|e| self.error(e));
        }
        self.builder.emit(Opcode::ExceptStarReraise);

        self.builder.patch_jump(to_else, pos).unwrap_or_else(|e| self.error(e));
        for stmt in &s.orelse {
            self.compile_stmt(arena, stmt);
        }

        if let Some(finally_setup) = finally_setup {
            self.builder.emit(Opcode::PopBlock);
            let finally_start = self.builder.current_offset();
            self.builder.patch_jump_to(finally_setup, finally_start, pos).unwrap_or_else(|e| self.error(e));
            for stmt in &s.finalbody {
                self.compile_stmt(arena, stmt);
            }
            self.builder.emit(Opcode::EndFinally);
            self.finally_depth -= 1;
        }
    }

    /// Mixing is structurally unrepresentable in a single `StmtTry` (one
    /// `is_star` flag covers every handler), so this always reports `false`;
    /// kept as a named hook rather than inlined `false` so the compile-error
    /// trigger documented in `CompileError::mixed_except_star` stays
    /// discoverable from the call site.
    fn looks_like_star_only(&self, _s: &ast::StmtTry) -> bool {
        false
    }
}
