//! Expression emission (§4.4): a strict post-order walk over `ruff_python_ast::Expr`.
//!
//! Every `compile_expr` call leaves exactly one value on the operand stack.
//! Store forms are split into a separate `compile_store`, since the same
//! target shape appears on the left of `=`, inside `for`, `with ... as`,
//! `except ... as`, and comprehension targets.

use num_bigint::BigInt;
use ruff_python_ast::{self as ast, BoolOp as AstBoolOp, CmpOp, Expr, Number, Operator, UnaryOp};
use ruff_text_size::Ranged;

use crate::bytecode::{CodeFlags, ConstValue, Opcode};
use crate::diagnostics::CompileError;
use crate::symtab::{ScopeKind, SymbolScope, SymbolTableArena};

use super::Compiler;

impl<'a> Compiler<'a> {
    /// Compiles `expr`, leaving its value on top of the stack.
    pub(crate) fn compile_expr(&mut self, arena: &mut SymbolTableArena, expr: &Expr) {
        let pos = self.position(expr.range());
        if self.options.optimize && matches!(expr, Expr::BinOp(_) | Expr::UnaryOp(_) | Expr::BoolOp(_)) {
            if let Some(value) = crate::optimizer::try_fold_const(expr) {
                let k = self.const_or_error(value, pos);
                self.emit_load_const(k, pos);
                return;
            }
        }
        match expr {
            Expr::NumberLiteral(e) => self.compile_number(&e.value, pos),
            Expr::StringLiteral(e) => {
                let s = e.value.to_string();
                let k = self.const_or_error(ConstValue::Str(s), pos);
                self.emit_load_const(k, pos);
            }
            Expr::BytesLiteral(e) => {
                let bytes: Vec<u8> = e.value.bytes().collect();
                let k = self.const_or_error(ConstValue::Bytes(bytes), pos);
                self.emit_load_const(k, pos);
            }
            Expr::BooleanLiteral(e) => {
                self.builder.emit(if e.value { Opcode::LoadTrue } else { Opcode::LoadFalse });
            }
            Expr::NoneLiteral(_) => self.builder.emit(Opcode::LoadNone),
            Expr::EllipsisLiteral(_) => {
                let k = self.const_or_error(ConstValue::Ellipsis, pos);
                self.emit_load_const(k, pos);
            }
            Expr::FString(e) => self.compile_fstring(arena, e, pos),
            Expr::Name(e) => self.compile_name_load(arena, e.id.as_str(), pos),
            Expr::BoolOp(e) => self.compile_bool_op(arena, e.op, &e.values, pos),
            Expr::UnaryOp(e) => self.compile_unary_op(arena, e.op, &e.operand, pos),
            Expr::BinOp(e) => {
                if self.options.optimize {
                    if let Some(reduction) = crate::optimizer::reduce_binop(e.op, &e.left, &e.right) {
                        self.compile_binop_reduction(arena, reduction, pos);
                        return;
                    }
                }
                self.compile_expr(arena, &e.left);
                self.compile_expr(arena, &e.right);
                self.builder.emit(binop_opcode(e.op));
            }
            Expr::Compare(e) => self.compile_compare(arena, e, pos),
            Expr::Call(e) => self.compile_call(arena, e, pos),
            Expr::Attribute(e) => {
                self.compile_expr(arena, &e.value);
                let name = self.interner.intern(e.attr.as_str());
                let idx = self.name_or_error(name, pos);
                self.emit_arg_or_error(Opcode::LoadAttr, idx, pos);
            }
            Expr::Subscript(e) => {
                self.compile_expr(arena, &e.value);
                self.compile_expr(arena, &e.slice);
                self.builder.emit(Opcode::BinarySubscr);
            }
            Expr::Slice(e) => self.compile_slice(arena, e, pos),
            Expr::Starred(e) => self.compile_expr(arena, &e.value),
            Expr::Tuple(e) => self.compile_sequence_literal(arena, &e.elts, Opcode::BuildTuple, Opcode::LoadEmptyTuple, pos),
            Expr::List(e) => self.compile_sequence_literal(arena, &e.elts, Opcode::BuildList, Opcode::LoadEmptyList, pos),
            Expr::Set(e) => {
                if e.elts.is_empty() {
                    // No dedicated empty-set opcode exists; build via the 0-arity form.
                    self.emit_arg_or_error(Opcode::BuildSet, 0, pos);
                } else {
                    for elt in &e.elts {
                        self.compile_expr(arena, elt);
                    }
                    let n = u32::try_from(e.elts.len()).unwrap_or(u32::MAX);
                    self.emit_arg_or_error(Opcode::BuildSet, n, pos);
                }
            }
            Expr::Dict(e) => self.compile_dict(arena, e, pos),
            Expr::If(e) => self.compile_if_expr(arena, e, pos),
            Expr::Named(e) => self.compile_named_expr(arena, e, pos),
            Expr::Yield(e) => {
                match &e.value {
                    Some(v) => self.compile_expr(arena, v),
                    None => self.builder.emit(Opcode::LoadNone),
                }
                self.builder.emit(Opcode::YieldValue);
            }
            Expr::YieldFrom(e) => {
                self.compile_expr(arena, &e.value);
                self.builder.emit(Opcode::GetIter);
                self.builder.emit(Opcode::YieldFrom);
            }
            Expr::Await(e) => {
                self.compile_expr(arena, &e.value);
                self.builder.emit(Opcode::GetAwaitable);
                self.builder.emit(Opcode::YieldFrom);
            }
            Expr::Lambda(e) => self.compile_lambda(arena, e, pos),
            Expr::ListComp(e) => self.compile_comprehension(arena, ComprehensionKind::List, &e.generators, &[&e.elt], pos),
            Expr::SetComp(e) => self.compile_comprehension(arena, ComprehensionKind::Set, &e.generators, &[&e.elt], pos),
            Expr::DictComp(e) => {
                self.compile_comprehension(arena, ComprehensionKind::Dict, &e.generators, &[&e.key, &e.value], pos);
            }
            Expr::Generator(e) => self.compile_comprehension(arena, ComprehensionKind::Generator, &e.generators, &[&e.elt], pos),
            other => {
                self.error(CompileError::unsupported(format!("unsupported expression: {other:?}"), pos));
                self.builder.emit(Opcode::LoadNone);
            }
        }
    }

    /// Emits the reduced form a strength-reduction rule picked over the
    /// literal `left op right` codegen (§4.10a).
    fn compile_binop_reduction(&mut self, arena: &mut SymbolTableArena, reduction: crate::optimizer::BinOpReduction<'_>, pos: crate::diagnostics::CodeRange) {
        match reduction {
            crate::optimizer::BinOpReduction::UseAsIs(left) => self.compile_expr(arena, left),
            crate::optimizer::BinOpReduction::ComputeThenConst(left, value) => {
                self.compile_expr(arena, left);
                self.builder.emit(Opcode::Pop);
                let k = self.const_or_error(value, pos);
                self.emit_load_const(k, pos);
            }
            crate::optimizer::BinOpReduction::Shift(left, shift) => {
                self.compile_expr(arena, left);
                let k = self.const_or_error(ConstValue::Int(BigInt::from(shift)), pos);
                self.emit_load_const(k, pos);
                self.builder.emit(Opcode::BinaryLShift);
            }
            crate::optimizer::BinOpReduction::Square(left) => {
                self.compile_expr(arena, left);
                self.builder.emit(Opcode::Dup);
                self.builder.emit(Opcode::BinaryMul);
            }
        }
    }

    fn compile_number(&mut self, value: &Number, pos: crate::diagnostics::CodeRange) {
        let const_value = match value {
            Number::Int(i) => match i.as_i64() {
                Some(v) => ConstValue::Int(BigInt::from(v)),
                None => ConstValue::Int(BigInt::parse_bytes(i.to_string().as_bytes(), 10).unwrap_or_default()),
            },
            Number::Float(f) => ConstValue::Float(*f),
            Number::Complex { real, imag } => ConstValue::Complex { re: *real, im: *imag },
        };
        let k = self.const_or_error(const_value, pos);
        self.emit_load_const(k, pos);
    }

    fn compile_sequence_literal(
        &mut self,
        arena: &mut SymbolTableArena,
        elts: &[Expr],
        build_op: Opcode,
        empty_op: Opcode,
        pos: crate::diagnostics::CodeRange,
    ) {
        if elts.is_empty() {
            self.builder.emit(empty_op);
            return;
        }
        if elts.iter().any(|e| matches!(e, Expr::Starred(_))) {
            // Unpacking in a literal: assemble each run via BuildTuple/BuildList
            // and concatenate, matching the CALL_EX argument-assembly strategy.
            let mut first = true;
            for elt in elts {
                match elt {
                    Expr::Starred(s) => self.compile_expr(arena, &s.value),
                    other => {
                        self.compile_expr(arena, other);
                        self.emit_arg_or_error(build_op, 1, pos);
                    }
                }
                if !first {
                    self.builder.emit(Opcode::BinaryAdd);
                }
                first = false;
            }
            return;
        }
        for elt in elts {
            self.compile_expr(arena, elt);
        }
        let n = u32::try_from(elts.len()).unwrap_or(u32::MAX);
        self.emit_arg_or_error(build_op, n, pos);
    }

    fn compile_dict(&mut self, arena: &mut SymbolTableArena, e: &ast::ExprDict, pos: crate::diagnostics::CodeRange) {
        if e.items.is_empty() {
            self.builder.emit(Opcode::LoadEmptyDict);
            return;
        }
        let mut first = true;
        for item in &e.items {
            match &item.key {
                Some(key) => {
                    self.compile_expr(arena, key);
                    self.compile_expr(arena, &item.value);
                    self.emit_arg_or_error(Opcode::BuildMap, 1, pos);
                }
                None => {
                    self.compile_expr(arena, &item.value);
                }
            }
            if !first {
                self.builder.emit(Opcode::BinaryOr);
            }
            first = false;
        }
    }

    fn compile_bool_op(&mut self, arena: &mut SymbolTableArena, op: AstBoolOp, values: &[Expr], pos: crate::diagnostics::CodeRange) {
        let jump_op = match op {
            AstBoolOp::And => Opcode::JumpIfFalseOrPop,
            AstBoolOp::Or => Opcode::JumpIfTrueOrPop,
        };
        let mut end_jumps = Vec::new();
        let (last, rest) = values.split_last().expect("BoolOp has at least one value");
        for value in rest {
            self.compile_expr(arena, value);
            end_jumps.push(self.builder.emit_jump(jump_op));
        }
        self.compile_expr(arena, last);
        for label in end_jumps {
            self.builder.patch_jump(label, pos).unwrap_or_else(|e| self.diagnostics.push(e));
        }
    }

    fn compile_unary_op(&mut self, arena: &mut SymbolTableArena, op: UnaryOp, operand: &Expr, pos: crate::diagnostics::CodeRange) {
        self.compile_expr(arena, operand);
        let _ = pos;
        self.builder.emit(match op {
            UnaryOp::Not => Opcode::UnaryNot,
            UnaryOp::USub => Opcode::UnaryNeg,
            UnaryOp::UAdd => Opcode::UnaryPos,
            UnaryOp::Invert => Opcode::UnaryInvert,
        });
    }

    /// Chained comparisons `a < b < c` per §4.4: push `a`, push `b`, `Dup;
    /// Rot3` to keep `b` around below the comparison result for the next
    /// comparator, compare, short-circuit via `JumpIfFalseOrPop` on all but
    /// the last comparison.
    fn compile_compare(&mut self, arena: &mut SymbolTableArena, e: &ast::ExprCompare, pos: crate::diagnostics::CodeRange) {
        self.compile_expr(arena, &e.left);
        let ops: Vec<_> = e.ops.iter().copied().collect();
        let comparators: Vec<&Expr> = e.comparators.iter().collect();
        let mut end_jumps = Vec::new();
        for (i, (op, comparator)) in ops.iter().zip(comparators.iter()).enumerate() {
            self.compile_expr(arena, comparator);
            let is_last = i + 1 == ops.len();
            if !is_last {
                self.builder.emit(Opcode::Dup);
                self.builder.emit(Opcode::Rot3);
            }
            self.builder.emit(compare_opcode(*op));
            if !is_last {
                end_jumps.push(self.builder.emit_jump(Opcode::JumpIfFalseOrPop));
            }
        }
        for label in end_jumps {
            self.builder.patch_jump(label, pos).unwrap_or_else(|e| self.diagnostics.push(e));
        }
    }

    fn compile_call(&mut self, arena: &mut SymbolTableArena, e: &ast::ExprCall, pos: crate::diagnostics::CodeRange) {
        let has_unpack = e.arguments.args.iter().any(|a| matches!(a, Expr::Starred(_)))
            || e.arguments.keywords.iter().any(|k| k.arg.is_none());
        if has_unpack {
            self.compile_call_ex(arena, e, pos);
            return;
        }
        self.compile_expr(arena, &e.func);
        for arg in &e.arguments.args {
            self.compile_expr(arena, arg);
        }
        if e.arguments.keywords.is_empty() {
            let n = u32::try_from(e.arguments.args.len()).unwrap_or(u32::MAX);
            self.emit_arg_or_error(Opcode::Call, n, pos);
            return;
        }
        let mut names = Vec::with_capacity(e.arguments.keywords.len());
        for kw in &e.arguments.keywords {
            self.compile_expr(arena, &kw.value);
            let name = kw.arg.as_ref().expect("non-unpack keyword has a name");
            names.push(ConstValue::Str(name.to_string()));
        }
        let names_idx = self.const_or_error(ConstValue::Tuple(names), pos);
        self.emit_load_const(names_idx, pos);
        let n = u32::try_from(e.arguments.args.len() + e.arguments.keywords.len()).unwrap_or(u32::MAX);
        self.emit_arg_or_error(Opcode::CallKw, n, pos);
    }

    /// `CALL_EX`: assemble one positional tuple (concatenating starred runs)
    /// and, if any keywords are present, one keyword dict (merging `**`
    /// unpacks via `BinaryOr`), per §4.4.
    fn compile_call_ex(&mut self, arena: &mut SymbolTableArena, e: &ast::ExprCall, pos: crate::diagnostics::CodeRange) {
        self.compile_expr(arena, &e.func);
        self.compile_sequence_literal(arena, &e.arguments.args, Opcode::BuildTuple, Opcode::LoadEmptyTuple, pos);
        if e.arguments.keywords.is_empty() {
            self.emit_arg_or_error(Opcode::CallEx, 0, pos);
            return;
        }
        let mut first = true;
        for kw in &e.arguments.keywords {
            match &kw.arg {
                Some(name) => {
                    let k = self.const_or_error(ConstValue::Str(name.to_string()), pos);
                    self.emit_load_const(k, pos);
                    self.compile_expr(arena, &kw.value);
                    self.emit_arg_or_error(Opcode::BuildMap, 1, pos);
                }
                None => self.compile_expr(arena, &kw.value),
            }
            if !first {
                self.builder.emit(Opcode::BinaryOr);
            }
            first = false;
        }
        self.emit_arg_or_error(Opcode::CallEx, 1, pos);
    }

    /// Slicing lowers to a three-argument `slice(lower, upper, step)` call,
    /// with `None` standing in for an absent field (§4.4).
    fn compile_slice(&mut self, arena: &mut SymbolTableArena, e: &ast::ExprSlice, pos: crate::diagnostics::CodeRange) {
        let name = self.interner.intern("slice");
        self.compile_name_load(arena, "slice", pos);
        let _ = name;
        for part in [&e.lower, &e.upper, &e.step] {
            match part {
                Some(v) => self.compile_expr(arena, v),
                None => self.builder.emit(Opcode::LoadNone),
            }
        }
        self.emit_arg_or_error(Opcode::Call, 3, pos);
    }

    fn compile_if_expr(&mut self, arena: &mut SymbolTableArena, e: &ast::ExprIf, pos: crate::diagnostics::CodeRange) {
        self.compile_expr(arena, &e.test);
        let else_jump = self.builder.emit_jump(Opcode::PopJumpIfFalse);
        self.compile_expr(arena, &e.body);
        let end_jump = self.builder.emit_jump(Opcode::Jump);
        self.builder.patch_jump(else_jump, pos).unwrap_or_else(|e| self.diagnostics.push(e));
        self.compile_expr(arena, &e.orelse);
        self.builder.patch_jump(end_jump, pos).unwrap_or_else(|e| self.diagnostics.push(e));
    }

    /// Assignment expressions (`:=`) bind in the first enclosing
    /// non-comprehension scope, per §4.4; the value stays on the stack.
    fn compile_named_expr(&mut self, arena: &mut SymbolTableArena, e: &ast::ExprNamed, pos: crate::diagnostics::CodeRange) {
        self.compile_expr(arena, &e.value);
        self.builder.emit(Opcode::Dup);
        let Expr::Name(target) = e.target.as_ref() else {
            self.error(CompileError::unsupported("assignment expression target must be a name", pos));
            return;
        };
        let name = self.interner.intern(target.id.as_str());
        if self.scope_kind == ScopeKind::Comprehension {
            let symbol = arena.define_in_enclosing_scope(self.scope, name);
            self.emit_store_for_symbol(arena, symbol, pos);
        } else {
            self.compile_store_name(arena, name, pos);
        }
    }

    pub(crate) fn compile_name_load(&mut self, arena: &mut SymbolTableArena, name: &str, pos: crate::diagnostics::CodeRange) {
        let id = self.interner.intern(name);
        if self.scope_kind == ScopeKind::Class {
            // A class body reads undeclared names through its own namespace
            // dict (`LOAD_NAME`), but one declared `global`/`nonlocal` in
            // this class body bypasses that namespace entirely, per §4.2.
            if let Some(symbol) = arena.lookup_local(self.scope, id) {
                match symbol.scope {
                    SymbolScope::Global | SymbolScope::Builtin => {
                        let idx = self.name_or_error(id, pos);
                        self.emit_arg_or_error(Opcode::LoadGlobal, idx, pos);
                        return;
                    }
                    SymbolScope::Cell | SymbolScope::Free => {
                        let idx = arena.deref_index(self.scope, symbol);
                        self.emit_arg_or_error(Opcode::LoadDeref, idx, pos);
                        return;
                    }
                    SymbolScope::Local => {}
                }
            }
            let idx = self.name_or_error(id, pos);
            self.emit_arg_or_error(Opcode::LoadName, idx, pos);
            return;
        }
        let (symbol, found) = arena.resolve(self.scope, id);
        debug_assert!(found || true);
        match symbol.scope {
            SymbolScope::Local => self.emit_fast_load(symbol.index, pos),
            SymbolScope::Global | SymbolScope::Builtin => {
                let idx = self.name_or_error(id, pos);
                self.emit_arg_or_error(Opcode::LoadGlobal, idx, pos);
            }
            SymbolScope::Cell | SymbolScope::Free => {
                let idx = arena.deref_index(self.scope, symbol);
                self.emit_arg_or_error(Opcode::LoadDeref, idx, pos);
            }
        }
    }

    fn emit_fast_load(&mut self, index: u32, pos: crate::diagnostics::CodeRange) {
        match index {
            0 => self.builder.emit(Opcode::LoadFast0),
            1 => self.builder.emit(Opcode::LoadFast1),
            2 => self.builder.emit(Opcode::LoadFast2),
            3 => self.builder.emit(Opcode::LoadFast3),
            n => self.emit_arg_or_error(Opcode::LoadFast, n, pos),
        }
    }

    fn emit_load_const(&mut self, idx: u32, pos: crate::diagnostics::CodeRange) {
        self.emit_arg_or_error(Opcode::LoadConst, idx, pos);
    }

    pub(crate) fn const_or_error(&mut self, value: ConstValue, pos: crate::diagnostics::CodeRange) -> u32 {
        match self.builder.add_const(value, pos) {
            Ok(idx) => idx,
            Err(e) => {
                self.error(e);
                0
            }
        }
    }

    pub(crate) fn name_or_error(&mut self, name: crate::intern::StringId, pos: crate::diagnostics::CodeRange) -> u32 {
        match self.builder.add_name(name, pos) {
            Ok(idx) => idx,
            Err(e) => {
                self.error(e);
                0
            }
        }
    }

    pub(crate) fn emit_arg_or_error(&mut self, op: Opcode, arg: u32, pos: crate::diagnostics::CodeRange) {
        if let Err(e) = self.builder.emit_arg(op, arg, pos) {
            self.error(e);
        }
    }

    /// Compiles an f-string per §4.4: literal parts become string constants,
    /// expression parts apply an optional conversion then an optional
    /// `format(value, spec)` call; parts concatenate via `BinaryAdd`.
    fn compile_fstring(&mut self, arena: &mut SymbolTableArena, e: &ast::ExprFString, pos: crate::diagnostics::CodeRange) {
        let mut count = 0;
        for part in &e.value {
            match part {
                ast::FStringPart::Literal(lit) => {
                    let s = lit.value.to_string();
                    if s.is_empty() {
                        continue;
                    }
                    let k = self.const_or_error(ConstValue::Str(s), pos);
                    self.emit_load_const(k, pos);
                    count += 1;
                }
                ast::FStringPart::FString(fstring) => {
                    for element in &fstring.elements {
                        self.compile_fstring_element(arena, element, pos);
                        count += 1;
                    }
                }
            }
            if count > 1 {
                self.builder.emit(Opcode::BinaryAdd);
            }
        }
        if count == 0 {
            let k = self.const_or_error(ConstValue::Str(String::new()), pos);
            self.emit_load_const(k, pos);
        }
    }

    fn compile_fstring_element(
        &mut self,
        arena: &mut SymbolTableArena,
        element: &ast::InterpolatedStringElement,
        pos: crate::diagnostics::CodeRange,
    ) {
        match element {
            ast::InterpolatedStringElement::Literal(lit) => {
                let k = self.const_or_error(ConstValue::Str(lit.value.to_string()), pos);
                self.emit_load_const(k, pos);
            }
            ast::InterpolatedStringElement::Interpolation(interp) => {
                // `format` is loaded first when a format spec is present so
                // the value's conversion call (which only ever rotates the
                // top two slots) never needs to reach past it.
                let has_spec = interp.format_spec.is_some();
                if has_spec {
                    self.compile_name_load(arena, "format", pos);
                }
                self.compile_expr(arena, &interp.expression);
                match interp.conversion {
                    ast::ConversionFlag::Str => self.compile_conversion_call(arena, "str", pos),
                    ast::ConversionFlag::Repr => self.compile_conversion_call(arena, "repr", pos),
                    ast::ConversionFlag::Ascii => self.compile_conversion_call(arena, "ascii", pos),
                    ast::ConversionFlag::None => {}
                }
                if let Some(spec) = &interp.format_spec {
                    self.compile_fstring_format_spec(arena, spec, pos);
                    self.emit_arg_or_error(Opcode::Call, 2, pos);
                }
            }
        }
    }

    fn compile_conversion_call(&mut self, arena: &mut SymbolTableArena, builtin: &str, pos: crate::diagnostics::CodeRange) {
        self.compile_name_load(arena, builtin, pos);
        self.builder.emit(Opcode::Rot2);
        self.emit_arg_or_error(Opcode::Call, 1, pos);
    }

    fn compile_fstring_format_spec(
        &mut self,
        arena: &mut SymbolTableArena,
        spec: &ast::InterpolatedStringFormatSpec,
        pos: crate::diagnostics::CodeRange,
    ) {
        let mut count = 0;
        for element in &spec.elements {
            self.compile_fstring_element(arena, element, pos);
            count += 1;
            if count > 1 {
                self.builder.emit(Opcode::BinaryAdd);
            }
        }
        if count == 0 {
            let k = self.const_or_error(ConstValue::Str(String::new()), pos);
            self.emit_load_const(k, pos);
        }
    }

    fn compile_lambda(&mut self, arena: &mut SymbolTableArena, e: &ast::ExprLambda, pos: crate::diagnostics::CodeRange) {
        let name = self.interner.intern("<lambda>");
        let params = e.parameters.as_deref();
        // Python's grammar forbids a bare `yield` inside a lambda body, so a
        // lambda is never a generator.
        let (code, flags) = self.compile_child_expr_function(arena, params, &e.body, name, false);
        self.emit_make_function(arena, code, flags, name, pos, &[]);
    }

    /// Like [`Self::compile_child_function`] but for a lambda, whose body is
    /// a single expression followed by an implicit `Return` (§4.9).
    fn compile_child_expr_function(
        &mut self,
        arena: &mut SymbolTableArena,
        params: Option<&ast::Parameters>,
        body: &Expr,
        name: crate::intern::StringId,
        is_generator: bool,
    ) -> (crate::bytecode::Code, CodeFlags) {
        let child_scope = arena.push(ScopeKind::Function, Some(self.scope));
        let mut child = Compiler::new(child_scope, ScopeKind::Function, self.options, self.line_index, name, self.depth + 1);

        let mut flags = CodeFlags::empty();
        if let Some(params) = params {
            self.define_params(arena, child_scope, &mut child, params, &mut flags);
        }

        // A bare expression body can only reference names already resolvable
        // without a prior assignment scan, so the pre-scan passes degenerate
        // to "nothing assigned" here; still run them for parameter shadowing
        // and nested-lambda capture correctness.
        crate::prescan::run_pass_a(arena, child_scope, &[], &child.interner);
        crate::prescan::run_pass_b(arena, child_scope, &[], &child.interner);

        child.compile_expr(arena, body);
        child.builder.emit(Opcode::Return);

        if is_generator {
            flags.insert(CodeFlags::GENERATOR);
        }
        child.flags = flags;

        let (code, mut child_diagnostics) = child.finish(arena);
        self.diagnostics.append(&mut child_diagnostics);
        (code, flags)
    }

    fn define_params(
        &self,
        arena: &mut SymbolTableArena,
        child_scope: crate::symtab::SymbolTableId,
        child: &mut Compiler<'a>,
        params: &ast::Parameters,
        flags: &mut CodeFlags,
    ) {
        for param in &params.posonlyargs {
            let n = child.interner.intern(param.parameter.name.as_str());
            arena.define(child_scope, n);
            child.arg_count += 1;
        }
        for param in &params.args {
            let n = child.interner.intern(param.parameter.name.as_str());
            arena.define(child_scope, n);
            child.arg_count += 1;
        }
        if let Some(vararg) = &params.vararg {
            let n = child.interner.intern(vararg.name.as_str());
            arena.define(child_scope, n);
            flags.insert(CodeFlags::VAR_ARGS);
        }
        for param in &params.kwonlyargs {
            let n = child.interner.intern(param.parameter.name.as_str());
            arena.define(child_scope, n);
            child.kw_only_arg_count += 1;
        }
        if let Some(kwarg) = &params.kwarg {
            let n = child.interner.intern(kwarg.name.as_str());
            arena.define(child_scope, n);
            flags.insert(CodeFlags::VAR_KEYWORDS);
        }
    }

    /// Shared machinery for `def`/`lambda`/comprehension bodies: creates a
    /// child scope, runs the pre-scan passes, emits the body, and finalizes
    /// into a nested `Code` object. Returns the code plus its flags.
    pub(crate) fn compile_child_function(
        &mut self,
        arena: &mut SymbolTableArena,
        params: Option<&ast::Parameters>,
        body: &[ast::Stmt],
        name: crate::intern::StringId,
        is_async: bool,
        force_generator_check: bool,
    ) -> (crate::bytecode::Code, CodeFlags) {
        let child_scope = arena.push(ScopeKind::Function, Some(self.scope));
        let mut child = Compiler::new(child_scope, ScopeKind::Function, self.options, self.line_index, name, self.depth + 1);

        let mut flags = CodeFlags::empty();
        if let Some(params) = params {
            self.define_params(arena, child_scope, &mut child, params, &mut flags);
        }

        if self.scope_kind == ScopeKind::Class && crate::ast_walk::references_super_or_class_cell(body) {
            arena.mark_as_cell(self.scope, self.interner.intern("__class__"));
            let _ = arena.resolve(child_scope, self.interner.intern("__class__"));
        }

        // Generator-ness is a syntactic property of the original source, not
        // of what's still reachable after constant-branch elimination, so
        // it's checked against `body` before any optimization is applied.
        let is_generator = force_generator_check || crate::ast_walk::contains_yield(body);

        let optimized_body;
        let body = if self.options.optimize {
            optimized_body = crate::optimizer::optimize_stmts(body);
            optimized_body.as_slice()
        } else {
            body
        };

        crate::prescan::run_pass_a(arena, child_scope, body, &child.interner);
        crate::prescan::run_pass_b(arena, child_scope, body, &child.interner);

        for stmt in body {
            child.compile_stmt(arena, stmt);
        }
        child.builder.emit(Opcode::LoadNone);
        child.builder.emit(Opcode::Return);

        if is_async && is_generator {
            flags.insert(CodeFlags::ASYNC_GENERATOR);
        } else if is_async {
            flags.insert(CodeFlags::COROUTINE);
        } else if is_generator {
            flags.insert(CodeFlags::GENERATOR);
        }
        child.flags = flags;

        let (code, mut child_diagnostics) = child.finish(arena);
        self.diagnostics.append(&mut child_diagnostics);
        (code, flags)
    }

    /// Pushes positional/keyword defaults, the code object, and the name,
    /// then `MAKE_FUNCTION`, matching §4.9's enclosing-compiler sequence.
    pub(crate) fn emit_make_function(
        &mut self,
        arena: &mut SymbolTableArena,
        code: crate::bytecode::Code,
        _flags: CodeFlags,
        name: crate::intern::StringId,
        pos: crate::diagnostics::CodeRange,
        defaults: &[(&Expr, bool)],
    ) {
        let mut make_flags: u32 = 0;
        let mut kw_defaults = Vec::new();
        let mut pos_defaults = Vec::new();
        for (expr, is_kw_only) in defaults {
            if *is_kw_only {
                kw_defaults.push(*expr);
            } else {
                pos_defaults.push(*expr);
            }
        }
        if !pos_defaults.is_empty() {
            for expr in &pos_defaults {
                self.compile_expr(arena, expr);
            }
            let n = u32::try_from(pos_defaults.len()).unwrap_or(u32::MAX);
            self.emit_arg_or_error(Opcode::BuildTuple, n, pos);
            make_flags |= 1;
        }
        if !kw_defaults.is_empty() {
            for expr in &kw_defaults {
                self.compile_expr(arena, expr);
            }
            let n = u32::try_from(kw_defaults.len()).unwrap_or(u32::MAX);
            self.emit_arg_or_error(Opcode::BuildMap, n, pos);
            make_flags |= 2;
        }
        let code_idx = self.const_or_error(ConstValue::Code(Box::new(code)), pos);
        self.emit_load_const(code_idx, pos);
        let name_idx = self.const_or_error(ConstValue::Str(self.interner.resolve(name).to_string()), pos);
        self.emit_load_const(name_idx, pos);
        self.emit_arg_or_error(Opcode::MakeFunction, make_flags, pos);
    }

    /// Stores the value on top of the stack into `target`, per §4.4's store
    /// forms (identifier/attribute/subscript/tuple-unpack).
    pub(crate) fn compile_store(&mut self, arena: &mut SymbolTableArena, target: &Expr) {
        let pos = self.position(target.range());
        match target {
            Expr::Name(n) => {
                let name = self.interner.intern(n.id.as_str());
                self.compile_store_name(arena, name, pos);
            }
            Expr::Attribute(a) => {
                // The value being stored is already below this on the stack
                // (§4.4: "object expression first ... consume the value
                // pre-computed below them"); no reordering is needed.
                self.compile_expr(arena, &a.value);
                let name = self.interner.intern(a.attr.as_str());
                let idx = self.name_or_error(name, pos);
                self.emit_arg_or_error(Opcode::StoreAttr, idx, pos);
            }
            Expr::Subscript(s) => {
                self.compile_expr(arena, &s.value);
                self.compile_expr(arena, &s.slice);
                self.builder.emit(Opcode::StoreSubscr);
            }
            Expr::Tuple(t) => self.compile_unpack_store(arena, &t.elts, pos),
            Expr::List(l) => self.compile_unpack_store(arena, &l.elts, pos),
            Expr::Starred(s) => self.compile_store(arena, &s.value),
            other => self.error(CompileError::unsupported(format!("unsupported assignment target: {other:?}"), pos)),
        }
    }

    fn compile_unpack_store(&mut self, arena: &mut SymbolTableArena, targets: &[Expr], pos: crate::diagnostics::CodeRange) {
        if let Some(star_pos) = targets.iter().position(|t| matches!(t, Expr::Starred(_))) {
            let before = u32::try_from(star_pos).unwrap_or(0);
            let after = u32::try_from(targets.len() - star_pos - 1).unwrap_or(0);
            self.emit_arg_or_error(Opcode::UnpackEx, before | (after << 8), pos);
        } else {
            let n = u32::try_from(targets.len()).unwrap_or(0);
            self.emit_arg_or_error(Opcode::UnpackSequence, n, pos);
        }
        for target in targets {
            self.compile_store(arena, target);
        }
    }

    pub(crate) fn compile_store_name(&mut self, arena: &mut SymbolTableArena, name: crate::intern::StringId, pos: crate::diagnostics::CodeRange) {
        if self.scope_kind == ScopeKind::Class {
            // Mirrors `compile_name_load`: a plain class-body store goes
            // through the class namespace (`STORE_NAME`), but one declared
            // `global`/`nonlocal` follows normal Global/Cell/Free resolution.
            if let Some(symbol) = arena.lookup_local(self.scope, name) {
                if !matches!(symbol.scope, SymbolScope::Local) {
                    self.emit_store_for_symbol(arena, symbol, pos);
                    return;
                }
            }
            let idx = self.name_or_error(name, pos);
            self.emit_arg_or_error(Opcode::StoreName, idx, pos);
            return;
        }
        let (symbol, _) = arena.resolve(self.scope, name);
        self.emit_store_for_symbol(arena, symbol, pos);
    }

    pub(crate) fn emit_store_for_symbol(&mut self, arena: &mut SymbolTableArena, symbol: crate::symtab::Symbol, pos: crate::diagnostics::CodeRange) {
        match symbol.scope {
            SymbolScope::Local => self.emit_fast_store(symbol.index, pos),
            SymbolScope::Global | SymbolScope::Builtin => {
                let idx = self.name_or_error(symbol.name, pos);
                self.emit_arg_or_error(Opcode::StoreGlobal, idx, pos);
            }
            SymbolScope::Cell | SymbolScope::Free => {
                let idx = arena.deref_index(self.scope, symbol);
                self.emit_arg_or_error(Opcode::StoreDeref, idx, pos);
            }
        }
    }

    fn emit_fast_store(&mut self, index: u32, pos: crate::diagnostics::CodeRange) {
        match index {
            0 => self.builder.emit(Opcode::StoreFast0),
            1 => self.builder.emit(Opcode::StoreFast1),
            2 => self.builder.emit(Opcode::StoreFast2),
            3 => self.builder.emit(Opcode::StoreFast3),
            n => self.emit_arg_or_error(Opcode::StoreFast, n, pos),
        }
    }

    /// Comprehension/generator-expression compilation per §4.9: a child
    /// compiler whose sole parameter (`.0`) is the outermost iterable.
    fn compile_comprehension(
        &mut self,
        arena: &mut SymbolTableArena,
        kind: ComprehensionKind,
        generators: &[ast::Comprehension],
        elements: &[&Expr],
        pos: crate::diagnostics::CodeRange,
    ) {
        let child_scope = arena.push(ScopeKind::Comprehension, Some(self.scope));
        let dot_zero = self.interner.intern(".0");
        arena.define(child_scope, dot_zero);

        let mut child = Compiler::new(child_scope, ScopeKind::Comprehension, self.options, self.line_index, self.interner.intern("<comprehension>"), self.depth + 1);
        child.arg_count = 1;

        for gen in generators {
            prescan_comprehension_target(arena, child_scope, &gen.target, &child.interner);
        }
        crate::prescan::run_pass_b_over_exprs(arena, child_scope, elements, generators, &child.interner);

        let accumulator_name = child.interner.intern(".acc");
        match kind {
            ComprehensionKind::List => {
                child.builder.emit(Opcode::LoadEmptyList);
                let sym = arena.define(child_scope, accumulator_name);
                child.emit_fast_store(sym.index, pos);
            }
            ComprehensionKind::Set => {
                child.emit_arg_or_error(Opcode::BuildSet, 0, pos);
                let sym = arena.define(child_scope, accumulator_name);
                child.emit_fast_store(sym.index, pos);
            }
            ComprehensionKind::Dict => {
                child.builder.emit(Opcode::LoadEmptyDict);
                let sym = arena.define(child_scope, accumulator_name);
                child.emit_fast_store(sym.index, pos);
            }
            ComprehensionKind::Generator => {}
        }

        child.compile_comprehension_level(arena, generators, 0, elements, kind, accumulator_name, pos);

        child.builder.emit(Opcode::LoadNone);
        child.builder.emit(Opcode::Return);
        if kind == ComprehensionKind::Generator {
            child.flags.insert(CodeFlags::GENERATOR);
        }
        let (code, mut child_diagnostics) = child.finish(arena);
        self.diagnostics.append(&mut child_diagnostics);

        self.compile_expr(arena, &generators[0].iter);
        self.builder.emit(Opcode::GetIter);
        let name = self.interner.intern("<comprehension>");
        self.emit_make_function(arena, code, CodeFlags::empty(), name, pos, &[]);
        self.builder.emit(Opcode::Rot2);
        self.emit_arg_or_error(Opcode::Call, 1, pos);
    }

    fn compile_comprehension_level(
        &mut self,
        arena: &mut SymbolTableArena,
        generators: &[ast::Comprehension],
        depth: usize,
        elements: &[&Expr],
        kind: ComprehensionKind,
        accumulator_name: crate::intern::StringId,
        pos: crate::diagnostics::CodeRange,
    ) {
        let gen = &generators[depth];
        if depth == 0 {
            let dot_zero = self.interner.intern(".0");
            self.compile_name_load(arena, ".0", pos);
            let _ = dot_zero;
        } else {
            self.compile_expr(arena, &gen.iter);
            self.builder.emit(Opcode::GetIter);
        }

        let loop_start = self.builder.current_offset();
        let exit_jump = self.builder.emit_jump(Opcode::ForIter);
        self.compile_store(arena, &gen.target);

        let mut if_exit_jumps = Vec::new();
        for cond in &gen.ifs {
            self.compile_expr(arena, cond);
            if_exit_jumps.push(self.builder.emit_jump(Opcode::PopJumpIfFalse));
        }

        if depth + 1 < generators.len() {
            self.compile_comprehension_level(arena, generators, depth + 1, elements, kind, accumulator_name, pos);
        } else {
            self.emit_comprehension_body(arena, elements, kind, accumulator_name, generators.len(), pos);
        }

        self.builder.emit_jump_to(Opcode::Jump, loop_start, pos).unwrap_or_else(|e| self.diagnostics.push(e));
        for label in if_exit_jumps {
            self.builder.patch_jump_to(label, loop_start, pos).unwrap_or_else(|e| self.diagnostics.push(e));
        }
        self.builder.patch_jump(exit_jump, pos).unwrap_or_else(|e| self.diagnostics.push(e));
    }

    fn emit_comprehension_body(
        &mut self,
        arena: &mut SymbolTableArena,
        elements: &[&Expr],
        kind: ComprehensionKind,
        accumulator_name: crate::intern::StringId,
        depth_count: usize,
        pos: crate::diagnostics::CodeRange,
    ) {
        let depth_arg = u32::try_from(depth_count).unwrap_or(1);
        match kind {
            ComprehensionKind::List => {
                self.compile_name_load_interned(arena, accumulator_name, pos);
                self.compile_expr(arena, elements[0]);
                self.emit_arg_or_error(Opcode::ListAppend, depth_arg, pos);
            }
            ComprehensionKind::Set => {
                self.compile_name_load_interned(arena, accumulator_name, pos);
                self.compile_expr(arena, elements[0]);
                self.emit_arg_or_error(Opcode::SetAdd, depth_arg, pos);
            }
            ComprehensionKind::Dict => {
                self.compile_name_load_interned(arena, accumulator_name, pos);
                self.compile_expr(arena, elements[0]);
                self.compile_expr(arena, elements[1]);
                self.emit_arg_or_error(Opcode::MapAdd, depth_arg, pos);
            }
            ComprehensionKind::Generator => {
                self.compile_expr(arena, elements[0]);
                self.builder.emit(Opcode::YieldValue);
                self.builder.emit(Opcode::Pop);
            }
        }
    }

    fn compile_name_load_interned(&mut self, arena: &mut SymbolTableArena, name: crate::intern::StringId, pos: crate::diagnostics::CodeRange) {
        let (symbol, _) = arena.resolve(self.scope, name);
        match symbol.scope {
            SymbolScope::Local => self.emit_fast_load(symbol.index, pos),
            SymbolScope::Cell | SymbolScope::Free => {
                let idx = arena.deref_index(self.scope, symbol);
                self.emit_arg_or_error(Opcode::LoadDeref, idx, pos);
            }
            SymbolScope::Global | SymbolScope::Builtin => {
                let idx = self.name_or_error(name, pos);
                self.emit_arg_or_error(Opcode::LoadGlobal, idx, pos);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

/// Pre-defines a comprehension `for` target as a Local in the comprehension
/// scope (§4.9); only plain-name and tuple targets are expected from a
/// parser-validated AST.
fn prescan_comprehension_target(arena: &mut SymbolTableArena, scope: crate::symtab::SymbolTableId, target: &Expr, interner: &crate::intern::Interner) {
    match target {
        Expr::Name(n) => {
            arena.define(scope, interner.intern(n.id.as_str()));
        }
        Expr::Tuple(t) => {
            for elt in &t.elts {
                prescan_comprehension_target(arena, scope, elt, interner);
            }
        }
        Expr::List(l) => {
            for elt in &l.elts {
                prescan_comprehension_target(arena, scope, elt, interner);
            }
        }
        Expr::Starred(s) => prescan_comprehension_target(arena, scope, &s.value, interner),
        _ => {}
    }
}

pub(super) fn binop_opcode(op: Operator) -> Opcode {
    match op {
        Operator::Add => Opcode::BinaryAdd,
        Operator::Sub => Opcode::BinarySub,
        Operator::Mult => Opcode::BinaryMul,
        Operator::Div => Opcode::BinaryDivide,
        Operator::FloorDiv => Opcode::BinaryFloorDiv,
        Operator::Mod => Opcode::BinaryMod,
        Operator::Pow => Opcode::BinaryPow,
        Operator::LShift => Opcode::BinaryLShift,
        Operator::RShift => Opcode::BinaryRShift,
        Operator::BitAnd => Opcode::BinaryAnd,
        Operator::BitOr => Opcode::BinaryOr,
        Operator::BitXor => Opcode::BinaryXor,
        Operator::MatMult => Opcode::BinaryMatMul,
    }
}

fn compare_opcode(op: CmpOp) -> Opcode {
    match op {
        CmpOp::Lt => Opcode::CompareLt,
        CmpOp::LtE => Opcode::CompareLe,
        CmpOp::Eq => Opcode::CompareEq,
        CmpOp::NotEq => Opcode::CompareNe,
        CmpOp::Gt => Opcode::CompareGt,
        CmpOp::GtE => Opcode::CompareGe,
        CmpOp::Is => Opcode::CompareIs,
        CmpOp::IsNot => Opcode::CompareIsNot,
        CmpOp::In => Opcode::CompareIn,
        CmpOp::NotIn => Opcode::CompareNotIn,
    }
}
