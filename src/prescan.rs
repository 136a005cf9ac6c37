//! Pre-scan passes run over a function body before emission: Pass A
//! (assignment discovery) pre-defines locals, Pass B (capture discovery)
//! promotes locals referenced by nested scopes to cells.

use ahash::AHashSet;
use ruff_python_ast::{Expr, Pattern, Stmt};

use crate::intern::{Interner, StringId};
use crate::symtab::{ScopeKind, SymbolTableArena, SymbolTableId};

/// Names declared `global`/`nonlocal` in a body, collected alongside the
/// assignment-target scan so Pass A knows which assigned names to skip.
#[derive(Debug, Default)]
struct Declarations {
    globals: AHashSet<StringId>,
    nonlocals: AHashSet<StringId>,
}

/// Pass A: collects every assignment target in `body` (without crossing a
/// nested scope boundary) and pre-defines it as a Local in `scope`, unless
/// declared `global`/`nonlocal` or already bound (e.g. a parameter).
pub fn run_pass_a(arena: &mut SymbolTableArena, scope: SymbolTableId, body: &[Stmt], interner: &Interner) {
    let mut decls = Declarations::default();
    collect_declarations(body, &mut decls);
    for name in &decls.globals {
        arena.define_global(scope, *name);
    }
    for name in &decls.nonlocals {
        arena.define_nonlocal(scope, *name);
    }

    let mut assigned = AHashSet::new();
    collect_assigned_names(body, &mut assigned, interner);
    for name in assigned {
        if decls.globals.contains(&name) || decls.nonlocals.contains(&name) {
            continue;
        }
        arena.define(scope, name);
    }
}

/// Pass B: walks `body` again; every identifier referenced after crossing
/// into a nested function/class/lambda/comprehension that resolves to a
/// Local bound directly in `scope` gets promoted to a Cell.
pub fn run_pass_b(arena: &mut SymbolTableArena, scope: SymbolTableId, body: &[Stmt], interner: &Interner) {
    use crate::symtab::SymbolScope;

    let mut referenced = AHashSet::new();
    for stmt in body {
        scan_stmt_for_captures(stmt, false, &mut referenced, interner);
    }
    for name in referenced {
        if matches!(arena.lookup_local(scope, name).map(|s| s.scope), Some(SymbolScope::Local)) {
            arena.mark_as_cell(scope, name);
        }
    }
}

/// Pass B for a comprehension's own scope (§4.9): run directly against
/// `scope` over its element expression(s) and each generator's guard
/// conditions, after `prescan_comprehension_target` has pre-defined the
/// generator targets as locals. A name referenced from a lambda nested
/// inside one of those expressions gets promoted to a Cell here, the same
/// way `run_pass_b` promotes one referenced from a nested `def`.
pub fn run_pass_b_over_exprs(
    arena: &mut SymbolTableArena,
    scope: SymbolTableId,
    elements: &[&Expr],
    generators: &[ruff_python_ast::Comprehension],
    interner: &Interner,
) {
    use crate::symtab::SymbolScope;

    let mut referenced = AHashSet::new();
    for element in elements {
        scan_expr_for_captures(element, false, &mut referenced, interner);
    }
    for gen in generators {
        for cond in &gen.ifs {
            scan_expr_for_captures(cond, false, &mut referenced, interner);
        }
    }
    for name in referenced {
        if matches!(arena.lookup_local(scope, name).map(|s| s.scope), Some(SymbolScope::Local)) {
            arena.mark_as_cell(scope, name);
        }
    }
}

fn collect_declarations(body: &[Stmt], decls: &mut Declarations) {
    for stmt in body {
        match stmt {
            Stmt::Global(g) => {
                for name in &g.names {
                    decls.globals.insert(Interner::new().intern(name.as_str()));
                }
            }
            Stmt::Nonlocal(n) => {
                for name in &n.names {
                    decls.nonlocals.insert(Interner::new().intern(name.as_str()));
                }
            }
            Stmt::If(s) => {
                collect_declarations(&s.body, decls);
                for c in &s.elif_else_clauses {
                    collect_declarations(&c.body, decls);
                }
            }
            Stmt::While(s) => {
                collect_declarations(&s.body, decls);
                collect_declarations(&s.orelse, decls);
            }
            Stmt::For(s) => {
                collect_declarations(&s.body, decls);
                collect_declarations(&s.orelse, decls);
            }
            Stmt::With(s) => collect_declarations(&s.body, decls),
            Stmt::Try(s) => {
                collect_declarations(&s.body, decls);
                for h in &s.handlers {
                    let ruff_python_ast::ExceptHandler::ExceptHandler(h) = h;
                    collect_declarations(&h.body, decls);
                }
                collect_declarations(&s.orelse, decls);
                collect_declarations(&s.finalbody, decls);
            }
            Stmt::Match(s) => {
                for case in &s.cases {
                    collect_declarations(&case.body, decls);
                }
            }
            _ => {}
        }
    }
}

/// Collects assignment-target names, per Pass A's list: assignment,
/// augmented/annotated assignment (with initializer), `for` targets,
/// `with` bindings, `except` bindings, import aliases, match captures,
/// and nested `def`/`class` names. Does not descend into nested
/// function/class/lambda/comprehension bodies.
fn collect_assigned_names(body: &[Stmt], out: &mut AHashSet<StringId>, interner: &Interner) {
    for stmt in body {
        match stmt {
            Stmt::Assign(s) => {
                for t in &s.targets {
                    collect_target_names(t, out, interner);
                }
            }
            Stmt::AugAssign(s) => collect_target_names(&s.target, out, interner),
            Stmt::AnnAssign(s) => {
                if s.value.is_some() {
                    collect_target_names(&s.target, out, interner);
                }
            }
            Stmt::For(s) => {
                collect_target_names(&s.target, out, interner);
                collect_assigned_names(&s.body, out, interner);
                collect_assigned_names(&s.orelse, out, interner);
            }
            Stmt::With(s) => {
                for item in &s.items {
                    if let Some(target) = &item.optional_vars {
                        collect_target_names(target, out, interner);
                    }
                }
                collect_assigned_names(&s.body, out, interner);
            }
            Stmt::If(s) => {
                collect_assigned_names(&s.body, out, interner);
                for c in &s.elif_else_clauses {
                    collect_assigned_names(&c.body, out, interner);
                }
            }
            Stmt::While(s) => {
                collect_assigned_names(&s.body, out, interner);
                collect_assigned_names(&s.orelse, out, interner);
            }
            Stmt::Try(s) => {
                collect_assigned_names(&s.body, out, interner);
                for h in &s.handlers {
                    let ruff_python_ast::ExceptHandler::ExceptHandler(h) = h;
                    if let Some(name) = &h.name {
                        out.insert(interner.intern(name.as_str()));
                    }
                    collect_assigned_names(&h.body, out, interner);
                }
                collect_assigned_names(&s.orelse, out, interner);
                collect_assigned_names(&s.finalbody, out, interner);
            }
            Stmt::Import(s) => {
                for alias in &s.names {
                    let bound = alias.asname.as_ref().unwrap_or(&alias.name);
                    out.insert(interner.intern(bound.as_str()));
                }
            }
            Stmt::ImportFrom(s) => {
                for alias in &s.names {
                    let bound = alias.asname.as_ref().unwrap_or(&alias.name);
                    out.insert(interner.intern(bound.as_str()));
                }
            }
            Stmt::Match(s) => {
                for case in &s.cases {
                    collect_pattern_captures(&case.pattern, out, interner);
                    collect_assigned_names(&case.body, out, interner);
                }
            }
            Stmt::FunctionDef(s) => {
                out.insert(interner.intern(s.name.as_str()));
            }
            Stmt::ClassDef(s) => {
                out.insert(interner.intern(s.name.as_str()));
            }
            _ => {}
        }
    }
}

fn collect_target_names(target: &Expr, out: &mut AHashSet<StringId>, interner: &Interner) {
    match target {
        Expr::Name(n) => {
            out.insert(interner.intern(n.id.as_str()));
        }
        Expr::Tuple(t) => {
            for elt in &t.elts {
                collect_target_names(elt, out, interner);
            }
        }
        Expr::List(l) => {
            for elt in &l.elts {
                collect_target_names(elt, out, interner);
            }
        }
        Expr::Starred(s) => collect_target_names(&s.value, out, interner),
        // Attribute/subscript targets bind no new name in this scope.
        _ => {}
    }
}

fn collect_pattern_captures(pattern: &Pattern, out: &mut AHashSet<StringId>, interner: &Interner) {
    match pattern {
        Pattern::MatchAs(p) => {
            if let Some(name) = &p.name {
                out.insert(interner.intern(name.as_str()));
            }
            if let Some(inner) = &p.pattern {
                collect_pattern_captures(inner, out, interner);
            }
        }
        Pattern::MatchCapture(p) => {
            out.insert(interner.intern(p.name.as_str()));
        }
        Pattern::MatchStar(p) => {
            if let Some(name) = &p.name {
                out.insert(interner.intern(name.as_str()));
            }
        }
        Pattern::MatchSequence(p) => {
            for elt in &p.patterns {
                collect_pattern_captures(elt, out, interner);
            }
        }
        Pattern::MatchMapping(p) => {
            for elt in &p.patterns {
                collect_pattern_captures(elt, out, interner);
            }
            if let Some(rest) = &p.rest {
                out.insert(interner.intern(rest.as_str()));
            }
        }
        Pattern::MatchClass(p) => {
            for elt in &p.arguments.patterns {
                collect_pattern_captures(elt, out, interner);
            }
            for kw in &p.arguments.keywords {
                collect_pattern_captures(&kw.pattern, out, interner);
            }
        }
        Pattern::MatchOr(p) => {
            for elt in &p.patterns {
                collect_pattern_captures(elt, out, interner);
            }
        }
        Pattern::MatchValue(_) | Pattern::MatchSingleton(_) => {}
    }
}

/// Walks `stmt`, recording a name reference in `out` only once `in_inner`
/// is true — i.e. only after the walk has crossed into a nested
/// function/class/lambda/comprehension body relative to the scope Pass B
/// started from.
fn scan_stmt_for_captures(stmt: &Stmt, in_inner: bool, out: &mut AHashSet<StringId>, interner: &Interner) {
    match stmt {
        Stmt::FunctionDef(s) => {
            let params = &s.parameters;
            for param in params.posonlyargs.iter().chain(params.args.iter()).chain(params.kwonlyargs.iter()) {
                if let Some(default) = &param.default {
                    scan_expr_for_captures(default, in_inner, out, interner);
                }
            }
            for stmt in &s.body {
                scan_stmt_for_captures(stmt, true, out, interner);
            }
        }
        Stmt::ClassDef(s) => {
            for stmt in &s.body {
                scan_stmt_for_captures(stmt, true, out, interner);
            }
        }
        Stmt::If(s) => {
            scan_expr_for_captures(&s.test, in_inner, out, interner);
            for stmt in &s.body {
                scan_stmt_for_captures(stmt, in_inner, out, interner);
            }
            for c in &s.elif_else_clauses {
                if let Some(test) = &c.test {
                    scan_expr_for_captures(test, in_inner, out, interner);
                }
                for stmt in &c.body {
                    scan_stmt_for_captures(stmt, in_inner, out, interner);
                }
            }
        }
        Stmt::While(s) => {
            scan_expr_for_captures(&s.test, in_inner, out, interner);
            for stmt in s.body.iter().chain(s.orelse.iter()) {
                scan_stmt_for_captures(stmt, in_inner, out, interner);
            }
        }
        Stmt::For(s) => {
            scan_expr_for_captures(&s.iter, in_inner, out, interner);
            for stmt in s.body.iter().chain(s.orelse.iter()) {
                scan_stmt_for_captures(stmt, in_inner, out, interner);
            }
        }
        Stmt::With(s) => {
            for item in &s.items {
                scan_expr_for_captures(&item.context_expr, in_inner, out, interner);
            }
            for stmt in &s.body {
                scan_stmt_for_captures(stmt, in_inner, out, interner);
            }
        }
        Stmt::Try(s) => {
            for stmt in s.body.iter().chain(s.orelse.iter()).chain(s.finalbody.iter()) {
                scan_stmt_for_captures(stmt, in_inner, out, interner);
            }
            for h in &s.handlers {
                let ruff_python_ast::ExceptHandler::ExceptHandler(h) = h;
                if let Some(ty) = &h.type_ {
                    scan_expr_for_captures(ty, in_inner, out, interner);
                }
                for stmt in &h.body {
                    scan_stmt_for_captures(stmt, in_inner, out, interner);
                }
            }
        }
        Stmt::Match(s) => {
            scan_expr_for_captures(&s.subject, in_inner, out, interner);
            for case in &s.cases {
                for stmt in &case.body {
                    scan_stmt_for_captures(stmt, in_inner, out, interner);
                }
            }
        }
        Stmt::Assign(s) => scan_expr_for_captures(&s.value, in_inner, out, interner),
        Stmt::AugAssign(s) => scan_expr_for_captures(&s.value, in_inner, out, interner),
        Stmt::AnnAssign(s) => {
            if let Some(v) = &s.value {
                scan_expr_for_captures(v, in_inner, out, interner);
            }
        }
        Stmt::Return(s) => {
            if let Some(v) = &s.value {
                scan_expr_for_captures(v, in_inner, out, interner);
            }
        }
        Stmt::Expr(s) => scan_expr_for_captures(&s.value, in_inner, out, interner),
        Stmt::Delete(s) => {
            for t in &s.targets {
                scan_expr_for_captures(t, in_inner, out, interner);
            }
        }
        Stmt::Assert(s) => {
            scan_expr_for_captures(&s.test, in_inner, out, interner);
            if let Some(m) = &s.msg {
                scan_expr_for_captures(m, in_inner, out, interner);
            }
        }
        Stmt::Raise(s) => {
            if let Some(e) = &s.exc {
                scan_expr_for_captures(e, in_inner, out, interner);
            }
            if let Some(c) = &s.cause {
                scan_expr_for_captures(c, in_inner, out, interner);
            }
        }
        _ => {}
    }
}

fn scan_expr_for_captures(expr: &Expr, in_inner: bool, out: &mut AHashSet<StringId>, interner: &Interner) {
    if in_inner {
        if let Expr::Name(n) = expr {
            out.insert(interner.intern(n.id.as_str()));
        }
    }
    match expr {
        Expr::BoolOp(e) => e.values.iter().for_each(|v| scan_expr_for_captures(v, in_inner, out, interner)),
        Expr::BinOp(e) => {
            scan_expr_for_captures(&e.left, in_inner, out, interner);
            scan_expr_for_captures(&e.right, in_inner, out, interner);
        }
        Expr::UnaryOp(e) => scan_expr_for_captures(&e.operand, in_inner, out, interner),
        Expr::Compare(e) => {
            scan_expr_for_captures(&e.left, in_inner, out, interner);
            e.comparators.iter().for_each(|c| scan_expr_for_captures(c, in_inner, out, interner));
        }
        Expr::Call(e) => {
            scan_expr_for_captures(&e.func, in_inner, out, interner);
            e.arguments.args.iter().for_each(|a| scan_expr_for_captures(a, in_inner, out, interner));
            e.arguments.keywords.iter().for_each(|k| scan_expr_for_captures(&k.value, in_inner, out, interner));
        }
        Expr::Attribute(e) => scan_expr_for_captures(&e.value, in_inner, out, interner),
        Expr::Subscript(e) => {
            scan_expr_for_captures(&e.value, in_inner, out, interner);
            scan_expr_for_captures(&e.slice, in_inner, out, interner);
        }
        Expr::Starred(e) => scan_expr_for_captures(&e.value, in_inner, out, interner),
        Expr::Tuple(e) => e.elts.iter().for_each(|x| scan_expr_for_captures(x, in_inner, out, interner)),
        Expr::List(e) => e.elts.iter().for_each(|x| scan_expr_for_captures(x, in_inner, out, interner)),
        Expr::Set(e) => e.elts.iter().for_each(|x| scan_expr_for_captures(x, in_inner, out, interner)),
        Expr::Dict(e) => {
            for item in &e.items {
                if let Some(k) = &item.key {
                    scan_expr_for_captures(k, in_inner, out, interner);
                }
                scan_expr_for_captures(&item.value, in_inner, out, interner);
            }
        }
        Expr::If(e) => {
            scan_expr_for_captures(&e.test, in_inner, out, interner);
            scan_expr_for_captures(&e.body, in_inner, out, interner);
            scan_expr_for_captures(&e.orelse, in_inner, out, interner);
        }
        Expr::Named(e) => {
            scan_expr_for_captures(&e.target, in_inner, out, interner);
            scan_expr_for_captures(&e.value, in_inner, out, interner);
        }
        Expr::Yield(e) => {
            if let Some(v) = &e.value {
                scan_expr_for_captures(v, in_inner, out, interner);
            }
        }
        Expr::YieldFrom(e) => scan_expr_for_captures(&e.value, in_inner, out, interner),
        Expr::Await(e) => scan_expr_for_captures(&e.value, in_inner, out, interner),
        Expr::Slice(e) => {
            if let Some(l) = &e.lower {
                scan_expr_for_captures(l, in_inner, out, interner);
            }
            if let Some(u) = &e.upper {
                scan_expr_for_captures(u, in_inner, out, interner);
            }
            if let Some(s) = &e.step {
                scan_expr_for_captures(s, in_inner, out, interner);
            }
        }
        // Entering a lambda or comprehension always crosses a scope
        // boundary, regardless of whether we were already inside one.
        Expr::Lambda(e) => scan_expr_for_captures(&e.body, true, out, interner),
        Expr::ListComp(e) => {
            scan_expr_for_captures(&e.elt, true, out, interner);
            scan_comprehensions(&e.generators, out, interner);
        }
        Expr::SetComp(e) => {
            scan_expr_for_captures(&e.elt, true, out, interner);
            scan_comprehensions(&e.generators, out, interner);
        }
        Expr::DictComp(e) => {
            scan_expr_for_captures(&e.key, true, out, interner);
            scan_expr_for_captures(&e.value, true, out, interner);
            scan_comprehensions(&e.generators, out, interner);
        }
        Expr::Generator(e) => {
            scan_expr_for_captures(&e.elt, true, out, interner);
            scan_comprehensions(&e.generators, out, interner);
        }
        _ => {}
    }
}

fn scan_comprehensions(generators: &[ruff_python_ast::Comprehension], out: &mut AHashSet<StringId>, interner: &Interner) {
    for gen in generators {
        // The outermost iterable executes in the enclosing scope, not the
        // comprehension's own scope, but by the time Pass B runs we are
        // already inside an inner scope (the comprehension itself), so
        // every name here is a capture candidate either way.
        scan_expr_for_captures(&gen.iter, true, out, interner);
        for cond in &gen.ifs {
            scan_expr_for_captures(cond, true, out, interner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruff_python_parser::parse_module;

    #[test]
    fn pass_a_predefines_assigned_names() {
        let module = parse_module("def f():\n    x = 1\n    return x\n")
            .expect("valid test source")
            .into_syntax();
        let Stmt::FunctionDef(f) = &module.body[0] else { unreachable!() };
        let mut arena = SymbolTableArena::new();
        let root = arena.push(ScopeKind::Module, None);
        let scope = arena.push(ScopeKind::Function, Some(root));
        let interner = Interner::new();
        run_pass_a(&mut arena, scope, &f.body, &interner);
        let (sym, found) = arena.resolve(scope, interner.intern("x"));
        assert!(found);
        assert_eq!(sym.scope, crate::symtab::SymbolScope::Local);
    }

    #[test]
    fn pass_b_promotes_captured_local_to_cell() {
        let module = parse_module("def outer():\n    x = 1\n    def inner():\n        return x\n    return inner\n")
            .expect("valid test source")
            .into_syntax();
        let Stmt::FunctionDef(f) = &module.body[0] else { unreachable!() };
        let mut arena = SymbolTableArena::new();
        let root = arena.push(ScopeKind::Module, None);
        let scope = arena.push(ScopeKind::Function, Some(root));
        let interner = Interner::new();
        run_pass_a(&mut arena, scope, &f.body, &interner);
        run_pass_b(&mut arena, scope, &f.body, &interner);
        let sym = arena.lookup_local(scope, interner.intern("x")).unwrap();
        assert_eq!(sym.scope, crate::symtab::SymbolScope::Cell);
    }
}
