//! AST-level optimization (§4.10a): constant folding, strength reduction,
//! dead-code elimination, branch folding, and loop-invariant code motion.
//!
//! Every transform here only clones, reorders, or truncates nodes that
//! already exist in the tree being compiled — none of it fabricates a new
//! `Expr`/`Stmt` node from scratch. Constant folding and the non-fully-
//! reducing strength-reduction rules are expressed instead as plain values
//! ([`Lit`]/[`BinOpReduction`]) consulted by the emitter, since it already
//! knows how to turn a value into a `LOAD_CONST` or an alternate opcode
//! without needing a literal `Expr` node to hold it.

use std::collections::HashSet;

use num_bigint::BigInt;
use ruff_python_ast::{self as ast, BoolOp as AstBoolOp, Expr, Number, Operator, Stmt, UnaryOp};

use crate::bytecode::ConstValue;

// ---------------------------------------------------------------------
// Statement-level passes: DCE, branch folding, loop-invariant code motion.
// ---------------------------------------------------------------------

/// Rewrites a statement list per §4.10a. Recurses into compound-statement
/// bodies but not into `FunctionDef`/`ClassDef` bodies, mirroring
/// [`crate::ast_walk`]'s scope boundary — those get their own call at each
/// child-scope-creation call site instead.
pub fn optimize_stmts(stmts: &[Stmt]) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        for expanded in optimize_stmt(stmt) {
            let terminates = is_unconditional_terminator(&expanded);
            out.push(expanded);
            if terminates {
                // Dead code elimination: nothing after an unconditional
                // terminator is reachable, in this block or any sibling
                // statement that would have followed it.
                return out;
            }
        }
    }
    out
}

fn is_unconditional_terminator(stmt: &Stmt) -> bool {
    matches!(stmt, Stmt::Return(_) | Stmt::Raise(_) | Stmt::Break(_) | Stmt::Continue(_))
}

/// A statement may expand to zero statements (a branch folded away
/// entirely), one (the common case), or several (loop-invariant hoists
/// prepended ahead of the loop they were pulled out of).
fn optimize_stmt(stmt: &Stmt) -> Vec<Stmt> {
    match stmt {
        Stmt::If(s) => optimize_if(s),
        Stmt::While(s) => optimize_while(s),
        Stmt::For(s) => optimize_for(s),
        Stmt::With(s) => {
            let mut s2 = s.clone();
            s2.body = optimize_stmts(&s.body);
            vec![Stmt::With(s2)]
        }
        Stmt::Try(s) => vec![optimize_try(s)],
        Stmt::Match(s) => vec![optimize_match(s)],
        other => vec![other.clone()],
    }
}

/// Branch folding (§4.10a): `if True: a else: b` → `a`; `if False: a else: b`
/// → `b`; an empty/absent else collapses a false branch to nothing. Only
/// folds when the *entire* chain resolves statically (every test up to the
/// winning branch is a literal bool) — a test that can't be resolved bails
/// out and keeps the `if` as an ordinary statement, since reconstructing a
/// partial elif chain would mean synthesizing a new `StmtIf`, which this
/// pass deliberately never does.
fn optimize_if(s: &ast::StmtIf) -> Vec<Stmt> {
    if let Some(winner) = resolve_static_branch(s) {
        return winner;
    }
    let mut s2 = s.clone();
    s2.body = optimize_stmts(&s.body);
    for clause in &mut s2.elif_else_clauses {
        clause.body = optimize_stmts(&clause.body);
    }
    vec![Stmt::If(s2)]
}

fn resolve_static_branch(s: &ast::StmtIf) -> Option<Vec<Stmt>> {
    let mut value = as_bool_literal(&s.test)?;
    if value {
        return Some(optimize_stmts(&s.body));
    }
    for clause in &s.elif_else_clauses {
        match &clause.test {
            None => return Some(optimize_stmts(&clause.body)),
            Some(test) => {
                value = as_bool_literal(test)?;
                if value {
                    return Some(optimize_stmts(&clause.body));
                }
            }
        }
    }
    Some(Vec::new())
}

/// Loop-invariant code motion (§4.10a): a run of leading `v = rhs`
/// assignments is hoisted above the loop when `rhs` is pure, references no
/// name the loop modifies (including its own target), and (for `while`)
/// isn't read by the loop condition.
fn optimize_while(s: &ast::StmtWhile) -> Vec<Stmt> {
    let (hoisted, body) = hoist_invariants(&s.body, Some(&s.test), HashSet::new());
    let mut s2 = s.clone();
    s2.body = optimize_stmts(&body);
    s2.orelse = optimize_stmts(&s.orelse);
    let mut out = hoisted;
    out.push(Stmt::While(s2));
    out
}

fn optimize_for(s: &ast::StmtFor) -> Vec<Stmt> {
    let mut modified = HashSet::new();
    collect_target_names(&s.target, &mut modified);
    let (hoisted, body) = hoist_invariants(&s.body, None, modified);
    let mut s2 = s.clone();
    s2.body = optimize_stmts(&body);
    s2.orelse = optimize_stmts(&s.orelse);
    let mut out = hoisted;
    out.push(Stmt::For(s2));
    out
}

fn optimize_try(s: &ast::StmtTry) -> Stmt {
    let mut s2 = s.clone();
    s2.body = optimize_stmts(&s.body);
    s2.handlers = s
        .handlers
        .iter()
        .map(|h| {
            let ast::ExceptHandler::ExceptHandler(h) = h;
            let mut h2 = h.clone();
            h2.body = optimize_stmts(&h.body);
            ast::ExceptHandler::ExceptHandler(h2)
        })
        .collect();
    s2.orelse = optimize_stmts(&s.orelse);
    s2.finalbody = optimize_stmts(&s.finalbody);
    Stmt::Try(s2)
}

fn optimize_match(s: &ast::StmtMatch) -> Stmt {
    let mut s2 = s.clone();
    s2.cases = s
        .cases
        .iter()
        .map(|c| {
            let mut c2 = c.clone();
            c2.body = optimize_stmts(&c.body);
            c2
        })
        .collect();
    Stmt::Match(s2)
}

fn hoist_invariants(body: &[Stmt], test: Option<&Expr>, mut modified: HashSet<String>) -> (Vec<Stmt>, Vec<Stmt>) {
    collect_stores(body, &mut modified);

    let mut split = 0;
    for stmt in body {
        let Stmt::Assign(a) = stmt else { break };
        let [Expr::Name(n)] = a.targets.as_slice() else { break };
        if !is_pure_expr(&a.value) || expr_references_any(&a.value, &modified) {
            break;
        }
        if let Some(t) = test {
            let mut single = HashSet::new();
            single.insert(n.id.to_string());
            if expr_references_any(t, &single) {
                break;
            }
        }
        split += 1;
    }
    (body[..split].to_vec(), body[split..].to_vec())
}

fn collect_stores(stmts: &[Stmt], out: &mut HashSet<String>) {
    for stmt in stmts {
        collect_stmt_stores(stmt, out);
    }
}

fn collect_stmt_stores(stmt: &Stmt, out: &mut HashSet<String>) {
    match stmt {
        Stmt::Assign(s) => {
            for t in &s.targets {
                collect_target_names(t, out);
            }
        }
        Stmt::AugAssign(s) => collect_target_names(&s.target, out),
        Stmt::AnnAssign(s) => collect_target_names(&s.target, out),
        Stmt::For(s) => {
            collect_target_names(&s.target, out);
            collect_stores(&s.body, out);
            collect_stores(&s.orelse, out);
        }
        Stmt::While(s) => {
            collect_stores(&s.body, out);
            collect_stores(&s.orelse, out);
        }
        Stmt::If(s) => {
            collect_stores(&s.body, out);
            for c in &s.elif_else_clauses {
                collect_stores(&c.body, out);
            }
        }
        Stmt::With(s) => {
            for item in &s.items {
                if let Some(v) = &item.optional_vars {
                    collect_target_names(v, out);
                }
            }
            collect_stores(&s.body, out);
        }
        Stmt::Try(s) => {
            collect_stores(&s.body, out);
            for h in &s.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = h;
                if let Some(name) = &h.name {
                    out.insert(name.to_string());
                }
                collect_stores(&h.body, out);
            }
            collect_stores(&s.orelse, out);
            collect_stores(&s.finalbody, out);
        }
        Stmt::Match(s) => {
            for case in &s.cases {
                collect_pattern_names(&case.pattern, out);
                collect_stores(&case.body, out);
            }
        }
        Stmt::Global(s) => {
            for name in &s.names {
                out.insert(name.to_string());
            }
        }
        Stmt::Nonlocal(s) => {
            for name in &s.names {
                out.insert(name.to_string());
            }
        }
        Stmt::Import(s) => {
            for alias in &s.names {
                out.insert(alias.asname.as_ref().unwrap_or(&alias.name).to_string());
            }
        }
        Stmt::ImportFrom(s) => {
            for alias in &s.names {
                out.insert(alias.asname.as_ref().unwrap_or(&alias.name).to_string());
            }
        }
        Stmt::FunctionDef(s) => {
            out.insert(s.name.to_string());
        }
        Stmt::ClassDef(s) => {
            out.insert(s.name.to_string());
        }
        _ => {}
    }
}

fn collect_target_names(target: &Expr, out: &mut HashSet<String>) {
    match target {
        Expr::Name(n) => {
            out.insert(n.id.to_string());
        }
        Expr::Tuple(t) => t.elts.iter().for_each(|e| collect_target_names(e, out)),
        Expr::List(l) => l.elts.iter().for_each(|e| collect_target_names(e, out)),
        Expr::Starred(s) => collect_target_names(&s.value, out),
        // Attribute/subscript targets mutate an existing object rather than
        // rebind a name, so they don't widen the "modified names" set.
        _ => {}
    }
}

fn collect_pattern_names(pattern: &ast::Pattern, out: &mut HashSet<String>) {
    use ast::Pattern;
    match pattern {
        Pattern::MatchAs(p) => {
            if let Some(n) = &p.name {
                out.insert(n.to_string());
            }
            if let Some(inner) = &p.pattern {
                collect_pattern_names(inner, out);
            }
        }
        Pattern::MatchStar(p) => {
            if let Some(n) = &p.name {
                out.insert(n.to_string());
            }
        }
        Pattern::MatchSequence(p) => p.patterns.iter().for_each(|sub| collect_pattern_names(sub, out)),
        Pattern::MatchMapping(p) => {
            p.patterns.iter().for_each(|sub| collect_pattern_names(sub, out));
            if let Some(rest) = &p.rest {
                out.insert(rest.to_string());
            }
        }
        Pattern::MatchClass(p) => {
            p.arguments.patterns.iter().for_each(|sub| collect_pattern_names(sub, out));
            p.arguments.keywords.iter().for_each(|kw| collect_pattern_names(&kw.pattern, out));
        }
        Pattern::MatchOr(p) => p.patterns.iter().for_each(|sub| collect_pattern_names(sub, out)),
        _ => {}
    }
}

fn expr_references_any(expr: &Expr, names: &HashSet<String>) -> bool {
    match expr {
        Expr::Name(n) => names.contains(n.id.as_str()),
        Expr::UnaryOp(e) => expr_references_any(&e.operand, names),
        Expr::BinOp(e) => expr_references_any(&e.left, names) || expr_references_any(&e.right, names),
        Expr::BoolOp(e) => e.values.iter().any(|v| expr_references_any(v, names)),
        Expr::Compare(e) => expr_references_any(&e.left, names) || e.comparators.iter().any(|c| expr_references_any(c, names)),
        Expr::Call(e) => e.arguments.args.iter().any(|a| expr_references_any(a, names)),
        _ => false,
    }
}

// ---------------------------------------------------------------------
// Purity and static-type predicates, shared by LICM and strength reduction.
// ---------------------------------------------------------------------

const SAFE_BUILTINS: [&str; 8] = ["len", "abs", "min", "max", "int", "float", "str", "bool"];

/// An expression with no observable side effect, per §4.10a: literals,
/// names, pure operators over pure operands, and calls to the closed set
/// of known-pure builtins. Calls to anything else, collection literals,
/// attribute access, and subscripting are all treated as impure, since any
/// of them may run arbitrary user code (`__getattr__`, `__getitem__`,
/// `__init__`, ...).
pub fn is_pure_expr(expr: &Expr) -> bool {
    match expr {
        Expr::NumberLiteral(_)
        | Expr::StringLiteral(_)
        | Expr::BytesLiteral(_)
        | Expr::BooleanLiteral(_)
        | Expr::NoneLiteral(_)
        | Expr::EllipsisLiteral(_)
        | Expr::Name(_) => true,
        Expr::UnaryOp(e) => is_pure_expr(&e.operand),
        Expr::BinOp(e) => is_pure_expr(&e.left) && is_pure_expr(&e.right),
        Expr::BoolOp(e) => e.values.iter().all(is_pure_expr),
        Expr::Compare(e) => is_pure_expr(&e.left) && e.comparators.iter().all(is_pure_expr),
        Expr::Call(e) => match e.func.as_ref() {
            Expr::Name(n) if SAFE_BUILTINS.contains(&n.id.as_str()) => {
                e.arguments.keywords.is_empty() && e.arguments.args.iter().all(is_pure_expr)
            }
            _ => false,
        },
        _ => false,
    }
}

/// True when `expr` is statically known to produce an integer, per
/// §4.10a's gate on `x * 2**k → x << k` (a float shifted would be wrong).
pub fn is_int_typed(expr: &Expr) -> bool {
    match expr {
        Expr::NumberLiteral(e) => matches!(e.value, Number::Int(_)),
        Expr::UnaryOp(e) => matches!(e.op, UnaryOp::Invert | UnaryOp::USub | UnaryOp::UAdd) && is_int_typed(&e.operand),
        Expr::BinOp(e) => matches!(
            e.op,
            Operator::FloorDiv | Operator::Mod | Operator::BitAnd | Operator::BitOr | Operator::BitXor | Operator::LShift | Operator::RShift
        ),
        Expr::Call(e) => matches!(e.func.as_ref(), Expr::Name(n) if n.id.as_str() == "int"),
        _ => false,
    }
}

pub fn as_bool_literal(expr: &Expr) -> Option<bool> {
    match expr {
        Expr::BooleanLiteral(e) => Some(e.value),
        _ => None,
    }
}

fn as_int_literal(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::NumberLiteral(e) => match &e.value {
            Number::Int(i) => i.as_i64(),
            _ => None,
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------
// Constant folding (§4.10a).
// ---------------------------------------------------------------------

/// An intermediate folded value, kept separate from [`ConstValue`] only so
/// the arithmetic below can work in plain `i64`/`f64`/`bool` before a
/// single conversion at the end.
#[derive(Clone)]
enum Lit {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

/// Recursively folds `expr` to a constant, honoring every safety rail in
/// §4.10a: no division/modulo by a literal zero, no `**` with a negative
/// or oversized exponent, no fold that would overflow native 64-bit
/// integer range or produce NaN/`inf`, and string repetition capped at
/// 1000 reps. Returns `None` (leaving the original expression to compile
/// normally) the moment any of these would be violated, never panics.
pub fn try_fold_const(expr: &Expr) -> Option<ConstValue> {
    lit_to_const(fold_lit(expr)?)
}

fn fold_lit(expr: &Expr) -> Option<Lit> {
    if let Some(lit) = literal_of(expr) {
        return Some(lit);
    }
    match expr {
        Expr::UnaryOp(e) => fold_unary(e.op, fold_lit(&e.operand)?),
        Expr::BinOp(e) => fold_binary(e.op, fold_lit(&e.left)?, fold_lit(&e.right)?),
        Expr::BoolOp(e) => fold_bool_op(e.op, &e.values),
        _ => None,
    }
}

fn literal_of(expr: &Expr) -> Option<Lit> {
    match expr {
        Expr::NumberLiteral(e) => match &e.value {
            Number::Int(i) => i.as_i64().map(Lit::Int),
            Number::Float(f) => Some(Lit::Float(*f)),
            // Complex constants fold fine as plain literals already (§4.4);
            // arithmetic over them is outside this fold's safety rails.
            Number::Complex { .. } => None,
        },
        Expr::BooleanLiteral(e) => Some(Lit::Bool(e.value)),
        Expr::StringLiteral(e) => Some(Lit::Str(e.value.to_string())),
        Expr::NoneLiteral(_) => Some(Lit::None),
        _ => None,
    }
}

fn fold_unary(op: UnaryOp, v: Lit) -> Option<Lit> {
    match (op, v) {
        (UnaryOp::USub, Lit::Int(i)) => i.checked_neg().map(Lit::Int),
        (UnaryOp::USub, Lit::Float(f)) => Some(Lit::Float(-f)),
        (UnaryOp::UAdd, v @ (Lit::Int(_) | Lit::Float(_))) => Some(v),
        (UnaryOp::Invert, Lit::Int(i)) => Some(Lit::Int(!i)),
        (UnaryOp::Not, Lit::Bool(b)) => Some(Lit::Bool(!b)),
        (UnaryOp::Not, Lit::Int(i)) => Some(Lit::Bool(i == 0)),
        (UnaryOp::Not, Lit::Float(f)) => Some(Lit::Bool(f == 0.0)),
        (UnaryOp::Not, Lit::Str(s)) => Some(Lit::Bool(s.is_empty())),
        (UnaryOp::Not, Lit::None) => Some(Lit::Bool(true)),
        _ => None,
    }
}

fn fold_binary(op: Operator, l: Lit, r: Lit) -> Option<Lit> {
    match (l, r) {
        (Lit::Int(a), Lit::Int(b)) => fold_int_binary(op, a, b),
        (Lit::Float(a), Lit::Float(b)) => fold_float_binary(op, a, b),
        (Lit::Int(a), Lit::Float(b)) => fold_float_binary(op, a as f64, b),
        (Lit::Float(a), Lit::Int(b)) => fold_float_binary(op, a, b as f64),
        (Lit::Str(a), Lit::Str(b)) if op == Operator::Add => Some(Lit::Str(a + &b)),
        (Lit::Str(a), Lit::Int(n)) | (Lit::Int(n), Lit::Str(a)) if op == Operator::Mult => fold_str_repeat(a, n),
        _ => None,
    }
}

fn fold_str_repeat(s: String, n: i64) -> Option<Lit> {
    if n > 1000 {
        return None;
    }
    Some(Lit::Str(s.repeat(n.max(0) as usize)))
}

fn fold_int_binary(op: Operator, a: i64, b: i64) -> Option<Lit> {
    match op {
        Operator::Add => a.checked_add(b).map(Lit::Int),
        Operator::Sub => a.checked_sub(b).map(Lit::Int),
        Operator::Mult => a.checked_mul(b).map(Lit::Int),
        Operator::Div if b != 0 => Some(Lit::Float(a as f64 / b as f64)),
        Operator::FloorDiv if b != 0 => Some(Lit::Int(a.div_euclid(b))),
        Operator::Mod if b != 0 => Some(Lit::Int(a.rem_euclid(b))),
        Operator::Pow if (0..=63).contains(&b) => a.checked_pow(b as u32).map(Lit::Int),
        Operator::LShift if (0..64).contains(&b) => a.checked_shl(b as u32).map(Lit::Int),
        Operator::RShift if (0..64).contains(&b) => Some(Lit::Int(a >> b)),
        Operator::BitAnd => Some(Lit::Int(a & b)),
        Operator::BitOr => Some(Lit::Int(a | b)),
        Operator::BitXor => Some(Lit::Int(a ^ b)),
        _ => None,
    }
}

fn fold_float_binary(op: Operator, a: f64, b: f64) -> Option<Lit> {
    let result = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => a / b,
        Operator::FloorDiv => (a / b).floor(),
        Operator::Mod => a.rem_euclid(b),
        Operator::Pow => a.powf(b),
        _ => return None,
    };
    if result.is_nan() || result.is_infinite() {
        return None;
    }
    Some(Lit::Float(result))
}

fn fold_bool_op(op: AstBoolOp, values: &[Expr]) -> Option<Lit> {
    let mut lits = Vec::with_capacity(values.len());
    for v in values {
        lits.push(fold_lit(v)?);
    }
    let truthy = |l: &Lit| match l {
        Lit::Bool(b) => *b,
        Lit::Int(i) => *i != 0,
        Lit::Float(f) => *f != 0.0,
        Lit::Str(s) => !s.is_empty(),
        Lit::None => false,
    };
    let last = lits.len() - 1;
    let stop_early = match op {
        AstBoolOp::And => |t: bool| !t,
        AstBoolOp::Or => |t: bool| t,
    };
    for (i, lit) in lits.iter().enumerate() {
        if stop_early(truthy(lit)) || i == last {
            return Some(lit.clone());
        }
    }
    None
}

fn lit_to_const(lit: Lit) -> Option<ConstValue> {
    Some(match lit {
        Lit::Int(i) => ConstValue::Int(BigInt::from(i)),
        Lit::Float(f) => ConstValue::Float(f),
        Lit::Bool(b) => ConstValue::Bool(b),
        Lit::Str(s) => ConstValue::Str(s),
        Lit::None => ConstValue::None,
    })
}

// ---------------------------------------------------------------------
// Strength reduction (§4.10a) that isn't a full constant fold: the
// emitter compiles the surviving sub-expression(s) itself and applies one
// of these instead of the generic binary-op codegen.
// ---------------------------------------------------------------------

pub enum BinOpReduction<'e> {
    /// Compile `expr` and stop — its value already is the result.
    UseAsIs(&'e Expr),
    /// Compile `expr` once, for its side effect, then push `value` instead
    /// of the value the discarded arithmetic would have produced.
    ComputeThenConst(&'e Expr, ConstValue),
    /// Compile `expr` once, then shift left by `amount` instead of the
    /// original multiply.
    Shift(&'e Expr, u32),
    /// Compile `operand` once, `Dup` it, then multiply — instead of
    /// compiling it twice and raising to the power of two.
    Square(&'e Expr),
}

/// Matches the non-fully-reducing strength-reduction rules from §4.10a
/// against a `BinOp`'s operator and operands.
#[must_use]
pub fn reduce_binop<'e>(op: Operator, left: &'e Expr, right: &'e Expr) -> Option<BinOpReduction<'e>> {
    match op {
        Operator::Mult if is_zero_literal(right) => Some(BinOpReduction::ComputeThenConst(left, ConstValue::Int(BigInt::from(0)))),
        Operator::Mult if is_one_literal(right) => Some(BinOpReduction::UseAsIs(left)),
        Operator::Mult => power_of_two_exponent(right).filter(|_| is_int_typed(left)).map(|k| BinOpReduction::Shift(left, k)),
        Operator::Add if is_zero_literal(right) => Some(BinOpReduction::UseAsIs(left)),
        Operator::Sub if is_zero_literal(right) => Some(BinOpReduction::UseAsIs(left)),
        Operator::FloorDiv if is_one_literal(right) => Some(BinOpReduction::UseAsIs(left)),
        Operator::Mod if is_one_literal(right) => Some(BinOpReduction::ComputeThenConst(left, ConstValue::Int(BigInt::from(0)))),
        Operator::Pow if is_two_literal(right) && is_pure_expr(left) => Some(BinOpReduction::Square(left)),
        _ => None,
    }
}

fn is_zero_literal(expr: &Expr) -> bool {
    as_int_literal(expr) == Some(0)
}

fn is_one_literal(expr: &Expr) -> bool {
    as_int_literal(expr) == Some(1)
}

fn is_two_literal(expr: &Expr) -> bool {
    as_int_literal(expr) == Some(2)
}

fn power_of_two_exponent(expr: &Expr) -> Option<u32> {
    let n = as_int_literal(expr)?;
    if n < 2 || (n & (n - 1)) != 0 {
        return None;
    }
    Some(n.trailing_zeros())
}
