//! Integration tests pinning the concrete scenarios this compiler core is
//! expected to handle: fusion shapes the peephole optimizer must produce,
//! the closure/cell wiring Pass B drives, constant-branch pruning, pattern-
//! match-with-star codegen, `except*` group handling, and the walrus
//! operator's scoping inside a comprehension.

use pycc::{decode_at, compile_source, CompileOutput, ConstValue, Opcode, StringId};

fn compile_ok(source: &str) -> CompileOutput {
    let out = compile_source(source, "scenario.py");
    assert!(out.diagnostics.is_empty(), "unexpected diagnostics: {:?}", out.diagnostics);
    out
}

fn opcodes(code: &pycc::Code) -> Vec<Opcode> {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < code.code.len() {
        let (op, _arg, len) = decode_at(&code.code, pc);
        out.push(op);
        pc += len;
    }
    out
}

fn count(code: &pycc::Code, op: Opcode) -> usize {
    opcodes(code).into_iter().filter(|&o| o == op).count()
}

/// Finds the nested code object (from a `def`/lambda/comprehension) whose
/// `name` string resolves to `name`, searching recursively.
fn find_nested_code<'a>(code: &'a pycc::Code, name: &str) -> Option<&'a pycc::Code> {
    for c in &code.constants {
        if let ConstValue::Code(nested) = c {
            if pycc::Interner::new().resolve(nested.name) == name {
                return Some(nested);
            }
            if let Some(found) = find_nested_code(nested, name) {
                return Some(found);
            }
        }
    }
    None
}

fn has_name(names: &[StringId], s: &str) -> bool {
    let interner = pycc::Interner::new();
    names.iter().any(|&id| interner.resolve(id) == s)
}

#[test]
fn increment_fusion() {
    // Module-level names resolve to globals, not fast locals, so the fusable
    // `LOAD_FAST i; LOAD_CONST 1; BINARY_ADD; STORE_FAST i` shape only shows
    // up inside a function body.
    let out = compile_ok("def f():\n    i = 0\n    i = i + 1\n    return i\n");
    let f = find_nested_code(&out.code, "f").expect("f compiled");
    assert_eq!(count(f, Opcode::IncrementFast), 1);
    assert_eq!(count(f, Opcode::BinaryAdd), 0);
}

#[test]
fn closure_capture_from_assignment() {
    let out = compile_ok("def outer():\n    x = 1\n    def inner():\n        return x\n    return inner\n");
    let outer = find_nested_code(&out.code, "outer").expect("outer function compiled");
    let interner = pycc::Interner::new();
    assert!(outer.cell_vars.iter().any(|&id| interner.resolve(id) == "x"));
    assert!(count(outer, Opcode::StoreDeref) >= 1);
    assert_eq!(count(outer, Opcode::StoreFast), 0);

    let inner = find_nested_code(outer, "inner").expect("inner function compiled");
    assert!(inner.free_vars.iter().any(|&id| interner.resolve(id) == "x"));
    assert!(count(inner, Opcode::LoadDeref) >= 1);
}

#[test]
fn constant_branch_pruning() {
    let out = compile_ok("if False:\n    unreachable()\nelse:\n    reached()\n");
    assert!(has_name(&out.code.names, "reached"));
    assert!(!has_name(&out.code.names, "unreachable"));
}

#[test]
fn pattern_match_with_star() {
    let out = compile_ok("match xs:\n    case [a, *rest, b]:\n        f(a, rest, b)\n    case _:\n        g()\n");
    let ops = opcodes(&out.code);
    assert!(ops.contains(&Opcode::MatchSequence));
    assert!(ops.contains(&Opcode::ExtractStar));
    assert!(has_name(&out.code.names, "f"));
    assert!(has_name(&out.code.names, "g"));
}

#[test]
fn exception_group_handlers_compile() {
    let out = compile_ok(
        "try:\n    raise ExceptionGroup('g', [ValueError('v'), TypeError('t')])\nexcept* ValueError as e:\n    got_v = e\nexcept* TypeError:\n    got_t = True\n",
    );
    let ops = opcodes(&out.code);
    assert!(ops.contains(&Opcode::SetupExceptStar));
    assert!(ops.contains(&Opcode::ExceptStarMatch));
}

#[test]
fn exception_group_mixed_with_classic_except_is_rejected() {
    let result = compile_source(
        "try:\n    pass\nexcept* ValueError:\n    pass\nexcept TypeError:\n    pass\n",
        "scenario.py",
    );
    assert!(!result.diagnostics.is_empty(), "mixing except* with a classic except must be a compile diagnostic");
}

#[test]
fn assignment_expression_in_comprehension_escapes_to_enclosing_scope() {
    // The walrus target's nearest non-comprehension enclosing scope here is
    // the module itself, not a function, so it escapes as an ordinary global
    // (`LOAD_GLOBAL`/`STORE_GLOBAL` against the names pool) rather than a
    // cell — cells only arise when the escape crosses a function boundary.
    let out = compile_ok("squares = [y for x in range(3) if (y := x * x) > 0]\n");
    assert!(has_name(&out.code.names, "y"));
    assert!(!out.code.cell_vars.iter().any(|&id| pycc::Interner::new().resolve(id) == "y"));

    let listcomp = find_nested_code(&out.code, "<comprehension>").expect("comprehension compiled as its own code object");
    assert!(has_name(&listcomp.names, "y"));
    assert!(!listcomp.free_vars.iter().any(|&id| pycc::Interner::new().resolve(id) == "y"));
}

#[test]
fn class_body_global_and_nonlocal_bypass_the_class_namespace() {
    // `global y` in the class body means `y = 1` must resolve as an ordinary
    // global store against the names pool, not a class-namespace `STORE_NAME`.
    let out = compile_ok("class C:\n    global y\n    y = 1\n");
    let interner = pycc::Interner::new();
    let c = find_nested_code(&out.code, "C").expect("class body compiled as its own code object");
    assert!(count(c, Opcode::StoreGlobal) >= 1);
    assert_eq!(count(c, Opcode::StoreName), 0);

    // `nonlocal x` in a class nested inside a function promotes the
    // enclosing local to a cell, so the class body must store through
    // `STORE_DEREF`, never through the class namespace.
    let out = compile_ok("def make():\n    x = 1\n    class C:\n        nonlocal x\n        x = 2\n    return x\n");
    let make = find_nested_code(&out.code, "make").expect("make function compiled");
    assert!(make.cell_vars.iter().any(|&id| interner.resolve(id) == "x"));
    let c2 = find_nested_code(make, "C").expect("nested class body compiled");
    assert!(count(c2, Opcode::StoreDeref) >= 1);
    assert_eq!(count(c2, Opcode::StoreName), 0);
}

#[test]
fn lambda_in_comprehension_promotes_target_to_cell_before_store() {
    // The lambda element references the loop target `x`; the capture-scan
    // over the comprehension's own elements must run before any `for`-target
    // store is emitted, so `x` is a cell from the very first store onward —
    // never a `STORE_FAST` that a later pass would have to retroactively fix.
    let out = compile_ok("fns = [lambda: x for x in range(3)]\n");
    let comp = find_nested_code(&out.code, "<comprehension>").expect("comprehension compiled as its own code object");
    let interner = pycc::Interner::new();
    assert_eq!(count(comp, Opcode::StoreFast), 0);
    assert!(count(comp, Opcode::StoreDeref) >= 1);
    assert!(comp.cell_vars.iter().any(|&id| interner.resolve(id) == "x"));

    let lambda = find_nested_code(comp, "<lambda>").expect("lambda compiled as its own code object");
    assert!(lambda.free_vars.iter().any(|&id| interner.resolve(id) == "x"));
    assert!(count(lambda, Opcode::LoadDeref) >= 1);
}
