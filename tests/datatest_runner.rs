//! Fixture-driven compiler tests: each `tests/fixtures/*.py` pairs with a
//! `*.expected` golden listing (diagnostics, or a recursive disassembly of
//! the compiled code object tree), compared byte-for-byte.

use std::path::Path;

use pycc::{compile_source, decode_at, Code, ConstValue, Interner};

fn render(source: &str) -> String {
    let out = compile_source(source, "fixture.py");
    if !out.diagnostics.is_empty() {
        let mut rendered = String::from("DIAGNOSTICS:\n");
        for diag in &out.diagnostics {
            rendered.push_str(&format!("{:?}: {}\n", diag.kind, diag.message));
        }
        return rendered;
    }
    let mut rendered = String::new();
    render_code(&out.code, 0, &mut rendered);
    rendered
}

fn render_code(code: &Code, depth: usize, out: &mut String) {
    let interner = Interner::new();
    let indent = "  ".repeat(depth);
    out.push_str(&format!(
        "{indent}CODE {} (argc={}, stack={})\n",
        interner.resolve(code.name),
        code.arg_count,
        code.stack_size
    ));
    let mut pc = 0;
    while pc < code.code.len() {
        let (op, arg, len) = decode_at(&code.code, pc);
        let name: &'static str = op.into();
        out.push_str(&format!("{indent}  {pc:04} {name} {arg}\n"));
        pc += len;
    }
    for constant in &code.constants {
        if let ConstValue::Code(nested) = constant {
            render_code(nested, depth + 1, out);
        }
    }
}

fn run_fixture(path: &Path) -> datatest_stable::Result<()> {
    let source = std::fs::read_to_string(path)?;
    let expected_path = path.with_extension("py.expected");
    let expected = std::fs::read_to_string(&expected_path)
        .unwrap_or_else(|_| panic!("missing golden file {}", expected_path.display()));
    let actual = render(&source);
    assert_eq!(actual, expected, "fixture {} does not match its golden listing", path.display());
    Ok(())
}

datatest_stable::harness!(run_fixture, "tests/fixtures", r"^.*\.py$");
