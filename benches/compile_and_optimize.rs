// Use codspeed-criterion-compat when running on CodSpeed (CI), real criterion otherwise (for flamegraphs)
#[cfg(codspeed)]
use codspeed_criterion_compat::{black_box, criterion_group, criterion_main, Bencher, Criterion};
#[cfg(not(codspeed))]
use criterion::{black_box, criterion_group, criterion_main, Bencher, Criterion};
use pycc::{compile_module, CompilerOptions, Interner};

/// Compiles `source` once with optimization as given, asserting it produced
/// no diagnostics, then times repeated compilation of the same source.
///
/// Unlike a runtime benchmark, loop trip counts in the source text don't
/// matter here — a `for` loop's body is compiled once regardless of how
/// many times it would run — so these snippets vary in AST shape and size
/// instead.
fn run_compile(bench: &mut Bencher, source: &str, optimize: bool) {
    let interner = Interner::new();
    let filename = interner.intern("bench.py");
    let options = CompilerOptions { optimize, ..CompilerOptions::new(filename) };
    let module = ruff_python_parser::parse_module(source).expect("fixture parses").into_syntax();

    let compile_once = || {
        let out = compile_module(&module, source, &options);
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        out
    };
    black_box(compile_once());

    bench.iter(|| {
        black_box(compile_once());
    });
}

const ARITHMETIC_LOOP: &str = "
def total(n):
    x = 1
    y = 2
    acc = 0
    for i in range(n):
        acc = acc + x + y
        acc += 1
        acc -= 1
    return acc
";

const PATTERN_MATCH_HEAVY: &str = "
def classify(value):
    match value:
        case [first, *rest] if len(rest) > 0:
            return first
        case {'kind': kind, **extra}:
            return kind
        case Point(x=0, y=0):
            return 'origin'
        case Point(x=x, y=y) if x == y:
            return x
        case _:
            return None
";

const NESTED_CLOSURES: &str = "
def make_counters(n):
    counters = []
    for i in range(n):
        start = i * 2
        def counter(step=1):
            nonlocal start
            start += step
            return start
        counters.append(counter)
    return counters
";

fn bench_arithmetic_loop(c: &mut Criterion) {
    c.bench_function("arithmetic_loop__optimized", |b| run_compile(b, ARITHMETIC_LOOP, true));
    c.bench_function("arithmetic_loop__unoptimized", |b| run_compile(b, ARITHMETIC_LOOP, false));
}

fn bench_pattern_match(c: &mut Criterion) {
    c.bench_function("pattern_match_heavy__optimized", |b| run_compile(b, PATTERN_MATCH_HEAVY, true));
    c.bench_function("pattern_match_heavy__unoptimized", |b| run_compile(b, PATTERN_MATCH_HEAVY, false));
}

fn bench_nested_closures(c: &mut Criterion) {
    c.bench_function("nested_closures__optimized", |b| run_compile(b, NESTED_CLOSURES, true));
    c.bench_function("nested_closures__unoptimized", |b| run_compile(b, NESTED_CLOSURES, false));
}

#[cfg(not(codspeed))]
criterion_group!(benches, bench_arithmetic_loop, bench_pattern_match, bench_nested_closures);

#[cfg(codspeed)]
criterion_group!(benches, bench_arithmetic_loop, bench_pattern_match, bench_nested_closures);

criterion_main!(benches);
