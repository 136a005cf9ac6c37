//! An AST-to-bytecode compiler core for a Python-like dynamic language:
//! lexical scope analysis, bytecode emission (including pattern-matching
//! codegen), and a multi-pass optimizer. Parsing, the runtime, and module
//! loading live outside this crate.
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the bytecode format")]
#![expect(clippy::too_many_arguments, reason = "code-object construction needs wide signatures")]
#![expect(clippy::unreadable_literal, reason = "fixture constants keep canonical forms")]
#![expect(clippy::float_cmp, reason = "constant-folding tests require exact float comparison")]

mod ast_walk;
mod bytecode;
mod compiler;
mod diagnostics;
mod intern;
mod optimizer;
mod prescan;
mod symtab;

pub use crate::bytecode::builder::{compute_stack_size, decode_at};
pub use crate::bytecode::{Code, CodeFlags, ConstValue, LineEntry, Opcode};
pub use crate::compiler::{compile_module, compile_source, CompileOutput, CompilerOptions};
pub use crate::diagnostics::{CodeRange, CompileError, LineIndex};
pub use crate::intern::{Interner, StringId};
