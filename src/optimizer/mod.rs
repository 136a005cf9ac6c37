//! Optimization (§4.10): an AST-level pass run before emission, and a
//! bytecode peephole pass run on each finished [`crate::bytecode::Code`].

mod ast_opt;
mod peephole;

pub use ast_opt::{optimize_stmts, reduce_binop, try_fold_const, BinOpReduction};
pub use peephole::optimize_code;
