//! The `Code` object: a finished unit of compiled bytecode plus its pools.

use indexmap::IndexSet;
use num_bigint::BigInt;

use crate::intern::StringId;

/// A constant-pool entry.
///
/// Covers every literal kind the emitter can produce a `LOAD_CONST` for.
/// Values are compared and hashed structurally so the builder can
/// deduplicate the pool; floats use their bit pattern so `NaN`/`-0.0`
/// constants dedupe the way CPython's `co_consts` does (by identity of bit
/// pattern, not IEEE equality).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ConstValue {
    None,
    Ellipsis,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Complex { re: f64, im: f64 },
    Str(String),
    Bytes(Vec<u8>),
    /// A nested code object, produced for every `def`/`lambda`/comprehension.
    Code(Box<Code>),
    /// A tuple of constants, used for frozen literal tuples and for the
    /// positional-defaults/keyword-names tuples `MAKE_FUNCTION`/`CALL_KW`
    /// read from the pool rather than building on the stack.
    Tuple(Vec<ConstValue>),
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) | (Self::Ellipsis, Self::Ellipsis) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Complex { re: ar, im: ai }, Self::Complex { re: br, im: bi }) => {
                ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits()
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Code(a), Self::Code(b)) => std::ptr::eq(a.as_ref(), b.as_ref()),
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstValue {}

impl std::hash::Hash for ConstValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::None | Self::Ellipsis => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Complex { re, im } => {
                re.to_bits().hash(state);
                im.to_bits().hash(state);
            }
            Self::Str(s) => s.hash(state),
            Self::Bytes(b) => b.hash(state),
            Self::Code(c) => std::ptr::hash(c.as_ref(), state),
            Self::Tuple(items) => items.hash(state),
        }
    }
}

/// Bitset over the per-code-object flags named in the code-object record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeFlags(u16);

impl CodeFlags {
    pub const VAR_ARGS: Self = Self(1 << 0);
    pub const VAR_KEYWORDS: Self = Self(1 << 1);
    pub const GENERATOR: Self = Self(1 << 2);
    pub const COROUTINE: Self = Self(1 << 3);
    pub const ASYNC_GENERATOR: Self = Self(1 << 4);

    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for CodeFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Maps a byte offset (the start of a statement's first instruction) to a
/// source line number. Entries are kept monotonic in `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LineEntry {
    pub offset: u32,
    pub line: u32,
}

/// A finished, self-contained unit of compiled bytecode.
///
/// Every jump argument is an absolute byte offset into `code`; every index
/// into `constants`/`names`/`var_names`/a cell or free slot is valid for
/// the lifetime of this object, per the code-object invariant.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Code {
    pub code: Vec<u8>,
    pub constants: Vec<ConstValue>,
    pub names: Vec<StringId>,
    pub var_names: Vec<StringId>,
    pub free_vars: Vec<StringId>,
    pub cell_vars: Vec<StringId>,
    pub arg_count: u32,
    pub kw_only_arg_count: u32,
    pub flags: CodeFlags,
    pub stack_size: u32,
    pub first_line: u32,
    pub line_table: Vec<LineEntry>,
    pub name: StringId,
    pub filename: StringId,
}

impl Code {
    /// The source line covering `offset`, or `first_line` if `offset`
    /// precedes every recorded entry.
    #[must_use]
    pub fn line_at(&self, offset: u32) -> u32 {
        match self.line_table.binary_search_by_key(&offset, |e| e.offset) {
            Ok(idx) => self.line_table[idx].line,
            Err(0) => self.first_line,
            Err(idx) => self.line_table[idx - 1].line,
        }
    }
}

/// Deduplicating pool builder shared by the constant, name, and local pools.
///
/// `ConstValue::Code` is deliberately excluded from structural dedup beyond
/// pointer identity (see its `PartialEq` arm above) since two textually
/// identical nested functions are still distinct code objects.
#[derive(Debug, Default)]
pub struct Pool<T: std::hash::Hash + Eq + Clone> {
    set: IndexSet<PoolKey<T>>,
}

#[derive(Debug, Clone)]
struct PoolKey<T>(T);

impl<T: PartialEq> PartialEq for PoolKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T: Eq> Eq for PoolKey<T> {}
impl<T: std::hash::Hash> std::hash::Hash for PoolKey<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T: std::hash::Hash + Eq + Clone> Pool<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { set: IndexSet::new() }
    }

    /// Interns `value`, returning its stable index in the pool.
    pub fn intern(&mut self, value: T) -> u32 {
        let (idx, _) = self.set.insert_full(PoolKey(value));
        u32::try_from(idx).expect("pool grew past u32::MAX entries")
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.set.into_iter().map(|k| k.0).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_dedupes_equal_values() {
        let mut pool: Pool<StringId> = Pool::new();
        let interner = crate::intern::Interner::new();
        let a = pool.intern(interner.intern("x"));
        let b = pool.intern(interner.intern("x"));
        assert_eq!(a, b);
    }

    #[test]
    fn const_value_float_dedupes_by_bit_pattern() {
        assert_eq!(ConstValue::Float(0.0), ConstValue::Float(0.0));
        assert_ne!(ConstValue::Float(0.0), ConstValue::Float(-0.0));
    }

    #[test]
    fn line_at_falls_back_to_previous_entry() {
        let code = Code {
            code: vec![],
            constants: vec![],
            names: vec![],
            var_names: vec![],
            free_vars: vec![],
            cell_vars: vec![],
            arg_count: 0,
            kw_only_arg_count: 0,
            flags: CodeFlags::empty(),
            stack_size: 0,
            first_line: 1,
            line_table: vec![LineEntry { offset: 0, line: 1 }, LineEntry { offset: 10, line: 2 }],
            name: crate::intern::Interner::new().intern("<module>"),
            filename: crate::intern::Interner::new().intern("t.py"),
        };
        assert_eq!(code.line_at(5), 1);
        assert_eq!(code.line_at(10), 2);
        assert_eq!(code.line_at(100), 2);
    }
}
