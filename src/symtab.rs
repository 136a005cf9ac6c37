//! Per-scope symbol tables and name resolution.
//!
//! Scopes form a chain back to the module scope. Resolution walks outward
//! on a miss, promoting Local bindings it passes through to Cell so the
//! capturing scope gets a Free slot, per the deref convention below.

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::intern::StringId;

/// Sentinel index used for symbols whose slot cannot be determined at
/// define time (an unresolved `nonlocal`, or a deferred-to-runtime Global).
pub const SENTINEL_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Class,
    Comprehension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Local,
    Global,
    Builtin,
    Free,
    Cell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub name: StringId,
    pub scope: SymbolScope,
    pub index: u32,
    /// The local slot this symbol occupied before being promoted to a
    /// cell, so that parameter-passing order stays stable. Equal to
    /// `index` for symbols that were never promoted.
    pub original_index: u32,
}

/// A single scope's symbol table, linked to its enclosing scope.
///
/// The enclosing-scope link is an index into an external arena
/// (`SymbolTableArena`) rather than a borrow, since scopes are built
/// top-down while child scopes need to mutate their parent (cell
/// promotion) after the parent already exists.
pub struct SymbolTable {
    pub kind: ScopeKind,
    pub enclosing: Option<SymbolTableId>,
    names: IndexMap<StringId, Symbol>,
    globals: AHashSet<StringId>,
    nonlocals: AHashSet<StringId>,
    pub cell_vars: Vec<StringId>,
    pub free_vars: Vec<StringId>,
    next_local: u32,
    /// Set once a method body is found to reference `super`/`__class__`;
    /// the enclosing class scope must then pre-synthesize a `__class__`
    /// cell before any method is compiled.
    pub needs_class_cell: bool,
}

impl SymbolTable {
    /// Number of Local slots ever allocated in this scope (a symbol later
    /// promoted to a Cell still occupies its original slot number; only
    /// its own `var_names` entry is no longer meaningful).
    #[must_use]
    pub fn local_count(&self) -> usize {
        self.next_local as usize
    }

    /// Every symbol currently bound as a Local, with its name.
    pub fn iter_locals(&self) -> impl Iterator<Item = (StringId, Symbol)> + '_ {
        self.names.iter().filter(|(_, s)| s.scope == SymbolScope::Local).map(|(n, s)| (*n, *s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolTableId(pub usize);

/// Owns every scope created during a compilation, so child scopes can
/// reach back into their parent to promote a Local to a Cell.
#[derive(Default)]
pub struct SymbolTableArena {
    tables: Vec<SymbolTable>,
}

impl SymbolTableArena {
    #[must_use]
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    pub fn push(&mut self, kind: ScopeKind, enclosing: Option<SymbolTableId>) -> SymbolTableId {
        let id = SymbolTableId(self.tables.len());
        self.tables.push(SymbolTable {
            kind,
            enclosing,
            names: IndexMap::new(),
            globals: AHashSet::new(),
            nonlocals: AHashSet::new(),
            cell_vars: Vec::new(),
            free_vars: Vec::new(),
            next_local: 0,
            needs_class_cell: false,
        });
        id
    }

    pub fn get(&self, id: SymbolTableId) -> &SymbolTable {
        &self.tables[id.0]
    }

    pub fn get_mut(&mut self, id: SymbolTableId) -> &mut SymbolTable {
        &mut self.tables[id.0]
    }

    /// Looks up `name` directly in `id`'s own name map, without recursing
    /// into enclosing scopes or consulting the `globals` set. Used by
    /// Pass B to test "is this already a Local bound in this exact scope"
    /// before promoting it to a Cell.
    #[must_use]
    pub fn lookup_local(&self, id: SymbolTableId, name: StringId) -> Option<Symbol> {
        self.get(id).names.get(&name).copied()
    }

    /// Defines `name` as a plain Local in `id` if it is not already bound.
    pub fn define(&mut self, id: SymbolTableId, name: StringId) -> Symbol {
        if let Some(existing) = self.get(id).names.get(&name).copied() {
            return existing;
        }
        let table = self.get_mut(id);
        let index = table.next_local;
        table.next_local += 1;
        let symbol = Symbol {
            name,
            scope: SymbolScope::Local,
            index,
            original_index: index,
        };
        table.names.insert(name, symbol);
        symbol
    }

    pub fn define_global(&mut self, id: SymbolTableId, name: StringId) -> Symbol {
        let table = self.get_mut(id);
        table.globals.insert(name);
        let symbol = Symbol {
            name,
            scope: SymbolScope::Global,
            index: SENTINEL_INDEX,
            original_index: SENTINEL_INDEX,
        };
        table.names.insert(name, symbol);
        symbol
    }

    /// Walks outward looking for a Local or Cell binding to capture.
    /// Succeeds by promoting the outer binding to a Cell and recording a
    /// Free symbol here; on total failure, records a sentinel Free symbol
    /// and defers the diagnostic to runtime, per the resolver contract.
    pub fn define_nonlocal(&mut self, id: SymbolTableId, name: StringId) -> Symbol {
        self.get_mut(id).nonlocals.insert(name);

        let mut cursor = self.get(id).enclosing;
        while let Some(outer) = cursor {
            if let Some(existing) = self.get(outer).names.get(&name).copied() {
                match existing.scope {
                    SymbolScope::Local => {
                        let cell = self.promote_to_cell(outer, name);
                        return self.insert_free(id, name, cell);
                    }
                    SymbolScope::Cell => {
                        return self.insert_free(id, name, existing);
                    }
                    SymbolScope::Global | SymbolScope::Builtin => break,
                    SymbolScope::Free => {
                        cursor = self.get(outer).enclosing;
                        continue;
                    }
                }
            }
            cursor = self.get(outer).enclosing;
        }

        let symbol = Symbol {
            name,
            scope: SymbolScope::Free,
            index: SENTINEL_INDEX,
            original_index: SENTINEL_INDEX,
        };
        self.get_mut(id).names.insert(name, symbol);
        symbol
    }

    /// Resolves `name` in scope `id`, recursing into enclosing scopes and
    /// promoting Local bindings it passes through to Cell.
    pub fn resolve(&mut self, id: SymbolTableId, name: StringId) -> (Symbol, bool) {
        if self.get(id).globals.contains(&name) {
            return (
                Symbol {
                    name,
                    scope: SymbolScope::Global,
                    index: SENTINEL_INDEX,
                    original_index: SENTINEL_INDEX,
                },
                true,
            );
        }
        if let Some(sym) = self.get(id).names.get(&name).copied() {
            return (sym, true);
        }
        if self.get(id).kind == ScopeKind::Module {
            return (
                Symbol {
                    name,
                    scope: SymbolScope::Global,
                    index: SENTINEL_INDEX,
                    original_index: SENTINEL_INDEX,
                },
                true,
            );
        }
        let Some(outer) = self.get(id).enclosing else {
            return (
                Symbol {
                    name,
                    scope: SymbolScope::Global,
                    index: SENTINEL_INDEX,
                    original_index: SENTINEL_INDEX,
                },
                false,
            );
        };
        let (outer_sym, outer_found) = self.resolve(outer, name);
        if !outer_found || matches!(outer_sym.scope, SymbolScope::Global | SymbolScope::Builtin) {
            return (outer_sym, outer_found);
        }

        let cell = if outer_sym.scope == SymbolScope::Local {
            self.promote_to_cell(outer, name)
        } else {
            outer_sym
        };
        let free = self.insert_free(id, name, cell);
        (free, true)
    }

    fn insert_free(&mut self, id: SymbolTableId, name: StringId, captured: Symbol) -> Symbol {
        if let Some(existing) = self.get(id).names.get(&name).copied() {
            if existing.scope == SymbolScope::Free {
                return existing;
            }
        }
        let table = self.get_mut(id);
        let index = u32::try_from(table.free_vars.len()).expect("free slot count overflow");
        table.free_vars.push(name);
        let symbol = Symbol {
            name,
            scope: SymbolScope::Free,
            index,
            original_index: captured.original_index,
        };
        table.names.insert(name, symbol);
        symbol
    }

    /// Promotes a Local (or re-finds an existing Cell) to a Cell, per
    /// `mark_as_cell`.
    pub fn mark_as_cell(&mut self, id: SymbolTableId, name: StringId) -> Symbol {
        self.promote_to_cell(id, name)
    }

    fn promote_to_cell(&mut self, id: SymbolTableId, name: StringId) -> Symbol {
        let table = self.get_mut(id);
        if let Some(existing) = table.names.get(&name).copied() {
            if existing.scope == SymbolScope::Cell {
                return existing;
            }
            let cell_index = u32::try_from(table.cell_vars.len()).expect("cell slot count overflow");
            table.cell_vars.push(name);
            let promoted = Symbol {
                name,
                scope: SymbolScope::Cell,
                index: cell_index,
                original_index: existing.original_index,
            };
            table.names.insert(name, promoted);
            return promoted;
        }
        let cell_index = u32::try_from(table.cell_vars.len()).expect("cell slot count overflow");
        table.cell_vars.push(name);
        let promoted = Symbol {
            name,
            scope: SymbolScope::Cell,
            index: cell_index,
            original_index: cell_index,
        };
        table.names.insert(name, promoted);
        promoted
    }

    #[must_use]
    pub fn enclosing_scope_kind(&self, id: SymbolTableId) -> Option<ScopeKind> {
        self.get(id).enclosing.map(|e| self.get(e).kind)
    }

    #[must_use]
    pub fn is_inside_class(&self, id: SymbolTableId) -> Option<SymbolTableId> {
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            if self.get(cur).kind == ScopeKind::Class {
                return Some(cur);
            }
            if self.get(cur).kind == ScopeKind::Function {
                return None;
            }
            cursor = self.get(cur).enclosing;
        }
        None
    }

    /// Binds `name` in the first non-comprehension scope reachable from
    /// `id`, per the assignment-expression-in-comprehension rule.
    pub fn define_in_enclosing_scope(&mut self, id: SymbolTableId, name: StringId) -> Symbol {
        let mut cursor = id;
        while self.get(cursor).kind == ScopeKind::Comprehension {
            let Some(outer) = self.get(cursor).enclosing else { break };
            cursor = outer;
        }
        if self.get(cursor).kind == ScopeKind::Module {
            return self.define_global(cursor, name);
        }
        self.define(cursor, name)
    }

    /// The deref argument for `LOAD_DEREF`/`STORE_DEREF`/`DELETE_DEREF`:
    /// a Cell's own index, or `num_cells + index` for a Free symbol.
    #[must_use]
    pub fn deref_index(&self, id: SymbolTableId, symbol: Symbol) -> u32 {
        match symbol.scope {
            SymbolScope::Cell => symbol.index,
            SymbolScope::Free => u32::try_from(self.get(id).cell_vars.len()).expect("cell count overflow") + symbol.index,
            _ => panic!("deref_index called on non-cell/free symbol"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonlocal_promotes_outer_local_to_cell() {
        let mut arena = SymbolTableArena::new();
        let module = arena.push(ScopeKind::Module, None);
        let outer = arena.push(ScopeKind::Function, Some(module));
        let inner = arena.push(ScopeKind::Function, Some(outer));

        let interner = crate::intern::Interner::new();
        let x = interner.intern("x");
        arena.define(outer, x);

        let captured = arena.define_nonlocal(inner, x);
        assert_eq!(captured.scope, SymbolScope::Free);
        let outer_sym = arena.get(outer).names.get(&x).copied().unwrap();
        assert_eq!(outer_sym.scope, SymbolScope::Cell);
    }

    #[test]
    fn resolve_falls_back_to_global_at_module_scope() {
        let mut arena = SymbolTableArena::new();
        let module = arena.push(ScopeKind::Module, None);
        let interner = crate::intern::Interner::new();
        let (sym, found) = arena.resolve(module, interner.intern("missing"));
        assert!(found);
        assert_eq!(sym.scope, SymbolScope::Global);
    }

    #[test]
    fn resolve_threads_free_through_nested_functions() {
        let mut arena = SymbolTableArena::new();
        let module = arena.push(ScopeKind::Module, None);
        let outer = arena.push(ScopeKind::Function, Some(module));
        let middle = arena.push(ScopeKind::Function, Some(outer));
        let inner = arena.push(ScopeKind::Function, Some(middle));

        let interner = crate::intern::Interner::new();
        let x = interner.intern("x");
        arena.define(outer, x);

        let (sym, found) = arena.resolve(inner, x);
        assert!(found);
        assert_eq!(sym.scope, SymbolScope::Free);
        let middle_sym = arena.get(middle).names.get(&x).copied().unwrap();
        assert_eq!(middle_sym.scope, SymbolScope::Free);
    }
}
