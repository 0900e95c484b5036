//! Symbols and symbol tables
//!
//! Symbols and tables live in one arena per compilation unit; parent and
//! super references are integer handles, which keeps the naturally cyclic
//! ownership graph a tree. Access is derived from the first character of
//! the name at insertion time and never recomputed.

use koala_bytecode::CodeBlock;
use koala_types::{ProtoDesc, TypeDesc};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::diag::Span;

/// Handle of a symbol in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Handle of a symbol table in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(pub u32);

/// Symbol table errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolError {
    /// A symbol with this name already exists in the table
    #[error("duplicate symbol '{0}'")]
    Duplicate(String),
}

/// What a symbol names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Variable or field
    Var,
    /// Function prototype (carries a code payload once compiled)
    Proto,
    /// Abstract method prototype inside a trait
    IProto,
    /// Class
    Class,
    /// Trait
    Trait,
    /// Imported module alias; the payload table is the module's public table
    Alias,
    /// Type alias
    TypeAlias,
}

/// Visibility derived from the name's first character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Uppercase first letter
    Public,
    /// Lowercase first letter
    Private,
}

impl Access {
    /// Derive the access of `name`
    pub fn of(name: &str) -> Self {
        if name.chars().next().is_some_and(|c| c.is_uppercase()) {
            Access::Public
        } else {
            Access::Private
        }
    }
}

/// Local variable record attached to a compiled function symbol
#[derive(Debug, Clone)]
pub struct LocalRec {
    /// Variable name
    pub name: String,
    /// Declared or inferred type
    pub desc: TypeDesc,
    /// Frame slot
    pub pos: i32,
}

/// A named entry in a symbol table
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Symbol name
    pub name: String,
    /// Kind
    pub kind: SymbolKind,
    /// Visibility, captured at insertion
    pub access: Access,
    /// Declared `const`
    pub konst: bool,
    /// Resolved type descriptor
    pub desc: Option<TypeDesc>,
    /// Variable slot index; -1 for non-variables
    pub index: i32,
    /// Owning symbol (module, class or trait)
    pub parent: Option<SymbolId>,
    /// Original symbol for inherited copies; super class for classes
    pub super_: Option<SymbolId>,
    /// Mixed-in traits of a class, or super traits of a trait, in order
    pub traits: Vec<SymbolId>,
    /// Nested table payload for classes, traits and aliases
    pub table: Option<TableId>,
    /// Compiled body of a function or method, attached at scope exit
    pub block: Option<CodeBlock>,
    /// Frame size of a compiled function
    pub locvars: u16,
    /// Local variable records of a compiled function
    pub locals: Vec<LocalRec>,
    /// Reference count for unused-symbol diagnostics
    pub refcnt: u32,
    /// Whether this entry was copied in by inheritance
    pub inherited: bool,
    /// Declaration site for diagnostics
    pub span: Span,
}

impl Symbol {
    fn new(name: &str, kind: SymbolKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            access: Access::of(name),
            konst: false,
            desc: None,
            index: -1,
            parent: None,
            super_: None,
            traits: Vec::new(),
            table: None,
            block: None,
            locvars: 0,
            locals: Vec::new(),
            refcnt: 0,
            inherited: false,
            span: Span::default(),
        }
    }

    /// The prototype of a function-like symbol
    pub fn proto(&self) -> Option<&ProtoDesc> {
        match &self.desc {
            Some(TypeDesc::Proto(p)) => Some(p),
            _ => None,
        }
    }
}

/// A mapping from names to symbols with insertion order preserved
#[derive(Debug, Default)]
pub struct SymTable {
    map: FxHashMap<String, SymbolId>,
    order: Vec<SymbolId>,
    next_slot: i32,
}

/// Arena of symbols and tables for one compilation unit
#[derive(Debug, Default)]
pub struct SymbolArena {
    syms: Vec<Symbol>,
    tables: Vec<SymTable>,
}

impl SymbolArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty table whose variable slots start at `first_slot`
    pub fn new_table(&mut self, first_slot: i32) -> TableId {
        let id = TableId(self.tables.len() as u32);
        self.tables.push(SymTable {
            next_slot: first_slot,
            ..SymTable::default()
        });
        id
    }

    /// Borrow a symbol
    pub fn sym(&self, id: SymbolId) -> &Symbol {
        &self.syms[id.0 as usize]
    }

    /// Mutably borrow a symbol
    pub fn sym_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.syms[id.0 as usize]
    }

    /// Number of variable slots handed out by `table`
    pub fn var_count(&self, table: TableId) -> i32 {
        self.tables[table.0 as usize].next_slot
    }

    fn add(&mut self, table: TableId, sym: Symbol) -> Result<SymbolId, SymbolError> {
        let t = &mut self.tables[table.0 as usize];
        if t.map.contains_key(&sym.name) {
            return Err(SymbolError::Duplicate(sym.name));
        }
        let id = SymbolId(self.syms.len() as u32);
        t.map.insert(sym.name.clone(), id);
        t.order.push(id);
        self.syms.push(sym);
        Ok(id)
    }

    /// Add a variable; slot indices are handed out monotonically from the
    /// table's base
    pub fn add_var(
        &mut self,
        table: TableId,
        name: &str,
        desc: Option<TypeDesc>,
        konst: bool,
    ) -> Result<SymbolId, SymbolError> {
        let slot = self.tables[table.0 as usize].next_slot;
        let mut sym = Symbol::new(name, SymbolKind::Var);
        sym.desc = desc;
        sym.konst = konst;
        sym.index = slot;
        let id = self.add(table, sym)?;
        self.tables[table.0 as usize].next_slot = slot + 1;
        Ok(id)
    }

    /// Add a variable with an explicit frame slot, bypassing the table's
    /// own counter; used for function locals whose slots are numbered
    /// across nested block tables
    pub fn add_var_at(
        &mut self,
        table: TableId,
        name: &str,
        desc: Option<TypeDesc>,
        konst: bool,
        slot: i32,
    ) -> Result<SymbolId, SymbolError> {
        let mut sym = Symbol::new(name, SymbolKind::Var);
        sym.desc = desc;
        sym.konst = konst;
        sym.index = slot;
        self.add(table, sym)
    }

    /// Add a function prototype
    pub fn add_proto(
        &mut self,
        table: TableId,
        name: &str,
        proto: ProtoDesc,
    ) -> Result<SymbolId, SymbolError> {
        let mut sym = Symbol::new(name, SymbolKind::Proto);
        sym.desc = Some(TypeDesc::proto(proto));
        self.add(table, sym)
    }

    /// Add an abstract method prototype
    pub fn add_iproto(
        &mut self,
        table: TableId,
        name: &str,
        proto: ProtoDesc,
    ) -> Result<SymbolId, SymbolError> {
        let mut sym = Symbol::new(name, SymbolKind::IProto);
        sym.desc = Some(TypeDesc::proto(proto));
        self.add(table, sym)
    }

    /// Add a class with a fresh member table as its payload
    pub fn add_class(&mut self, table: TableId, name: &str) -> Result<SymbolId, SymbolError> {
        let child = self.new_table(0);
        let mut sym = Symbol::new(name, SymbolKind::Class);
        sym.desc = Some(TypeDesc::user_def("", name));
        sym.table = Some(child);
        self.add(table, sym)
    }

    /// Add a trait with a fresh member table as its payload
    pub fn add_trait(&mut self, table: TableId, name: &str) -> Result<SymbolId, SymbolError> {
        let child = self.new_table(0);
        let mut sym = Symbol::new(name, SymbolKind::Trait);
        sym.desc = Some(TypeDesc::user_def("", name));
        sym.table = Some(child);
        self.add(table, sym)
    }

    /// Add an imported module alias whose payload is the module's table
    pub fn add_alias(
        &mut self,
        table: TableId,
        name: &str,
        path: &str,
        module_table: TableId,
    ) -> Result<SymbolId, SymbolError> {
        let mut sym = Symbol::new(name, SymbolKind::Alias);
        sym.desc = Some(TypeDesc::PkgPath {
            path: path.to_string(),
        });
        sym.table = Some(module_table);
        self.add(table, sym)
    }

    /// Add a type alias
    pub fn add_typealias(
        &mut self,
        table: TableId,
        name: &str,
        desc: TypeDesc,
    ) -> Result<SymbolId, SymbolError> {
        let mut sym = Symbol::new(name, SymbolKind::TypeAlias);
        sym.desc = Some(desc);
        self.add(table, sym)
    }

    /// Copy `orig` into `table` as an inherited member
    ///
    /// The copy keeps the original's slot index and records the original
    /// through its `super_` handle; no new slot is allocated.
    pub fn add_inherited(
        &mut self,
        table: TableId,
        orig: SymbolId,
    ) -> Result<SymbolId, SymbolError> {
        let source = self.sym(orig);
        let mut sym = Symbol::new(&source.name, source.kind);
        sym.desc = source.desc.clone();
        sym.konst = source.konst;
        sym.index = source.index;
        sym.table = source.table;
        sym.super_ = Some(orig);
        sym.inherited = true;
        self.add(table, sym)
    }

    /// Look up `name` in `table`
    pub fn get(&self, table: TableId, name: &str) -> Option<SymbolId> {
        self.tables[table.0 as usize].map.get(name).copied()
    }

    /// Whether `table` contains `name`
    pub fn contains(&self, table: TableId, name: &str) -> bool {
        self.tables[table.0 as usize].map.contains_key(name)
    }

    /// Symbols of `table` in insertion order
    pub fn traverse(&self, table: TableId) -> impl Iterator<Item = SymbolId> + '_ {
        self.tables[table.0 as usize].order.iter().copied()
    }

    /// Count a use of `id` for unused-symbol diagnostics
    pub fn touch(&mut self, id: SymbolId) {
        self.sym_mut(id).refcnt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rejected() {
        let mut arena = SymbolArena::new();
        let table = arena.new_table(0);
        let first = arena
            .add_var(table, "x", Some(TypeDesc::int()), false)
            .unwrap();
        let err = arena.add_var(table, "x", Some(TypeDesc::float()), false);
        assert_eq!(err, Err(SymbolError::Duplicate("x".into())));
        // The first entry is untouched.
        assert_eq!(arena.get(table, "x"), Some(first));
        assert_eq!(arena.sym(first).desc, Some(TypeDesc::int()));
    }

    #[test]
    fn test_access_from_first_letter() {
        let mut arena = SymbolArena::new();
        let table = arena.new_table(0);
        let pub_id = arena.add_var(table, "Count", None, false).unwrap();
        let priv_id = arena.add_var(table, "count", None, false).unwrap();
        assert_eq!(arena.sym(pub_id).access, Access::Public);
        assert_eq!(arena.sym(priv_id).access, Access::Private);
    }

    #[test]
    fn test_slot_indices_monotonic() {
        let mut arena = SymbolArena::new();
        let table = arena.new_table(0);
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let id = arena.add_var(table, name, None, false).unwrap();
            assert_eq!(arena.sym(id).index, i as i32);
        }
        assert_eq!(arena.var_count(table), 3);
    }

    #[test]
    fn test_traverse_in_insertion_order() {
        let mut arena = SymbolArena::new();
        let table = arena.new_table(0);
        arena.add_var(table, "z", None, false).unwrap();
        arena.add_class(table, "A").unwrap();
        arena.add_var(table, "a", None, false).unwrap();
        let names: Vec<_> = arena
            .traverse(table)
            .map(|id| arena.sym(id).name.clone())
            .collect();
        assert_eq!(names, vec!["z", "A", "a"]);
    }

    #[test]
    fn test_inherited_copy_keeps_index() {
        let mut arena = SymbolArena::new();
        let base = arena.new_table(0);
        let derived = arena.new_table(0);
        let orig = arena
            .add_var(base, "N", Some(TypeDesc::int()), false)
            .unwrap();
        let copy = arena.add_inherited(derived, orig).unwrap();
        let sym = arena.sym(copy);
        assert!(sym.inherited);
        assert_eq!(sym.super_, Some(orig));
        assert_eq!(sym.index, arena.sym(orig).index);
        // No slot was consumed in the derived table.
        assert_eq!(arena.var_count(derived), 0);
    }

    #[test]
    fn test_class_gets_child_table() {
        let mut arena = SymbolArena::new();
        let table = arena.new_table(0);
        let id = arena.add_class(table, "Animal").unwrap();
        let child = arena.sym(id).table.expect("class table");
        assert_eq!(arena.traverse(child).count(), 0);
    }
}
