//! Parser state and the scope stack
//!
//! A `ParserUnit` is pushed per scope (module, class, function, method,
//! block); the top unit owns the active symbol table and the code block
//! being emitted. Scope exit applies the merge rules: function blocks
//! become the symbol's payload, nested blocks splice into their parent or
//! hang off it as a sibling, and a module with top-level initializer code
//! gets a synthesized `__init__`.

use koala_bytecode::{CodeBlock, Image, InstArg, Opcode};
use koala_types::ProtoDesc;
use rustc_hash::FxHashMap;

use crate::diag::DiagBag;
use crate::symbol::{LocalRec, SymbolArena, SymbolId, SymbolKind, TableId};

/// The name of the implicit initializer function
pub const INIT_NAME: &str = "__init__";

/// Resolves an import path to a loaded image
pub trait ImportResolver {
    /// Load the image for `path`, or None when it cannot be found
    fn resolve(&self, path: &str) -> Option<Image>;
}

/// Resolver that knows no modules; used by tests and single-file builds
pub struct NoImports;

impl ImportResolver for NoImports {
    fn resolve(&self, _path: &str) -> Option<Image> {
        None
    }
}

/// Scope kind of a parser unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Top-level module scope
    Module,
    /// Class or trait body
    Class,
    /// Module-level function body
    Function,
    /// Method body inside a class
    Method,
    /// Anonymous function body
    Closure,
    /// Braced block, loop or conditional body
    Block,
}

impl ScopeKind {
    fn is_function_like(self) -> bool {
        matches!(self, Self::Function | Self::Method | Self::Closure)
    }
}

/// Per-scope record on the scope stack
#[derive(Debug)]
pub struct ParserUnit {
    /// Scope kind
    pub scope: ScopeKind,
    /// Owning symbol (function, method, class) if any
    pub sym: Option<SymbolId>,
    /// Active symbol table
    pub table: TableId,
    /// Code block under construction
    pub block: CodeBlock,
    /// Whether the block splices into the parent on exit
    pub merge: bool,
    /// Whether this unit is a loop body
    pub loop_: bool,
    /// Next free frame slot; meaningful on function-like units
    pub next_local: i32,
    /// Local variable records; meaningful on function-like units
    pub locals: Vec<LocalRec>,
}

impl ParserUnit {
    fn new(scope: ScopeKind, sym: Option<SymbolId>, table: TableId) -> Self {
        Self {
            scope,
            sym,
            table,
            block: CodeBlock::new(),
            merge: false,
            loop_: false,
            // Slot 0 is the receiver: the module for functions, the
            // instance for methods.
            next_local: 1,
            locals: Vec::new(),
        }
    }
}

/// Compilation state for one module
pub struct ParserState<'a> {
    /// Package name of the module being compiled
    pub package: String,
    /// Symbol and table arena
    pub arena: SymbolArena,
    /// The module's own symbol table
    pub module_table: TableId,
    /// Table of import alias symbols
    pub imports: TableId,
    /// Loaded import paths, for duplicate detection (path -> alias)
    pub import_paths: FxHashMap<String, String>,
    /// Current scope unit
    pub u: ParserUnit,
    /// Enclosing scope units, innermost last
    pub ustack: Vec<ParserUnit>,
    /// Diagnostic buffer
    pub diags: DiagBag,
    /// Import loader
    pub resolver: &'a dyn ImportResolver,
}

impl<'a> ParserState<'a> {
    /// Create the state with the module scope already entered
    pub fn new(package: &str, resolver: &'a dyn ImportResolver) -> Self {
        let mut arena = SymbolArena::new();
        let module_table = arena.new_table(0);
        let imports = arena.new_table(0);
        Self {
            package: package.to_string(),
            arena,
            module_table,
            imports,
            import_paths: FxHashMap::default(),
            u: ParserUnit::new(ScopeKind::Module, None, module_table),
            ustack: Vec::new(),
            diags: DiagBag::new(),
            resolver,
        }
    }

    /// Push a new scope
    pub fn enter_scope(&mut self, scope: ScopeKind, sym: Option<SymbolId>, table: TableId) {
        let unit = ParserUnit::new(scope, sym, table);
        let prev = std::mem::replace(&mut self.u, unit);
        self.ustack.push(prev);
    }

    /// Push a block scope that merges into its parent on exit
    pub fn enter_block(&mut self, merge: bool) {
        let table = self.arena.new_table(0);
        self.enter_scope(ScopeKind::Block, None, table);
        self.u.merge = merge;
    }

    /// Pop the current scope, applying the merge rules
    pub fn exit_scope(&mut self) {
        let mut unit = match self.ustack.pop() {
            Some(parent) => std::mem::replace(&mut self.u, parent),
            None => return,
        };

        match unit.scope {
            ScopeKind::Function | ScopeKind::Method | ScopeKind::Closure => {
                if !unit.block.has_ret {
                    if unit.scope == ScopeKind::Method && self.is_init_unit(&unit) {
                        // __init__ returns its receiver
                        unit.block.append(Opcode::Load, InstArg::Int(0));
                    }
                    unit.block.append(Opcode::Ret, InstArg::None);
                }
                if let Some(sym_id) = unit.sym {
                    let sym = self.arena.sym_mut(sym_id);
                    sym.locvars = unit.next_local as u16;
                    sym.locals = std::mem::take(&mut unit.locals);
                    sym.block = Some(unit.block);
                }
            }
            ScopeKind::Block => {
                // Loop jumps are patched by the loop emitter before exit;
                // whatever is still pending bubbles up with the merge.
                if unit.merge || self.u.scope.is_function_like() {
                    self.u.block.merge(unit.block);
                } else {
                    self.u.block.attach_next(unit.block);
                }
            }
            ScopeKind::Class => {
                // The member table stays attached to the class symbol.
            }
            ScopeKind::Module => {}
        }
    }

    fn is_init_unit(&self, unit: &ParserUnit) -> bool {
        unit.sym
            .map(|id| self.arena.sym(id).name == INIT_NAME)
            .unwrap_or(false)
    }

    /// Finish the module scope: synthesize `__init__` when any top-level
    /// initializer code was emitted
    pub fn finish_module(&mut self) {
        debug_assert!(self.ustack.is_empty());
        if self.u.block.insts.is_empty() {
            return;
        }
        let mut block = std::mem::take(&mut self.u.block);
        block.append(Opcode::Ret, InstArg::None);
        let locvars = self.u.next_local as u16;
        match self
            .arena
            .add_proto(self.module_table, INIT_NAME, ProtoDesc::default())
        {
            Ok(id) => {
                let sym = self.arena.sym_mut(id);
                sym.block = Some(block);
                sym.locvars = locvars;
            }
            Err(_) => {
                // A user-defined __init__ collides with the synthesized one.
                self.diags.error(
                    Default::default(),
                    format!("'{INIT_NAME}' conflicts with module initializer code"),
                );
            }
        }
    }

    /// Allocate a frame slot in the enclosing function for a local
    pub fn alloc_local(&mut self) -> i32 {
        if self.u.scope.is_function_like() {
            let slot = self.u.next_local;
            self.u.next_local += 1;
            return slot;
        }
        for unit in self.ustack.iter_mut().rev() {
            if unit.scope.is_function_like() {
                let slot = unit.next_local;
                unit.next_local += 1;
                return slot;
            }
        }
        // Module scope: locals of top-level blocks live in the implicit
        // initializer's frame, counted on the module unit.
        let module_unit = self.ustack.first_mut().unwrap_or(&mut self.u);
        let slot = module_unit.next_local;
        module_unit.next_local += 1;
        slot
    }

    /// Record a local variable on the enclosing function unit
    pub fn record_local(&mut self, rec: LocalRec) {
        if self.u.scope.is_function_like() {
            self.u.locals.push(rec);
            return;
        }
        for unit in self.ustack.iter_mut().rev() {
            if unit.scope.is_function_like() {
                unit.locals.push(rec);
                return;
            }
        }
    }

    /// The symbol of the enclosing function or method, if any
    pub fn enclosing_func(&self) -> Option<SymbolId> {
        if self.u.scope.is_function_like() {
            return self.u.sym;
        }
        self.ustack
            .iter()
            .rev()
            .find(|unit| unit.scope.is_function_like())
            .and_then(|unit| unit.sym)
    }

    /// Whether the emission point sits inside a method (receiver is an
    /// instance rather than the module)
    pub fn in_method(&self) -> bool {
        if self.u.scope.is_function_like() {
            return self.u.scope == ScopeKind::Method;
        }
        self.ustack
            .iter()
            .rev()
            .find(|unit| unit.scope.is_function_like())
            .map(|unit| unit.scope == ScopeKind::Method)
            .unwrap_or(false)
    }

    /// The class symbol enclosing the emission point, if any
    pub fn enclosing_class(&self) -> Option<SymbolId> {
        if self.u.scope == ScopeKind::Class {
            return self.u.sym;
        }
        self.ustack
            .iter()
            .rev()
            .find(|unit| unit.scope == ScopeKind::Class)
            .and_then(|unit| unit.sym)
    }

    /// Whether any enclosing unit (or the current one) is a loop
    pub fn inside_loop(&self) -> bool {
        self.u.loop_ || self.ustack.iter().any(|unit| unit.loop_)
    }

    // ===== Imports =====

    /// Rebuild a compile-time symbol table from a loaded image
    ///
    /// Only the structure needed for resolution and type checking is
    /// recreated: variables, function prototypes, classes with fields and
    /// methods, traits with their prototypes.
    pub fn table_from_image(&mut self, image: &Image) -> TableId {
        use koala_bytecode::{Item, ItemKind};

        let table = self.arena.new_table(0);
        let atoms = &image.atoms;

        for item in atoms.iter(ItemKind::Var) {
            if let Item::Var(v) = item {
                let name = atoms.get_string(v.name_idx).unwrap_or_default().to_string();
                let desc = atoms.type_to_desc(v.type_idx);
                let konst = v.flags & koala_bytecode::atoms::flags::VAR_CONST != 0;
                let _ = self.arena.add_var(table, &name, desc, konst);
            }
        }
        for item in atoms.iter(ItemKind::Func) {
            if let Item::Func(f) = item {
                let name = atoms.get_string(f.name_idx).unwrap_or_default().to_string();
                if let Some(proto) = atoms.proto_to_desc(f.proto_idx) {
                    let _ = self.arena.add_proto(table, &name, proto);
                }
            }
        }

        // Classes and traits keyed by their type item index, so members
        // can find their owner. Their descriptors carry the defining
        // module's path so cross-module references serialize correctly.
        let mut owners: FxHashMap<i32, SymbolId> = FxHashMap::default();
        for item in atoms.iter(ItemKind::Class) {
            if let Item::Class(c) = item {
                if let Some(koala_types::TypeDesc::UserDef { name, .. }) =
                    atoms.type_to_desc(c.class_idx)
                {
                    if let Ok(id) = self.arena.add_class(table, &name) {
                        self.arena.sym_mut(id).desc =
                            Some(koala_types::TypeDesc::user_def(&image.package, &name));
                        owners.insert(c.class_idx, id);
                    }
                }
            }
        }
        for item in atoms.iter(ItemKind::Trait) {
            if let Item::Trait(t) = item {
                if let Some(koala_types::TypeDesc::UserDef { name, .. }) =
                    atoms.type_to_desc(t.class_idx)
                {
                    if let Ok(id) = self.arena.add_trait(table, &name) {
                        self.arena.sym_mut(id).desc =
                            Some(koala_types::TypeDesc::user_def(&image.package, &name));
                        owners.insert(t.class_idx, id);
                    }
                }
            }
        }
        for item in atoms.iter(ItemKind::Field) {
            if let Item::Field(f) = item {
                if let Some(&owner) = owners.get(&f.class_idx) {
                    let name = atoms.get_string(f.name_idx).unwrap_or_default().to_string();
                    let desc = atoms.type_to_desc(f.type_idx);
                    if let Some(child) = self.arena.sym(owner).table {
                        let _ = self.arena.add_var(child, &name, desc, false);
                    }
                }
            }
        }
        for item in atoms.iter(ItemKind::Method) {
            if let Item::Method(m) = item {
                if let Some(&owner) = owners.get(&m.class_idx) {
                    let name = atoms.get_string(m.name_idx).unwrap_or_default().to_string();
                    if let (Some(proto), Some(child)) = (
                        atoms.proto_to_desc(m.proto_idx),
                        self.arena.sym(owner).table,
                    ) {
                        let _ = self.arena.add_proto(child, &name, proto);
                    }
                }
            }
        }
        for item in atoms.iter(ItemKind::IMethod) {
            if let Item::IMethod(m) = item {
                if let Some(&owner) = owners.get(&m.class_idx) {
                    let name = atoms.get_string(m.name_idx).unwrap_or_default().to_string();
                    if let (Some(proto), Some(child)) = (
                        atoms.proto_to_desc(m.proto_idx),
                        self.arena.sym(owner).table,
                    ) {
                        let _ = self.arena.add_iproto(child, &name, proto);
                    }
                }
            }
        }

        table
    }

    /// Find the alias symbol whose payload path equals `path`
    pub fn alias_for_path(&self, path: &str) -> Option<SymbolId> {
        self.arena.traverse(self.imports).find(|id| {
            matches!(
                &self.arena.sym(*id).desc,
                Some(koala_types::TypeDesc::PkgPath { path: p }) if p == path
            )
        })
    }

    /// The import alias symbol named `name`, if any
    pub fn alias_named(&self, name: &str) -> Option<SymbolId> {
        self.arena.get(self.imports, name)
    }

    /// The real module path behind an alias symbol
    pub fn alias_path(&self, id: SymbolId) -> Option<&str> {
        match &self.arena.sym(id).desc {
            Some(koala_types::TypeDesc::PkgPath { path }) => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koala_types::TypeDesc;

    #[test]
    fn test_scope_stack_push_pop() {
        let resolver = NoImports;
        let mut ps = ParserState::new("demo", &resolver);
        assert_eq!(ps.u.scope, ScopeKind::Module);

        let table = ps.arena.new_table(0);
        ps.enter_scope(ScopeKind::Function, None, table);
        assert_eq!(ps.u.scope, ScopeKind::Function);
        assert_eq!(ps.ustack.len(), 1);

        ps.exit_scope();
        assert_eq!(ps.u.scope, ScopeKind::Module);
        assert!(ps.ustack.is_empty());
    }

    #[test]
    fn test_function_exit_appends_ret() {
        let resolver = NoImports;
        let mut ps = ParserState::new("demo", &resolver);
        let table = ps.arena.new_table(0);
        let sym = ps
            .arena
            .add_proto(ps.module_table, "f", ProtoDesc::default())
            .unwrap();
        ps.enter_scope(ScopeKind::Function, Some(sym), table);
        ps.u.block.append(Opcode::LoadK, InstArg::Int(1));
        ps.exit_scope();

        let block = ps.arena.sym(sym).block.as_ref().unwrap();
        assert!(block.has_ret);
        assert_eq!(block.insts.last().unwrap().op, Opcode::Ret);
    }

    #[test]
    fn test_block_merges_into_function() {
        let resolver = NoImports;
        let mut ps = ParserState::new("demo", &resolver);
        let table = ps.arena.new_table(0);
        ps.enter_scope(ScopeKind::Function, None, table);
        ps.u.block.append(Opcode::LoadK, InstArg::Int(1));

        ps.enter_block(true);
        ps.u.block.append(Opcode::LoadK, InstArg::Int(2));
        ps.exit_scope();

        assert_eq!(ps.u.block.insts.len(), 2);
        assert_eq!(ps.u.block.bytes, 10);
        ps.exit_scope();
    }

    #[test]
    fn test_module_init_synthesis() {
        let resolver = NoImports;
        let mut ps = ParserState::new("demo", &resolver);
        ps.u.block.append(Opcode::LoadK, InstArg::Int(1));
        ps.finish_module();

        let init = ps.arena.get(ps.module_table, INIT_NAME).unwrap();
        let sym = ps.arena.sym(init);
        assert!(sym.block.as_ref().unwrap().has_ret);
        assert_eq!(sym.locvars, 1);
    }

    #[test]
    fn test_no_init_without_code() {
        let resolver = NoImports;
        let mut ps = ParserState::new("demo", &resolver);
        ps.finish_module();
        assert!(ps.arena.get(ps.module_table, INIT_NAME).is_none());
    }

    #[test]
    fn test_local_slot_allocation_spans_blocks() {
        let resolver = NoImports;
        let mut ps = ParserState::new("demo", &resolver);
        let table = ps.arena.new_table(0);
        ps.enter_scope(ScopeKind::Function, None, table);
        assert_eq!(ps.alloc_local(), 1);
        ps.enter_block(true);
        assert_eq!(ps.alloc_local(), 2);
        ps.exit_scope();
        assert_eq!(ps.alloc_local(), 3);
        ps.exit_scope();
    }

    #[test]
    fn test_table_from_image() {
        let resolver = NoImports;
        let mut ps = ParserState::new("demo", &resolver);
        let mut image = Image::new("koala/lang");
        image.add_var("Version", &TypeDesc::string(), true, false);
        image.add_func(
            "Print",
            &ProtoDesc::new(vec![TypeDesc::any()], vec![]),
            1,
            vec![Opcode::Ret.to_u8()],
            false,
        );
        let table = ps.table_from_image(&image);
        assert!(ps.arena.get(table, "Version").is_some());
        let print = ps.arena.get(table, "Print").unwrap();
        assert_eq!(ps.arena.sym(print).kind, SymbolKind::Proto);
    }
}
