//! Semantic analysis
//!
//! Compilation runs two passes over the statement list. Pass 1 discovers
//! symbols: imports are loaded, module variables, functions, classes and
//! traits are registered, and inheritance copies public members into
//! subclass tables. Pass 2 walks every statement body, resolves and
//! type-checks expressions, and drives emission (see `codegen`).

use koala_types::{ProtoDesc, TypeDesc};
use rustc_hash::FxHashSet;

use crate::ast::*;
use crate::diag::Span;
use crate::state::{ParserState, ScopeKind, INIT_NAME};
use crate::symbol::{Access, LocalRec, SymbolId, SymbolKind};

impl ParserState<'_> {
    // ===== Pass 1: symbol discovery =====

    /// Register every top-level declaration
    pub fn declare(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            if self.diags.full() {
                return;
            }
            self.declare_stmt(stmt);
        }
        self.resolve_inheritance(stmts);
        self.verify_declared_types();
    }

    fn declare_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Import { alias, path, span } => self.declare_import(alias.as_deref(), path, *span),
            Stmt::VarDecl(decl) => self.declare_var(decl),
            Stmt::VarDeclList(decls) => {
                for decl in decls {
                    self.declare_var(decl);
                }
            }
            Stmt::FuncDecl(func) => self.declare_func(func),
            Stmt::ProtoDecl(proto) => {
                let desc = proto_desc(&proto.params, &proto.returns);
                if let Err(err) = self.arena.add_iproto(self.module_table, &proto.name, desc) {
                    self.diags.error(proto.span, err.to_string());
                }
            }
            Stmt::ClassDecl(class) => self.declare_class(class),
            Stmt::TraitDecl(tr) => self.declare_trait(tr),
            Stmt::TypeAlias { name, desc, span } => {
                if let Err(err) = self.arena.add_typealias(self.module_table, name, desc.clone()) {
                    self.diags.error(*span, err.to_string());
                }
            }
            _ => {}
        }
    }

    fn declare_import(&mut self, alias: Option<&str>, path: &str, span: Span) {
        let alias = alias
            .map(str::to_string)
            .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path).to_string());

        if let Some(existing) = self.import_paths.get(path) {
            if *existing == alias {
                self.diags.warn(span, format!("duplicate import of '{path}'"));
            } else {
                self.diags.warn(
                    span,
                    format!("'{path}' already imported as '{existing}'; redundant alias '{alias}'"),
                );
            }
            return;
        }

        let Some(image) = self.resolver.resolve(path) else {
            self.diags.error(span, format!("cannot load module '{path}'"));
            return;
        };
        let table = self.table_from_image(&image);
        match self.arena.add_alias(self.imports, &alias, path, table) {
            Ok(id) => {
                self.arena.sym_mut(id).span = span;
                self.import_paths.insert(path.to_string(), alias);
            }
            Err(err) => self.diags.error(span, err.to_string()),
        }
    }

    fn declare_var(&mut self, decl: &VarDecl) {
        match self
            .arena
            .add_var(self.module_table, &decl.name, decl.desc.clone(), decl.konst)
        {
            Ok(id) => self.arena.sym_mut(id).span = decl.span,
            Err(err) => self.diags.error(decl.span, err.to_string()),
        }
    }

    fn declare_func(&mut self, func: &FuncDecl) {
        let desc = proto_desc(&func.params, &func.returns);
        match self.arena.add_proto(self.module_table, &func.name, desc) {
            Ok(id) => self.arena.sym_mut(id).span = func.span,
            Err(err) => self.diags.error(func.span, err.to_string()),
        }
    }

    fn declare_class(&mut self, class: &ClassDecl) {
        let class_id = match self.arena.add_class(self.module_table, &class.name) {
            Ok(id) => id,
            Err(err) => {
                self.diags.error(class.span, err.to_string());
                return;
            }
        };
        self.arena.sym_mut(class_id).span = class.span;
        let table = self.arena.sym(class_id).table.expect("class table");

        for member in &class.members {
            match member {
                Member::Field(field) => {
                    match self
                        .arena
                        .add_var(table, &field.name, field.desc.clone(), field.konst)
                    {
                        Ok(id) => {
                            self.arena.sym_mut(id).span = field.span;
                            self.arena.sym_mut(id).parent = Some(class_id);
                        }
                        Err(err) => self.diags.error(field.span, err.to_string()),
                    }
                }
                Member::Method(method) => {
                    let desc = proto_desc(&method.params, &method.returns);
                    match self.arena.add_proto(table, &method.name, desc) {
                        Ok(id) => {
                            self.arena.sym_mut(id).span = method.span;
                            self.arena.sym_mut(id).parent = Some(class_id);
                        }
                        Err(err) => self.diags.error(method.span, err.to_string()),
                    }
                }
                Member::Proto(proto) => {
                    self.diags.error(
                        proto.span,
                        format!("class method '{}' must have a body", proto.name),
                    );
                }
            }
        }
    }

    fn declare_trait(&mut self, tr: &TraitDecl) {
        let trait_id = match self.arena.add_trait(self.module_table, &tr.name) {
            Ok(id) => id,
            Err(err) => {
                self.diags.error(tr.span, err.to_string());
                return;
            }
        };
        self.arena.sym_mut(trait_id).span = tr.span;
        let table = self.arena.sym(trait_id).table.expect("trait table");

        for member in &tr.members {
            match member {
                Member::Proto(proto) => {
                    let desc = proto_desc(&proto.params, &proto.returns);
                    match self.arena.add_iproto(table, &proto.name, desc) {
                        Ok(id) => self.arena.sym_mut(id).parent = Some(trait_id),
                        Err(err) => self.diags.error(proto.span, err.to_string()),
                    }
                }
                Member::Method(method) => {
                    let desc = proto_desc(&method.params, &method.returns);
                    match self.arena.add_proto(table, &method.name, desc) {
                        Ok(id) => self.arena.sym_mut(id).parent = Some(trait_id),
                        Err(err) => self.diags.error(method.span, err.to_string()),
                    }
                }
                Member::Field(field) => {
                    self.diags.error(
                        field.span,
                        format!("trait '{}' cannot declare fields", tr.name),
                    );
                }
            }
        }
    }

    // ===== Inheritance =====

    fn resolve_inheritance(&mut self, stmts: &[Stmt]) {
        let mut done: FxHashSet<SymbolId> = FxHashSet::default();
        let mut in_progress: FxHashSet<SymbolId> = FxHashSet::default();
        for stmt in stmts {
            if let Stmt::ClassDecl(class) = stmt {
                if let Some(id) = self.arena.get(self.module_table, &class.name) {
                    self.link_class(id, class, stmts, &mut done, &mut in_progress);
                }
            }
            if let Stmt::TraitDecl(tr) = stmt {
                self.link_trait(tr);
            }
        }
    }

    fn link_trait(&mut self, tr: &TraitDecl) {
        let Some(trait_id) = self.arena.get(self.module_table, &tr.name) else {
            return;
        };
        let table = self.arena.sym(trait_id).table.expect("trait table");
        let mut seen = FxHashSet::default();
        for super_desc in &tr.traits {
            let mut desc = super_desc.clone();
            let Some(super_id) = self.resolve_userdef(&mut desc, tr.span) else {
                continue;
            };
            if !seen.insert(super_id) {
                self.diags
                    .error(tr.span, format!("duplicate trait '{desc}' in trait list"));
                continue;
            }
            if self.arena.sym(super_id).kind != SymbolKind::Trait {
                self.diags.error(tr.span, format!("'{desc}' is not a trait"));
                continue;
            }
            self.arena.sym_mut(trait_id).traits.push(super_id);
            self.copy_public_members(super_id, table);
        }
    }

    fn link_class(
        &mut self,
        class_id: SymbolId,
        class: &ClassDecl,
        stmts: &[Stmt],
        done: &mut FxHashSet<SymbolId>,
        in_progress: &mut FxHashSet<SymbolId>,
    ) {
        if done.contains(&class_id) {
            return;
        }
        if !in_progress.insert(class_id) {
            self.diags
                .error(class.span, format!("inheritance cycle through '{}'", class.name));
            return;
        }

        if let Some(super_desc) = &class.super_ {
            let mut desc = super_desc.clone();
            if let Some(super_id) = self.resolve_userdef(&mut desc, class.span) {
                if self.arena.sym(super_id).kind != SymbolKind::Class {
                    self.diags
                        .error(class.span, format!("'{desc}' is not a class"));
                } else {
                    // Same-module supers must have their own inherited
                    // members in place before they are copied from.
                    if let Some(Stmt::ClassDecl(super_decl)) = stmts.iter().find(|s| {
                        matches!(s, Stmt::ClassDecl(c)
                            if self.arena.get(self.module_table, &c.name) == Some(super_id))
                    }) {
                        self.link_class(super_id, super_decl, stmts, done, in_progress);
                    }
                    self.arena.sym_mut(class_id).super_ = Some(super_id);
                    let table = self.arena.sym(class_id).table.expect("class table");
                    self.copy_public_members(super_id, table);
                }
            } else {
                self.diags
                    .error(class.span, format!("cannot find base class '{super_desc}'"));
            }
        }

        let mut seen = FxHashSet::default();
        for trait_desc in &class.traits {
            let mut desc = trait_desc.clone();
            let Some(trait_id) = self.resolve_userdef(&mut desc, class.span) else {
                self.diags
                    .error(class.span, format!("cannot find trait '{trait_desc}'"));
                continue;
            };
            if !seen.insert(trait_id) {
                self.diags
                    .error(class.span, format!("duplicate trait '{desc}' in class '{}'", class.name));
                continue;
            }
            if self.arena.sym(trait_id).kind != SymbolKind::Trait {
                self.diags.error(class.span, format!("'{desc}' is not a trait"));
                continue;
            }
            self.arena.sym_mut(class_id).traits.push(trait_id);
            let table = self.arena.sym(class_id).table.expect("class table");
            self.copy_public_members(trait_id, table);
        }

        in_progress.remove(&class_id);
        done.insert(class_id);
    }

    /// Copy every public, non-shadowed member of `source` into `target`
    ///
    /// `__init__` is never copied; earlier entries win, so base-class and
    /// earlier-trait members shadow later contributions.
    fn copy_public_members(&mut self, source: SymbolId, target: crate::symbol::TableId) {
        let Some(source_table) = self.arena.sym(source).table else {
            return;
        };
        let members: Vec<SymbolId> = self.arena.traverse(source_table).collect();
        for member in members {
            let sym = self.arena.sym(member);
            if sym.access != Access::Public || sym.name == INIT_NAME {
                continue;
            }
            if self.arena.contains(target, &sym.name) {
                continue;
            }
            let _ = self.arena.add_inherited(target, member);
        }
    }

    /// Warn about module variables whose declared type cannot be located
    fn verify_declared_types(&mut self) {
        let vars: Vec<SymbolId> = self
            .arena
            .traverse(self.module_table)
            .filter(|id| self.arena.sym(*id).kind == SymbolKind::Var)
            .collect();
        for id in vars {
            let (desc, span) = {
                let sym = self.arena.sym(id);
                (sym.desc.clone(), sym.span)
            };
            if let Some(TypeDesc::UserDef { .. }) = desc {
                let mut desc = desc.unwrap();
                if self.resolve_userdef_quiet(&mut desc).is_none() {
                    self.diags
                        .warn(span, format!("cannot find type '{desc}'"));
                } else {
                    self.arena.sym_mut(id).desc = Some(desc);
                }
            }
        }
    }

    // ===== Pass 2: analysis and emission =====

    /// Walk every statement, type-check and emit code
    pub fn parse_body(&mut self, stmts: &mut [Stmt]) {
        for stmt in stmts.iter_mut() {
            if self.diags.full() {
                return;
            }
            self.stmt(stmt);
        }
        self.finish_module();
        self.warn_unused();
    }

    pub(crate) fn stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Import { .. } | Stmt::TypeAlias { .. } | Stmt::ProtoDecl(_) => {}
            Stmt::VarDecl(decl) => self.var_decl_stmt(decl),
            Stmt::VarDeclList(decls) => {
                for decl in decls {
                    self.var_decl_stmt(decl);
                }
            }
            Stmt::FuncDecl(func) => self.compile_func(func),
            Stmt::ClassDecl(class) => self.compile_class(class),
            Stmt::TraitDecl(tr) => self.compile_trait(tr),
            Stmt::Expr(expr) => {
                expr.ctx = ExprCtx::Load;
                self.visit_expr(expr);
            }
            Stmt::Assign { lhs, rhs } => self.assign_stmt(lhs, rhs),
            Stmt::CompoundAssign { op, lhs, rhs } => self.compound_assign_stmt(*op, lhs, rhs),
            Stmt::Return { exprs, span } => self.return_stmt(exprs, *span),
            Stmt::If { cond, body, orelse } => self.emit_if(cond, body, orelse),
            Stmt::While {
                pre_test,
                cond,
                body,
            } => self.emit_while(*pre_test, cond, body),
            Stmt::Switch { expr, cases } => self.emit_switch(expr, cases),
            Stmt::ForTriple {
                init,
                cond,
                step,
                body,
            } => self.emit_for(init.as_deref_mut(), cond.as_mut(), step.as_deref_mut(), body),
            Stmt::ForEach { iter, .. } => {
                iter.ctx = ExprCtx::Load;
                self.visit_expr(iter);
                self.diags.error(
                    iter.span,
                    "for-each loops are not supported by the code generator",
                );
            }
            Stmt::Break { level, span } => self.emit_break_continue(true, *level, *span),
            Stmt::Continue { level, span } => self.emit_break_continue(false, *level, *span),
            Stmt::Go(call) => self.go_stmt(call),
            Stmt::Block(stmts) => {
                self.enter_block(true);
                for stmt in stmts.iter_mut() {
                    if self.diags.full() {
                        break;
                    }
                    self.stmt(stmt);
                }
                self.exit_scope();
            }
        }
    }

    fn var_decl_stmt(&mut self, decl: &mut VarDecl) {
        if self.u.scope == ScopeKind::Module {
            self.module_var_init(decl);
        } else {
            self.local_var_decl(decl);
        }
    }

    /// Emit a module variable's initializer into the module block
    fn module_var_init(&mut self, decl: &mut VarDecl) {
        let Some(sym_id) = self.arena.get(self.module_table, &decl.name) else {
            return;
        };
        let Some(init) = decl.init.as_mut() else {
            if decl.desc.is_none() {
                self.diags.error(
                    decl.span,
                    format!("cannot infer type of '{}' without an initializer", decl.name),
                );
            }
            return;
        };

        init.ctx = ExprCtx::Load;
        self.visit_expr(init);
        let init_desc = init.desc.clone();
        let init_is_call = matches!(init.kind, ExprKind::Call { .. });
        let name = decl.name.clone();
        let inferred =
            self.infer_decl_type(&decl.desc, init_desc, init_is_call, &name, decl.span);
        if let Some(desc) = inferred {
            self.arena.sym_mut(sym_id).desc = Some(desc);
        }
        self.emit_module_var_store(&name);
    }

    /// Declare and initialize a function-local variable
    fn local_var_decl(&mut self, decl: &mut VarDecl) {
        let desc = match decl.init.as_mut() {
            Some(init) => {
                init.ctx = ExprCtx::Load;
                self.visit_expr(init);
                let init_desc = init.desc.clone();
                let init_is_call = matches!(init.kind, ExprKind::Call { .. });
                let name = decl.name.clone();
                self.infer_decl_type(&decl.desc, init_desc, init_is_call, &name, decl.span)
            }
            None => {
                if decl.desc.is_none() {
                    self.diags.error(
                        decl.span,
                        format!("cannot infer type of '{}' without an initializer", decl.name),
                    );
                }
                decl.desc.clone()
            }
        };

        let slot = self.alloc_local();
        match self
            .arena
            .add_var_at(self.u.table, &decl.name, desc.clone(), decl.konst, slot)
        {
            Ok(id) => self.arena.sym_mut(id).span = decl.span,
            Err(err) => {
                self.diags.error(decl.span, err.to_string());
                return;
            }
        }
        if let Some(desc) = desc {
            self.record_local(LocalRec {
                name: decl.name.clone(),
                desc,
                pos: slot,
            });
        }
        if decl.init.is_some() {
            self.emit_store_local(slot);
        }
    }

    /// Check a declaration's declared type against its initializer and
    /// return the variable's final type
    fn infer_decl_type(
        &mut self,
        declared: &Option<TypeDesc>,
        init_desc: Option<TypeDesc>,
        init_is_call: bool,
        name: &str,
        span: Span,
    ) -> Option<TypeDesc> {
        match (declared, init_desc) {
            (Some(declared), Some(actual)) => {
                let mut declared = declared.clone();
                self.normalize_type(&mut declared, span);
                if !self.check_assignable(&declared, &actual, span) {
                    self.diags
                        .error(span, format!("cannot assign '{actual}' to '{declared}'"));
                }
                Some(declared)
            }
            (Some(declared), None) => {
                let mut declared = declared.clone();
                self.normalize_type(&mut declared, span);
                if init_is_call {
                    self.diags
                        .error(span, "initializer call must have exactly one return value");
                }
                Some(declared)
            }
            (None, Some(actual)) => Some(actual),
            (None, None) => {
                if init_is_call {
                    self.diags
                        .error(span, "initializer call must have exactly one return value");
                } else {
                    self.diags
                        .error(span, format!("cannot infer type of '{name}'"));
                }
                None
            }
        }
    }

    fn compile_func(&mut self, func: &mut FuncDecl) {
        if self.u.scope != ScopeKind::Module {
            self.diags.error(
                func.span,
                format!("function '{}' must be declared at module level", func.name),
            );
            return;
        }
        let Some(sym_id) = self.arena.get(self.module_table, &func.name) else {
            return;
        };
        let table = self.arena.new_table(0);
        self.enter_scope(ScopeKind::Function, Some(sym_id), table);
        self.bind_params(&func.params);
        for stmt in func.body.iter_mut() {
            if self.diags.full() {
                break;
            }
            self.stmt(stmt);
        }
        self.exit_scope();
    }

    fn compile_class(&mut self, class: &mut ClassDecl) {
        let Some(class_id) = self.arena.get(self.module_table, &class.name) else {
            return;
        };
        let table = self.arena.sym(class_id).table.expect("class table");
        self.enter_scope(ScopeKind::Class, Some(class_id), table);
        for member in class.members.iter_mut() {
            if let Member::Method(method) = member {
                self.compile_method(method, table);
            }
        }
        self.exit_scope();
    }

    fn compile_trait(&mut self, tr: &mut TraitDecl) {
        let Some(trait_id) = self.arena.get(self.module_table, &tr.name) else {
            return;
        };
        let table = self.arena.sym(trait_id).table.expect("trait table");
        self.enter_scope(ScopeKind::Class, Some(trait_id), table);
        for member in tr.members.iter_mut() {
            if let Member::Method(method) = member {
                self.compile_method(method, table);
            }
        }
        self.exit_scope();
    }

    fn compile_method(&mut self, method: &mut FuncDecl, class_table: crate::symbol::TableId) {
        let Some(sym_id) = self.arena.get(class_table, &method.name) else {
            return;
        };
        let table = self.arena.new_table(0);
        self.enter_scope(ScopeKind::Method, Some(sym_id), table);
        self.bind_params(&method.params);
        for stmt in method.body.iter_mut() {
            if self.diags.full() {
                break;
            }
            self.stmt(stmt);
        }
        self.exit_scope();
    }

    fn bind_params(&mut self, params: &[Param]) {
        for param in params {
            let slot = self.alloc_local();
            match self.arena.add_var_at(
                self.u.table,
                &param.name,
                Some(param.desc.clone()),
                false,
                slot,
            ) {
                Ok(id) => self.arena.sym_mut(id).span = param.span,
                Err(err) => self.diags.error(param.span, err.to_string()),
            }
            self.record_local(LocalRec {
                name: param.name.clone(),
                desc: param.desc.clone(),
                pos: slot,
            });
        }
    }

    fn return_stmt(&mut self, exprs: &mut [Expr], span: Span) {
        let Some(func_id) = self.enclosing_func() else {
            self.diags.error(span, "'return' outside of a function");
            return;
        };
        let returns = self
            .arena
            .sym(func_id)
            .proto()
            .map(|p| p.returns.clone())
            .unwrap_or_default();

        if exprs.len() != returns.len() {
            self.diags.error(
                span,
                format!(
                    "function returns {} value(s), found {}",
                    returns.len(),
                    exprs.len()
                ),
            );
        }

        // Values are pushed in declared order.
        for (i, expr) in exprs.iter_mut().enumerate() {
            expr.ctx = ExprCtx::Load;
            self.visit_expr(expr);
            if let (Some(declared), Some(actual)) = (returns.get(i), expr.desc.as_ref()) {
                let actual = actual.clone();
                if !self.check_assignable(declared, &actual, expr.span) {
                    self.diags.error(
                        expr.span,
                        format!("return type mismatch: expected '{declared}', found '{actual}'"),
                    );
                }
            }
        }
        self.emit_ret();
    }

    fn go_stmt(&mut self, call: &mut Expr) {
        if !matches!(call.kind, ExprKind::Call { .. }) {
            self.diags.error(call.span, "'go' requires a function call");
            return;
        }
        // The cooperative scheduler runs spawned routines to completion in
        // FIFO order, which a direct call frame matches exactly.
        call.ctx = ExprCtx::Load;
        self.visit_expr(call);
    }

    fn warn_unused(&mut self) {
        let aliases: Vec<SymbolId> = self.arena.traverse(self.imports).collect();
        for id in aliases {
            let sym = self.arena.sym(id);
            if sym.refcnt == 0 {
                let (name, span) = (sym.name.clone(), sym.span);
                self.diags.warn(span, format!("unused import '{name}'"));
            }
        }
        let symbols: Vec<SymbolId> = self.arena.traverse(self.module_table).collect();
        for id in symbols {
            let sym = self.arena.sym(id);
            if sym.access == Access::Private
                && sym.refcnt == 0
                && sym.name != INIT_NAME
                && matches!(sym.kind, SymbolKind::Var | SymbolKind::Proto)
            {
                let (name, span) = (sym.name.clone(), sym.span);
                self.diags
                    .warn(span, format!("unused private symbol '{name}'"));
            }
        }
    }
}

/// Build a prototype descriptor from parameter and return lists
pub(crate) fn proto_desc(params: &[Param], returns: &[TypeDesc]) -> ProtoDesc {
    let varargs = params.last().is_some_and(|p| p.varargs);
    let param_descs = params.iter().map(|p| p.desc.clone()).collect();
    if varargs {
        ProtoDesc::with_varargs(param_descs, returns.to_vec())
    } else {
        ProtoDesc::new(param_descs, returns.to_vec())
    }
}
