//! Expression analysis and bytecode emission
//!
//! Expressions are visited in postorder so operands land on the stack
//! below their operators. Call arguments are emitted rightmost-first, the
//! receiver last; binary operators emit the right operand before the
//! left, so the left ends up on top when the opcode executes.

use koala_bytecode::{InstArg, JumpKind, Opcode};
use koala_types::{PrimitiveKind, TypeDesc};

use crate::ast::*;
use crate::diag::Span;
use crate::state::{ParserState, ScopeKind, INIT_NAME};
use crate::symbol::{SymbolId, SymbolKind};

/// Where an identifier was found during resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdScope {
    /// A frame local in the current function
    Local,
    /// A member of the enclosing class
    Class,
    /// A module-level symbol
    Module,
    /// An import alias
    Import,
}

/// Identifier resolution result
enum ResolvedId {
    Sym(SymbolId, IdScope),
    /// The identifier names the current package
    PackageSelf,
    NotFound,
}

impl ParserState<'_> {
    // ===== Identifier resolution =====

    /// Resolve `name` per the scope-stack search order: current unit,
    /// enclosing units inner to outer, the package name, the import table
    fn resolve_id(&self, name: &str) -> ResolvedId {
        let scope_of = |scope: ScopeKind| match scope {
            ScopeKind::Module => IdScope::Module,
            ScopeKind::Class => IdScope::Class,
            _ => IdScope::Local,
        };
        if let Some(id) = self.arena.get(self.u.table, name) {
            return ResolvedId::Sym(id, scope_of(self.u.scope));
        }
        for unit in self.ustack.iter().rev() {
            if let Some(id) = self.arena.get(unit.table, name) {
                return ResolvedId::Sym(id, scope_of(unit.scope));
            }
        }
        if name == self.package {
            return ResolvedId::PackageSelf;
        }
        if let Some(id) = self.alias_named(name) {
            return ResolvedId::Sym(id, IdScope::Import);
        }
        ResolvedId::NotFound
    }

    /// Resolve a user-defined type to its class or trait symbol
    ///
    /// Canonicalizes the descriptor in place: an alias used as the path is
    /// replaced by the real module path, and type aliases are substituted.
    pub(crate) fn resolve_userdef_quiet(&mut self, desc: &mut TypeDesc) -> Option<SymbolId> {
        let dims = desc.dims();
        let TypeDesc::UserDef { path, name, .. } = desc else {
            return None;
        };

        if path.is_empty() || *path == self.package {
            let id = self.arena.get(self.module_table, name)?;
            let sym = self.arena.sym(id);
            return match sym.kind {
                SymbolKind::Class | SymbolKind::Trait => Some(id),
                SymbolKind::TypeAlias => {
                    let aliased = sym.desc.clone()?.with_dims(dims);
                    *desc = aliased;
                    self.resolve_userdef_quiet(desc)
                }
                _ => None,
            };
        }

        let alias = self
            .alias_named(path)
            .or_else(|| self.alias_for_path(path))?;
        let real = self.alias_path(alias)?.to_string();
        let table = self.arena.sym(alias).table?;
        let id = self.arena.get(table, name)?;
        self.arena.touch(alias);
        if !matches!(
            self.arena.sym(id).kind,
            SymbolKind::Class | SymbolKind::Trait
        ) {
            return None;
        }
        if let TypeDesc::UserDef { path, .. } = desc {
            *path = real;
        }
        Some(id)
    }

    /// Resolve a user-defined type; the caller reports failures
    pub(crate) fn resolve_userdef(&mut self, desc: &mut TypeDesc, _span: Span) -> Option<SymbolId> {
        self.resolve_userdef_quiet(desc)
    }

    /// Canonicalize a declared type, reporting unresolvable user types
    pub(crate) fn normalize_type(&mut self, desc: &mut TypeDesc, span: Span) {
        if matches!(desc, TypeDesc::UserDef { .. }) && self.resolve_userdef_quiet(desc).is_none() {
            self.diags.error(span, format!("cannot find type '{desc}'"));
        }
    }

    /// Assignability: `TypeDesc::check`, widened along the super chain for
    /// user-defined types
    pub(crate) fn check_assignable(
        &mut self,
        declared: &TypeDesc,
        actual: &TypeDesc,
        _span: Span,
    ) -> bool {
        if declared.check(actual) {
            return true;
        }
        if let (TypeDesc::UserDef { .. }, TypeDesc::UserDef { .. }) = (declared, actual) {
            let mut declared = declared.clone();
            let mut actual = actual.clone();
            if let (Some(sup), Some(sub)) = (
                self.resolve_userdef_quiet(&mut declared),
                self.resolve_userdef_quiet(&mut actual),
            ) {
                return self.is_subtype(sub, sup);
            }
        }
        false
    }

    fn is_subtype(&self, sub: SymbolId, sup: SymbolId) -> bool {
        let mut cur = Some(sub);
        while let Some(id) = cur {
            if id == sup {
                return true;
            }
            cur = self.arena.sym(id).super_;
        }
        false
    }

    // ===== Small emitters =====

    /// Load the current module onto the stack
    ///
    /// In module functions the receiver at slot 0 already is the module;
    /// in methods it is the instance and GETM shifts to its module.
    pub(crate) fn emit_module_receiver(&mut self) {
        self.u.block.append(Opcode::Load, InstArg::Int(0));
        if self.in_method() {
            self.u.block.append(Opcode::GetM, InstArg::None);
        }
    }

    pub(crate) fn emit_module_var_store(&mut self, name: &str) {
        self.emit_module_receiver();
        self.u
            .block
            .append(Opcode::SetField, InstArg::Str(name.to_string()));
    }

    pub(crate) fn emit_store_local(&mut self, slot: i32) {
        self.u.block.append(Opcode::Store, InstArg::Int(slot as i64));
    }

    pub(crate) fn emit_ret(&mut self) {
        self.u.block.append(Opcode::Ret, InstArg::None);
    }

    // ===== Expressions =====

    /// Resolve, type-check and emit one expression
    pub(crate) fn visit_expr(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::IntLit(v) => {
                let v = *v;
                self.literal(expr, InstArg::Int(v), TypeDesc::int());
            }
            ExprKind::FloatLit(v) => {
                let v = *v;
                self.literal(expr, InstArg::Float(v), TypeDesc::float());
            }
            ExprKind::BoolLit(v) => {
                let v = *v;
                self.literal(expr, InstArg::Bool(v), TypeDesc::bool());
            }
            ExprKind::StrLit(s) => {
                let s = s.clone();
                self.literal(expr, InstArg::Str(s), TypeDesc::string());
            }
            ExprKind::NilLit => {
                self.literal(expr, InstArg::Nil, TypeDesc::any());
            }
            ExprKind::SelfLit => self.visit_self(expr),
            ExprKind::SuperLit => {
                self.diags.error(expr.span, "invalid use of 'super'");
            }
            ExprKind::Id(name) => {
                let name = name.clone();
                self.visit_id(expr, &name);
            }
            ExprKind::Paren(_) => {
                let ctx = expr.ctx;
                let ExprKind::Paren(inner) = &mut expr.kind else {
                    unreachable!()
                };
                inner.ctx = ctx;
                self.visit_expr(inner);
                expr.desc = inner.desc.clone();
                expr.sym = inner.sym;
            }
            ExprKind::Binary { .. } => self.visit_binary(expr),
            ExprKind::Unary { .. } => self.visit_unary(expr),
            ExprKind::Attribute { .. } => self.visit_attribute(expr),
            ExprKind::Call { .. } => self.visit_call(expr),
            ExprKind::Subscript { .. } => self.visit_subscript(expr),
            ExprKind::ArrayLit(_) => {
                let ExprKind::ArrayLit(elems) = &mut expr.kind else {
                    unreachable!()
                };
                let mut elems = std::mem::take(elems);
                for elem in elems.iter_mut() {
                    elem.ctx = ExprCtx::Load;
                    self.visit_expr(elem);
                }
                expr.desc = elems
                    .first()
                    .and_then(|e| e.desc.clone())
                    .map(|d| d.with_dims(1));
                self.diags.error(
                    expr.span,
                    "array literals are not supported by the code generator",
                );
            }
            ExprKind::AnonyFunc { .. } => {
                self.diags.error(
                    expr.span,
                    "anonymous functions are not supported by the code generator",
                );
            }
            ExprKind::Seq(_) => {
                let ExprKind::Seq(exprs) = &mut expr.kind else {
                    unreachable!()
                };
                let mut exprs = std::mem::take(exprs);
                for e in exprs.iter_mut() {
                    e.ctx = ExprCtx::Load;
                    self.visit_expr(e);
                }
                expr.desc = exprs.last().and_then(|e| e.desc.clone());
            }
        }
    }

    fn literal(&mut self, expr: &mut Expr, arg: InstArg, desc: TypeDesc) {
        if expr.ctx == ExprCtx::Store {
            self.diags.error(expr.span, "cannot assign to a literal");
            return;
        }
        self.u.block.append(Opcode::LoadK, arg);
        expr.desc = Some(desc);
    }

    fn visit_self(&mut self, expr: &mut Expr) {
        let Some(class_id) = self.enclosing_class() else {
            self.diags
                .error(expr.span, "'self' used outside of a method");
            return;
        };
        if expr.ctx == ExprCtx::Store {
            self.diags.error(expr.span, "cannot assign to 'self'");
            return;
        }
        self.u.block.append(Opcode::Load, InstArg::Int(0));
        expr.desc = self.arena.sym(class_id).desc.clone();
        expr.sym = Some(class_id);
    }

    fn visit_id(&mut self, expr: &mut Expr, name: &str) {
        match self.resolve_id(name) {
            ResolvedId::Sym(id, scope) => {
                self.arena.touch(id);
                expr.sym = Some(id);
                let sym = self.arena.sym(id);
                expr.desc = sym.desc.clone();
                let (kind, konst, index) = (sym.kind, sym.konst, sym.index);
                match (kind, scope) {
                    (SymbolKind::Var, IdScope::Local) => match expr.ctx {
                        ExprCtx::Load => {
                            self.u
                                .block
                                .append(Opcode::Load, InstArg::Int(index as i64));
                        }
                        ExprCtx::Store => {
                            if konst {
                                self.diags
                                    .error(expr.span, format!("cannot assign to const '{name}'"));
                            }
                            self.emit_store_local(index);
                        }
                    },
                    (SymbolKind::Var, IdScope::Class) => {
                        // Bare field access inside a method: the receiver
                        // at slot 0 is the instance.
                        self.u.block.append(Opcode::Load, InstArg::Int(0));
                        let op = match expr.ctx {
                            ExprCtx::Load => Opcode::GetField,
                            ExprCtx::Store => Opcode::SetField,
                        };
                        self.u.block.append(op, InstArg::Str(name.to_string()));
                    }
                    (SymbolKind::Var, IdScope::Module) => {
                        if expr.ctx == ExprCtx::Store && konst {
                            self.diags
                                .error(expr.span, format!("cannot assign to const '{name}'"));
                        }
                        self.emit_module_receiver();
                        let op = match expr.ctx {
                            ExprCtx::Load => Opcode::GetField,
                            ExprCtx::Store => Opcode::SetField,
                        };
                        self.u.block.append(op, InstArg::Str(name.to_string()));
                    }
                    (SymbolKind::Proto | SymbolKind::IProto, _) => {
                        self.diags.error(
                            expr.span,
                            format!("function '{name}' used as a value"),
                        );
                    }
                    (SymbolKind::Class | SymbolKind::Trait, _) => {
                        self.diags
                            .error(expr.span, format!("type '{name}' used as a value"));
                    }
                    (SymbolKind::Alias, _) => {
                        self.diags
                            .error(expr.span, format!("module '{name}' used as a value"));
                    }
                    (SymbolKind::TypeAlias, _) => {
                        self.diags
                            .error(expr.span, format!("type alias '{name}' used as a value"));
                    }
                    (SymbolKind::Var, IdScope::Import) => {
                        self.diags
                            .error(expr.span, format!("cannot find symbol '{name}'"));
                    }
                }
            }
            ResolvedId::PackageSelf => {
                self.diags.error(
                    expr.span,
                    format!("package '{name}' cannot be used as a value"),
                );
            }
            ResolvedId::NotFound => {
                self.diags
                    .error(expr.span, format!("cannot find symbol '{name}'"));
            }
        }
    }

    fn visit_binary(&mut self, expr: &mut Expr) {
        if expr.ctx == ExprCtx::Store {
            self.diags.error(expr.span, "cannot assign to an expression");
            return;
        }
        let ExprKind::Binary { op, lhs, rhs } = &mut expr.kind else {
            unreachable!()
        };
        let op = *op;

        if op.is_logical() {
            // Short-circuit lowering: the left operand decides whether the
            // right is evaluated; the skipped path pushes the constant.
            lhs.ctx = ExprCtx::Load;
            let mut lhs = std::mem::replace(lhs, Box::new(placeholder()));
            let mut rhs = std::mem::replace(rhs, Box::new(placeholder()));
            self.visit_expr(&mut lhs);
            self.require_bool(&lhs);
            let skip_op = if op == BinaryOp::And {
                Opcode::JumpFalse
            } else {
                Opcode::JumpTrue
            };
            let skip = self.u.block.append(skip_op, InstArg::None);
            rhs.ctx = ExprCtx::Load;
            self.visit_expr(&mut rhs);
            self.require_bool(&rhs);
            let done = self.u.block.append(Opcode::Jump, InstArg::None);
            let to_const = self.u.block.offset_from(skip);
            self.u.block.patch_jump(skip, to_const);
            self.u
                .block
                .append(Opcode::LoadK, InstArg::Bool(op == BinaryOp::Or));
            let to_end = self.u.block.offset_from(done);
            self.u.block.patch_jump(done, to_end);
            expr.desc = Some(TypeDesc::bool());
            return;
        }

        // The right operand is emitted first so the left sits on top when
        // the opcode pops.
        rhs.ctx = ExprCtx::Load;
        lhs.ctx = ExprCtx::Load;
        let mut lhs = std::mem::replace(lhs, Box::new(placeholder()));
        let mut rhs = std::mem::replace(rhs, Box::new(placeholder()));
        self.visit_expr(&mut rhs);
        self.visit_expr(&mut lhs);

        let opcode = match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::Ge => Opcode::Ge,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::Le => Opcode::Le,
            BinaryOp::Eq => Opcode::Eq,
            BinaryOp::Neq => Opcode::Neq,
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        };
        self.u.block.append(opcode, InstArg::None);

        let compatible = match (&lhs.desc, &rhs.desc) {
            (Some(l), Some(r)) => l.check(r),
            _ => true,
        };
        if !compatible {
            self.diags.error(
                expr.span,
                format!(
                    "operand type mismatch: '{}' and '{}'",
                    lhs.desc.as_ref().unwrap(),
                    rhs.desc.as_ref().unwrap()
                ),
            );
        }
        expr.desc = if op.is_relational() {
            Some(TypeDesc::bool())
        } else {
            lhs.desc.clone().or_else(|| rhs.desc.clone())
        };
    }

    fn visit_unary(&mut self, expr: &mut Expr) {
        let ExprKind::Unary { op, operand } = &mut expr.kind else {
            unreachable!()
        };
        let op = *op;
        operand.ctx = ExprCtx::Load;
        let mut operand = std::mem::replace(operand, Box::new(placeholder()));
        self.visit_expr(&mut operand);

        let (opcode, ok) = match op {
            UnaryOp::Neg => (
                Opcode::Minus,
                operand.desc.as_ref().map_or(true, |d| {
                    d.check(&TypeDesc::int()) || d.check(&TypeDesc::float())
                }),
            ),
            UnaryOp::Not => (
                Opcode::Lnot,
                operand.desc.as_ref().map_or(true, |d| d.check(&TypeDesc::bool())),
            ),
            UnaryOp::BitNot => (
                Opcode::Bnot,
                operand.desc.as_ref().map_or(true, |d| d.check(&TypeDesc::int())),
            ),
        };
        if !ok {
            self.diags.error(
                expr.span,
                format!(
                    "invalid operand type '{}' for unary operator",
                    operand.desc.as_ref().unwrap()
                ),
            );
        }
        self.u.block.append(opcode, InstArg::None);
        expr.desc = operand.desc.clone();
    }

    fn visit_subscript(&mut self, expr: &mut Expr) {
        let ExprKind::Subscript { left, index } = &mut expr.kind else {
            unreachable!()
        };
        left.ctx = ExprCtx::Load;
        index.ctx = ExprCtx::Load;
        let mut left = std::mem::replace(left, Box::new(placeholder()));
        let mut index = std::mem::replace(index, Box::new(placeholder()));
        self.visit_expr(&mut left);
        self.visit_expr(&mut index);
        if let Some(d) = index.desc.as_ref() {
            if !d.check(&TypeDesc::int()) {
                self.diags
                    .error(index.span, format!("array index must be int, found '{d}'"));
            }
        }
        expr.desc = match left.desc.as_ref() {
            Some(d) if d.dims() > 0 => {
                let inner_dims = d.dims() - 1;
                Some(match d.clone() {
                    TypeDesc::Primitive { kind, .. } => TypeDesc::Primitive {
                        kind,
                        dims: inner_dims,
                    },
                    TypeDesc::UserDef { path, name, .. } => TypeDesc::UserDef {
                        path,
                        name,
                        dims: inner_dims,
                    },
                    other => other,
                })
            }
            Some(d) => {
                self.diags
                    .error(expr.span, format!("type '{d}' cannot be indexed"));
                None
            }
            None => None,
        };
        self.diags.error(
            expr.span,
            "subscript expressions are not supported by the code generator",
        );
    }

    // ===== Attribute access =====

    fn visit_attribute(&mut self, expr: &mut Expr) {
        let ctx = expr.ctx;
        let span = expr.span;
        let ExprKind::Attribute { left, name } = &mut expr.kind else {
            unreachable!()
        };
        let name = name.clone();
        let mut left = std::mem::replace(left, Box::new(placeholder()));

        // `alias.x` and `pkg.x` resolve through a module table without
        // evaluating the left side as a value.
        if let ExprKind::Id(left_name) = &left.kind {
            let left_name = left_name.clone();
            match self.resolve_id(&left_name) {
                ResolvedId::Sym(alias_id, IdScope::Import) => {
                    self.arena.touch(alias_id);
                    let path = self.alias_path(alias_id).unwrap_or_default().to_string();
                    let table = self.arena.sym(alias_id).table;
                    let Some(member) = table.and_then(|t| self.arena.get(t, &name)) else {
                        self.diags
                            .error(span, format!("cannot find '{name}' in '{path}'"));
                        return;
                    };
                    self.member_field_access(expr, member, ctx, span, &name, || {
                        Receiver::ImportedModule(path)
                    });
                    return;
                }
                ResolvedId::PackageSelf => {
                    let Some(member) = self.arena.get(self.module_table, &name) else {
                        self.diags.error(
                            span,
                            format!("cannot find '{name}' in package '{left_name}'"),
                        );
                        return;
                    };
                    self.member_field_access(expr, member, ctx, span, &name, || Receiver::Module);
                    return;
                }
                _ => {}
            }
        }

        // General object attribute: evaluate the left side, then go
        // through its class table.
        left.ctx = ExprCtx::Load;
        self.visit_expr(&mut left);
        let Some(member) = self.instance_member(&mut left, &name, span) else {
            return;
        };
        self.member_field_access(expr, member, ctx, span, &name, || Receiver::OnStack);
    }

    /// Look `name` up in the class table of `left`'s type
    fn instance_member(&mut self, left: &mut Expr, name: &str, span: Span) -> Option<SymbolId> {
        let Some(desc) = left.desc.clone() else {
            return None;
        };
        let mut desc = desc;
        let Some(owner) = self.resolve_userdef_quiet(&mut desc) else {
            self.diags
                .error(span, format!("type '{desc}' has no attribute '{name}'"));
            return None;
        };
        let table = self.arena.sym(owner).table?;
        let member = self.arena.get(table, name);
        if member.is_none() {
            self.diags.error(
                span,
                format!("cannot find '{name}' in '{}'", self.arena.sym(owner).name),
            );
        }
        member
    }

    /// Emit a field load or store through the given receiver
    fn member_field_access(
        &mut self,
        expr: &mut Expr,
        member: SymbolId,
        ctx: ExprCtx,
        span: Span,
        name: &str,
        receiver: impl FnOnce() -> Receiver,
    ) {
        self.arena.touch(member);
        let sym = self.arena.sym(member);
        expr.sym = Some(member);
        expr.desc = sym.desc.clone();
        let (kind, konst) = (sym.kind, sym.konst);

        match kind {
            SymbolKind::Var => {
                if ctx == ExprCtx::Store && konst {
                    self.diags
                        .error(span, format!("cannot assign to const '{name}'"));
                }
                self.emit_receiver(receiver());
                let op = match ctx {
                    ExprCtx::Load => Opcode::GetField,
                    ExprCtx::Store => Opcode::SetField,
                };
                self.u.block.append(op, InstArg::Str(name.to_string()));
            }
            SymbolKind::Proto | SymbolKind::IProto => {
                self.diags
                    .error(span, format!("method '{name}' used as a value"));
            }
            _ => {
                self.diags
                    .error(span, format!("'{name}' is not a field"));
            }
        }
    }

    fn emit_receiver(&mut self, receiver: Receiver) {
        match receiver {
            Receiver::OnStack => {}
            Receiver::Module => self.emit_module_receiver(),
            Receiver::ImportedModule(path) => {
                self.u.block.append(Opcode::LoadM, InstArg::Str(path));
                self.u.block.append(Opcode::GetM, InstArg::None);
            }
        }
    }

    // ===== Calls =====

    fn visit_call(&mut self, expr: &mut Expr) {
        if expr.ctx == ExprCtx::Store {
            self.diags.error(expr.span, "cannot assign to a call");
            return;
        }
        let span = expr.span;
        let ExprKind::Call { callee, args } = &mut expr.kind else {
            unreachable!()
        };
        let mut callee = std::mem::replace(callee, Box::new(placeholder()));
        let mut args = std::mem::take(args);
        let argc = args.len();

        // Arguments are evaluated rightmost first; the receiver follows,
        // so the callee sits on top of the stack at the call opcode.
        for arg in args.iter_mut().rev() {
            arg.ctx = ExprCtx::Load;
            self.visit_expr(arg);
        }

        let Some(target) = self.resolve_callee(&mut callee, span) else {
            return;
        };

        // Receiver sequence, then the dispatch opcode.
        let (opcode, name, sym_id) = match target {
            Callee::ModuleFunc { name, sym } => {
                self.emit_module_receiver();
                (Opcode::Call, name, Some(sym))
            }
            Callee::ClassMethod { name, sym } => {
                self.u.block.append(Opcode::Load, InstArg::Int(0));
                (Opcode::Call, name, Some(sym))
            }
            Callee::SuperMethod { name, sym } => {
                self.u.block.append(Opcode::Load, InstArg::Int(0));
                self.u.block.append(Opcode::Super, InstArg::Int(1));
                (Opcode::Call, name, Some(sym))
            }
            Callee::ImportFunc { path, name, sym } => {
                self.u.block.append(Opcode::LoadM, InstArg::Str(path));
                self.u.block.append(Opcode::GetM, InstArg::None);
                (Opcode::Call, name, Some(sym))
            }
            Callee::MethodOnStack { name, sym } => (Opcode::Call, name, Some(sym)),
            Callee::Constructor {
                class,
                name,
                import_path,
            } => {
                match import_path {
                    Some(path) => {
                        self.u.block.append(Opcode::LoadM, InstArg::Str(path));
                        self.u.block.append(Opcode::GetM, InstArg::None);
                    }
                    None => self.emit_module_receiver(),
                }
                self.u
                    .block
                    .append_call(Opcode::New, InstArg::Str(name), argc as u16);
                self.check_ctor_args(class, &args, span);
                expr.desc = self.arena.sym(class).desc.clone();
                expr.sym = Some(class);
                expr.argc = argc;
                return;
            }
        };
        self.u
            .block
            .append_call(opcode, InstArg::Str(name), argc as u16);
        expr.argc = argc;

        if let Some(sym_id) = sym_id {
            expr.sym = Some(sym_id);
            if let Some(proto) = self.arena.sym(sym_id).proto().cloned() {
                self.check_call_args(&proto, &args, span);
                expr.desc = match proto.returns.len() {
                    1 => Some(proto.returns[0].clone()),
                    _ => None,
                };
            }
        }
    }

    fn resolve_callee(&mut self, callee: &mut Expr, span: Span) -> Option<Callee> {
        match &mut callee.kind {
            ExprKind::Id(name) => {
                let name = name.clone();
                match self.resolve_id(&name) {
                    ResolvedId::Sym(id, scope) => {
                        self.arena.touch(id);
                        match (self.arena.sym(id).kind, scope) {
                            (SymbolKind::Proto, IdScope::Class) => {
                                Some(Callee::ClassMethod { name, sym: id })
                            }
                            (SymbolKind::Proto, IdScope::Module) => {
                                Some(Callee::ModuleFunc { name, sym: id })
                            }
                            (SymbolKind::Class, _) => Some(Callee::Constructor {
                                class: id,
                                name,
                                import_path: None,
                            }),
                            (SymbolKind::Trait, _) => {
                                self.diags.error(
                                    span,
                                    format!("trait '{name}' cannot be instantiated"),
                                );
                                None
                            }
                            (SymbolKind::Var, _) => {
                                self.diags.error(
                                    span,
                                    format!("'{name}' is not callable"),
                                );
                                None
                            }
                            _ => {
                                self.diags
                                    .error(span, format!("'{name}' is not callable"));
                                None
                            }
                        }
                    }
                    ResolvedId::PackageSelf => {
                        self.diags
                            .error(span, format!("package '{name}' is not callable"));
                        None
                    }
                    ResolvedId::NotFound => {
                        self.diags
                            .error(span, format!("cannot find symbol '{name}'"));
                        None
                    }
                }
            }
            ExprKind::Attribute { left, name } => {
                let name = name.clone();
                let mut left = std::mem::replace(left, Box::new(placeholder()));
                self.resolve_attr_callee(&mut left, &name, span)
            }
            _ => {
                self.diags.error(span, "expression is not callable");
                None
            }
        }
    }

    fn resolve_attr_callee(
        &mut self,
        left: &mut Expr,
        name: &str,
        span: Span,
    ) -> Option<Callee> {
        // `super.m(...)`
        if matches!(left.kind, ExprKind::SuperLit) {
            let Some(class_id) = self.enclosing_class() else {
                self.diags.error(span, "'super' used outside of a method");
                return None;
            };
            let Some(super_id) = self.arena.sym(class_id).super_ else {
                self.diags.error(
                    span,
                    format!("class '{}' has no base class", self.arena.sym(class_id).name),
                );
                return None;
            };
            let table = self.arena.sym(super_id).table?;
            let Some(member) = self.arena.get(table, name) else {
                self.diags.error(
                    span,
                    format!("cannot find '{name}' in '{}'", self.arena.sym(super_id).name),
                );
                return None;
            };
            return Some(Callee::SuperMethod {
                name: name.to_string(),
                sym: member,
            });
        }

        // `alias.f(...)` and `pkg.f(...)`
        if let ExprKind::Id(left_name) = &left.kind {
            let left_name = left_name.clone();
            match self.resolve_id(&left_name) {
                ResolvedId::Sym(alias_id, IdScope::Import) => {
                    self.arena.touch(alias_id);
                    let path = self.alias_path(alias_id).unwrap_or_default().to_string();
                    let table = self.arena.sym(alias_id).table?;
                    let Some(member) = self.arena.get(table, name) else {
                        self.diags
                            .error(span, format!("cannot find '{name}' in '{path}'"));
                        return None;
                    };
                    return match self.arena.sym(member).kind {
                        SymbolKind::Proto => Some(Callee::ImportFunc {
                            path,
                            name: name.to_string(),
                            sym: member,
                        }),
                        SymbolKind::Class => Some(Callee::Constructor {
                            class: member,
                            name: name.to_string(),
                            import_path: Some(path),
                        }),
                        _ => {
                            self.diags
                                .error(span, format!("'{name}' is not callable"));
                            None
                        }
                    };
                }
                ResolvedId::PackageSelf => {
                    let Some(member) = self.arena.get(self.module_table, name) else {
                        self.diags
                            .error(span, format!("cannot find symbol '{name}'"));
                        return None;
                    };
                    return match self.arena.sym(member).kind {
                        SymbolKind::Proto => Some(Callee::ModuleFunc {
                            name: name.to_string(),
                            sym: member,
                        }),
                        SymbolKind::Class => Some(Callee::Constructor {
                            class: member,
                            name: name.to_string(),
                            import_path: None,
                        }),
                        _ => {
                            self.diags
                                .error(span, format!("'{name}' is not callable"));
                            None
                        }
                    };
                }
                _ => {}
            }
        }

        // Method call on an evaluated receiver.
        left.ctx = ExprCtx::Load;
        self.visit_expr(left);
        let member = self.instance_member(left, name, span)?;
        self.arena.touch(member);
        match self.arena.sym(member).kind {
            SymbolKind::Proto | SymbolKind::IProto => Some(Callee::MethodOnStack {
                name: name.to_string(),
                sym: member,
            }),
            _ => {
                self.diags
                    .error(span, format!("'{name}' is not a method"));
                None
            }
        }
    }

    fn check_call_args(&mut self, proto: &koala_types::ProtoDesc, args: &[Expr], span: Span) {
        if !proto.check_arity(args.len()) {
            self.diags.error(
                span,
                format!(
                    "expected {}{} argument(s), found {}",
                    proto.min_args(),
                    if proto.varargs { "+" } else { "" },
                    args.len()
                ),
            );
            return;
        }
        for (i, arg) in args.iter().enumerate() {
            if let (Some(declared), Some(actual)) = (proto.param_at(i), arg.desc.as_ref()) {
                let declared = declared.clone();
                let actual = actual.clone();
                if !self.check_assignable(&declared, &actual, arg.span) {
                    self.diags.error(
                        arg.span,
                        format!("argument {}: expected '{declared}', found '{actual}'", i + 1),
                    );
                }
            }
        }
    }

    fn check_ctor_args(&mut self, class: SymbolId, args: &[Expr], span: Span) {
        let init_proto = self
            .arena
            .sym(class)
            .table
            .and_then(|t| self.arena.get(t, INIT_NAME))
            .and_then(|id| self.arena.sym(id).proto().cloned());
        match init_proto {
            Some(proto) => self.check_call_args(&proto, args, span),
            None => {
                if !args.is_empty() {
                    self.diags.error(
                        span,
                        format!(
                            "class '{}' has no '{INIT_NAME}' but was given {} argument(s)",
                            self.arena.sym(class).name,
                            args.len()
                        ),
                    );
                }
            }
        }
    }

    // ===== Statements with control flow =====

    pub(crate) fn assign_stmt(&mut self, lhs: &mut Expr, rhs: &mut Expr) {
        rhs.ctx = ExprCtx::Load;
        self.visit_expr(rhs);
        lhs.ctx = ExprCtx::Store;
        self.visit_expr(lhs);
        if let (Some(declared), Some(actual)) = (lhs.desc.clone(), rhs.desc.clone()) {
            if !self.check_assignable(&declared, &actual, rhs.span) {
                self.diags.error(
                    rhs.span,
                    format!("cannot assign '{actual}' to '{declared}'"),
                );
            }
        }
    }

    pub(crate) fn compound_assign_stmt(
        &mut self,
        op: BinaryOp,
        lhs: &mut Expr,
        rhs: &mut Expr,
    ) {
        // `x op= e` evaluates as `x = x op e`: the right operand first,
        // then the current value, the operator, then the store.
        rhs.ctx = ExprCtx::Load;
        self.visit_expr(rhs);
        let mut load = lhs.clone();
        load.ctx = ExprCtx::Load;
        self.visit_expr(&mut load);
        let opcode = match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            _ => {
                self.diags
                    .error(lhs.span, "invalid compound assignment operator");
                return;
            }
        };
        self.u.block.append(opcode, InstArg::None);
        if let (Some(l), Some(r)) = (load.desc.as_ref(), rhs.desc.as_ref()) {
            if !l.check(r) {
                self.diags.error(
                    rhs.span,
                    format!("operand type mismatch: '{l}' and '{r}'"),
                );
            }
        }
        lhs.ctx = ExprCtx::Store;
        self.visit_expr(lhs);
    }

    pub(crate) fn emit_if(&mut self, cond: &mut Expr, body: &mut [Stmt], orelse: &mut [Stmt]) {
        cond.ctx = ExprCtx::Load;
        self.visit_expr(cond);
        self.require_bool(cond);

        let jf = self.u.block.append(Opcode::JumpFalse, InstArg::None);
        self.enter_block(true);
        for stmt in body.iter_mut() {
            if self.diags.full() {
                break;
            }
            self.stmt(stmt);
        }
        self.exit_scope();

        if orelse.is_empty() {
            let delta = self.u.block.offset_from(jf);
            self.u.block.patch_jump(jf, delta);
            return;
        }

        let jend = self.u.block.append(Opcode::Jump, InstArg::None);
        let delta = self.u.block.offset_from(jf);
        self.u.block.patch_jump(jf, delta);

        self.enter_block(true);
        for stmt in orelse.iter_mut() {
            if self.diags.full() {
                break;
            }
            self.stmt(stmt);
        }
        self.exit_scope();

        let delta = self.u.block.offset_from(jend);
        self.u.block.patch_jump(jend, delta);
    }

    pub(crate) fn emit_while(&mut self, pre_test: bool, cond: &mut Expr, body: &mut [Stmt]) {
        self.enter_block(true);
        self.u.loop_ = true;

        let entry_jump = if pre_test {
            // The first iteration evaluates the condition: jump over the
            // body to the test.
            Some(self.u.block.append(Opcode::Jump, InstArg::None))
        } else {
            None
        };

        self.enter_block(true);
        for stmt in body.iter_mut() {
            if self.diags.full() {
                break;
            }
            self.stmt(stmt);
        }
        self.exit_scope();

        if let Some(j) = entry_jump {
            let delta = self.u.block.offset_from(j);
            self.u.block.patch_jump(j, delta);
        }

        cond.ctx = ExprCtx::Load;
        self.visit_expr(cond);
        self.require_bool(cond);

        let jt = self.u.block.append(Opcode::JumpTrue, InstArg::None);
        let body_start = entry_jump
            .map(|j| self.u.block.insts[j].upbytes)
            .unwrap_or(0) as i64;
        let back = body_start - self.u.block.insts[jt].upbytes as i64;
        self.u.block.patch_jump(jt, back);

        self.u.block.patch_loop_jumps();
        self.exit_scope();
    }

    pub(crate) fn emit_for(
        &mut self,
        init: Option<&mut Stmt>,
        cond: Option<&mut Expr>,
        step: Option<&mut Stmt>,
        body: &mut [Stmt],
    ) {
        // The init variable scopes over the whole loop.
        self.enter_block(true);
        if let Some(init) = init {
            self.stmt(init);
        }

        self.enter_block(true);
        self.u.loop_ = true;

        let entry_jump = cond
            .as_ref()
            .map(|_| self.u.block.append(Opcode::Jump, InstArg::None));

        self.enter_block(true);
        for stmt in body.iter_mut() {
            if self.diags.full() {
                break;
            }
            self.stmt(stmt);
        }
        self.exit_scope();

        // `continue` re-enters at the step code.
        let step_start = self.u.block.bytes;
        if let Some(step) = step {
            self.stmt(step);
        }

        match cond {
            Some(cond) => {
                let j = entry_jump.expect("entry jump present with a condition");
                let delta = self.u.block.offset_from(j);
                self.u.block.patch_jump(j, delta);

                cond.ctx = ExprCtx::Load;
                self.visit_expr(cond);
                self.require_bool(cond);

                let jt = self.u.block.append(Opcode::JumpTrue, InstArg::None);
                let body_start = self.u.block.insts[j].upbytes as i64;
                let back = body_start - self.u.block.insts[jt].upbytes as i64;
                self.u.block.patch_jump(jt, back);
            }
            None => {
                let j = self.u.block.append(Opcode::Jump, InstArg::None);
                let back = -(self.u.block.insts[j].upbytes as i64);
                self.u.block.patch_jump(j, back);
            }
        }

        self.u.block.patch_loop_jumps_to(step_start);
        self.exit_scope();
        self.exit_scope();
    }

    pub(crate) fn emit_switch(&mut self, scrutinee: &mut Expr, cases: &mut [SwitchCase]) {
        // Lowered to an equality chain; each arm jumps to the end.
        self.enter_block(true);

        // Order: value arms first, then default.
        let mut end_jumps = Vec::new();
        let mut default_idx = None;
        for (i, case) in cases.iter().enumerate() {
            if case.value.is_none() {
                default_idx = Some(i);
            }
        }

        for case in cases.iter_mut() {
            let Some(value) = case.value.as_mut() else {
                continue;
            };
            value.ctx = ExprCtx::Load;
            self.visit_expr(value);
            let mut test = scrutinee.clone();
            test.ctx = ExprCtx::Load;
            self.visit_expr(&mut test);
            if let (Some(l), Some(r)) = (test.desc.as_ref(), value.desc.as_ref()) {
                if !l.check(r) {
                    self.diags.error(
                        value.span,
                        format!("case type '{r}' does not match switch type '{l}'"),
                    );
                }
            }
            self.u.block.append(Opcode::Eq, InstArg::None);
            let jf = self.u.block.append(Opcode::JumpFalse, InstArg::None);

            self.enter_block(true);
            for stmt in case.body.iter_mut() {
                if self.diags.full() {
                    break;
                }
                self.stmt(stmt);
            }
            self.exit_scope();

            end_jumps.push(self.u.block.append(Opcode::Jump, InstArg::None));
            let delta = self.u.block.offset_from(jf);
            self.u.block.patch_jump(jf, delta);
        }

        if let Some(i) = default_idx {
            self.enter_block(true);
            for stmt in cases[i].body.iter_mut() {
                if self.diags.full() {
                    break;
                }
                self.stmt(stmt);
            }
            self.exit_scope();
        }

        for j in end_jumps {
            let delta = self.u.block.offset_from(j);
            self.u.block.patch_jump(j, delta);
        }
        self.exit_scope();
    }

    pub(crate) fn emit_break_continue(&mut self, is_break: bool, level: usize, span: Span) {
        if !self.inside_loop() {
            let what = if is_break { "break" } else { "continue" };
            self.diags
                .error(span, format!("'{what}' outside of a loop"));
            return;
        }
        let idx = self.u.block.append(Opcode::Jump, InstArg::None);
        let kind = if is_break {
            JumpKind::Break
        } else {
            JumpKind::Continue
        };
        self.u.block.add_jump_level(kind, idx, level);
    }

    fn require_bool(&mut self, expr: &Expr) {
        if let Some(desc) = expr.desc.as_ref() {
            if !desc.check(&TypeDesc::primitive(PrimitiveKind::Bool)) {
                self.diags.error(
                    expr.span,
                    format!("condition must be bool, found '{desc}'"),
                );
            }
        }
    }
}

/// Internal callee classification
enum Callee {
    ModuleFunc {
        name: String,
        sym: SymbolId,
    },
    ClassMethod {
        name: String,
        sym: SymbolId,
    },
    SuperMethod {
        name: String,
        sym: SymbolId,
    },
    ImportFunc {
        path: String,
        name: String,
        sym: SymbolId,
    },
    MethodOnStack {
        name: String,
        sym: SymbolId,
    },
    Constructor {
        class: SymbolId,
        name: String,
        import_path: Option<String>,
    },
}

/// Receiver emission strategy for field access
enum Receiver {
    /// The receiver was already evaluated onto the stack
    OnStack,
    /// The current module
    Module,
    /// An imported module loaded by path
    ImportedModule(String),
}

fn placeholder() -> Expr {
    Expr::new(ExprKind::NilLit, Span::default())
}
