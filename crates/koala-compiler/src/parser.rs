//! Recursive-descent parser
//!
//! Consumes the token stream and produces the statement list of one
//! source file. Parse errors go to the shared diagnostic buffer; recovery
//! skips to the next statement boundary so several errors surface in one
//! run.

use koala_types::TypeDesc;

use crate::ast::*;
use crate::diag::{DiagBag, Span};
use crate::lexer::{tokenize, Token};

/// Parse one source file into its statement list
pub fn parse_source(source: &str, diags: &mut DiagBag) -> Vec<Stmt> {
    let tokens = tokenize(source, diags);
    Parser::new(tokens, diags).parse_program()
}

struct Parser<'a> {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    diags: &'a mut DiagBag,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<(Token, Span)>, diags: &'a mut DiagBag) -> Self {
        Self {
            tokens,
            pos: 0,
            diags,
        }
    }

    // ===== Token stream helpers =====

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1).map(|(t, _)| t)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }

    fn prev_span(&self) -> Span {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> bool {
        if self.eat(token) {
            true
        } else {
            let span = self.span();
            self.diags.error(span, format!("expected {what}"));
            false
        }
    }

    fn expect_ident(&mut self, what: &str) -> Option<(String, Span)> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                let span = self.span();
                self.pos += 1;
                Some((name, span))
            }
            _ => {
                let span = self.span();
                self.diags.error(span, format!("expected {what}"));
                None
            }
        }
    }

    /// Skip to the next plausible statement start after an error
    fn synchronize(&mut self) {
        while let Some(token) = self.peek() {
            match token {
                Token::Var
                | Token::Const
                | Token::Func
                | Token::Class
                | Token::Trait
                | Token::Import
                | Token::TypeAlias
                | Token::If
                | Token::While
                | Token::For
                | Token::Return
                | Token::RBrace => return,
                _ => {
                    self.pos += 1;
                }
            }
        }
    }

    // ===== Program =====

    fn parse_program(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            if self.diags.full() {
                break;
            }
            let before = self.pos;
            match self.parse_stmt() {
                Some(stmt) => stmts.push(stmt),
                None => {
                    self.synchronize();
                    if self.pos == before {
                        self.pos += 1;
                    }
                }
            }
        }
        stmts
    }

    // ===== Statements =====

    fn parse_stmt(&mut self) -> Option<Stmt> {
        self.eat(&Token::Semi);
        match self.peek()? {
            Token::Import => self.parse_import(),
            Token::Var => self.parse_var_decl(false),
            Token::Const => self.parse_var_decl(true),
            Token::Func => self.parse_func_decl().map(Stmt::FuncDecl),
            Token::Class => self.parse_class_decl(),
            Token::Trait => self.parse_trait_decl(),
            Token::TypeAlias => self.parse_typealias(),
            Token::Return => self.parse_return(),
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::Do => self.parse_do_while(),
            Token::For => self.parse_for(),
            Token::Switch => self.parse_switch(),
            Token::Break => {
                let span = self.span();
                self.pos += 1;
                let level = self.parse_level();
                Some(Stmt::Break { level, span })
            }
            Token::Continue => {
                let span = self.span();
                self.pos += 1;
                let level = self.parse_level();
                Some(Stmt::Continue { level, span })
            }
            Token::Go => {
                self.pos += 1;
                let call = self.parse_expr()?;
                Some(Stmt::Go(call))
            }
            Token::LBrace => {
                let body = self.parse_block()?;
                Some(Stmt::Block(body))
            }
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_level(&mut self) -> usize {
        if let Some(Token::IntLit(n)) = self.peek() {
            let level = (*n).max(1) as usize;
            self.pos += 1;
            level
        } else {
            1
        }
    }

    fn parse_import(&mut self) -> Option<Stmt> {
        let start = self.span();
        self.pos += 1;
        let alias = match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Some(name)
            }
            _ => None,
        };
        match self.bump() {
            Some(Token::StrLit(path)) => Some(Stmt::Import {
                alias,
                path,
                span: start.to(self.prev_span()),
            }),
            _ => {
                self.diags.error(start, "expected module path string");
                None
            }
        }
    }

    fn parse_var_decl(&mut self, konst: bool) -> Option<Stmt> {
        let start = self.span();
        self.pos += 1;
        let (first, first_span) = self.expect_ident("variable name")?;

        // `var a, b, c type` declares a list with a shared type.
        let mut names = vec![(first, first_span)];
        while self.eat(&Token::Comma) {
            names.push(self.expect_ident("variable name")?);
        }

        if names.len() > 1 {
            let desc = self.parse_type()?;
            let decls = names
                .into_iter()
                .map(|(name, span)| VarDecl {
                    name,
                    desc: Some(desc.clone()),
                    konst,
                    init: None,
                    span: start.to(span),
                })
                .collect();
            return Some(Stmt::VarDeclList(decls));
        }

        let (name, name_span) = names.pop().unwrap();
        let desc = if self.at(&Token::Assign) || self.peek().is_none() {
            None
        } else {
            Some(self.parse_type()?)
        };
        let init = if self.eat(&Token::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Some(Stmt::VarDecl(VarDecl {
            name,
            desc,
            konst,
            init,
            span: start.to(name_span),
        }))
    }

    fn parse_func_decl(&mut self) -> Option<FuncDecl> {
        let start = self.span();
        self.pos += 1;
        let (name, _) = self.expect_ident("function name")?;
        let params = self.parse_params()?;
        let returns = self.parse_returns()?;
        let body = self.parse_block()?;
        Some(FuncDecl {
            name,
            params,
            returns,
            body,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_params(&mut self) -> Option<Vec<Param>> {
        self.expect(&Token::LParen, "'('");
        let mut params = Vec::new();
        while !self.at(&Token::RParen) {
            if !params.is_empty() && !self.expect(&Token::Comma, "','") {
                return None;
            }
            let (name, span) = self.expect_ident("parameter name")?;
            let varargs = self.eat(&Token::Ellipsis);
            let desc = self.parse_type()?;
            params.push(Param {
                name,
                desc,
                varargs,
                span,
            });
            if varargs {
                break;
            }
        }
        self.expect(&Token::RParen, "')'");
        Some(params)
    }

    fn parse_returns(&mut self) -> Option<Vec<TypeDesc>> {
        if self.at(&Token::LBrace) {
            return Some(Vec::new());
        }
        if self.eat(&Token::LParen) {
            let mut returns = Vec::new();
            while !self.at(&Token::RParen) {
                if !returns.is_empty() && !self.expect(&Token::Comma, "','") {
                    return None;
                }
                returns.push(self.parse_type()?);
            }
            self.expect(&Token::RParen, "')'");
            return Some(returns);
        }
        Some(vec![self.parse_type()?])
    }

    fn parse_class_decl(&mut self) -> Option<Stmt> {
        let start = self.span();
        self.pos += 1;
        let (name, _) = self.expect_ident("class name")?;
        let super_ = if self.eat(&Token::Extends) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let mut traits = Vec::new();
        if self.eat(&Token::With) {
            traits.push(self.parse_type()?);
            while self.eat(&Token::Comma) {
                traits.push(self.parse_type()?);
            }
        }
        let members = self.parse_members()?;
        Some(Stmt::ClassDecl(ClassDecl {
            name,
            super_,
            traits,
            members,
            span: start.to(self.prev_span()),
        }))
    }

    fn parse_trait_decl(&mut self) -> Option<Stmt> {
        let start = self.span();
        self.pos += 1;
        let (name, _) = self.expect_ident("trait name")?;
        let mut traits = Vec::new();
        if self.eat(&Token::Extends) {
            traits.push(self.parse_type()?);
            while self.eat(&Token::Comma) {
                traits.push(self.parse_type()?);
            }
        }
        let members = self.parse_members()?;
        Some(Stmt::TraitDecl(TraitDecl {
            name,
            traits,
            members,
            span: start.to(self.prev_span()),
        }))
    }

    fn parse_members(&mut self) -> Option<Vec<Member>> {
        self.expect(&Token::LBrace, "'{'");
        let mut members = Vec::new();
        while !self.at(&Token::RBrace) && self.peek().is_some() {
            self.eat(&Token::Semi);
            match self.peek() {
                Some(Token::Var) => match self.parse_var_decl(false) {
                    Some(Stmt::VarDecl(decl)) => members.push(Member::Field(decl)),
                    Some(Stmt::VarDeclList(decls)) => {
                        members.extend(decls.into_iter().map(Member::Field));
                    }
                    _ => self.synchronize(),
                },
                Some(Token::Func) => {
                    let start = self.span();
                    self.pos += 1;
                    let Some((name, _)) = self.expect_ident("method name") else {
                        self.synchronize();
                        continue;
                    };
                    let params = self.parse_params()?;
                    let returns = self.parse_returns()?;
                    if self.at(&Token::LBrace) {
                        let body = self.parse_block()?;
                        members.push(Member::Method(FuncDecl {
                            name,
                            params,
                            returns,
                            body,
                            span: start.to(self.prev_span()),
                        }));
                    } else {
                        members.push(Member::Proto(ProtoDecl {
                            name,
                            params,
                            returns,
                            span: start.to(self.prev_span()),
                        }));
                    }
                }
                Some(Token::RBrace) | None => break,
                _ => {
                    let span = self.span();
                    self.diags.error(span, "expected field or method declaration");
                    self.pos += 1;
                    self.synchronize();
                }
            }
        }
        self.expect(&Token::RBrace, "'}'");
        Some(members)
    }

    fn parse_typealias(&mut self) -> Option<Stmt> {
        let start = self.span();
        self.pos += 1;
        let (name, _) = self.expect_ident("alias name")?;
        let desc = self.parse_type()?;
        Some(Stmt::TypeAlias {
            name,
            desc,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        let span = self.span();
        self.pos += 1;
        let mut exprs = Vec::new();
        if self.starts_expr() {
            exprs.push(self.parse_expr()?);
            while self.eat(&Token::Comma) {
                exprs.push(self.parse_expr()?);
            }
        }
        Some(Stmt::Return { exprs, span })
    }

    fn starts_expr(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Ident(_)
                    | Token::IntLit(_)
                    | Token::FloatLit(_)
                    | Token::StrLit(_)
                    | Token::True
                    | Token::False
                    | Token::Nil
                    | Token::SelfKw
                    | Token::SuperKw
                    | Token::LParen
                    | Token::LBracket
                    | Token::Minus
                    | Token::Not
                    | Token::Tilde
                    | Token::Func
            )
        )
    }

    fn parse_if(&mut self) -> Option<Stmt> {
        self.pos += 1;
        self.expect(&Token::LParen, "'('");
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen, "')'");
        let body = self.parse_block()?;
        let orelse = if self.eat(&Token::Else) {
            if self.at(&Token::If) {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Some(Stmt::If { cond, body, orelse })
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        self.pos += 1;
        self.expect(&Token::LParen, "'('");
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen, "')'");
        let body = self.parse_block()?;
        Some(Stmt::While {
            pre_test: true,
            cond,
            body,
        })
    }

    fn parse_do_while(&mut self) -> Option<Stmt> {
        self.pos += 1;
        let body = self.parse_block()?;
        self.expect(&Token::While, "'while'");
        self.expect(&Token::LParen, "'('");
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen, "')'");
        Some(Stmt::While {
            pre_test: false,
            cond,
            body,
        })
    }

    fn parse_for(&mut self) -> Option<Stmt> {
        self.pos += 1;

        // `for x in e { ... }`
        if let (Some(Token::Ident(name)), Some(Token::In)) = (self.peek(), self.peek2()) {
            let var = name.clone();
            self.pos += 2;
            let iter = self.parse_expr()?;
            let body = self.parse_block()?;
            return Some(Stmt::ForEach { var, iter, body });
        }

        // `for (init; cond; step) { ... }`
        self.expect(&Token::LParen, "'('");
        let init = if self.at(&Token::Semi) {
            None
        } else {
            Some(Box::new(self.parse_simple_stmt()?))
        };
        self.expect(&Token::Semi, "';'");
        let cond = if self.at(&Token::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::Semi, "';'");
        let step = if self.at(&Token::RParen) {
            None
        } else {
            Some(Box::new(self.parse_simple_stmt()?))
        };
        self.expect(&Token::RParen, "')'");
        let body = self.parse_block()?;
        Some(Stmt::ForTriple {
            init,
            cond,
            step,
            body,
        })
    }

    /// Var decl, assignment or expression; used in for-loop headers
    fn parse_simple_stmt(&mut self) -> Option<Stmt> {
        match self.peek() {
            Some(Token::Var) => self.parse_var_decl(false),
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_switch(&mut self) -> Option<Stmt> {
        self.pos += 1;
        self.expect(&Token::LParen, "'('");
        let expr = self.parse_expr()?;
        self.expect(&Token::RParen, "')'");
        self.expect(&Token::LBrace, "'{'");
        let mut cases = Vec::new();
        while !self.at(&Token::RBrace) && self.peek().is_some() {
            let span = self.span();
            let value = if self.eat(&Token::Case) {
                Some(self.parse_expr()?)
            } else if self.eat(&Token::Default) {
                None
            } else {
                self.diags.error(span, "expected 'case' or 'default'");
                return None;
            };
            self.expect(&Token::Colon, "':' after case value");
            let mut body = Vec::new();
            while !matches!(
                self.peek(),
                Some(Token::Case | Token::Default | Token::RBrace) | None
            ) {
                body.push(self.parse_stmt()?);
            }
            body.shrink_to_fit();
            cases.push(SwitchCase { value, body, span });
        }
        self.expect(&Token::RBrace, "'}'");
        Some(Stmt::Switch { expr, cases })
    }

    fn parse_block(&mut self) -> Option<Vec<Stmt>> {
        self.expect(&Token::LBrace, "'{'");
        let mut stmts = Vec::new();
        while !self.at(&Token::RBrace) && self.peek().is_some() {
            if self.diags.full() {
                return None;
            }
            let before = self.pos;
            match self.parse_stmt() {
                Some(stmt) => stmts.push(stmt),
                None => {
                    self.synchronize();
                    if self.pos == before {
                        self.pos += 1;
                    }
                }
            }
            self.eat(&Token::Semi);
        }
        self.expect(&Token::RBrace, "'}'");
        Some(stmts)
    }

    fn parse_expr_or_assign(&mut self) -> Option<Stmt> {
        let lhs = self.parse_expr()?;
        let op = match self.peek() {
            Some(Token::Assign) => {
                self.pos += 1;
                let rhs = self.parse_expr()?;
                return Some(Stmt::Assign { lhs, rhs });
            }
            Some(Token::PlusAssign) => Some(BinaryOp::Add),
            Some(Token::MinusAssign) => Some(BinaryOp::Sub),
            Some(Token::StarAssign) => Some(BinaryOp::Mul),
            Some(Token::SlashAssign) => Some(BinaryOp::Div),
            Some(Token::PercentAssign) => Some(BinaryOp::Mod),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let rhs = self.parse_expr()?;
            return Some(Stmt::CompoundAssign { op, lhs, rhs });
        }
        Some(Stmt::Expr(lhs))
    }

    // ===== Types =====

    fn parse_type(&mut self) -> Option<TypeDesc> {
        let mut dims = 0u8;
        while self.at(&Token::LBracket) && self.peek2() == Some(&Token::RBracket) {
            self.pos += 2;
            dims += 1;
        }
        let span = self.span();
        let base = match self.bump() {
            Some(Token::IntType) => TypeDesc::int(),
            Some(Token::FloatType) => TypeDesc::float(),
            Some(Token::BoolType) => TypeDesc::bool(),
            Some(Token::StringType) => TypeDesc::string(),
            Some(Token::AnyType) => TypeDesc::any(),
            Some(Token::Ident(first)) => {
                if self.eat(&Token::Dot) {
                    let (name, _) = self.expect_ident("type name")?;
                    TypeDesc::user_def(first, name)
                } else {
                    TypeDesc::user_def("", first)
                }
            }
            _ => {
                self.diags.error(span, "expected type");
                return None;
            }
        };
        Some(base.with_dims(dims))
    }

    // ===== Expressions =====

    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Some(lhs)
    }

    fn parse_and(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Some(lhs)
    }

    fn parse_equality(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Neq,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_relational()?;
            lhs = binary(op, lhs, rhs);
        }
        Some(lhs)
    }

    fn parse_relational(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::Ge,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::Le,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs);
        }
        Some(lhs)
    }

    fn parse_additive(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        Some(lhs)
    }

    fn parse_multiplicative(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        let span = self.span();
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Not) => Some(UnaryOp::Not),
            Some(Token::Tilde) => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.parse_unary()?;
            let full = span.to(operand.span);
            return Some(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                full,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let (name, span) = self.expect_ident("attribute name")?;
                    let full = expr.span.to(span);
                    expr = Expr::new(
                        ExprKind::Attribute {
                            left: Box::new(expr),
                            name,
                        },
                        full,
                    );
                }
                Some(Token::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    while !self.at(&Token::RParen) {
                        if !args.is_empty() && !self.expect(&Token::Comma, "','") {
                            return None;
                        }
                        args.push(self.parse_expr()?);
                    }
                    self.expect(&Token::RParen, "')'");
                    let full = expr.span.to(self.prev_span());
                    let argc = args.len();
                    let mut call = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        full,
                    );
                    call.argc = argc;
                    expr = call;
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket, "']'");
                    let full = expr.span.to(self.prev_span());
                    expr = Expr::new(
                        ExprKind::Subscript {
                            left: Box::new(expr),
                            index: Box::new(index),
                        },
                        full,
                    );
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let span = self.span();
        let kind = match self.bump()? {
            Token::IntLit(v) => ExprKind::IntLit(v),
            Token::FloatLit(v) => ExprKind::FloatLit(v),
            Token::StrLit(v) => ExprKind::StrLit(v),
            Token::True => ExprKind::BoolLit(true),
            Token::False => ExprKind::BoolLit(false),
            Token::Nil => ExprKind::NilLit,
            Token::SelfKw => ExprKind::SelfLit,
            Token::SuperKw => ExprKind::SuperLit,
            Token::Ident(name) => ExprKind::Id(name),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'");
                ExprKind::Paren(Box::new(inner))
            }
            Token::LBracket => {
                let mut elems = Vec::new();
                while !self.at(&Token::RBracket) {
                    if !elems.is_empty() && !self.expect(&Token::Comma, "','") {
                        return None;
                    }
                    elems.push(self.parse_expr()?);
                }
                self.expect(&Token::RBracket, "']'");
                ExprKind::ArrayLit(elems)
            }
            Token::Func => {
                let params = self.parse_params()?;
                let returns = self.parse_returns()?;
                let body = self.parse_block()?;
                ExprKind::AnonyFunc {
                    params,
                    returns,
                    body,
                }
            }
            other => {
                self.diags
                    .error(span, format!("unexpected token {other:?} in expression"));
                return None;
            }
        };
        Some(Expr::new(kind, span.to(self.prev_span())))
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span.to(rhs.span);
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Vec<Stmt> {
        let mut diags = DiagBag::new();
        let stmts = parse_source(src, &mut diags);
        assert!(
            !diags.has_errors(),
            "parse errors: {:?}",
            diags.iter().map(|d| d.message.clone()).collect::<Vec<_>>()
        );
        stmts
    }

    #[test]
    fn test_var_decl_forms() {
        let stmts = parse_ok("var x int = 1 + 2\nvar y = 3\nvar a, b float");
        assert_eq!(stmts.len(), 3);
        match &stmts[0] {
            Stmt::VarDecl(d) => {
                assert_eq!(d.name, "x");
                assert_eq!(d.desc, Some(TypeDesc::int()));
                assert!(d.init.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&stmts[1], Stmt::VarDecl(d) if d.desc.is_none()));
        assert!(matches!(&stmts[2], Stmt::VarDeclList(ds) if ds.len() == 2));
    }

    #[test]
    fn test_func_decl() {
        let stmts = parse_ok("func Add(a int, b int) int { return a + b }");
        match &stmts[0] {
            Stmt::FuncDecl(f) => {
                assert_eq!(f.name, "Add");
                assert_eq!(f.params.len(), 2);
                assert_eq!(f.returns, vec![TypeDesc::int()]);
                assert_eq!(f.body.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_varargs_param() {
        let stmts = parse_ok("func Log(level int, parts ...string) { }");
        match &stmts[0] {
            Stmt::FuncDecl(f) => {
                assert!(f.params[1].varargs);
                assert_eq!(f.params[1].desc, TypeDesc::string());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_class_with_extends_and_traits() {
        let stmts = parse_ok(
            "class Dog extends Animal with Walker, Barker {\n  var name string\n  func Speak() string { return name }\n  }",
        );
        match &stmts[0] {
            Stmt::ClassDecl(c) => {
                assert_eq!(c.name, "Dog");
                assert_eq!(c.super_, Some(TypeDesc::user_def("", "Animal")));
                assert_eq!(c.traits.len(), 2);
                assert_eq!(c.members.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_trait_with_proto() {
        let stmts = parse_ok("trait Walker {\n  func Walk() int\n}");
        match &stmts[0] {
            Stmt::TraitDecl(t) => {
                assert!(matches!(t.members[0], Member::Proto(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_import_with_alias() {
        let stmts = parse_ok("import la \"koala/lang\"\nimport \"koala/io\"");
        assert!(
            matches!(&stmts[0], Stmt::Import { alias: Some(a), path, .. } if a == "la" && path == "koala/lang")
        );
        assert!(matches!(&stmts[1], Stmt::Import { alias: None, .. }));
    }

    #[test]
    fn test_precedence() {
        let stmts = parse_ok("var x = 1 + 2 * 3 > 4 && true");
        let Stmt::VarDecl(d) = &stmts[0] else {
            panic!()
        };
        // Top node must be `&&`.
        match &d.init.as_ref().unwrap().kind {
            ExprKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::And),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_control_flow_statements() {
        let stmts = parse_ok(
            "func f(x int) {\n  while (x > 0) { if (x == 1) { break } else { continue } }\n  do { x = x - 1 } while (x > 0)\n  for (var i = 0; i < 10; i = i + 1) { }\n}",
        );
        let Stmt::FuncDecl(f) = &stmts[0] else {
            panic!()
        };
        assert!(matches!(f.body[0], Stmt::While { pre_test: true, .. }));
        assert!(matches!(f.body[1], Stmt::While { pre_test: false, .. }));
        assert!(matches!(f.body[2], Stmt::ForTriple { .. }));
    }

    #[test]
    fn test_method_call_chain() {
        let stmts = parse_ok("var x = animal.Speak(1, 2)");
        let Stmt::VarDecl(d) = &stmts[0] else {
            panic!()
        };
        match &d.init.as_ref().unwrap().kind {
            ExprKind::Call { callee, args } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(callee.kind, ExprKind::Attribute { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_go_statement() {
        let stmts = parse_ok("func f() { go work(1) }");
        let Stmt::FuncDecl(f) = &stmts[0] else {
            panic!()
        };
        assert!(matches!(f.body[0], Stmt::Go(_)));
    }

    #[test]
    fn test_error_recovery_reports_multiple() {
        let mut diags = DiagBag::new();
        parse_source("var = 1\nvar ok int = 2\nfunc (", &mut diags);
        assert!(diags.has_errors());
        assert!(diags.error_count() >= 2);
    }
}
