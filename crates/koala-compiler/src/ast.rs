//! Abstract syntax tree
//!
//! The parser produces these nodes; the analyzer fills in the `desc` and
//! `sym` slots on expressions and sets each expression's load/store
//! context before emission.

use koala_types::TypeDesc;

use crate::diag::Span;
use crate::symbol::SymbolId;

/// Whether an expression is being read or written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExprCtx {
    /// The value is read onto the stack
    #[default]
    Load,
    /// The value on the stack is written through the expression
    Store,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Bitwise NOT
    BitNot,
    /// Logical NOT
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOp {
    /// Whether the operator produces a boolean
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            Self::Gt | Self::Ge | Self::Lt | Self::Le | Self::Eq | Self::Neq
        )
    }

    /// Whether the operator is short-circuiting
    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

/// Expression node with analyzer slots
#[derive(Debug, Clone)]
pub struct Expr {
    /// Syntactic form
    pub kind: ExprKind,
    /// Resolved type, filled by the analyzer
    pub desc: Option<TypeDesc>,
    /// Resolved symbol, filled by the analyzer
    pub sym: Option<SymbolId>,
    /// Load or store context, set by the parent statement
    pub ctx: ExprCtx,
    /// Argument count for call sites
    pub argc: usize,
    /// Source range
    pub span: Span,
}

impl Expr {
    /// Create an expression node with empty analyzer slots
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            desc: None,
            sym: None,
            ctx: ExprCtx::Load,
            argc: 0,
            span,
        }
    }
}

/// Expression forms
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Identifier reference
    Id(String),
    /// Integer literal
    IntLit(i64),
    /// Float literal
    FloatLit(f64),
    /// Boolean literal
    BoolLit(bool),
    /// String literal
    StrLit(String),
    /// `self`
    SelfLit,
    /// `super`
    SuperLit,
    /// `nil`
    NilLit,
    /// Parenthesized expression
    Paren(Box<Expr>),
    /// Array literal
    ArrayLit(Vec<Expr>),
    /// Anonymous function
    AnonyFunc {
        /// Parameters
        params: Vec<Param>,
        /// Return types
        returns: Vec<TypeDesc>,
        /// Body statements
        body: Vec<Stmt>,
    },
    /// Attribute access `left.name`
    Attribute {
        /// Object expression
        left: Box<Expr>,
        /// Attribute name
        name: String,
    },
    /// Subscript `left[index]`
    Subscript {
        /// Array expression
        left: Box<Expr>,
        /// Index expression
        index: Box<Expr>,
    },
    /// Call `callee(args)`
    Call {
        /// Callee expression
        callee: Box<Expr>,
        /// Arguments in source order
        args: Vec<Expr>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Comma-separated sequence
    Seq(Vec<Expr>),
}

/// Function parameter
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Declared type
    pub desc: TypeDesc,
    /// Whether this is the trailing variadic parameter
    pub varargs: bool,
    /// Source range
    pub span: Span,
}

/// One `var` declaration
#[derive(Debug, Clone)]
pub struct VarDecl {
    /// Variable name
    pub name: String,
    /// Declared type; inferred from the initializer when absent
    pub desc: Option<TypeDesc>,
    /// Declared `const`
    pub konst: bool,
    /// Initializer expression
    pub init: Option<Expr>,
    /// Source range
    pub span: Span,
}

/// Function declaration (also used for methods)
#[derive(Debug, Clone)]
pub struct FuncDecl {
    /// Function name
    pub name: String,
    /// Parameters
    pub params: Vec<Param>,
    /// Declared return types
    pub returns: Vec<TypeDesc>,
    /// Body statements
    pub body: Vec<Stmt>,
    /// Source range
    pub span: Span,
}

/// Function prototype without a body (trait members)
#[derive(Debug, Clone)]
pub struct ProtoDecl {
    /// Function name
    pub name: String,
    /// Parameters
    pub params: Vec<Param>,
    /// Declared return types
    pub returns: Vec<TypeDesc>,
    /// Source range
    pub span: Span,
}

/// Class member
#[derive(Debug, Clone)]
pub enum Member {
    /// Field declaration
    Field(VarDecl),
    /// Concrete method
    Method(FuncDecl),
    /// Abstract prototype (traits only)
    Proto(ProtoDecl),
}

/// Class declaration
#[derive(Debug, Clone)]
pub struct ClassDecl {
    /// Class name
    pub name: String,
    /// `extends` base type
    pub super_: Option<TypeDesc>,
    /// `with` trait list in order
    pub traits: Vec<TypeDesc>,
    /// Members in declaration order
    pub members: Vec<Member>,
    /// Source range
    pub span: Span,
}

/// Trait declaration
#[derive(Debug, Clone)]
pub struct TraitDecl {
    /// Trait name
    pub name: String,
    /// Super traits in order
    pub traits: Vec<TypeDesc>,
    /// Members in declaration order
    pub members: Vec<Member>,
    /// Source range
    pub span: Span,
}

/// A `case` arm of a switch statement
#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// Case value; None for `default`
    pub value: Option<Expr>,
    /// Arm body
    pub body: Vec<Stmt>,
    /// Source range
    pub span: Span,
}

/// Statement node
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Single variable declaration
    VarDecl(VarDecl),
    /// `var a, b, c type` declaration list
    VarDeclList(Vec<VarDecl>),
    /// Function declaration
    FuncDecl(FuncDecl),
    /// Function prototype
    ProtoDecl(ProtoDecl),
    /// Class declaration
    ClassDecl(ClassDecl),
    /// Trait declaration
    TraitDecl(TraitDecl),
    /// Expression statement
    Expr(Expr),
    /// Assignment `lhs = rhs`
    Assign {
        /// Target
        lhs: Expr,
        /// Value
        rhs: Expr,
    },
    /// Compound assignment `lhs op= rhs`
    CompoundAssign {
        /// Underlying binary operator
        op: BinaryOp,
        /// Target
        lhs: Expr,
        /// Value
        rhs: Expr,
    },
    /// Return statement
    Return {
        /// Returned expressions in declaration order
        exprs: Vec<Expr>,
        /// Source range
        span: Span,
    },
    /// If/else chain
    If {
        /// Condition
        cond: Expr,
        /// Then branch
        body: Vec<Stmt>,
        /// Else branch; may hold a single nested If for else-if chains
        orelse: Vec<Stmt>,
    },
    /// While loop; `pre_test` distinguishes `while` from `do-while`
    While {
        /// Condition evaluated before (pre-test) or after (post-test) the body
        pre_test: bool,
        /// Condition
        cond: Expr,
        /// Loop body
        body: Vec<Stmt>,
    },
    /// Switch statement
    Switch {
        /// Scrutinee
        expr: Expr,
        /// Case arms
        cases: Vec<SwitchCase>,
    },
    /// C-style for loop
    ForTriple {
        /// Initializer
        init: Option<Box<Stmt>>,
        /// Condition
        cond: Option<Expr>,
        /// Step statement
        step: Option<Box<Stmt>>,
        /// Loop body
        body: Vec<Stmt>,
    },
    /// `for x in e` loop
    ForEach {
        /// Loop variable name
        var: String,
        /// Iterated expression
        iter: Expr,
        /// Loop body
        body: Vec<Stmt>,
    },
    /// Break out of `level` nested loops
    Break {
        /// Nesting level, 1 = innermost
        level: usize,
        /// Source range
        span: Span,
    },
    /// Continue the loop at `level`
    Continue {
        /// Nesting level, 1 = innermost
        level: usize,
        /// Source range
        span: Span,
    },
    /// `go call` statement
    Go(Expr),
    /// Braced block
    Block(Vec<Stmt>),
    /// Type alias
    TypeAlias {
        /// Alias name
        name: String,
        /// Aliased type
        desc: TypeDesc,
        /// Source range
        span: Span,
    },
    /// Import declaration
    Import {
        /// Alias; defaults to the last path segment
        alias: Option<String>,
        /// Module path
        path: String,
        /// Source range
        span: Span,
    },
}

impl Stmt {
    /// Best-effort source range for diagnostics
    pub fn span(&self) -> Span {
        match self {
            Stmt::VarDecl(d) => d.span,
            Stmt::VarDeclList(ds) => ds.first().map(|d| d.span).unwrap_or_default(),
            Stmt::FuncDecl(f) => f.span,
            Stmt::ProtoDecl(p) => p.span,
            Stmt::ClassDecl(c) => c.span,
            Stmt::TraitDecl(t) => t.span,
            Stmt::Expr(e) => e.span,
            Stmt::Assign { lhs, rhs } => lhs.span.to(rhs.span),
            Stmt::CompoundAssign { lhs, rhs, .. } => lhs.span.to(rhs.span),
            Stmt::Return { span, .. } => *span,
            Stmt::If { cond, .. } => cond.span,
            Stmt::While { cond, .. } => cond.span,
            Stmt::Switch { expr, .. } => expr.span,
            Stmt::ForTriple { cond, .. } => cond.as_ref().map(|c| c.span).unwrap_or_default(),
            Stmt::ForEach { iter, .. } => iter.span,
            Stmt::Break { span, .. } | Stmt::Continue { span, .. } => *span,
            Stmt::Go(e) => e.span,
            Stmt::Block(stmts) => stmts.first().map(Stmt::span).unwrap_or_default(),
            Stmt::TypeAlias { span, .. } => *span,
            Stmt::Import { span, .. } => *span,
        }
    }
}
