//! Typed AST for ChocoPy (declarations, statements, expressions).
//!
//! The code generator consumes this tree after type checking: every
//! expression carries its inferred type and every identifier is known to
//! resolve. The serde shape tags each node with `"kind"`.

use crate::span::Span;
use serde::{Deserialize, Serialize};

/// Root of a program: global declarations, then top-level statements.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    #[serde(default)]
    pub declarations: Vec<Declaration>,
    #[serde(default)]
    pub statements: Vec<Stmt>,
}

/// Static type of a value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ValueType {
    #[serde(rename = "ClassValueType", rename_all = "camelCase")]
    Class { class_name: String },
    #[serde(rename = "ListValueType", rename_all = "camelCase")]
    List { element_type: Box<ValueType> },
}

impl ValueType {
    pub fn class(name: &str) -> Self {
        ValueType::Class {
            class_name: name.to_string(),
        }
    }

    pub fn list(elem: ValueType) -> Self {
        ValueType::List {
            element_type: Box::new(elem),
        }
    }

    pub fn int() -> Self {
        Self::class("int")
    }

    pub fn bool() -> Self {
        Self::class("bool")
    }

    pub fn str() -> Self {
        Self::class("str")
    }

    pub fn object() -> Self {
        Self::class("object")
    }

    /// Type of the `None` literal.
    pub fn none() -> Self {
        Self::class("<None>")
    }

    /// Type of the `[]` literal.
    pub fn empty() -> Self {
        Self::class("<Empty>")
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            ValueType::Class { class_name } => Some(class_name),
            ValueType::List { .. } => None,
        }
    }

    pub fn is_int(&self) -> bool {
        self.class_name() == Some("int")
    }

    pub fn is_bool(&self) -> bool {
        self.class_name() == Some("bool")
    }

    pub fn is_str(&self) -> bool {
        self.class_name() == Some("str")
    }

    /// int and bool are held unboxed; everything else is a pointer.
    pub fn is_unboxed(&self) -> bool {
        self.is_int() || self.is_bool()
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ValueType::List { .. }) || self.class_name() == Some("<Empty>")
    }

    pub fn element_type(&self) -> Option<&ValueType> {
        match self {
            ValueType::List { element_type } => Some(element_type),
            ValueType::Class { .. } => None,
        }
    }
}

/// Variable with its declared type: `x: int`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedVar {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ValueType,
}

/// Initial value of a variable or attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Literal {
    Int(i32),
    Bool(bool),
    Str(String),
    None,
}

/// Declaration at global, class, or function scope.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Declaration {
    #[serde(rename_all = "camelCase")]
    VarDef {
        #[serde(default)]
        span: Span,
        var: TypedVar,
        value: Literal,
    },
    FuncDef(FuncDef),
    ClassDef(ClassDef),
    #[serde(rename_all = "camelCase")]
    GlobalDecl {
        #[serde(default)]
        span: Span,
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    NonLocalDecl {
        #[serde(default)]
        span: Span,
        name: String,
    },
}

/// Function or method definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuncDef {
    #[serde(default)]
    pub span: Span,
    pub name: String,
    #[serde(default)]
    pub params: Vec<TypedVar>,
    pub return_type: ValueType,
    #[serde(default)]
    pub declarations: Vec<Declaration>,
    #[serde(default)]
    pub statements: Vec<Stmt>,
}

/// Class definition; `declarations` holds attributes (`VarDef`) and methods.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDef {
    #[serde(default)]
    pub span: Span,
    pub name: String,
    pub super_class: String,
    #[serde(default)]
    pub declarations: Vec<Declaration>,
}

/// Statement.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Stmt {
    #[serde(rename_all = "camelCase")]
    ExprStmt {
        #[serde(default)]
        span: Span,
        expr: Expr,
    },
    /// `a = b[i] = value`; targets are assigned left to right.
    #[serde(rename_all = "camelCase")]
    AssignStmt {
        #[serde(default)]
        span: Span,
        targets: Vec<Expr>,
        value: Expr,
    },
    #[serde(rename_all = "camelCase")]
    IfStmt {
        #[serde(default)]
        span: Span,
        condition: Expr,
        then_body: Vec<Stmt>,
        #[serde(default)]
        else_body: Vec<Stmt>,
    },
    #[serde(rename_all = "camelCase")]
    WhileStmt {
        #[serde(default)]
        span: Span,
        condition: Expr,
        body: Vec<Stmt>,
    },
    #[serde(rename_all = "camelCase")]
    ForStmt {
        #[serde(default)]
        span: Span,
        identifier: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    #[serde(rename_all = "camelCase")]
    ReturnStmt {
        #[serde(default)]
        span: Span,
        value: Option<Expr>,
    },
    #[serde(rename_all = "camelCase")]
    PassStmt {
        #[serde(default)]
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::ExprStmt { span, .. }
            | Stmt::AssignStmt { span, .. }
            | Stmt::IfStmt { span, .. }
            | Stmt::WhileStmt { span, .. }
            | Stmt::ForStmt { span, .. }
            | Stmt::ReturnStmt { span, .. }
            | Stmt::PassStmt { span } => *span,
        }
    }
}

/// Expression with its inferred static type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expr {
    #[serde(default)]
    pub span: Span,
    pub inferred_type: ValueType,
    #[serde(flatten)]
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: ValueType) -> Self {
        Self {
            span: Span::default(),
            inferred_type: ty,
            kind,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Node kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::IntegerLiteral { .. } => "IntegerLiteral",
            ExprKind::BooleanLiteral { .. } => "BooleanLiteral",
            ExprKind::StringLiteral { .. } => "StringLiteral",
            ExprKind::NoneLiteral => "NoneLiteral",
            ExprKind::Identifier { .. } => "Identifier",
            ExprKind::BinaryExpr { .. } => "BinaryExpr",
            ExprKind::UnaryExpr { .. } => "UnaryExpr",
            ExprKind::IfExpr { .. } => "IfExpr",
            ExprKind::CallExpr { .. } => "CallExpr",
            ExprKind::MethodCallExpr { .. } => "MethodCallExpr",
            ExprKind::MemberExpr { .. } => "MemberExpr",
            ExprKind::IndexExpr { .. } => "IndexExpr",
            ExprKind::ListExpr { .. } => "ListExpr",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ExprKind {
    IntegerLiteral {
        value: i32,
    },
    BooleanLiteral {
        value: bool,
    },
    StringLiteral {
        value: String,
    },
    NoneLiteral,
    Identifier {
        name: String,
    },
    BinaryExpr {
        left: Box<Expr>,
        operator: BinOp,
        right: Box<Expr>,
    },
    UnaryExpr {
        operator: UnOp,
        operand: Box<Expr>,
    },
    #[serde(rename_all = "camelCase")]
    IfExpr {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Call of a global/nested function, builtin, or class constructor.
    CallExpr {
        function: String,
        args: Vec<Expr>,
    },
    MethodCallExpr {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    MemberExpr {
        object: Box<Expr>,
        member: String,
    },
    IndexExpr {
        list: Box<Expr>,
        index: Box<Expr>,
    },
    ListExpr {
        elements: Vec<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "//")]
    FloorDiv,
    #[serde(rename = "%")]
    Mod,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "is")]
    Is,
    #[serde(rename = "and")]
    And,
    #[serde(rename = "or")]
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Is => "is",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    #[serde(rename = "-")]
    Neg,
    #[serde(rename = "not")]
    Not,
}
