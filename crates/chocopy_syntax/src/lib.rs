//! ChocoPy syntax: typed AST, spans, diagnostics, object layout, instruction model.

pub mod ast;
pub mod diagnostics;
pub mod ir;
pub mod layout;
pub mod span;

pub use ast::*;
pub use diagnostics::*;
pub use ir::*;
pub use span::*;
