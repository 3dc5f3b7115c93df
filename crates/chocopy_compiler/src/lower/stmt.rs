//! Statements.

use chocopy_syntax::layout::SIZE_OFFSET;
use chocopy_syntax::PhysReg::{A0, T0};
use chocopy_syntax::{CodegenError, Expr, ExprKind, Instr, Label, Reg, Span, Stmt, ValueType};

use super::Lowerer;

impl Lowerer<'_> {
    pub(super) fn translate_stmt(&mut self, s: &Stmt) -> Result<(), CodegenError> {
        match s {
            Stmt::ExprStmt { expr, .. } => {
                let r = self.translate_expr(expr)?;
                self.release(r);
            }
            Stmt::AssignStmt { targets, value, .. } => self.assign(targets, value)?,
            Stmt::IfStmt {
                condition,
                then_body,
                else_body,
                ..
            } => {
                let c = self.translate_expr(condition)?;
                let other = self.fresh_label();
                let done = self.fresh_label();
                self.emit(Instr::beqz(c, other.clone()));
                self.release(c);
                self.block(then_body)?;
                self.emit(Instr::j(done.clone()));
                self.place(other);
                self.block(else_body)?;
                self.place(done);
            }
            Stmt::WhileStmt {
                condition, body, ..
            } => {
                let top = self.fresh_label();
                let done = self.fresh_label();
                self.place(top.clone());
                let c = self.translate_expr(condition)?;
                self.emit_c(Instr::beqz(c, done.clone()), || "while".to_string());
                self.release(c);
                self.block(body)?;
                self.emit(Instr::j(top));
                self.place(done);
            }
            Stmt::ForStmt {
                span,
                identifier,
                iterable,
                body,
            } => self.for_stmt(*span, identifier, iterable, body)?,
            Stmt::ReturnStmt { value, .. } => {
                match value {
                    Some(v) => {
                        let r = self.translate_expr(v)?;
                        if let Some(f) = self.func {
                            let info = self.info;
                            self.coerce(r, &v.inferred_type, &info.func(f).return_type);
                        }
                        self.emit(Instr::mv(A0, r));
                        self.release(r);
                    }
                    None => self.emit(Instr::li(A0, 0)),
                }
                let exit = self.epilogue.clone();
                self.emit_c(Instr::j(exit), || "return".to_string());
            }
            Stmt::PassStmt { .. } => {}
        }
        Ok(())
    }

    fn block(&mut self, body: &[Stmt]) -> Result<(), CodegenError> {
        for s in body {
            self.translate_stmt(s)?;
        }
        Ok(())
    }

    /// The value is computed once and stored into each target in order.
    /// Targets that need a boxed value get their own boxed copy.
    fn assign(&mut self, targets: &[Expr], value: &Expr) -> Result<(), CodegenError> {
        let v = self.translate_expr(value)?;
        for target in targets {
            let ty = self.target_type(target)?;
            if value.inferred_type.is_unboxed() && !ty.is_unboxed() {
                let boxed = self.take("AssignStmt", target.span)?;
                self.emit(Instr::mv(boxed, v));
                self.coerce(boxed, &value.inferred_type, &ty);
                self.store(target, boxed)?;
                self.release(boxed);
            } else {
                self.store(target, v)?;
            }
        }
        self.release(v);
        Ok(())
    }

    fn target_type(&self, target: &Expr) -> Result<ValueType, CodegenError> {
        match &target.kind {
            ExprKind::Identifier { name } => Ok(self.name_type(name, target.span)?.clone()),
            ExprKind::MemberExpr { object, member } => {
                Ok(self.attr_of(object, member, target.span)?.ty.clone())
            }
            ExprKind::IndexExpr { .. } => Ok(target.inferred_type.clone()),
            _ => Err(CodegenError::Unsupported {
                construct: format!("assignment to {}", target.kind_name()),
                span: target.span,
            }),
        }
    }

    fn store(&mut self, target: &Expr, v: Reg) -> Result<(), CodegenError> {
        match &target.kind {
            ExprKind::Identifier { name } => self.store_name(name, v, target.span),
            ExprKind::MemberExpr { object, member } => {
                let o = self.translate_expr(object)?;
                self.none_check(o);
                let attr = self.attr_of(object, member, target.span)?;
                self.emit_c(Instr::sw(v, o, attr.offset), || format!("set .{}", member));
                self.release(o);
                Ok(())
            }
            ExprKind::IndexExpr { list, index } => {
                let l = self.translate_expr(list)?;
                self.none_check(l);
                let i = self.translate_expr(index)?;
                self.bounds_check(l, i);
                self.element_addr(l, i);
                self.emit(Instr::sw(v, T0, 0));
                self.release(i);
                self.release(l);
                Ok(())
            }
            _ => Err(CodegenError::Unsupported {
                construct: format!("assignment to {}", target.kind_name()),
                span: target.span,
            }),
        }
    }

    /// Iterate over a list or the characters of a string. The length is
    /// read again on every pass, so a body that grows the sequence through
    /// another reference is seen by the loop.
    fn for_stmt(
        &mut self,
        span: Span,
        identifier: &str,
        iterable: &Expr,
        body: &[Stmt],
    ) -> Result<(), CodegenError> {
        let is_str = iterable.inferred_type.is_str();
        let str_ty = ValueType::str();
        let elem_ty = if is_str {
            &str_ty
        } else {
            iterable
                .inferred_type
                .element_type()
                .ok_or_else(|| CodegenError::Unsupported {
                    construct: "for over a non-list".to_string(),
                    span,
                })?
        };
        let var_ty = self.name_type(identifier, span)?;

        let seq = self.translate_expr(iterable)?;
        if !is_str {
            self.none_check(seq);
        }
        let idx = self.take("ForStmt", span)?;
        self.emit(Instr::li(idx, 0));
        let top = self.fresh_label();
        let done = self.fresh_label();
        self.place(top.clone());
        self.exit_when_done(seq, idx, done.clone());
        let item = self.take("ForStmt", span)?;
        if is_str {
            self.char_at(item, seq, idx);
        } else {
            self.element_addr(seq, idx);
            self.emit(Instr::lw(item, T0, 0));
        }
        self.coerce(item, elem_ty, var_ty);
        self.store_name(identifier, item, span)?;
        self.release(item);
        self.emit(Instr::addi(idx, idx, 1));
        self.block(body)?;
        self.emit(Instr::j(top));
        self.place(done);
        self.release(idx);
        self.release(seq);
        Ok(())
    }

    fn exit_when_done(&mut self, seq: Reg, idx: Reg, done: Label) {
        self.emit_c(Instr::lw(T0, seq, SIZE_OFFSET), || "length".to_string());
        self.emit(Instr::bge(idx, T0, done));
    }
}
