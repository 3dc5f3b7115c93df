//! Expressions. Each one leaves its value in a freshly taken register that
//! the caller releases. int and bool are unboxed in registers; everything
//! else is an object reference (0 for None).

use chocopy_syntax::layout::{slot_offset, DISPATCH_TABLE_OFFSET, SIZE_OFFSET};
use chocopy_syntax::PhysReg::{A0, A1, A2, Sp, T0, T1, T2, Zero};
use chocopy_syntax::{
    BinOp, CodegenError, Expr, ExprKind, Instr, Label, Reg, Span, UnOp, ValueType, ARG_REGS,
    WORD_SIZE,
};

use super::Lowerer;
use crate::consts::ConstPool;
use crate::runtime::{
    error_div, error_none, error_oob, ALLOC, ALLOC2, INT_PROTOTYPE, LISTCONCAT, LIST_PROTOTYPE,
    STRCAT, STREQL, STR_CHAR,
};
use crate::symbols::{AttrInfo, ClassInfo, FuncInfo, ParamInfo, SymbolInfo};

impl<'a> Lowerer<'a> {
    pub(super) fn translate_expr(&mut self, e: &Expr) -> Result<Reg, CodegenError> {
        let construct = e.kind_name();
        match &e.kind {
            ExprKind::IntegerLiteral { value } => {
                let r = self.take(construct, e.span)?;
                self.emit(Instr::li(r, *value));
                Ok(r)
            }
            ExprKind::BooleanLiteral { value } => {
                let r = self.take(construct, e.span)?;
                self.emit(Instr::li(r, i32::from(*value)));
                Ok(r)
            }
            ExprKind::StringLiteral { value } => {
                let r = self.take(construct, e.span)?;
                let l = self.consts.intern_str(value);
                self.emit(Instr::la(r, l));
                Ok(r)
            }
            ExprKind::NoneLiteral => {
                let r = self.take(construct, e.span)?;
                self.emit(Instr::li(r, 0));
                Ok(r)
            }
            ExprKind::Identifier { name } => self.load_name(name, e.span),
            ExprKind::UnaryExpr { operator, operand } => {
                let r = self.translate_expr(operand)?;
                match operator {
                    UnOp::Neg => self.emit(Instr::neg(r, r)),
                    UnOp::Not => self.emit(Instr::seqz(r, r)),
                }
                Ok(r)
            }
            ExprKind::BinaryExpr {
                left,
                operator,
                right,
            } => self.binary(e, left, *operator, right),
            ExprKind::IfExpr {
                condition,
                then_expr,
                else_expr,
            } => self.if_expr(e, condition, then_expr, else_expr),
            ExprKind::CallExpr { function, args } => self.call(e, function, args),
            ExprKind::MethodCallExpr {
                object,
                method,
                args,
            } => self.method_call(e, object, method, args),
            ExprKind::MemberExpr { object, member } => {
                let o = self.translate_expr(object)?;
                self.none_check(o);
                let attr = self.attr_of(object, member, e.span)?;
                self.emit_c(Instr::lw(o, o, attr.offset), || format!("get .{}", member));
                Ok(o)
            }
            ExprKind::IndexExpr { list, index } => {
                let seq = self.translate_expr(list)?;
                let is_str = list.inferred_type.is_str();
                if !is_str {
                    self.none_check(seq);
                }
                let i = self.translate_expr(index)?;
                self.bounds_check(seq, i);
                if is_str {
                    self.char_at(seq, seq, i);
                } else {
                    self.element_addr(seq, i);
                    self.emit(Instr::lw(seq, T0, 0));
                }
                self.release(i);
                Ok(seq)
            }
            ExprKind::ListExpr { elements } => self.list_expr(e, elements),
        }
    }

    pub(super) fn load_name(&mut self, name: &str, span: Span) -> Result<Reg, CodegenError> {
        let sym = self.resolve(name, span)?;
        let r = self.take("Identifier", span)?;
        match sym {
            SymbolInfo::GlobalVariable(g) => {
                self.emit(Instr::la(r, g.label.clone()));
                self.emit_c(Instr::lw(r, r, 0), || format!("global {}", name));
            }
            SymbolInfo::StackVariable(v) => {
                let base = self.frame_of(v.func, span)?;
                self.emit_c(Instr::lw(r, base, v.offset), || format!("load {}", name));
            }
            _ => {
                return Err(CodegenError::Unsupported {
                    construct: format!("'{}' used as a value", name),
                    span,
                })
            }
        }
        Ok(r)
    }

    pub(super) fn store_name(
        &mut self,
        name: &str,
        v: Reg,
        span: Span,
    ) -> Result<(), CodegenError> {
        match self.resolve(name, span)? {
            SymbolInfo::GlobalVariable(g) => {
                self.emit(Instr::la(T0, g.label.clone()));
                self.emit_c(Instr::sw(v, T0, 0), || format!("global {} =", name));
            }
            SymbolInfo::StackVariable(s) => {
                let base = self.frame_of(s.func, span)?;
                self.emit_c(Instr::sw(v, base, s.offset), || format!("{} =", name));
            }
            _ => {
                return Err(CodegenError::Unsupported {
                    construct: format!("assignment to '{}'", name),
                    span,
                })
            }
        }
        Ok(())
    }

    /// Declared type of variable `name`.
    pub(super) fn name_type(&self, name: &str, span: Span) -> Result<&'a ValueType, CodegenError> {
        match self.resolve(name, span)? {
            SymbolInfo::GlobalVariable(g) => Ok(&g.ty),
            SymbolInfo::StackVariable(s) => Ok(&s.ty),
            _ => Err(CodegenError::Unsupported {
                construct: format!("'{}' is not a variable", name),
                span,
            }),
        }
    }

    pub(super) fn attr_of(
        &self,
        object: &Expr,
        member: &str,
        span: Span,
    ) -> Result<&'a AttrInfo, CodegenError> {
        let info = self.info;
        let class = info.class_of(&object.inferred_type)?;
        info.attribute(class, member).map_err(|_| CodegenError::UnresolvedSymbol {
            name: format!("{}.{}", class.name, member),
            span,
        })
    }

    pub(super) fn none_check(&mut self, r: Reg) {
        self.emit_c(Instr::beqz(r, error_none()), || "None check".to_string());
    }

    /// Jump to the out-of-bounds handler unless `0 <= i < len(seq)`. The
    /// unsigned compare catches negative indices too.
    pub(super) fn bounds_check(&mut self, seq: Reg, i: Reg) {
        self.emit_c(Instr::lw(T0, seq, SIZE_OFFSET), || "length".to_string());
        self.emit(Instr::bgeu(i, T0, error_oob()));
    }

    /// `t0` = address of element `i` of list `seq`.
    pub(super) fn element_addr(&mut self, seq: Reg, i: Reg) {
        self.emit(Instr::slli(T0, i, 2));
        self.emit(Instr::add(T0, seq, T0));
    }

    /// `dst` = one-character string holding byte `i` of `s`.
    pub(super) fn char_at(&mut self, dst: Reg, s: Reg, i: Reg) {
        self.emit(Instr::add(T0, s, i));
        self.emit(Instr::lbu(A0, T0, 0));
        self.emit(Instr::jal(Label::global(STR_CHAR)));
        self.emit(Instr::mv(dst, A0));
    }

    /// Box `r` in place when a value of type `from` flows into a slot of
    /// type `to`.
    pub(super) fn coerce(&mut self, r: Reg, from: &ValueType, to: &ValueType) {
        if !from.is_unboxed() || to.is_unboxed() {
            return;
        }
        if from.is_bool() {
            let falsy = self.fresh_label();
            let done = self.fresh_label();
            self.emit_c(Instr::beqz(r, falsy.clone()), || "box bool".to_string());
            self.emit(Instr::la(r, ConstPool::bool_label(true)));
            self.emit(Instr::j(done.clone()));
            self.place(falsy);
            self.emit(Instr::la(r, ConstPool::bool_label(false)));
            self.place(done);
        } else {
            self.emit_c(Instr::la(A0, Label::global(INT_PROTOTYPE)), || {
                "box int".to_string()
            });
            self.emit(Instr::jal(Label::global(ALLOC)));
            self.emit(Instr::sw(r, A0, 0));
            self.emit(Instr::mv(r, A0));
        }
    }

    fn binary(
        &mut self,
        e: &Expr,
        left: &Expr,
        op: BinOp,
        right: &Expr,
    ) -> Result<Reg, CodegenError> {
        if matches!(op, BinOp::And | BinOp::Or) {
            let l = self.translate_expr(left)?;
            let done = self.fresh_label();
            let skip = if op == BinOp::And {
                Instr::beqz(l, done.clone())
            } else {
                Instr::bnez(l, done.clone())
            };
            self.emit_c(skip, || format!("short-circuit {}", op.symbol()));
            let r = self.translate_expr(right)?;
            self.emit(Instr::mv(l, r));
            self.release(r);
            self.place(done);
            return Ok(l);
        }

        let ty = &left.inferred_type;
        let l = self.translate_expr(left)?;
        let r = self.translate_expr(right)?;
        match op {
            BinOp::Add if ty.is_str() => self.runtime_call2(STRCAT, l, r),
            BinOp::Add if ty.is_list() => {
                check_concat(e, left, right)?;
                self.runtime_call2(LISTCONCAT, l, r);
            }
            BinOp::Add => self.emit(Instr::add(l, l, r)),
            BinOp::Sub => self.emit(Instr::sub(l, l, r)),
            BinOp::Mul => self.emit(Instr::mul(l, l, r)),
            BinOp::FloorDiv => {
                self.emit_c(Instr::beqz(r, error_div()), || "divisor zero?".to_string());
                // Round toward negative infinity: step the truncated
                // quotient down when the remainder and divisor differ in sign.
                self.emit(Instr::div(T0, l, r));
                self.emit(Instr::rem(T1, l, r));
                self.emit(Instr::snez(T2, T1));
                self.emit(Instr::xor(T1, T1, r));
                self.emit(Instr::slt(T1, T1, Zero));
                self.emit(Instr::and(T1, T1, T2));
                self.emit(Instr::sub(l, T0, T1));
            }
            BinOp::Mod => {
                self.emit_c(Instr::beqz(r, error_div()), || "divisor zero?".to_string());
                // The result takes the divisor's sign.
                self.emit(Instr::rem(T0, l, r));
                self.emit(Instr::snez(T2, T0));
                self.emit(Instr::xor(T1, T0, r));
                self.emit(Instr::slt(T1, T1, Zero));
                self.emit(Instr::and(T1, T1, T2));
                self.emit(Instr::mul(T1, T1, r));
                self.emit(Instr::add(l, T0, T1));
            }
            BinOp::Eq | BinOp::Ne if ty.is_str() => {
                self.runtime_call2(STREQL, l, r);
                if op == BinOp::Ne {
                    self.emit(Instr::xori(l, l, 1));
                }
            }
            BinOp::Eq | BinOp::Is => {
                self.emit(Instr::sub(l, l, r));
                self.emit(Instr::seqz(l, l));
            }
            BinOp::Ne => {
                self.emit(Instr::sub(l, l, r));
                self.emit(Instr::snez(l, l));
            }
            BinOp::Lt => self.emit(Instr::slt(l, l, r)),
            BinOp::Gt => self.emit(Instr::slt(l, r, l)),
            BinOp::Le => {
                self.emit(Instr::slt(l, r, l));
                self.emit(Instr::xori(l, l, 1));
            }
            BinOp::Ge => {
                self.emit(Instr::slt(l, l, r));
                self.emit(Instr::xori(l, l, 1));
            }
            BinOp::And | BinOp::Or => {
                return Err(CodegenError::Unsupported {
                    construct: format!("operator '{}' after short-circuit lowering", op.symbol()),
                    span: e.span,
                })
            }
        }
        self.release(r);
        Ok(l)
    }

    /// `l` = `routine(l, r)`.
    fn runtime_call2(&mut self, routine: &str, l: Reg, r: Reg) {
        self.emit(Instr::mv(A0, l));
        self.emit(Instr::mv(A1, r));
        self.emit(Instr::jal(Label::global(routine)));
        self.emit(Instr::mv(l, A0));
    }

    fn if_expr(
        &mut self,
        e: &Expr,
        condition: &Expr,
        then_expr: &Expr,
        else_expr: &Expr,
    ) -> Result<Reg, CodegenError> {
        let dst = self.take("IfExpr", e.span)?;
        let c = self.translate_expr(condition)?;
        let other = self.fresh_label();
        let done = self.fresh_label();
        self.emit(Instr::beqz(c, other.clone()));
        self.release(c);
        for (branch, next) in [(then_expr, Some(done.clone())), (else_expr, None)] {
            let v = self.translate_expr(branch)?;
            self.coerce(v, &branch.inferred_type, &e.inferred_type);
            self.emit(Instr::mv(dst, v));
            self.release(v);
            if let Some(next) = next {
                self.emit(Instr::j(next));
                self.place(other.clone());
            }
        }
        self.place(done);
        Ok(dst)
    }

    fn call(&mut self, e: &Expr, function: &str, args: &[Expr]) -> Result<Reg, CodegenError> {
        let info = self.info;
        match self.resolve(function, e.span)? {
            SymbolInfo::Class(id) => self.construct(e, info.class(*id)),
            SymbolInfo::Function(id) => self.call_function(e, info.func(*id), args),
            _ => Err(CodegenError::Unsupported {
                construct: format!("call of non-function '{}'", function),
                span: e.span,
            }),
        }
    }

    fn call_function(
        &mut self,
        e: &Expr,
        f: &'a FuncInfo,
        args: &[Expr],
    ) -> Result<Reg, CodegenError> {
        let first = usize::from(f.has_static_link());
        let words = f.arg_count();
        self.reserve_args(words);
        self.store_args(&f.params, args, first, e.span)?;
        if f.has_static_link() {
            let parent = f.parent.ok_or_else(|| CodegenError::InvalidProgram {
                message: format!("nested function '{}' has no parent", f.name),
            })?;
            let base = self.frame_of(parent, e.span)?;
            self.emit_c(Instr::sw(base, Sp, 0), || format!("static link for {}", f.name));
        }
        self.load_arg_regs(words);
        self.emit(Instr::jal(f.label.clone()));
        self.finish_call(e, words)
    }

    fn method_call(
        &mut self,
        e: &Expr,
        object: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<Reg, CodegenError> {
        let info = self.info;
        let class = info.class_of(&object.inferred_type)?;
        let (index, slot) =
            class
                .method(method)
                .ok_or_else(|| CodegenError::UnresolvedSymbol {
                    name: format!("{}.{}", class.name, method),
                    span: e.span,
                })?;
        let params: &[ParamInfo] = match slot.func {
            Some(id) => info.func(id).params.get(1..).unwrap_or(&[]),
            None => &[],
        };
        let words = 1 + args.len();
        self.reserve_args(words);
        let o = self.translate_expr(object)?;
        self.none_check(o);
        self.emit_c(Instr::sw(o, Sp, 0), || "self".to_string());
        self.release(o);
        self.store_args(params, args, 1, e.span)?;
        self.load_arg_regs(words);
        self.dispatch(index, method);
        self.finish_call(e, words)
    }

    /// Instantiate `class` and run its `__init__`.
    fn construct(&mut self, e: &Expr, class: &'a ClassInfo) -> Result<Reg, CodegenError> {
        let dst = self.take("CallExpr", e.span)?;
        match class.name.as_str() {
            "int" | "bool" => self.emit(Instr::li(dst, 0)),
            "str" => {
                let l = self.consts.intern_str("");
                self.emit(Instr::la(dst, l));
            }
            _ => {
                let (index, _) =
                    class
                        .method("__init__")
                        .ok_or_else(|| CodegenError::UnresolvedSymbol {
                            name: format!("{}.__init__", class.name),
                            span: e.span,
                        })?;
                self.emit_c(Instr::la(A0, class.prototype.clone()), || {
                    format!("new {}", class.name)
                });
                self.emit(Instr::jal(Label::global(ALLOC)));
                self.emit(Instr::mv(dst, A0));
                self.reserve_args(1);
                self.emit(Instr::sw(A0, Sp, 0));
                self.dispatch(index, "__init__");
                self.emit(Instr::addi(Sp, Sp, WORD_SIZE));
            }
        }
        Ok(dst)
    }

    fn reserve_args(&mut self, words: usize) {
        if words > 0 {
            self.emit_c(Instr::addi(Sp, Sp, -(words as i32) * WORD_SIZE), || {
                format!("{} argument words", words)
            });
        }
    }

    /// Evaluate `args` into the outgoing area, starting at word `first`.
    fn store_args(
        &mut self,
        params: &[ParamInfo],
        args: &[Expr],
        first: usize,
        span: Span,
    ) -> Result<(), CodegenError> {
        if params.len() != args.len() {
            return Err(CodegenError::InvalidProgram {
                message: format!(
                    "call at {} passes {} arguments, expected {}",
                    span,
                    args.len(),
                    params.len()
                ),
            });
        }
        for (i, (arg, param)) in args.iter().zip(params).enumerate() {
            let r = self.translate_expr(arg)?;
            self.coerce(r, &arg.inferred_type, &param.ty);
            self.emit_c(Instr::sw(r, Sp, slot_offset(first + i)), || {
                format!("arg {}", param.name)
            });
            self.release(r);
        }
        Ok(())
    }

    fn load_arg_regs(&mut self, words: usize) {
        for (k, a) in ARG_REGS.iter().take(words).enumerate() {
            self.emit(Instr::lw(*a, Sp, slot_offset(k)));
        }
    }

    /// Call method `index` of the object in `a0` through its dispatch table.
    fn dispatch(&mut self, index: usize, name: &str) {
        self.emit(Instr::lw(T0, A0, DISPATCH_TABLE_OFFSET));
        self.emit_c(Instr::lw(T0, T0, slot_offset(index)), || format!("method {}", name));
        self.emit(Instr::jalr(T0));
    }

    fn finish_call(&mut self, e: &Expr, words: usize) -> Result<Reg, CodegenError> {
        if words > 0 {
            self.emit(Instr::addi(Sp, Sp, words as i32 * WORD_SIZE));
        }
        let dst = self.take(e.kind_name(), e.span)?;
        self.emit(Instr::mv(dst, A0));
        Ok(dst)
    }

    fn list_expr(&mut self, e: &Expr, elements: &[Expr]) -> Result<Reg, CodegenError> {
        let n = elements.len() as i32;
        self.emit_c(Instr::la(A0, Label::global(LIST_PROTOTYPE)), || {
            format!("new list of {}", n)
        });
        self.emit(Instr::li(A1, n));
        self.emit(Instr::li(A2, n));
        self.emit(Instr::jal(Label::global(ALLOC2)));
        let dst = self.take("ListExpr", e.span)?;
        self.emit(Instr::mv(dst, A0));
        let elem_ty = e.inferred_type.element_type();
        for (k, el) in elements.iter().enumerate() {
            let r = self.translate_expr(el)?;
            if let Some(ty) = elem_ty {
                self.coerce(r, &el.inferred_type, ty);
            }
            self.emit(Instr::sw(r, dst, slot_offset(k)));
            self.release(r);
        }
        Ok(dst)
    }
}

/// Concatenation copies element words as they are, so both operands must
/// already hold elements in the result's representation.
fn check_concat(e: &Expr, left: &Expr, right: &Expr) -> Result<(), CodegenError> {
    let Some(result) = e.inferred_type.element_type() else {
        return Ok(());
    };
    for side in [left, right] {
        if let Some(elem) = side.inferred_type.element_type() {
            if elem.is_unboxed() != result.is_unboxed() {
                return Err(CodegenError::Unsupported {
                    construct: "list concatenation that would box elements".to_string(),
                    span: e.span,
                });
            }
        }
    }
    Ok(())
}
