//! Lower the typed AST to instruction records, one function at a time.
//!
//! The same translator serves both register modes; only the `RegSupply`
//! differs. In virtual mode the body goes through the register allocator
//! before the frame is laid out, since the frame has to hold its spill
//! slots and save the registers it picked.

mod expr;
mod regs;
mod stmt;

use chocopy_codegen_riscv::allocate;
use chocopy_config::{CodegenConfig, RegisterMode};
use chocopy_syntax::{
    AsmItem, CodegenError, Instr, Label, LabelGen, Literal, PhysReg, Reg, Span, ValueType,
    ALLOCATABLE,
};
use log::debug;

use crate::consts::ConstPool;
use crate::frame::{local_offset, FrameLayout};
use crate::symbols::{FuncId, ProgramInfo, ScopeId, SymbolInfo};

use regs::RegSupply;

/// Label of the top-level program.
pub const MAIN: &str = "main";

/// Translation state for one function (or the top level).
pub(crate) struct Lowerer<'a> {
    info: &'a ProgramInfo,
    consts: &'a mut ConstPool,
    comments: bool,
    func: Option<FuncId>,
    scope: ScopeId,
    labels: LabelGen,
    regs: RegSupply,
    out: Vec<AsmItem>,
    epilogue: Label,
}

fn pool(config: &CodegenConfig) -> &'static [PhysReg] {
    &ALLOCATABLE[..config.effective_pool_size()]
}

impl<'a> Lowerer<'a> {
    fn new(
        info: &'a ProgramInfo,
        consts: &'a mut ConstPool,
        config: &CodegenConfig,
        func: Option<FuncId>,
        scope: ScopeId,
        prefix: &str,
    ) -> Self {
        let mut labels = LabelGen::new(prefix);
        let epilogue = labels.fresh();
        Self {
            info,
            consts,
            comments: config.comments,
            func,
            scope,
            labels,
            regs: RegSupply::new(config.registers, pool(config)),
            out: Vec::new(),
            epilogue,
        }
    }

    fn emit(&mut self, i: Instr) {
        self.out.push(i.into());
    }

    /// Emit with a comment, when comments are enabled.
    fn emit_c(&mut self, i: Instr, comment: impl FnOnce() -> String) {
        let i = if self.comments { i.with_comment(comment()) } else { i };
        self.out.push(i.into());
    }

    fn place(&mut self, l: Label) {
        self.out.push(AsmItem::Label(l));
    }

    fn fresh_label(&mut self) -> Label {
        self.labels.fresh()
    }

    fn take(&mut self, construct: &str, span: Span) -> Result<Reg, CodegenError> {
        self.regs.take(construct, span)
    }

    fn release(&mut self, r: Reg) {
        self.regs.release(r);
    }

    /// Descriptor for `name` as seen from the current scope.
    fn resolve(&self, name: &str, span: Span) -> Result<&'a SymbolInfo, CodegenError> {
        let info = self.info;
        info.lookup(name, self.scope).map_err(|e| match e {
            CodegenError::UnresolvedSymbol { name, .. } => {
                CodegenError::UnresolvedSymbol { name, span }
            }
            other => other,
        })
    }

    fn depth(&self) -> Option<usize> {
        self.func.map(|f| self.info.func(f).depth)
    }

    /// Register holding the frame pointer of `owner`'s activation, walking
    /// static links from the current frame. Uses `t0` when it has to walk.
    fn frame_of(&mut self, owner: FuncId, span: Span) -> Result<PhysReg, CodegenError> {
        let target = self.info.func(owner).depth;
        let hops = self
            .depth()
            .and_then(|d| d.checked_sub(target))
            .ok_or_else(|| CodegenError::Unsupported {
                construct: format!("access to a variable of '{}'", self.info.func(owner).name),
                span,
            })?;
        if hops == 0 {
            return Ok(PhysReg::Fp);
        }
        let mut base = PhysReg::Fp;
        for _ in 0..hops {
            self.emit_c(Instr::lw(PhysReg::T0, base, 0), || "static link".to_string());
            base = PhysReg::T0;
        }
        Ok(base)
    }

    /// Load literal `lit` as a value of type `ty` into `rd`.
    fn literal_into(&mut self, rd: impl Into<Reg>, lit: &Literal, ty: &ValueType) {
        let rd = rd.into();
        let i = match lit {
            Literal::Int(n) if ty.is_unboxed() => Instr::li(rd, *n),
            Literal::Int(n) => Instr::la(rd, self.consts.intern_int(*n)),
            Literal::Bool(b) if ty.is_unboxed() => Instr::li(rd, i32::from(*b)),
            Literal::Bool(b) => Instr::la(rd, ConstPool::bool_label(*b)),
            Literal::Str(s) => Instr::la(rd, self.consts.intern_str(s)),
            Literal::None => Instr::li(rd, 0),
        };
        self.emit(i);
    }

    /// Lay out the frame around the translated body and return the
    /// finished function.
    fn finish(self, mut frame: FrameLayout, entry: Label) -> Result<Vec<AsmItem>, CodegenError> {
        let Lowerer {
            out: body,
            regs,
            epilogue,
            ..
        } = self;
        let body = match regs.mode() {
            RegisterMode::Physical => {
                frame.saved = regs.touched();
                body
            }
            RegisterMode::Virtual => {
                let alloc = allocate(&body, regs.pool(), frame.spill_base(), &frame.name)?;
                frame.spill_slots = alloc.spill_slots;
                frame.saved = alloc.used;
                alloc.items
            }
        };
        debug!("lowered {}: {} instructions in body", frame.name, body.len());
        let mut items = vec![AsmItem::Label(entry)];
        items.extend(frame.prologue());
        items.extend(body);
        items.extend(frame.epilogue(epilogue));
        Ok(items)
    }
}

/// Translate the top-level statements into `main`.
pub fn lower_top_level(
    info: &ProgramInfo,
    consts: &mut ConstPool,
    config: &CodegenConfig,
) -> Result<Vec<AsmItem>, CodegenError> {
    let mut cx = Lowerer::new(info, consts, config, None, info.global_scope, MAIN);
    for s in &info.statements {
        cx.translate_stmt(s)?;
    }
    cx.finish(FrameLayout::top_level(), Label::global(MAIN))
}

/// Translate one user function or method.
pub fn lower_function(
    info: &ProgramInfo,
    id: FuncId,
    consts: &mut ConstPool,
    config: &CodegenConfig,
) -> Result<Vec<AsmItem>, CodegenError> {
    let f = info.func(id);
    let mut cx = Lowerer::new(info, consts, config, Some(id), f.scope, f.label.name());
    for (j, local) in f.locals.iter().enumerate() {
        cx.literal_into(PhysReg::T0, &local.init, &local.ty);
        cx.emit_c(Instr::sw(PhysReg::T0, PhysReg::Fp, local_offset(j)), || {
            format!("local {}", local.name)
        });
    }
    for s in &f.statements {
        cx.translate_stmt(s)?;
    }
    cx.emit_c(Instr::li(PhysReg::A0, 0), || "implicit return None".to_string());
    cx.finish(FrameLayout::for_function(f), f.label.clone())
}
