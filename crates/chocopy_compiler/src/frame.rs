//! Stack frames.
//!
//! `fp` is the caller's `sp` at the call, so the caller's outgoing argument
//! area sits at and above `fp`:
//!
//! ```text
//! fp + 4i          argument i (static link or self is argument 0)
//! fp - 4           saved fp
//! fp - 8           saved ra
//! fp - 12 - 4j     local j
//! below locals     spill slots, then saved callee-saved registers
//! sp               fp - size
//! ```

use chocopy_syntax::{AsmItem, Instr, Label, PhysReg, ARG_REGS, WORD_SIZE};
use log::debug;

use crate::symbols::FuncInfo;

const FRAME_ALIGN: i32 = 16;
pub const SAVED_FP_OFFSET: i32 = -WORD_SIZE;
pub const SAVED_RA_OFFSET: i32 = -2 * WORD_SIZE;

pub fn param_offset(index: usize) -> i32 {
    index as i32 * WORD_SIZE
}

pub fn local_offset(index: usize) -> i32 {
    -(3 + index as i32) * WORD_SIZE
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    pub name: String,
    /// Argument words, static link included.
    pub args: usize,
    pub locals: usize,
    pub spill_slots: usize,
    /// Callee-saved registers the body writes.
    pub saved: Vec<PhysReg>,
    top_level: bool,
}

impl FrameLayout {
    pub fn for_function(info: &FuncInfo) -> Self {
        Self {
            name: info.name.clone(),
            args: info.arg_count(),
            locals: info.locals.len(),
            spill_slots: 0,
            saved: Vec::new(),
            top_level: false,
        }
    }

    /// The top-level program: no arguments or locals, never returns.
    pub fn top_level() -> Self {
        Self {
            name: "main".to_string(),
            args: 0,
            locals: 0,
            spill_slots: 0,
            saved: Vec::new(),
            top_level: true,
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.top_level
    }

    /// Offset of the first spill slot; later slots grow downward.
    pub fn spill_base(&self) -> i32 {
        local_offset(self.locals)
    }

    fn save_slot(&self, k: usize) -> i32 {
        self.spill_base() - (self.spill_slots + k) as i32 * WORD_SIZE
    }

    pub fn size(&self) -> i32 {
        let saved = if self.top_level { 0 } else { self.saved.len() };
        let words = 2 + self.locals + self.spill_slots + saved;
        let bytes = words as i32 * WORD_SIZE;
        (bytes + FRAME_ALIGN - 1) / FRAME_ALIGN * FRAME_ALIGN
    }

    pub fn prologue(&self) -> Vec<AsmItem> {
        let size = self.size();
        debug!(
            "frame {}: {} bytes, {} locals, {} spill slots, saves {:?}",
            self.name, size, self.locals, self.spill_slots, self.saved
        );
        let (fp, ra) = if self.top_level {
            (PhysReg::Zero, PhysReg::Zero)
        } else {
            (PhysReg::Fp, PhysReg::Ra)
        };
        let mut out: Vec<AsmItem> = vec![
            Instr::addi(PhysReg::Sp, PhysReg::Sp, -size)
                .with_comment("reserve frame")
                .into(),
            Instr::sw(fp, PhysReg::Sp, size + SAVED_FP_OFFSET)
                .with_comment("save caller fp")
                .into(),
            Instr::sw(ra, PhysReg::Sp, size + SAVED_RA_OFFSET)
                .with_comment("save return address")
                .into(),
            Instr::addi(PhysReg::Fp, PhysReg::Sp, size)
                .with_comment("new fp")
                .into(),
        ];
        if self.top_level {
            return out;
        }
        for (i, a) in ARG_REGS.iter().take(self.args).enumerate() {
            out.push(Instr::sw(*a, PhysReg::Fp, param_offset(i)).into());
        }
        for (k, r) in self.saved.iter().enumerate() {
            out.push(Instr::sw(*r, PhysReg::Fp, self.save_slot(k)).into());
        }
        out
    }

    /// Single exit point, starting at `label`.
    pub fn epilogue(&self, label: Label) -> Vec<AsmItem> {
        let mut out = vec![AsmItem::Label(label)];
        if self.top_level {
            out.push(Instr::li(PhysReg::A7, chocopy_syntax::syscall::EXIT).into());
            out.push(Instr::ecall().with_comment("exit(0)").into());
            return out;
        }
        for (k, r) in self.saved.iter().enumerate() {
            out.push(Instr::lw(*r, PhysReg::Fp, self.save_slot(k)).into());
        }
        out.push(Instr::lw(PhysReg::Ra, PhysReg::Fp, SAVED_RA_OFFSET).into());
        out.push(Instr::mv(PhysReg::Sp, PhysReg::Fp).into());
        out.push(Instr::lw(PhysReg::Fp, PhysReg::Sp, SAVED_FP_OFFSET).into());
        out.push(Instr::jr(PhysReg::Ra).into());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chocopy_runtime::{Machine, STACK_TOP};
    use chocopy_syntax::{AsmProgram, Reg};

    fn frame(locals: usize, spills: usize, saved: Vec<PhysReg>) -> FrameLayout {
        FrameLayout {
            name: "f".to_string(),
            args: 2,
            locals,
            spill_slots: spills,
            saved,
            top_level: false,
        }
    }

    #[test]
    fn offsets_follow_declaration_order() {
        assert_eq!(param_offset(0), 0);
        assert_eq!(param_offset(3), 12);
        assert_eq!(local_offset(0), -12);
        assert_eq!(local_offset(2), -20);
        let f = frame(2, 3, vec![PhysReg::S1]);
        assert_eq!(f.spill_base(), -20);
        assert_eq!(f.save_slot(0), -32);
    }

    #[test]
    fn size_is_aligned_and_covers_every_slot() {
        for locals in 0..6 {
            for spills in 0..4 {
                let f = frame(locals, spills, vec![PhysReg::S1, PhysReg::S2]);
                let size = f.size();
                assert_eq!(size % FRAME_ALIGN, 0);
                assert!(-f.save_slot(1) <= size);
            }
        }
        assert_eq!(FrameLayout::top_level().size(), 16);
    }

    #[test]
    fn prologue_and_epilogue_restore_sp_fp_and_saved_registers() {
        let f = frame(3, 2, vec![PhysReg::S1, PhysReg::S4]);
        let mut text = vec![AsmItem::Label(Label::global("f"))];
        text.extend(f.prologue());
        text.push(Instr::li(PhysReg::S1, 7).into());
        text.push(Instr::li(PhysReg::S4, 8).into());
        text.push(Instr::sw(PhysReg::S1, PhysReg::Fp, local_offset(2)).into());
        text.extend(f.epilogue(Label::local("f$L0")));
        let program = AsmProgram {
            text,
            data: Vec::new(),
        };
        let mut m = Machine::new(&program).expect("load");
        m.set_reg(Reg::Phys(PhysReg::Fp), 0x1234);
        m.set_reg(Reg::Phys(PhysReg::S1), 11);
        m.set_reg(Reg::Phys(PhysReg::S4), 44);
        m.run_from("f").expect("run");
        assert_eq!(m.reg(Reg::Phys(PhysReg::Sp)), STACK_TOP as i32);
        assert_eq!(m.reg(Reg::Phys(PhysReg::Fp)), 0x1234);
        assert_eq!(m.reg(Reg::Phys(PhysReg::S1)), 11);
        assert_eq!(m.reg(Reg::Phys(PhysReg::S4)), 44);
    }

    #[test]
    fn top_level_saves_zero_and_exits() {
        let f = FrameLayout::top_level();
        let pro = f.prologue();
        assert_eq!(pro.len(), 4);
        let epi = f.epilogue(Label::local("main$L0"));
        assert!(matches!(epi.last(), Some(AsmItem::Instr(i)) if i.to_string() == "ecall"));
    }
}
