//! Where temporaries come from.
//!
//! Physical mode hands out pool registers directly, first free in pool
//! order. Virtual mode hands out fresh virtual registers and leaves the
//! choice to the allocator. Everything else in the translator is identical
//! between the two modes.

use chocopy_config::RegisterMode;
use chocopy_syntax::{CodegenError, PhysReg, Reg, Span, VirtReg};
use std::collections::BTreeSet;

pub struct RegSupply {
    mode: RegisterMode,
    pool: Vec<PhysReg>,
    in_use: BTreeSet<usize>,
    touched: BTreeSet<usize>,
    next_virt: u32,
}

impl RegSupply {
    pub fn new(mode: RegisterMode, pool: &[PhysReg]) -> Self {
        Self {
            mode,
            pool: pool.to_vec(),
            in_use: BTreeSet::new(),
            touched: BTreeSet::new(),
            next_virt: 0,
        }
    }

    pub fn mode(&self) -> RegisterMode {
        self.mode
    }

    pub fn pool(&self) -> &[PhysReg] {
        &self.pool
    }

    /// A register for a new temporary. `construct` names what is being
    /// translated, for the error when the pool runs dry.
    pub fn take(&mut self, construct: &str, span: Span) -> Result<Reg, CodegenError> {
        match self.mode {
            RegisterMode::Virtual => {
                let v = VirtReg(self.next_virt);
                self.next_virt += 1;
                Ok(Reg::Virt(v))
            }
            RegisterMode::Physical => {
                let slot = (0..self.pool.len())
                    .find(|i| !self.in_use.contains(i))
                    .ok_or_else(|| CodegenError::RegisterPoolExhausted {
                        construct: construct.to_string(),
                        span,
                    })?;
                self.in_use.insert(slot);
                self.touched.insert(slot);
                Ok(Reg::Phys(self.pool[slot]))
            }
        }
    }

    pub fn release(&mut self, r: Reg) {
        if let Reg::Phys(p) = r {
            if let Some(slot) = self.pool.iter().position(|q| *q == p) {
                self.in_use.remove(&slot);
            }
        }
    }

    /// Pool registers handed out so far, in pool order.
    pub fn touched(&self) -> Vec<PhysReg> {
        self.touched.iter().map(|&i| self.pool[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chocopy_syntax::ALLOCATABLE;

    #[test]
    fn physical_mode_reuses_released_registers() {
        let mut regs = RegSupply::new(RegisterMode::Physical, &ALLOCATABLE[..3]);
        let a = regs.take("a", Span::default()).expect("a");
        let b = regs.take("b", Span::default()).expect("b");
        assert_eq!(a, Reg::Phys(PhysReg::S1));
        assert_eq!(b, Reg::Phys(PhysReg::S2));
        regs.release(a);
        assert_eq!(regs.take("c", Span::default()).expect("c"), Reg::Phys(PhysReg::S1));
        assert_eq!(regs.touched(), vec![PhysReg::S1, PhysReg::S2]);
    }

    #[test]
    fn physical_mode_exhaustion_names_the_construct() {
        let mut regs = RegSupply::new(RegisterMode::Physical, &ALLOCATABLE[..1]);
        regs.take("x", Span::default()).expect("x");
        let err = regs.take("BinaryExpr", Span::new(2, 3, 2, 9)).expect_err("exhausted");
        assert_eq!(
            err,
            CodegenError::RegisterPoolExhausted {
                construct: "BinaryExpr".to_string(),
                span: Span::new(2, 3, 2, 9)
            }
        );
    }

    #[test]
    fn virtual_mode_never_runs_out() {
        let mut regs = RegSupply::new(RegisterMode::Virtual, &[]);
        for n in 0..100 {
            assert_eq!(regs.take("x", Span::default()).expect("v"), Reg::Virt(VirtReg(n)));
        }
        assert!(regs.touched().is_empty());
    }
}
