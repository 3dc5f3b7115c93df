//! Instruction model for the RV32IM target: registers, labels, instruction
//! records, data-segment items. Consumed by the register allocator, the
//! assembly writer, and the reference machine.

use std::fmt;

/// Bytes per machine word.
pub const WORD_SIZE: i32 = 4;

/// Physical registers in hardware-number order (`x0..x31`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhysReg {
    Zero,
    Ra,
    Sp,
    Gp,
    Tp,
    T0,
    T1,
    T2,
    Fp,
    S1,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    T3,
    T4,
    T5,
    T6,
}

use PhysReg::*;

impl PhysReg {
    pub const ALL: [PhysReg; 32] = [
        Zero, Ra, Sp, Gp, Tp, T0, T1, T2, Fp, S1, A0, A1, A2, A3, A4, A5, A6, A7, S2, S3, S4, S5,
        S6, S7, S8, S9, S10, S11, T3, T4, T5, T6,
    ];

    pub fn number(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        const NAMES: [&str; 32] = [
            "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "fp", "s1", "a0", "a1", "a2", "a3",
            "a4", "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11",
            "t3", "t4", "t5", "t6",
        ];
        NAMES[self.number()]
    }

    pub fn is_callee_saved(self) -> bool {
        CALLEE_SAVED.contains(&self)
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Argument registers; arguments beyond these stay in their stack slots.
pub const ARG_REGS: [PhysReg; 4] = [A0, A1, A2, A3];
pub const RETURN_REG: PhysReg = A0;
pub const CALLEE_SAVED: [PhysReg; 12] = [Fp, S1, S2, S3, S4, S5, S6, S7, S8, S9, S10, S11];
pub const CALLER_SAVED: [PhysReg; 16] = [
    Ra, T0, T1, T2, T3, T4, T5, T6, A0, A1, A2, A3, A4, A5, A6, A7,
];
/// Registers handed to temporaries, in preference order. All callee-saved,
/// so values survive calls without caller-side saves.
pub const ALLOCATABLE: [PhysReg; 11] = [S1, S2, S3, S4, S5, S6, S7, S8, S9, S10, S11];
/// Reserved for spill reloads; the translator never touches them.
pub const SPILL_SCRATCH: [PhysReg; 2] = [T5, T6];

/// Unbounded pseudo-register, unique within one function translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtReg(pub u32);

impl fmt::Display for VirtReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%v{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reg {
    Phys(PhysReg),
    Virt(VirtReg),
}

impl Reg {
    pub fn as_virt(self) -> Option<VirtReg> {
        match self {
            Reg::Virt(v) => Some(v),
            Reg::Phys(_) => None,
        }
    }

    pub fn as_phys(self) -> Option<PhysReg> {
        match self {
            Reg::Phys(p) => Some(p),
            Reg::Virt(_) => None,
        }
    }
}

impl From<PhysReg> for Reg {
    fn from(p: PhysReg) -> Self {
        Reg::Phys(p)
    }
}

impl From<VirtReg> for Reg {
    fn from(v: VirtReg) -> Self {
        Reg::Virt(v)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Phys(p) => p.fmt(f),
            Reg::Virt(v) => v.fmt(f),
        }
    }
}

/// Symbolic address, resolved to a number only by the emission sink.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    name: String,
    global: bool,
}

impl Label {
    /// Externally visible name (functions, classes, runtime routines).
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            global: true,
        }
    }

    /// Name private to one translation unit.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            global: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_global(&self) -> bool {
        self.global
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Per-function source of unique local labels. Prefixing with the function's
/// code label keeps names unique across the whole program.
#[derive(Clone, Debug)]
pub struct LabelGen {
    prefix: String,
    next: u32,
}

impl LabelGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }

    pub fn fresh(&mut self) -> Label {
        let l = Label::local(format!("{}$L{}", self.prefix, self.next));
        self.next += 1;
        l
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    // register-register
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Sll,
    Slt,
    Sltu,
    // register-immediate
    Addi,
    Andi,
    Xori,
    Slti,
    Slli,
    Srai,
    // pseudo
    Li,
    La,
    Mv,
    Seqz,
    Snez,
    // memory
    Lw,
    Lbu,
    Sw,
    Sb,
    // control
    J,
    Jal,
    Jalr,
    Jr,
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    Beqz,
    Bnez,
    Ecall,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Rem => "rem",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Sll => "sll",
            Opcode::Slt => "slt",
            Opcode::Sltu => "sltu",
            Opcode::Addi => "addi",
            Opcode::Andi => "andi",
            Opcode::Xori => "xori",
            Opcode::Slti => "slti",
            Opcode::Slli => "slli",
            Opcode::Srai => "srai",
            Opcode::Li => "li",
            Opcode::La => "la",
            Opcode::Mv => "mv",
            Opcode::Seqz => "seqz",
            Opcode::Snez => "snez",
            Opcode::Lw => "lw",
            Opcode::Lbu => "lbu",
            Opcode::Sw => "sw",
            Opcode::Sb => "sb",
            Opcode::J => "j",
            Opcode::Jal => "jal",
            Opcode::Jalr => "jalr",
            Opcode::Jr => "jr",
            Opcode::Beq => "beq",
            Opcode::Bne => "bne",
            Opcode::Blt => "blt",
            Opcode::Bge => "bge",
            Opcode::Bltu => "bltu",
            Opcode::Bgeu => "bgeu",
            Opcode::Beqz => "beqz",
            Opcode::Bnez => "bnez",
            Opcode::Ecall => "ecall",
        }
    }
}

/// How control leaves an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow<'a> {
    /// Continues with the next instruction (includes calls and ecalls).
    Next,
    /// Unconditional transfer to a label.
    Jump(&'a Label),
    /// Either the next instruction or the label.
    Branch(&'a Label),
    /// Leaves the function (`jr`).
    Exit,
}

/// One machine operation. Only the named constructors build these, so every
/// record has the operand shape its opcode requires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instr {
    op: Opcode,
    rd: Option<Reg>,
    rs1: Option<Reg>,
    rs2: Option<Reg>,
    imm: Option<i32>,
    target: Option<Label>,
    comment: Option<String>,
}

impl Instr {
    fn build(op: Opcode) -> Self {
        Self {
            op,
            rd: None,
            rs1: None,
            rs2: None,
            imm: None,
            target: None,
            comment: None,
        }
    }

    fn rtype(op: Opcode, rd: Reg, rs1: Reg, rs2: Reg) -> Self {
        Self {
            rd: Some(rd),
            rs1: Some(rs1),
            rs2: Some(rs2),
            ..Self::build(op)
        }
    }

    fn itype(op: Opcode, rd: Reg, rs1: Reg, imm: i32) -> Self {
        Self {
            rd: Some(rd),
            rs1: Some(rs1),
            imm: Some(imm),
            ..Self::build(op)
        }
    }

    fn unary(op: Opcode, rd: Reg, rs: Reg) -> Self {
        Self {
            rd: Some(rd),
            rs1: Some(rs),
            ..Self::build(op)
        }
    }

    fn branch(op: Opcode, rs1: Reg, rs2: Reg, target: Label) -> Self {
        Self {
            rs1: Some(rs1),
            rs2: Some(rs2),
            target: Some(target),
            ..Self::build(op)
        }
    }

    fn branch_zero(op: Opcode, rs: Reg, target: Label) -> Self {
        Self {
            rs1: Some(rs),
            target: Some(target),
            ..Self::build(op)
        }
    }

    pub fn add(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Add, rd.into(), rs1.into(), rs2.into())
    }

    pub fn sub(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Sub, rd.into(), rs1.into(), rs2.into())
    }

    pub fn mul(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Mul, rd.into(), rs1.into(), rs2.into())
    }

    pub fn div(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Div, rd.into(), rs1.into(), rs2.into())
    }

    pub fn rem(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Rem, rd.into(), rs1.into(), rs2.into())
    }

    pub fn and(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::And, rd.into(), rs1.into(), rs2.into())
    }

    pub fn or(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Or, rd.into(), rs1.into(), rs2.into())
    }

    pub fn xor(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Xor, rd.into(), rs1.into(), rs2.into())
    }

    pub fn sll(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Sll, rd.into(), rs1.into(), rs2.into())
    }

    pub fn slt(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Slt, rd.into(), rs1.into(), rs2.into())
    }

    pub fn sltu(rd: impl Into<Reg>, rs1: impl Into<Reg>, rs2: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Sltu, rd.into(), rs1.into(), rs2.into())
    }

    pub fn addi(rd: impl Into<Reg>, rs1: impl Into<Reg>, imm: i32) -> Self {
        Self::itype(Opcode::Addi, rd.into(), rs1.into(), imm)
    }

    pub fn andi(rd: impl Into<Reg>, rs1: impl Into<Reg>, imm: i32) -> Self {
        Self::itype(Opcode::Andi, rd.into(), rs1.into(), imm)
    }

    pub fn xori(rd: impl Into<Reg>, rs1: impl Into<Reg>, imm: i32) -> Self {
        Self::itype(Opcode::Xori, rd.into(), rs1.into(), imm)
    }

    pub fn slti(rd: impl Into<Reg>, rs1: impl Into<Reg>, imm: i32) -> Self {
        Self::itype(Opcode::Slti, rd.into(), rs1.into(), imm)
    }

    pub fn slli(rd: impl Into<Reg>, rs1: impl Into<Reg>, shamt: i32) -> Self {
        Self::itype(Opcode::Slli, rd.into(), rs1.into(), shamt & 31)
    }

    pub fn srai(rd: impl Into<Reg>, rs1: impl Into<Reg>, shamt: i32) -> Self {
        Self::itype(Opcode::Srai, rd.into(), rs1.into(), shamt & 31)
    }

    pub fn li(rd: impl Into<Reg>, imm: i32) -> Self {
        Self {
            rd: Some(rd.into()),
            imm: Some(imm),
            ..Self::build(Opcode::Li)
        }
    }

    pub fn la(rd: impl Into<Reg>, label: Label) -> Self {
        Self {
            rd: Some(rd.into()),
            target: Some(label),
            ..Self::build(Opcode::La)
        }
    }

    pub fn mv(rd: impl Into<Reg>, rs: impl Into<Reg>) -> Self {
        Self::unary(Opcode::Mv, rd.into(), rs.into())
    }

    /// `rd = -rs`, encoded as `sub rd, zero, rs`.
    pub fn neg(rd: impl Into<Reg>, rs: impl Into<Reg>) -> Self {
        Self::rtype(Opcode::Sub, rd.into(), Reg::Phys(Zero), rs.into())
    }

    pub fn seqz(rd: impl Into<Reg>, rs: impl Into<Reg>) -> Self {
        Self::unary(Opcode::Seqz, rd.into(), rs.into())
    }

    pub fn snez(rd: impl Into<Reg>, rs: impl Into<Reg>) -> Self {
        Self::unary(Opcode::Snez, rd.into(), rs.into())
    }

    /// `rd = mem32[base + offset]`
    pub fn lw(rd: impl Into<Reg>, base: impl Into<Reg>, offset: i32) -> Self {
        Self::itype(Opcode::Lw, rd.into(), base.into(), offset)
    }

    /// `rd = zero_extend(mem8[base + offset])`
    pub fn lbu(rd: impl Into<Reg>, base: impl Into<Reg>, offset: i32) -> Self {
        Self::itype(Opcode::Lbu, rd.into(), base.into(), offset)
    }

    /// `mem32[base + offset] = src`
    pub fn sw(src: impl Into<Reg>, base: impl Into<Reg>, offset: i32) -> Self {
        Self {
            rs1: Some(base.into()),
            rs2: Some(src.into()),
            imm: Some(offset),
            ..Self::build(Opcode::Sw)
        }
    }

    /// `mem8[base + offset] = src & 0xff`
    pub fn sb(src: impl Into<Reg>, base: impl Into<Reg>, offset: i32) -> Self {
        Self {
            rs1: Some(base.into()),
            rs2: Some(src.into()),
            imm: Some(offset),
            ..Self::build(Opcode::Sb)
        }
    }

    pub fn j(target: Label) -> Self {
        Self {
            target: Some(target),
            ..Self::build(Opcode::J)
        }
    }

    /// Direct call; the return address lands in `ra`.
    pub fn jal(target: Label) -> Self {
        Self {
            rd: Some(Reg::Phys(Ra)),
            target: Some(target),
            ..Self::build(Opcode::Jal)
        }
    }

    /// Indirect call through `rs`; the return address lands in `ra`.
    pub fn jalr(rs: impl Into<Reg>) -> Self {
        Self {
            rd: Some(Reg::Phys(Ra)),
            rs1: Some(rs.into()),
            ..Self::build(Opcode::Jalr)
        }
    }

    pub fn jr(rs: impl Into<Reg>) -> Self {
        Self {
            rs1: Some(rs.into()),
            ..Self::build(Opcode::Jr)
        }
    }

    pub fn beq(rs1: impl Into<Reg>, rs2: impl Into<Reg>, target: Label) -> Self {
        Self::branch(Opcode::Beq, rs1.into(), rs2.into(), target)
    }

    pub fn bne(rs1: impl Into<Reg>, rs2: impl Into<Reg>, target: Label) -> Self {
        Self::branch(Opcode::Bne, rs1.into(), rs2.into(), target)
    }

    pub fn blt(rs1: impl Into<Reg>, rs2: impl Into<Reg>, target: Label) -> Self {
        Self::branch(Opcode::Blt, rs1.into(), rs2.into(), target)
    }

    pub fn bge(rs1: impl Into<Reg>, rs2: impl Into<Reg>, target: Label) -> Self {
        Self::branch(Opcode::Bge, rs1.into(), rs2.into(), target)
    }

    pub fn bltu(rs1: impl Into<Reg>, rs2: impl Into<Reg>, target: Label) -> Self {
        Self::branch(Opcode::Bltu, rs1.into(), rs2.into(), target)
    }

    pub fn bgeu(rs1: impl Into<Reg>, rs2: impl Into<Reg>, target: Label) -> Self {
        Self::branch(Opcode::Bgeu, rs1.into(), rs2.into(), target)
    }

    pub fn beqz(rs: impl Into<Reg>, target: Label) -> Self {
        Self::branch_zero(Opcode::Beqz, rs.into(), target)
    }

    pub fn bnez(rs: impl Into<Reg>, target: Label) -> Self {
        Self::branch_zero(Opcode::Bnez, rs.into(), target)
    }

    pub fn ecall() -> Self {
        Self::build(Opcode::Ecall)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn op(&self) -> Opcode {
        self.op
    }

    pub fn rd(&self) -> Option<Reg> {
        self.rd
    }

    pub fn rs1(&self) -> Option<Reg> {
        self.rs1
    }

    pub fn rs2(&self) -> Option<Reg> {
        self.rs2
    }

    pub fn imm(&self) -> Option<i32> {
        self.imm
    }

    pub fn target(&self) -> Option<&Label> {
        self.target.as_ref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Register written by this instruction, if any.
    pub fn def(&self) -> Option<Reg> {
        self.rd
    }

    /// Registers read by this instruction, in operand order.
    pub fn uses(&self) -> impl Iterator<Item = Reg> + '_ {
        self.rs1.into_iter().chain(self.rs2)
    }

    pub fn has_virtual(&self) -> bool {
        self.rd
            .into_iter()
            .chain(self.uses())
            .any(|r| r.as_virt().is_some())
    }

    /// Rewrite register operands. `f` receives each operand and whether it is
    /// the destination.
    pub fn map_regs(&self, mut f: impl FnMut(Reg, bool) -> Reg) -> Instr {
        Instr {
            op: self.op,
            rs1: self.rs1.map(|r| f(r, false)),
            rs2: self.rs2.map(|r| f(r, false)),
            rd: self.rd.map(|r| f(r, true)),
            imm: self.imm,
            target: self.target.clone(),
            comment: self.comment.clone(),
        }
    }

    pub fn flow(&self) -> Flow<'_> {
        match (self.op, &self.target) {
            (Opcode::J, Some(l)) => Flow::Jump(l),
            (
                Opcode::Beq
                | Opcode::Bne
                | Opcode::Blt
                | Opcode::Bge
                | Opcode::Bltu
                | Opcode::Bgeu
                | Opcode::Beqz
                | Opcode::Bnez,
                Some(l),
            ) => Flow::Branch(l),
            (Opcode::Jr, _) => Flow::Exit,
            _ => Flow::Next,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.op.mnemonic();
        let reg = |r: Option<Reg>| r.map(|r| r.to_string()).unwrap_or_default();
        let imm = self.imm.unwrap_or(0);
        let target = self.target.as_ref().map(|l| l.name()).unwrap_or("");
        match self.op {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Sll
            | Opcode::Slt
            | Opcode::Sltu => write!(
                f,
                "{} {}, {}, {}",
                m,
                reg(self.rd),
                reg(self.rs1),
                reg(self.rs2)
            ),
            Opcode::Addi
            | Opcode::Andi
            | Opcode::Xori
            | Opcode::Slti
            | Opcode::Slli
            | Opcode::Srai => write!(f, "{} {}, {}, {}", m, reg(self.rd), reg(self.rs1), imm),
            Opcode::Li => write!(f, "{} {}, {}", m, reg(self.rd), imm),
            Opcode::La => write!(f, "{} {}, {}", m, reg(self.rd), target),
            Opcode::Mv | Opcode::Seqz | Opcode::Snez => {
                write!(f, "{} {}, {}", m, reg(self.rd), reg(self.rs1))
            }
            Opcode::Lw | Opcode::Lbu => {
                write!(f, "{} {}, {}({})", m, reg(self.rd), imm, reg(self.rs1))
            }
            Opcode::Sw | Opcode::Sb => {
                write!(f, "{} {}, {}({})", m, reg(self.rs2), imm, reg(self.rs1))
            }
            Opcode::J | Opcode::Jal => write!(f, "{} {}", m, target),
            Opcode::Jalr | Opcode::Jr => write!(f, "{} {}", m, reg(self.rs1)),
            Opcode::Beq
            | Opcode::Bne
            | Opcode::Blt
            | Opcode::Bge
            | Opcode::Bltu
            | Opcode::Bgeu => write!(
                f,
                "{} {}, {}, {}",
                m,
                reg(self.rs1),
                reg(self.rs2),
                target
            ),
            Opcode::Beqz | Opcode::Bnez => write!(f, "{} {}, {}", m, reg(self.rs1), target),
            Opcode::Ecall => f.write_str(m),
        }
    }
}

/// One entry of the text segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsmItem {
    Label(Label),
    Instr(Instr),
}

impl From<Instr> for AsmItem {
    fn from(i: Instr) -> Self {
        AsmItem::Instr(i)
    }
}

/// One entry of the data segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataItem {
    Label(Label),
    Word(i32),
    /// A word holding the address of a label.
    Address(Label),
    /// Bytes of a string, NUL-terminated.
    Ascii(String),
    /// Pad to a word boundary.
    Align,
}

/// Complete output handed to the emission sink.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AsmProgram {
    pub text: Vec<AsmItem>,
    pub data: Vec<DataItem>,
}

impl AsmProgram {
    pub fn instructions(&self) -> impl Iterator<Item = &Instr> {
        self.text.iter().filter_map(|item| match item {
            AsmItem::Instr(i) => Some(i),
            AsmItem::Label(_) => None,
        })
    }
}

/// Syscall numbers, passed in `a7`.
pub mod syscall {
    pub const PRINT_INT: i32 = 1;
    pub const PRINT_STRING: i32 = 4;
    pub const SBRK: i32 = 9;
    pub const EXIT: i32 = 10;
    pub const PRINT_CHAR: i32 = 11;
    pub const EXIT2: i32 = 17;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_reads_both_operands_and_defines_nothing() {
        let i = Instr::sw(S1, Fp, -12);
        assert_eq!(i.def(), None);
        assert_eq!(i.uses().collect::<Vec<_>>(), vec![Reg::Phys(Fp), Reg::Phys(S1)]);
        assert_eq!(i.to_string(), "sw s1, -12(fp)");
    }

    #[test]
    fn map_regs_rewrites_virtuals_only_where_asked() {
        let v0 = Reg::Virt(VirtReg(0));
        let v1 = Reg::Virt(VirtReg(1));
        let i = Instr::add(v1, v0, A0);
        assert!(i.has_virtual());
        let mapped = i.map_regs(|r, is_def| match (r, is_def) {
            (Reg::Virt(_), true) => Reg::Phys(S2),
            (Reg::Virt(_), false) => Reg::Phys(S1),
            (p, _) => p,
        });
        assert_eq!(mapped.to_string(), "add s2, s1, a0");
        assert!(!mapped.has_virtual());
    }

    #[test]
    fn label_gen_is_prefixed_and_monotonic() {
        let mut g = LabelGen::new("f");
        assert_eq!(g.fresh().name(), "f$L0");
        assert_eq!(g.fresh().name(), "f$L1");
    }

    #[test]
    fn branch_flow_exposes_target() {
        let l = Label::local("x");
        assert_eq!(Instr::beqz(A0, l.clone()).flow(), Flow::Branch(&l));
        assert_eq!(Instr::j(l.clone()).flow(), Flow::Jump(&l));
        assert_eq!(Instr::jal(l).flow(), Flow::Next);
        assert_eq!(Instr::jr(Ra).flow(), Flow::Exit);
    }
}
