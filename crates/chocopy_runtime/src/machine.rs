//! RV32IM interpreter over `AsmProgram`.

use chocopy_syntax::{syscall, AsmItem, AsmProgram, DataItem, Instr, Opcode, PhysReg, Reg, VirtReg};
use log::trace;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const TEXT_BASE: u32 = 0x0040_0000;
pub const DATA_BASE: u32 = 0x1000_0000;
pub const STACK_TOP: u32 = 0x7fff_fff0;
/// Return address that ends a run started with `run_from`.
pub const HALT_ADDRESS: u32 = 0;
/// Accesses below this address are treated as null dereferences.
const NULL_PAGE: u32 = 0x1000;

pub const DEFAULT_MAX_STEPS: u64 = 10_000_000;

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub exit_code: i32,
    pub stdout: String,
    pub steps: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MachineError {
    UndefinedLabel(String),
    PcOutOfRange(u32),
    InvalidAddress { addr: u32, pc: u32 },
    UnknownSyscall(i32),
    StepLimit(u64),
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineError::UndefinedLabel(l) => write!(f, "undefined label '{}'", l),
            MachineError::PcOutOfRange(pc) => {
                write!(f, "pc {:#010x} is outside the text segment", pc)
            }
            MachineError::InvalidAddress { addr, pc } => {
                write!(f, "invalid memory access at {:#010x} (pc {:#010x})", addr, pc)
            }
            MachineError::UnknownSyscall(n) => write!(f, "unknown syscall {}", n),
            MachineError::StepLimit(n) => write!(f, "step limit of {} instructions exceeded", n),
        }
    }
}

impl std::error::Error for MachineError {}

pub struct Machine {
    text: Vec<Instr>,
    labels: BTreeMap<String, u32>,
    memory: HashMap<u32, u8>,
    regs: [i32; 32],
    virt: HashMap<VirtReg, i32>,
    pc: u32,
    brk: u32,
    stdout: String,
    max_steps: u64,
}

fn align4(n: u32) -> u32 {
    (n + 3) & !3
}

impl Machine {
    /// Lay out the data segment and resolve every label the program names.
    pub fn new(program: &AsmProgram) -> Result<Self, MachineError> {
        let mut labels = BTreeMap::new();
        let mut text = Vec::new();
        for item in &program.text {
            match item {
                AsmItem::Label(l) => {
                    labels.insert(l.name().to_string(), TEXT_BASE + 4 * text.len() as u32);
                }
                AsmItem::Instr(i) => text.push(i.clone()),
            }
        }

        // A data label names the item after it, so it is placed only once
        // that item's alignment is known.
        let mut cursor = DATA_BASE;
        let mut pending: Vec<&str> = Vec::new();
        for item in &program.data {
            let start = match item {
                DataItem::Label(l) => {
                    pending.push(l.name());
                    continue;
                }
                DataItem::Word(_) | DataItem::Address(_) => align4(cursor),
                DataItem::Ascii(_) => cursor,
                DataItem::Align => {
                    cursor = align4(cursor);
                    continue;
                }
            };
            for name in pending.drain(..) {
                labels.insert(name.to_string(), start);
            }
            cursor = match item {
                DataItem::Ascii(s) => start + s.len() as u32 + 1,
                _ => start + 4,
            };
        }
        for name in pending {
            labels.insert(name.to_string(), cursor);
        }

        let mut m = Machine {
            text,
            labels,
            memory: HashMap::new(),
            regs: [0; 32],
            virt: HashMap::new(),
            pc: TEXT_BASE,
            brk: align4(cursor),
            stdout: String::new(),
            max_steps: DEFAULT_MAX_STEPS,
        };

        let mut cursor = DATA_BASE;
        for item in &program.data {
            match item {
                DataItem::Label(_) => {}
                DataItem::Word(w) => {
                    cursor = align4(cursor);
                    m.write_word(cursor, *w);
                    cursor += 4;
                }
                DataItem::Address(l) => {
                    let addr = m.resolve(l.name())?;
                    cursor = align4(cursor);
                    m.write_word(cursor, addr as i32);
                    cursor += 4;
                }
                DataItem::Ascii(s) => {
                    for b in s.bytes() {
                        m.memory.insert(cursor, b);
                        cursor += 1;
                    }
                    m.memory.insert(cursor, 0);
                    cursor += 1;
                }
                DataItem::Align => cursor = align4(cursor),
            }
        }

        for i in &m.text {
            if let Some(l) = i.target() {
                if !m.labels.contains_key(l.name()) {
                    return Err(MachineError::UndefinedLabel(l.name().to_string()));
                }
            }
        }
        Ok(m)
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn label_address(&self, name: &str) -> Option<u32> {
        self.labels.get(name).copied()
    }

    fn resolve(&self, name: &str) -> Result<u32, MachineError> {
        self.label_address(name)
            .ok_or_else(|| MachineError::UndefinedLabel(name.to_string()))
    }

    pub fn reg(&self, r: Reg) -> i32 {
        match r {
            Reg::Phys(PhysReg::Zero) => 0,
            Reg::Phys(p) => self.regs[p.number()],
            Reg::Virt(v) => self.virt.get(&v).copied().unwrap_or(0),
        }
    }

    pub fn set_reg(&mut self, r: Reg, value: i32) {
        match r {
            Reg::Phys(PhysReg::Zero) => {}
            Reg::Phys(p) => self.regs[p.number()] = value,
            Reg::Virt(v) => {
                self.virt.insert(v, value);
            }
        }
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    fn check(&self, addr: u32) -> Result<(), MachineError> {
        if addr < NULL_PAGE {
            return Err(MachineError::InvalidAddress { addr, pc: self.pc });
        }
        Ok(())
    }

    fn read_byte(&self, addr: u32) -> u8 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    fn write_word(&mut self, addr: u32, value: i32) {
        for (k, b) in value.to_le_bytes().into_iter().enumerate() {
            self.memory.insert(addr + k as u32, b);
        }
    }

    pub fn load_word(&self, addr: u32) -> Result<i32, MachineError> {
        self.check(addr)?;
        let bytes = [0, 1, 2, 3].map(|k| self.read_byte(addr.wrapping_add(k)));
        Ok(i32::from_le_bytes(bytes))
    }

    /// NUL-terminated string starting at `addr`.
    pub fn load_cstr(&self, addr: u32) -> Result<String, MachineError> {
        self.check(addr)?;
        let mut bytes = Vec::new();
        let mut a = addr;
        loop {
            let b = self.read_byte(a);
            if b == 0 {
                break;
            }
            bytes.push(b);
            a = a.wrapping_add(1);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Run from the `main` label until the program exits.
    pub fn run(&mut self) -> Result<Outcome, MachineError> {
        self.run_from("main")
    }

    /// Run from `entry` with a fresh stack. Returning to `HALT_ADDRESS`
    /// ends the run with status 0.
    pub fn run_from(&mut self, entry: &str) -> Result<Outcome, MachineError> {
        self.pc = self.resolve(entry)?;
        self.regs[PhysReg::Sp.number()] = STACK_TOP as i32;
        self.regs[PhysReg::Ra.number()] = HALT_ADDRESS as i32;
        let mut steps = 0u64;
        loop {
            if self.pc == HALT_ADDRESS {
                return Ok(self.finish(0, steps));
            }
            if steps >= self.max_steps {
                return Err(MachineError::StepLimit(self.max_steps));
            }
            steps += 1;
            let index = self.pc.wrapping_sub(TEXT_BASE) / 4;
            let instr = self
                .text
                .get(index as usize)
                .filter(|_| self.pc >= TEXT_BASE)
                .cloned()
                .ok_or(MachineError::PcOutOfRange(self.pc))?;
            trace!("{:#010x}: {}", self.pc, instr);
            if let Some(code) = self.step(&instr)? {
                return Ok(self.finish(code, steps));
            }
        }
    }

    fn finish(&self, exit_code: i32, steps: u64) -> Outcome {
        Outcome {
            exit_code,
            stdout: self.stdout.clone(),
            steps,
        }
    }

    fn target(&self, instr: &Instr) -> Result<u32, MachineError> {
        match instr.target() {
            Some(l) => self.resolve(l.name()),
            None => Err(MachineError::UndefinedLabel(String::new())),
        }
    }

    fn branch(&self, instr: &Instr, taken: bool, next: u32) -> Result<u32, MachineError> {
        if taken {
            self.target(instr)
        } else {
            Ok(next)
        }
    }

    /// Execute one instruction. Returns the exit status when it ends the program.
    fn step(&mut self, i: &Instr) -> Result<Option<i32>, MachineError> {
        let rs1 = i.rs1().map(|r| self.reg(r)).unwrap_or(0);
        let rs2 = i.rs2().map(|r| self.reg(r)).unwrap_or(0);
        let imm = i.imm().unwrap_or(0);
        let next = self.pc.wrapping_add(4);
        let mut pc = next;
        let mut result = None;
        match i.op() {
            Opcode::Add => result = Some(rs1.wrapping_add(rs2)),
            Opcode::Sub => result = Some(rs1.wrapping_sub(rs2)),
            Opcode::Mul => result = Some(rs1.wrapping_mul(rs2)),
            Opcode::Div => {
                result = Some(if rs2 == 0 { -1 } else { rs1.wrapping_div(rs2) });
            }
            Opcode::Rem => {
                result = Some(if rs2 == 0 { rs1 } else { rs1.wrapping_rem(rs2) });
            }
            Opcode::And => result = Some(rs1 & rs2),
            Opcode::Or => result = Some(rs1 | rs2),
            Opcode::Xor => result = Some(rs1 ^ rs2),
            Opcode::Sll => result = Some(rs1.wrapping_shl(rs2 as u32 & 31)),
            Opcode::Slt => result = Some((rs1 < rs2) as i32),
            Opcode::Sltu => result = Some(((rs1 as u32) < (rs2 as u32)) as i32),
            Opcode::Addi => result = Some(rs1.wrapping_add(imm)),
            Opcode::Andi => result = Some(rs1 & imm),
            Opcode::Xori => result = Some(rs1 ^ imm),
            Opcode::Slti => result = Some((rs1 < imm) as i32),
            Opcode::Slli => result = Some(rs1.wrapping_shl(imm as u32 & 31)),
            Opcode::Srai => result = Some(rs1 >> (imm & 31)),
            Opcode::Li => result = Some(imm),
            Opcode::La => result = Some(self.target(i)? as i32),
            Opcode::Mv => result = Some(rs1),
            Opcode::Seqz => result = Some((rs1 == 0) as i32),
            Opcode::Snez => result = Some((rs1 != 0) as i32),
            Opcode::Lw => result = Some(self.load_word((rs1.wrapping_add(imm)) as u32)?),
            Opcode::Lbu => {
                let addr = rs1.wrapping_add(imm) as u32;
                self.check(addr)?;
                result = Some(self.read_byte(addr) as i32);
            }
            Opcode::Sw => {
                let addr = rs1.wrapping_add(imm) as u32;
                self.check(addr)?;
                self.write_word(addr, rs2);
            }
            Opcode::Sb => {
                let addr = rs1.wrapping_add(imm) as u32;
                self.check(addr)?;
                self.memory.insert(addr, rs2 as u8);
            }
            Opcode::J => pc = self.target(i)?,
            Opcode::Jal => {
                result = Some(next as i32);
                pc = self.target(i)?;
            }
            Opcode::Jalr => {
                result = Some(next as i32);
                pc = rs1 as u32;
            }
            Opcode::Jr => pc = rs1 as u32,
            Opcode::Beq => pc = self.branch(i, rs1 == rs2, next)?,
            Opcode::Bne => pc = self.branch(i, rs1 != rs2, next)?,
            Opcode::Blt => pc = self.branch(i, rs1 < rs2, next)?,
            Opcode::Bge => pc = self.branch(i, rs1 >= rs2, next)?,
            Opcode::Bltu => pc = self.branch(i, (rs1 as u32) < (rs2 as u32), next)?,
            Opcode::Bgeu => pc = self.branch(i, (rs1 as u32) >= (rs2 as u32), next)?,
            Opcode::Beqz => pc = self.branch(i, rs1 == 0, next)?,
            Opcode::Bnez => pc = self.branch(i, rs1 != 0, next)?,
            Opcode::Ecall => {
                if let Some(code) = self.syscall()? {
                    return Ok(Some(code));
                }
            }
        }
        if let (Some(rd), Some(value)) = (i.rd(), result) {
            self.set_reg(rd, value);
        }
        self.pc = pc;
        Ok(None)
    }

    fn syscall(&mut self) -> Result<Option<i32>, MachineError> {
        let a0 = self.regs[PhysReg::A0.number()];
        let number = self.regs[PhysReg::A7.number()];
        match number {
            syscall::PRINT_INT => self.stdout.push_str(&a0.to_string()),
            syscall::PRINT_STRING => {
                let s = self.load_cstr(a0 as u32)?;
                self.stdout.push_str(&s);
            }
            syscall::PRINT_CHAR => self.stdout.push(a0 as u8 as char),
            syscall::SBRK => {
                let old = self.brk;
                self.brk = align4(self.brk.wrapping_add(a0 as u32));
                self.regs[PhysReg::A0.number()] = old as i32;
            }
            syscall::EXIT => return Ok(Some(0)),
            syscall::EXIT2 => return Ok(Some(a0)),
            other => return Err(MachineError::UnknownSyscall(other)),
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chocopy_syntax::{Label, PhysReg::*};

    fn program(text: Vec<AsmItem>, data: Vec<DataItem>) -> AsmProgram {
        let mut items = vec![AsmItem::Label(Label::global("main"))];
        items.extend(text);
        AsmProgram { text: items, data }
    }

    #[test]
    fn prints_and_exits_with_status() {
        let p = program(
            vec![
                Instr::la(A0, Label::global("msg")).into(),
                Instr::li(A7, syscall::PRINT_STRING).into(),
                Instr::ecall().into(),
                Instr::li(A0, -7).into(),
                Instr::li(A7, syscall::PRINT_INT).into(),
                Instr::ecall().into(),
                Instr::li(A0, 3).into(),
                Instr::li(A7, syscall::EXIT2).into(),
                Instr::ecall().into(),
            ],
            vec![
                DataItem::Label(Label::global("msg")),
                DataItem::Ascii("hi ".to_string()),
            ],
        );
        let outcome = Machine::new(&p).expect("load").run().expect("run");
        assert_eq!(outcome.stdout, "hi -7");
        assert_eq!(outcome.exit_code, 3);
    }

    #[test]
    fn words_are_aligned_after_strings() {
        let p = program(
            vec![Instr::li(A7, syscall::EXIT).into(), Instr::ecall().into()],
            vec![
                DataItem::Ascii("ab".to_string()),
                DataItem::Label(Label::global("w")),
                DataItem::Word(0x1234),
            ],
        );
        let m = Machine::new(&p).expect("load");
        let w = m.label_address("w").expect("label");
        assert_eq!(w % 4, 0);
        assert_eq!(m.load_word(w).ok(), Some(0x1234));
    }

    #[test]
    fn labels_before_words_follow_alignment_and_addresses_resolve() {
        let p = program(
            vec![Instr::li(A7, syscall::EXIT).into(), Instr::ecall().into()],
            vec![
                DataItem::Label(Label::global("s")),
                DataItem::Ascii("abc".to_string()),
                DataItem::Ascii("d".to_string()),
                DataItem::Label(Label::global("first")),
                DataItem::Label(Label::global("alias")),
                DataItem::Address(Label::global("s")),
                DataItem::Word(-5),
                DataItem::Label(Label::global("end")),
            ],
        );
        let m = Machine::new(&p).expect("load");
        let s = m.label_address("s").expect("s");
        let first = m.label_address("first").expect("first");
        assert_eq!(s, DATA_BASE);
        assert_eq!(first, DATA_BASE + 8);
        assert_eq!(m.label_address("alias"), Some(first));
        assert_eq!(m.load_word(first).ok(), Some(s as i32));
        assert_eq!(m.load_word(first + 4).ok(), Some(-5));
        assert_eq!(m.label_address("end"), Some(first + 8));
        assert_eq!(m.load_cstr(s).ok().as_deref(), Some("abc"));
    }

    #[test]
    fn call_and_return_halts_at_sentinel() {
        let f = Label::global("f");
        let p = AsmProgram {
            text: vec![
                AsmItem::Label(f.clone()),
                Instr::addi(A0, A0, 1).into(),
                Instr::jr(Ra).into(),
            ],
            data: Vec::new(),
        };
        let mut m = Machine::new(&p).expect("load");
        m.set_reg(Reg::Phys(A0), 41);
        let outcome = m.run_from("f").expect("run");
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(m.reg(Reg::Phys(A0)), 42);
        assert_eq!(m.reg(Reg::Phys(Sp)), STACK_TOP as i32);
    }

    #[test]
    fn null_dereference_is_reported() {
        let p = program(vec![Instr::lw(A0, Zero, 8).into()], Vec::new());
        let err = Machine::new(&p).expect("load").run().expect_err("null");
        assert!(matches!(err, MachineError::InvalidAddress { addr: 8, .. }));
    }

    #[test]
    fn undefined_labels_fail_at_load() {
        let p = program(vec![Instr::j(Label::local("nowhere")).into()], Vec::new());
        assert_eq!(
            Machine::new(&p).err(),
            Some(MachineError::UndefinedLabel("nowhere".to_string()))
        );
    }

    #[test]
    fn infinite_loops_hit_the_step_limit() {
        let top = Label::local("top");
        let p = program(
            vec![AsmItem::Label(top.clone()), Instr::j(top).into()],
            Vec::new(),
        );
        let err = Machine::new(&p)
            .expect("load")
            .with_max_steps(100)
            .run()
            .expect_err("loop");
        assert_eq!(err, MachineError::StepLimit(100));
    }

    #[test]
    fn virtual_registers_live_in_an_unbounded_file() {
        let v = |n| Reg::Virt(VirtReg(n));
        let p = program(
            vec![
                Instr::li(v(1000), 20).into(),
                Instr::li(v(2000), 22).into(),
                Instr::add(A0, v(1000), v(2000)).into(),
                Instr::li(A7, syscall::EXIT).into(),
                Instr::ecall().into(),
            ],
            Vec::new(),
        );
        let mut m = Machine::new(&p).expect("load");
        m.run().expect("run");
        assert_eq!(m.reg(Reg::Phys(A0)), 42);
    }
}
