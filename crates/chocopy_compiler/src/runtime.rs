//! Runtime support emitted after the translated program: error trampolines,
//! `abort`, allocation, and the builtins generated code calls.
//!
//! Every routine here touches only caller-saved registers, so translated
//! code keeps its temporaries (callee-saved pool registers) across calls.
//! Arguments arrive in `a0..a2`; results leave in `a0`.

use chocopy_syntax::layout::{
    builtin_attr_name, exit_code, tag, DISPATCH_TABLE_OFFSET, SIZE_OFFSET, TYPE_TAG_OFFSET,
};
use chocopy_syntax::PhysReg::{self, *};
use chocopy_syntax::{syscall, AsmItem, CodegenError, Instr, Label, LabelGen, WORD_SIZE};

use crate::analysis::OBJECT_INIT;
use crate::consts::ConstPool;
use crate::symbols::ProgramInfo;

pub const ERROR_NONE: &str = "error.None";
pub const ERROR_DIV: &str = "error.Div";
pub const ERROR_OOB: &str = "error.OOB";
pub const ABORT: &str = "abort";
/// `a0` = prototype. Returns a copy of it.
pub const ALLOC: &str = "alloc";
/// `a0` = prototype, `a1` = size word, `a2` = payload words. Returns a new
/// object with the prototype's header and a zeroed payload.
pub const ALLOC2: &str = "alloc2";
/// `a0` = character code. Returns a one-character string.
pub const STR_CHAR: &str = "str.char";
pub const STRCAT: &str = "strcat";
pub const STREQL: &str = "streql";
pub const LISTCONCAT: &str = "listconcat";
pub const PRINT: &str = "print";
pub const LEN: &str = "len";

pub const LIST_PROTOTYPE: &str = "$.list$prototype";
pub const STR_PROTOTYPE: &str = "$str$prototype";
pub const INT_PROTOTYPE: &str = "$int$prototype";

pub fn error_none() -> Label {
    Label::global(ERROR_NONE)
}

pub fn error_div() -> Label {
    Label::global(ERROR_DIV)
}

pub fn error_oob() -> Label {
    Label::global(ERROR_OOB)
}

struct Emitter<'a> {
    out: &'a mut Vec<AsmItem>,
    labels: LabelGen,
}

impl Emitter<'_> {
    fn routine(&mut self, name: &str) {
        self.out.push(AsmItem::Label(Label::global(name)));
        self.labels = LabelGen::new(name);
    }

    fn i(&mut self, instr: Instr) {
        self.out.push(instr.into());
    }

    fn place(&mut self, l: &Label) {
        self.out.push(AsmItem::Label(l.clone()));
    }

    fn fresh(&mut self) -> Label {
        self.labels.fresh()
    }

    fn ecall(&mut self, number: i32) {
        self.i(Instr::li(A7, number));
        self.i(Instr::ecall());
    }

    /// Copy `count` (register) items of `step` bytes from `src` to `dst`,
    /// advancing both. Clobbers `t3` and the three operands.
    fn copy_loop(&mut self, src: PhysReg, dst: PhysReg, count: PhysReg, bytes: bool) {
        let top = self.fresh();
        let done = self.fresh();
        let step = if bytes { 1 } else { WORD_SIZE };
        self.place(&top);
        self.i(Instr::beqz(count, done.clone()));
        if bytes {
            self.i(Instr::lbu(T3, src, 0));
            self.i(Instr::sb(T3, dst, 0));
        } else {
            self.i(Instr::lw(T3, src, 0));
            self.i(Instr::sw(T3, dst, 0));
        }
        self.i(Instr::addi(src, src, step));
        self.i(Instr::addi(dst, dst, step));
        self.i(Instr::addi(count, count, -1));
        self.i(Instr::j(top));
        self.place(&done);
    }
}

/// Emit every runtime routine into `out`. Message strings go to `consts`.
pub fn emit(
    info: &ProgramInfo,
    consts: &mut ConstPool,
    out: &mut Vec<AsmItem>,
) -> Result<(), CodegenError> {
    let str_class = info.class_named("str")?;
    let str_attr = builtin_attr_name("str").ok_or_else(|| CodegenError::InvalidProgram {
        message: "str has no payload attribute".to_string(),
    })?;
    let payload = info.attribute(str_class, str_attr)?.offset;

    let mut e = Emitter {
        out,
        labels: LabelGen::new("runtime"),
    };

    for (name, code, message) in [
        (ERROR_NONE, exit_code::OPERATION_ON_NONE, "Operation on None"),
        (ERROR_DIV, exit_code::DIVISION_BY_ZERO, "Division by zero"),
        (ERROR_OOB, exit_code::INDEX_OUT_OF_BOUNDS, "Index out of bounds"),
    ] {
        e.routine(name);
        e.i(Instr::li(A0, code).with_comment(format!("exit code for: {}", message)));
        e.i(Instr::la(A1, consts.intern_str(message)));
        e.i(Instr::addi(A1, A1, payload).with_comment("message bytes"));
        e.i(Instr::j(Label::global(ABORT)));
    }

    // a0 = exit code, a1 = message bytes.
    e.routine(ABORT);
    e.i(Instr::mv(T0, A0));
    e.i(Instr::mv(A0, A1));
    e.ecall(syscall::PRINT_STRING);
    e.i(Instr::li(A0, '\n' as i32));
    e.ecall(syscall::PRINT_CHAR);
    e.i(Instr::mv(A0, T0));
    e.ecall(syscall::EXIT2);

    e.routine(ALLOC);
    e.i(Instr::mv(T0, A0).with_comment("prototype"));
    e.i(Instr::lw(T1, T0, SIZE_OFFSET).with_comment("attribute count"));
    e.i(Instr::addi(A0, T1, 3));
    e.i(Instr::slli(A0, A0, 2));
    e.ecall(syscall::SBRK);
    e.i(Instr::addi(A0, A0, 3 * WORD_SIZE).with_comment("object reference"));
    e.i(Instr::addi(T2, T0, TYPE_TAG_OFFSET));
    e.i(Instr::addi(T4, A0, TYPE_TAG_OFFSET));
    e.i(Instr::addi(T1, T1, 3));
    e.copy_loop(T2, T4, T1, false);
    e.i(Instr::jr(Ra));

    e.routine(ALLOC2);
    e.i(Instr::mv(T0, A0).with_comment("prototype"));
    e.i(Instr::addi(A0, A2, 3));
    e.i(Instr::slli(A0, A0, 2));
    e.ecall(syscall::SBRK);
    e.i(Instr::addi(A0, A0, 3 * WORD_SIZE).with_comment("object reference"));
    e.i(Instr::lw(T1, T0, TYPE_TAG_OFFSET));
    e.i(Instr::sw(T1, A0, TYPE_TAG_OFFSET));
    e.i(Instr::lw(T1, T0, DISPATCH_TABLE_OFFSET));
    e.i(Instr::sw(T1, A0, DISPATCH_TABLE_OFFSET));
    e.i(Instr::sw(A1, A0, SIZE_OFFSET));
    e.i(Instr::mv(T1, A0));
    e.i(Instr::mv(T2, A2));
    let top = e.fresh();
    let done = e.fresh();
    e.place(&top);
    e.i(Instr::beqz(T2, done.clone()));
    e.i(Instr::sw(Zero, T1, 0));
    e.i(Instr::addi(T1, T1, WORD_SIZE));
    e.i(Instr::addi(T2, T2, -1));
    e.i(Instr::j(top));
    e.place(&done);
    e.i(Instr::jr(Ra));

    e.routine(OBJECT_INIT);
    e.i(Instr::li(A0, 0));
    e.i(Instr::jr(Ra));

    // print(x): None is an error; int, bool and str print their value,
    // anything else prints a placeholder. Always followed by a newline.
    e.routine(PRINT);
    let as_int = e.fresh();
    let as_bool = e.fresh();
    let as_str = e.fresh();
    let newline = e.fresh();
    e.i(Instr::beqz(A0, error_none()));
    e.i(Instr::lw(T0, A0, TYPE_TAG_OFFSET));
    e.i(Instr::li(T1, tag::INT));
    e.i(Instr::beq(T0, T1, as_int.clone()));
    e.i(Instr::li(T1, tag::BOOL));
    e.i(Instr::beq(T0, T1, as_bool.clone()));
    e.i(Instr::li(T1, tag::STR));
    e.i(Instr::beq(T0, T1, as_str.clone()));
    e.i(Instr::la(A0, consts.intern_str("<object>")));
    e.i(Instr::j(as_str.clone()));
    e.place(&as_int);
    e.i(Instr::lw(A0, A0, 0));
    e.ecall(syscall::PRINT_INT);
    e.i(Instr::j(newline.clone()));
    e.place(&as_bool);
    e.i(Instr::lw(T0, A0, 0));
    e.i(Instr::la(A0, consts.intern_str("True")));
    e.i(Instr::bnez(T0, as_str.clone()));
    e.i(Instr::la(A0, consts.intern_str("False")));
    e.place(&as_str);
    e.ecall(syscall::PRINT_STRING);
    e.place(&newline);
    e.i(Instr::li(A0, '\n' as i32));
    e.ecall(syscall::PRINT_CHAR);
    e.i(Instr::li(A0, 0));
    e.i(Instr::jr(Ra));

    e.routine(LEN);
    e.i(Instr::beqz(A0, error_none()));
    e.i(Instr::lw(A0, A0, SIZE_OFFSET));
    e.i(Instr::jr(Ra));

    e.routine(STR_CHAR);
    e.i(Instr::addi(Sp, Sp, -16));
    e.i(Instr::sw(Ra, Sp, 12));
    e.i(Instr::sw(A0, Sp, 8));
    e.i(Instr::la(A0, Label::global(STR_PROTOTYPE)));
    e.i(Instr::li(A1, 1));
    e.i(Instr::li(A2, 1));
    e.i(Instr::jal(Label::global(ALLOC2)));
    e.i(Instr::lw(T0, Sp, 8));
    e.i(Instr::sb(T0, A0, 0));
    e.i(Instr::lw(Ra, Sp, 12));
    e.i(Instr::addi(Sp, Sp, 16));
    e.i(Instr::jr(Ra));

    // strcat(a, b) and listconcat(a, b) share a shape: allocate the sum of
    // both lengths, then copy a then b.
    for (name, prototype, bytes) in [
        (STRCAT, STR_PROTOTYPE, true),
        (LISTCONCAT, LIST_PROTOTYPE, false),
    ] {
        e.routine(name);
        if !bytes {
            e.i(Instr::beqz(A0, error_none()));
            e.i(Instr::beqz(A1, error_none()));
        }
        e.i(Instr::addi(Sp, Sp, -16));
        e.i(Instr::sw(Ra, Sp, 12));
        e.i(Instr::sw(A0, Sp, 8));
        e.i(Instr::sw(A1, Sp, 4));
        e.i(Instr::lw(T0, A0, SIZE_OFFSET));
        e.i(Instr::lw(T1, A1, SIZE_OFFSET));
        e.i(Instr::add(A1, T0, T1).with_comment("combined length"));
        if bytes {
            e.i(Instr::addi(A2, A1, WORD_SIZE));
            e.i(Instr::srai(A2, A2, 2));
        } else {
            e.i(Instr::mv(A2, A1));
        }
        e.i(Instr::la(A0, Label::global(prototype)));
        e.i(Instr::jal(Label::global(ALLOC2)));
        e.i(Instr::mv(T2, A0));
        for slot in [8, 4] {
            e.i(Instr::lw(T0, Sp, slot));
            e.i(Instr::lw(T1, T0, SIZE_OFFSET));
            e.copy_loop(T0, T2, T1, bytes);
        }
        e.i(Instr::lw(Ra, Sp, 12));
        e.i(Instr::addi(Sp, Sp, 16));
        e.i(Instr::jr(Ra));
    }

    // streql(a, b): 1 when both strings hold the same bytes.
    e.routine(STREQL);
    let top = e.fresh();
    let equal = e.fresh();
    let differ = e.fresh();
    e.i(Instr::lw(T0, A0, SIZE_OFFSET));
    e.i(Instr::lw(T1, A1, SIZE_OFFSET));
    e.i(Instr::bne(T0, T1, differ.clone()));
    e.place(&top);
    e.i(Instr::beqz(T0, equal.clone()));
    e.i(Instr::lbu(T2, A0, 0));
    e.i(Instr::lbu(T3, A1, 0));
    e.i(Instr::bne(T2, T3, differ.clone()));
    e.i(Instr::addi(A0, A0, 1));
    e.i(Instr::addi(A1, A1, 1));
    e.i(Instr::addi(T0, T0, -1));
    e.i(Instr::j(top));
    e.place(&equal);
    e.i(Instr::li(A0, 1));
    e.i(Instr::jr(Ra));
    e.place(&differ);
    e.i(Instr::li(A0, 0));
    e.i(Instr::jr(Ra));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::data;
    use chocopy_runtime::Machine;
    use chocopy_syntax::{AsmProgram, Program, Reg};

    /// Runtime plus a `main` that runs `body`.
    fn run(body: Vec<Instr>) -> (chocopy_runtime::Outcome, Machine) {
        let info = analyze(&Program::default()).expect("analyze");
        let mut consts = ConstPool::new();
        let mut text: Vec<AsmItem> = vec![AsmItem::Label(Label::global("main"))];
        text.extend(body.into_iter().map(AsmItem::from));
        text.push(Instr::li(A7, syscall::EXIT).into());
        text.push(Instr::ecall().into());
        emit(&info, &mut consts, &mut text).expect("runtime");
        let program = AsmProgram {
            text,
            data: data::emit(&info, &mut consts),
        };
        let mut m = Machine::new(&program).expect("load");
        let outcome = m.run().expect("run");
        (outcome, m)
    }

    #[test]
    fn trampolines_print_message_and_exit_with_their_code() {
        for (label, code, message) in [
            (ERROR_NONE, 4, "Operation on None\n"),
            (ERROR_DIV, 2, "Division by zero\n"),
            (ERROR_OOB, 3, "Index out of bounds\n"),
        ] {
            let (outcome, _) = run(vec![Instr::j(Label::global(label))]);
            assert_eq!(outcome.exit_code, code);
            assert_eq!(outcome.stdout, message);
        }
    }

    #[test]
    fn strcat_and_streql_work_on_runtime_strings() {
        let (outcome, m) = run(vec![
            Instr::li(A0, 'a' as i32),
            Instr::jal(Label::global(STR_CHAR)),
            Instr::mv(S1, A0),
            Instr::li(A0, 'b' as i32),
            Instr::jal(Label::global(STR_CHAR)),
            Instr::mv(A1, A0),
            Instr::mv(A0, S1),
            Instr::jal(Label::global(STRCAT)),
            Instr::mv(S2, A0),
            Instr::jal(Label::global(PRINT)),
            Instr::mv(A0, S2),
            Instr::mv(A1, S2),
            Instr::jal(Label::global(STREQL)),
            Instr::mv(S3, A0),
            Instr::mv(A0, S2),
            Instr::mv(A1, S1),
            Instr::jal(Label::global(STREQL)),
            Instr::mv(S4, A0),
            Instr::mv(A0, S2),
            Instr::jal(Label::global(LEN)),
        ]);
        assert_eq!(outcome.stdout, "ab\n");
        assert_eq!(m.reg(Reg::Phys(S3)), 1);
        assert_eq!(m.reg(Reg::Phys(S4)), 0);
        assert_eq!(m.reg(Reg::Phys(A0)), 2);
    }

    #[test]
    fn print_handles_bool_and_none() {
        let (outcome, _) = run(vec![
            Instr::la(A0, ConstPool::bool_label(true)),
            Instr::jal(Label::global(PRINT)),
            Instr::li(A0, 0),
            Instr::jal(Label::global(PRINT)),
        ]);
        assert_eq!(outcome.stdout, "True\nOperation on None\n");
        assert_eq!(outcome.exit_code, 4);
    }
}
