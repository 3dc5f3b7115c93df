//! RISC-V assembly text for a finished program (RARS/Venus dialect).

use chocopy_syntax::{AsmItem, AsmProgram, CodegenError, DataItem};
use std::fmt::Write as _;
use std::io::Write;

/// Render `program` as assembly source. Fails if any instruction still
/// names a virtual register.
pub fn render(program: &AsmProgram) -> Result<String, CodegenError> {
    let mut s = String::new();
    s.push_str("  .data\n");
    for item in &program.data {
        match item {
            DataItem::Label(l) => {
                if l.is_global() {
                    let _ = writeln!(s, "  .globl {}", l);
                }
                let _ = writeln!(s, "{}:", l);
            }
            DataItem::Word(w) => {
                let _ = writeln!(s, "  .word {}", w);
            }
            DataItem::Address(l) => {
                let _ = writeln!(s, "  .word {}", l);
            }
            DataItem::Ascii(text) => {
                let _ = writeln!(s, "  .string \"{}\"", escape(text));
            }
            DataItem::Align => s.push_str("  .align 2\n"),
        }
    }

    s.push_str("\n  .text\n");
    for item in &program.text {
        match item {
            AsmItem::Label(l) => {
                if l.is_global() {
                    let _ = writeln!(s, "\n  .globl {}", l);
                }
                let _ = writeln!(s, "{}:", l);
            }
            AsmItem::Instr(i) => {
                if i.has_virtual() {
                    return Err(CodegenError::VirtualRegisterInEmission {
                        instr: i.to_string(),
                    });
                }
                let text = i.to_string();
                match i.comment() {
                    Some(c) => {
                        let _ = writeln!(s, "  {:<32}# {}", text, c);
                    }
                    None => {
                        let _ = writeln!(s, "  {}", text);
                    }
                }
            }
        }
    }
    Ok(s)
}

/// Write the rendered program to `out`.
pub fn emit_asm(program: &AsmProgram, out: &mut impl Write) -> Result<(), String> {
    let text = render(program).map_err(|e| e.to_string())?;
    out.write_all(text.as_bytes()).map_err(|e| e.to_string())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chocopy_syntax::{Instr, Label, PhysReg, Reg, VirtReg};

    #[test]
    fn renders_sections_labels_and_comments() {
        let program = AsmProgram {
            text: vec![
                AsmItem::Label(Label::global("main")),
                Instr::li(PhysReg::A0, 42).with_comment("answer").into(),
                AsmItem::Label(Label::local("main$L0")),
                Instr::sw(PhysReg::S1, PhysReg::Fp, -12).into(),
            ],
            data: vec![
                DataItem::Word(3),
                DataItem::Label(Label::global("const_0")),
                DataItem::Ascii("say \"hi\"\n".to_string()),
                DataItem::Align,
                DataItem::Address(Label::global("$str$dispatchTable")),
            ],
        };
        let text = render(&program).expect("render");
        assert!(text.starts_with("  .data\n"));
        assert!(text.contains("  .globl const_0\nconst_0:\n"));
        assert!(text.contains(".string \"say \\\"hi\\\"\\n\""));
        assert!(text.contains("  .word $str$dispatchTable\n"));
        assert!(text.contains("  .globl main\nmain:\n"));
        assert!(text.contains("# answer"));
        assert!(text.contains("main$L0:\n  sw s1, -12(fp)\n"));
        assert!(!text.contains(".globl main$L0"));
    }

    #[test]
    fn virtual_registers_are_rejected() {
        let program = AsmProgram {
            text: vec![Instr::mv(PhysReg::A0, Reg::Virt(VirtReg(7))).into()],
            data: Vec::new(),
        };
        let err = render(&program).expect_err("virtual register");
        assert!(matches!(err, CodegenError::VirtualRegisterInEmission { .. }));
        let mut out = Vec::new();
        assert!(emit_asm(&program, &mut out).is_err());
        assert!(out.is_empty());
    }
}
