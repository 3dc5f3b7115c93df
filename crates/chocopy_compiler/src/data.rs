//! Data segment: globals, class prototypes, dispatch tables, constants.
//!
//! Object labels mark the payload; header words come right before them.

use chocopy_syntax::layout::tag;
use chocopy_syntax::{DataItem, Label};

use crate::consts::{header, ConstPool};
use crate::runtime::LIST_PROTOTYPE;
use crate::symbols::ProgramInfo;

/// Build the whole data segment. Call after all code is translated: the
/// constant pool is emitted last.
pub fn emit(info: &ProgramInfo, consts: &mut ConstPool) -> Vec<DataItem> {
    let mut out = Vec::new();

    for g in &info.globals {
        out.push(DataItem::Label(g.label.clone()));
        out.push(consts.literal_word(&g.init, &g.ty));
    }

    for class in &info.classes {
        if class.tag == tag::STR {
            // Empty string: length 0, payload is just the terminator word.
            header(&mut out, class.tag, class.dispatch_table.name(), 0);
            out.push(DataItem::Label(class.prototype.clone()));
            out.push(DataItem::Word(0));
        } else {
            header(
                &mut out,
                class.tag,
                class.dispatch_table.name(),
                class.attrs.len() as i32,
            );
            out.push(DataItem::Label(class.prototype.clone()));
            for attr in &class.attrs {
                out.push(consts.literal_word(&attr.init, &attr.ty));
            }
        }
        out.push(DataItem::Label(class.dispatch_table.clone()));
        for m in &class.methods {
            out.push(DataItem::Address(m.label.clone()));
        }
    }

    let object_table = info
        .classes
        .iter()
        .find(|c| c.tag == tag::OBJECT)
        .map(|c| c.dispatch_table.name().to_string())
        .unwrap_or_default();
    header(&mut out, tag::LIST, &object_table, 0);
    out.push(DataItem::Label(Label::global(LIST_PROTOTYPE)));

    consts.emit(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use chocopy_syntax::{ClassDef, Declaration, Literal, Program, Span, TypedVar, ValueType};

    #[test]
    fn prototypes_hold_initial_attribute_values() {
        let program = Program {
            declarations: vec![
                Declaration::ClassDef(ClassDef {
                    span: Span::default(),
                    name: "P".to_string(),
                    super_class: "object".to_string(),
                    declarations: vec![
                        Declaration::VarDef {
                            span: Span::default(),
                            var: TypedVar {
                                name: "x".to_string(),
                                ty: ValueType::int(),
                            },
                            value: Literal::Int(7),
                        },
                        Declaration::VarDef {
                            span: Span::default(),
                            var: TypedVar {
                                name: "name".to_string(),
                                ty: ValueType::str(),
                            },
                            value: Literal::Str("p".to_string()),
                        },
                    ],
                }),
                Declaration::VarDef {
                    span: Span::default(),
                    var: TypedVar {
                        name: "g".to_string(),
                        ty: ValueType::bool(),
                    },
                    value: Literal::Bool(true),
                },
            ],
            statements: Vec::new(),
        };
        let info = analyze(&program).expect("analyze");
        let mut consts = ConstPool::new();
        let data = emit(&info, &mut consts);

        let at = |name: &str| {
            data.iter()
                .position(|d| *d == DataItem::Label(Label::global(name)))
                .expect(name)
        };
        let p = at("$P$prototype");
        assert_eq!(data[p - 3], DataItem::Word(tag::FIRST_USER_TAG));
        assert_eq!(data[p - 1], DataItem::Word(2));
        assert_eq!(data[p + 1], DataItem::Word(7));
        assert!(matches!(data[p + 2], DataItem::Address(_)));
        assert_eq!(data[at("$g") + 1], DataItem::Word(1));
        assert_eq!(
            data[at("$P$dispatchTable") + 1],
            DataItem::Address(Label::global("object.__init__"))
        );
        assert_eq!(data[at(LIST_PROTOTYPE) - 3], DataItem::Word(tag::LIST));
    }
}
