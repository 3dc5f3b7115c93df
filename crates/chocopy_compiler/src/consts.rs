//! Constant pool: interned string literals and boxed int/bool constants.

use chocopy_syntax::layout::{tag, HEADER_WORDS};
use chocopy_syntax::{DataItem, Label, Literal, ValueType};
use std::collections::HashMap;

pub const FALSE_LABEL: &str = "const_false";
pub const TRUE_LABEL: &str = "const_true";

pub const STR_DISPATCH_TABLE: &str = "$str$dispatchTable";
pub const INT_DISPATCH_TABLE: &str = "$int$dispatchTable";
pub const BOOL_DISPATCH_TABLE: &str = "$bool$dispatchTable";

enum Constant {
    Str(String),
    Int(i32),
}

/// Hands out a stable label per distinct constant. Labels are numbered in
/// first-use order, so output depends only on translation order.
#[derive(Default)]
pub struct ConstPool {
    entries: Vec<(Label, Constant)>,
    strings: HashMap<String, Label>,
    ints: HashMap<i32, Label>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_label(&self) -> Label {
        Label::global(format!("const_{}", self.entries.len()))
    }

    /// Label of a `str` object holding `s`; the label marks its payload.
    pub fn intern_str(&mut self, s: &str) -> Label {
        if let Some(l) = self.strings.get(s) {
            return l.clone();
        }
        let l = self.next_label();
        self.strings.insert(s.to_string(), l.clone());
        self.entries.push((l.clone(), Constant::Str(s.to_string())));
        l
    }

    /// Label of a boxed `int` object holding `n`.
    pub fn intern_int(&mut self, n: i32) -> Label {
        if let Some(l) = self.ints.get(&n) {
            return l.clone();
        }
        let l = self.next_label();
        self.ints.insert(n, l.clone());
        self.entries.push((l.clone(), Constant::Int(n)));
        l
    }

    pub fn bool_label(b: bool) -> Label {
        Label::global(if b { TRUE_LABEL } else { FALSE_LABEL })
    }

    /// Data word for a variable or attribute of type `ty` initialized to `lit`.
    pub fn literal_word(&mut self, lit: &Literal, ty: &ValueType) -> DataItem {
        match lit {
            Literal::Int(n) if ty.is_unboxed() => DataItem::Word(*n),
            Literal::Int(n) => DataItem::Address(self.intern_int(*n)),
            Literal::Bool(b) if ty.is_unboxed() => DataItem::Word(i32::from(*b)),
            Literal::Bool(b) => DataItem::Address(Self::bool_label(*b)),
            Literal::Str(s) => DataItem::Address(self.intern_str(s)),
            Literal::None => DataItem::Word(0),
        }
    }

    /// Every constant, headers included. The bool constants always appear.
    pub fn emit(&self, out: &mut Vec<DataItem>) {
        for b in [false, true] {
            header(out, tag::BOOL, BOOL_DISPATCH_TABLE, 1);
            out.push(DataItem::Label(Self::bool_label(b)));
            out.push(DataItem::Word(i32::from(b)));
        }
        for (label, c) in &self.entries {
            match c {
                Constant::Str(s) => {
                    header(out, tag::STR, STR_DISPATCH_TABLE, s.len() as i32);
                    out.push(DataItem::Label(label.clone()));
                    out.push(DataItem::Ascii(s.clone()));
                    out.push(DataItem::Align);
                }
                Constant::Int(n) => {
                    header(out, tag::INT, INT_DISPATCH_TABLE, 1);
                    out.push(DataItem::Label(label.clone()));
                    out.push(DataItem::Word(*n));
                }
            }
        }
    }
}

/// The header words that precede an object's label.
pub fn header(out: &mut Vec<DataItem>, type_tag: i32, dispatch_table: &str, size: i32) {
    let words = [
        DataItem::Word(type_tag),
        DataItem::Address(Label::global(dispatch_table)),
        DataItem::Word(size),
    ];
    debug_assert_eq!(words.len() as i32, HEADER_WORDS);
    out.extend(words);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_interned_once() {
        let mut pool = ConstPool::new();
        let a = pool.intern_str("hello");
        let b = pool.intern_str("world");
        assert_eq!(pool.intern_str("hello"), a);
        assert_ne!(a, b);
        assert_eq!(a.name(), "const_0");
    }

    #[test]
    fn string_constants_carry_length_before_label() {
        let mut pool = ConstPool::new();
        let l = pool.intern_str("abc");
        let mut data = Vec::new();
        pool.emit(&mut data);
        let at = data
            .iter()
            .position(|d| *d == DataItem::Label(l.clone()))
            .expect("label");
        assert_eq!(data[at - 1], DataItem::Word(3));
        assert_eq!(data[at - 3], DataItem::Word(tag::STR));
        assert_eq!(data[at + 1], DataItem::Ascii("abc".to_string()));
    }

    #[test]
    fn literals_box_only_into_object_types() {
        let mut pool = ConstPool::new();
        assert_eq!(pool.literal_word(&Literal::Int(5), &ValueType::int()), DataItem::Word(5));
        assert_eq!(
            pool.literal_word(&Literal::Bool(true), &ValueType::object()),
            DataItem::Address(Label::global(TRUE_LABEL))
        );
        assert!(matches!(
            pool.literal_word(&Literal::Int(5), &ValueType::object()),
            DataItem::Address(_)
        ));
        assert_eq!(pool.literal_word(&Literal::None, &ValueType::object()), DataItem::Word(0));
    }
}
