//! Symbol descriptors and scoped lookup.
//!
//! Everything lives in one arena (`ProgramInfo`) addressed by ids, so nested
//! functions can point at their parents and classes at their super classes
//! without shared ownership. The arena is built once by `analysis` and only
//! read during translation.

use chocopy_syntax::{CodegenError, Label, Literal, Span, Stmt, ValueType};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

#[derive(Clone, Debug)]
pub enum SymbolInfo {
    Class(ClassId),
    Function(FuncId),
    Attribute(AttrInfo),
    GlobalVariable(GlobalVarInfo),
    StackVariable(StackVarInfo),
}

#[derive(Clone, Debug)]
pub struct AttrInfo {
    pub name: String,
    pub ty: ValueType,
    pub index: usize,
    /// Byte offset from the object reference.
    pub offset: i32,
    pub init: Literal,
}

#[derive(Clone, Debug)]
pub struct GlobalVarInfo {
    pub name: String,
    pub ty: ValueType,
    pub label: Label,
    pub init: Literal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Param,
    Local,
}

#[derive(Clone, Debug)]
pub struct StackVarInfo {
    pub name: String,
    pub ty: ValueType,
    /// Function whose frame holds the variable.
    pub func: FuncId,
    pub kind: VarKind,
    /// Offset from that frame's `fp`.
    pub offset: i32,
}

/// One dispatch-table entry.
#[derive(Clone, Debug)]
pub struct MethodSlot {
    pub name: String,
    pub label: Label,
    /// `None` for methods implemented by the runtime (`object.__init__`).
    pub func: Option<FuncId>,
}

#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: String,
    pub tag: i32,
    pub super_class: Option<ClassId>,
    /// Inherited attributes first.
    pub attrs: Vec<AttrInfo>,
    /// Inherited methods first; an override keeps the inherited slot.
    pub methods: Vec<MethodSlot>,
    pub prototype: Label,
    pub dispatch_table: Label,
    /// Members by name: attributes and the methods this class defines.
    pub scope: ScopeId,
}

impl ClassInfo {
    pub fn method(&self, name: &str) -> Option<(usize, &MethodSlot)> {
        self.methods.iter().enumerate().find(|(_, m)| m.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct ParamInfo {
    pub name: String,
    pub ty: ValueType,
}

#[derive(Clone, Debug)]
pub struct LocalInfo {
    pub name: String,
    pub ty: ValueType,
    pub init: Literal,
}

#[derive(Clone, Debug)]
pub struct FuncInfo {
    /// Dotted name: `f`, `f.g`, `C.m`.
    pub name: String,
    pub label: Label,
    /// 0 for global functions and methods.
    pub depth: usize,
    pub parent: Option<FuncId>,
    /// Declared parameters, `self` included for methods. The static link of
    /// a nested function is not listed here.
    pub params: Vec<ParamInfo>,
    pub locals: Vec<LocalInfo>,
    pub return_type: ValueType,
    pub statements: Vec<Stmt>,
    pub scope: ScopeId,
    pub span: Span,
    /// Implemented by the runtime, not translated (`print`, `len`).
    pub builtin: bool,
}

impl FuncInfo {
    /// Nested functions receive their parent's frame pointer as argument 0.
    pub fn has_static_link(&self) -> bool {
        self.depth > 0
    }

    /// Words passed by the caller, static link included.
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_static_link())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub entries: HashMap<String, SymbolInfo>,
}

#[derive(Clone, Debug)]
pub struct ProgramInfo {
    pub funcs: Vec<FuncInfo>,
    pub classes: Vec<ClassInfo>,
    pub scopes: Vec<Scope>,
    pub global_scope: ScopeId,
    /// Declaration order, which is also data-segment order.
    pub globals: Vec<GlobalVarInfo>,
    pub statements: Vec<Stmt>,
}

impl ProgramInfo {
    pub fn func(&self, id: FuncId) -> &FuncInfo {
        &self.funcs[id.0]
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    /// Resolve `name` from `scope` outward.
    pub fn lookup(&self, name: &str, scope: ScopeId) -> Result<&SymbolInfo, CodegenError> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = self.scope(id);
            if let Some(sym) = s.entries.get(name) {
                return Ok(sym);
            }
            cur = s.parent;
        }
        Err(CodegenError::UnresolvedSymbol {
            name: name.to_string(),
            span: Span::default(),
        })
    }

    pub fn class_named(&self, name: &str) -> Result<&ClassInfo, CodegenError> {
        match self.lookup(name, self.global_scope)? {
            SymbolInfo::Class(id) => Ok(self.class(*id)),
            _ => Err(CodegenError::InvalidProgram {
                message: format!("'{}' is not a class", name),
            }),
        }
    }

    /// Attribute `name` of instances of `class`.
    pub fn attribute(&self, class: &ClassInfo, name: &str) -> Result<&AttrInfo, CodegenError> {
        match self.lookup(name, class.scope)? {
            SymbolInfo::Attribute(a) => Ok(a),
            _ => Err(CodegenError::InvalidProgram {
                message: format!("'{}.{}' is not an attribute", class.name, name),
            }),
        }
    }

    /// Class describing values of static type `ty`.
    pub fn class_of(&self, ty: &ValueType) -> Result<&ClassInfo, CodegenError> {
        match ty.class_name() {
            Some(name) => self.class_named(name),
            None => Err(CodegenError::InvalidProgram {
                message: "lists have no class descriptor".to_string(),
            }),
        }
    }

    /// Functions whose bodies get translated, in declaration order.
    pub fn translated_funcs(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.funcs
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.builtin)
            .map(|(i, _)| FuncId(i))
    }
}
