//! Builds the symbol arena from a validated program: predefined classes and
//! builtins, globals, classes with their layouts and dispatch tables, and
//! every (nested) function with its frame offsets.

use chocopy_syntax::layout::{builtin_attr_name, slot_offset, tag};
use chocopy_syntax::{
    ClassDef, CodegenError, Declaration, FuncDef, Label, Literal, Program, Span, ValueType,
};
use log::debug;

use crate::frame::{local_offset, param_offset};
use crate::symbols::{
    AttrInfo, ClassId, ClassInfo, FuncId, FuncInfo, GlobalVarInfo, LocalInfo, MethodSlot,
    ParamInfo, ProgramInfo, Scope, ScopeId, StackVarInfo, SymbolInfo, VarKind,
};

/// Runtime routine behind `object.__init__`.
pub const OBJECT_INIT: &str = "object.__init__";

pub fn analyze(program: &Program) -> Result<ProgramInfo, CodegenError> {
    let mut b = Builder::default();
    let global = b.new_scope(None);
    b.predefined(global);
    for decl in &program.declarations {
        if let Declaration::VarDef { var, value, .. } = decl {
            let info = GlobalVarInfo {
                name: var.name.clone(),
                ty: var.ty.clone(),
                label: Label::global(format!("${}", var.name)),
                init: value.clone(),
            };
            b.define(global, &var.name, SymbolInfo::GlobalVariable(info.clone()));
            b.globals.push(info);
        }
    }
    for decl in &program.declarations {
        match decl {
            Declaration::VarDef { .. } => {}
            Declaration::FuncDef(f) => {
                let id = b.function(f, None, f.name.clone(), global, global, 0)?;
                b.define(global, &f.name, SymbolInfo::Function(id));
            }
            Declaration::ClassDef(c) => b.class(c, global)?,
            Declaration::GlobalDecl { name, .. } | Declaration::NonLocalDecl { name, .. } => {
                return Err(CodegenError::InvalidProgram {
                    message: format!("'{}' declared global/nonlocal at top level", name),
                })
            }
        }
    }
    debug!(
        "analysis: {} functions, {} classes, {} globals",
        b.funcs.len(),
        b.classes.len(),
        b.globals.len()
    );
    Ok(ProgramInfo {
        funcs: b.funcs,
        classes: b.classes,
        scopes: b.scopes,
        global_scope: global,
        globals: b.globals,
        statements: program.statements.clone(),
    })
}

#[derive(Default)]
struct Builder {
    funcs: Vec<FuncInfo>,
    classes: Vec<ClassInfo>,
    scopes: Vec<Scope>,
    globals: Vec<GlobalVarInfo>,
}

impl Builder {
    fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.scopes.push(Scope {
            parent,
            entries: Default::default(),
        });
        ScopeId(self.scopes.len() - 1)
    }

    fn define(&mut self, scope: ScopeId, name: &str, sym: SymbolInfo) {
        self.scopes[scope.0].entries.insert(name.to_string(), sym);
    }

    fn add_class(
        &mut self,
        global: ScopeId,
        name: &str,
        tag: i32,
        super_class: Option<ClassId>,
    ) -> ClassId {
        let (attrs, methods, parent_scope) = match super_class {
            Some(s) => {
                let sup = &self.classes[s.0];
                (sup.attrs.clone(), sup.methods.clone(), Some(sup.scope))
            }
            None => (Vec::new(), Vec::new(), None),
        };
        let scope = self.new_scope(parent_scope);
        let id = ClassId(self.classes.len());
        self.classes.push(ClassInfo {
            name: name.to_string(),
            tag,
            super_class,
            attrs,
            methods,
            prototype: Label::global(format!("${}$prototype", name)),
            dispatch_table: Label::global(format!("${}$dispatchTable", name)),
            scope,
        });
        self.define(global, name, SymbolInfo::Class(id));
        id
    }

    fn add_attr(&mut self, class: ClassId, name: &str, ty: ValueType, init: Literal) {
        let c = &mut self.classes[class.0];
        let index = c.attrs.len();
        let attr = AttrInfo {
            name: name.to_string(),
            ty,
            index,
            offset: slot_offset(index),
            init,
        };
        c.attrs.push(attr.clone());
        let scope = c.scope;
        self.define(scope, name, SymbolInfo::Attribute(attr));
    }

    fn predefined(&mut self, global: ScopeId) {
        let object = self.add_class(global, "object", tag::OBJECT, None);
        self.classes[object.0].methods.push(MethodSlot {
            name: "__init__".to_string(),
            label: Label::global(OBJECT_INIT),
            func: None,
        });
        for (name, tag, init) in [
            ("int", tag::INT, Literal::Int(0)),
            ("bool", tag::BOOL, Literal::Bool(false)),
            ("str", tag::STR, Literal::Str(String::new())),
        ] {
            let id = self.add_class(global, name, tag, Some(object));
            if let Some(attr) = builtin_attr_name(name) {
                self.add_attr(id, attr, ValueType::class(name), init);
            }
        }

        for (name, ret) in [("print", ValueType::none()), ("len", ValueType::int())] {
            let scope = self.new_scope(Some(global));
            let id = FuncId(self.funcs.len());
            self.funcs.push(FuncInfo {
                name: name.to_string(),
                label: Label::global(name),
                depth: 0,
                parent: None,
                params: vec![ParamInfo {
                    name: "arg".to_string(),
                    ty: ValueType::object(),
                }],
                locals: Vec::new(),
                return_type: ret,
                statements: Vec::new(),
                scope,
                span: Span::default(),
                builtin: true,
            });
            self.define(global, name, SymbolInfo::Function(id));
        }
    }

    fn class(&mut self, def: &ClassDef, global: ScopeId) -> Result<(), CodegenError> {
        let super_class = match self.scopes[global.0].entries.get(&def.super_class) {
            Some(SymbolInfo::Class(id)) => *id,
            _ => {
                return Err(CodegenError::InvalidProgram {
                    message: format!(
                        "class '{}' extends unknown class '{}'",
                        def.name, def.super_class
                    ),
                })
            }
        };
        let tag = tag::FIRST_USER_TAG
            + self
                .classes
                .iter()
                .filter(|c| c.tag >= tag::FIRST_USER_TAG)
                .count() as i32;
        let id = self.add_class(global, &def.name, tag, Some(super_class));
        for decl in &def.declarations {
            if let Declaration::VarDef { var, value, .. } = decl {
                self.add_attr(id, &var.name, var.ty.clone(), value.clone());
            }
        }
        for decl in &def.declarations {
            match decl {
                Declaration::VarDef { .. } => {}
                Declaration::FuncDef(f) => {
                    let qualified = format!("{}.{}", def.name, f.name);
                    let fid = self.function(f, None, qualified, global, global, 0)?;
                    let class_scope = self.classes[id.0].scope;
                    self.define(class_scope, &f.name, SymbolInfo::Function(fid));
                    let slot = MethodSlot {
                        name: f.name.clone(),
                        label: self.funcs[fid.0].label.clone(),
                        func: Some(fid),
                    };
                    let methods = &mut self.classes[id.0].methods;
                    match methods.iter_mut().find(|m| m.name == f.name) {
                        Some(existing) => *existing = slot,
                        None => methods.push(slot),
                    }
                }
                other => {
                    return Err(CodegenError::InvalidProgram {
                        message: format!(
                            "unexpected {} in class '{}'",
                            declaration_kind(other),
                            def.name
                        ),
                    })
                }
            }
        }
        Ok(())
    }

    /// Register `def` and everything nested in it. `outer` is the scope the
    /// function's own scope hangs off.
    fn function(
        &mut self,
        def: &FuncDef,
        parent: Option<FuncId>,
        name: String,
        outer: ScopeId,
        global: ScopeId,
        depth: usize,
    ) -> Result<FuncId, CodegenError> {
        let scope = self.new_scope(Some(outer));
        let id = FuncId(self.funcs.len());
        self.funcs.push(FuncInfo {
            name: name.clone(),
            label: user_label(&name),
            depth,
            parent,
            params: Vec::new(),
            locals: Vec::new(),
            return_type: def.return_type.clone(),
            statements: def.statements.clone(),
            scope,
            span: def.span,
            builtin: false,
        });

        let first_param = usize::from(depth > 0);
        let mut params = Vec::new();
        for (i, p) in def.params.iter().enumerate() {
            self.define(
                scope,
                &p.name,
                SymbolInfo::StackVariable(StackVarInfo {
                    name: p.name.clone(),
                    ty: p.ty.clone(),
                    func: id,
                    kind: VarKind::Param,
                    offset: param_offset(first_param + i),
                }),
            );
            params.push(ParamInfo {
                name: p.name.clone(),
                ty: p.ty.clone(),
            });
        }

        let mut locals = Vec::new();
        for decl in &def.declarations {
            match decl {
                Declaration::VarDef { var, value, .. } => {
                    self.define(
                        scope,
                        &var.name,
                        SymbolInfo::StackVariable(StackVarInfo {
                            name: var.name.clone(),
                            ty: var.ty.clone(),
                            func: id,
                            kind: VarKind::Local,
                            offset: local_offset(locals.len()),
                        }),
                    );
                    locals.push(LocalInfo {
                        name: var.name.clone(),
                        ty: var.ty.clone(),
                        init: value.clone(),
                    });
                }
                Declaration::GlobalDecl { name: g, span } => {
                    let sym = match self.scopes[global.0].entries.get(g) {
                        Some(sym @ SymbolInfo::GlobalVariable(_)) => sym.clone(),
                        _ => {
                            return Err(CodegenError::UnresolvedSymbol {
                                name: g.clone(),
                                span: *span,
                            })
                        }
                    };
                    self.define(scope, g, sym);
                }
                // Resolved through the enclosing scopes.
                Declaration::NonLocalDecl { .. } => {}
                Declaration::FuncDef(_) => {}
                Declaration::ClassDef(c) => {
                    return Err(CodegenError::InvalidProgram {
                        message: format!("class '{}' nested in function '{}'", c.name, name),
                    })
                }
            }
        }

        {
            let f = &mut self.funcs[id.0];
            f.params = params;
            f.locals = locals;
        }

        for decl in &def.declarations {
            if let Declaration::FuncDef(nested) = decl {
                let qualified = format!("{}.{}", name, nested.name);
                let nid = self.function(nested, Some(id), qualified, scope, global, depth + 1)?;
                self.define(scope, &nested.name, SymbolInfo::Function(nid));
            }
        }
        Ok(id)
    }
}

/// User functions and methods live under `$`, apart from `main`, the
/// runtime routines and the constant pool.
fn user_label(qualified: &str) -> Label {
    Label::global(format!("${}", qualified))
}

fn declaration_kind(d: &Declaration) -> &'static str {
    match d {
        Declaration::VarDef { .. } => "variable definition",
        Declaration::FuncDef(_) => "function definition",
        Declaration::ClassDef(_) => "class definition",
        Declaration::GlobalDecl { .. } => "global declaration",
        Declaration::NonLocalDecl { .. } => "nonlocal declaration",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chocopy_syntax::{TypedVar, WORD_SIZE};

    fn var(name: &str, ty: ValueType, value: Literal) -> Declaration {
        Declaration::VarDef {
            span: Span::default(),
            var: TypedVar {
                name: name.to_string(),
                ty,
            },
            value,
        }
    }

    fn func(name: &str, params: Vec<TypedVar>, declarations: Vec<Declaration>) -> FuncDef {
        FuncDef {
            span: Span::default(),
            name: name.to_string(),
            params,
            return_type: ValueType::int(),
            declarations,
            statements: Vec::new(),
        }
    }

    fn param(name: &str, ty: ValueType) -> TypedVar {
        TypedVar {
            name: name.to_string(),
            ty,
        }
    }

    #[test]
    fn two_int_attributes_sit_one_word_apart() {
        let program = Program {
            declarations: vec![Declaration::ClassDef(ClassDef {
                span: Span::default(),
                name: "Point".to_string(),
                super_class: "object".to_string(),
                declarations: vec![
                    var("x", ValueType::int(), Literal::Int(0)),
                    var("y", ValueType::int(), Literal::Int(0)),
                ],
            })],
            statements: Vec::new(),
        };
        let info = analyze(&program).expect("analyze");
        let point = info.class_named("Point").expect("class");
        assert_eq!(point.tag, tag::FIRST_USER_TAG);
        assert_eq!(info.attribute(point, "x").expect("x").offset, 0);
        assert_eq!(info.attribute(point, "y").expect("y").offset, WORD_SIZE);
        assert_eq!(
            point.method("__init__").map(|(i, m)| (i, m.label.name())),
            Some((0, OBJECT_INIT))
        );
    }

    #[test]
    fn overrides_keep_the_inherited_slot() {
        let method = |name: &str| {
            Declaration::FuncDef(func(name, vec![param("self", ValueType::object())], Vec::new()))
        };
        let program = Program {
            declarations: vec![
                Declaration::ClassDef(ClassDef {
                    span: Span::default(),
                    name: "A".to_string(),
                    super_class: "object".to_string(),
                    declarations: vec![method("f"), method("g")],
                }),
                Declaration::ClassDef(ClassDef {
                    span: Span::default(),
                    name: "B".to_string(),
                    super_class: "A".to_string(),
                    declarations: vec![method("g"), method("h")],
                }),
            ],
            statements: Vec::new(),
        };
        let info = analyze(&program).expect("analyze");
        let b = info.class_named("B").expect("B");
        let labels: Vec<&str> = b.methods.iter().map(|m| m.label.name()).collect();
        assert_eq!(labels, vec![OBJECT_INIT, "$A.f", "$B.g", "$B.h"]);
        assert_eq!(b.tag, tag::FIRST_USER_TAG + 1);
    }

    #[test]
    fn nested_functions_get_static_links_and_offsets() {
        let inner = func(
            "g",
            vec![param("y", ValueType::int())],
            vec![Declaration::NonLocalDecl {
                span: Span::default(),
                name: "a".to_string(),
            }],
        );
        let outer = func(
            "f",
            vec![param("x", ValueType::int())],
            vec![
                var("a", ValueType::int(), Literal::Int(1)),
                var("b", ValueType::bool(), Literal::Bool(true)),
                Declaration::FuncDef(inner),
            ],
        );
        let program = Program {
            declarations: vec![
                var("z", ValueType::int(), Literal::Int(0)),
                Declaration::FuncDef(outer),
            ],
            statements: Vec::new(),
        };
        let info = analyze(&program).expect("analyze");
        let g = info
            .funcs
            .iter()
            .find(|f| f.name == "f.g")
            .expect("nested function");
        assert_eq!(g.depth, 1);
        assert_eq!(g.arg_count(), 2);
        assert_eq!(g.label.name(), "$f.g");
        match info.lookup("y", g.scope).expect("y") {
            SymbolInfo::StackVariable(v) => assert_eq!(v.offset, param_offset(1)),
            other => panic!("unexpected {:?}", other),
        }
        match info.lookup("a", g.scope).expect("a") {
            SymbolInfo::StackVariable(v) => {
                assert_eq!(info.func(v.func).name, "f");
                assert_eq!(v.offset, local_offset(0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            info.lookup("z", g.scope),
            Ok(SymbolInfo::GlobalVariable(_))
        ));
        assert!(matches!(
            info.lookup("missing", g.scope),
            Err(CodegenError::UnresolvedSymbol { .. })
        ));
    }

    #[test]
    fn unknown_super_class_is_rejected() {
        let program = Program {
            declarations: vec![Declaration::ClassDef(ClassDef {
                span: Span::default(),
                name: "A".to_string(),
                super_class: "Nope".to_string(),
                declarations: Vec::new(),
            })],
            statements: Vec::new(),
        };
        assert!(matches!(
            analyze(&program),
            Err(CodegenError::InvalidProgram { .. })
        ));
    }
}
