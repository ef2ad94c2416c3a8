use super::*;
use crate::ast::build::*;
use crate::types::PrimKind;
use num_bigint::BigInt;

const PKG: &str = "gno.land/p/demo/resolve";
const LIB: &str = "gno.land/p/demo/lib";

fn resolve_in(reg: &mut Registry, path: &str, decls: Vec<Decl>) -> std::result::Result<PackageNode, ResolveError> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let mut pkg = package(name, path, vec![file("main.gno", decls)]);
    preprocess_package(reg, &mut pkg)?;
    Ok(pkg)
}

fn resolve(decls: Vec<Decl>) -> (Registry, PackageNode) {
    let mut reg = Registry::new();
    let pkg = resolve_in(&mut reg, PKG, decls).unwrap();
    (reg, pkg)
}

fn body<'p>(pkg: &'p PackageNode, name: &str) -> &'p [Stmt] {
    pkg.files
        .iter()
        .flat_map(|f| &f.decls)
        .find_map(|d| match d {
            Decl::Func(fd) if fd.name == name => Some(fd.body.as_slice()),
            _ => None,
        })
        .unwrap()
}

fn value_decl<'p>(pkg: &'p PackageNode, name: &str) -> &'p ValueDecl {
    pkg.files
        .iter()
        .flat_map(|f| &f.decls)
        .find_map(|d| match d {
            Decl::Value(vd) if vd.names.iter().any(|n| n.name == name) => Some(vd),
            _ => None,
        })
        .unwrap()
}

/// First right-hand side of an assignment, or the expression of an
/// expression statement.
fn rhs(s: &Stmt) -> &Expr {
    match s {
        Stmt::Assign(a) => &a.rhs[0],
        Stmt::Expr(es) => &es.x,
        other => panic!("unexpected statement {}", other),
    }
}

fn pkg_value(reg: &Registry, path: &str, name: &str) -> TypedValue {
    let info = reg.package(path).unwrap();
    let sb = reg.scope(info.scope).unwrap();
    sb.value_at(sb.index_of(name).unwrap()).cloned().unwrap()
}

fn const_value(e: &Expr) -> &TypedValue {
    match e {
        Expr::Const(cx) => &cx.value,
        other => panic!("expected a constant, got {}", other),
    }
}

fn name_path(e: &Expr) -> &ValuePath {
    match e {
        Expr::Name(nx) => &nx.path,
        other => panic!("expected a name, got {}", other),
    }
}

fn int_result() -> Vec<FieldTypeExpr> {
    vec![field("", tname("int"))]
}

#[test]
fn test_name_path_counts_block_hops() {
    let f = func_decl(
        "f",
        func_type(vec![], vec![]),
        vec![
            define(&["x"], vec![int(1)]),
            block(vec![
                define(&["y"], vec![name("x")]),
                block(vec![define(&["z"], vec![name("x")])]),
            ]),
        ],
    );
    let (reg, pkg) = resolve(vec![f]);
    let stmts = body(&pkg, "f");
    let Stmt::Block(outer) = &stmts[1] else {
        panic!("expected a block");
    };
    assert_eq!(name_path(rhs(&outer.body[0])), &ValuePath::block(2, 0, "x"));
    let Stmt::Block(inner) = &outer.body[1] else {
        panic!("expected a block");
    };
    assert_eq!(name_path(rhs(&inner.body[0])), &ValuePath::block(3, 0, "x"));

    // Both nested blocks record x as a free name.
    for scope in [outer.scope.unwrap(), inner.scope.unwrap()] {
        assert!(reg.scope(scope).unwrap().externs().contains(&"x".to_string()));
    }
}

#[test]
fn test_constants_fold() {
    let (reg, pkg) = resolve(vec![
        const_("a", None, binary(BinaryOp::Add, int(2), binary(BinaryOp::Mul, int(3), int(4)))),
        const_("b", Some(tname("int8")), binary(BinaryOp::Add, int(100), int(27))),
        const_("big", None, binary(BinaryOp::Shl, int(1), int(70))),
        const_("yes", None, binary(BinaryOp::Lss, name("a"), int(20))),
        var(&["h"], None, vec![binary(BinaryOp::Quo, float(1.0), int(2))]),
    ]);
    assert_eq!(
        pkg_value(&reg, PKG, "a"),
        TypedValue::new(Type::Prim(PrimKind::UntypedInt), Value::Bigint(BigInt::from(14)))
    );
    assert_eq!(
        pkg_value(&reg, PKG, "b"),
        TypedValue::new(Type::Prim(PrimKind::Int8), Value::Int(127))
    );
    assert_eq!(pkg_value(&reg, PKG, "big").v, Value::Bigint(BigInt::from(1) << 70));
    assert_eq!(pkg_value(&reg, PKG, "yes").v, Value::Bool(true));

    let h = value_decl(&pkg, "h");
    assert_eq!(h.resolved, vec![Type::FLOAT64]);
    assert_eq!(const_value(&h.values[0]), &TypedValue::new(Type::FLOAT64, Value::Float(0.5)));
}

#[test]
fn test_invalid_constants_are_rejected() {
    let mut reg = Registry::new();
    let err = resolve_in(&mut reg, PKG, vec![const_("c", Some(tname("uint8")), int(256))]).unwrap_err();
    assert!(matches!(err, ResolveError::InvalidConstant { .. }));

    let mut reg = Registry::new();
    let err = resolve_in(&mut reg, PKG, vec![const_("d", None, binary(BinaryOp::Quo, int(1), int(0)))]).unwrap_err();
    match err {
        ResolveError::InvalidConstant { reason, .. } => assert!(reason.contains("divide by zero")),
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_untyped_constants_take_context_type() {
    let (_, pkg) = resolve(vec![
        var(&["f"], Some(tname("float64")), vec![int(1)]),
        var(&["r"], None, vec![char_lit('a')]),
        var(&["s"], None, vec![call(name("string"), vec![int(65)])]),
        var(&["u"], None, vec![call(name("uint8"), vec![int(7)])]),
        var(&["p"], Some(tptr(tname("int"))), vec![name("nil")]),
    ]);
    assert_eq!(const_value(&value_decl(&pkg, "f").values[0]), &TypedValue::new(Type::FLOAT64, Value::Float(1.0)));
    assert_eq!(const_value(&value_decl(&pkg, "r").values[0]), &TypedValue::new(Type::INT32, Value::Int(97)));
    assert_eq!(const_value(&value_decl(&pkg, "s").values[0]), &TypedValue::string("A"));
    assert_eq!(const_value(&value_decl(&pkg, "u").values[0]), &TypedValue::new(Type::UINT8, Value::Uint(7)));

    let p = value_decl(&pkg, "p");
    let nil = const_value(&p.values[0]);
    assert_eq!(nil.t, Some(Type::pointer_to(Type::INT)));
    assert_eq!(nil.v, Value::None);
}

#[test]
fn test_selector_path_kinds() {
    let decls = vec![
        type_decl("T", tstruct(vec![field("n", tname("int"))])),
        method_decl(
            field("t", tname("T")),
            "Get",
            func_type(vec![], int_result()),
            vec![ret(vec![sel(name("t"), "n")])],
        ),
        method_decl(
            field("t", tptr(tname("T"))),
            "Set",
            func_type(vec![field("v", tname("int"))], vec![]),
            vec![assign(vec![sel(name("t"), "n")], vec![name("v")])],
        ),
        func_decl(
            "main",
            func_type(vec![], vec![]),
            vec![
                decl_stmt(var(&["t"], Some(tname("T")), vec![])),
                expr_stmt(call(sel(name("t"), "Set"), vec![int(1)])),
                define(&["p"], vec![addr(name("t"))]),
                expr_stmt(call(sel(name("p"), "Get"), vec![])),
                assign(vec![name("_")], vec![sel(name("t"), "n")]),
                assign(vec![name("_")], vec![sel(name("p"), "n")]),
            ],
        ),
    ];
    let (_, pkg) = resolve(decls);
    let stmts = body(&pkg, "main");

    let callee = |s: &Stmt| -> SelectorExpr {
        match rhs(s) {
            Expr::Call(cx) => match &*cx.func {
                Expr::Selector(sx) => sx.clone(),
                other => panic!("expected a selector, got {}", other),
            },
            other => panic!("expected a call, got {}", other),
        }
    };
    let selector = |s: &Stmt| -> SelectorExpr {
        match rhs(s) {
            Expr::Selector(sx) => sx.clone(),
            other => panic!("expected a selector, got {}", other),
        }
    };

    let set = callee(&stmts[1]);
    assert_eq!(set.path.kind, PathKind::PtrMethod);
    assert_eq!(set.path.index, 1);
    // The addressable receiver is taken by reference.
    assert!(matches!(&*set.x, Expr::Ref(_)));

    let get = callee(&stmts[3]);
    assert_eq!(get.path.kind, PathKind::DerefValMethod);
    assert_eq!(get.path.index, 0);

    assert_eq!(selector(&stmts[4]).path, ValuePath::field(0, "n"));
    assert_eq!(selector(&stmts[5]).path.kind, PathKind::DerefField);
}

#[test]
fn test_unknown_field_is_an_error() {
    let mut reg = Registry::new();
    let err = resolve_in(
        &mut reg,
        PKG,
        vec![
            type_decl("T", tstruct(vec![field("n", tname("int"))])),
            var(&["t"], Some(tname("T")), vec![]),
            func_decl("f", func_type(vec![], vec![]), vec![assign(vec![name("_")], vec![sel(name("t"), "m")])]),
        ],
    )
    .unwrap_err();
    assert_eq!(
        err,
        ResolveError::UnknownSelector {
            name: "m".to_string(),
            on: "T".to_string(),
        }
    );
}

#[test]
fn test_implicit_return_is_appended() {
    let (_, pkg) = resolve(vec![
        func_decl("f", func_type(vec![], vec![]), vec![define(&["x"], vec![int(1)])]),
        func_decl("g", func_type(vec![], int_result()), vec![ret(vec![int(1)])]),
    ]);
    let f = body(&pkg, "f");
    assert_eq!(f.len(), 2);
    assert!(matches!(&f[1], Stmt::Return(r) if r.results.is_empty()));

    let g = body(&pkg, "g");
    assert_eq!(g.len(), 1);
    let Stmt::Return(r) = &g[0] else {
        panic!("expected a return");
    };
    assert_eq!(const_value(&r.results[0]), &TypedValue::int(1));
}

#[test]
fn test_builtin_calls_are_typed() {
    let (_, pkg) = resolve(vec![func_decl(
        "f",
        func_type(vec![], vec![]),
        vec![
            define(&["s"], vec![call(name("make"), vec![type_value(tslice(tname("int"))), int(0)])]),
            assign(vec![name("s")], vec![call(name("append"), vec![name("s"), int(1), int(2)])]),
            define(&["n"], vec![call(name("len"), vec![name("s")])]),
            expr_stmt(call(name("println"), vec![name("n"), string("items")])),
        ],
    )]);
    let stmts = body(&pkg, "f");

    let Expr::Call(append) = rhs(&stmts[1]) else {
        panic!("expected a call");
    };
    assert_eq!(append.num_args, 3);
    assert_eq!(name_path(&append.func).kind, PathKind::Uverse);
    assert_eq!(const_value(&append.args[1]), &TypedValue::int(1));

    let Expr::Call(println) = rhs(&stmts[3]) else {
        panic!("expected a call");
    };
    assert_eq!(println.num_args, 2);
    assert_eq!(const_value(&println.args[1]), &TypedValue::string("items"));
}

#[test]
fn test_array_literal_length_from_keys() {
    let (_, pkg) = resolve(vec![var(
        &["a"],
        None,
        vec![keyed(tarray(None, tname("int")), vec![(Some(int(2)), int(5)), (None, int(7))])],
    )]);
    let a = value_decl(&pkg, "a");
    let Expr::CompositeLit(cl) = &a.values[0] else {
        panic!("expected a composite literal");
    };
    let slots: Vec<_> = cl.elts.iter().map(|kv| kv.slot).collect();
    assert_eq!(slots, vec![Some(2), Some(3)]);
    assert_eq!(
        a.resolved,
        vec![Type::Array(Arc::new(crate::types::ArrayType { len: 4, elem: Type::INT }))]
    );
}

#[test]
fn test_imported_package_members() {
    let mut reg = Registry::new();
    resolve_in(
        &mut reg,
        LIB,
        vec![
            const_("Max", None, int(10)),
            type_decl("Pair", tstruct(vec![field("a", tname("int")), field("b", tname("int"))])),
            func_decl(
                "Add",
                func_type(vec![field("a", tname("int")), field("b", tname("int"))], int_result()),
                vec![ret(vec![binary(BinaryOp::Add, name("a"), name("b"))])],
            ),
        ],
    )
    .unwrap();

    let pkg = resolve_in(
        &mut reg,
        PKG,
        vec![
            import(LIB),
            var(&["m"], None, vec![sel(name("lib"), "Max")]),
            var(&["p"], Some(tqualified("lib", "Pair")), vec![]),
            var(&["sum"], None, vec![call(sel(name("lib"), "Add"), vec![int(1), int(2)])]),
        ],
    )
    .unwrap();

    assert_eq!(const_value(&value_decl(&pkg, "m").values[0]), &TypedValue::int(10));
    assert_eq!(
        value_decl(&pkg, "p").resolved,
        vec![Type::Declared(crate::types::DeclaredRef {
            pkg_path: LIB.to_string(),
            name: "Pair".to_string(),
        })]
    );

    let sum = value_decl(&pkg, "sum");
    assert_eq!(sum.resolved, vec![Type::INT]);
    let Expr::Call(cx) = &sum.values[0] else {
        panic!("expected a call");
    };
    let Expr::Selector(sx) = &*cx.func else {
        panic!("expected a selector");
    };
    let lib_scope = reg.scope(reg.package(LIB).unwrap().scope).unwrap();
    assert_eq!(sx.path, ValuePath::block(1, lib_scope.index_of("Add").unwrap(), "Add"));
}

#[test]
fn test_missing_import() {
    let mut reg = Registry::new();
    let err = resolve_in(&mut reg, PKG, vec![import(LIB)]).unwrap_err();
    assert_eq!(err, ResolveError::PackageNotFound { path: LIB.to_string() });
}

#[test]
fn test_failure_drops_package_scopes() {
    let mut reg = Registry::new();
    let bad = vec![func_decl(
        "f",
        func_type(vec![], vec![]),
        vec![define(&["x"], vec![name("y")])],
    )];
    let err = resolve_in(&mut reg, PKG, bad).unwrap_err();
    assert_eq!(err, ResolveError::NameNotDeclared { name: "y".to_string() });
    assert!(!reg.has_package(PKG));

    // The corrected package can be added afterwards.
    let good = vec![
        var(&["y"], None, vec![int(3)]),
        func_decl("f", func_type(vec![], vec![]), vec![define(&["x"], vec![name("y")])]),
    ];
    let pkg = resolve_in(&mut reg, PKG, good).unwrap();
    assert!(reg.has_package(PKG));
    assert_eq!(name_path(rhs(&body(&pkg, "f")[0])), &ValuePath::block(3, 0, "y"));
}

#[test]
fn test_goto_is_unsupported() {
    let mut reg = Registry::new();
    let goto = Stmt::Branch(BranchStmt {
        attrs: Attributes::default(),
        op: BranchOp::Goto,
        target: Some("L".to_string()),
    });
    let err = resolve_in(&mut reg, PKG, vec![func_decl("f", func_type(vec![], vec![]), vec![goto])]).unwrap_err();
    assert!(matches!(err, ResolveError::Unsupported(_)));
}
