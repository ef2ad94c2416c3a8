//! Value semantics of composites, pointers, methods and big numbers

use num_bigint::BigInt;

use super::helpers::*;
use crate::ast::build::*;
use crate::ast::{BinaryOp, UnaryOp};
use crate::errors::MachineError;
use crate::values::{TypedValue, Value};

#[test]
fn test_bigint_literal_and_negation() {
    let out = run_main(vec![
        var(&["x"], Some(tname("bigint")), vec![int_lit("123456789012345678901234567890")]),
        main_func(vec![
            println_(vec![unary(UnaryOp::Neg, name("x"))]),
            println_(vec![binary(BinaryOp::Mul, name("x"), int(10))]),
        ]),
    ]);
    assert_eq!(
        out,
        "-123456789012345678901234567890\n1234567890123456789012345678900\n"
    );
}

#[test]
fn test_bigint_arguments_and_results() {
    let (mut m, _) = load(vec![func_decl(
        "neg",
        func_type(vec![field("a", tname("bigint"))], vec![field("", tname("bigint"))]),
        vec![ret(vec![unary(UnaryOp::Neg, name("a"))])],
    )]);
    let results = m.run_func("neg", vec![TypedValue::bigint(BigInt::from(5))]).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].v, Value::Bigint(BigInt::from(-5)));
}

#[test]
fn test_arrays_copy_on_assignment() {
    let out = run_main(vec![main_func(vec![
        define(&["a"], vec![composite(tarray(Some(2), tname("int")), vec![int(1), int(2)])]),
        define(&["b"], vec![name("a")]),
        assign(vec![index(name("b"), int(0))], vec![int(9)]),
        println_(vec![index(name("a"), int(0)), index(name("b"), int(0))]),
    ])]);
    assert_eq!(out, "1 9\n");
}

#[test]
fn test_slices_share_backing_array() {
    let out = run_main(vec![main_func(vec![
        define(&["s"], vec![composite(tslice(tname("int")), vec![int(1), int(2)])]),
        define(&["t"], vec![name("s")]),
        assign(vec![index(name("t"), int(0))], vec![int(9)]),
        println_(vec![index(name("s"), int(0))]),
        assign(vec![name("s")], vec![call(name("append"), vec![name("s"), int(3)])]),
        println_(vec![call(name("len"), vec![name("s")]), index(name("s"), int(2))]),
        define(&["u"], vec![slice_expr(name("s"), Some(int(1)), None)]),
        println_(vec![call(name("len"), vec![name("u")]), index(name("u"), int(0))]),
    ])]);
    assert_eq!(out, "9\n3 3\n2 2\n");
}

#[test]
fn test_map_insert_lookup_and_delete() {
    let out = run_main(vec![main_func(vec![
        define(&["m"], vec![composite(tmap(tname("string"), tname("int")), vec![])]),
        assign(vec![index(name("m"), string("a"))], vec![int(1)]),
        println_(vec![index(name("m"), string("a"))]),
        expr_stmt(call(name("delete"), vec![name("m"), string("a")])),
        define(&["v", "ok"], vec![index_ok(name("m"), string("a"))]),
        println_(vec![call(name("len"), vec![name("m")]), name("v"), name("ok")]),
    ])]);
    assert_eq!(out, "1\n0 0 false\n");
}

#[test]
fn test_make_map() {
    let out = run_main(vec![main_func(vec![
        define(
            &["m"],
            vec![call(name("make"), vec![type_value(tmap(tname("int"), tname("string")))])],
        ),
        assign(vec![index(name("m"), int(7))], vec![string("seven")]),
        println_(vec![index(name("m"), int(7)), call(name("len"), vec![name("m")])]),
    ])]);
    assert_eq!(out, "seven 1\n");
}

#[test]
fn test_write_to_nil_map_panics() {
    let (mut m, _) = load(vec![func_decl(
        "bad",
        func_type(vec![], vec![]),
        vec![
            decl_stmt(var(&["m"], Some(tmap(tname("string"), tname("int"))), vec![])),
            assign(vec![index(name("m"), string("a"))], vec![int(1)]),
        ],
    )]);
    match m.run_func("bad", vec![]).unwrap_err() {
        MachineError::UnhandledPanic { descriptor, .. } => {
            assert!(descriptor.contains("assignment to entry in nil map"), "{descriptor}");
        }
        other => panic!("expected unhandled panic, got {other:?}"),
    }
}

#[test]
fn test_structs_copy_and_pointers_alias() {
    let out = run_main(vec![
        type_decl(
            "Point",
            tstruct(vec![field("x", tname("int")), field("y", tname("int"))]),
        ),
        main_func(vec![
            define(&["p"], vec![composite(tname("Point"), vec![int(1), int(2)])]),
            define(&["q"], vec![name("p")]),
            assign(vec![sel(name("q"), "x")], vec![int(5)]),
            println_(vec![sel(name("p"), "x"), sel(name("q"), "x")]),
            define(&["r"], vec![addr(name("p"))]),
            assign(vec![sel(name("r"), "y")], vec![int(7)]),
            println_(vec![sel(name("p"), "y")]),
        ]),
    ]);
    assert_eq!(out, "1 5\n7\n");
}

#[test]
fn test_pointer_to_local() {
    let out = run_main(vec![main_func(vec![
        define(&["x"], vec![int(1)]),
        define(&["p"], vec![addr(name("x"))]),
        assign(vec![star(name("p"))], vec![int(3)]),
        println_(vec![name("x"), star(name("p"))]),
    ])]);
    assert_eq!(out, "3 3\n");
}

#[test]
fn test_value_and_pointer_methods() {
    let out = run_main(vec![
        type_decl("Counter", tstruct(vec![field("n", tname("int"))])),
        method_decl(
            field("c", tptr(tname("Counter"))),
            "Inc",
            func_type(vec![], vec![]),
            vec![inc(sel(name("c"), "n"))],
        ),
        method_decl(
            field("c", tname("Counter")),
            "Get",
            func_type(vec![], int_result()),
            vec![ret(vec![sel(name("c"), "n")])],
        ),
        main_func(vec![
            decl_stmt(var(&["c"], Some(tname("Counter")), vec![])),
            expr_stmt(call(sel(name("c"), "Inc"), vec![])),
            expr_stmt(call(sel(name("c"), "Inc"), vec![])),
            println_(vec![call(sel(name("c"), "Get"), vec![])]),
            define(&["p"], vec![addr(name("c"))]),
            println_(vec![call(sel(name("p"), "Get"), vec![])]),
        ]),
    ]);
    assert_eq!(out, "2\n2\n");
}

#[test]
fn test_interface_dispatch() {
    let out = run_main(vec![
        type_decl(
            "Namer",
            tinterface(vec![field("Name", crate::ast::TypeExpr::Func(func_type(vec![], vec![field("", tname("string"))])))]),
        ),
        type_decl("Dog", tstruct(vec![])),
        method_decl(
            field("d", tname("Dog")),
            "Name",
            func_type(vec![], vec![field("", tname("string"))]),
            vec![ret(vec![string("dog")])],
        ),
        main_func(vec![
            decl_stmt(var(&["n"], Some(tname("Namer")), vec![composite(tname("Dog"), vec![])])),
            println_(vec![call(sel(name("n"), "Name"), vec![])]),
        ]),
    ]);
    assert_eq!(out, "dog\n");
}

#[test]
fn test_string_concat_and_compare() {
    let out = run_main(vec![main_func(vec![
        define(&["s"], vec![binary(BinaryOp::Add, string("ab"), string("c"))]),
        println_(vec![
            name("s"),
            binary(BinaryOp::Eql, name("s"), string("abc")),
            call(name("len"), vec![name("s")]),
        ]),
    ])]);
    assert_eq!(out, "abc true 3\n");
}
