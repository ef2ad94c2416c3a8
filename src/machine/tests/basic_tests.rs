//! Calls, results, assignments and closures

use super::helpers::*;
use crate::ast::build::*;
use crate::ast::{AssignOp, BinaryOp};
use crate::values::TypedValue;

#[test]
fn test_zero_result_function_returns_implicitly() {
    let (mut m, out) = load(vec![func_decl(
        "hello",
        func_type(vec![], vec![]),
        vec![println_(vec![string("hi")])],
    )]);
    let results = m.run_func("hello", vec![]).unwrap();
    assert!(results.is_empty());
    assert_eq!(out.text(), "hi\n");
    assert!(m.frames.is_empty());
    assert!(m.ops.is_empty());
}

#[test]
fn test_arguments_and_results() {
    let (mut m, _) = load(vec![
        func_decl(
            "add",
            func_type(vec![int_param("a"), int_param("b")], int_result()),
            vec![ret(vec![binary(BinaryOp::Add, name("a"), name("b"))])],
        ),
        func_decl(
            "divmod",
            func_type(
                vec![int_param("a"), int_param("b")],
                vec![field("", tname("int")), field("", tname("int"))],
            ),
            vec![ret(vec![
                binary(BinaryOp::Quo, name("a"), name("b")),
                binary(BinaryOp::Rem, name("a"), name("b")),
            ])],
        ),
    ]);
    let sum = m.run_func("add", vec![TypedValue::int(2), TypedValue::int(3)]).unwrap();
    assert_eq!(sum, vec![TypedValue::int(5)]);

    let qr = m.run_func("divmod", vec![TypedValue::int(7), TypedValue::int(2)]).unwrap();
    assert_eq!(qr, vec![TypedValue::int(3), TypedValue::int(1)]);
}

#[test]
fn test_named_result_returned_implicitly() {
    let (mut m, _) = load(vec![func_decl(
        "seven",
        func_type(vec![], vec![int_param("r")]),
        vec![assign(vec![name("r")], vec![int(7)])],
    )]);
    assert_eq!(m.run_func("seven", vec![]).unwrap(), vec![TypedValue::int(7)]);
}

#[test]
fn test_multi_value_define_and_op_assign() {
    let out = run_main(vec![
        func_decl(
            "pair",
            func_type(vec![], vec![field("", tname("int")), field("", tname("string"))]),
            vec![ret(vec![int(40), string("x")])],
        ),
        main_func(vec![
            define(&["n", "s"], vec![call(name("pair"), vec![])]),
            op_assign(AssignOp::Add, name("n"), int(2)),
            op_assign(AssignOp::Add, name("s"), string("y")),
            inc(name("n")),
            dec(name("n")),
            println_(vec![name("n"), name("s")]),
        ]),
    ]);
    assert_eq!(out, "42 xy\n");
}

#[test]
fn test_recursion() {
    let fact = func_decl(
        "fact",
        func_type(vec![int_param("n")], int_result()),
        vec![
            if_(binary(BinaryOp::Leq, name("n"), int(1)), vec![ret(vec![int(1)])], None),
            ret(vec![binary(
                BinaryOp::Mul,
                name("n"),
                call(name("fact"), vec![binary(BinaryOp::Sub, name("n"), int(1))]),
            )]),
        ],
    );
    let (mut m, _) = load(vec![fact]);
    assert_eq!(m.run_func("fact", vec![TypedValue::int(10)]).unwrap(), vec![TypedValue::int(3628800)]);
}

#[test]
fn test_closure_shares_captured_variable() {
    let out = run_main(vec![main_func(vec![
        define(&["n"], vec![int(0)]),
        define(
            &["bump"],
            vec![func_lit(func_type(vec![], vec![]), vec![inc(name("n"))])],
        ),
        call_stmt("bump", vec![]),
        call_stmt("bump", vec![]),
        println_(vec![name("n")]),
    ])]);
    assert_eq!(out, "2\n");
}

#[test]
fn test_package_vars_initialized_in_order() {
    let out = run_main(vec![
        var(&["a"], None, vec![int(20)]),
        var(&["b"], None, vec![binary(BinaryOp::Add, name("a"), int(1))]),
        var(&["c"], Some(tname("string")), vec![]),
        func_decl(
            "init",
            func_type(vec![], vec![]),
            vec![assign(vec![name("c")], vec![string("ready")])],
        ),
        main_func(vec![println_(vec![name("a"), name("b"), name("c")])]),
    ]);
    assert_eq!(out, "20 21 ready\n");
}

#[test]
fn test_variadic_call_and_spread() {
    let sum = func_decl(
        "sum",
        variadic_func_type(vec![field("xs", tname("int"))], int_result()),
        vec![
            define(&["t"], vec![int(0)]),
            range(
                Some("i"),
                Some("x"),
                name("xs"),
                vec![
                    op_assign(AssignOp::Add, name("t"), name("x")),
                    assign(vec![name("_")], vec![name("i")]),
                ],
            ),
            ret(vec![name("t")]),
        ],
    );
    let out = run_main(vec![
        sum,
        main_func(vec![
            define(&["xs"], vec![composite(tslice(tname("int")), vec![int(4), int(5)])]),
            println_(vec![
                call(name("sum"), vec![int(1), int(2), int(3)]),
                call_spread(name("sum"), vec![name("xs")]),
                call(name("sum"), vec![]),
            ]),
        ]),
    ]);
    assert_eq!(out, "6 9 0\n");
}
