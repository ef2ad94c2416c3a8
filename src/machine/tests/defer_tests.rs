//! Defer, panic and recover

use super::helpers::*;
use crate::ast::build::*;
use crate::ast::{BinaryOp, Decl, Expr, Stmt};
use crate::errors::MachineError;
use crate::machine::MachineState;
use crate::values::{TypedValue, Value};

fn say(s: &str) -> Decl {
    func_decl(s, func_type(vec![], vec![]), vec![println_(vec![string(s)])])
}

fn panic_stmt(x: Expr) -> Stmt {
    expr_stmt(call(name("panic"), vec![x]))
}

/// `defer func() { r := recover(); println("recovered", r) }()`
fn defer_recover() -> Stmt {
    defer(
        func_lit(
            func_type(vec![], vec![]),
            vec![
                define(&["r"], vec![call(name("recover"), vec![])]),
                println_(vec![string("recovered"), name("r")]),
            ],
        ),
        vec![],
    )
}

#[test]
fn test_defers_run_in_reverse_and_panic_escapes() {
    let (mut m, out) = load(vec![
        say("f"),
        say("g"),
        func_decl(
            "boom",
            func_type(vec![], vec![]),
            vec![
                defer(name("f"), vec![]),
                defer(name("g"), vec![]),
                panic_stmt(string("e")),
                println_(vec![string("unreachable")]),
            ],
        ),
    ]);
    let err = m.run_func("boom", vec![]).unwrap_err();
    assert_eq!(out.text(), "g\nf\n");
    match err {
        MachineError::UnhandledPanic { descriptor, exception } => {
            assert_eq!(descriptor, "e");
            assert_eq!(exception.v, Value::String("e".to_string()));
        }
        other => panic!("expected unhandled panic, got {other:?}"),
    }
    assert_eq!(m.state(), MachineState::Failed);
}

#[test]
fn test_defers_run_on_normal_return() {
    let (mut m, out) = load(vec![
        say("f"),
        func_decl(
            "work",
            func_type(vec![], int_result()),
            vec![
                defer(name("f"), vec![]),
                println_(vec![string("body")]),
                ret(vec![int(3)]),
            ],
        ),
    ]);
    assert_eq!(m.run_func("work", vec![]).unwrap(), vec![TypedValue::int(3)]);
    assert_eq!(out.text(), "body\nf\n");
}

#[test]
fn test_deferred_args_evaluated_at_defer_time() {
    let out = run_main(vec![main_func(vec![
        define(&["x"], vec![int(1)]),
        defer(name("println"), vec![string("deferred"), name("x")]),
        assign(vec![name("x")], vec![int(2)]),
        println_(vec![string("now"), name("x")]),
    ])]);
    assert_eq!(out, "now 2\ndeferred 1\n");
}

#[test]
fn test_deferred_closure_sets_named_result() {
    let (mut m, _) = load(vec![func_decl(
        "counted",
        func_type(vec![], vec![int_param("n")]),
        vec![
            defer(
                func_lit(func_type(vec![], vec![]), vec![op_assign(crate::ast::AssignOp::Mul, name("n"), int(10))]),
                vec![],
            ),
            ret(vec![int(4)]),
        ],
    )]);
    assert_eq!(m.run_func("counted", vec![]).unwrap(), vec![TypedValue::int(40)]);
}

#[test]
fn test_recover_stops_panic() {
    let out = run_main(vec![
        func_decl(
            "safe",
            func_type(vec![], vec![]),
            vec![defer_recover(), panic_stmt(string("e")), println_(vec![string("unreachable")])],
        ),
        main_func(vec![call_stmt("safe", vec![]), println_(vec![string("after")])]),
    ]);
    assert_eq!(out, "recovered e\nafter\n");
}

#[test]
fn test_recover_outside_panic_returns_nothing() {
    let out = run_main(vec![main_func(vec![
        define(&["r"], vec![call(name("recover"), vec![])]),
        println_(vec![name("r")]),
    ])]);
    assert_eq!(out, "undefined\n");
}

#[test]
fn test_panic_unwinds_through_callers() {
    let out = run_main(vec![
        func_decl(
            "inner",
            func_type(vec![], vec![]),
            vec![defer(name("println"), vec![string("inner defer")]), panic_stmt(string("deep"))],
        ),
        func_decl(
            "middle",
            func_type(vec![], vec![]),
            vec![
                defer(name("println"), vec![string("middle defer")]),
                call_stmt("inner", vec![]),
                println_(vec![string("unreachable")]),
            ],
        ),
        main_func(vec![defer_recover(), call_stmt("middle", vec![])]),
    ]);
    assert_eq!(out, "inner defer\nmiddle defer\nrecovered deep\n");
}

#[test]
fn test_runtime_error_is_recoverable() {
    let out = run_main(vec![
        func_decl(
            "divide",
            func_type(vec![int_param("a"), int_param("b")], int_result()),
            vec![defer_recover(), ret(vec![binary(BinaryOp::Quo, name("a"), name("b"))])],
        ),
        main_func(vec![println_(vec![call(name("divide"), vec![int(1), int(0)])])]),
    ]);
    assert!(out.starts_with("recovered "), "{out}");
    assert!(out.contains("divide by zero"), "{out}");
    // Zero value of the unnamed result.
    assert!(out.ends_with("\n0\n"), "{out}");
}

#[test]
fn test_index_out_of_range_panics() {
    let (mut m, _) = load(vec![func_decl(
        "oob",
        func_type(vec![], int_result()),
        vec![
            define(&["xs"], vec![composite(tslice(tname("int")), vec![int(1)])]),
            ret(vec![index(name("xs"), int(3))]),
        ],
    )]);
    match m.run_func("oob", vec![]).unwrap_err() {
        MachineError::UnhandledPanic { descriptor, .. } => {
            assert!(descriptor.contains("index out of range [3] with length 1"), "{descriptor}");
        }
        other => panic!("expected unhandled panic, got {other:?}"),
    }
}

#[test]
fn test_panic_in_defer_replaces_first_panic() {
    let out = run_main(vec![
        func_decl(
            "twice",
            func_type(vec![], vec![]),
            vec![
                defer_recover(),
                defer(
                    func_lit(func_type(vec![], vec![]), vec![panic_stmt(string("second"))]),
                    vec![],
                ),
                panic_stmt(string("first")),
            ],
        ),
        main_func(vec![call_stmt("twice", vec![]), println_(vec![string("done")])]),
    ]);
    assert_eq!(out, "recovered second\ndone\n");
}

/// `defer func() { <wrap(r := recover(); println("recovered", r))> }()`
fn defer_recover_within(wrap: impl FnOnce(Vec<Stmt>) -> Stmt) -> Stmt {
    let body = vec![
        define(&["r"], vec![call(name("recover"), vec![])]),
        println_(vec![string("recovered"), name("r")]),
    ];
    defer(func_lit(func_type(vec![], vec![]), vec![wrap(body)]), vec![])
}

#[test]
fn test_recover_inside_loop_of_deferred_closure() {
    let once = |body| {
        for_(
            Some(define(&["i"], vec![int(0)])),
            Some(binary(BinaryOp::Lss, name("i"), int(1))),
            Some(inc(name("i"))),
            body,
        )
    };
    let out = run_main(vec![
        func_decl(
            "safe",
            func_type(vec![], vec![]),
            vec![defer_recover_within(once), panic_stmt(string("e"))],
        ),
        main_func(vec![call_stmt("safe", vec![]), println_(vec![string("after")])]),
    ]);
    assert_eq!(out, "recovered e\nafter\n");
}

#[test]
fn test_recover_inside_switch_of_deferred_closure() {
    let default_case = |body| switch(None, None, vec![case(vec![], body)]);
    let out = run_main(vec![
        func_decl(
            "safe",
            func_type(vec![], vec![]),
            vec![defer_recover_within(default_case), panic_stmt(string("e"))],
        ),
        main_func(vec![call_stmt("safe", vec![]), println_(vec![string("after")])]),
    ]);
    assert_eq!(out, "recovered e\nafter\n");
}

#[test]
fn test_recover_in_helper_of_deferred_closure_does_not_stop_panic() {
    let (mut m, out) = load(vec![
        func_decl(
            "helper",
            func_type(vec![], vec![]),
            vec![
                define(&["r"], vec![call(name("recover"), vec![])]),
                println_(vec![string("helper"), name("r")]),
            ],
        ),
        func_decl(
            "boom",
            func_type(vec![], vec![]),
            vec![
                defer(
                    func_lit(func_type(vec![], vec![]), vec![call_stmt("helper", vec![])]),
                    vec![],
                ),
                panic_stmt(string("e")),
            ],
        ),
    ]);
    assert!(matches!(m.run_func("boom", vec![]), Err(MachineError::UnhandledPanic { .. })));
    assert_eq!(out.text(), "helper undefined\n");
}
