//! Machine lifecycle: stepping, limits and failure

use super::helpers::*;
use crate::ast::build::*;
use crate::ast::BinaryOp;
use crate::config::MachineOptions;
use crate::errors::MachineError;
use crate::machine::{MachineState, Step};
use crate::ownership::MemStore;
use crate::values::TypedValue;

fn fill_map() -> crate::ast::Decl {
    func_decl(
        "fill",
        func_type(vec![], vec![]),
        vec![
            define(&["m"], vec![composite(tmap(tname("int"), tname("int")), vec![])]),
            for_(
                Some(define(&["i"], vec![int(0)])),
                None,
                Some(inc(name("i"))),
                vec![assign(vec![index(name("m"), name("i"))], vec![name("i")])],
            ),
        ],
    )
}

#[test]
fn test_alloc_limit_stops_runaway_program() {
    let store = MemStore::new();
    let options = MachineOptions {
        max_alloc_bytes: 64 * 1024,
        ..Default::default()
    };
    let (mut m, _) = new_machine(&store, options);
    m.add_package(single_file(PKG, vec![fill_map()])).unwrap();

    let err = m.run_func("fill", vec![]).unwrap_err();
    match err {
        MachineError::AllocLimitExceeded { allocated, limit } => {
            assert_eq!(limit, 64 * 1024);
            assert!(allocated > limit);
        }
        other => panic!("expected alloc limit, got {other:?}"),
    }
    assert_eq!(m.state(), MachineState::Failed);
}

fn make_ints(len: i64, cap: i64) -> crate::ast::Decl {
    func_decl(
        "alloc",
        func_type(vec![], vec![]),
        vec![
            define(
                &["s"],
                vec![call(name("make"), vec![type_value(tslice(tname("int"))), int(len), int(cap)])],
            ),
            println_(vec![call(name("cap"), vec![name("s")])]),
        ],
    )
}

#[test]
fn test_huge_make_hits_alloc_limit_before_allocating() {
    let store = MemStore::new();
    let options = MachineOptions {
        max_alloc_bytes: 1 << 20,
        ..Default::default()
    };
    let (mut m, out) = new_machine(&store, options);
    m.add_package(single_file(PKG, vec![make_ints(0, 1 << 40)])).unwrap();

    match m.run_func("alloc", vec![]).unwrap_err() {
        MachineError::AllocLimitExceeded { allocated, limit } => {
            assert_eq!(limit, 1 << 20);
            assert!(allocated > limit);
        }
        other => panic!("expected alloc limit, got {other:?}"),
    }
    assert_eq!(out.text(), "");
    assert_eq!(m.state(), MachineState::Failed);
}

#[test]
fn test_make_within_alloc_limit() {
    let store = MemStore::new();
    let options = MachineOptions {
        max_alloc_bytes: 1 << 20,
        ..Default::default()
    };
    let (mut m, out) = new_machine(&store, options);
    m.add_package(single_file(PKG, vec![make_ints(2, 16)])).unwrap();
    m.run_func("alloc", vec![]).unwrap();
    assert_eq!(out.text(), "16\n");
}

#[test]
fn test_make_with_cap_below_len_panics() {
    let (mut m, _) = load(vec![make_ints(4, 2)]);
    match m.run_func("alloc", vec![]).unwrap_err() {
        MachineError::UnhandledPanic { descriptor, .. } => {
            assert!(descriptor.contains("makeslice"), "{descriptor}");
        }
        other => panic!("expected unhandled panic, got {other:?}"),
    }
}

#[test]
fn test_failed_machine_is_discarded() {
    let (mut m, _) = load(vec![
        func_decl(
            "boom",
            func_type(vec![], vec![]),
            vec![expr_stmt(call(name("panic"), vec![string("x")]))],
        ),
        func_decl("fine", func_type(vec![], vec![]), vec![]),
    ]);
    assert!(matches!(m.run_func("boom", vec![]), Err(MachineError::UnhandledPanic { .. })));
    assert!(matches!(m.run_func("fine", vec![]), Err(MachineError::Discarded)));
    assert!(matches!(
        m.add_package(single_file("gno.land/p/demo/other", vec![])),
        Err(MachineError::Discarded)
    ));
}

#[test]
fn test_machine_reusable_after_success() {
    let (mut m, out) = load(vec![func_decl(
        "twice",
        func_type(vec![int_param("n")], int_result()),
        vec![
            println_(vec![name("n")]),
            ret(vec![binary(BinaryOp::Mul, name("n"), int(2))]),
        ],
    )]);
    for n in 1..=3 {
        let got = m.run_func("twice", vec![TypedValue::int(n)]).unwrap();
        assert_eq!(got, vec![TypedValue::int(n * 2)]);
        assert_eq!(m.state(), MachineState::Idle);
    }
    assert_eq!(out.text(), "1\n2\n3\n");
}

#[test]
fn test_manual_stepping() {
    let (mut m, out) = load(vec![main_func(vec![
        println_(vec![string("a")]),
        println_(vec![string("b")]),
    ])]);
    m.start_func("main", vec![]).unwrap();
    let mut steps = 0;
    while m.step().unwrap() == Step::Continue {
        steps += 1;
    }
    assert!(steps > 2);
    assert_eq!(out.text(), "a\nb\n");
    assert!(m.frames.is_empty());
    assert!(m.ops.is_empty());
    assert_eq!(m.step().unwrap(), Step::Done);
}

#[test]
fn test_missing_function() {
    let (mut m, _) = load(vec![]);
    match m.run_func("nope", vec![]) {
        Err(MachineError::FuncNotFound(n)) => assert_eq!(n, "nope"),
        other => panic!("expected FuncNotFound, got {other:?}"),
    }
    // Lookup failures happen before anything runs.
    assert_eq!(m.state(), MachineState::Idle);
}

#[test]
fn test_goroutines_not_implemented() {
    let (mut m, _) = load(vec![
        func_decl("work", func_type(vec![], vec![]), vec![]),
        main_func(vec![go(name("work"), vec![])]),
    ]);
    assert!(matches!(m.run_main(), Err(MachineError::NotImplemented("goroutines"))));
}

#[test]
fn test_use_package_switches_lookup() {
    let store = MemStore::new();
    let (mut m, out) = new_machine(&store, MachineOptions::default());
    m.add_package(single_file(PKG, vec![main_func(vec![println_(vec![string("first")])])]))
        .unwrap();
    m.add_package(single_file(
        "gno.land/p/demo/second",
        vec![main_func(vec![println_(vec![string("second")])])],
    ))
    .unwrap();

    m.run_main().unwrap();
    m.use_package("gno.land/p/demo/second").unwrap();
    m.run_main().unwrap();
    assert_eq!(out.text(), "first\nsecond\n");

    assert!(matches!(
        m.use_package("gno.land/p/demo/missing"),
        Err(MachineError::Store(_))
    ));
}
