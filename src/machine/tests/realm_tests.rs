//! Realm persistence across machines sharing a store

use super::helpers::*;
use crate::ast::build::*;
use crate::ast::{BinaryOp, PackageNode};
use crate::config::MachineOptions;
use crate::machine::{Machine, Step};
use crate::ownership::{MemStore, RealmOpKind, Store};
use crate::values::TypedValue;

const LIB: &str = "gno.land/p/demo/lib";

fn counter_realm() -> PackageNode {
    let string_result = vec![field("", tname("string"))];
    single_file(
        REALM,
        vec![
            var(&["count"], Some(tname("int")), vec![]),
            var(&["items"], Some(tslice(tname("string"))), vec![]),
            func_decl("Inc", func_type(vec![], vec![]), vec![inc(name("count"))]),
            func_decl("Count", func_type(vec![], int_result()), vec![ret(vec![name("count")])]),
            func_decl(
                "Add",
                func_type(vec![field("s", tname("string"))], vec![]),
                vec![assign(
                    vec![name("items")],
                    vec![call(name("append"), vec![name("items"), name("s")])],
                )],
            ),
            func_decl(
                "First",
                func_type(vec![], string_result),
                vec![ret(vec![index(name("items"), int(0))])],
            ),
        ],
    )
}

fn realm_machine(store: &MemStore) -> Machine {
    let (mut m, _) = new_machine(store, MachineOptions::default());
    m.add_package(counter_realm()).unwrap();
    m
}

#[test]
fn test_realm_state_survives_machine() {
    let store = MemStore::new();
    {
        let mut m = realm_machine(&store);
        m.run_func("Inc", vec![]).unwrap();
        m.run_func("Inc", vec![]).unwrap();
        m.run_func("Add", vec![TypedValue::string("first")]).unwrap();
        m.run_func("Add", vec![TypedValue::string("second")]).unwrap();
        assert_eq!(m.run_func("Count", vec![]).unwrap(), vec![TypedValue::int(2)]);
    }
    assert!(store.num_objects() > 0);
    assert!(store.clone().get_realm(REALM).unwrap().is_some());

    let mut m = realm_machine(&store);
    assert_eq!(m.run_func("Count", vec![]).unwrap(), vec![TypedValue::int(2)]);
    assert_eq!(m.run_func("First", vec![]).unwrap(), vec![TypedValue::string("first")]);
    m.run_func("Inc", vec![]).unwrap();

    let mut m = realm_machine(&store);
    assert_eq!(m.run_func("Count", vec![]).unwrap(), vec![TypedValue::int(3)]);
}

#[test]
fn test_restored_package_block_loads_lazily() {
    let store = MemStore::new();
    {
        let mut m = realm_machine(&store);
        m.run_func("Add", vec![TypedValue::string("x")]).unwrap();
    }
    let mut m = realm_machine(&store);
    let before = m.heap.len();
    assert_eq!(m.run_func("First", vec![]).unwrap(), vec![TypedValue::string("x")]);
    // The slice's backing array came out of the store on first use.
    assert!(m.heap.len() > before);
}

#[test]
fn test_realm_ops_log() {
    let store = MemStore::new();
    let (mut m, _) = new_machine(&store, MachineOptions::default());
    m.set_log_realm_ops(true);
    m.add_package(counter_realm()).unwrap();

    let realm = m.realm_state(REALM).unwrap();
    let pkg_block = realm.package_block_id();
    assert!(realm
        .realm_ops()
        .iter()
        .any(|op| op.kind == RealmOpKind::New && op.object_id == pkg_block));
    let logged = realm.realm_ops().len();

    m.run_func("Inc", vec![]).unwrap();
    let ops = m.realm_state(REALM).unwrap().realm_ops();
    assert!(ops.len() > logged);
    let last = ops.last().unwrap();
    assert_eq!(last.kind, RealmOpKind::Mod);
    assert_eq!(last.object_id, pkg_block);
}

#[test]
fn test_reads_do_not_write() {
    let store = MemStore::new();
    let mut m = realm_machine(&store);
    m.run_func("Inc", vec![]).unwrap();
    let writes = store.writes();
    m.run_func("Count", vec![]).unwrap();
    assert_eq!(store.writes(), writes);
}

#[test]
fn test_calling_into_realm_from_package() {
    let store = MemStore::new();
    let (mut m, out) = new_machine(&store, MachineOptions::default());
    m.add_package(counter_realm()).unwrap();
    m.add_package(single_file(
        PKG,
        vec![
            import(REALM),
            main_func(vec![
                expr_stmt(call(sel(name("counter"), "Inc"), vec![])),
                println_(vec![call(sel(name("counter"), "Count"), vec![])]),
            ]),
        ],
    ))
    .unwrap();
    m.use_package(PKG).unwrap();
    m.run_main().unwrap();
    assert_eq!(out.text(), "1\n");

    let mut m = realm_machine(&store);
    assert_eq!(m.run_func("Count", vec![]).unwrap(), vec![TypedValue::int(1)]);
}

const INNER: &str = "gno.land/r/demo/inner";
const OUTER: &str = "gno.land/r/demo/outer";

/// `outer.Run` bumps its own counter around a call into `inner.Bump`.
fn nested_realms(m: &mut Machine) {
    m.add_package(single_file(
        INNER,
        vec![
            var(&["n"], Some(tname("int")), vec![]),
            func_decl("Bump", func_type(vec![], vec![]), vec![inc(name("n"))]),
            func_decl("N", func_type(vec![], int_result()), vec![ret(vec![name("n")])]),
        ],
    ))
    .unwrap();
    m.add_package(single_file(
        OUTER,
        vec![
            import(INNER),
            var(&["calls"], Some(tname("int")), vec![]),
            func_decl(
                "Run",
                func_type(vec![], vec![]),
                vec![
                    inc(name("calls")),
                    expr_stmt(call(sel(name("inner"), "Bump"), vec![])),
                    inc(name("calls")),
                ],
            ),
            func_decl("Calls", func_type(vec![], int_result()), vec![ret(vec![name("calls")])]),
        ],
    ))
    .unwrap();
    m.use_package(OUTER).unwrap();
}

#[test]
fn test_realm_committed_when_call_returns_to_other_realm() {
    let store = MemStore::new();
    let (mut m, _) = new_machine(&store, MachineOptions::default());
    m.set_log_realm_ops(true);
    nested_realms(&mut m);

    let ops_len = |m: &Machine, path: &str| m.realm_state(path).unwrap().realm_ops().len();
    let (inner_before, outer_before) = (ops_len(&m, INNER), ops_len(&m, OUTER));
    let writes = store.writes();

    m.start_func("Run", vec![]).unwrap();
    let mut inner_committed_mid_call = false;
    while m.step().unwrap() == Step::Continue {
        let inner_done = ops_len(&m, INNER) > inner_before;
        let outer_done = ops_len(&m, OUTER) > outer_before;
        if inner_done && !outer_done {
            inner_committed_mid_call = true;
            assert_eq!(store.writes(), writes + 1);
        }
    }
    assert!(inner_committed_mid_call);
    assert_eq!(store.writes(), writes + 2);

    let inner = m.realm_state(INNER).unwrap();
    let inner_ops = &inner.realm_ops()[inner_before..];
    assert_eq!(inner_ops.len(), 1);
    assert_eq!(inner_ops[0].kind, RealmOpKind::Mod);
    assert_eq!(inner_ops[0].object_id, inner.package_block_id());

    let outer = m.realm_state(OUTER).unwrap();
    let outer_ops = &outer.realm_ops()[outer_before..];
    assert_eq!(outer_ops.len(), 1);
    assert_eq!(outer_ops[0].kind, RealmOpKind::Mod);
    assert_eq!(outer_ops[0].object_id, outer.package_block_id());
}

#[test]
fn test_nested_realm_state_persists() {
    let store = MemStore::new();
    {
        let (mut m, _) = new_machine(&store, MachineOptions::default());
        nested_realms(&mut m);
        m.run_func("Run", vec![]).unwrap();
        m.run_func("Run", vec![]).unwrap();
    }
    let (mut m, out) = new_machine(&store, MachineOptions::default());
    nested_realms(&mut m);
    m.add_package(single_file(
        PKG,
        vec![
            import(INNER),
            import(OUTER),
            func_decl(
                "show",
                func_type(vec![], vec![]),
                vec![println_(vec![
                    call(sel(name("inner"), "N"), vec![]),
                    call(sel(name("outer"), "Calls"), vec![]),
                ])],
            ),
        ],
    ))
    .unwrap();
    m.use_package(PKG).unwrap();
    m.run_func("show", vec![]).unwrap();
    assert_eq!(out.text(), "2 4\n");
}

#[test]
fn test_imports_load_from_store() {
    let lib = single_file(
        LIB,
        vec![func_decl(
            "Double",
            func_type(vec![int_param("n")], int_result()),
            vec![ret(vec![binary(BinaryOp::Mul, name("n"), int(2))])],
        )],
    );
    let app = single_file(
        PKG,
        vec![
            import(LIB),
            main_func(vec![println_(vec![call(sel(name("lib"), "Double"), vec![int(21)])])]),
        ],
    );

    let store = MemStore::new();
    {
        let (mut m, out) = new_machine(&store, MachineOptions::default());
        m.add_package(lib).unwrap();
        m.add_package(app.clone()).unwrap();
        m.use_package(PKG).unwrap();
        m.run_main().unwrap();
        assert_eq!(out.text(), "42\n");
    }

    let (mut m, out) = new_machine(&store, MachineOptions::default());
    m.add_package(app).unwrap();
    m.run_main().unwrap();
    assert_eq!(out.text(), "42\n");
}
