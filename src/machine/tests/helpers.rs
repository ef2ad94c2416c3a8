//! Test helpers for machine tests
//!
//! Common utilities for building packages and machines, and for capturing
//! what programs print.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use crate::ast::build::*;
use crate::ast::{Decl, Expr, FieldTypeExpr, PackageNode, Stmt};
use crate::config::MachineOptions;
use crate::machine::Machine;
use crate::ownership::MemStore;

pub const PKG: &str = "gno.land/p/demo/test";
pub const REALM: &str = "gno.land/r/demo/counter";

/// Output sink whose clones share one buffer.
#[derive(Clone, Default)]
pub struct Output(Rc<RefCell<Vec<u8>>>);

impl Output {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A machine over `store`, printing into the returned sink.
pub fn new_machine(store: &MemStore, options: MachineOptions) -> (Machine, Output) {
    crate::diagnostics::init_tracing();
    let out = Output::default();
    let m = Machine::new(options, Box::new(store.clone()), Box::new(out.clone()));
    (m, out)
}

/// Package `path` with one file. The tree goes through JSON once, the way
/// hosts hand packages over.
pub fn single_file(path: &str, decls: Vec<Decl>) -> PackageNode {
    let name = path.rsplit('/').next().unwrap_or(path);
    let pkg = package(name, path, vec![file("main.gno", decls)]);
    let json = serde_json::to_string(&pkg).expect("package serialization failed");
    serde_json::from_str(&json).expect("package deserialization failed")
}

/// Load `decls` as package `PKG` into a fresh machine.
pub fn load(decls: Vec<Decl>) -> (Machine, Output) {
    let store = MemStore::new();
    let (mut m, out) = new_machine(&store, MachineOptions::default());
    m.add_package(single_file(PKG, decls)).expect("add package");
    (m, out)
}

/// Run `main` of a package made of `decls` and return what it printed.
pub fn run_main(decls: Vec<Decl>) -> String {
    let (mut m, out) = load(decls);
    m.run_main().expect("run main");
    out.text()
}

pub fn main_func(body: Vec<Stmt>) -> Decl {
    func_decl("main", func_type(vec![], vec![]), body)
}

pub fn println_(args: Vec<Expr>) -> Stmt {
    expr_stmt(call(name("println"), args))
}

pub fn call_stmt(func: &str, args: Vec<Expr>) -> Stmt {
    expr_stmt(call(name(func), args))
}

pub fn int_param(n: &str) -> FieldTypeExpr {
    field(n, tname("int"))
}

pub fn int_result() -> Vec<FieldTypeExpr> {
    vec![field("", tname("int"))]
}
