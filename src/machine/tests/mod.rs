//! Tests for the machine
//!
//! Organized by feature area

mod basic_tests;
mod defer_tests;
mod helpers;
mod machine_tests;
mod realm_tests;
mod value_tests;
