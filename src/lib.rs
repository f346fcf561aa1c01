//! # Microprolog
//!
//! A small, embeddable Prolog resolution engine.
//!
//! ## Features
//!
//! - Standard Prolog syntax with the ISO operator table
//! - SLD resolution with cut, if-then-else, negation and `findall/3`
//! - Modules, first-argument indexing and dynamic predicates
//! - Integer and float arithmetic
//! - A library of list and control predicates
//! - Heap, stack and inference budgets per query
//!
//! ## Example
//!
//! ```rust
//! use microprolog::{Machine, Solution};
//!
//! let mut machine = Machine::new(None, None);
//! machine
//!     .consult_module_string(
//!         "user",
//!         "parent(tom, bob). parent(bob, ann).
//!          ancestor(X, Y) :- parent(X, Y).
//!          ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).",
//!     )
//!     .unwrap();
//!
//! let names: Vec<String> = machine
//!     .run_query("ancestor(tom, X)")
//!     .unwrap()
//!     .map(|solution| solution.unwrap().get("X").unwrap().to_string())
//!     .collect();
//! assert_eq!(names, ["bob", "ann"]);
//!
//! let mut session = machine.run_query("parent(tom, bob)").unwrap();
//! assert_eq!(session.next().unwrap(), Some(Solution::True));
//! ```

mod arith;
mod atom;
mod builtins;
mod database;
mod engine;
mod error;
mod heap;
mod machine;
mod ops;
mod parser;
mod session;
mod store;
mod term;
mod unify;

#[cfg(feature = "async")]
mod stream;

pub use error::{Error, EvaluationError, ParseError, Resource, Result};
pub use machine::{Machine, MachineConfig};
pub use session::{QuerySession, Solution};
pub use term::{Term, TermType};
