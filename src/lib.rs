//! # Wombat — a JIT-compiled Lisp REPL
//!
//! Wombat reads S-expressions from a stream, parses each into a heap-
//! allocated form graph, analyzes the graph into a typed expression AST,
//! lowers the AST to Cranelift IR, JIT-compiles the resulting function,
//! invokes it natively, and prints the returned value.
//!
//! ## Quick start
//!
//! ```no_run
//! use wombat::{repl, Session};
//!
//! let mut session = Session::new().unwrap();
//! let form = wombat::reader::read_str("(quote (a b c))").unwrap();
//! let printed = repl::eval(&mut session, form).unwrap();
//! assert_eq!(printed, "(a b c)");
//! ```
//!
//! ## Architecture
//!
//! 1. **Reader** - recursive descent over a peek/get/unget byte stream
//! 2. **Analyzer** - special-form dispatch and lexical resolution
//! 3. **Emitter** - single-pass Cranelift IR emission
//! 4. **Driver** - one fresh zero-argument thunk per top-level form
//!
//! Every runtime value is the address of a live form; nil is the null
//! pointer. Functions take and return opaque form words, so signatures
//! differ only in arity.

pub mod error;
pub mod expr;
pub mod form;
pub mod jit;
pub mod reader;
pub mod repl;

pub use error::{Error, Result};
pub use expr::{Analyzer, Expr};
pub use form::{cons, equal, intern, listp, Form, FormRef};
pub use jit::Session;
