//! JIT compilation of analyzed expressions via Cranelift.
//!
//! ## Architecture
//!
//! ```text
//! Expr -> Emitter -> Cranelift IR -> JITModule -> native fn ptr
//! ```
//!
//! Every compiled expression produces a pointer-sized value holding a form's
//! heap address; nil is the null pointer. Functions take and return opaque
//! form words, so the whole language shares a single signature shape and
//! only arity varies.
//!
//! The [`Session`] owns the module, the global environment, and the
//! finalization state for the lifetime of the REPL. The [`Emitter`] borrows
//! it to compile one top-level thunk at a time.

mod emit;
mod session;

pub use emit::{Emitter, Thunk};
pub use session::Session;
