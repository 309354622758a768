//! Symbol interning.
//!
//! Symbols compare by pointer identity, so every name must map to exactly
//! one heap allocation. The interner is process-global state; interned
//! symbols are never dropped.

use std::cell::RefCell;

use rustc_hash::FxHashMap;

use super::{alloc, Form, FormRef};

thread_local! {
    static SYMBOLS: RefCell<FxHashMap<Box<str>, FormRef>> =
        RefCell::new(FxHashMap::default());
}

/// Intern a symbol. Idempotent: the same name always yields the same form.
pub fn intern(name: &str) -> FormRef {
    SYMBOLS.with(|symbols| {
        let mut map = symbols.borrow_mut();
        if let Some(&sym) = map.get(name) {
            return sym;
        }
        let sym = alloc(Form::Symbol(name.into()));
        map.insert(name.into(), sym);
        sym
    })
}
