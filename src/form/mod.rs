//! The dynamic value model: tagged forms identified by their heap address.
//!
//! Every value the language can see is a `Form`: a symbol, a pair, or a
//! boxed number. Forms are allocated once and live for the rest of the
//! process, because the JIT embeds their addresses as constants in emitted
//! code. `FormRef` is the universal handle: a copyable pointer whose null
//! value is nil. The allocator records every live address so that a raw
//! word returned from compiled code can be decoded without trusting it.

mod display;
mod intern;

pub use intern::intern;

use std::cell::RefCell;

use rustc_hash::FxHashSet;

/// A heap-allocated form. The kind of a form never changes, and pairs are
/// immutable once the reader has published them.
#[derive(Debug)]
pub enum Form {
    Symbol(Box<str>),
    Pair(FormRef, FormRef),
    Int(i64),
    Float(f64),
}

/// Handle to a form; the representation is the form's heap address and the
/// null handle is nil. Compiled code traffics in these same addresses.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormRef(*const Form);

thread_local! {
    /// Addresses of every form allocated on this thread. Used to validate
    /// words handed back by compiled code before treating them as forms.
    static HEAP: RefCell<FxHashSet<usize>> = RefCell::new(FxHashSet::default());
}

pub(crate) fn alloc(form: Form) -> FormRef {
    let leaked: &'static Form = Box::leak(Box::new(form));
    let addr = leaked as *const Form as usize;
    HEAP.with(|heap| heap.borrow_mut().insert(addr));
    FormRef(leaked)
}

/// Decode a word returned from compiled code. Zero is nil; any other value
/// must be the address of a live form.
pub fn from_bits(bits: usize) -> Option<FormRef> {
    if bits == 0 {
        return Some(FormRef::NIL);
    }
    HEAP.with(|heap| {
        if heap.borrow().contains(&bits) {
            Some(FormRef(bits as *const Form))
        } else {
            None
        }
    })
}

impl FormRef {
    pub const NIL: FormRef = FormRef(std::ptr::null());

    pub fn is_nil(self) -> bool {
        self.0.is_null()
    }

    /// The heap address, as embedded in emitted code. Nil is zero.
    pub fn addr(self) -> usize {
        self.0 as usize
    }

    pub fn get(self) -> Option<&'static Form> {
        // Sound: forms are only created by `alloc`, which leaks them.
        unsafe { self.0.as_ref() }
    }

    pub fn as_symbol(self) -> Option<&'static str> {
        match self.get() {
            Some(Form::Symbol(name)) => Some(&**name),
            _ => None,
        }
    }

    pub fn as_pair(self) -> Option<(FormRef, FormRef)> {
        match self.get() {
            Some(Form::Pair(car, cdr)) => Some((*car, *cdr)),
            _ => None,
        }
    }

    pub fn is_number(self) -> bool {
        matches!(self.get(), Some(Form::Int(_)) | Some(Form::Float(_)))
    }

    /// Iterate the elements of a list; stops at nil or at an improper tail.
    pub fn iter(self) -> ListIter {
        ListIter(self)
    }
}

pub struct ListIter(FormRef);

impl Iterator for ListIter {
    type Item = FormRef;

    fn next(&mut self) -> Option<FormRef> {
        let (car, cdr) = self.0.as_pair()?;
        self.0 = cdr;
        Some(car)
    }
}

pub fn cons(car: FormRef, cdr: FormRef) -> FormRef {
    alloc(Form::Pair(car, cdr))
}

pub fn int_of(value: i64) -> FormRef {
    alloc(Form::Int(value))
}

pub fn float_of(value: f64) -> FormRef {
    alloc(Form::Float(value))
}

/// Build a proper list from the given elements.
pub fn list(items: &[FormRef]) -> FormRef {
    let mut tail = FormRef::NIL;
    for item in items.iter().rev() {
        tail = cons(*item, tail);
    }
    tail
}

/// Number of elements reached by walking cdr. Undefined on cyclic input,
/// which the reader never produces.
pub fn count(form: FormRef) -> usize {
    form.iter().count()
}

/// True iff the form is nil or a proper list (a pair chain ending in nil).
pub fn listp(form: FormRef) -> bool {
    let mut cur = form;
    loop {
        if cur.is_nil() {
            return true;
        }
        match cur.as_pair() {
            Some((_, cdr)) => cur = cdr,
            None => return false,
        }
    }
}

/// Structural equality; symbols compare by identity.
pub fn equal(a: FormRef, b: FormRef) -> bool {
    if a == b {
        return true;
    }
    match (a.get(), b.get()) {
        (Some(Form::Pair(a1, a2)), Some(Form::Pair(b1, b2))) => {
            equal(*a1, *b1) && equal(*a2, *b2)
        }
        (Some(Form::Int(x)), Some(Form::Int(y))) => x == y,
        (Some(Form::Float(x)), Some(Form::Float(y))) => x == y,
        // Symbols are interned, so pointer inequality means different names.
        _ => false,
    }
}
