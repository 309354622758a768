//! Printing, the inverse of the reader on well-formed input.

use std::fmt;

use super::{Form, FormRef};

impl fmt::Display for FormRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            None => write!(f, "()"),
            Some(Form::Pair(car, cdr)) => {
                write!(f, "(")?;
                fmt_list(f, *car, *cdr)?;
                write!(f, ")")
            }
            Some(Form::Symbol(name)) => write!(f, "{}", name),
            Some(Form::Int(n)) => write!(f, "{}", n),
            Some(Form::Float(x)) => {
                // An integral float must not re-read as an Int.
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
        }
    }
}

fn fmt_list(f: &mut fmt::Formatter<'_>, car: FormRef, cdr: FormRef) -> fmt::Result {
    write!(f, "{}", car)?;
    match cdr.get() {
        None => Ok(()),
        Some(Form::Pair(next_car, next_cdr)) => {
            write!(f, " ")?;
            fmt_list(f, *next_car, *next_cdr)
        }
        Some(_) => write!(f, " . {}", cdr),
    }
}

impl fmt::Debug for FormRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
