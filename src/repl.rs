//! The read-eval-print loop.
//!
//! Each iteration reads one form, wraps it in a synthetic `(fn () form)`
//! thunk, compiles the thunk into the session's module, invokes the
//! materialized code, and prints the resulting form. Reader and compile
//! errors are reported to the error stream and the loop resumes; fatal
//! errors propagate to the caller.

use std::io::{BufRead, Write};

use tracing::debug;

use crate::error::{Error, Result};
use crate::expr::Analyzer;
use crate::form::{self, FormRef};
use crate::jit::{Emitter, Session};
use crate::reader::{self, CharStream};

const PROMPT: &[u8] = b"> ";

/// Drive a full REPL session over the given streams. Returns on clean end
/// of input; only fatal errors surface as `Err`.
pub fn run<R, W, E>(input: R, mut out: W, mut err: E) -> Result<()>
where
    R: BufRead,
    W: Write,
    E: Write,
{
    let mut session = Session::new()?;
    let mut stream = CharStream::new(input);

    loop {
        out.write_all(PROMPT)?;
        out.flush()?;

        let form = match reader::read_form(&mut stream) {
            Ok(Some(form)) => form,
            Ok(None) => break,
            Err(error) => {
                report(&mut err, &error)?;
                reader::drain_line(&mut stream)?;
                continue;
            }
        };
        if let Err(error) = reader::expect_line_end(&mut stream) {
            // The offending line is already drained.
            report(&mut err, &error)?;
            continue;
        }

        match eval(&mut session, form) {
            Ok(result) => writeln!(out, "{}", result)?,
            Err(error @ Error::Fatal(_)) => return Err(error),
            Err(error) => report(&mut err, &error)?,
        }
    }
    Ok(())
}

fn report<E: Write>(err: &mut E, error: &Error) -> Result<()> {
    writeln!(err, "ERROR: {}", error)?;
    err.flush()?;
    Ok(())
}

/// Compile, invoke, and print one top-level form.
pub fn eval(session: &mut Session, form: FormRef) -> Result<String> {
    debug!(%form, "evaluating");
    let wrapped = form::list(&[form::intern("fn"), FormRef::NIL, form]);
    let expr = Analyzer::new(&mut session.defined).analyze(wrapped)?;
    let thunk = Emitter::emit_thunk(session, &expr)?;
    session.finalize()?;

    let entry: unsafe extern "C" fn() -> usize =
        unsafe { std::mem::transmute(session.materialize(thunk.id)) };
    let bits = unsafe { entry() };

    // A function result is a code address; print its defining form rather
    // than decoding the address as a form.
    if let Some(source) = thunk.tail_fn {
        return Ok(source.to_string());
    }
    match form::from_bits(bits) {
        Some(result) => Ok(result.to_string()),
        None => Err(Error::Type(format!("Unknown form type: {:#x}", bits))),
    }
}
