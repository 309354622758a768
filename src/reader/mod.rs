//! Stream-driven recursive-descent reader producing the form graph.
//!
//! Tokens are whitespace-delimited, `,` counts as whitespace, and `;` starts
//! a comment running to end of line. Structural characters are `(`, `)`,
//! `.`, and `'`. A quoted form `'x` desugars to `(quote x)`. Numbers follow
//! the C-style literal rules: `0x` is hexadecimal, a leading `0` followed by
//! digits is octal, and a `.` inside the token makes a float.

mod stream;

pub use stream::CharStream;

use std::io::BufRead;

use crate::error::{Error, Result};
use crate::form::{self, FormRef};

fn is_whitespace(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte == b','
}

fn is_symbol_char(byte: u8) -> bool {
    !is_whitespace(byte) && !matches!(byte, b'(' | b')' | b'.' | b'\'' | b';')
}

/// Skip whitespace and comments.
fn skip_whitespace<R: BufRead>(input: &mut CharStream<R>) -> Result<()> {
    while let Some(byte) = input.get()? {
        if is_whitespace(byte) {
            continue;
        }
        if byte == b';' {
            drain_line(input)?;
            continue;
        }
        input.unget(byte);
        break;
    }
    Ok(())
}

/// Discard input through the next newline (or end of input).
pub fn drain_line<R: BufRead>(input: &mut CharStream<R>) -> Result<()> {
    while let Some(byte) = input.get()? {
        if byte == b'\n' {
            break;
        }
    }
    Ok(())
}

/// Require only whitespace or a comment up to end of line. On trailing junk
/// the rest of the line is drained and a reader error is returned.
pub fn expect_line_end<R: BufRead>(input: &mut CharStream<R>) -> Result<()> {
    while let Some(byte) = input.get()? {
        if byte == b'\n' {
            return Ok(());
        }
        if is_whitespace(byte) {
            continue;
        }
        if byte == b';' {
            return drain_line(input);
        }
        let mut extra = vec![byte];
        while let Some(b) = input.get()? {
            if is_whitespace(b) || b == b'\n' {
                input.unget(b);
                break;
            }
            extra.push(b);
        }
        drain_line(input)?;
        return Err(Error::Reader(format!(
            "Extraneous input: {}",
            String::from_utf8_lossy(&extra)
        )));
    }
    Ok(())
}

/// Read one form. `None` means the input ended before any form began; end of
/// input inside a form is a reader error.
pub fn read_form<R: BufRead>(input: &mut CharStream<R>) -> Result<Option<FormRef>> {
    skip_whitespace(input)?;
    let byte = match input.get()? {
        Some(b) => b,
        None => return Ok(None),
    };

    if byte.is_ascii_digit() {
        input.unget(byte);
        return read_number(input, None).map(Some);
    }
    if byte == b'-' || byte == b'+' {
        return match input.peek()? {
            Some(next) if next.is_ascii_digit() => read_number(input, Some(byte)).map(Some),
            _ => read_symbol(input, Some(byte)).map(Some),
        };
    }
    if byte == b'(' {
        return read_list(input).map(Some);
    }
    if byte == b'\'' {
        let quoted = read_form(input)?
            .ok_or_else(|| Error::Reader("Unexpected end of input after '".to_string()))?;
        return Ok(Some(form::list(&[form::intern("quote"), quoted])));
    }
    if is_symbol_char(byte) {
        input.unget(byte);
        return read_symbol(input, None).map(Some);
    }

    // Anything else at form entry is an error carrying the offending text.
    let mut extra = vec![byte];
    while let Some(b) = input.get()? {
        if is_whitespace(b) {
            break;
        }
        extra.push(b);
    }
    Err(Error::Reader(format!(
        "Extraneous input: {}",
        String::from_utf8_lossy(&extra)
    )))
}

fn read_list<R: BufRead>(input: &mut CharStream<R>) -> Result<FormRef> {
    skip_whitespace(input)?;
    let byte = input
        .get()?
        .ok_or_else(|| Error::Reader("Unterminated list".to_string()))?;
    if byte == b')' {
        return Ok(FormRef::NIL);
    }
    input.unget(byte);
    let car = read_form(input)?
        .ok_or_else(|| Error::Reader("Unterminated list".to_string()))?;

    skip_whitespace(input)?;
    let byte = input
        .get()?
        .ok_or_else(|| Error::Reader("Unterminated list".to_string()))?;
    let cdr = if byte == b'.' {
        let tail = read_form(input)?
            .ok_or_else(|| Error::Reader("Unterminated list".to_string()))?;
        skip_whitespace(input)?;
        match input.get()? {
            Some(b')') => tail,
            _ => {
                return Err(Error::Reader(
                    "only one element may succeed '.' in an irregular list".to_string(),
                ))
            }
        }
    } else {
        input.unget(byte);
        read_list(input)?
    };

    Ok(form::cons(car, cdr))
}

fn read_number<R: BufRead>(input: &mut CharStream<R>, sign: Option<u8>) -> Result<FormRef> {
    let mut token = Vec::new();
    if let Some(s) = sign {
        token.push(s);
    }
    while let Some(byte) = input.get()? {
        if is_symbol_char(byte) || byte == b'.' {
            token.push(byte);
        } else {
            input.unget(byte);
            break;
        }
    }
    let token = String::from_utf8_lossy(&token).into_owned();
    parse_number(&token)
}

fn parse_number(token: &str) -> Result<FormRef> {
    let bad = || Error::Reader(format!("Invalid number format: {}", token));

    let (negative, digits) = match token.as_bytes().first() {
        Some(b'-') => (true, &token[1..]),
        Some(b'+') => (false, &token[1..]),
        _ => (false, token),
    };

    if digits == "0" {
        return Ok(form::int_of(0));
    }
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        let value = i64::from_str_radix(hex, 16).map_err(|_| bad())?;
        return Ok(form::int_of(if negative { -value } else { value }));
    }
    if digits.starts_with('0') && !digits[1..].starts_with('.') {
        let value = i64::from_str_radix(&digits[1..], 8).map_err(|_| bad())?;
        return Ok(form::int_of(if negative { -value } else { value }));
    }
    if digits.contains('.') {
        let value: f64 = digits.parse().map_err(|_| bad())?;
        return Ok(form::float_of(if negative { -value } else { value }));
    }
    let value: i64 = digits.parse().map_err(|_| bad())?;
    Ok(form::int_of(if negative { -value } else { value }))
}

fn read_symbol<R: BufRead>(input: &mut CharStream<R>, first: Option<u8>) -> Result<FormRef> {
    let mut name = Vec::new();
    if let Some(b) = first {
        name.push(b);
    }
    while let Some(byte) = input.get()? {
        if is_symbol_char(byte) {
            name.push(byte);
        } else {
            input.unget(byte);
            break;
        }
    }
    let name = String::from_utf8(name)
        .map_err(|_| Error::Reader("Invalid UTF-8 in symbol".to_string()))?;
    Ok(form::intern(&name))
}

/// Read a single form from a string. Main entry point for tests.
pub fn read_str(input: &str) -> Result<FormRef> {
    let mut stream = CharStream::new(input.as_bytes());
    read_form(&mut stream)?.ok_or_else(|| Error::Reader("No input".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{equal, intern, Form};

    #[test]
    fn reads_integers_in_all_bases() {
        assert!(matches!(read_str("42").unwrap().get(), Some(Form::Int(42))));
        assert!(matches!(read_str("0").unwrap().get(), Some(Form::Int(0))));
        assert!(matches!(
            read_str("0x1F").unwrap().get(),
            Some(Form::Int(31))
        ));
        assert!(matches!(read_str("017").unwrap().get(), Some(Form::Int(15))));
        assert!(matches!(
            read_str("-42").unwrap().get(),
            Some(Form::Int(-42))
        ));
        assert!(matches!(read_str("+7").unwrap().get(), Some(Form::Int(7))));
    }

    #[test]
    fn reads_floats() {
        assert!(matches!(
            read_str("1.5").unwrap().get(),
            Some(Form::Float(x)) if *x == 1.5
        ));
        assert!(matches!(
            read_str("0.25").unwrap().get(),
            Some(Form::Float(x)) if *x == 0.25
        ));
        assert!(matches!(
            read_str("-2.0").unwrap().get(),
            Some(Form::Float(x)) if *x == -2.0
        ));
    }

    #[test]
    fn sign_without_digit_is_a_symbol() {
        assert_eq!(read_str("-").unwrap(), intern("-"));
        assert_eq!(read_str("+x").unwrap(), intern("+x"));
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(matches!(read_str("0x"), Err(Error::Reader(_))));
        assert!(matches!(read_str("09"), Err(Error::Reader(_))));
        assert!(matches!(read_str("12ab"), Err(Error::Reader(_))));
        assert!(matches!(read_str("1.2.3"), Err(Error::Reader(_))));
    }

    #[test]
    fn reads_lists_and_nesting() {
        let f = read_str("(a (b c) d)").unwrap();
        assert_eq!(f.to_string(), "(a (b c) d)");
        assert_eq!(read_str("()").unwrap(), FormRef::NIL);
    }

    #[test]
    fn reads_dotted_pairs() {
        assert_eq!(read_str("(a . b)").unwrap().to_string(), "(a . b)");
        assert!(matches!(read_str("(a . b c)"), Err(Error::Reader(_))));
    }

    #[test]
    fn quote_desugars() {
        let f = read_str("'foo").unwrap();
        assert!(equal(f, crate::form::list(&[intern("quote"), intern("foo")])));
    }

    #[test]
    fn comma_is_whitespace() {
        let f = read_str("(1, 2, 3)").unwrap();
        assert_eq!(f.to_string(), "(1 2 3)");
    }

    #[test]
    fn comments_are_skipped() {
        let f = read_str("; heading\n(a b) ; tail").unwrap();
        assert_eq!(f.to_string(), "(a b)");
    }

    #[test]
    fn unterminated_list_is_an_error() {
        assert!(matches!(read_str("(a b"), Err(Error::Reader(_))));
    }

    #[test]
    fn stray_close_paren_is_extraneous() {
        match read_str(")") {
            Err(Error::Reader(msg)) => assert!(msg.starts_with("Extraneous input")),
            other => panic!("expected reader error, got {:?}", other),
        }
    }
}
