//! Form graph to typed AST analysis.
//!
//! Dispatches on the head of each list to the special-form analyzers,
//! validates shapes, and resolves every symbol against the lexical scope
//! stack and the session's global definitions. All resolution errors are
//! raised here, before any IR exists.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::form::{listp, Form, FormRef};

use super::Expr;

/// Names that dispatch to special forms and can never be bound.
const RESERVED: [&str; 4] = ["def", "quote", "fn", "do"];

fn is_reserved(sym: FormRef) -> bool {
    matches!(sym.as_symbol(), Some(name) if RESERVED.contains(&name))
}

pub struct Analyzer<'a> {
    /// Symbols registered by `def`, shared with the JIT session. Analyzing a
    /// `def` adds its name here so later references resolve.
    globals: &'a mut FxHashSet<FormRef>,
    /// Lexical scopes; one frame per enclosing `fn`.
    scopes: Vec<FxHashSet<FormRef>>,
}

impl<'a> Analyzer<'a> {
    pub fn new(globals: &'a mut FxHashSet<FormRef>) -> Self {
        Analyzer {
            globals,
            scopes: Vec::new(),
        }
    }

    pub fn analyze(&mut self, form: FormRef) -> Result<Expr> {
        match form.get() {
            None => Ok(Expr::Nil),
            Some(Form::Int(_)) | Some(Form::Float(_)) => Ok(Expr::Number(form)),
            Some(Form::Symbol(_)) => self.analyze_symbol(form),
            Some(Form::Pair(..)) => self.analyze_list(form),
        }
    }

    fn analyze_symbol(&mut self, sym: FormRef) -> Result<Expr> {
        let resolved = self.scopes.iter().rev().any(|scope| scope.contains(&sym))
            || self.globals.contains(&sym);
        if !resolved {
            return Err(Error::Compile(format!(
                "Undefined symbol: {}",
                sym.as_symbol().unwrap_or("?")
            )));
        }
        Ok(Expr::Symbol(sym))
    }

    fn analyze_list(&mut self, form: FormRef) -> Result<Expr> {
        if !listp(form) {
            return Err(Error::Compile(format!("Cannot parse form: {}", form)));
        }
        let elems: Vec<FormRef> = form.iter().collect();
        match elems[0].as_symbol() {
            Some("def") => self.analyze_def(&elems),
            Some("quote") => self.analyze_quote(&elems),
            Some("fn") => self.analyze_fn(form, &elems),
            Some("do") => self.analyze_body(&elems[1..]),
            _ => self.analyze_invoke(&elems),
        }
    }

    fn analyze_def(&mut self, elems: &[FormRef]) -> Result<Expr> {
        if elems.len() != 2 && elems.len() != 3 {
            return Err(Error::Compile(
                "def takes a name and an optional value".to_string(),
            ));
        }
        let name = elems[1];
        if name.as_symbol().is_none() {
            return Err(Error::Compile("def must bind to a symbol".to_string()));
        }
        if is_reserved(name) {
            return Err(Error::Compile(format!(
                "Cannot bind reserved name: {}",
                name
            )));
        }
        // Register before analyzing the value so the definition can refer to
        // itself through the global.
        self.globals.insert(name);
        let value = match elems.get(2) {
            Some(form) => self.analyze(*form)?,
            None => Expr::Nil,
        };
        Ok(Expr::Def {
            name,
            value: Box::new(value),
        })
    }

    fn analyze_quote(&mut self, elems: &[FormRef]) -> Result<Expr> {
        if elems.len() != 2 {
            return Err(Error::Compile("quote takes exactly one form".to_string()));
        }
        Ok(Expr::Quote(elems[1]))
    }

    fn analyze_fn(&mut self, form: FormRef, elems: &[FormRef]) -> Result<Expr> {
        let mut rest = &elems[1..];
        let name = match rest.first() {
            Some(first) if first.as_symbol().is_some() => {
                let name = *first;
                if is_reserved(name) {
                    return Err(Error::Compile(format!(
                        "Cannot bind reserved name: {}",
                        name
                    )));
                }
                rest = &rest[1..];
                Some(name)
            }
            _ => None,
        };

        let params_form = match rest.first() {
            Some(p) if listp(*p) => *p,
            _ => {
                return Err(Error::Compile(
                    "Function arguments must be a list".to_string(),
                ))
            }
        };
        let mut params: SmallVec<[FormRef; 4]> = SmallVec::new();
        for param in params_form.iter() {
            if param.as_symbol().is_none() {
                return Err(Error::Compile(
                    "Function arguments must be symbols".to_string(),
                ));
            }
            if is_reserved(param) {
                return Err(Error::Compile(format!(
                    "Cannot bind reserved name: {}",
                    param
                )));
            }
            if params.contains(&param) {
                return Err(Error::Compile(format!(
                    "Duplicate function argument: {}",
                    param
                )));
            }
            params.push(param);
        }

        let mut scope: FxHashSet<FormRef> = params.iter().copied().collect();
        if let Some(n) = name {
            scope.insert(n);
        }
        self.scopes.push(scope);
        let body = self.analyze_body(&rest[1..]);
        self.scopes.pop();

        Ok(Expr::Fn {
            name,
            params,
            body: Box::new(body?),
            form,
        })
    }

    /// A sequence in statement context with the last form in tail position;
    /// an empty body tails to nil.
    fn analyze_body(&mut self, forms: &[FormRef]) -> Result<Expr> {
        let mut statements = Vec::new();
        let mut tail = Expr::Nil;
        if let Some((last, init)) = forms.split_last() {
            for form in init {
                statements.push(self.analyze(*form)?);
            }
            tail = self.analyze(*last)?;
        }
        Ok(Expr::Do {
            statements,
            tail: Box::new(tail),
        })
    }

    fn analyze_invoke(&mut self, elems: &[FormRef]) -> Result<Expr> {
        let callee = self.analyze(elems[0])?;
        let mut args = Vec::with_capacity(elems.len() - 1);
        for arg in &elems[1..] {
            args.push(self.analyze(*arg)?);
        }
        Ok(Expr::Invoke {
            callee: Box::new(callee),
            args,
        })
    }
}
