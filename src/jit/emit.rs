//! Expression to Cranelift IR emission.
//!
//! The emitter walks the typed AST and produces one Cranelift function per
//! `fn` expression, plus one zero-argument thunk per top-level form. Each
//! nested function is built with its own `FunctionBuilder`; every exit path
//! from a nested emission, success or error, returns to the enclosing
//! function's builder.
//!
//! Name resolution at emission time follows one rule: globals are always
//! read through a load of their data object, locals (parameters and named
//! functions) are used directly.

use cranelift_codegen::ir::{InstBuilder, MemFlags, UserFuncName, Value};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{FuncId, Linkage, Module};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::form::FormRef;

use super::session::{Session, StoredKind};

/// The result of emitting one expression. Function-typed results keep their
/// identity so invocations can be given a concrete callee and arity.
enum Emitted {
    /// An opaque form word.
    Value(Value),
    /// A function handle, called directly.
    Func {
        id: FuncId,
        arity: usize,
        form: FormRef,
    },
    /// A function pointer loaded from a global, called indirectly.
    LoadedFn {
        value: Value,
        arity: usize,
        form: FormRef,
    },
}

enum Local {
    /// A parameter of the function currently being emitted.
    Arg(Value),
    /// A named function, visible to its own body for self-recursion.
    Func {
        id: FuncId,
        arity: usize,
        form: FormRef,
    },
}

#[derive(Default)]
struct Frame {
    bindings: FxHashMap<FormRef, Local>,
}

/// A compiled top-level thunk. `tail_fn` is the defining source form when
/// the thunk's result is statically function-typed, so the driver can print
/// something meaningful instead of decoding a code address.
pub struct Thunk {
    pub(crate) id: FuncId,
    pub tail_fn: Option<FormRef>,
}

pub struct Emitter<'a> {
    session: &'a mut Session,
    /// Local environment stack, one frame per enclosing `fn`.
    frames: Vec<Frame>,
    /// Global kinds recorded by `def`s in this thunk; committed to the
    /// session only if the whole emission succeeds. A function kind is
    /// recorded only for defs in the thunk's own body, whose stores are
    /// guaranteed to run; defs nested inside constructed `fn` values are
    /// recorded as opaque forms.
    pending: FxHashMap<FormRef, StoredKind>,
}

impl<'a> Emitter<'a> {
    /// Compile one top-level thunk (the driver's `(fn () form)` wrapper).
    pub fn emit_thunk(session: &'a mut Session, expr: &Expr) -> Result<Thunk> {
        let mut emitter = Emitter {
            session,
            frames: Vec::new(),
            pending: FxHashMap::default(),
        };
        let (id, tail_fn) = match expr {
            Expr::Fn {
                name,
                params,
                body,
                form,
            } => emitter.emit_fn(*name, params, body, *form)?,
            _ => {
                return Err(Error::Fatal(
                    "top-level expression must be wrapped in a thunk".to_string(),
                ))
            }
        };
        let pending = std::mem::take(&mut emitter.pending);
        for (sym, kind) in pending {
            emitter.session.set_kind(sym, kind);
        }
        Ok(Thunk { id, tail_fn })
    }

    fn emit_fn(
        &mut self,
        name: Option<FormRef>,
        params: &[FormRef],
        body: &Expr,
        form: FormRef,
    ) -> Result<(FuncId, Option<FormRef>)> {
        let arity = params.len();
        let sig = self.session.fn_signature(arity);
        let fn_name = self.session.fresh_fn_name(name.and_then(|n| n.as_symbol()));
        let id = self
            .session
            .module
            .declare_function(&fn_name, Linkage::Local, &sig)
            .map_err(|e| Error::Fatal(format!("Could not declare {}: {}", fn_name, e)))?;

        let mut ctx = self.session.module.make_context();
        ctx.func.signature = sig;
        ctx.func.name = UserFuncName::user(0, id.as_u32());
        let mut fn_builder_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut fn_builder_ctx);

        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);

        let mut frame = Frame::default();
        if let Some(n) = name {
            frame.bindings.insert(n, Local::Func { id, arity, form });
        }
        let args: SmallVec<[Value; 4]> = builder.block_params(entry).iter().copied().collect();
        for (param, value) in params.iter().zip(args) {
            frame.bindings.insert(*param, Local::Arg(value));
        }

        // The frame must be popped on every exit path so the enclosing
        // function sees its own scope again. A failed body leaves the
        // declared function undefined, which keeps the module unchanged.
        self.frames.push(frame);
        let emitted = match self.emit_expr(&mut builder, body) {
            Ok(emitted) => emitted,
            Err(err) => {
                self.frames.pop();
                return Err(err);
            }
        };
        let tail_fn = match &emitted {
            Emitted::Func { form, .. } | Emitted::LoadedFn { form, .. } => Some(*form),
            Emitted::Value(_) => None,
        };
        let ret = self.to_value(&mut builder, &emitted);
        builder.ins().return_(&[ret]);
        builder.finalize();
        self.frames.pop();

        self.session
            .module
            .define_function(id, &mut ctx)
            .map_err(|e| Error::Fatal(format!("Function verification failed: {}", e)))?;
        self.session.note_compiled(&fn_name);
        Ok((id, tail_fn))
    }

    fn emit_expr(&mut self, builder: &mut FunctionBuilder, expr: &Expr) -> Result<Emitted> {
        match expr {
            Expr::Nil => Ok(Emitted::Value(
                builder.ins().iconst(self.session.ptr_type, 0),
            )),
            // A literal's runtime value is the heap address of the form the
            // reader allocated; quoting works the same way.
            Expr::Number(form) | Expr::Quote(form) => Ok(Emitted::Value(
                builder
                    .ins()
                    .iconst(self.session.ptr_type, form.addr() as i64),
            )),
            Expr::Symbol(sym) => self.emit_symbol(builder, *sym),
            Expr::Def { name, value } => self.emit_def(builder, *name, value),
            Expr::Fn {
                name,
                params,
                body,
                form,
            } => {
                let (id, _) = self.emit_fn(*name, params, body, *form)?;
                Ok(Emitted::Func {
                    id,
                    arity: params.len(),
                    form: *form,
                })
            }
            Expr::Do { statements, tail } => {
                for statement in statements {
                    self.emit_expr(builder, statement)?;
                }
                self.emit_expr(builder, tail)
            }
            Expr::Invoke { callee, args } => self.emit_invoke(builder, callee, args),
        }
    }

    fn emit_symbol(&mut self, builder: &mut FunctionBuilder, sym: FormRef) -> Result<Emitted> {
        let top = self.frames.len().saturating_sub(1);
        for (depth, frame) in self.frames.iter().enumerate().rev() {
            if let Some(local) = frame.bindings.get(&sym) {
                return match *local {
                    Local::Arg(value) if depth == top => Ok(Emitted::Value(value)),
                    // No closures: a parameter is only usable inside its own
                    // function.
                    Local::Arg(_) => Err(Error::Compile(format!(
                        "Cannot capture {} from an enclosing function",
                        sym
                    ))),
                    Local::Func { id, arity, form } => Ok(Emitted::Func { id, arity, form }),
                };
            }
        }

        if !self.session.defined.contains(&sym) {
            return Err(Error::Compile(format!("Undefined symbol: {}", sym)));
        }

        // Globals always through a load, so successive defs of the same name
        // compose.
        let kind = match self.pending.get(&sym) {
            Some(kind) => *kind,
            None => self.session.kind(sym),
        };
        let value = self.load_global(builder, sym)?;
        Ok(match kind {
            StoredKind::Form => Emitted::Value(value),
            StoredKind::Func { arity, form } => Emitted::LoadedFn { value, arity, form },
        })
    }

    fn emit_def(
        &mut self,
        builder: &mut FunctionBuilder,
        name: FormRef,
        value: &Expr,
    ) -> Result<Emitted> {
        let emitted = self.emit_expr(builder, value)?;
        let kind = match &emitted {
            Emitted::Func { arity, form, .. } | Emitted::LoadedFn { arity, form, .. } => {
                StoredKind::Func {
                    arity: *arity,
                    form: *form,
                }
            }
            Emitted::Value(_) => StoredKind::Form,
        };
        let raw = self.to_value(builder, &emitted);
        let addr = self.global_addr(builder, name)?;
        builder.ins().store(MemFlags::trusted(), raw, addr, 0);
        // Only a def in the thunk's own body is guaranteed to run when the
        // thunk does. A def inside a nested fn may never execute, so its
        // global must not be recorded as callable: later call sites would
        // otherwise emit an indirect call through a slot that still holds
        // the zero-initialized nil.
        let recorded = if self.frames.len() == 1 {
            kind
        } else {
            StoredKind::Form
        };
        self.pending.insert(name, recorded);
        Ok(emitted)
    }

    fn emit_invoke(
        &mut self,
        builder: &mut FunctionBuilder,
        callee: &Expr,
        args: &[Expr],
    ) -> Result<Emitted> {
        enum Callee {
            Direct(FuncId),
            Indirect(Value),
        }

        let (arity, target) = match self.emit_expr(builder, callee)? {
            Emitted::Func { id, arity, .. } => (arity, Callee::Direct(id)),
            Emitted::LoadedFn { value, arity, .. } => (arity, Callee::Indirect(value)),
            Emitted::Value(_) => {
                return Err(Error::Compile("Invalid function invocation".to_string()))
            }
        };
        if args.len() != arity {
            return Err(Error::Compile(format!(
                "Arity mismatch: expected {} arguments, got {}",
                arity,
                args.len()
            )));
        }

        let mut values: SmallVec<[Value; 4]> = SmallVec::with_capacity(args.len());
        for arg in args {
            let emitted = self.emit_expr(builder, arg)?;
            let value = self.to_value(builder, &emitted);
            values.push(value);
        }

        let call = match target {
            Callee::Direct(id) => {
                let func_ref = self.session.module.declare_func_in_func(id, builder.func);
                builder.ins().call(func_ref, &values)
            }
            Callee::Indirect(value) => {
                let sig = builder.import_signature(self.session.fn_signature(arity));
                builder.ins().call_indirect(sig, value, &values)
            }
        };
        Ok(Emitted::Value(builder.inst_results(call)[0]))
    }

    /// Address of the global slot backing a defined symbol.
    fn global_addr(&mut self, builder: &mut FunctionBuilder, sym: FormRef) -> Result<Value> {
        let data = self.session.slot(sym)?;
        let global = self.session.module.declare_data_in_func(data, builder.func);
        Ok(builder.ins().symbol_value(self.session.ptr_type, global))
    }

    fn load_global(&mut self, builder: &mut FunctionBuilder, sym: FormRef) -> Result<Value> {
        let addr = self.global_addr(builder, sym)?;
        Ok(builder
            .ins()
            .load(self.session.ptr_type, MemFlags::trusted(), addr, 0))
    }

    /// Collapse to the unified opaque representation: a function handle
    /// becomes its code address.
    fn to_value(&mut self, builder: &mut FunctionBuilder, emitted: &Emitted) -> Value {
        match emitted {
            Emitted::Value(value) | Emitted::LoadedFn { value, .. } => *value,
            Emitted::Func { id, .. } => {
                let func_ref = self.session.module.declare_func_in_func(*id, builder.func);
                builder.ins().func_addr(self.session.ptr_type, func_ref)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Analyzer;
    use crate::form::{self, FormRef};
    use crate::reader::read_str;

    fn eval(session: &mut Session, src: &str) -> Result<usize> {
        let form = read_str(src).unwrap();
        let wrapped = form::list(&[form::intern("fn"), FormRef::NIL, form]);
        let expr = Analyzer::new(&mut session.defined).analyze(wrapped)?;
        let thunk = Emitter::emit_thunk(session, &expr)?;
        session.finalize()?;
        let ptr = session.materialize(thunk.id);
        let entry: unsafe extern "C" fn() -> usize = unsafe { std::mem::transmute(ptr) };
        Ok(unsafe { entry() })
    }

    #[test]
    fn compiles_a_literal() {
        let mut session = Session::new().unwrap();
        let bits = eval(&mut session, "42").unwrap();
        assert_eq!(form::from_bits(bits).unwrap().to_string(), "42");
    }

    #[test]
    fn nil_compiles_to_the_null_word() {
        let mut session = Session::new().unwrap();
        assert_eq!(eval(&mut session, "()").unwrap(), 0);
    }

    #[test]
    fn quote_returns_the_original_form() {
        let mut session = Session::new().unwrap();
        let bits = eval(&mut session, "(quote (a b c))").unwrap();
        assert_eq!(form::from_bits(bits).unwrap().to_string(), "(a b c)");
    }

    #[test]
    fn identity_function_returns_its_argument() {
        let mut session = Session::new().unwrap();
        let bits = eval(&mut session, "((fn (x) x) (quote hello))").unwrap();
        assert_eq!(form::from_bits(bits).unwrap(), form::intern("hello"));
    }

    #[test]
    fn do_returns_the_tail_value() {
        let mut session = Session::new().unwrap();
        let bits = eval(&mut session, "(do 1 2 3)").unwrap();
        assert_eq!(form::from_bits(bits).unwrap().to_string(), "3");
    }

    #[test]
    fn def_then_reference_observes_the_store() {
        let mut session = Session::new().unwrap();
        eval(&mut session, "(def x 42)").unwrap();
        let bits = eval(&mut session, "x").unwrap();
        assert_eq!(form::from_bits(bits).unwrap().to_string(), "42");
    }

    #[test]
    fn redefinition_shadows_the_old_binding() {
        let mut session = Session::new().unwrap();
        eval(&mut session, "(def x 1)").unwrap();
        eval(&mut session, "(def x 2)").unwrap();
        let bits = eval(&mut session, "x").unwrap();
        assert_eq!(form::from_bits(bits).unwrap().to_string(), "2");
    }

    #[test]
    fn calls_through_a_global_binding() {
        let mut session = Session::new().unwrap();
        eval(&mut session, "(def id (fn (x) x))").unwrap();
        let bits = eval(&mut session, "(id (quote y))").unwrap();
        assert_eq!(form::from_bits(bits).unwrap(), form::intern("y"));
    }

    #[test]
    fn named_fn_can_refer_to_itself() {
        let mut session = Session::new().unwrap();
        eval(&mut session, "(def k (fn self (n) (quote ok)))").unwrap();
        let bits = eval(&mut session, "(k 0)").unwrap();
        assert_eq!(form::from_bits(bits).unwrap(), form::intern("ok"));
    }

    #[test]
    fn failed_emission_defines_no_functions() {
        let mut session = Session::new().unwrap();
        let before = session.functions().len();
        assert!(eval(&mut session, "((fn (x) (1 2)) 3)").is_err());
        assert_eq!(session.functions().len(), before);
    }

    #[test]
    fn arity_is_checked_against_the_callee() {
        let mut session = Session::new().unwrap();
        eval(&mut session, "(def id (fn (x) x))").unwrap();
        let err = eval(&mut session, "(id 1 2)").unwrap_err();
        assert!(matches!(err, Error::Compile(msg) if msg.starts_with("Arity mismatch")));
    }

    #[test]
    fn non_callable_callee_is_rejected() {
        let mut session = Session::new().unwrap();
        let err = eval(&mut session, "(1 2 3)").unwrap_err();
        assert!(matches!(err, Error::Compile(msg) if msg == "Invalid function invocation"));
    }

    #[test]
    fn enclosing_parameters_cannot_be_captured() {
        let mut session = Session::new().unwrap();
        let err = eval(&mut session, "(fn (x) ((fn (y) x) 1))").unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn def_before_store_reads_as_nil() {
        let mut session = Session::new().unwrap();
        // `y` is registered during analysis but the store never runs because
        // the thunk fails to compile.
        assert!(eval(&mut session, "(do (def y 1) (1 2))").is_err());
        assert_eq!(eval(&mut session, "y").unwrap(), 0);
    }

    #[test]
    fn def_inside_an_uninvoked_fn_is_not_callable() {
        let mut session = Session::new().unwrap();
        // The inner fn is constructed as a value but never called, so the
        // nested def's store never runs and `w` stays nil.
        let bits = eval(&mut session, "(do (fn () (def w (fn (a) a))) 0)").unwrap();
        assert_eq!(form::from_bits(bits).unwrap().to_string(), "0");
        assert_eq!(eval(&mut session, "w").unwrap(), 0);
        let err = eval(&mut session, "(w 5)").unwrap_err();
        assert!(matches!(err, Error::Compile(msg) if msg == "Invalid function invocation"));
    }

    #[test]
    fn def_inside_an_invoked_fn_stores_its_value() {
        let mut session = Session::new().unwrap();
        eval(&mut session, "((fn () (def v 7)))").unwrap();
        let bits = eval(&mut session, "v").unwrap();
        assert_eq!(form::from_bits(bits).unwrap().to_string(), "7");
    }
}
