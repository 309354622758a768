//! The JIT session: module, global environment, and materialization.

use cranelift_codegen::ir::{AbiParam, Signature, Type};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::form::FormRef;

/// What a global slot was last known to hold. Tracked at emission time so
/// invocations through a global can be given a concrete signature.
#[derive(Debug, Clone, Copy)]
pub(crate) enum StoredKind {
    /// An opaque form word.
    Form,
    /// A function of known arity; `form` is its defining source form.
    Func { arity: usize, form: FormRef },
}

/// One global binding: a writable pointer-sized data object plus the kind of
/// value last stored into it.
pub(crate) struct GlobalSlot {
    pub data: DataId,
    pub kind: StoredKind,
}

/// Owns the Cranelift module and all state that lives as long as the REPL:
/// the set of defined global names (shared with the analyzer), the global
/// environment (shared with the emitter), and the name counters.
pub struct Session {
    pub(crate) module: JITModule,
    pub(crate) ptr_type: Type,
    /// Symbols registered by `def` during analysis.
    pub defined: FxHashSet<FormRef>,
    slots: FxHashMap<FormRef, GlobalSlot>,
    compiled: Vec<String>,
    fn_counter: u32,
}

impl Session {
    pub fn new() -> Result<Self> {
        let mut flag_builder = settings::builder();
        for (flag, value) in [
            ("use_colocated_libcalls", "false"),
            ("is_pic", "false"),
            ("opt_level", "speed"),
            ("enable_verifier", "true"),
        ] {
            flag_builder
                .set(flag, value)
                .map_err(|e| Error::Fatal(format!("Could not configure JIT: {}", e)))?;
        }

        let isa_builder = cranelift_native::builder()
            .map_err(|e| Error::Fatal(format!("Could not create JIT: {}", e)))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| Error::Fatal(format!("Could not create JIT: {}", e)))?;

        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let module = JITModule::new(builder);
        let ptr_type = module.target_config().pointer_type();
        debug!(%ptr_type, "JIT session created");

        Ok(Session {
            module,
            ptr_type,
            defined: FxHashSet::default(),
            slots: FxHashMap::default(),
            compiled: Vec::new(),
            fn_counter: 0,
        })
    }

    /// The shared function shape: `arity` opaque words in, one out.
    pub(crate) fn fn_signature(&self, arity: usize) -> Signature {
        let mut sig = self.module.make_signature();
        for _ in 0..arity {
            sig.params.push(AbiParam::new(self.ptr_type));
        }
        sig.returns.push(AbiParam::new(self.ptr_type));
        sig
    }

    /// The data object backing a global, created zero-initialized on first
    /// reference (a load before any store yields nil).
    pub(crate) fn slot(&mut self, sym: FormRef) -> Result<DataId> {
        if let Some(slot) = self.slots.get(&sym) {
            return Ok(slot.data);
        }
        let name = sym.as_symbol().unwrap_or("?");
        let data = self
            .module
            .declare_data(&format!("g${}", name), Linkage::Local, true, false)
            .map_err(|e| Error::Fatal(format!("Could not declare global {}: {}", name, e)))?;
        let mut desc = DataDescription::new();
        desc.define_zeroinit(self.ptr_type.bytes() as usize);
        self.module
            .define_data(data, &desc)
            .map_err(|e| Error::Fatal(format!("Could not define global {}: {}", name, e)))?;
        trace!(global = name, "created global slot");
        self.slots.insert(
            sym,
            GlobalSlot {
                data,
                kind: StoredKind::Form,
            },
        );
        Ok(data)
    }

    pub(crate) fn kind(&self, sym: FormRef) -> StoredKind {
        match self.slots.get(&sym) {
            Some(slot) => slot.kind,
            None => StoredKind::Form,
        }
    }

    pub(crate) fn set_kind(&mut self, sym: FormRef, kind: StoredKind) {
        if let Some(slot) = self.slots.get_mut(&sym) {
            slot.kind = kind;
        }
    }

    /// Unique module-level name for a function; redefinition compiles a
    /// fresh function rather than replacing the old one in place.
    pub(crate) fn fresh_fn_name(&mut self, base: Option<&str>) -> String {
        let name = format!("{}${}", base.unwrap_or("fn"), self.fn_counter);
        self.fn_counter += 1;
        name
    }

    pub(crate) fn note_compiled(&mut self, name: &str) {
        debug!(function = name, "compiled");
        self.compiled.push(name.to_string());
    }

    /// Names of every function successfully defined in the module, in
    /// compilation order. A failed emission leaves this unchanged.
    pub fn functions(&self) -> &[String] {
        &self.compiled
    }

    /// Resolve relocations and map everything compiled so far as executable.
    pub fn finalize(&mut self) -> Result<()> {
        self.module
            .finalize_definitions()
            .map_err(|e| Error::Fatal(format!("Could not finalize JIT code: {}", e)))?;
        Ok(())
    }

    /// Raw pointer to a finalized function's native code.
    pub(crate) fn materialize(&self, id: FuncId) -> *const u8 {
        let ptr = self.module.get_finalized_function(id);
        trace!(?id, ptr = ?ptr, "materialized");
        ptr
    }
}
