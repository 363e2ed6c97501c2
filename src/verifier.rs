use tracing::{debug, trace};

use crate::arena::{DEFAULT_ARENA_LIMIT, MethodArena};
use crate::class_table::ClassTable;
use crate::classpath::{ClassEnvironment, ClassHandle};
use crate::dataflow::run_dataflow;
use crate::decoder::decode_method;
use crate::fault::{FaultSite, VerifyOutcome, VerifyResult, verify_error};
use crate::fullinfo::FullInfo;
use crate::ir::{AccessFlags, ClassModel, ConstantTag, MethodModel};
use crate::lattice::TypeLattice;

/// Default cap on diagnostic message length in bytes.
pub(crate) const DEFAULT_MESSAGE_LIMIT: usize = 1024;

/// Knobs for one verification run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct VerifyOptions {
    pub(crate) message_limit: usize,
    pub(crate) arena_limit: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            message_limit: DEFAULT_MESSAGE_LIMIT,
            arena_limit: DEFAULT_ARENA_LIMIT,
        }
    }
}

/// State shared by every method of the class under verification.
pub(crate) struct ClassContext<'e> {
    pub(crate) env: &'e dyn ClassEnvironment,
    pub(crate) handle: ClassHandle,
    pub(crate) class: &'e ClassModel,
    pub(crate) lattice: TypeLattice<'e>,
    pub(crate) current: FullInfo,
    pub(crate) superclass: Option<FullInfo>,
    /// Every proper ancestor, nearest first.
    pub(crate) superclasses: Vec<FullInfo>,
    pub(crate) major_version: u16,
    pub(crate) arena_limit: usize,
}

impl<'e> ClassContext<'e> {
    pub(crate) fn new(
        env: &'e dyn ClassEnvironment,
        handle: ClassHandle,
        arena_limit: usize,
    ) -> VerifyResult<Self> {
        let class = env.class(handle);
        let mut lattice = TypeLattice::new(ClassTable::new(env, handle))?;
        let current = FullInfo::object(lattice.classes.intern_by_handle(handle, true)?);
        let super_handle = env.superclass(handle);
        if super_handle.is_none() {
            if let Some(name) = &class.super_name {
                verify_error!("Cannot find class {name}");
            }
        }
        let superclass = match super_handle {
            Some(parent) => Some(FullInfo::object(
                lattice.classes.intern_by_handle(parent, true)?,
            )),
            None => None,
        };
        let mut superclasses = Vec::new();
        let mut cursor = super_handle;
        while let Some(ancestor) = cursor {
            superclasses.push(lattice.classes.class_info(ancestor)?);
            cursor = env.superclass(ancestor);
        }
        Ok(ClassContext {
            env,
            handle,
            class,
            lattice,
            current,
            superclass,
            superclasses,
            major_version: class.major_version,
            arena_limit,
        })
    }

    /// Fail unless constant pool entry `index` exists and its tag is in `mask`.
    pub(crate) fn check_constant(&self, index: u16, mask: u32) -> VerifyResult<()> {
        let index = usize::from(index);
        if index == 0 || index >= self.class.constant_count() {
            verify_error!("Illegal constant pool index");
        }
        match self.class.cp_tag(index) {
            Some(tag) if mask & tag.bit() != 0 => Ok(()),
            _ => verify_error!("Illegal type in constant pool"),
        }
    }
}

/// Verify every field and method of one class.
pub(crate) fn verify_class(
    env: &dyn ClassEnvironment,
    handle: ClassHandle,
    options: &VerifyOptions,
) -> VerifyOutcome {
    let class = env.class(handle);
    let mut site = FaultSite::Class;
    let result = check_class(env, handle, options, &mut site);
    let outcome = match result {
        Ok(()) => VerifyOutcome::Ok,
        Err(fault) => fault.into_outcome(&class.name, site, options.message_limit),
    };
    debug!(class = class.name.as_str(), code = outcome.code(), "verified class");
    outcome
}

fn check_class<'e>(
    env: &'e dyn ClassEnvironment,
    handle: ClassHandle,
    options: &VerifyOptions,
    site: &mut FaultSite<'e>,
) -> VerifyResult<()> {
    let mut cx = ClassContext::new(env, handle, options.arena_limit)?;
    let class = cx.class;
    for field in class.fields.iter().rev() {
        if field.access.is_inconsistent() {
            *site = FaultSite::Field(&field.name);
            verify_error!("Inconsistent access bits.");
        }
    }
    // Code is snapshotted with the class model, so later loads cannot alter what is checked.
    for method in class.methods.iter().rev() {
        *site = FaultSite::Method {
            name: &method.name,
            signature: &method.signature,
        };
        verify_method(&mut cx, method)?;
    }
    Ok(())
}

fn verify_method(cx: &mut ClassContext<'_>, method: &MethodModel) -> VerifyResult<()> {
    if method.access.intersects(AccessFlags::NATIVE | AccessFlags::ABSTRACT) {
        return Ok(());
    }
    if method.access.is_inconsistent() {
        verify_error!("Inconsistent access bits.");
    }
    if method.vm_generated {
        trace!(method = method.name.as_str(), "skipping generated method");
        return Ok(());
    }
    let decoded = decode_method(cx, method)?;
    let arena = MethodArena::new(cx.arena_limit);
    run_dataflow(cx, &arena, method, &decoded)?;
    trace!(
        method = method.name.as_str(),
        arena_bytes = arena.used(),
        interned = cx.lattice.classes.len(),
        "verified method"
    );
    for index in &method.exceptions {
        cx.check_constant(*index, ConstantTag::Class.bit())?;
    }
    Ok(())
}
