use std::cell::Cell;
use std::mem::size_of;

use typed_arena::Arena;

use crate::fault::{VerifyFault, VerifyResult};
use crate::fullinfo::FullInfo;

/// Default allocation budget for one method.
pub(crate) const DEFAULT_ARENA_LIMIT: usize = 64 * 1024 * 1024;

/// Cell of a persistent operand stack; stacks share tails.
#[derive(Debug)]
pub(crate) struct StackItem<'a> {
    pub(crate) item: FullInfo,
    pub(crate) next: Option<&'a StackItem<'a>>,
}

/// Registers touched since a subroutine was entered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Mask<'a> {
    /// Instruction number of the subroutine entry.
    pub(crate) entry: usize,
    /// One bit per register.
    pub(crate) modifies: &'a [u32],
}

impl Mask<'_> {
    pub(crate) fn is_set(&self, register: usize) -> bool {
        self.modifies
            .get(register / 32)
            .is_some_and(|word| word & (1 << (register % 32)) != 0)
    }
}

/// Scratch storage for verifying a single method.
///
/// Everything is released at once when the arena is dropped, so a fresh arena per method
/// bounds memory by the largest method rather than the whole class.
pub(crate) struct MethodArena<'a> {
    stack_items: Arena<StackItem<'a>>,
    registers: Arena<FullInfo>,
    masks: Arena<Mask<'a>>,
    bits: Arena<u32>,
    used: Cell<usize>,
    limit: usize,
}

impl<'a> MethodArena<'a> {
    pub(crate) fn new(limit: usize) -> Self {
        MethodArena {
            stack_items: Arena::new(),
            registers: Arena::new(),
            masks: Arena::new(),
            bits: Arena::new(),
            used: Cell::new(0),
            limit,
        }
    }

    pub(crate) fn used(&self) -> usize {
        self.used.get()
    }

    fn charge(&self, bytes: usize) -> VerifyResult<()> {
        let used = self
            .used
            .get()
            .checked_add(bytes)
            .ok_or(VerifyFault::OutOfMemory)?;
        if used > self.limit {
            return Err(VerifyFault::OutOfMemory);
        }
        self.used.set(used);
        Ok(())
    }

    pub(crate) fn push(
        &'a self,
        item: FullInfo,
        next: Option<&'a StackItem<'a>>,
    ) -> VerifyResult<&'a StackItem<'a>> {
        self.charge(size_of::<StackItem<'a>>())?;
        Ok(self.stack_items.alloc(StackItem { item, next }))
    }

    pub(crate) fn registers(&'a self, values: &[FullInfo]) -> VerifyResult<&'a [FullInfo]> {
        self.charge(size_of::<FullInfo>() * values.len())?;
        Ok(self.registers.alloc_extend(values.iter().copied()))
    }

    pub(crate) fn masks(&'a self, values: &[Mask<'a>]) -> VerifyResult<&'a [Mask<'a>]> {
        self.charge(size_of::<Mask<'a>>() * values.len())?;
        Ok(self.masks.alloc_extend(values.iter().copied()))
    }

    pub(crate) fn bits(&'a self, values: &[u32]) -> VerifyResult<&'a [u32]> {
        self.charge(size_of::<u32>() * values.len())?;
        Ok(self.bits.alloc_extend(values.iter().copied()))
    }
}
