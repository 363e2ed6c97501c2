//! Abstract interpretation of one method's instructions to a fixpoint.

mod merge;
mod opcode_semantics;
mod worklist;

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use tracing::trace;

use crate::arena::{Mask, MethodArena, StackItem};
use crate::decoder::{DecodedMethod, Handler, Instruction};
use crate::fault::{VerifyResult, try_table, verify_error};
use crate::fullinfo::FullInfo;
use crate::ir::{AccessFlags, MethodModel};
use crate::verifier::ClassContext;

use self::worklist::Worklist;

bitflags! {
    /// Facts true on at least one path into an instruction.
    pub(crate) struct OrFlags: u8 {
        const REACHED = 0x01;
        const NEED_CONSTRUCTOR = 0x02;
        const NO_RETURN = 0x04;
    }
}

bitflags! {
    /// Facts true on every path into an instruction.
    pub(crate) struct AndFlags: u8 {
        const CONSTRUCTED = 0x01;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Flags {
    pub(crate) and: AndFlags,
    pub(crate) or: OrFlags,
}

/// Operand stack as a shared linked list. `size` counts words, so long and double count twice.
#[derive(Clone, Copy, Default)]
pub(crate) struct Stack<'a> {
    pub(crate) top: Option<&'a StackItem<'a>>,
    pub(crate) size: usize,
}

impl<'a> Stack<'a> {
    /// Items from the top down.
    pub(crate) fn items(&self) -> impl Iterator<Item = FullInfo> + 'a {
        let mut cursor = self.top;
        std::iter::from_fn(move || {
            let item = cursor?;
            cursor = item.next;
            Some(item.item)
        })
    }

    /// Rebuild a stack of `size` words from items listed top first.
    pub(crate) fn build(
        arena: &'a MethodArena<'a>,
        items: &[FullInfo],
        size: usize,
    ) -> VerifyResult<Self> {
        let mut top = None;
        for item in items.iter().rev() {
            top = Some(arena.push(*item, top)?);
        }
        Ok(Stack { top, size })
    }
}

impl fmt::Debug for Stack<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut items: Vec<FullInfo> = self.items().collect();
        items.reverse();
        f.debug_list().entries(items).finish()
    }
}

/// Local variable types plus the subroutine masks active at an instruction.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Registers<'a> {
    pub(crate) values: &'a [FullInfo],
    pub(crate) masks: &'a [Mask<'a>],
}

/// Incoming state of one instruction; `None` until the instruction is first reached.
#[derive(Clone, Copy, Debug)]
pub(crate) struct InstructionState<'a> {
    pub(crate) stack: Option<Stack<'a>>,
    pub(crate) registers: Option<Registers<'a>>,
    pub(crate) flags: Flags,
}

impl InstructionState<'_> {
    fn unreached() -> Self {
        InstructionState {
            stack: None,
            registers: None,
            flags: Flags {
                and: AndFlags::all(),
                or: OrFlags::empty(),
            },
        }
    }
}

/// One-line rendering of an incoming state: `(stack) {registers} <entry: registers>... <and or>`,
/// with `x` for a part not yet known.
pub(crate) struct StateDump<'s, 'a>(pub(crate) &'s InstructionState<'a>);

impl fmt::Display for StateDump<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0;
        match state.stack {
            Some(stack) => {
                let mut items: Vec<FullInfo> = stack.items().collect();
                items.reverse();
                f.write_str("(")?;
                for item in items {
                    write!(f, "{item:?}")?;
                }
                f.write_str(")")?;
            }
            None => f.write_str("x")?,
        }
        f.write_str(" ")?;
        match state.registers {
            Some(registers) => {
                f.write_str("{")?;
                for (index, value) in registers.values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{value:?}")?;
                }
                f.write_str("}")?;
                for mask in registers.masks {
                    write!(f, " <{}:", mask.entry)?;
                    let width = mask.modifies.len() * 32;
                    for register in (0..width).filter(|register| mask.is_set(*register)) {
                        write!(f, " {register}")?;
                    }
                    f.write_str(">")?;
                }
            }
            None => f.write_str("x")?,
        }
        write!(
            f,
            " <{:x} {:x}>",
            state.flags.and.bits(),
            state.flags.or.bits()
        )
    }
}

pub(crate) struct Dataflow<'a, 'c, 'e> {
    pub(crate) cx: &'c mut ClassContext<'e>,
    pub(crate) arena: &'a MethodArena<'a>,
    pub(crate) method: &'c MethodModel,
    pub(crate) instructions: &'c [Instruction],
    pub(crate) handlers: &'c [Handler],
    /// Single-item stacks holding each handler's caught type.
    pub(crate) handler_stacks: Vec<Stack<'a>>,
    pub(crate) states: Vec<InstructionState<'a>>,
    pub(crate) worklist: Worklist,
    /// The `ret` seen returning to the instruction after each `jsr`.
    pub(crate) jsr_ret: Vec<Option<usize>>,
    /// Return points of each `ret`, computed the first time it is processed.
    pub(crate) ret_successors: BTreeMap<usize, Vec<usize>>,
    pub(crate) return_type: FullInfo,
    /// Words per register bitset.
    pub(crate) bitmask_size: usize,
}

/// Run the type inference over a decoded method, failing on the first inconsistency.
pub(crate) fn run_dataflow<'a>(
    cx: &mut ClassContext<'_>,
    arena: &'a MethodArena<'a>,
    method: &MethodModel,
    decoded: &DecodedMethod,
) -> VerifyResult<Vec<InstructionState<'a>>> {
    let mut dataflow = Dataflow::new(cx, arena, method, decoded)?;
    dataflow.initialize()?;
    dataflow.run()?;
    Ok(dataflow.states)
}

impl<'a, 'c, 'e> Dataflow<'a, 'c, 'e> {
    fn new(
        cx: &'c mut ClassContext<'e>,
        arena: &'a MethodArena<'a>,
        method: &'c MethodModel,
        decoded: &'c DecodedMethod,
    ) -> VerifyResult<Self> {
        let count = decoded.instructions.len();
        let mut handler_stacks = Vec::with_capacity(decoded.handlers.len());
        for handler in &decoded.handlers {
            handler_stacks.push(Stack::build(arena, &[handler.catch], 1)?);
        }
        Ok(Dataflow {
            cx,
            arena,
            method,
            instructions: &decoded.instructions,
            handlers: &decoded.handlers,
            handler_stacks,
            states: try_table(InstructionState::unreached(), count)?,
            worklist: Worklist::new(),
            jsr_ret: try_table(None, count)?,
            ret_successors: BTreeMap::new(),
            return_type: FullInfo::VOID,
            bitmask_size: usize::from(method.max_locals).div_ceil(32),
        })
    }

    /// Seed the entry instruction with the receiver and parameter types.
    fn initialize(&mut self) -> VerifyResult<()> {
        let method = self.method;
        let args_size = usize::from(method.args_size);
        if usize::from(method.max_locals) < args_size {
            verify_error!("Arguments can't fit into locals");
        }
        let mut values = Vec::with_capacity(args_size);
        let mut or = OrFlags::REACHED;
        if !method.access.contains(AccessFlags::STATIC) {
            if method.is_constructor() && self.cx.current != self.cx.lattice.known.object {
                values.push(FullInfo::INIT_OBJECT);
                or |= OrFlags::NEED_CONSTRUCTOR;
            } else {
                values.push(self.cx.current);
            }
        }
        let signature = method.signature.as_str();
        let (parameters, result) = self.cx.lattice.method_parameters(signature)?;
        for parameter in parameters {
            let info = parameter.map_or(FullInfo::BOGUS, |parameter| parameter.info);
            values.push(info);
            if info.is_double_word() {
                values.push(info.second_word());
            }
        }
        values.resize(args_size, FullInfo::BOGUS);
        self.return_type = if result.starts_with('V') {
            FullInfo::VOID
        } else {
            let (field, _) = self.cx.lattice.field_type(result)?;
            field.map_or(FullInfo::BOGUS, |field| field.info)
        };
        self.states[0] = InstructionState {
            stack: Some(Stack::default()),
            registers: Some(Registers {
                values: self.arena.registers(&values)?,
                masks: &[],
            }),
            flags: Flags {
                and: AndFlags::empty(),
                or,
            },
        };
        self.worklist.push(0);
        Ok(())
    }

    fn run(&mut self) -> VerifyResult<()> {
        let max_stack = usize::from(self.method.max_stack);
        while let Some(inumber) = self.worklist.pop() {
            let state = self.states[inumber];
            let (Some(stack), Some(registers)) = (state.stack, state.registers) else {
                continue;
            };
            trace!(
                inumber,
                offset = self.instructions[inumber].offset,
                opcode = self.instructions[inumber].opcode,
                state = %StateDump(&state),
                "interpreting instruction"
            );
            self.check_register_values(inumber, registers)?;
            self.check_flags(inumber, state.flags)?;
            let step = self.pop_stack(inumber, stack)?;
            let new_registers = self.update_registers(inumber, stack, registers, &step)?;
            let new_flags = self.update_flags(inumber, state.flags, &step);
            let new_stack = self.push_stack(inumber, registers, &step)?;
            if new_stack.size > max_stack {
                verify_error!("Stack size too large");
            }
            self.merge_into_successors(inumber, new_registers, new_stack, new_flags, &step)?;
        }
        Ok(())
    }
}
