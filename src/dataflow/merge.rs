use crate::arena::Mask;
use crate::decoder::Operand;
use crate::fault::{VerifyResult, verify_error};
use crate::fullinfo::{FullInfo, ItemKind};
use crate::opcodes::*;

use super::opcode_semantics::Step;
use super::{Dataflow, Flags, OrFlags, Registers, Stack};

impl<'a> Dataflow<'a, '_, '_> {
    /// Propagate the state after `inumber` to its handlers and successors.
    pub(super) fn merge_into_successors(
        &mut self,
        inumber: usize,
        registers: Registers<'a>,
        stack: Stack<'a>,
        flags: Flags,
        step: &Step<'a>,
    ) -> VerifyResult<()> {
        let instructions = self.instructions;
        let instruction = &instructions[inumber];
        let successors = match instruction.opcode {
            IFEQ..=IF_ACMPNE | IFNULL | IFNONNULL => vec![inumber + 1, instruction.branch()],
            JSR | JSR_W => {
                // the subroutine's return point may now see a different caller state
                if let Some(ret) = self.jsr_ret[inumber] {
                    self.worklist.push(ret);
                }
                vec![instruction.branch()]
            }
            GOTO | GOTO_W => vec![instruction.branch()],
            IRETURN..=RETURN | ATHROW => Vec::new(),
            RET => self.ret_successors(inumber)?,
            TABLESWITCH | LOOKUPSWITCH => match &instruction.operand {
                Operand::Switch(targets) => targets.clone(),
                _ => Vec::new(),
            },
            _ => vec![inumber + 1],
        };

        let this = self.states[inumber];
        let before = this.registers.unwrap_or(registers);
        let handlers = self.handlers;
        for (index, handler) in handlers.iter().enumerate() {
            if handler.start > inumber || handler.end <= inumber {
                continue;
            }
            let handler_stack = self.handler_stacks[index];
            if instruction.is_invokeinit() {
                // the exception may leave the object in either state
                let mut or = flags.or;
                if step.swap[0] == FullInfo::INIT_OBJECT {
                    or |= OrFlags::NO_RETURN;
                }
                self.merge_into_one_successor(
                    inumber,
                    handler.handler,
                    before,
                    handler_stack,
                    this.flags,
                    true,
                )?;
                self.merge_into_one_successor(
                    inumber,
                    handler.handler,
                    registers,
                    handler_stack,
                    Flags { and: flags.and, or },
                    true,
                )?;
            } else {
                let merged = Flags {
                    and: flags.and & this.flags.and,
                    or: flags.or | this.flags.or,
                };
                self.merge_into_one_successor(
                    inumber,
                    handler.handler,
                    before,
                    handler_stack,
                    merged,
                    true,
                )?;
            }
        }

        let count = self.instructions.len();
        for target in successors {
            if target >= count {
                verify_error!("Falling off the end of the code");
            }
            self.merge_into_one_successor(inumber, target, registers, stack, flags, false)?;
        }
        Ok(())
    }

    /// Every instruction following a `jsr` that calls the subroutine `inumber` returns from.
    fn ret_successors(&mut self, inumber: usize) -> VerifyResult<Vec<usize>> {
        if let Some(successors) = self.ret_successors.get(&inumber) {
            return Ok(successors.clone());
        }
        let instruction = &self.instructions[inumber];
        let called = self.states[inumber]
            .registers
            .and_then(|registers| registers.values.get(instruction.local()).copied())
            .map_or(usize::MAX, |address| usize::from(address.extra));
        let successors: Vec<usize> = self
            .instructions
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, candidate)| {
                matches!(candidate.opcode, JSR | JSR_W) && candidate.branch() == called
            })
            .map(|(index, _)| index + 1)
            .collect();
        self.ret_successors.insert(inumber, successors.clone());
        Ok(successors)
    }

    fn merge_into_one_successor(
        &mut self,
        from: usize,
        to: usize,
        registers: Registers<'a>,
        stack: Stack<'a>,
        flags: Flags,
        is_exception: bool,
    ) -> VerifyResult<()> {
        let opcode = self.instructions[from].opcode;
        let mut registers = registers;
        let mut stack = stack;
        // uninitialized objects do not survive entering or leaving a subroutine
        if matches!(opcode, RET | JSR | JSR_W) {
            let is_new = |item: &FullInfo| item.kind == ItemKind::NewObject;
            if stack.items().any(|item| is_new(&item)) {
                let items: Vec<FullInfo> = stack
                    .items()
                    .map(|item| if is_new(&item) { FullInfo::BOGUS } else { item })
                    .collect();
                stack = Stack::build(self.arena, &items, stack.size)?;
            }
            if registers.values.iter().any(is_new) {
                let values: Vec<FullInfo> = registers
                    .values
                    .iter()
                    .map(|item| if is_new(item) { FullInfo::BOGUS } else { *item })
                    .collect();
                registers.values = self.arena.registers(&values)?;
            }
        }

        if opcode != RET || is_exception {
            self.merge_stack(to, stack)?;
            self.merge_registers(to, registers)?;
            self.merge_flags(to, flags);
            return Ok(());
        }

        let register = self.instructions[from].local();
        let called = registers
            .values
            .get(register)
            .map_or(usize::MAX, |address| usize::from(address.extra));
        let jsr = to - 1;
        match self.jsr_ret[jsr] {
            Some(ret) if ret != from => verify_error!("Multiple returns to single jsr"),
            Some(_) => {}
            None => self.jsr_ret[jsr] = Some(from),
        }
        // revisited once the jsr itself has been processed
        let Some(caller) = self.states[jsr].registers else {
            return Ok(());
        };
        let Some(position) = registers.masks.iter().rposition(|mask| mask.entry == called) else {
            verify_error!("Illegal return from subroutine");
        };
        let returned = registers.masks[position];
        let width = caller.values.len().max(registers.values.len());
        let values: Vec<FullInfo> = (0..width)
            .map(|index| {
                let source = if returned.is_set(index) {
                    registers.values
                } else {
                    caller.values
                };
                source.get(index).copied().unwrap_or(FullInfo::BOGUS)
            })
            .collect();
        let joined = Registers {
            values: self.arena.registers(&values)?,
            masks: &registers.masks[..position],
        };
        self.merge_stack(to, stack)?;
        self.merge_registers(to, joined)?;
        self.merge_flags(to, flags);
        Ok(())
    }

    fn merge_stack(&mut self, to: usize, incoming: Stack<'a>) -> VerifyResult<()> {
        let Some(existing) = self.states[to].stack else {
            self.states[to].stack = Some(incoming);
            self.worklist.push(to);
            return Ok(());
        };
        if existing.size != incoming.size {
            verify_error!(
                "Inconsistent stack height {} != {}",
                incoming.size,
                existing.size
            );
        }
        let old: Vec<FullInfo> = existing.items().collect();
        let new: Vec<FullInfo> = incoming.items().collect();
        let mut change = false;
        for (old_item, new_item) in old.iter().zip(&new) {
            if !self.cx.lattice.is_assignable(*new_item, *old_item)? {
                change = true;
                break;
            }
        }
        if !change {
            return Ok(());
        }
        let mut merged = Vec::with_capacity(old.len());
        for (old_item, new_item) in old.iter().zip(&new) {
            let item = self.cx.lattice.merge(*old_item, *new_item, false)?;
            if item.kind == ItemKind::Bogus {
                verify_error!("Mismatched stack types");
            }
            merged.push(item);
        }
        if old.len() != new.len() {
            verify_error!("Mismatched stack types");
        }
        self.states[to].stack = Some(Stack::build(self.arena, &merged, existing.size)?);
        self.worklist.push(to);
        Ok(())
    }

    fn merge_registers(&mut self, to: usize, incoming: Registers<'a>) -> VerifyResult<()> {
        let Some(existing) = self.states[to].registers else {
            self.states[to].registers = Some(incoming);
            self.worklist.push(to);
            return Ok(());
        };
        let mut changed = false;
        let mut values = existing.values;
        if values.len() > incoming.values.len() {
            // registers the incoming path never set are unusable
            values = &values[..incoming.values.len()];
            changed = true;
        }
        let mut first_widened = None;
        for (index, value) in values.iter().enumerate() {
            if !self.cx.lattice.is_assignable(incoming.values[index], *value)? {
                first_widened = Some(index);
                break;
            }
        }
        if let Some(first) = first_widened {
            let mut merged = values[..first].to_vec();
            for index in first..values.len() {
                merged.push(self.cx.lattice.merge(incoming.values[index], values[index], false)?);
            }
            while merged.last().is_some_and(|value| value.kind == ItemKind::Bogus) {
                merged.pop();
            }
            values = self.arena.registers(&merged)?;
            changed = true;
        }

        let mut masks = existing.masks;
        if !masks.is_empty() {
            // keep the subroutines active on both paths, in order, unioning their bits
            let mut matches = Vec::new();
            let mut next_candidate = 0;
            let mut new_bits = false;
            for mask in existing.masks {
                let found = incoming.masks[next_candidate.min(incoming.masks.len())..]
                    .iter()
                    .position(|candidate| candidate.entry == mask.entry)
                    .map(|offset| next_candidate + offset);
                if let Some(found) = found {
                    let other = incoming.masks[found];
                    new_bits |= mask
                        .modifies
                        .iter()
                        .zip(other.modifies)
                        .any(|(mine, theirs)| !mine & theirs != 0);
                    matches.push((*mask, other));
                    next_candidate = found + 1;
                }
            }
            if matches.len() < existing.masks.len() || new_bits {
                let mut joined = Vec::with_capacity(matches.len());
                for (mine, theirs) in matches {
                    let bits: Vec<u32> = (0..self.bitmask_size)
                        .map(|word| {
                            mine.modifies.get(word).copied().unwrap_or(0)
                                | theirs.modifies.get(word).copied().unwrap_or(0)
                        })
                        .collect();
                    joined.push(Mask {
                        entry: mine.entry,
                        modifies: self.arena.bits(&bits)?,
                    });
                }
                masks = self.arena.masks(&joined)?;
                changed = true;
            }
        }

        if changed {
            self.states[to].registers = Some(Registers { values, masks });
            self.worklist.push(to);
        }
        Ok(())
    }

    fn merge_flags(&mut self, to: usize, incoming: Flags) {
        let state = &mut self.states[to];
        let merged = Flags {
            and: state.flags.and & incoming.and,
            or: state.flags.or | incoming.or,
        };
        if merged != state.flags {
            state.flags = merged;
            self.worklist.push(to);
        }
    }
}
