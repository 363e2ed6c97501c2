use std::borrow::Cow;

use crate::arena::Mask;
use crate::decoder::{
    Instruction, LDC_CLASS_MAJOR_VERSION, LDC_METHOD_HANDLE_MAJOR_VERSION, Operand,
};
use crate::fault::{VerifyResult, verify_error};
use crate::fullinfo::{FullInfo, ItemKind};
use crate::ir::{ConstantTag, MemberRef};
use crate::lattice::decrement_indirection;
use crate::opcodes::*;

use super::{AndFlags, Dataflow, Flags, OrFlags, Registers, Stack};

/// Longest operand list a call may pop, receiver included.
const MAX_CALL_OPERANDS: usize = 256;

/// What popping one instruction's operands left behind for the later phases.
pub(super) struct Step<'a> {
    /// Stack with the operands removed.
    pub(super) remaining: Stack<'a>,
    /// Popped values, deepest first.
    pub(super) popped: Vec<FullInfo>,
    /// Values named by the digits of a stack shuffle, or the `from` and `to` of a
    /// constructor call or `new`.
    pub(super) swap: [FullInfo; 4],
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Access {
    None,
    Single,
    Double,
}

fn popped_at(popped: &[FullInfo], index: usize) -> FullInfo {
    popped.get(index).copied().unwrap_or(FullInfo::BOGUS)
}

fn set_bit(bits: &mut [u32], register: usize) {
    if let Some(word) = bits.get_mut(register / 32) {
        *word |= 1 << (register % 32);
    }
}

impl<'a> Dataflow<'a, '_, '_> {
    fn member(&self, instruction: &Instruction) -> VerifyResult<&MemberRef> {
        match self.cx.class.cp_member(usize::from(instruction.constant())) {
            Some(member) => Ok(member),
            None => verify_error!("Illegal constant pool index"),
        }
    }

    fn assignable(&mut self, from: FullInfo, to: FullInfo) -> VerifyResult<bool> {
        self.cx.lattice.is_assignable(from, to)
    }

    /// Loads, `iinc` and `ret` must find the right kind of value in their register.
    pub(super) fn check_register_values(
        &self,
        inumber: usize,
        registers: Registers<'a>,
    ) -> VerifyResult<()> {
        let instruction = &self.instructions[inumber];
        let (kind, double_word) = match instruction.opcode {
            ILOAD | IINC => (ItemKind::Integer, false),
            FLOAD => (ItemKind::Float, false),
            ALOAD => (ItemKind::Object, false),
            RET => (ItemKind::ReturnAddress, false),
            LLOAD => (ItemKind::Long, true),
            DLOAD => (ItemKind::Double, true),
            _ => return Ok(()),
        };
        let register = instruction.local();
        let values = registers.values;
        let expected = FullInfo::of(kind);
        if !double_word {
            let Some(&value) = values.get(register) else {
                verify_error!("Accessing value from uninitialized register {register}");
            };
            if value.with_zero_extra() == expected {
                return Ok(());
            }
            if value.is_array() && kind == ItemKind::Object {
                return Ok(());
            }
            if value.kind == ItemKind::ReturnAddress {
                verify_error!("Cannot load return address from register {register}");
            }
            if kind == ItemKind::Object
                && (value == FullInfo::INIT_OBJECT
                    || value.with_zero_extra() == FullInfo::of(ItemKind::NewObject))
            {
                return Ok(());
            }
            verify_error!("Register {register} contains wrong type");
        }
        if register + 1 >= values.len() {
            verify_error!(
                "Accessing value from uninitialized register pair {}/{}",
                register,
                register + 1
            );
        }
        if values[register] != expected || values[register + 1] != expected.second_word() {
            verify_error!(
                "Register pair {}/{} contains wrong type",
                register,
                register + 1
            );
        }
        Ok(())
    }

    pub(super) fn check_flags(&self, inumber: usize, flags: Flags) -> VerifyResult<()> {
        let opcode = self.instructions[inumber].opcode;
        if opcode == RETURN
            && flags.or.contains(OrFlags::NEED_CONSTRUCTOR)
            && !flags.and.contains(AndFlags::CONSTRUCTED)
        {
            verify_error!("Constructor must call super() or this()");
        }
        if (IRETURN..=RETURN).contains(&opcode) && flags.or.contains(OrFlags::NO_RETURN) {
            verify_error!("Cannot return normally");
        }
        Ok(())
    }

    fn invoke_template(&mut self, instruction: &Instruction) -> VerifyResult<String> {
        let class = self.cx.class;
        let Some(member) = class.cp_member(usize::from(instruction.constant())) else {
            verify_error!("Illegal constant pool index");
        };
        let mut template = String::new();
        if instruction.opcode != INVOKESTATIC {
            template.push(if instruction.is_invokeinit() { '@' } else { 'A' });
        }
        let (parameters, _) = self.cx.lattice.method_parameters(&member.signature)?;
        for parameter in parameters {
            let Some(parameter) = parameter else {
                break;
            };
            template.push(parameter.code);
            if template.len() >= MAX_CALL_OPERANDS {
                verify_error!("Signature {} has too many arguments", member.signature);
            }
        }
        Ok(template)
    }

    /// A field write on the receiver before `super()` is allowed for fields this class declares.
    fn is_own_field(&mut self, instruction: &Instruction) -> VerifyResult<bool> {
        let class = self.cx.class;
        let Some(member) = class.cp_member(usize::from(instruction.constant())) else {
            return Ok(false);
        };
        let env = self.cx.env;
        if env
            .field_modifiers(self.cx.handle, &member.name, &member.signature)
            .is_none()
        {
            return Ok(false);
        }
        let owner = self.cx.lattice.class_name_to_info(&member.class_name)?;
        Ok(owner == self.cx.current)
    }

    /// Check and remove the operands `inumber` consumes.
    pub(super) fn pop_stack(&mut self, inumber: usize, stack: Stack<'a>) -> VerifyResult<Step<'a>> {
        let instructions = self.instructions;
        let instruction = &instructions[inumber];
        let opcode = instruction.opcode;
        let mut put_type = FullInfo::BOGUS;
        let template: Cow<'static, str> = match opcode {
            PUTSTATIC | PUTFIELD => {
                let class = self.cx.class;
                let Some(member) = class.cp_member(usize::from(instruction.constant())) else {
                    verify_error!("Illegal constant pool index");
                };
                let mut template = String::new();
                if opcode == PUTFIELD {
                    template.push('A');
                }
                let (field, _) = self.cx.lattice.field_type(&member.signature)?;
                if let Some(field) = field {
                    template.push(field.code);
                    put_type = field.info;
                }
                Cow::Owned(template)
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                Cow::Owned(self.invoke_template(instruction)?)
            }
            MULTIANEWARRAY => match instruction.operand {
                Operand::MultiArray { dimensions, .. } => {
                    Cow::Owned("I".repeat(usize::from(dimensions)))
                }
                _ => Cow::Borrowed(""),
            },
            _ => Cow::Borrowed(stack_effect(opcode).0),
        };

        let codes = template.as_bytes();
        let mut cursor = stack.top;
        let mut size = stack.size;
        let mut popped = Vec::with_capacity(codes.len());
        let mut swap = [FullInfo::BOGUS; 4];
        // operands are listed deepest first, so walk the template backwards
        let mut p = codes.len();
        while p > 0 {
            p -= 1;
            let code = codes[p];
            let Some(cell) = cursor else {
                verify_error!("Unable to pop operand off an empty stack");
            };
            let mut top = cell.item;
            let mut width = if matches!(code, b'D' | b'L') { 2 } else { 1 };
            match code {
                b'I' => {
                    if top != FullInfo::INTEGER {
                        verify_error!("Expecting to find integer on stack");
                    }
                }
                b'F' => {
                    if top != FullInfo::FLOAT {
                        verify_error!("Expecting to find float on stack");
                    }
                }
                b'D' => {
                    if top != FullInfo::DOUBLE {
                        verify_error!("Expecting to find double on stack");
                    }
                }
                b'L' => {
                    if top != FullInfo::LONG {
                        verify_error!("Expecting to find long on stack");
                    }
                }
                b'A' => {
                    let return_address = top.with_zero_extra()
                        == FullInfo::of(ItemKind::ReturnAddress)
                        && opcode == ASTORE;
                    let uninitialized =
                        matches!(top.kind, ItemKind::NewObject | ItemKind::InitObject)
                            && matches!(opcode, ASTORE | ALOAD | IFNULL | IFNONNULL);
                    if !top.is_reference() && !return_address && !uninitialized {
                        if top.kind == ItemKind::InitObject
                            && opcode == PUTFIELD
                            && self.is_own_field(instruction)?
                        {
                            top = self.cx.current;
                        } else {
                            verify_error!("Expecting to find object/array on stack");
                        }
                    }
                }
                b'@' => {
                    if !matches!(top.kind, ItemKind::NewObject | ItemKind::InitObject) {
                        verify_error!("Expecting to find unitialized object on stack");
                    }
                }
                b'O' => {
                    if top.with_zero_extra() != FullInfo::NULL {
                        verify_error!("Expecting to find object on stack");
                    }
                }
                b'a' => {
                    if top != FullInfo::INTEGER && !top.is_reference() {
                        verify_error!("Expecting to find object, array, or int on stack");
                    }
                }
                b']' => {
                    let element = if p > 0 { codes[p - 1] } else { 0 };
                    if !top.is_null() {
                        check_array_operand(top, element)?;
                    }
                    p = p.saturating_sub(2);
                }
                b'1'..=b'4' => {
                    let slot = usize::from(code - b'1');
                    if top == FullInfo::DOUBLE || top == FullInfo::LONG {
                        if p >= 2 && codes[p - 1] == b'+' {
                            swap[slot] = top.second_word();
                            swap[usize::from(codes[p - 2] - b'1')] = top;
                            width = 2;
                            p -= 2;
                        } else {
                            verify_error!("Attempt to split long or double on the stack");
                        }
                    } else {
                        swap[slot] = top;
                        if p > 0 && codes[p - 1] == b'+' {
                            p -= 1;
                        }
                    }
                }
                _ => verify_error!("Internal error #2"),
            }
            popped.push(top);
            size = size.saturating_sub(width);
            cursor = cell.next;
        }
        popped.reverse();

        match opcode {
            AASTORE => {
                let array = popped_at(&popped, 0);
                let value = popped_at(&popped, 2);
                if !value.is_reference() {
                    verify_error!("Expecting reference type on operand stack in aastore");
                }
                if !decrement_indirection(array).is_reference() {
                    verify_error!("Component type of the array must be reference type in aastore");
                }
            }
            GETFIELD | PUTFIELD | PUTSTATIC => {
                let object = popped_at(&popped, 0);
                if opcode != PUTSTATIC {
                    let class_name = self.member(instruction)?.class_name.clone();
                    let owner = self.cx.lattice.class_name_to_info(&class_name)?;
                    if !self.assignable(object, owner)? {
                        verify_error!("Incompatible type for getting or setting field");
                    }
                    let current = self.cx.current;
                    if instruction.protected && !self.assignable(object, current)? {
                        verify_error!("Bad access to protected data");
                    }
                }
                if opcode != GETFIELD {
                    let value = popped_at(&popped, usize::from(opcode == PUTFIELD));
                    if !self.assignable(value, put_type)? {
                        verify_error!("Bad type in putfield/putstatic");
                    }
                }
            }
            ATHROW => {
                let throwable = self.cx.lattice.known.throwable;
                if !self.assignable(popped_at(&popped, 0), throwable)? {
                    verify_error!("Can only throw Throwable objects");
                }
            }
            AALOAD => {
                swap[0] = decrement_indirection(popped_at(&popped, 0));
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                self.check_call(instruction, &popped, &mut swap)?;
            }
            RETURN => {
                if self.return_type != FullInfo::VOID {
                    verify_error!("Wrong return type in function");
                }
            }
            IRETURN | LRETURN | FRETURN | DRETURN | ARETURN => {
                let return_type = self.return_type;
                if !self.assignable(popped_at(&popped, 0), return_type)? {
                    verify_error!("Wrong return type in function");
                }
            }
            NEW => {
                if let Operand::New { uninit, .. } = instruction.operand {
                    if stack.items().any(|item| item == uninit) {
                        verify_error!("Uninitialized object on stack at creating point");
                    }
                    swap[0] = uninit;
                    swap[1] = FullInfo::BOGUS;
                }
            }
            _ => {}
        }

        Ok(Step {
            remaining: Stack { top: cursor, size },
            popped,
            swap,
        })
    }

    /// Receiver and argument checks for a method call.
    fn check_call(
        &mut self,
        instruction: &Instruction,
        popped: &[FullInfo],
        swap: &mut [FullInfo; 4],
    ) -> VerifyResult<()> {
        let Operand::Invoke { class: target, .. } = instruction.operand else {
            return Ok(());
        };
        let class = self.cx.class;
        let Some(member) = class.cp_member(usize::from(instruction.constant())) else {
            verify_error!("Illegal constant pool index");
        };
        let current = self.cx.current;
        let object = popped_at(popped, 0);
        let first_argument = if instruction.opcode == INVOKESTATIC {
            0
        } else if instruction.is_invokeinit() {
            swap[0] = object;
            if object.kind == ItemKind::NewObject {
                let created = match self.instructions.get(usize::from(object.extra)) {
                    Some(Instruction {
                        operand: Operand::New { class, .. },
                        ..
                    }) => *class,
                    _ => FullInfo::BOGUS,
                };
                swap[1] = created;
                if created != target {
                    verify_error!("Call to wrong initialization method");
                }
                if instruction.protected
                    && self.cx.major_version > LDC_CLASS_MAJOR_VERSION
                    && !self.assignable(object, current)?
                {
                    verify_error!("Bad access to protected data");
                }
            } else {
                if Some(target) != self.cx.superclass && target != current {
                    verify_error!("Call to wrong initialization method");
                }
                swap[1] = current;
            }
            1
        } else {
            if !self.assignable(object, target)? {
                verify_error!("Incompatible object argument for function call");
            }
            if instruction.opcode == INVOKESPECIAL && !self.assignable(object, current)? {
                verify_error!("Incompatible object argument for invokespecial");
            }
            if instruction.protected && !self.assignable(object, current)? {
                // arrays answer the protected Object.clone as if it were public
                let array_clone = target == self.cx.lattice.known.object
                    && object.is_array()
                    && member.name == "clone";
                if !array_clone {
                    verify_error!("Bad access to protected data");
                }
            }
            1
        };
        let (parameters, _) = self.cx.lattice.method_parameters(&member.signature)?;
        for (position, parameter) in parameters.into_iter().enumerate() {
            let Some(parameter) = parameter else {
                continue;
            };
            if parameter.code == 'A'
                && !self.assignable(popped_at(popped, first_argument + position), parameter.info)?
            {
                verify_error!("Incompatible argument to function");
            }
        }
        Ok(())
    }

    /// Register file after `inumber`, with subroutine masks recording what was touched.
    pub(super) fn update_registers(
        &mut self,
        inumber: usize,
        stack: Stack<'a>,
        registers: Registers<'a>,
        step: &Step<'a>,
    ) -> VerifyResult<Registers<'a>> {
        let instruction = &self.instructions[inumber];
        let register = instruction.local();
        let mut values = registers.values;
        let mut masks = registers.masks;
        let access = match instruction.opcode {
            ISTORE | FSTORE | ASTORE | LSTORE | DSTORE => {
                let access = if matches!(instruction.opcode, LSTORE | DSTORE) {
                    Access::Double
                } else {
                    Access::Single
                };
                let top = stack.top.map_or(FullInfo::BOGUS, |cell| cell.item);
                let last = register + usize::from(access == Access::Double);
                let unchanged = last < values.len()
                    && values[register] == top
                    && (access == Access::Single || values[register + 1] == top.second_word());
                if !unchanged {
                    let mut next = values.to_vec();
                    if next.len() <= last {
                        next.resize(last + 1, FullInfo::BOGUS);
                    }
                    next[register] = top;
                    if access == Access::Double {
                        next[register + 1] = top.second_word();
                    }
                    values = self.arena.registers(&next)?;
                }
                access
            }
            ILOAD | FLOAD | ALOAD | IINC | RET => Access::Single,
            LLOAD | DLOAD => Access::Double,
            JSR | JSR_W => {
                let entry = instruction.branch();
                if masks.iter().any(|mask| mask.entry == entry) {
                    verify_error!("Recursive call to jsr entry");
                }
                let modifies = self.arena.bits(&vec![0; self.bitmask_size])?;
                let mut next = masks.to_vec();
                next.push(Mask { entry, modifies });
                masks = self.arena.masks(&next)?;
                Access::None
            }
            _ if instruction.opcode == NEW || instruction.is_invokeinit() => {
                let (from, to) = (step.swap[0], step.swap[1]);
                if values.contains(&from) {
                    let mut next = values.to_vec();
                    let mut bits: Option<Vec<Vec<u32>>> = None;
                    for (index, value) in next.iter_mut().enumerate() {
                        if *value != from {
                            continue;
                        }
                        *value = to;
                        for (position, mask) in masks.iter().enumerate() {
                            if !mask.is_set(index) {
                                let bits = bits.get_or_insert_with(|| {
                                    masks.iter().map(|mask| mask.modifies.to_vec()).collect()
                                });
                                set_bit(&mut bits[position], index);
                            }
                        }
                    }
                    values = self.arena.registers(&next)?;
                    if let Some(bits) = bits {
                        masks = self.rebuild_masks(masks, &bits)?;
                    }
                }
                Access::None
            }
            _ => Access::None,
        };

        if access != Access::None {
            let touched: &[usize] = if access == Access::Double {
                &[register, register + 1]
            } else {
                &[register]
            };
            let first = masks
                .iter()
                .position(|mask| touched.iter().any(|index| !mask.is_set(*index)));
            if let Some(first) = first {
                let mut bits: Vec<Vec<u32>> =
                    masks.iter().map(|mask| mask.modifies.to_vec()).collect();
                for mask_bits in &mut bits[first..] {
                    for index in touched {
                        set_bit(mask_bits, *index);
                    }
                }
                masks = self.rebuild_masks(masks, &bits)?;
            }
        }
        Ok(Registers { values, masks })
    }

    fn rebuild_masks(
        &self,
        masks: &'a [Mask<'a>],
        bits: &[Vec<u32>],
    ) -> VerifyResult<&'a [Mask<'a>]> {
        let mut next = Vec::with_capacity(masks.len());
        for (mask, bits) in masks.iter().zip(bits) {
            let modifies = if mask.modifies == bits.as_slice() {
                mask.modifies
            } else {
                self.arena.bits(bits)?
            };
            next.push(Mask {
                entry: mask.entry,
                modifies,
            });
        }
        self.arena.masks(&next)
    }

    pub(super) fn update_flags(&self, inumber: usize, flags: Flags, step: &Step<'a>) -> Flags {
        let mut flags = flags;
        if self.instructions[inumber].is_invokeinit() && step.swap[0] == FullInfo::INIT_OBJECT {
            flags.and |= AndFlags::CONSTRUCTED;
        }
        flags
    }

    /// Push the results of `inumber` onto the stack left by [`Dataflow::pop_stack`].
    pub(super) fn push_stack(
        &mut self,
        inumber: usize,
        registers: Registers<'a>,
        step: &Step<'a>,
    ) -> VerifyResult<Stack<'a>> {
        let instructions = self.instructions;
        let instruction = &instructions[inumber];
        let opcode = instruction.opcode;
        let mut result = FullInfo::BOGUS;
        let template: Cow<'static, str> = match opcode {
            LDC | LDC_W | LDC2_W => Cow::Borrowed(self.constant_result(instruction, &mut result)?),
            GETSTATIC | GETFIELD => {
                let class = self.cx.class;
                let Some(member) = class.cp_member(usize::from(instruction.constant())) else {
                    verify_error!("Illegal constant pool index");
                };
                match self.cx.lattice.field_type(&member.signature)?.0 {
                    Some(field) => {
                        result = field.info;
                        Cow::Owned(field.code.to_string())
                    }
                    None => Cow::Borrowed(""),
                }
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                let class = self.cx.class;
                let Some(member) = class.cp_member(usize::from(instruction.constant())) else {
                    verify_error!("Illegal constant pool index");
                };
                let signature = member.signature.as_str();
                let Some(close) = signature.find(')') else {
                    verify_error!("Illegal signature {signature}");
                };
                let returned = &signature[close + 1..];
                if returned.starts_with('V') {
                    Cow::Borrowed("")
                } else {
                    match self.cx.lattice.field_type(returned)?.0 {
                        Some(field) => {
                            result = field.info;
                            Cow::Owned(field.code.to_string())
                        }
                        None => Cow::Borrowed(""),
                    }
                }
            }
            _ => {
                result = match (&instruction.operand, opcode) {
                    (_, ACONST_NULL) => FullInfo::NULL,
                    (Operand::New { uninit, .. }, NEW) => *uninit,
                    (Operand::Type(info), CHECKCAST | NEWARRAY | ANEWARRAY) => *info,
                    (Operand::MultiArray { class, .. }, MULTIANEWARRAY) => *class,
                    (_, AALOAD) => step.swap[0],
                    (_, ALOAD) => registers
                        .values
                        .get(instruction.local())
                        .copied()
                        .unwrap_or(FullInfo::BOGUS),
                    _ => FullInfo::BOGUS,
                };
                Cow::Borrowed(stack_effect(opcode).1)
            }
        };

        let codes = template.as_bytes();
        let mut stack = step.remaining;
        let mut p = 0;
        while p < codes.len() {
            let code = codes[p];
            let (item, width) = match code {
                b'I' => (FullInfo::INTEGER, 1),
                b'F' => (FullInfo::FLOAT, 1),
                b'D' => (FullInfo::DOUBLE, 2),
                b'L' => (FullInfo::LONG, 2),
                b'R' => {
                    let entry = u16::try_from(instruction.branch()).unwrap_or(u16::MAX);
                    (FullInfo::return_address(entry), 1)
                }
                b'1'..=b'4' => {
                    let item = step.swap[usize::from(code - b'1')];
                    if item == FullInfo::DOUBLE || item == FullInfo::LONG {
                        // the paired digit names the second word
                        p += 1;
                        (item, 2)
                    } else {
                        (item, 1)
                    }
                }
                b'A' => (result, 1),
                _ => verify_error!("Internal error #4"),
            };
            stack = Stack {
                top: Some(self.arena.push(item, stack.top)?),
                size: stack.size + width,
            };
            p += 1;
        }

        if instruction.is_invokeinit() {
            let (from, to) = (step.swap[0], step.swap[1]);
            if stack.items().any(|item| item == from) {
                let items: Vec<FullInfo> = stack
                    .items()
                    .map(|item| if item == from { to } else { item })
                    .collect();
                stack = Stack::build(self.arena, &items, stack.size)?;
            }
        }
        Ok(stack)
    }

    /// Result shape of an `ldc` family instruction, setting `result` for reference constants.
    fn constant_result(
        &mut self,
        instruction: &Instruction,
        result: &mut FullInfo,
    ) -> VerifyResult<&'static str> {
        let major = self.cx.major_version;
        let shape = match self.cx.class.cp_tag(usize::from(instruction.constant())) {
            Some(ConstantTag::Integer) => "I",
            Some(ConstantTag::Float) => "F",
            Some(ConstantTag::Double) => "D",
            Some(ConstantTag::Long) => "L",
            Some(ConstantTag::String) => {
                *result = self.cx.lattice.known.string;
                "A"
            }
            Some(ConstantTag::Class) if major >= LDC_CLASS_MAJOR_VERSION => {
                *result = self.cx.lattice.classes.object_by_name("java/lang/Class")?;
                "A"
            }
            Some(ConstantTag::MethodType) if major >= LDC_METHOD_HANDLE_MAJOR_VERSION => {
                *result = self
                    .cx
                    .lattice
                    .classes
                    .object_by_name("java/lang/invoke/MethodType")?;
                "A"
            }
            Some(ConstantTag::MethodHandle) if major >= LDC_METHOD_HANDLE_MAJOR_VERSION => {
                *result = self
                    .cx
                    .lattice
                    .classes
                    .object_by_name("java/lang/invoke/MethodHandle")?;
                "A"
            }
            _ => verify_error!("Internal error #3"),
        };
        Ok(shape)
    }
}

/// Check the array operand of an element access whose template names `element`.
fn check_array_operand(top: FullInfo, element: u8) -> VerifyResult<()> {
    let one_deep = |kind: ItemKind| top == FullInfo::new(kind, 1, 0);
    match element {
        b'I' => {
            if !one_deep(ItemKind::Integer) {
                verify_error!("Expecting to find array of ints on stack");
            }
        }
        b'L' => {
            if !one_deep(ItemKind::Long) {
                verify_error!("Expecting to find array of longs on stack");
            }
        }
        b'F' => {
            if !one_deep(ItemKind::Float) {
                verify_error!("Expecting to find array of floats on stack");
            }
        }
        b'D' => {
            if !one_deep(ItemKind::Double) {
                verify_error!("Expecting to find array of doubles on stack");
            }
        }
        b'A' => {
            if top.indirection == 0 || (top.indirection == 1 && top.kind != ItemKind::Object) {
                verify_error!("Expecting to find array of objects or arrays on stack");
            }
        }
        b'B' => {
            if !one_deep(ItemKind::Byte) && !one_deep(ItemKind::Boolean) {
                verify_error!("Expecting to find array of bytes or Booleans on stack");
            }
        }
        b'C' => {
            if !one_deep(ItemKind::Char) {
                verify_error!("Expecting to find array of chars on stack");
            }
        }
        b'S' => {
            if !one_deep(ItemKind::Short) {
                verify_error!("Expecting to find array of shorts on stack");
            }
        }
        b'?' => {
            if top.indirection == 0 {
                verify_error!("Expecting to find array on stack");
            }
        }
        _ => verify_error!("Internal error #1"),
    }
    Ok(())
}
