use tracing::trace;

use crate::descriptor::parameter_slots;
use crate::fault::{VerifyResult, format_error, try_table, verify_error};
use crate::fullinfo::{FullInfo, ItemKind};
use crate::ir::{AccessFlags, ConstantTag, MethodModel};
use crate::lattice::MAX_ARRAY_DIMENSIONS;
use crate::opcodes::*;
use crate::verifier::ClassContext;

pub(crate) const LDC_CLASS_MAJOR_VERSION: u16 = 49;
pub(crate) const LDC_METHOD_HANDLE_MAJOR_VERSION: u16 = 51;
const NONZERO_PADDING_BYTES_IN_SWITCH_MAJOR_VERSION: u16 = 51;
const STATIC_METHOD_IN_INTERFACE_MAJOR_VERSION: u16 = 52;

/// Resolved immediate operands of one instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Operand {
    None,
    /// Local variable index of a load, store, `iinc` or `ret`.
    Local(usize),
    /// Instruction index a branch, `goto` or `jsr` transfers to.
    Branch(usize),
    /// Default target followed by every table target, as instruction indexes.
    Switch(Vec<usize>),
    /// Constant pool index of an `ldc` family or field instruction.
    Constant(u16),
    /// Method reference; `init` marks a constructor call through `invokespecial`.
    Invoke { index: u16, class: FullInfo, init: bool },
    /// Type checked or produced by `checkcast`, `instanceof`, `newarray` or `anewarray`.
    Type(FullInfo),
    /// Uninitialized marker pushed by `new` and the class it becomes once constructed.
    New { uninit: FullInfo, class: FullInfo },
    MultiArray { class: FullInfo, dimensions: u8 },
}

/// One decoded instruction; short forms are rewritten to their generic opcode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Instruction {
    pub(crate) offset: usize,
    pub(crate) opcode: u8,
    pub(crate) operand: Operand,
    /// Touches a protected member of a superclass in another package.
    pub(crate) protected: bool,
}

impl Instruction {
    pub(crate) fn is_invokeinit(&self) -> bool {
        matches!(self.operand, Operand::Invoke { init: true, .. })
    }

    pub(crate) fn local(&self) -> usize {
        match self.operand {
            Operand::Local(index) => index,
            _ => 0,
        }
    }

    pub(crate) fn branch(&self) -> usize {
        match self.operand {
            Operand::Branch(target) => target,
            _ => 0,
        }
    }

    pub(crate) fn constant(&self) -> u16 {
        match self.operand {
            Operand::Constant(index) | Operand::Invoke { index, .. } => index,
            _ => 0,
        }
    }
}

/// Exception table row in instruction indexes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Handler {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) handler: usize,
    /// Type of the exception on the handler's stack.
    pub(crate) catch: FullInfo,
}

#[derive(Debug)]
pub(crate) struct DecodedMethod {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) handlers: Vec<Handler>,
}

/// Split `method`'s code into instructions and check every immediate operand.
pub(crate) fn decode_method(
    cx: &mut ClassContext<'_>,
    method: &MethodModel,
) -> VerifyResult<DecodedMethod> {
    let code = method.code.as_slice();
    if code.is_empty() {
        verify_error!("Empty code");
    }
    if code.len() > 0xffff {
        verify_error!("Code of a method longer than 65535 bytes");
    }
    let (offsets, code_data) = instruction_starts(code)?;
    let mut decoder = Decoder {
        cx,
        method,
        code,
        code_data,
    };
    let mut instructions = Vec::with_capacity(offsets.len());
    for (inumber, offset) in offsets.iter().copied().enumerate() {
        instructions.push(decoder.decode(inumber, offset)?);
    }
    let handlers = decoder.handlers(offsets.len())?;
    trace!(
        method = method.name.as_str(),
        instructions = instructions.len(),
        handlers = handlers.len(),
        "decoded method"
    );
    Ok(DecodedMethod {
        instructions,
        handlers,
    })
}

/// Offsets of instruction starts, and the instruction index at each byte offset.
fn instruction_starts(code: &[u8]) -> VerifyResult<(Vec<usize>, Vec<Option<usize>>)> {
    let mut offsets = Vec::new();
    let mut code_data = try_table(None, code.len())?;
    let mut offset = 0;
    while offset < code.len() {
        let Some(length) = instruction_length(code, offset) else {
            verify_error!("Illegal instruction found at offset {offset}");
        };
        let next = offset + length;
        if next > code.len() {
            verify_error!("Code stops in the middle of instruction  starting at offset {offset}");
        }
        code_data[offset] = Some(offsets.len());
        offsets.push(offset);
        offset = next;
    }
    Ok((offsets, code_data))
}

struct Decoder<'c, 'e, 'm> {
    cx: &'c mut ClassContext<'e>,
    method: &'m MethodModel,
    code: &'m [u8],
    code_data: Vec<Option<usize>>,
}

impl Decoder<'_, '_, '_> {
    fn target(&self, target: i64) -> Option<usize> {
        let target = usize::try_from(target).ok()?;
        self.code_data.get(target).copied().flatten()
    }

    fn u8_at(&self, offset: usize) -> u8 {
        self.code.get(offset).copied().unwrap_or(0)
    }

    fn u16_at(&self, offset: usize) -> u16 {
        read_u16(self.code, offset).unwrap_or(0)
    }

    fn i32_at(&self, offset: usize) -> i32 {
        read_i32(self.code, offset).unwrap_or(0)
    }

    fn decode(&mut self, inumber: usize, offset: usize) -> VerifyResult<Instruction> {
        let raw = self.code[offset];
        let mut instruction = Instruction {
            offset,
            opcode: raw,
            operand: Operand::None,
            protected: false,
        };
        match raw {
            JSR | GOTO | IFEQ..=IF_ACMPNE | IFNULL | IFNONNULL => {
                let delta = i64::from(read_i16(self.code, offset + 1).unwrap_or(0));
                instruction.operand = Operand::Branch(self.branch_target(offset, delta)?);
            }
            JSR_W | GOTO_W => {
                let delta = i64::from(self.i32_at(offset + 1));
                instruction.operand = Operand::Branch(self.branch_target(offset, delta)?);
            }
            TABLESWITCH | LOOKUPSWITCH => {
                instruction.operand = Operand::Switch(self.switch_targets(raw, offset)?);
            }
            LDC | LDC_W | LDC2_W => {
                let index = if raw == LDC {
                    u16::from(self.u8_at(offset + 1))
                } else {
                    self.u16_at(offset + 1)
                };
                let mask = if raw == LDC2_W {
                    ConstantTag::Double.bit() | ConstantTag::Long.bit()
                } else {
                    self.ldc_mask()
                };
                self.cx.check_constant(index, mask)?;
                instruction.operand = Operand::Constant(index);
            }
            GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => {
                let index = self.u16_at(offset + 1);
                self.cx.check_constant(index, ConstantTag::Fieldref.bit())?;
                if matches!(raw, GETFIELD | PUTFIELD) {
                    instruction.protected = self.is_protected(index, false)?;
                }
                instruction.operand = Operand::Constant(index);
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                self.decode_invoke(&mut instruction)?;
            }
            INVOKEDYNAMIC => {
                verify_error!("invokedynamic bytecode is not supported in this class file version");
            }
            INSTANCEOF | CHECKCAST | NEW | ANEWARRAY | MULTIANEWARRAY => {
                instruction.operand = self.decode_class_operand(raw, offset, inumber)?;
            }
            NEWARRAY => {
                let kind = match self.u8_at(offset + 1) {
                    4 => ItemKind::Boolean,
                    5 => ItemKind::Char,
                    6 => ItemKind::Float,
                    7 => ItemKind::Double,
                    8 => ItemKind::Byte,
                    9 => ItemKind::Short,
                    10 => ItemKind::Integer,
                    11 => ItemKind::Long,
                    _ => verify_error!("Bad type passed to newarray"),
                };
                instruction.operand = Operand::Type(FullInfo::new(kind, 1, 0));
            }
            WIDE => {
                let opcode = self.u8_at(offset + 1);
                let index = usize::from(self.u16_at(offset + 2));
                self.set_local(&mut instruction, opcode, index)?;
            }
            ILOAD | LLOAD | FLOAD | DLOAD | ALOAD | ISTORE | LSTORE | FSTORE | DSTORE | ASTORE
            | IINC | RET => {
                let index = usize::from(self.u8_at(offset + 1));
                self.set_local(&mut instruction, raw, index)?;
            }
            ILOAD_0..=ALOAD_3 => {
                let step = raw - ILOAD_0;
                self.set_local(&mut instruction, ILOAD + step / 4, usize::from(step % 4))?;
            }
            ISTORE_0..=ASTORE_3 => {
                let step = raw - ISTORE_0;
                self.set_local(&mut instruction, ISTORE + step / 4, usize::from(step % 4))?;
            }
            _ => {}
        }
        Ok(instruction)
    }

    fn branch_target(&self, offset: usize, delta: i64) -> VerifyResult<usize> {
        match self.target(offset as i64 + delta) {
            Some(target) => Ok(target),
            None => verify_error!("Illegal target of jump or branch"),
        }
    }

    fn ldc_mask(&self) -> u32 {
        let mut mask =
            ConstantTag::Integer.bit() | ConstantTag::Float.bit() | ConstantTag::String.bit();
        let major = self.cx.major_version;
        if major >= LDC_CLASS_MAJOR_VERSION {
            mask |= ConstantTag::Class.bit();
        }
        if major >= LDC_METHOD_HANDLE_MAJOR_VERSION {
            mask |= ConstantTag::MethodHandle.bit() | ConstantTag::MethodType.bit();
        }
        mask
    }

    fn switch_targets(&self, opcode: u8, offset: usize) -> VerifyResult<Vec<usize>> {
        let base = offset + 1 + padding(offset);
        if self.cx.major_version < NONZERO_PADDING_BYTES_IN_SWITCH_MAJOR_VERSION
            && self.code[offset + 1..base].iter().any(|byte| *byte != 0)
        {
            verify_error!("Non zero padding bytes in switch");
        }
        let (keys, first_target, stride) = if opcode == TABLESWITCH {
            let low = i64::from(self.i32_at(base + 4));
            let high = i64::from(self.i32_at(base + 8));
            ((high - low + 1) as usize, base + 12, 4)
        } else {
            let npairs = self.i32_at(base + 4) as usize;
            for pair in 1..npairs {
                let previous = self.i32_at(base + 8 * pair);
                let next = self.i32_at(base + 8 * (pair + 1));
                if previous >= next {
                    verify_error!("Unsorted lookup switch");
                }
            }
            (npairs, base + 12, 8)
        };
        let Some(default) = self.target(offset as i64 + i64::from(self.i32_at(base))) else {
            verify_error!("Illegal default target in switch");
        };
        let mut targets = vec![default; keys + 1];
        for key in 0..keys {
            let delta = i64::from(self.i32_at(first_target + key * stride));
            let Some(target) = self.target(offset as i64 + delta) else {
                verify_error!("Illegal branch in tableswitch");
            };
            targets[keys - key] = target;
        }
        Ok(targets)
    }

    fn decode_invoke(&mut self, instruction: &mut Instruction) -> VerifyResult<()> {
        let opcode = instruction.opcode;
        let offset = instruction.offset;
        let index = self.u16_at(offset + 1);
        let mask = match opcode {
            INVOKESTATIC if self.cx.major_version < STATIC_METHOD_IN_INTERFACE_MAJOR_VERSION => {
                ConstantTag::Methodref.bit()
            }
            INVOKESTATIC => ConstantTag::Methodref.bit() | ConstantTag::InterfaceMethodref.bit(),
            INVOKEINTERFACE => ConstantTag::InterfaceMethodref.bit(),
            _ => ConstantTag::Methodref.bit(),
        };
        self.cx.check_constant(index, mask)?;
        let class_model = self.cx.class;
        let Some(member) = class_model.cp_member(usize::from(index)) else {
            verify_error!("Illegal type in constant pool");
        };
        let class = self.cx.lattice.class_name_to_info(&member.class_name)?;
        let init = member.name == "<init>";
        if init {
            if opcode != INVOKESPECIAL {
                verify_error!("Must call initializers using invokespecial");
            }
        } else {
            if member.name.starts_with('<') {
                verify_error!("Illegal call to internal method");
            }
            if opcode == INVOKESPECIAL
                && class != self.cx.current
                && Some(class) != self.cx.superclass
                && !self.cx.superclasses.contains(&class)
            {
                verify_error!("Illegal use of nonvirtual function call");
            }
        }
        if opcode == INVOKEINTERFACE {
            let args_size = match parameter_slots(&member.signature) {
                Ok(slots) => slots + 1,
                Err(_) => verify_error!("Illegal signature {}", member.signature),
            };
            if args_size != usize::from(self.u8_at(offset + 3)) {
                verify_error!("Inconsistent args_size for invokeinterface");
            }
            if self.u8_at(offset + 4) != 0 {
                verify_error!("Fourth operand byte of invokeinterface must be zero");
            }
        } else if matches!(opcode, INVOKEVIRTUAL | INVOKESPECIAL) {
            instruction.protected = self.is_protected(index, true)?;
        }
        instruction.operand = Operand::Invoke { index, class, init };
        Ok(())
    }

    fn decode_class_operand(
        &mut self,
        opcode: u8,
        offset: usize,
        inumber: usize,
    ) -> VerifyResult<Operand> {
        let index = self.u16_at(offset + 1);
        self.cx.check_constant(index, ConstantTag::Class.bit())?;
        let class_model = self.cx.class;
        let name = class_model.cp_class_name(usize::from(index)).unwrap_or_default();
        let target = self.cx.lattice.class_name_to_info(name)?;
        if target.kind == ItemKind::Bogus {
            verify_error!("Illegal type");
        }
        let operand = match opcode {
            ANEWARRAY => {
                if usize::from(target.indirection) >= MAX_ARRAY_DIMENSIONS {
                    verify_error!("Array with too many dimensions");
                }
                Operand::Type(target.with_indirection(target.indirection + 1))
            }
            NEW => {
                if target.with_zero_extra() != FullInfo::NULL {
                    verify_error!("Illegal creation of multi-dimensional array");
                }
                Operand::New {
                    uninit: FullInfo::new_object(inumber as u16),
                    class: target,
                }
            }
            MULTIANEWARRAY => {
                let dimensions = self.u8_at(offset + 3);
                if dimensions == 0 || u16::from(dimensions) > target.indirection {
                    verify_error!("Illegal dimension argument");
                }
                Operand::MultiArray {
                    class: target,
                    dimensions,
                }
            }
            _ => Operand::Type(target),
        };
        Ok(operand)
    }

    fn set_local(&self, instruction: &mut Instruction, opcode: u8, index: usize) -> VerifyResult<()> {
        let max_locals = usize::from(self.method.max_locals);
        let last = match opcode {
            LLOAD | DLOAD | LSTORE | DSTORE => index + 1,
            _ => index,
        };
        if last >= max_locals {
            verify_error!("Illegal local variable number");
        }
        instruction.opcode = opcode;
        instruction.operand = Operand::Local(index);
        Ok(())
    }

    /// Access to a protected member inherited from a superclass in another package.
    fn is_protected(&mut self, index: u16, is_method: bool) -> VerifyResult<bool> {
        let class = self.cx.class;
        let Some(member) = class.cp_member(usize::from(index)) else {
            return Ok(false);
        };
        let class_info = self.cx.lattice.class_name_to_info(&member.class_name)?;
        if !self.cx.superclasses.contains(&class_info) {
            return Ok(false);
        }
        let env = self.cx.env;
        let mut called = Some(self.cx.lattice.handle_of(class_info)?);
        while let Some(handle) = called {
            let access = if is_method {
                env.method_modifiers(handle, &member.name, &member.signature)
            } else {
                env.field_modifiers(handle, &member.name, &member.signature)
            };
            if let Some(access) = access {
                return Ok(access.contains(AccessFlags::PROTECTED)
                    && !env.is_same_class_package(handle, self.cx.handle));
            }
            called = env.superclass(handle);
        }
        Ok(false)
    }

    fn handlers(&mut self, instruction_count: usize) -> VerifyResult<Vec<Handler>> {
        let method = self.method;
        let class_model = self.cx.class;
        let table = &method.exception_table;
        if method.max_stack < 1 && !table.is_empty() {
            verify_error!("Stack size too large");
        }
        let code_length = self.code.len();
        let mut handlers = Vec::with_capacity(table.len());
        for entry in table {
            let start_pc = usize::from(entry.start_pc);
            let end_pc = usize::from(entry.end_pc);
            let start = self.target(start_pc as i64);
            let end = if end_pc == code_length {
                Some(instruction_count)
            } else {
                self.target(end_pc as i64)
            };
            let (Some(start), Some(end)) = (start, end) else {
                format_error!("Illegal exception table range");
            };
            if start_pc >= end_pc {
                format_error!("Illegal exception table range");
            }
            let handler = match self.target(i64::from(entry.handler_pc)) {
                Some(handler) if entry.handler_pc > 0 => handler,
                _ => format_error!("Illegal exception table handler"),
            };
            let catch = if entry.catch_type == 0 {
                self.cx.lattice.known.throwable
            } else {
                self.cx.check_constant(entry.catch_type, ConstantTag::Class.bit())?;
                let name = class_model
                    .cp_class_name(usize::from(entry.catch_type))
                    .unwrap_or_default();
                let catch = self.cx.lattice.classes.object_by_name(name)?;
                let throwable = self.cx.lattice.known.throwable;
                if !self.cx.lattice.is_assignable(catch, throwable)? {
                    verify_error!("catch_type not a subclass of Throwable");
                }
                catch
            };
            handlers.push(Handler {
                start,
                end,
                handler,
                catch,
            });
        }
        Ok(handlers)
    }
}

#[cfg(test)]
mod tests {
    use crate::fault::VerifyOutcome;
    use crate::opcodes::*;
    use crate::test_harness::{ClassBuilder, MethodBuilder, verify_one};

    fn message(class: ClassBuilder) -> String {
        verify_one(class).message().unwrap_or_default().to_owned()
    }

    fn run(signature: &str, max_stack: u16, code: &[u8]) -> MethodBuilder {
        MethodBuilder::new("run", signature)
            .static_method()
            .max_stack(max_stack)
            .code(code)
    }

    fn with_method(name: &str, method: MethodBuilder) -> ClassBuilder {
        let mut class = ClassBuilder::new(name);
        class.method(method);
        class
    }

    /// `iload_0; tableswitch 0..0; return`, with the switch at offset 1 and `return` at 20.
    fn tableswitch(padding: u8, default: u8, target: u8) -> Vec<u8> {
        vec![
            ILOAD_0, TABLESWITCH, padding, 0, 0, 0, 0, default, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            target, RETURN,
        ]
    }

    /// `iload_0; lookupswitch` with two keys, every target on the `return` at 28.
    fn lookupswitch(first: u8, second: u8) -> Vec<u8> {
        vec![
            ILOAD_0, LOOKUPSWITCH, 0, 0, 0, 0, 0, 27, 0, 0, 0, 2, 0, 0, 0, first, 0, 0, 0, 27, 0,
            0, 0, second, 0, 0, 0, 27, RETURN,
        ]
    }

    #[test]
    fn switch_padding_is_checked_before_version_51() {
        let clean = with_method("p/Switch", run("(I)V", 1, &tableswitch(0, 19, 19)));
        assert_eq!(verify_one(clean), VerifyOutcome::Ok);

        let dirty = with_method("p/Switch", run("(I)V", 1, &tableswitch(1, 19, 19)));
        assert!(message(dirty).ends_with("Non zero padding bytes in switch"));

        let mut tolerated = with_method("p/Switch", run("(I)V", 1, &tableswitch(1, 19, 19)));
        tolerated.major_version(51);
        assert_eq!(verify_one(tolerated), VerifyOutcome::Ok);
    }

    #[test]
    fn switch_targets_must_start_instructions() {
        // offset 3 is a padding byte of the switch itself
        let default = with_method("p/Switch", run("(I)V", 1, &tableswitch(0, 2, 19)));
        assert!(message(default).ends_with("Illegal default target in switch"));

        let entry = with_method("p/Switch", run("(I)V", 1, &tableswitch(0, 19, 2)));
        assert!(message(entry).ends_with("Illegal branch in tableswitch"));
    }

    #[test]
    fn lookupswitch_keys_must_increase() {
        let sorted = with_method("p/Lookup", run("(I)V", 1, &lookupswitch(3, 5)));
        assert_eq!(verify_one(sorted), VerifyOutcome::Ok);

        let unsorted = with_method("p/Lookup", run("(I)V", 1, &lookupswitch(5, 3)));
        assert!(message(unsorted).ends_with("Unsorted lookup switch"));

        let repeated = with_method("p/Lookup", run("(I)V", 1, &lookupswitch(4, 4)));
        assert!(message(repeated).ends_with("Unsorted lookup switch"));
    }

    #[test]
    fn invokedynamic_is_rejected() {
        let class = with_method("p/Indy", run("()V", 1, &[INVOKEDYNAMIC, 0, 1, 0, 0, RETURN]));
        assert!(
            message(class)
                .ends_with("invokedynamic bytecode is not supported in this class file version")
        );
    }

    #[test]
    fn invokespecial_stays_within_the_class_chain() {
        let mut unrelated = ClassBuilder::new("p/Call");
        let length = unrelated.method_ref("java/lang/String", "length", "()I");
        let [high, low] = length.to_be_bytes();
        unrelated.method(run(
            "(Ljava/lang/String;)I",
            1,
            &[ALOAD_0, INVOKESPECIAL, high, low, IRETURN],
        ));
        assert!(message(unrelated).ends_with("Illegal use of nonvirtual function call"));

        let mut inherited = ClassBuilder::new("p/Call");
        let hash = inherited.method_ref("java/lang/Object", "hashCode", "()I");
        let [high, low] = hash.to_be_bytes();
        inherited.method(MethodBuilder::new("hash", "()I").code(&[
            ALOAD_0,
            INVOKESPECIAL,
            high,
            low,
            IRETURN,
        ]));
        assert_eq!(verify_one(inherited), VerifyOutcome::Ok);
    }

    #[test]
    fn internal_methods_are_called_only_as_initializers() {
        let mut virtual_init = ClassBuilder::new("p/Init");
        let init = virtual_init.method_ref("java/lang/Object", "<init>", "()V");
        let [high, low] = init.to_be_bytes();
        virtual_init.method(run(
            "(Ljava/lang/Object;)V",
            1,
            &[ALOAD_0, INVOKEVIRTUAL, high, low, RETURN],
        ));
        assert!(message(virtual_init).ends_with("Must call initializers using invokespecial"));

        let mut clinit = ClassBuilder::new("p/Init");
        let method = clinit.method_ref("p/Init", "<clinit>", "()V");
        let [high, low] = method.to_be_bytes();
        clinit.method(run("()V", 1, &[INVOKESTATIC, high, low, RETURN]));
        assert!(message(clinit).ends_with("Illegal call to internal method"));
    }

    #[test]
    fn invokeinterface_operand_bytes_are_checked() {
        let build = |count: u8, fourth: u8| {
            let mut class = ClassBuilder::new("p/Caller");
            let method = class.interface_method_ref("p/Task", "run", "(I)V");
            let [high, low] = method.to_be_bytes();
            class.method(run(
                "(Lp/Task;)V",
                2,
                &[ALOAD_0, ICONST_1, INVOKEINTERFACE, high, low, count, fourth, RETURN],
            ));
            class
        };
        assert_eq!(verify_one(build(2, 0)), VerifyOutcome::Ok);
        assert!(message(build(1, 0)).ends_with("Inconsistent args_size for invokeinterface"));
        assert!(
            message(build(2, 1)).ends_with("Fourth operand byte of invokeinterface must be zero")
        );
    }

    #[test]
    fn new_cannot_create_arrays() {
        let mut class = ClassBuilder::new("p/Alloc");
        let ints = class.class_ref("[I");
        let [high, low] = ints.to_be_bytes();
        class.method(run("()V", 1, &[NEW, high, low, POP, RETURN]));
        assert!(message(class).ends_with("Illegal creation of multi-dimensional array"));
    }

    #[test]
    fn multianewarray_dimensions_are_bounded_by_the_type() {
        let build = |dimensions: u8| {
            let mut class = ClassBuilder::new("p/Grid");
            let grid = class.class_ref("[[I");
            let [high, low] = grid.to_be_bytes();
            class.method(run(
                "()V",
                2,
                &[ICONST_1, ICONST_1, MULTIANEWARRAY, high, low, dimensions, POP, RETURN],
            ));
            class
        };
        assert_eq!(verify_one(build(2)), VerifyOutcome::Ok);
        assert!(message(build(0)).ends_with("Illegal dimension argument"));
        assert!(message(build(3)).ends_with("Illegal dimension argument"));
    }

    #[test]
    fn newarray_type_codes() {
        let ints = with_method("p/Prims", run("()V", 1, &[ICONST_1, NEWARRAY, 10, POP, RETURN]));
        assert_eq!(verify_one(ints), VerifyOutcome::Ok);

        let bad = with_method("p/Prims", run("()V", 1, &[ICONST_1, NEWARRAY, 3, POP, RETURN]));
        assert!(message(bad).ends_with("Bad type passed to newarray"));
    }

    #[test]
    fn locals_must_fit_below_max_locals() {
        let store = |code: &[u8], max_locals: u16| {
            with_method("p/Slots", run("()V", 2, code).max_locals(max_locals))
        };
        assert_eq!(verify_one(store(&[ICONST_0, ISTORE_0, RETURN], 1)), VerifyOutcome::Ok);
        assert!(
            message(store(&[ICONST_0, ISTORE_1, RETURN], 1)).ends_with("Illegal local variable number")
        );
        assert_eq!(verify_one(store(&[LCONST_0, LSTORE_0, RETURN], 2)), VerifyOutcome::Ok);
        // the second word of the long would land on register 2
        assert!(
            message(store(&[LCONST_0, LSTORE_1, RETURN], 2)).ends_with("Illegal local variable number")
        );
        assert!(
            message(store(&[ICONST_0, WIDE, ISTORE, 0, 1, RETURN], 1))
                .ends_with("Illegal local variable number")
        );
    }

    #[test]
    fn ldc_of_a_class_needs_version_49() {
        let build = |major: u16| {
            let mut class = ClassBuilder::new("p/Ldc");
            let this = class.class_ref("p/Ldc");
            class.major_version(major);
            class.method(run("()V", 1, &[LDC, this as u8, POP, RETURN]));
            class
        };
        assert!(message(build(48)).ends_with("Illegal type in constant pool"));
        assert_eq!(verify_one(build(49)), VerifyOutcome::Ok);
    }
}
