use bitflags::bitflags;

bitflags! {
    /// Access flags shared by classes, fields and methods.
    ///
    /// Bits that mean different things on different members (0x0020 is `ACC_SUPER` on a class and
    /// `ACC_SYNCHRONIZED` on a method) share one constant.
    pub(crate) struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

impl AccessFlags {
    /// A member cannot be public and private/protected at the same time.
    pub(crate) fn is_inconsistent(self) -> bool {
        self.contains(AccessFlags::PUBLIC)
            && self.intersects(AccessFlags::PRIVATE | AccessFlags::PROTECTED)
    }
}

/// Constant pool tags, numbered as in the class file format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum ConstantTag {
    Utf8 = 1,
    Integer = 3,
    Float = 4,
    Long = 5,
    Double = 6,
    Class = 7,
    String = 8,
    Fieldref = 9,
    Methodref = 10,
    InterfaceMethodref = 11,
    NameAndType = 12,
    MethodHandle = 15,
    MethodType = 16,
    Dynamic = 17,
    InvokeDynamic = 18,
    Module = 19,
    Package = 20,
}

impl ConstantTag {
    pub(crate) fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Symbolic reference to a field or method.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MemberRef {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) signature: String,
}

/// Resolved constant pool entry; only the parts the verifier reads are kept.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ConstantEntry {
    /// Index 0 and the upper slot of long/double constants.
    Unusable,
    Utf8(String),
    Integer,
    Float,
    Long,
    Double,
    Class(String),
    String,
    Fieldref(MemberRef),
    Methodref(MemberRef),
    InterfaceMethodref(MemberRef),
    NameAndType,
    MethodHandle,
    MethodType,
    Dynamic,
    InvokeDynamic,
    Module,
    Package,
}

impl ConstantEntry {
    pub(crate) fn tag(&self) -> Option<ConstantTag> {
        let tag = match self {
            ConstantEntry::Unusable => return None,
            ConstantEntry::Utf8(_) => ConstantTag::Utf8,
            ConstantEntry::Integer => ConstantTag::Integer,
            ConstantEntry::Float => ConstantTag::Float,
            ConstantEntry::Long => ConstantTag::Long,
            ConstantEntry::Double => ConstantTag::Double,
            ConstantEntry::Class(_) => ConstantTag::Class,
            ConstantEntry::String => ConstantTag::String,
            ConstantEntry::Fieldref(_) => ConstantTag::Fieldref,
            ConstantEntry::Methodref(_) => ConstantTag::Methodref,
            ConstantEntry::InterfaceMethodref(_) => ConstantTag::InterfaceMethodref,
            ConstantEntry::NameAndType => ConstantTag::NameAndType,
            ConstantEntry::MethodHandle => ConstantTag::MethodHandle,
            ConstantEntry::MethodType => ConstantTag::MethodType,
            ConstantEntry::Dynamic => ConstantTag::Dynamic,
            ConstantEntry::InvokeDynamic => ConstantTag::InvokeDynamic,
            ConstantEntry::Module => ConstantTag::Module,
            ConstantEntry::Package => ConstantTag::Package,
        };
        Some(tag)
    }
}

/// Format-checked view of one class file.
#[derive(Clone, Debug)]
pub(crate) struct ClassModel {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) access: AccessFlags,
    pub(crate) major_version: u16,
    pub(crate) constant_pool: Vec<ConstantEntry>,
    pub(crate) fields: Vec<FieldModel>,
    pub(crate) methods: Vec<MethodModel>,
}

/// Field declaration.
#[derive(Clone, Debug)]
pub(crate) struct FieldModel {
    pub(crate) name: String,
    pub(crate) signature: String,
    pub(crate) access: AccessFlags,
}

/// Method declaration with its `Code` attribute flattened in.
#[derive(Clone, Debug)]
pub(crate) struct MethodModel {
    pub(crate) name: String,
    pub(crate) signature: String,
    pub(crate) access: AccessFlags,
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    /// Argument slots including `this` for instance methods.
    pub(crate) args_size: u16,
    pub(crate) code: Vec<u8>,
    pub(crate) exception_table: Vec<ExceptionEntry>,
    /// Constant pool indexes from the `Exceptions` attribute.
    pub(crate) exceptions: Vec<u16>,
    /// Overpass methods generated by a VM are trusted without checking.
    pub(crate) vm_generated: bool,
}

impl MethodModel {
    pub(crate) fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

/// One row of a method's exception table, in byte offsets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ExceptionEntry {
    pub(crate) start_pc: u16,
    pub(crate) end_pc: u16,
    pub(crate) handler_pc: u16,
    pub(crate) catch_type: u16,
}

impl ClassModel {
    pub(crate) fn constant_count(&self) -> usize {
        self.constant_pool.len()
    }

    pub(crate) fn cp_tag(&self, index: usize) -> Option<ConstantTag> {
        self.constant_pool.get(index).and_then(ConstantEntry::tag)
    }

    pub(crate) fn cp_class_name(&self, index: usize) -> Option<&str> {
        match self.constant_pool.get(index) {
            Some(ConstantEntry::Class(name)) => Some(name),
            _ => None,
        }
    }

    pub(crate) fn cp_member(&self, index: usize) -> Option<&MemberRef> {
        match self.constant_pool.get(index) {
            Some(
                ConstantEntry::Fieldref(member)
                | ConstantEntry::Methodref(member)
                | ConstantEntry::InterfaceMethodref(member),
            ) => Some(member),
            _ => None,
        }
    }

    pub(crate) fn is_interface(&self) -> bool {
        self.access.contains(AccessFlags::INTERFACE)
    }

    pub(crate) fn package(&self) -> &str {
        package_of(&self.name)
    }
}

/// Package prefix of an internal class name, empty for the unnamed package.
pub(crate) fn package_of(name: &str) -> &str {
    match name.rfind('/') {
        Some(index) => &name[..index],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inconsistent_access_bits() {
        assert!((AccessFlags::PUBLIC | AccessFlags::PRIVATE).is_inconsistent());
        assert!((AccessFlags::PUBLIC | AccessFlags::PROTECTED).is_inconsistent());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::STATIC).is_inconsistent());
        assert!(!(AccessFlags::PRIVATE | AccessFlags::PROTECTED).is_inconsistent());
    }

    #[test]
    fn tag_bits_follow_class_file_numbering() {
        assert_eq!(ConstantTag::Class.bit(), 1 << 7);
        assert_eq!(ConstantTag::MethodType.bit(), 1 << 16);
        assert_eq!(ConstantEntry::Unusable.tag(), None);
    }

    #[test]
    fn package_of_strips_simple_name() {
        assert_eq!(package_of("java/lang/Object"), "java/lang");
        assert_eq!(package_of("Foo"), "");
    }
}
