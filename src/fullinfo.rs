use std::fmt;

/// Kind of value tracked in a register or stack slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum ItemKind {
    Bogus,
    Void,
    Integer,
    Float,
    Double,
    Double2,
    Long,
    Long2,
    Array,
    Object,
    NewObject,
    InitObject,
    ReturnAddress,
    Byte,
    Short,
    Char,
    Boolean,
}

impl ItemKind {
    /// Kind that occupies the second slot of a two-word value.
    fn second_word(self) -> ItemKind {
        match self {
            ItemKind::Double => ItemKind::Double2,
            ItemKind::Long => ItemKind::Long2,
            other => other,
        }
    }

    fn letter(self) -> char {
        match self {
            ItemKind::Bogus => '#',
            ItemKind::Void => 'V',
            ItemKind::Integer => 'I',
            ItemKind::Float => 'F',
            ItemKind::Double => 'D',
            ItemKind::Double2 => 'd',
            ItemKind::Long => 'L',
            ItemKind::Long2 => 'l',
            ItemKind::Array => '[',
            ItemKind::Object => 'A',
            ItemKind::NewObject => '@',
            ItemKind::InitObject => 'T',
            ItemKind::ReturnAddress => 'R',
            ItemKind::Byte => 'B',
            ItemKind::Short => 'S',
            ItemKind::Char => 'C',
            ItemKind::Boolean => 'Z',
        }
    }
}

/// Verifier type: a kind, an array depth and a kind-specific payload.
///
/// For `Object` (and arrays whose base is an object) `extra` is a class id with 0 meaning null.
/// For `NewObject` it is the instruction number of the `new`, and for `ReturnAddress` the
/// instruction number of the subroutine entry.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct FullInfo {
    pub(crate) kind: ItemKind,
    pub(crate) indirection: u16,
    pub(crate) extra: u16,
}

impl FullInfo {
    pub(crate) const BOGUS: FullInfo = FullInfo::of(ItemKind::Bogus);
    pub(crate) const VOID: FullInfo = FullInfo::of(ItemKind::Void);
    pub(crate) const INTEGER: FullInfo = FullInfo::of(ItemKind::Integer);
    pub(crate) const FLOAT: FullInfo = FullInfo::of(ItemKind::Float);
    pub(crate) const LONG: FullInfo = FullInfo::of(ItemKind::Long);
    pub(crate) const DOUBLE: FullInfo = FullInfo::of(ItemKind::Double);
    pub(crate) const INIT_OBJECT: FullInfo = FullInfo::of(ItemKind::InitObject);
    pub(crate) const NULL: FullInfo = FullInfo::object(0);

    pub(crate) const fn of(kind: ItemKind) -> FullInfo {
        FullInfo {
            kind,
            indirection: 0,
            extra: 0,
        }
    }

    pub(crate) const fn new(kind: ItemKind, indirection: u16, extra: u16) -> FullInfo {
        FullInfo {
            kind,
            indirection,
            extra,
        }
    }

    pub(crate) const fn object(class_id: u16) -> FullInfo {
        FullInfo::new(ItemKind::Object, 0, class_id)
    }

    pub(crate) const fn object_array(class_id: u16, dimensions: u16) -> FullInfo {
        FullInfo::new(ItemKind::Object, dimensions, class_id)
    }

    pub(crate) const fn new_object(instruction: u16) -> FullInfo {
        FullInfo::new(ItemKind::NewObject, 0, instruction)
    }

    pub(crate) const fn return_address(entry: u16) -> FullInfo {
        FullInfo::new(ItemKind::ReturnAddress, 0, entry)
    }

    pub(crate) fn is_array(self) -> bool {
        self.indirection > 0
    }

    /// Object or array of anything.
    pub(crate) fn is_reference(self) -> bool {
        self.indirection > 0 || self.kind == ItemKind::Object
    }

    pub(crate) fn is_null(self) -> bool {
        self == FullInfo::NULL
    }

    /// Uninitialized object from `new` or the receiver of a constructor.
    pub(crate) fn is_uninitialized(self) -> bool {
        self.indirection == 0 && matches!(self.kind, ItemKind::NewObject | ItemKind::InitObject)
    }

    pub(crate) fn is_double_word(self) -> bool {
        self.indirection == 0 && matches!(self.kind, ItemKind::Long | ItemKind::Double)
    }

    /// Value stored in the second slot of a long or double.
    pub(crate) fn second_word(self) -> FullInfo {
        FullInfo::new(self.kind.second_word(), self.indirection, self.extra)
    }

    pub(crate) fn with_zero_extra(self) -> FullInfo {
        FullInfo::new(self.kind, self.indirection, 0)
    }

    pub(crate) fn with_indirection(self, indirection: u16) -> FullInfo {
        FullInfo::new(self.kind, indirection, self.extra)
    }
}

impl fmt::Debug for FullInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.indirection {
            f.write_str("[")?;
        }
        write!(f, "{}", self.kind.letter())?;
        if self.extra != 0 {
            write!(f, "{}", self.extra)?;
        }
        Ok(())
    }
}
