use crate::class_table::ClassTable;
use crate::classpath::ClassHandle;
use crate::fault::{VerifyResult, verify_error};
use crate::fullinfo::{FullInfo, ItemKind};

pub(crate) const MAX_ARRAY_DIMENSIONS: usize = 255;

/// Field type read from a descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct FieldType {
    /// Stack template code: `I`, `F`, `D`, `L` or `A`.
    pub(crate) code: char,
    pub(crate) info: FullInfo,
}

/// Reference types the merge rules single out.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WellKnown {
    pub(crate) object: FullInfo,
    pub(crate) string: FullInfo,
    pub(crate) throwable: FullInfo,
    pub(crate) cloneable: FullInfo,
    pub(crate) serializable: FullInfo,
}

/// Subtyping and least-upper-bound queries over verifier types.
pub(crate) struct TypeLattice<'e> {
    pub(crate) classes: ClassTable<'e>,
    pub(crate) known: WellKnown,
}

impl<'e> TypeLattice<'e> {
    pub(crate) fn new(mut classes: ClassTable<'e>) -> VerifyResult<Self> {
        let known = WellKnown {
            object: classes.object_by_name("java/lang/Object")?,
            string: classes.object_by_name("java/lang/String")?,
            throwable: classes.object_by_name("java/lang/Throwable")?,
            cloneable: classes.object_by_name("java/lang/Cloneable")?,
            serializable: classes.object_by_name("java/io/Serializable")?,
        };
        Ok(TypeLattice { classes, known })
    }

    /// `to := from` is legal.
    pub(crate) fn is_assignable(&mut self, from: FullInfo, to: FullInfo) -> VerifyResult<bool> {
        Ok(self.merge(from, to, true)? == to)
    }

    /// Least upper bound of two types, or `Bogus` when they have none.
    ///
    /// With `for_assignment` the answer is only meaningful compared against `target`: it equals
    /// `target` exactly when `value` can be stored in it, and interfaces accept any object.
    pub(crate) fn merge(
        &mut self,
        value: FullInfo,
        target: FullInfo,
        for_assignment: bool,
    ) -> VerifyResult<FullInfo> {
        if value == target {
            return Ok(value);
        }
        if !value.is_reference() || !target.is_reference() {
            return Ok(FullInfo::BOGUS);
        }
        if value.is_null() {
            return Ok(target);
        }
        if target.is_null() {
            return Ok(value);
        }
        let object = self.known.object;
        if target == object {
            return Ok(target);
        }
        if value == object {
            if for_assignment
                && target.with_zero_extra() == FullInfo::NULL
                && self.is_interface(target)?
            {
                return Ok(target);
            }
            return Ok(value);
        }
        if value.is_array() || target.is_array() {
            self.merge_arrays(value, target, for_assignment)
        } else {
            self.merge_classes(value, target, for_assignment)
        }
    }

    fn is_special_array_super(&self, info: FullInfo) -> bool {
        info == self.known.cloneable || info == self.known.serializable
    }

    fn merge_arrays(
        &mut self,
        mut value: FullInfo,
        mut target: FullInfo,
        for_assignment: bool,
    ) -> VerifyResult<FullInfo> {
        if self.is_special_array_super(target) {
            return Ok(target);
        }
        if self.is_special_array_super(value) {
            return Ok(value);
        }
        let object_id = self.known.object.extra;
        let mut value_dims = value.indirection;
        let mut target_dims = target.indirection;
        // Primitive arrays are promoted to arrays of Object one level up.
        if value.kind != ItemKind::Object {
            if value_dims == 0 {
                return Ok(FullInfo::BOGUS);
            }
            value_dims -= 1;
            value = FullInfo::object_array(object_id, value_dims);
        }
        if target.kind != ItemKind::Object {
            if target_dims == 0 {
                return Ok(FullInfo::BOGUS);
            }
            target_dims -= 1;
            target = FullInfo::object_array(object_id, target_dims);
        }
        let value_base = value.with_indirection(0);
        let target_base = target.with_indirection(0);
        if value_dims == target_dims {
            let base = self.merge(value_base, target_base, for_assignment)?;
            if base == FullInfo::BOGUS {
                return Ok(base);
            }
            return Ok(FullInfo::object_array(base.extra, value_dims));
        }
        if value_dims < target_dims {
            if self.is_special_array_super(value_base) {
                return Ok(value);
            }
            Ok(FullInfo::object_array(object_id, value_dims))
        } else {
            if self.is_special_array_super(target_base) {
                return Ok(target);
            }
            Ok(FullInfo::object_array(object_id, target_dims))
        }
    }

    fn merge_classes(
        &mut self,
        value: FullInfo,
        target: FullInfo,
        for_assignment: bool,
    ) -> VerifyResult<FullInfo> {
        let env = self.classes.env();
        let target_class = self.classes.resolve(target.extra)?;
        if env.is_interface(target_class) {
            return Ok(if for_assignment {
                target
            } else {
                self.known.object
            });
        }
        let value_class = self.classes.resolve(value.extra)?;
        if env.is_interface(value_class) {
            return Ok(self.known.object);
        }

        if for_assignment {
            let mut cursor = env.superclass(value_class);
            while let Some(class) = cursor {
                if class == target_class {
                    return Ok(target);
                }
                cursor = env.superclass(class);
            }
            return Ok(self.known.object);
        }

        let mut value_super = env.superclass(value_class);
        let mut target_super = env.superclass(target_class);
        while let (Some(value_step), Some(target_step)) = (value_super, target_super) {
            if value_step == target_class {
                return Ok(target);
            }
            if target_step == value_class {
                return Ok(value);
            }
            value_super = env.superclass(value_step);
            target_super = env.superclass(target_step);
        }
        // Bring the deeper class up to the depth of the shallower one.
        let mut value_cursor = Some(value_class);
        let mut target_cursor = Some(target_class);
        while let Some(step) = value_super {
            value_super = env.superclass(step);
            value_cursor = value_cursor.and_then(|class| env.superclass(class));
        }
        while let Some(step) = target_super {
            target_super = env.superclass(step);
            target_cursor = target_cursor.and_then(|class| env.superclass(class));
        }
        loop {
            match (value_cursor, target_cursor) {
                (Some(left), Some(right)) if left == right => return self.classes.class_info(left),
                (Some(left), Some(right)) => {
                    value_cursor = env.superclass(left);
                    target_cursor = env.superclass(right);
                }
                // Hierarchies without a common root.
                _ => return Ok(self.known.object),
            }
        }
    }

    fn is_interface(&mut self, info: FullInfo) -> VerifyResult<bool> {
        let handle = self.classes.resolve(info.extra)?;
        Ok(self.classes.env().is_interface(handle))
    }

    pub(crate) fn handle_of(&mut self, info: FullInfo) -> VerifyResult<ClassHandle> {
        self.classes.resolve(info.extra)
    }

    /// Parse one field type at the start of `signature`, returning it and the remaining text.
    ///
    /// `byte`, `char`, `short` and `boolean` read as `int` outside arrays. An unrecognised
    /// character yields no type.
    pub(crate) fn field_type<'s>(
        &mut self,
        signature: &'s str,
    ) -> VerifyResult<(Option<FieldType>, &'s str)> {
        let dims = signature.bytes().take_while(|byte| *byte == b'[').count();
        let rest = &signature[dims..];
        let Some(first) = rest.chars().next() else {
            return Ok((None, rest));
        };
        let after = &rest[first.len_utf8()..];
        let narrow = |kind: ItemKind| {
            if dims > 0 {
                FullInfo::of(kind)
            } else {
                FullInfo::INTEGER
            }
        };
        let (code, base, remaining) = match first {
            'Z' => ('I', narrow(ItemKind::Boolean), after),
            'B' => ('I', narrow(ItemKind::Byte), after),
            'C' => ('I', narrow(ItemKind::Char), after),
            'S' => ('I', narrow(ItemKind::Short), after),
            'I' => ('I', FullInfo::INTEGER, after),
            'F' => ('F', FullInfo::FLOAT, after),
            'D' => ('D', FullInfo::DOUBLE, after),
            'J' => ('L', FullInfo::LONG, after),
            'L' => {
                let Some(end) = after.find(';') else {
                    return Ok((None, after));
                };
                let info = self.classes.object_by_name(&after[..end])?;
                ('A', info, &after[end + 1..])
            }
            _ => return Ok((None, after)),
        };
        if dims == 0 {
            return Ok((Some(FieldType { code, info: base }), remaining));
        }
        if dims > MAX_ARRAY_DIMENSIONS {
            verify_error!("Array with too many dimensions");
        }
        let info = base.with_indirection(dims as u16);
        Ok((Some(FieldType { code: 'A', info }), remaining))
    }

    /// Parameter types of a method descriptor and the text after its closing parenthesis.
    pub(crate) fn method_parameters<'s>(
        &mut self,
        signature: &'s str,
    ) -> VerifyResult<(Vec<Option<FieldType>>, &'s str)> {
        let Some(mut rest) = signature.strip_prefix('(') else {
            verify_error!("Illegal signature {signature}");
        };
        let mut parameters = Vec::new();
        loop {
            if let Some(result) = rest.strip_prefix(')') {
                return Ok((parameters, result));
            }
            if rest.is_empty() {
                verify_error!("Illegal signature {signature}");
            }
            let (field, next) = self.field_type(rest)?;
            parameters.push(field);
            rest = next;
        }
    }

    /// Type of a class constant: a descriptor when it names an array, else an object.
    pub(crate) fn class_name_to_info(&mut self, name: &str) -> VerifyResult<FullInfo> {
        if name.starts_with('[') {
            let (field, _) = self.field_type(name)?;
            Ok(field.map_or(FullInfo::BOGUS, |field| field.info))
        } else {
            self.classes.object_by_name(name)
        }
    }
}

/// Element type of an array type; narrow primitives read back as `int`.
pub(crate) fn decrement_indirection(array: FullInfo) -> FullInfo {
    if array.is_null() {
        return FullInfo::NULL;
    }
    let indirection = array.indirection.saturating_sub(1);
    let kind = match array.kind {
        ItemKind::Short | ItemKind::Byte | ItemKind::Boolean | ItemKind::Char
            if indirection == 0 =>
        {
            ItemKind::Integer
        }
        kind => kind,
    };
    FullInfo::new(kind, indirection, array.extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::ClassPath;
    use crate::ir::{AccessFlags, ClassModel, ConstantEntry};

    fn class(name: &str, super_name: &str, access: AccessFlags) -> ClassModel {
        ClassModel {
            name: name.to_string(),
            super_name: Some(super_name.to_string()),
            access,
            major_version: 52,
            constant_pool: vec![ConstantEntry::Unusable],
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    fn class_path() -> ClassPath {
        ClassPath::new(vec![
            class("p/Animal", "java/lang/Object", AccessFlags::PUBLIC),
            class("p/Dog", "p/Animal", AccessFlags::PUBLIC),
            class("p/Cat", "p/Animal", AccessFlags::PUBLIC),
            class("p/Puppy", "p/Dog", AccessFlags::PUBLIC),
            class(
                "p/Pet",
                "java/lang/Object",
                AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT,
            ),
        ])
        .expect("class path")
    }

    fn with_lattice(test: impl FnOnce(&mut TypeLattice<'_>)) {
        let path = class_path();
        let current = path.lookup("p/Dog").expect("dog");
        let mut lattice = TypeLattice::new(ClassTable::new(&path, current)).expect("lattice");
        test(&mut lattice);
    }

    fn object(lattice: &mut TypeLattice<'_>, name: &str) -> FullInfo {
        lattice.classes.object_by_name(name).expect("class id")
    }

    #[test]
    fn siblings_merge_to_common_superclass() {
        with_lattice(|lattice| {
            let dog = object(lattice, "p/Dog");
            let cat = object(lattice, "p/Cat");
            let animal = object(lattice, "p/Animal");
            assert_eq!(lattice.merge(dog, cat, false).expect("merge"), animal);
            assert_eq!(lattice.merge(cat, dog, false).expect("merge"), animal);
        });
    }

    #[test]
    fn uneven_depths_merge_to_common_superclass() {
        with_lattice(|lattice| {
            let puppy = object(lattice, "p/Puppy");
            let cat = object(lattice, "p/Cat");
            let animal = object(lattice, "p/Animal");
            assert_eq!(lattice.merge(puppy, cat, false).expect("merge"), animal);
            assert_eq!(lattice.merge(cat, puppy, false).expect("merge"), animal);
        });
    }

    #[test]
    fn null_and_object_rules() {
        with_lattice(|lattice| {
            let dog = object(lattice, "p/Dog");
            let object_info = lattice.known.object;
            assert!(lattice.is_assignable(FullInfo::NULL, dog).expect("null"));
            assert!(lattice.is_assignable(dog, object_info).expect("object"));
            assert!(!lattice.is_assignable(object_info, dog).expect("downcast"));
            assert!(!lattice.is_assignable(FullInfo::INTEGER, dog).expect("primitive"));
            assert_eq!(
                lattice.merge(FullInfo::INTEGER, FullInfo::FLOAT, false).expect("merge"),
                FullInfo::BOGUS
            );
        });
    }

    #[test]
    fn subclass_assigns_to_superclass_only() {
        with_lattice(|lattice| {
            let puppy = object(lattice, "p/Puppy");
            let animal = object(lattice, "p/Animal");
            assert!(lattice.is_assignable(puppy, animal).expect("up"));
            assert!(!lattice.is_assignable(animal, puppy).expect("down"));
        });
    }

    #[test]
    fn interfaces_accept_any_object_for_assignment() {
        with_lattice(|lattice| {
            let pet = object(lattice, "p/Pet");
            let cat = object(lattice, "p/Cat");
            let object_info = lattice.known.object;
            assert!(lattice.is_assignable(cat, pet).expect("class"));
            assert!(lattice.is_assignable(object_info, pet).expect("object"));
            assert_eq!(lattice.merge(cat, pet, false).expect("merge"), object_info);
        });
    }

    #[test]
    fn array_merges() {
        with_lattice(|lattice| {
            let dog = object(lattice, "p/Dog");
            let cat = object(lattice, "p/Cat");
            let animal = object(lattice, "p/Animal");
            let object_id = lattice.known.object.extra;
            let dogs = dog.with_indirection(1);
            let cats = cat.with_indirection(1);
            assert_eq!(
                lattice.merge(dogs, cats, false).expect("merge"),
                animal.with_indirection(1)
            );
            let ints = FullInfo::new(ItemKind::Integer, 1, 0);
            let floats = FullInfo::new(ItemKind::Float, 1, 0);
            assert_eq!(
                lattice.merge(ints, floats, false).expect("merge"),
                lattice.known.object
            );
            let nested = dog.with_indirection(2);
            assert_eq!(
                lattice.merge(nested, dogs, false).expect("merge"),
                FullInfo::object_array(object_id, 1)
            );
            let cloneable = lattice.known.cloneable;
            assert!(lattice.is_assignable(ints, cloneable).expect("cloneable"));
            assert!(!lattice.is_assignable(ints, dog).expect("class"));
        });
    }

    #[test]
    fn field_types_follow_descriptor_grammar() {
        with_lattice(|lattice| {
            let (field, rest) = lattice.field_type("BLp/Dog;").expect("parse");
            assert_eq!(
                field,
                Some(FieldType {
                    code: 'I',
                    info: FullInfo::INTEGER
                })
            );
            let (field, rest) = lattice.field_type(rest).expect("parse");
            let dog = object(lattice, "p/Dog");
            assert_eq!(field, Some(FieldType { code: 'A', info: dog }));
            assert!(rest.is_empty());

            let (field, _) = lattice.field_type("[[B").expect("parse");
            assert_eq!(
                field.map(|field| field.info),
                Some(FullInfo::new(ItemKind::Byte, 2, 0))
            );
            let (field, _) = lattice.field_type("J").expect("parse");
            assert_eq!(field.map(|field| field.code), Some('L'));
            let (field, _) = lattice.field_type("V").expect("parse");
            assert!(field.is_none());
        });
    }

    #[test]
    fn too_many_dimensions_is_rejected() {
        with_lattice(|lattice| {
            let signature = format!("{}I", "[".repeat(256));
            assert!(lattice.field_type(&signature).is_err());
            let signature = format!("{}I", "[".repeat(255));
            assert!(lattice.field_type(&signature).is_ok());
        });
    }

    #[test]
    fn element_type_of_narrow_arrays_is_int() {
        let bytes = FullInfo::new(ItemKind::Byte, 1, 0);
        assert_eq!(decrement_indirection(bytes), FullInfo::INTEGER);
        let nested = FullInfo::new(ItemKind::Char, 2, 0);
        assert_eq!(
            decrement_indirection(nested),
            FullInfo::new(ItemKind::Char, 1, 0)
        );
        assert_eq!(decrement_indirection(FullInfo::NULL), FullInfo::NULL);
    }
}
