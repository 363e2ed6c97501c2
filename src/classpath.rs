use std::collections::BTreeMap;

use anyhow::Result;

use crate::ir::{AccessFlags, ClassModel, ConstantEntry, FieldModel, MethodModel};

/// Opaque reference to a loaded class.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct ClassHandle(usize);

/// Class loading and member lookup the verifier depends on.
pub(crate) trait ClassEnvironment: Sync {
    fn class(&self, handle: ClassHandle) -> &ClassModel;

    fn superclass(&self, handle: ClassHandle) -> Option<ClassHandle>;

    /// Resolve `name` as the loader of `from` would.
    fn find_class_from_class(&self, name: &str, from: ClassHandle) -> Option<ClassHandle>;

    fn class_name(&self, handle: ClassHandle) -> &str {
        &self.class(handle).name
    }

    fn is_interface(&self, handle: ClassHandle) -> bool {
        self.class(handle).is_interface()
    }

    fn is_same_class_package(&self, left: ClassHandle, right: ClassHandle) -> bool {
        self.class(left).package() == self.class(right).package()
    }

    /// Access flags of a field declared directly on `handle`.
    fn field_modifiers(&self, handle: ClassHandle, name: &str, signature: &str) -> Option<AccessFlags> {
        self.class(handle)
            .fields
            .iter()
            .find(|field| field.name == name && field.signature == signature)
            .map(|field| field.access)
    }

    /// Access flags of a method declared directly on `handle`.
    fn method_modifiers(
        &self,
        handle: ClassHandle,
        name: &str,
        signature: &str,
    ) -> Option<AccessFlags> {
        self.class(handle)
            .methods
            .iter()
            .find(|method| method.name == name && method.signature == signature)
            .map(|method| method.access)
    }
}

/// Every class visible to the verifier, keyed by internal name.
///
/// Scanned classes shadow the built-in platform classes of the same name.
pub(crate) struct ClassPath {
    classes: Vec<ClassModel>,
    index: BTreeMap<String, ClassHandle>,
}

impl ClassPath {
    pub(crate) fn new(classes: Vec<ClassModel>) -> Result<Self> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for class in &classes {
            *counts.entry(class.name.clone()).or_default() += 1;
        }
        let duplicates: Vec<String> = counts
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(name, count)| format!("{name}: {count}"))
            .collect();
        if !duplicates.is_empty() {
            anyhow::bail!("duplicate classes found: {}", duplicates.join(", "));
        }

        let mut all = classes;
        for platform in platform_classes() {
            if !counts.contains_key(platform.name.as_str()) {
                all.push(platform);
            }
        }
        let index = all
            .iter()
            .enumerate()
            .map(|(position, class)| (class.name.clone(), ClassHandle(position)))
            .collect();
        Ok(Self {
            classes: all,
            index,
        })
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<ClassHandle> {
        self.index.get(name).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }
}

impl ClassEnvironment for ClassPath {
    fn class(&self, handle: ClassHandle) -> &ClassModel {
        &self.classes[handle.0]
    }

    fn superclass(&self, handle: ClassHandle) -> Option<ClassHandle> {
        let super_name = self.class(handle).super_name.as_deref()?;
        self.lookup(super_name)
    }

    fn find_class_from_class(&self, name: &str, _from: ClassHandle) -> Option<ClassHandle> {
        self.lookup(name)
    }
}

const OBJECT: &str = "java/lang/Object";

/// Minimal models of the platform classes verification reasons about.
fn platform_classes() -> Vec<ClassModel> {
    let public = AccessFlags::PUBLIC | AccessFlags::SUPER;
    let interface = AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;
    let mut classes = vec![
        platform_class(OBJECT, None, public, vec![
            platform_method("<init>", "()V", AccessFlags::PUBLIC),
            platform_method("clone", "()Ljava/lang/Object;", AccessFlags::PROTECTED),
            platform_method("finalize", "()V", AccessFlags::PROTECTED),
            platform_method("hashCode", "()I", AccessFlags::PUBLIC),
            platform_method("equals", "(Ljava/lang/Object;)Z", AccessFlags::PUBLIC),
            platform_method("toString", "()Ljava/lang/String;", AccessFlags::PUBLIC),
            platform_method("getClass", "()Ljava/lang/Class;", AccessFlags::PUBLIC),
        ]),
        platform_class("java/lang/Cloneable", Some(OBJECT), interface, Vec::new()),
        platform_class("java/io/Serializable", Some(OBJECT), interface, Vec::new()),
        platform_class("java/lang/String", Some(OBJECT), public | AccessFlags::FINAL, vec![
            platform_method("<init>", "()V", AccessFlags::PUBLIC),
            platform_method("length", "()I", AccessFlags::PUBLIC),
        ]),
        platform_class("java/lang/Class", Some(OBJECT), public | AccessFlags::FINAL, Vec::new()),
        platform_class("java/lang/invoke/MethodHandle", Some(OBJECT), public, Vec::new()),
        platform_class("java/lang/invoke/MethodType", Some(OBJECT), public, Vec::new()),
        platform_class("java/lang/Throwable", Some(OBJECT), public, vec![
            platform_method("<init>", "()V", AccessFlags::PUBLIC),
            platform_method("<init>", "(Ljava/lang/String;)V", AccessFlags::PUBLIC),
        ]),
    ];
    for (name, super_name) in [
        ("java/lang/Exception", "java/lang/Throwable"),
        ("java/lang/Error", "java/lang/Throwable"),
        ("java/lang/RuntimeException", "java/lang/Exception"),
        ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
        ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
        ("java/lang/NullPointerException", "java/lang/RuntimeException"),
        ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
        ("java/io/IOException", "java/lang/Exception"),
    ] {
        classes.push(platform_class(name, Some(super_name), public, vec![
            platform_method("<init>", "()V", AccessFlags::PUBLIC),
            platform_method("<init>", "(Ljava/lang/String;)V", AccessFlags::PUBLIC),
        ]));
    }
    classes
}

fn platform_class(
    name: &str,
    super_name: Option<&str>,
    access: AccessFlags,
    methods: Vec<MethodModel>,
) -> ClassModel {
    ClassModel {
        name: name.to_string(),
        super_name: super_name.map(str::to_string),
        access,
        major_version: 52,
        constant_pool: vec![ConstantEntry::Unusable],
        fields: Vec::<FieldModel>::new(),
        methods,
    }
}

fn platform_method(name: &str, signature: &str, access: AccessFlags) -> MethodModel {
    MethodModel {
        name: name.to_string(),
        signature: signature.to_string(),
        access: access | AccessFlags::NATIVE,
        max_stack: 0,
        max_locals: 0,
        args_size: 0,
        code: Vec::new(),
        exception_table: Vec::new(),
        exceptions: Vec::new(),
        vm_generated: false,
    }
}
