use crate::classpath::ClassPath;
use crate::descriptor::method_args_size;
use crate::fault::VerifyOutcome;
use crate::ir::{
    AccessFlags, ClassModel, ConstantEntry, ExceptionEntry, FieldModel, MemberRef, MethodModel,
};
use crate::verifier::{VerifyOptions, verify_class};

const OBJECT: &str = "java/lang/Object";

/// Raw constant pool entry as it appears in a class file.
#[derive(Clone, Debug, Eq, PartialEq)]
enum PoolEntry {
    Utf8(String),
    Integer(i32),
    Class(u16),
    String(u16),
    NameAndType(u16, u16),
    Fieldref(u16, u16),
    Methodref(u16, u16),
    InterfaceMethodref(u16, u16),
}

/// Assembles a class in memory, either as a `ClassModel` or as class file bytes.
#[derive(Clone, Debug)]
pub(crate) struct ClassBuilder {
    name: String,
    access: AccessFlags,
    major_version: u16,
    this_index: u16,
    super_index: u16,
    pool: Vec<PoolEntry>,
    fields: Vec<FieldModel>,
    methods: Vec<MethodBuilder>,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self::with_super(name, OBJECT)
    }

    pub(crate) fn with_super(name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            name: name.to_owned(),
            access: AccessFlags::PUBLIC | AccessFlags::SUPER,
            major_version: 50,
            this_index: 0,
            super_index: 0,
            pool: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        };
        builder.this_index = builder.class_ref(name);
        builder.super_index = builder.class_ref(super_name);
        builder
    }

    pub(crate) fn major_version(&mut self, major_version: u16) -> &mut Self {
        self.major_version = major_version;
        self
    }

    pub(crate) fn field(&mut self, name: &str, signature: &str, access: AccessFlags) -> &mut Self {
        self.fields.push(FieldModel {
            name: name.to_owned(),
            signature: signature.to_owned(),
            access,
        });
        self
    }

    pub(crate) fn method(&mut self, method: MethodBuilder) -> &mut Self {
        self.methods.push(method);
        self
    }

    pub(crate) fn utf8(&mut self, text: &str) -> u16 {
        self.intern(PoolEntry::Utf8(text.to_owned()))
    }

    pub(crate) fn class_ref(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.intern(PoolEntry::Class(name))
    }

    pub(crate) fn string(&mut self, text: &str) -> u16 {
        let text = self.utf8(text);
        self.intern(PoolEntry::String(text))
    }

    pub(crate) fn integer(&mut self, value: i32) -> u16 {
        self.intern(PoolEntry::Integer(value))
    }

    pub(crate) fn field_ref(&mut self, class: &str, name: &str, signature: &str) -> u16 {
        let class = self.class_ref(class);
        let name_and_type = self.name_and_type(name, signature);
        self.intern(PoolEntry::Fieldref(class, name_and_type))
    }

    pub(crate) fn method_ref(&mut self, class: &str, name: &str, signature: &str) -> u16 {
        let class = self.class_ref(class);
        let name_and_type = self.name_and_type(name, signature);
        self.intern(PoolEntry::Methodref(class, name_and_type))
    }

    pub(crate) fn interface_method_ref(&mut self, class: &str, name: &str, signature: &str) -> u16 {
        let class = self.class_ref(class);
        let name_and_type = self.name_and_type(name, signature);
        self.intern(PoolEntry::InterfaceMethodref(class, name_and_type))
    }

    fn name_and_type(&mut self, name: &str, signature: &str) -> u16 {
        let name = self.utf8(name);
        let signature = self.utf8(signature);
        self.intern(PoolEntry::NameAndType(name, signature))
    }

    fn intern(&mut self, entry: PoolEntry) -> u16 {
        let position = match self.pool.iter().position(|existing| *existing == entry) {
            Some(position) => position,
            None => {
                self.pool.push(entry);
                self.pool.len() - 1
            }
        };
        // index 0 is reserved
        (position + 1) as u16
    }

    fn pool_utf8(&self, index: u16) -> String {
        match &self.pool[usize::from(index) - 1] {
            PoolEntry::Utf8(text) => text.clone(),
            other => panic!("constant {index} is not utf8: {other:?}"),
        }
    }

    fn pool_class(&self, index: u16) -> String {
        match &self.pool[usize::from(index) - 1] {
            PoolEntry::Class(name) => self.pool_utf8(*name),
            other => panic!("constant {index} is not a class: {other:?}"),
        }
    }

    fn member(&self, class: u16, name_and_type: u16) -> MemberRef {
        let PoolEntry::NameAndType(name, signature) = &self.pool[usize::from(name_and_type) - 1]
        else {
            panic!("constant {name_and_type} is not a name and type");
        };
        MemberRef {
            class_name: self.pool_class(class),
            name: self.pool_utf8(*name),
            signature: self.pool_utf8(*signature),
        }
    }

    /// Resolve the pool and produce the model the verifier consumes.
    pub(crate) fn build(self) -> ClassModel {
        let mut constant_pool = vec![ConstantEntry::Unusable];
        for entry in &self.pool {
            constant_pool.push(match entry {
                PoolEntry::Utf8(text) => ConstantEntry::Utf8(text.clone()),
                PoolEntry::Integer(_) => ConstantEntry::Integer,
                PoolEntry::Class(name) => ConstantEntry::Class(self.pool_utf8(*name)),
                PoolEntry::String(_) => ConstantEntry::String,
                PoolEntry::NameAndType(..) => ConstantEntry::NameAndType,
                PoolEntry::Fieldref(class, nt) => ConstantEntry::Fieldref(self.member(*class, *nt)),
                PoolEntry::Methodref(class, nt) => {
                    ConstantEntry::Methodref(self.member(*class, *nt))
                }
                PoolEntry::InterfaceMethodref(class, nt) => {
                    ConstantEntry::InterfaceMethodref(self.member(*class, *nt))
                }
            });
        }
        let methods = self
            .methods
            .iter()
            .map(MethodBuilder::to_model)
            .collect();
        ClassModel {
            name: self.name.clone(),
            super_name: Some(self.pool_class(self.super_index)),
            access: self.access,
            major_version: self.major_version,
            constant_pool,
            fields: self.fields.clone(),
            methods,
        }
    }

    /// Serialize as a class file. VM-generated markers have no class file form and are dropped.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut builder = self.clone();
        let code_name = builder.utf8("Code");
        let exceptions_name = builder.utf8("Exceptions");
        let field_names: Vec<(u16, u16)> = self
            .fields
            .iter()
            .map(|field| (builder.utf8(&field.name), builder.utf8(&field.signature)))
            .collect();
        let method_names: Vec<(u16, u16)> = self
            .methods
            .iter()
            .map(|method| (builder.utf8(&method.name), builder.utf8(&method.signature)))
            .collect();

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABE_u32.to_be_bytes());
        put_u16(&mut out, 0);
        put_u16(&mut out, builder.major_version);
        put_u16(&mut out, (builder.pool.len() + 1) as u16);
        for entry in &builder.pool {
            match entry {
                PoolEntry::Utf8(text) => {
                    out.push(1);
                    put_u16(&mut out, text.len() as u16);
                    out.extend_from_slice(text.as_bytes());
                }
                PoolEntry::Integer(value) => {
                    out.push(3);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                PoolEntry::Class(name) => {
                    out.push(7);
                    put_u16(&mut out, *name);
                }
                PoolEntry::String(text) => {
                    out.push(8);
                    put_u16(&mut out, *text);
                }
                PoolEntry::Fieldref(class, nt)
                | PoolEntry::Methodref(class, nt)
                | PoolEntry::InterfaceMethodref(class, nt) => {
                    out.push(match entry {
                        PoolEntry::Fieldref(..) => 9,
                        PoolEntry::Methodref(..) => 10,
                        _ => 11,
                    });
                    put_u16(&mut out, *class);
                    put_u16(&mut out, *nt);
                }
                PoolEntry::NameAndType(name, signature) => {
                    out.push(12);
                    put_u16(&mut out, *name);
                    put_u16(&mut out, *signature);
                }
            }
        }
        put_u16(&mut out, builder.access.bits());
        put_u16(&mut out, builder.this_index);
        put_u16(&mut out, builder.super_index);
        put_u16(&mut out, 0);

        put_u16(&mut out, self.fields.len() as u16);
        for (field, (name, signature)) in self.fields.iter().zip(&field_names) {
            put_u16(&mut out, field.access.bits());
            put_u16(&mut out, *name);
            put_u16(&mut out, *signature);
            put_u16(&mut out, 0);
        }

        put_u16(&mut out, self.methods.len() as u16);
        for (method, (name, signature)) in self.methods.iter().zip(&method_names) {
            put_u16(&mut out, method.access.bits());
            put_u16(&mut out, *name);
            put_u16(&mut out, *signature);
            let has_code = !method
                .access
                .intersects(AccessFlags::ABSTRACT | AccessFlags::NATIVE);
            let has_exceptions = !method.exceptions.is_empty();
            put_u16(&mut out, u16::from(has_code) + u16::from(has_exceptions));
            if has_code {
                let model = method.to_model();
                let mut body = Vec::new();
                put_u16(&mut body, model.max_stack);
                put_u16(&mut body, model.max_locals);
                body.extend_from_slice(&(model.code.len() as u32).to_be_bytes());
                body.extend_from_slice(&model.code);
                put_u16(&mut body, model.exception_table.len() as u16);
                for entry in &model.exception_table {
                    put_u16(&mut body, entry.start_pc);
                    put_u16(&mut body, entry.end_pc);
                    put_u16(&mut body, entry.handler_pc);
                    put_u16(&mut body, entry.catch_type);
                }
                put_u16(&mut body, 0);
                put_u16(&mut out, code_name);
                out.extend_from_slice(&(body.len() as u32).to_be_bytes());
                out.extend_from_slice(&body);
            }
            if has_exceptions {
                put_u16(&mut out, exceptions_name);
                out.extend_from_slice(&(2 + 2 * method.exceptions.len() as u32).to_be_bytes());
                put_u16(&mut out, method.exceptions.len() as u16);
                for index in &method.exceptions {
                    put_u16(&mut out, *index);
                }
            }
        }
        put_u16(&mut out, 0);
        out
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// One method of a [`ClassBuilder`]. Defaults to a public instance method with room for one
/// stack slot and exactly its arguments as locals.
#[derive(Clone, Debug)]
pub(crate) struct MethodBuilder {
    name: String,
    signature: String,
    access: AccessFlags,
    max_stack: u16,
    max_locals: Option<u16>,
    code: Vec<u8>,
    exception_table: Vec<ExceptionEntry>,
    exceptions: Vec<u16>,
    vm_generated: bool,
}

impl MethodBuilder {
    pub(crate) fn new(name: &str, signature: &str) -> Self {
        Self {
            name: name.to_owned(),
            signature: signature.to_owned(),
            access: AccessFlags::PUBLIC,
            max_stack: 1,
            max_locals: None,
            code: Vec::new(),
            exception_table: Vec::new(),
            exceptions: Vec::new(),
            vm_generated: false,
        }
    }

    pub(crate) fn static_method(mut self) -> Self {
        self.access |= AccessFlags::STATIC;
        self
    }

    pub(crate) fn access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    pub(crate) fn max_stack(mut self, max_stack: u16) -> Self {
        self.max_stack = max_stack;
        self
    }

    pub(crate) fn max_locals(mut self, max_locals: u16) -> Self {
        self.max_locals = Some(max_locals);
        self
    }

    pub(crate) fn code(mut self, code: &[u8]) -> Self {
        self.code = code.to_vec();
        self
    }

    pub(crate) fn handler(mut self, start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> Self {
        self.exception_table.push(ExceptionEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
        self
    }

    pub(crate) fn throws(mut self, class_index: u16) -> Self {
        self.exceptions.push(class_index);
        self
    }

    pub(crate) fn vm_generated(mut self) -> Self {
        self.vm_generated = true;
        self
    }

    fn to_model(&self) -> MethodModel {
        let is_static = self.access.contains(AccessFlags::STATIC);
        let args_size = method_args_size(&self.signature, is_static).unwrap_or(0) as u16;
        MethodModel {
            name: self.name.clone(),
            signature: self.signature.clone(),
            access: self.access,
            max_stack: self.max_stack,
            max_locals: self.max_locals.unwrap_or(args_size),
            args_size,
            code: self.code.clone(),
            exception_table: self.exception_table.clone(),
            exceptions: self.exceptions.clone(),
            vm_generated: self.vm_generated,
        }
    }
}

/// Verify `class` alone against the built-in platform classes.
pub(crate) fn verify_one(class: ClassBuilder) -> VerifyOutcome {
    verify_one_with(class, &VerifyOptions::default())
}

pub(crate) fn verify_one_with(class: ClassBuilder, options: &VerifyOptions) -> VerifyOutcome {
    verify_among(class, Vec::new(), options)
}

/// Verify `class` with `others` loadable beside it; only `class` is checked.
pub(crate) fn verify_among(
    class: ClassBuilder,
    others: Vec<ClassBuilder>,
    options: &VerifyOptions,
) -> VerifyOutcome {
    let model = class.build();
    let name = model.name.clone();
    let mut models = vec![model];
    models.extend(others.into_iter().map(ClassBuilder::build));
    let path = ClassPath::new(models).expect("class path");
    let handle = path.lookup(&name).expect("class handle");
    verify_class(&path, handle, options)
}
