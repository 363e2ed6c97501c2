use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::attributes::Attribute;
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::descriptor::method_args_size;
use crate::ir::{
    AccessFlags, ClassModel, ConstantEntry, ExceptionEntry, FieldModel, MemberRef, MethodModel,
};

/// Everything read from the input and the classpath.
#[derive(Default)]
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) classes: Vec<ScannedClass>,
    /// Input classes whose bytes could not be parsed.
    pub(crate) failures: Vec<LoadFailure>,
}

/// A parsed class and where it came from.
pub(crate) struct ScannedClass {
    pub(crate) model: ClassModel,
    pub(crate) artifact_index: i64,
    /// Read from the analysis input rather than the classpath.
    pub(crate) target: bool,
}

pub(crate) struct LoadFailure {
    pub(crate) source: String,
    pub(crate) artifact_index: i64,
    pub(crate) message: String,
}

impl ScanOutput {
    pub(crate) fn class_count(&self) -> usize {
        self.classes.len() + self.failures.len()
    }

    pub(crate) fn target_count(&self) -> usize {
        self.classes.iter().filter(|class| class.target).count() + self.failures.len()
    }
}

pub(crate) fn scan_inputs(input: &Path, classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut output = ScanOutput::default();

    scan_path(input, true, true, &mut output)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by_key(|entry| path_key(entry));

    if is_jar_path(input) {
        classpath_entries.extend(manifest_classpath(input)?);
    }

    let expanded = expand_classpath(classpath_entries)?;
    for entry in expanded {
        if entry == input {
            continue;
        }
        scan_path(&entry, false, false, &mut output)?;
    }

    Ok(output)
}

fn scan_path(path: &Path, is_input: bool, strict: bool, output: &mut ScanOutput) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, is_input, output);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "class" => scan_class_file(path, is_input, output),
        "jar" => scan_jar_file(path, is_input, output),
        _ if strict => anyhow::bail!("unsupported input file: {}", path.display()),
        _ => Ok(()),
    }
}

fn scan_dir(path: &Path, is_input: bool, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by_key(|entry| path_key(entry));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, is_input, output)?;
        } else {
            scan_path(&entry, is_input, false, output)?;
        }
    }

    Ok(())
}

fn scan_class_file(path: &Path, is_input: bool, output: &mut ScanOutput) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let artifact_index = if is_input {
        push_path_artifact(path, Some(target_roles()?), data.len() as u64, &mut output.artifacts)
    } else {
        -1
    };
    record_class(
        path.display().to_string(),
        &data,
        artifact_index,
        is_input,
        output,
    );
    Ok(())
}

fn scan_jar_file(path: &Path, is_input: bool, output: &mut ScanOutput) -> Result<()> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let jar_len = fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .len();
    let roles = if is_input { Some(target_roles()?) } else { None };
    let jar_index = push_path_artifact(path, roles, jar_len, &mut output.artifacts);

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        // TODO: verify multi-release entries under META-INF/versions/ against their own release.
        if name.ends_with(".class")
            && !name.ends_with("module-info.class")
            && !name.starts_with("META-INF/versions/")
        {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        record_class(
            format!("{}:{}", path.display(), name),
            &data,
            jar_index,
            is_input,
            output,
        );
    }

    Ok(())
}

/// Parse `data` and file it as a class or, for input classes, as a load failure.
fn record_class(
    source: String,
    data: &[u8],
    artifact_index: i64,
    target: bool,
    output: &mut ScanOutput,
) {
    match parse_class_bytes(data).with_context(|| format!("failed to parse {source}")) {
        Ok(model) => {
            debug!(class = model.name.as_str(), source = source.as_str(), "loaded class");
            output.classes.push(ScannedClass {
                model,
                artifact_index,
                target,
            });
        }
        Err(error) if target => output.failures.push(LoadFailure {
            source,
            artifact_index,
            message: format!("{error:#}"),
        }),
        Err(error) => warn!("skipping classpath entry: {error:#}"),
    }
}

fn target_roles() -> Result<Vec<Value>> {
    let role = serde_json::to_value(ArtifactRoles::AnalysisTarget)
        .context("serialize artifact role")?;
    Ok(vec![role])
}

fn push_path_artifact(
    path: &Path,
    roles: Option<Vec<Value>>,
    len: u64,
    artifacts: &mut Vec<Artifact>,
) -> i64 {
    let location = ArtifactLocation::builder().uri(path_to_uri(path)).build();
    let artifact = match roles {
        Some(roles) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        None => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("file://{}", absolute.to_string_lossy())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn expand_classpath(initial: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut initial_sorted = initial;
    initial_sorted.sort_by_key(|entry| path_key(entry));
    let mut queue: VecDeque<PathBuf> = initial_sorted.into();

    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    while let Some(entry) = queue.pop_front() {
        if !seen.insert(path_key(&entry)) {
            continue;
        }
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
        if is_jar_path(&entry) {
            let mut referenced = manifest_classpath(&entry)?;
            referenced.sort_by_key(|item| path_key(item));
            queue.extend(referenced);
        }
        result.push(entry);
    }

    Ok(result)
}

fn manifest_classpath(path: &Path) -> Result<Vec<PathBuf>> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
    let Ok(mut entry) = archive.by_name("META-INF/MANIFEST.MF") else {
        return Ok(Vec::new());
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .with_context(|| format!("failed to read manifest of {}", path.display()))?;
    Ok(parse_manifest_classpath(path, &content))
}

fn parse_manifest_classpath(jar_path: &Path, content: &str) -> Vec<PathBuf> {
    let mut class_path = None;
    let mut current_key: Option<String> = None;
    let mut current_value = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');
        if let Some(continuation) = line.strip_prefix(' ') {
            if current_key.is_some() {
                current_value.push_str(continuation);
            }
            continue;
        }

        if current_key.take().as_deref() == Some("Class-Path") {
            class_path = Some(current_value.clone());
        }
        current_value.clear();

        if let Some((key, value)) = line.split_once(':') {
            current_key = Some(key.trim().to_string());
            current_value.push_str(value.trim_start());
        }
    }

    if current_key.as_deref() == Some("Class-Path") {
        class_path = Some(current_value);
    }

    let Some(class_path) = class_path else {
        return Vec::new();
    };

    let base_dir = jar_path.parent().unwrap_or_else(|| Path::new(""));
    class_path
        .split_whitespace()
        .map(|entry| {
            let entry_path = PathBuf::from(entry);
            if entry_path.is_absolute() {
                entry_path
            } else {
                base_dir.join(entry_path)
            }
        })
        .collect()
}

fn is_jar_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"))
}

/// Parse class file bytes into the model the verifier reads.
pub(crate) fn parse_class_bytes(data: &[u8]) -> Result<ClassModel> {
    let major_version = data
        .get(6..8)
        .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
        .context("truncated class file header")?;
    let class_file = class_file::parse(data).context("failed to parse class file bytes")?;
    let constant_pool = class_file.constant_pool();

    let name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            resolve_class_name(constant_pool, class_file.super_class())
                .context("resolve super class name")?,
        )
    };

    let resolved_pool = constant_pool
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            convert_constant(constant_pool, entry)
                .with_context(|| format!("resolve constant pool entry {index}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut fields = Vec::new();
    for field in class_file.fields() {
        fields.push(FieldModel {
            name: resolve_utf8(constant_pool, field.name_index()).context("resolve field name")?,
            signature: resolve_utf8(constant_pool, field.descriptor_index())
                .context("resolve field descriptor")?,
            access: AccessFlags::from_bits_truncate(field.access_flags().bits()),
        });
    }

    let mut methods = Vec::new();
    for method in class_file.methods() {
        let method_name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let signature = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        let access = AccessFlags::from_bits_truncate(method.access_flags().bits());
        let args_size = method_args_size(&signature, access.contains(AccessFlags::STATIC))
            .with_context(|| format!("count arguments of {method_name}{signature}"))?;
        let mut model = MethodModel {
            name: method_name,
            signature,
            access,
            max_stack: 0,
            max_locals: 0,
            args_size: u16::try_from(args_size).context("too many method arguments")?,
            code: Vec::new(),
            exception_table: Vec::new(),
            exceptions: Vec::new(),
            vm_generated: false,
        };
        for attribute in method.attributes() {
            match attribute {
                Attribute::Code {
                    max_stack,
                    max_locals,
                    code,
                    exception_table,
                    ..
                } => {
                    model.max_stack = *max_stack;
                    model.max_locals = *max_locals;
                    model.code = code.clone();
                    model.exception_table = exception_table
                        .iter()
                        .map(|record| ExceptionEntry {
                            start_pc: record.start_pc(),
                            end_pc: record.end_pc(),
                            handler_pc: record.handler_pc(),
                            catch_type: record.catch_type(),
                        })
                        .collect();
                }
                Attribute::Exceptions {
                    exception_index_table,
                } => model.exceptions = exception_index_table.clone(),
                _ => {}
            }
        }
        methods.push(model);
    }

    Ok(ClassModel {
        name,
        super_name,
        access: AccessFlags::from_bits_truncate(class_file.access_flags().bits()),
        major_version,
        constant_pool: resolved_pool,
        fields,
        methods,
    })
}

fn convert_constant(constant_pool: &[ConstantPool], entry: &ConstantPool) -> Result<ConstantEntry> {
    let converted = match entry {
        ConstantPool::Utf8 { value } => ConstantEntry::Utf8(value.clone()),
        ConstantPool::Integer { .. } => ConstantEntry::Integer,
        ConstantPool::Float { .. } => ConstantEntry::Float,
        ConstantPool::Long { .. } => ConstantEntry::Long,
        ConstantPool::Double { .. } => ConstantEntry::Double,
        ConstantPool::Class { name_index } => {
            ConstantEntry::Class(resolve_utf8(constant_pool, *name_index)?)
        }
        ConstantPool::String { .. } => ConstantEntry::String,
        ConstantPool::Fieldref {
            class_index,
            name_and_type_index,
        } => ConstantEntry::Fieldref(resolve_member(
            constant_pool,
            *class_index,
            *name_and_type_index,
        )?),
        ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        } => ConstantEntry::Methodref(resolve_member(
            constant_pool,
            *class_index,
            *name_and_type_index,
        )?),
        ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => ConstantEntry::InterfaceMethodref(resolve_member(
            constant_pool,
            *class_index,
            *name_and_type_index,
        )?),
        ConstantPool::NameAndType { .. } => ConstantEntry::NameAndType,
        ConstantPool::MethodHandle { .. } => ConstantEntry::MethodHandle,
        ConstantPool::MethodType { .. } => ConstantEntry::MethodType,
        ConstantPool::Dynamic { .. } => ConstantEntry::Dynamic,
        ConstantPool::InvokeDynamic { .. } => ConstantEntry::InvokeDynamic,
        ConstantPool::Module { .. } => ConstantEntry::Module,
        ConstantPool::Package { .. } => ConstantEntry::Package,
        // index 0 and the upper half of long/double entries
        _ => ConstantEntry::Unusable,
    };
    Ok(converted)
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    let entry = constant_pool
        .get(class_index as usize)
        .context("missing class entry")?;
    match entry {
        ConstantPool::Class { name_index } => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing utf8 entry")?;
    match entry {
        ConstantPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

fn resolve_member(
    constant_pool: &[ConstantPool],
    class_index: u16,
    name_and_type_index: u16,
) -> Result<MemberRef> {
    let class_name = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let entry = constant_pool
        .get(name_and_type_index as usize)
        .context("missing name and type entry")?;
    let ConstantPool::NameAndType {
        name_index,
        descriptor_index,
    } = entry
    else {
        anyhow::bail!("unexpected name and type entry");
    };
    Ok(MemberRef {
        class_name,
        name: resolve_utf8(constant_pool, *name_index).context("resolve member name")?,
        signature: resolve_utf8(constant_pool, *descriptor_index)
            .context("resolve member descriptor")?,
    })
}
