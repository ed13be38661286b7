use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::attributes::{Annotation, Attribute, ElementValue};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::ir::{
    AnnotationUse, AnnotationValue, Class, ConstEntry, ConstantTable, Field, FieldAccess,
    MemberRef, Method, MethodAccess,
};
use crate::signature::canonical;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_STATIC: u16 = 0x0008;
const ACC_TRANSIENT: u16 = 0x0080;
const ACC_ABSTRACT: u16 = 0x0400;
const ACC_SYNTHETIC: u16 = 0x1000;

/// Parsed classes collected from project and classpath locations.
pub(crate) struct ScanOutput {
    pub(crate) classes: Vec<Class>,
    pub(crate) class_count: usize,
}

pub(crate) fn scan_inputs(project: &[PathBuf], classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut scanner = Scanner::default();

    let mut project_locations = project.to_vec();
    project_locations.sort();
    for location in &project_locations {
        scanner.walk(location, true, true)?;
    }

    // Dependency jars can pull in further jars through their manifests, and
    // a project jar's manifest classpath counts as dependencies too.
    let mut roots = classpath.to_vec();
    for location in &project_locations {
        if has_extension(location, "jar") {
            roots.extend(jar_manifest_classpath(location)?);
        }
    }
    for location in expand_classpath(roots) {
        if project_locations.contains(&location) {
            continue;
        }
        scanner.walk(&location, false, false)?;
    }

    Ok(ScanOutput {
        classes: scanner.classes,
        class_count: scanner.class_count,
    })
}

/// Accumulates parsed classes while walking input locations. Directory
/// listings and jar entries are visited in sorted order so a rescan of the
/// same inputs yields the same class sequence.
#[derive(Default)]
struct Scanner {
    classes: Vec<Class>,
    class_count: usize,
}

impl Scanner {
    fn walk(&mut self, location: &Path, from_project: bool, top_level: bool) -> Result<()> {
        if location.is_dir() {
            for child in read_dir_sorted(location)? {
                self.walk(&child, from_project, false)?;
            }
        } else if has_extension(location, "class") {
            let data = fs::read(location)
                .with_context(|| format!("failed to read {}", location.display()))?;
            self.offer(&data, from_project, &location.display().to_string());
        } else if has_extension(location, "jar") {
            self.walk_jar(location, from_project)?;
        } else if top_level {
            anyhow::bail!("unsupported input file: {}", location.display());
        }
        Ok(())
    }

    fn walk_jar(&mut self, jar: &Path, from_project: bool) -> Result<()> {
        let file =
            fs::File::open(jar).with_context(|| format!("failed to open {}", jar.display()))?;
        let mut archive =
            ZipArchive::new(file).with_context(|| format!("failed to read {}", jar.display()))?;

        let mut names: Vec<String> = archive
            .file_names()
            .filter(|name| name.ends_with(".class") && !name.ends_with("module-info.class"))
            .map(str::to_string)
            .collect();
        names.sort();

        for name in names {
            let mut entry = archive
                .by_name(&name)
                .with_context(|| format!("failed to read {}:{name}", jar.display()))?;
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read {}:{name}", jar.display()))?;
            self.offer(&data, from_project, &format!("{}:{name}", jar.display()));
        }
        Ok(())
    }

    fn offer(&mut self, data: &[u8], from_project: bool, origin: &str) {
        match read_class_bytes(data, from_project) {
            Ok(class) => {
                self.class_count += 1;
                self.classes.push(class);
            }
            Err(err) => warn!("skipping unparseable class {origin}: {err:#}"),
        }
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut children = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        children.push(entry.path());
    }
    children.sort();
    Ok(children)
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case(wanted))
}

/// Depth-first closure over classpath entries and their manifest-referenced
/// jars, deduplicated, in sorted order per level. Entries that do not exist
/// degrade to a warning.
fn expand_classpath(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut sorted_roots = roots;
    sorted_roots.sort();
    let mut visited = BTreeSet::new();
    let mut ordered = Vec::new();
    for root in sorted_roots {
        visit_classpath_entry(root, &mut visited, &mut ordered);
    }
    ordered
}

fn visit_classpath_entry(
    entry: PathBuf,
    visited: &mut BTreeSet<PathBuf>,
    ordered: &mut Vec<PathBuf>,
) {
    if !visited.insert(entry.clone()) {
        return;
    }
    if !entry.exists() {
        warn!("classpath entry not found: {}", entry.display());
        return;
    }
    ordered.push(entry.clone());
    if !has_extension(&entry, "jar") {
        return;
    }
    match jar_manifest_classpath(&entry) {
        Ok(mut referenced) => {
            referenced.sort();
            for reference in referenced {
                visit_classpath_entry(reference, visited, ordered);
            }
        }
        Err(err) => warn!(
            "failed to expand manifest classpath of {}: {err:#}",
            entry.display()
        ),
    }
}

/// `Class-Path` entries of a jar's manifest, resolved against the jar's
/// directory. A jar without a manifest (or without the attribute)
/// contributes nothing.
fn jar_manifest_classpath(jar: &Path) -> Result<Vec<PathBuf>> {
    let file = fs::File::open(jar).with_context(|| format!("failed to open {}", jar.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", jar.display()))?;
    let Ok(mut entry) = archive.by_name("META-INF/MANIFEST.MF") else {
        return Ok(Vec::new());
    };
    let mut manifest = String::new();
    entry
        .read_to_string(&mut manifest)
        .with_context(|| format!("failed to read manifest of {}", jar.display()))?;

    let Some(attribute) = classpath_attribute(&manifest) else {
        return Ok(Vec::new());
    };
    let base = jar.parent().unwrap_or_else(|| Path::new(""));
    Ok(attribute
        .split_whitespace()
        .map(|token| {
            let path = PathBuf::from(token);
            if path.is_absolute() {
                path
            } else {
                base.join(path)
            }
        })
        .collect())
}

/// Manifest main attributes fold long values onto continuation lines that
/// start with a single space. Unfold first, then pick out `Class-Path`.
fn classpath_attribute(manifest: &str) -> Option<String> {
    let mut attributes: Vec<String> = Vec::new();
    for raw in manifest.lines() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        match line.strip_prefix(' ') {
            Some(continuation) => {
                if let Some(previous) = attributes.last_mut() {
                    previous.push_str(continuation);
                }
            }
            None => attributes.push(line.to_string()),
        }
    }
    attributes.iter().find_map(|attribute| {
        let (key, value) = attribute.split_once(':')?;
        (key.trim() == "Class-Path").then(|| value.trim().to_string())
    })
}

/// Typed reads over the raw constant pool; canonical names come out of
/// here, never internal ones.
struct PoolReader<'a> {
    pool: &'a [ConstantPool],
}

impl<'a> PoolReader<'a> {
    fn new(pool: &'a [ConstantPool]) -> Self {
        Self { pool }
    }

    fn utf8(&self, index: u16) -> Result<String> {
        match self.pool.get(index as usize) {
            Some(ConstantPool::Utf8 { value }) => Ok(value.clone()),
            _ => anyhow::bail!("constant {index} is not a utf8 entry"),
        }
    }

    fn class_name(&self, index: u16) -> Result<String> {
        match self.pool.get(index as usize) {
            Some(ConstantPool::Class { name_index }) => Ok(canonical(&self.utf8(*name_index)?)),
            _ => anyhow::bail!("constant {index} is not a class reference"),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.pool.get(index as usize) {
            Some(ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            }) => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => anyhow::bail!("constant {index} is not a name-and-type"),
        }
    }

    fn member(&self, class_index: u16, name_and_type_index: u16) -> Result<MemberRef> {
        let owner = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
        })
    }

    /// Lower one raw entry to the shape the decoder consumes. Entries the
    /// decoder never looks at collapse to `Unused`.
    fn lower(&self, entry: &ConstantPool) -> ConstEntry {
        match entry {
            ConstantPool::Utf8 { value } => ConstEntry::Utf8(value.clone()),
            ConstantPool::Integer { value } => ConstEntry::Int(*value),
            ConstantPool::Long { value } => ConstEntry::Long(*value),
            ConstantPool::Float { value } => ConstEntry::Float(*value),
            ConstantPool::Double { value } => ConstEntry::Double(*value),
            ConstantPool::String { string_index } => self
                .utf8(*string_index)
                .map(ConstEntry::Str)
                .unwrap_or_default(),
            ConstantPool::Class { name_index } => self
                .utf8(*name_index)
                .map(|name| ConstEntry::ClassRef(canonical(&name)))
                .unwrap_or_default(),
            ConstantPool::Fieldref {
                class_index,
                name_and_type_index,
            } => self
                .member(*class_index, *name_and_type_index)
                .map(ConstEntry::FieldRef)
                .unwrap_or_default(),
            ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            } => self
                .member(*class_index, *name_and_type_index)
                .map(|member| ConstEntry::MethodRef {
                    member,
                    interface: false,
                })
                .unwrap_or_default(),
            ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => self
                .member(*class_index, *name_and_type_index)
                .map(|member| ConstEntry::MethodRef {
                    member,
                    interface: true,
                })
                .unwrap_or_default(),
            ConstantPool::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => self
                .name_and_type(*name_and_type_index)
                .map(|(name, descriptor)| ConstEntry::Dynamic {
                    bootstrap_index: *bootstrap_method_attr_index,
                    name,
                    descriptor,
                })
                .unwrap_or_default(),
            _ => ConstEntry::Unused,
        }
    }
}

/// Lower raw class file bytes into the crate IR.
pub(crate) fn read_class_bytes(data: &[u8], from_project: bool) -> Result<Class> {
    let parsed = class_file::parse(data).context("failed to parse class file bytes")?;
    let reader = PoolReader::new(parsed.constant_pool());

    let name = reader.class_name(parsed.this_class()).context("resolve class name")?;
    let super_name = match parsed.super_class() {
        0 => None,
        index => Some(reader.class_name(index).context("resolve super class name")?),
    };
    let interfaces = parsed
        .interfaces()
        .iter()
        .map(|index| reader.class_name(*index))
        .collect::<Result<Vec<_>>>()
        .context("resolve interface names")?;

    Ok(Class {
        name,
        super_name,
        interfaces,
        annotations: annotations_of(&reader, parsed.attributes()),
        fields: read_fields(&reader, parsed.fields())?,
        methods: read_methods(&reader, parsed.methods())?,
        constants: ConstantTable::new(reader.pool.iter().map(|entry| reader.lower(entry)).collect()),
        bootstrap_targets: bootstrap_table(&reader, parsed.attributes()),
        from_project,
    })
}

fn bootstrap_table(reader: &PoolReader<'_>, attributes: &[Attribute]) -> Vec<Option<MemberRef>> {
    attributes
        .iter()
        .find_map(|attribute| match attribute {
            Attribute::BootstrapMethods { bootstrap_methods } => Some(
                bootstrap_methods
                    .iter()
                    .map(|bootstrap| lambda_target(reader, bootstrap.bootstrap_arguments()))
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

/// The implementation method of a lambda call site rides along as a
/// MethodHandle constant among the bootstrap arguments.
fn lambda_target(reader: &PoolReader<'_>, arguments: &[u16]) -> Option<MemberRef> {
    arguments.iter().find_map(|argument| {
        let handle = reader.pool.get(*argument as usize)?;
        let ConstantPool::MethodHandle {
            reference_index, ..
        } = handle
        else {
            return None;
        };
        match reader.pool.get(*reference_index as usize)? {
            ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => reader.member(*class_index, *name_and_type_index).ok(),
            _ => None,
        }
    })
}

fn read_fields(
    reader: &PoolReader<'_>,
    fields: &[jclassfile::fields::FieldInfo],
) -> Result<Vec<Field>> {
    fields
        .iter()
        .map(|field| {
            let flags = field.access_flags().bits();
            Ok(Field {
                name: reader.utf8(field.name_index()).context("resolve field name")?,
                descriptor: reader
                    .utf8(field.descriptor_index())
                    .context("resolve field descriptor")?,
                signature: generic_signature(reader, field.attributes()),
                access: FieldAccess {
                    is_public: flags & ACC_PUBLIC != 0,
                    is_static: flags & ACC_STATIC != 0,
                    is_transient: flags & ACC_TRANSIENT != 0,
                },
                annotations: annotations_of(reader, field.attributes()),
            })
        })
        .collect()
}

fn read_methods(
    reader: &PoolReader<'_>,
    methods: &[jclassfile::methods::MethodInfo],
) -> Result<Vec<Method>> {
    methods
        .iter()
        .map(|method| {
            let flags = method.access_flags().bits();
            let mut bytecode = Vec::new();
            let mut local_types = BTreeMap::new();
            for attribute in method.attributes() {
                if let Attribute::Code {
                    code, attributes, ..
                } = attribute
                {
                    bytecode = code.clone();
                    local_types = slot_descriptors(reader, attributes);
                }
            }
            Ok(Method {
                name: reader.utf8(method.name_index()).context("resolve method name")?,
                descriptor: reader
                    .utf8(method.descriptor_index())
                    .context("resolve method descriptor")?,
                signature: generic_signature(reader, method.attributes()),
                access: MethodAccess {
                    is_public: flags & ACC_PUBLIC != 0,
                    is_static: flags & ACC_STATIC != 0,
                    is_abstract: flags & ACC_ABSTRACT != 0,
                    is_synthetic: flags & ACC_SYNTHETIC != 0,
                },
                annotations: annotations_of(reader, method.attributes()),
                parameter_annotations: per_parameter_annotations(reader, method.attributes()),
                bytecode,
                local_types,
            })
        })
        .collect()
}

fn generic_signature(reader: &PoolReader<'_>, attributes: &[Attribute]) -> Option<String> {
    attributes.iter().find_map(|attribute| match attribute {
        Attribute::Signature { signature_index } => reader.utf8(*signature_index).ok(),
        _ => None,
    })
}

fn slot_descriptors(reader: &PoolReader<'_>, attributes: &[Attribute]) -> BTreeMap<u16, String> {
    let mut descriptors = BTreeMap::new();
    for attribute in attributes {
        let Attribute::LocalVariableTable {
            local_variable_table,
        } = attribute
        else {
            continue;
        };
        for local in local_variable_table {
            if let Ok(descriptor) = reader.utf8(local.descriptor_index()) {
                descriptors.entry(local.index()).or_insert(descriptor);
            }
        }
    }
    descriptors
}

fn annotations_of(reader: &PoolReader<'_>, attributes: &[Attribute]) -> Vec<AnnotationUse> {
    attributes
        .iter()
        .find_map(|attribute| match attribute {
            Attribute::RuntimeVisibleAnnotations { annotations, .. } => Some(
                annotations
                    .iter()
                    .filter_map(|annotation| read_annotation(reader, annotation))
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

fn per_parameter_annotations(
    reader: &PoolReader<'_>,
    attributes: &[Attribute],
) -> Vec<Vec<AnnotationUse>> {
    attributes
        .iter()
        .find_map(|attribute| match attribute {
            Attribute::RuntimeVisibleParameterAnnotations {
                parameter_annotations,
            } => Some(
                parameter_annotations
                    .iter()
                    .map(|annotations| {
                        annotations
                            .iter()
                            .filter_map(|annotation| read_annotation(reader, annotation))
                            .collect()
                    })
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

fn read_annotation(reader: &PoolReader<'_>, annotation: &Annotation) -> Option<AnnotationUse> {
    let descriptor = reader.utf8(annotation.type_index()).ok()?;
    let type_name = type_name_of_descriptor(&descriptor)?;
    let mut values = BTreeMap::new();
    for pair in annotation.element_value_pairs() {
        let Ok(name) = reader.utf8(pair.element_name_index()) else {
            continue;
        };
        if let Some(value) = read_element_value(reader, pair.value()) {
            values.insert(name, value);
        }
    }
    Some(AnnotationUse { type_name, values })
}

fn type_name_of_descriptor(descriptor: &str) -> Option<String> {
    let internal = descriptor.strip_prefix('L')?.strip_suffix(';')?;
    Some(canonical(internal))
}

fn read_element_value(reader: &PoolReader<'_>, value: &ElementValue) -> Option<AnnotationValue> {
    match value {
        ElementValue::ConstValueIndex {
            tag,
            const_value_index,
        } => match tag {
            b's' => reader.utf8(*const_value_index).ok().map(AnnotationValue::Str),
            b'I' | b'S' | b'B' | b'C' => match reader.pool.get(*const_value_index as usize) {
                Some(ConstantPool::Integer { value }) => Some(AnnotationValue::Int(*value as i64)),
                _ => None,
            },
            b'J' => match reader.pool.get(*const_value_index as usize) {
                Some(ConstantPool::Long { value }) => Some(AnnotationValue::Int(*value)),
                _ => None,
            },
            b'Z' => match reader.pool.get(*const_value_index as usize) {
                Some(ConstantPool::Integer { value }) => Some(AnnotationValue::Bool(*value != 0)),
                _ => None,
            },
            _ => None,
        },
        ElementValue::EnumConstValue {
            type_name_index,
            const_name_index,
            ..
        } => {
            let descriptor = reader.utf8(*type_name_index).ok()?;
            Some(AnnotationValue::EnumConst {
                type_name: type_name_of_descriptor(&descriptor)?,
                constant: reader.utf8(*const_name_index).ok()?,
            })
        }
        ElementValue::ClassInfoIndex { class_info_index, .. } => {
            let descriptor = reader.utf8(*class_info_index).ok()?;
            let name = type_name_of_descriptor(&descriptor)
                .unwrap_or_else(|| canonical(descriptor.as_str()));
            Some(AnnotationValue::ClassRef(name))
        }
        ElementValue::ArrayValue { values, .. } => Some(AnnotationValue::List(
            values
                .iter()
                .filter_map(|value| read_element_value(reader, value))
                .collect(),
        )),
        _ => {
            debug!("ignoring unsupported annotation element value");
            None
        }
    }
}
