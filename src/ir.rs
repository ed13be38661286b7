use std::collections::BTreeMap;

/// Intermediate representation for parsed JVM classes and methods.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    /// Canonical name, e.g. `com.example.Outer$Inner`.
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) annotations: Vec<AnnotationUse>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
    pub(crate) constants: ConstantTable,
    /// Targets of the class's bootstrap methods, in declaration order.
    pub(crate) bootstrap_targets: Vec<Option<MemberRef>>,
    /// Whether the class came from a project location (scanned for resources)
    /// as opposed to a classpath location (type resolution only).
    pub(crate) from_project: bool,
}

impl Class {
    /// Synthetic empty record substituted for unresolvable names.
    pub(crate) fn synthetic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_name: None,
            interfaces: Vec::new(),
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            constants: ConstantTable::default(),
            bootstrap_targets: Vec::new(),
            from_project: false,
        }
    }

    /// Enum classes are recognized by their superclass; the schema for an
    /// enum value is always the plain string schema.
    pub(crate) fn is_enum(&self) -> bool {
        self.super_name.as_deref() == Some("java.lang.Enum")
    }
}

/// Field definition for a class.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) signature: Option<String>,
    pub(crate) access: FieldAccess,
    pub(crate) annotations: Vec<AnnotationUse>,
}

/// Field access flags used for introspection relevance.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FieldAccess {
    pub(crate) is_public: bool,
    pub(crate) is_static: bool,
    pub(crate) is_transient: bool,
}

/// Intermediate representation for a method and its bytecode.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) signature: Option<String>,
    pub(crate) access: MethodAccess,
    pub(crate) annotations: Vec<AnnotationUse>,
    /// Annotations per declared parameter, empty when the attribute is absent.
    pub(crate) parameter_annotations: Vec<Vec<AnnotationUse>>,
    pub(crate) bytecode: Vec<u8>,
    /// Slot to descriptor, from the LocalVariableTable when present.
    pub(crate) local_types: BTreeMap<u16, String>,
}

/// Method access flags used for extraction filtering.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MethodAccess {
    pub(crate) is_public: bool,
    pub(crate) is_static: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_synthetic: bool,
}

/// A use of an annotation on a class, member, or parameter.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AnnotationUse {
    /// Canonical annotation type name, e.g. `jakarta.ws.rs.Path`.
    pub(crate) type_name: String,
    pub(crate) values: BTreeMap<String, AnnotationValue>,
}

impl AnnotationUse {
    pub(crate) fn string_value(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(AnnotationValue::Str(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn string_values(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(AnnotationValue::Str(value)) => vec![value.clone()],
            Some(AnnotationValue::List(values)) => values
                .iter()
                .filter_map(|value| match value {
                    AnnotationValue::Str(value) => Some(value.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Annotation element value, limited to the shapes the vocabulary uses.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum AnnotationValue {
    Str(String),
    Int(i64),
    Bool(bool),
    EnumConst { type_name: String, constant: String },
    ClassRef(String),
    List(Vec<AnnotationValue>),
}

/// Member reference resolved from the constant pool.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct MemberRef {
    /// Canonical owner class name.
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Constant pool lowered to the entries the decoder consumes.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConstantTable {
    entries: Vec<ConstEntry>,
}

/// Resolved constant pool entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) enum ConstEntry {
    #[default]
    Unused,
    Utf8(String),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    ClassRef(String),
    FieldRef(MemberRef),
    MethodRef {
        member: MemberRef,
        interface: bool,
    },
    /// Invokedynamic call site: index into the bootstrap method table plus
    /// the dynamic name-and-type of the call site.
    Dynamic {
        bootstrap_index: u16,
        name: String,
        descriptor: String,
    },
}

impl ConstantTable {
    pub(crate) fn new(entries: Vec<ConstEntry>) -> Self {
        Self { entries }
    }

    pub(crate) fn get(&self, index: u16) -> &ConstEntry {
        static UNUSED: ConstEntry = ConstEntry::Unused;
        self.entries.get(index as usize).unwrap_or(&UNUSED)
    }
}
