use std::collections::HashMap;
use std::sync::RwLock;

use tracing::warn;

use crate::classpath::ClassIndex;
use crate::ir::{AnnotationValue, Class, Field, Method};
use crate::schema::{Primitive, Schema};
use crate::signature::{TypeRef, parse_method_type, parse_type};

/// Getter names excluded from property derivation.
const NAME_BLACKLIST: [&str; 1] = ["getClass"];

/// Member selection policy, read from the class's `XmlAccessorType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AccessMode {
    Field,
    Property,
    PublicMember,
    None,
}

/// Derives structural schemas for referenced types by walking fields and
/// getters against the class index. The cache is write-once and shared
/// across workers; cycle detection is per call.
pub(crate) struct TypeIntrospector<'a> {
    index: &'a ClassIndex,
    cache: RwLock<HashMap<String, Schema>>,
}

impl<'a> TypeIntrospector<'a> {
    pub(crate) fn new(index: &'a ClassIndex) -> Self {
        Self {
            index,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn introspect(&self, type_ref: &TypeRef) -> Schema {
        let key = type_ref.to_string();
        if let Some(cached) = self.cache.read().expect("introspector cache poisoned").get(&key) {
            return cached.clone();
        }
        let mut visited = Vec::new();
        let schema = self.build(type_ref, &mut visited);
        self.cache
            .write()
            .expect("introspector cache poisoned")
            .entry(key)
            .or_insert_with(|| schema.clone());
        schema
    }

    fn build(&self, type_ref: &TypeRef, visited: &mut Vec<String>) -> Schema {
        if type_ref.is_array() || self.index.is_collection(&type_ref.name) {
            let element = type_ref.element_of();
            return Schema::Array(Box::new(self.build(&element, visited)));
        }

        if let Some(primitive) = primitive_schema(&type_ref.name) {
            return Schema::Primitive(primitive);
        }

        // A repeated reference along the current path is a cycle; emit a
        // sentinel instead of looping.
        if visited.iter().any(|name| name == &type_ref.name) {
            return Schema::empty_object();
        }

        let class = self.index.resolve(&type_ref.name);
        if class.is_enum() {
            return Schema::Primitive(Primitive::Str);
        }

        visited.push(type_ref.name.clone());
        let schema = self.object_schema(&class, visited);
        visited.pop();
        schema
    }

    fn object_schema(&self, class: &Class, visited: &mut Vec<String>) -> Schema {
        let mode = access_mode(class);
        let mut properties = Vec::new();

        for field in &class.fields {
            if !field_relevant(field, mode) {
                continue;
            }
            match member_type(field.signature.as_deref(), &field.descriptor) {
                Ok(field_type) => {
                    properties.push((field.name.clone(), self.build(&field_type, visited)));
                }
                Err(err) => {
                    warn!("skipping field {}.{}: {err:#}", class.name, field.name);
                }
            }
        }

        for method in &class.methods {
            if !getter_relevant(method, mode) {
                continue;
            }
            match getter_return_type(method) {
                Ok(return_type) => {
                    properties.push((
                        property_name(&method.name),
                        self.build(&return_type, visited),
                    ));
                }
                Err(err) => {
                    warn!("skipping getter {}.{}: {err:#}", class.name, method.name);
                }
            }
        }

        Schema::Object(properties)
    }
}

fn primitive_schema(name: &str) -> Option<Primitive> {
    if name.starts_with("java.time.") {
        return Some(Primitive::Date);
    }
    let primitive = match name {
        "java.lang.String" | "java.util.UUID" => Primitive::Str,
        "java.util.Date" => Primitive::Date,
        "java.lang.Integer" | "int" | "java.lang.Long" | "long" | "java.math.BigInteger" => {
            Primitive::Integer
        }
        "java.lang.Double" | "double" | "java.math.BigDecimal" | "java.lang.Float" | "float" => {
            Primitive::Number
        }
        "java.lang.Boolean" | "boolean" => Primitive::Boolean,
        _ => return None,
    };
    Some(primitive)
}

fn access_mode(class: &Class) -> AccessMode {
    for annotation in &class.annotations {
        if !matches!(
            annotation.type_name.as_str(),
            "javax.xml.bind.annotation.XmlAccessorType" | "jakarta.xml.bind.annotation.XmlAccessorType"
        ) {
            continue;
        }
        if let Some(AnnotationValue::EnumConst { constant, .. }) = annotation.values.get("value") {
            return match constant.as_str() {
                "FIELD" => AccessMode::Field,
                "PROPERTY" => AccessMode::Property,
                "NONE" => AccessMode::None,
                _ => AccessMode::PublicMember,
            };
        }
    }
    AccessMode::PublicMember
}

fn has_annotation(annotations: &[crate::ir::AnnotationUse], simple: &str) -> bool {
    annotations.iter().any(|annotation| {
        annotation.type_name == format!("javax.xml.bind.annotation.{simple}")
            || annotation.type_name == format!("jakarta.xml.bind.annotation.{simple}")
    })
}

fn field_relevant(field: &Field, mode: AccessMode) -> bool {
    if has_annotation(&field.annotations, "XmlElement") {
        return true;
    }
    match mode {
        AccessMode::Field => {
            !field.access.is_static
                && !field.access.is_transient
                && !has_annotation(&field.annotations, "XmlTransient")
        }
        AccessMode::PublicMember => {
            field.access.is_public
                && !field.access.is_static
                && !has_annotation(&field.annotations, "XmlTransient")
        }
        _ => false,
    }
}

fn getter_relevant(method: &Method, mode: AccessMode) -> bool {
    if !is_getter(method) {
        return false;
    }
    if has_annotation(&method.annotations, "XmlElement") {
        return true;
    }
    match mode {
        AccessMode::Property => !has_annotation(&method.annotations, "XmlTransient"),
        AccessMode::PublicMember => {
            method.access.is_public && !has_annotation(&method.annotations, "XmlTransient")
        }
        _ => false,
    }
}

fn is_getter(method: &Method) -> bool {
    if method.access.is_static {
        return false;
    }
    let name = method.name.as_str();
    if NAME_BLACKLIST.contains(&name) {
        return false;
    }
    if let Some(rest) = name.strip_prefix("get") {
        if rest.chars().next().map(char::is_uppercase).unwrap_or(false) {
            return !method.descriptor.ends_with(")V");
        }
    }
    if let Some(rest) = name.strip_prefix("is") {
        if rest.chars().next().map(char::is_uppercase).unwrap_or(false) {
            return method.descriptor.ends_with(")Z");
        }
    }
    false
}

/// Strip the `get`/`is` prefix and lowercase the first remaining character.
fn property_name(getter: &str) -> String {
    let rest = getter
        .strip_prefix("get")
        .or_else(|| getter.strip_prefix("is"))
        .unwrap_or(getter);
    let mut chars = rest.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn member_type(signature: Option<&str>, descriptor: &str) -> anyhow::Result<TypeRef> {
    match signature {
        Some(signature) => parse_type(signature),
        None => parse_type(descriptor),
    }
}

fn getter_return_type(method: &Method) -> anyhow::Result<TypeRef> {
    let source = method.signature.as_deref().unwrap_or(&method.descriptor);
    let (_, return_type) = parse_method_type(source)?;
    Ok(return_type)
}
