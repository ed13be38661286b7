//! Test-only class file writer. Emits real class bytes (constant pool,
//! access flags, annotations, signatures, code attributes) so the scenario
//! tests run the production parser end to end.

use crate::opcodes;

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_TRANSIENT: u16 = 0x0080;

/// Annotation to attach to a class, member, or parameter.
#[derive(Clone, Debug)]
pub(crate) struct Ann {
    pub(crate) descriptor: String,
    pub(crate) values: Vec<(String, AnnValue)>,
}

#[derive(Clone, Debug)]
pub(crate) enum AnnValue {
    Str(String),
    Arr(Vec<String>),
    Enum { descriptor: String, constant: String },
}

impl Ann {
    pub(crate) fn marker(descriptor: &str) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            values: Vec::new(),
        }
    }

    pub(crate) fn value(descriptor: &str, value: &str) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            values: vec![("value".to_string(), AnnValue::Str(value.to_string()))],
        }
    }

    pub(crate) fn values(descriptor: &str, values: &[&str]) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            values: vec![(
                "value".to_string(),
                AnnValue::Arr(values.iter().map(|v| v.to_string()).collect()),
            )],
        }
    }

    pub(crate) fn enum_value(descriptor: &str, enum_descriptor: &str, constant: &str) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            values: vec![(
                "value".to_string(),
                AnnValue::Enum {
                    descriptor: enum_descriptor.to_string(),
                    constant: constant.to_string(),
                },
            )],
        }
    }
}

/// Minimal class file writer for scenario tests.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    this_class: u16,
    super_class: u16,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
    class_annotations: Vec<u8>,
    class_annotation_count: u16,
    code_index: u16,
    annotations_index: u16,
    parameter_annotations_index: u16,
    signature_index: u16,
}

struct FieldSpec {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    annotations: Option<Vec<u8>>,
    signature: Option<u16>,
}

struct MethodSpec {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    code: Option<(Vec<u8>, u16, u16)>,
    annotations: Option<Vec<u8>>,
    parameter_annotations: Option<Vec<u8>>,
    signature: Option<u16>,
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            class_annotations: Vec::new(),
            class_annotation_count: 0,
            code_index: 0,
            annotations_index: 0,
            parameter_annotations_index: 0,
            signature_index: 0,
        };
        builder.code_index = builder.add_utf8("Code");
        builder.annotations_index = builder.add_utf8("RuntimeVisibleAnnotations");
        builder.parameter_annotations_index = builder.add_utf8("RuntimeVisibleParameterAnnotations");
        builder.signature_index = builder.add_utf8("Signature");
        builder.this_class = builder.add_class(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        self.cp.push(CpEntry::Utf8(value.to_string()));
        self.cp.len() as u16
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.cp.push(CpEntry::Class(name_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_string(&mut self, value: &str) -> u16 {
        let utf8_index = self.add_utf8(value);
        self.cp.push(CpEntry::Str(utf8_index));
        self.cp.len() as u16
    }

    fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.cp
            .push(CpEntry::NameAndType(name_index, descriptor_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp.push(CpEntry::MethodRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn annotate_class(&mut self, descriptor: &str, values: &[(&str, &str)]) {
        let ann = Ann {
            descriptor: descriptor.to_string(),
            values: values
                .iter()
                .map(|(name, value)| (name.to_string(), AnnValue::Str(value.to_string())))
                .collect(),
        };
        self.annotate_class_with(ann);
    }

    pub(crate) fn annotate_class_with(&mut self, ann: Ann) {
        let encoded = self.encode_annotation(&ann);
        self.class_annotations.extend(encoded);
        self.class_annotation_count += 1;
    }

    pub(crate) fn add_field(&mut self, name: &str, descriptor: &str, access_flags: u16) {
        self.add_field_annotated(name, descriptor, access_flags, &[]);
    }

    pub(crate) fn add_field_annotated(
        &mut self,
        name: &str,
        descriptor: &str,
        access_flags: u16,
        annotations: &[Ann],
    ) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        let annotations = self.encode_annotations(annotations);
        self.fields.push(FieldSpec {
            access_flags,
            name_index,
            descriptor_index,
            annotations,
            signature: None,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_method_annotated(
        &mut self,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        max_stack: u16,
        max_locals: u16,
        annotations: &[Ann],
        parameter_annotations: &[Vec<Ann>],
    ) {
        self.add_method_full(
            name,
            descriptor,
            ACC_PUBLIC,
            code,
            max_stack,
            max_locals,
            annotations,
            parameter_annotations,
            None,
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_method_full(
        &mut self,
        name: &str,
        descriptor: &str,
        access_flags: u16,
        code: Vec<u8>,
        max_stack: u16,
        max_locals: u16,
        annotations: &[Ann],
        parameter_annotations: &[Vec<Ann>],
        signature: Option<&str>,
    ) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        let signature = signature.map(|signature| self.add_utf8(signature));
        let annotations = self.encode_annotations(annotations);
        let parameter_annotations = self.encode_parameter_annotations(parameter_annotations);
        let code = if code.is_empty() {
            None
        } else {
            Some((code, max_stack, max_locals))
        };
        self.methods.push(MethodSpec {
            access_flags,
            name_index,
            descriptor_index,
            code,
            annotations,
            parameter_annotations,
            signature,
        });
    }

    fn encode_annotations(&mut self, annotations: &[Ann]) -> Option<Vec<u8>> {
        if annotations.is_empty() {
            return None;
        }
        let mut payload = Vec::new();
        push_u16(&mut payload, annotations.len() as u16);
        for ann in annotations {
            let encoded = self.encode_annotation(ann);
            payload.extend(encoded);
        }
        Some(payload)
    }

    fn encode_parameter_annotations(&mut self, parameters: &[Vec<Ann>]) -> Option<Vec<u8>> {
        if parameters.is_empty() {
            return None;
        }
        let mut payload = Vec::new();
        payload.push(parameters.len() as u8);
        for annotations in parameters {
            push_u16(&mut payload, annotations.len() as u16);
            for ann in annotations {
                let encoded = self.encode_annotation(ann);
                payload.extend(encoded);
            }
        }
        Some(payload)
    }

    fn encode_annotation(&mut self, ann: &Ann) -> Vec<u8> {
        let type_index = self.add_utf8(&ann.descriptor);
        let mut encoded = Vec::new();
        push_u16(&mut encoded, type_index);
        push_u16(&mut encoded, ann.values.len() as u16);
        for (name, value) in &ann.values {
            let name_index = self.add_utf8(name);
            push_u16(&mut encoded, name_index);
            self.encode_element_value(&mut encoded, value);
        }
        encoded
    }

    fn encode_element_value(&mut self, out: &mut Vec<u8>, value: &AnnValue) {
        match value {
            AnnValue::Str(text) => {
                let index = self.add_utf8(text);
                out.push(b's');
                push_u16(out, index);
            }
            AnnValue::Arr(items) => {
                out.push(b'[');
                push_u16(out, items.len() as u16);
                for item in items {
                    let index = self.add_utf8(item);
                    out.push(b's');
                    push_u16(out, index);
                }
            }
            AnnValue::Enum {
                descriptor,
                constant,
            } => {
                let type_name_index = self.add_utf8(descriptor);
                let const_name_index = self.add_utf8(constant);
                out.push(b'e');
                push_u16(out, type_name_index);
                push_u16(out, const_name_index);
            }
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        push_u32(&mut bytes, 0xCAFEBABE);
        push_u16(&mut bytes, 0);
        push_u16(&mut bytes, 52);
        push_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        push_u16(&mut bytes, 0x0021);
        push_u16(&mut bytes, self.this_class);
        push_u16(&mut bytes, self.super_class);
        push_u16(&mut bytes, 0);

        push_u16(&mut bytes, self.fields.len() as u16);
        for field in &self.fields {
            push_u16(&mut bytes, field.access_flags);
            push_u16(&mut bytes, field.name_index);
            push_u16(&mut bytes, field.descriptor_index);
            let mut attribute_count = 0u16;
            if field.annotations.is_some() {
                attribute_count += 1;
            }
            if field.signature.is_some() {
                attribute_count += 1;
            }
            push_u16(&mut bytes, attribute_count);
            if let Some(signature) = field.signature {
                push_u16(&mut bytes, self.signature_index);
                push_u32(&mut bytes, 2);
                push_u16(&mut bytes, signature);
            }
            if let Some(annotations) = &field.annotations {
                push_u16(&mut bytes, self.annotations_index);
                push_u32(&mut bytes, annotations.len() as u32);
                bytes.extend_from_slice(annotations);
            }
        }

        push_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            push_u16(&mut bytes, method.access_flags);
            push_u16(&mut bytes, method.name_index);
            push_u16(&mut bytes, method.descriptor_index);
            let mut attribute_count = 0u16;
            if method.code.is_some() {
                attribute_count += 1;
            }
            if method.annotations.is_some() {
                attribute_count += 1;
            }
            if method.parameter_annotations.is_some() {
                attribute_count += 1;
            }
            if method.signature.is_some() {
                attribute_count += 1;
            }
            push_u16(&mut bytes, attribute_count);
            if let Some((code, max_stack, max_locals)) = &method.code {
                push_u16(&mut bytes, self.code_index);
                push_u32(&mut bytes, 12 + code.len() as u32);
                push_u16(&mut bytes, *max_stack);
                push_u16(&mut bytes, *max_locals);
                push_u32(&mut bytes, code.len() as u32);
                bytes.extend_from_slice(code);
                push_u16(&mut bytes, 0);
                push_u16(&mut bytes, 0);
            }
            if let Some(signature) = method.signature {
                push_u16(&mut bytes, self.signature_index);
                push_u32(&mut bytes, 2);
                push_u16(&mut bytes, signature);
            }
            if let Some(annotations) = &method.annotations {
                push_u16(&mut bytes, self.annotations_index);
                push_u32(&mut bytes, annotations.len() as u32);
                bytes.extend_from_slice(annotations);
            }
            if let Some(parameter_annotations) = &method.parameter_annotations {
                push_u16(&mut bytes, self.parameter_annotations_index);
                push_u32(&mut bytes, parameter_annotations.len() as u32);
                bytes.extend_from_slice(parameter_annotations);
            }
        }

        if self.class_annotation_count > 0 {
            push_u16(&mut bytes, 1);
            push_u16(&mut bytes, self.annotations_index);
            let mut payload = Vec::new();
            push_u16(&mut payload, self.class_annotation_count);
            payload.extend_from_slice(&self.class_annotations);
            push_u32(&mut bytes, payload.len() as u32);
            bytes.extend_from_slice(&payload);
        } else {
            push_u16(&mut bytes, 0);
        }

        bytes
    }
}

/// Constant pool entries needed by the generated class files.
enum CpEntry {
    Utf8(String),
    Class(u16),
    Str(u16),
    NameAndType(u16, u16),
    MethodRef(u16, u16),
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                push_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                push_u16(bytes, *name_index);
            }
            CpEntry::Str(utf8_index) => {
                bytes.push(8);
                push_u16(bytes, *utf8_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                push_u16(bytes, *name_index);
                push_u16(bytes, *descriptor_index);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                push_u16(bytes, *class_index);
                push_u16(bytes, *name_and_type);
            }
        }
    }
}

fn push_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn push_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn high(value: u16) -> u8 {
    (value >> 8) as u8
}

pub(crate) fn low(value: u16) -> u8 {
    (value & 0xff) as u8
}

/// `@Path(path)` class with one annotated verb method returning the string
/// constant `"ok"`.
pub(crate) fn string_resource(class_name: &str, path: &str, verb: &str, method: &str) -> Vec<u8> {
    let mut builder = ClassFileBuilder::new(class_name, "java/lang/Object");
    builder.annotate_class("Ljakarta/ws/rs/Path;", &[("value", path)]);
    let ok = builder.add_string("ok");
    let code = vec![opcodes::LDC, ok as u8, opcodes::ARETURN];
    builder.add_method_annotated(
        method,
        "()Ljava/lang/String;",
        code,
        1,
        1,
        &[Ann::marker(&format!("Ljakarta/ws/rs/{verb};"))],
        &[],
    );
    builder.finish()
}
