use std::collections::BTreeSet;

use rayon::prelude::*;
use tracing::debug;

use crate::classpath::ClassIndex;
use crate::descriptor;
use crate::element::Element;
use crate::ir::{AnnotationUse, Class, Method};
use crate::pool::MethodPool;
use crate::resources::{HttpVerb, MethodParameters};
use crate::signature::{TypeRef, is_primitive, parse_method_type};
use crate::simulate::Simulator;

/// Raw findings for one resource method: annotation data plus the merged
/// return element from simulation. The assembler turns these into the
/// rendered model.
#[derive(Clone, Debug)]
pub(crate) struct ExtractedMethod {
    pub(crate) sub_path: String,
    pub(crate) verb: HttpVerb,
    pub(crate) consumes: BTreeSet<String>,
    pub(crate) produces: BTreeSet<String>,
    pub(crate) parameters: MethodParameters,
    pub(crate) request_body: Option<TypeRef>,
    pub(crate) declared_return: TypeRef,
    pub(crate) returns_void: bool,
    pub(crate) result: Option<Element>,
}

/// Scan every project class for resource roots and extract their methods.
/// Classes are processed in parallel; output order follows the class index
/// so results are deterministic.
pub(crate) fn extract_resources(index: &ClassIndex, pool: &MethodPool) -> Vec<ExtractedMethod> {
    let classes: Vec<&Class> = index.project_classes().collect();
    classes
        .par_iter()
        .map(|class| extract_class(class, index, pool))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

fn extract_class(class: &Class, index: &ClassIndex, pool: &MethodPool) -> Vec<ExtractedMethod> {
    let Some(class_path) = path_value(&class.annotations) else {
        return Vec::new();
    };
    debug!("resource root {} at path {class_path:?}", class.name);

    let class_consumes = media_types(&class.annotations, "Consumes");
    let class_produces = media_types(&class.annotations, "Produces");

    let mut extracted = Vec::new();
    for (declaring, method) in candidate_methods(class, index) {
        let Some(verb) = verb_annotation(&method.annotations) else {
            continue;
        };
        if !method.access.is_public || method.access.is_static || method.access.is_synthetic {
            continue;
        }

        let method_path = path_value(&method.annotations);
        let sub_path = join_paths(&class_path, method_path.as_deref().unwrap_or(""));

        let mut consumes = media_types(&method.annotations, "Consumes");
        if consumes.is_empty() {
            consumes = class_consumes.clone();
        }
        let mut produces = media_types(&method.annotations, "Produces");
        if produces.is_empty() {
            produces = class_produces.clone();
        }

        let (parameters, request_body) = bind_parameters(method);
        let (declared_return, returns_void) = declared_return(method);

        let mut simulator = Simulator::new(index, pool);
        let result = simulator.simulate_method(declaring, method);

        extracted.push(ExtractedMethod {
            sub_path,
            verb,
            consumes,
            produces,
            parameters,
            request_body,
            declared_return,
            returns_void,
            result,
        });
    }
    extracted
}

/// The class's own methods plus public methods inherited from resolvable
/// superclasses that the class does not redeclare.
fn candidate_methods<'a>(class: &'a Class, index: &'a ClassIndex) -> Vec<(&'a Class, &'a Method)> {
    let mut candidates: Vec<(&Class, &Method)> =
        class.methods.iter().map(|method| (class, method)).collect();
    let mut declared: BTreeSet<(String, String)> = class
        .methods
        .iter()
        .map(|method| (method.name.clone(), method.descriptor.clone()))
        .collect();

    let mut current = class.super_name.clone();
    while let Some(super_name) = current {
        if super_name == "java.lang.Object" {
            break;
        }
        let Some(super_class) = index.find(&super_name) else {
            break;
        };
        for method in &super_class.methods {
            if method.name == "<init>" || !method.access.is_public {
                continue;
            }
            let key = (method.name.clone(), method.descriptor.clone());
            if declared.contains(&key) {
                continue;
            }
            declared.insert(key);
            candidates.push((super_class, method));
        }
        current = super_class.super_name.clone();
    }
    candidates
}

fn ws_annotation<'a>(annotations: &'a [AnnotationUse], simple: &str) -> Option<&'a AnnotationUse> {
    annotations.iter().find(|annotation| {
        annotation.type_name == format!("javax.ws.rs.{simple}")
            || annotation.type_name == format!("jakarta.ws.rs.{simple}")
    })
}

fn path_value(annotations: &[AnnotationUse]) -> Option<String> {
    ws_annotation(annotations, "Path")
        .map(|annotation| annotation.string_value("value").unwrap_or("").to_string())
}

fn verb_annotation(annotations: &[AnnotationUse]) -> Option<HttpVerb> {
    annotations.iter().find_map(|annotation| {
        let simple = annotation
            .type_name
            .strip_prefix("javax.ws.rs.")
            .or_else(|| annotation.type_name.strip_prefix("jakarta.ws.rs."))?;
        HttpVerb::from_annotation(simple)
    })
}

fn media_types(annotations: &[AnnotationUse], simple: &str) -> BTreeSet<String> {
    ws_annotation(annotations, simple)
        .map(|annotation| annotation.string_values("value").into_iter().collect())
        .unwrap_or_default()
}

/// Concatenate class-level and method-level templates, collapsing duplicate
/// slashes and trimming the ends.
pub(crate) fn join_paths(class_path: &str, method_path: &str) -> String {
    let joined = format!("{class_path}/{method_path}");
    let mut collapsed = String::with_capacity(joined.len());
    let mut previous_slash = false;
    for character in joined.chars() {
        if character == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        collapsed.push(character);
    }
    collapsed.trim_matches('/').to_string()
}

const BINDING_KINDS: [&str; 6] = [
    "PathParam",
    "QueryParam",
    "HeaderParam",
    "FormParam",
    "CookieParam",
    "MatrixParam",
];

fn binding_kind(annotation: &AnnotationUse) -> Option<&'static str> {
    let simple = annotation
        .type_name
        .strip_prefix("javax.ws.rs.")
        .or_else(|| annotation.type_name.strip_prefix("jakarta.ws.rs."))?;
    BINDING_KINDS.iter().find(|kind| **kind == simple).copied()
}

/// Classify each declared parameter: the first binding annotation selects
/// the kind; a parameter with no annotations at all and a non-primitive
/// type becomes the request body.
fn bind_parameters(method: &Method) -> (MethodParameters, Option<TypeRef>) {
    let mut parameters = MethodParameters::default();
    let mut request_body = None;

    let declared = match parse_method_type(&method.descriptor) {
        Ok((declared, _)) => declared,
        Err(_) => return (parameters, request_body),
    };

    for (position, parameter_type) in declared.iter().enumerate() {
        let annotations = method
            .parameter_annotations
            .get(position)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let binding = annotations
            .iter()
            .find_map(|annotation| binding_kind(annotation).map(|kind| (kind, annotation)));

        match binding {
            Some((kind, annotation)) => {
                let name = annotation.string_value("value").unwrap_or("").to_string();
                let target = match kind {
                    "PathParam" => &mut parameters.path,
                    "QueryParam" => &mut parameters.query,
                    "HeaderParam" => &mut parameters.header,
                    "FormParam" => &mut parameters.form,
                    "CookieParam" => &mut parameters.cookie,
                    _ => &mut parameters.matrix,
                };
                target.insert(name, parameter_type.name.clone());
            }
            None => {
                if annotations.is_empty()
                    && !is_primitive(&parameter_type.name)
                    && request_body.is_none()
                {
                    request_body = Some(resolved_parameter_type(method, position, parameter_type));
                }
            }
        }
    }

    (parameters, request_body)
}

/// Prefer the generic signature for the body parameter so the element type
/// of a collection body survives.
fn resolved_parameter_type(method: &Method, position: usize, fallback: &TypeRef) -> TypeRef {
    let Some(signature) = method.signature.as_deref() else {
        return fallback.clone();
    };
    match parse_method_type(signature) {
        Ok((parameters, _)) if parameters.len() == method_parameter_count(method) => parameters
            .get(position)
            .cloned()
            .unwrap_or_else(|| fallback.clone()),
        _ => fallback.clone(),
    }
}

fn method_parameter_count(method: &Method) -> usize {
    descriptor::param_count(&method.descriptor).unwrap_or(0)
}

fn declared_return(method: &Method) -> (TypeRef, bool) {
    let returns_void = descriptor::returns_void(&method.descriptor).unwrap_or(false);
    let source = method.signature.as_deref().unwrap_or(&method.descriptor);
    let declared = parse_method_type(source)
        .or_else(|_| parse_method_type(&method.descriptor))
        .map(|(_, declared)| declared)
        .unwrap_or_else(|_| TypeRef::object());
    (declared, returns_void)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Constant;
    use crate::opcodes;
    use crate::scan::read_class_bytes;
    use crate::test_classes::{ACC_PUBLIC, Ann, ClassFileBuilder, high, low, string_resource};

    fn extract_from(classes: Vec<Vec<u8>>) -> Vec<ExtractedMethod> {
        let classes = classes
            .into_iter()
            .map(|bytes| read_class_bytes(&bytes, true).expect("parse class"))
            .collect();
        let index = ClassIndex::build(classes);
        let pool = MethodPool::new();
        extract_resources(&index, &pool)
    }

    #[test]
    fn join_paths_collapses_duplicate_slashes() {
        assert_eq!(join_paths("users", "{id}"), "users/{id}");
        assert_eq!(join_paths("users/", "/{id}"), "users/{id}");
        assert_eq!(join_paths("users", ""), "users");
        assert_eq!(join_paths("/", ""), "");
    }

    #[test]
    fn trivial_get_is_extracted_and_simulated() {
        let bytes = string_resource("com/example/UserResource", "users", "GET", "list");

        let extracted = extract_from(vec![bytes]);

        assert_eq!(extracted.len(), 1);
        let method = &extracted[0];
        assert_eq!(method.sub_path, "users");
        assert_eq!(method.verb, HttpVerb::Get);
        assert_eq!(method.declared_return.name, "java.lang.String");
        assert!(!method.returns_void);
        let element = method.result.as_ref().expect("return element");
        assert_eq!(element.type_name, "java.lang.String");
        assert!(element.values.contains(&Constant::Str("ok".to_string())));
    }

    #[test]
    fn non_resource_class_is_ignored() {
        let bytes = ClassFileBuilder::new("com/example/Plain", "java/lang/Object").finish();

        let extracted = extract_from(vec![bytes]);

        assert!(extracted.is_empty());
    }

    #[test]
    fn path_and_query_parameters_are_bound() {
        let mut builder = ClassFileBuilder::new("com/example/UserResource", "java/lang/Object");
        builder.annotate_class("Ljakarta/ws/rs/Path;", &[("value", "users")]);
        builder.add_method_annotated(
            "get",
            "(JZ)Lcom/example/User;",
            vec![opcodes::ACONST_NULL, opcodes::ARETURN],
            1,
            4,
            &[
                Ann::marker("Ljakarta/ws/rs/GET;"),
                Ann::value("Ljakarta/ws/rs/Path;", "{id}"),
            ],
            &[
                vec![Ann::value("Ljakarta/ws/rs/PathParam;", "id")],
                vec![Ann::value("Ljakarta/ws/rs/QueryParam;", "full")],
            ],
        );

        let extracted = extract_from(vec![builder.finish()]);

        assert_eq!(extracted.len(), 1);
        let method = &extracted[0];
        assert_eq!(method.sub_path, "users/{id}");
        assert_eq!(method.parameters.path.get("id").map(String::as_str), Some("long"));
        assert_eq!(
            method.parameters.query.get("full").map(String::as_str),
            Some("boolean")
        );
        assert!(method.request_body.is_none());
    }

    #[test]
    fn unannotated_reference_parameter_is_the_request_body() {
        let mut builder = ClassFileBuilder::new("com/example/UserResource", "java/lang/Object");
        builder.annotate_class("Ljakarta/ws/rs/Path;", &[("value", "users")]);
        let status = builder.add_method_ref(
            "jakarta/ws/rs/core/Response",
            "status",
            "(I)Ljakarta/ws/rs/core/Response$ResponseBuilder;",
        );
        let entity = builder.add_method_ref(
            "jakarta/ws/rs/core/Response$ResponseBuilder",
            "entity",
            "(Ljava/lang/Object;)Ljakarta/ws/rs/core/Response$ResponseBuilder;",
        );
        let build = builder.add_method_ref(
            "jakarta/ws/rs/core/Response$ResponseBuilder",
            "build",
            "()Ljakarta/ws/rs/core/Response;",
        );
        let code = vec![
            opcodes::SIPUSH,
            0x00,
            0xc9, // 201
            opcodes::INVOKESTATIC,
            high(status),
            low(status),
            opcodes::ALOAD_1,
            opcodes::INVOKEVIRTUAL,
            high(entity),
            low(entity),
            opcodes::INVOKEVIRTUAL,
            high(build),
            low(build),
            opcodes::ARETURN,
        ];
        builder.add_method_annotated(
            "create",
            "(Lcom/example/User;)Ljakarta/ws/rs/core/Response;",
            code,
            3,
            2,
            &[Ann::marker("Ljakarta/ws/rs/POST;")],
            &[],
        );

        let extracted = extract_from(vec![builder.finish()]);

        assert_eq!(extracted.len(), 1);
        let method = &extracted[0];
        assert_eq!(method.verb, HttpVerb::Post);
        assert_eq!(
            method.request_body.as_ref().map(|body| body.name.as_str()),
            Some("com.example.User")
        );
        let element = method.result.as_ref().expect("return element");
        let aggregate = element.responses.iter().next().expect("aggregate");
        assert!(aggregate.statuses.contains(&201));
        assert!(aggregate.entity_types.contains("com.example.User"));
    }

    #[test]
    fn media_types_fall_back_to_class_level() {
        let mut builder = ClassFileBuilder::new("com/example/UserResource", "java/lang/Object");
        builder.annotate_class("Ljakarta/ws/rs/Path;", &[("value", "users")]);
        builder.annotate_class_with(Ann::values(
            "Ljakarta/ws/rs/Produces;",
            &["application/json"],
        ));
        let ok = builder.add_string("ok");
        builder.add_method_annotated(
            "list",
            "()Ljava/lang/String;",
            vec![opcodes::LDC, ok as u8, opcodes::ARETURN],
            1,
            1,
            &[Ann::marker("Ljakarta/ws/rs/GET;")],
            &[],
        );

        let extracted = extract_from(vec![builder.finish()]);

        assert_eq!(extracted.len(), 1);
        assert!(extracted[0].produces.contains("application/json"));
    }

    #[test]
    fn inherited_verb_methods_are_extracted() {
        let mut base = ClassFileBuilder::new("com/example/BaseResource", "java/lang/Object");
        let ok = base.add_string("ok");
        base.add_method_annotated(
            "ping",
            "()Ljava/lang/String;",
            vec![opcodes::LDC, ok as u8, opcodes::ARETURN],
            1,
            1,
            &[Ann::marker("Ljakarta/ws/rs/GET;")],
            &[],
        );
        let mut child =
            ClassFileBuilder::new("com/example/PingResource", "com/example/BaseResource");
        child.annotate_class("Ljakarta/ws/rs/Path;", &[("value", "ping")]);

        let extracted = extract_from(vec![base.finish(), child.finish()]);

        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].sub_path, "ping");
        assert_eq!(extracted[0].verb, HttpVerb::Get);
    }

    #[test]
    fn static_and_non_public_methods_are_skipped() {
        let mut builder = ClassFileBuilder::new("com/example/UserResource", "java/lang/Object");
        builder.annotate_class("Ljakarta/ws/rs/Path;", &[("value", "users")]);
        let ok = builder.add_string("ok");
        builder.add_method_full(
            "helper",
            "()Ljava/lang/String;",
            ACC_PUBLIC | crate::test_classes::ACC_STATIC,
            vec![opcodes::LDC, ok as u8, opcodes::ARETURN],
            1,
            1,
            &[Ann::marker("Ljakarta/ws/rs/GET;")],
            &[],
            None,
        );

        let extracted = extract_from(vec![builder.finish()]);

        assert!(extracted.is_empty());
    }
}
