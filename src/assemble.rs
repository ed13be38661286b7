use std::collections::BTreeMap;

use crate::classpath::ClassIndex;
use crate::extract::ExtractedMethod;
use crate::introspect::TypeIntrospector;
use crate::pool::is_response_class;
use crate::resources::{Body, ResourceMethod, Resources, Response};
use crate::signature::{OBJECT, TypeRef};

/// Combine extractor output, simulator findings, and type introspection
/// into the renderable `Resources` model. Body types are introspected once
/// through the shared cache; entries sort by path and verb for stable
/// output.
pub(crate) fn assemble(extracted: Vec<ExtractedMethod>, index: &ClassIndex) -> Resources {
    let introspector = TypeIntrospector::new(index);
    let mut methods: BTreeMap<String, Vec<ResourceMethod>> = BTreeMap::new();

    for method in extracted {
        let assembled = assemble_method(&method, &introspector, index);
        methods.entry(method.sub_path.clone()).or_default().push(assembled);
    }

    for group in methods.values_mut() {
        group.sort_by_key(|method| method.verb.as_str());
    }

    Resources {
        base_path: String::new(),
        methods,
    }
}

fn assemble_method(
    method: &ExtractedMethod,
    introspector: &TypeIntrospector<'_>,
    index: &ClassIndex,
) -> ResourceMethod {
    let request_body = method
        .request_body
        .as_ref()
        .map(|type_ref| make_body(type_ref.clone(), introspector));

    ResourceMethod {
        verb: method.verb,
        request_media_types: method.consumes.clone(),
        response_media_types: method.produces.clone(),
        parameters: method.parameters.clone(),
        request_body,
        responses: assemble_responses(method, introspector, index),
    }
}

fn assemble_responses(
    method: &ExtractedMethod,
    introspector: &TypeIntrospector<'_>,
    index: &ClassIndex,
) -> BTreeMap<u16, Response> {
    let default_status = if method.returns_void { 204 } else { 200 };
    let mut responses = BTreeMap::new();

    let aggregates = method
        .result
        .as_ref()
        .map(|element| element.responses.clone())
        .unwrap_or_default();

    if aggregates.is_empty() {
        let body = plain_body(method, introspector);
        responses.insert(
            default_status,
            Response {
                headers: Default::default(),
                body,
            },
        );
        return responses;
    }

    for aggregate in aggregates {
        let body = entity_body(
            aggregate.entity_types.iter().map(String::as_str),
            introspector,
            index,
        );
        let statuses: Vec<u16> = if aggregate.statuses.is_empty() {
            vec![default_status]
        } else {
            aggregate.statuses.iter().copied().collect()
        };
        for status in statuses {
            merge_response(
                responses.entry(status).or_default(),
                &aggregate.headers,
                body.as_ref(),
                introspector,
                index,
            );
        }
    }

    responses
}

/// Body for a method whose return flow never touched a response builder:
/// the declared return type, refined by the simulated element's type when
/// it is more specific.
fn plain_body(method: &ExtractedMethod, introspector: &TypeIntrospector<'_>) -> Option<Body> {
    if method.returns_void || is_response_class(&method.declared_return.name) {
        return None;
    }
    let declared = &method.declared_return;
    // A parameterized declared type beats the element's raw type: the
    // element never carries the type arguments the schema needs.
    let type_ref = match &method.result {
        Some(element)
            if declared.args.is_empty()
                && element.type_name != OBJECT
                && element.type_name != declared.name =>
        {
            TypeRef::named(&element.type_name)
        }
        _ => declared.clone(),
    };
    if type_ref.name == "void" {
        return None;
    }
    Some(make_body(type_ref, introspector))
}

fn entity_body<'a>(
    entity_types: impl Iterator<Item = &'a str>,
    introspector: &TypeIntrospector<'_>,
    index: &ClassIndex,
) -> Option<Body> {
    let mut folded: Option<String> = None;
    for entity in entity_types {
        folded = Some(match folded {
            None => entity.to_string(),
            Some(current) => index.common_supertype(&current, entity),
        });
    }
    folded.map(|name| make_body(TypeRef::named(&name), introspector))
}

fn merge_response(
    response: &mut Response,
    headers: &std::collections::BTreeSet<String>,
    body: Option<&Body>,
    introspector: &TypeIntrospector<'_>,
    index: &ClassIndex,
) {
    response.headers.extend(headers.iter().cloned());
    match (&response.body, body) {
        (None, Some(body)) => response.body = Some(body.clone()),
        (Some(existing), Some(body)) if existing.type_ref != body.type_ref => {
            let folded = index.common_supertype(&existing.type_ref.name, &body.type_ref.name);
            response.body = Some(make_body(TypeRef::named(&folded), introspector));
        }
        _ => {}
    }
}

fn make_body(type_ref: TypeRef, introspector: &TypeIntrospector<'_>) -> Body {
    let schema = introspector.introspect(&type_ref);
    Body { type_ref, schema }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Constant, Element, HttpResponse};
    use crate::ir::{Class, Field, FieldAccess};
    use crate::resources::{HttpVerb, MethodParameters};
    use crate::schema::{Primitive, Schema};
    use std::collections::BTreeSet;

    fn user_class() -> Class {
        let mut class = Class::synthetic("com.example.User");
        class.fields = vec![Field {
            name: "name".to_string(),
            descriptor: "Ljava/lang/String;".to_string(),
            signature: None,
            access: FieldAccess {
                is_public: true,
                is_static: false,
                is_transient: false,
            },
            annotations: Vec::new(),
        }];
        class
    }

    fn extracted(verb: HttpVerb, declared: TypeRef, returns_void: bool) -> ExtractedMethod {
        ExtractedMethod {
            sub_path: "users".to_string(),
            verb,
            consumes: BTreeSet::new(),
            produces: BTreeSet::new(),
            parameters: MethodParameters::default(),
            request_body: None,
            declared_return: declared,
            returns_void,
            result: None,
        }
    }

    #[test]
    fn plain_string_return_defaults_to_200() {
        let index = ClassIndex::build(Vec::new());
        let mut method = extracted(HttpVerb::Get, TypeRef::named("java.lang.String"), false);
        method.result = Some(Element::constant(Constant::Str("ok".to_string())));

        let resources = assemble(vec![method], &index);

        let methods = resources.methods.get("users").expect("path entry");
        let response = methods[0].responses.get(&200).expect("status 200");
        let body = response.body.as_ref().expect("body");
        assert_eq!(body.schema, Schema::Primitive(Primitive::Str));
    }

    #[test]
    fn void_return_defaults_to_204_without_body() {
        let index = ClassIndex::build(Vec::new());
        let method = extracted(HttpVerb::Delete, TypeRef::named("void"), true);

        let resources = assemble(vec![method], &index);

        let methods = resources.methods.get("users").expect("path entry");
        let response = methods[0].responses.get(&204).expect("status 204");
        assert!(response.body.is_none());
    }

    #[test]
    fn aggregates_produce_separate_status_entries() {
        let index = ClassIndex::build(vec![user_class()]);
        let mut element = Element::of_type("jakarta.ws.rs.core.Response");
        let mut ok = HttpResponse::default();
        ok.statuses.insert(200);
        ok.entity_types.insert("com.example.User".to_string());
        element.responses.insert(ok);
        let mut not_found = HttpResponse::default();
        not_found.statuses.insert(404);
        element.responses.insert(not_found);
        let mut method = extracted(
            HttpVerb::Get,
            TypeRef::named("jakarta.ws.rs.core.Response"),
            false,
        );
        method.result = Some(element);

        let resources = assemble(vec![method], &index);

        let methods = resources.methods.get("users").expect("path entry");
        let responses = &methods[0].responses;
        assert_eq!(responses.len(), 2);
        let ok = responses.get(&200).expect("status 200");
        let body = ok.body.as_ref().expect("body of 200");
        assert_eq!(body.type_ref.name, "com.example.User");
        let not_found = responses.get(&404).expect("status 404");
        assert!(not_found.body.is_none());
    }

    #[test]
    fn collection_return_unwraps_to_array_schema() {
        let index = ClassIndex::build(vec![user_class()]);
        let list = TypeRef {
            name: "java.util.List".to_string(),
            args: vec![TypeRef::named("com.example.User")],
        };
        let mut method = extracted(HttpVerb::Get, list.clone(), false);
        method.result = Some(Element::of_type("java.util.List"));

        let resources = assemble(vec![method], &index);

        let methods = resources.methods.get("users").expect("path entry");
        let response = methods[0].responses.get(&200).expect("status 200");
        let body = response.body.as_ref().expect("body");
        assert_eq!(body.type_ref, list);
        let Schema::Array(element) = &body.schema else {
            panic!("expected array schema, got {:?}", body.schema);
        };
        let Schema::Object(properties) = element.as_ref() else {
            panic!("expected object element schema");
        };
        assert_eq!(properties[0].0, "name");
    }

    #[test]
    fn methods_sort_by_verb_within_a_path() {
        let index = ClassIndex::build(Vec::new());
        let post = extracted(HttpVerb::Post, TypeRef::named("java.lang.String"), false);
        let get = extracted(HttpVerb::Get, TypeRef::named("java.lang.String"), false);

        let resources = assemble(vec![post, get], &index);

        let methods = resources.methods.get("users").expect("path entry");
        assert_eq!(methods[0].verb, HttpVerb::Get);
        assert_eq!(methods[1].verb, HttpVerb::Post);
    }

    #[test]
    fn response_typed_return_without_aggregates_has_no_body() {
        let index = ClassIndex::build(Vec::new());
        let mut method = extracted(
            HttpVerb::Get,
            TypeRef::named("jakarta.ws.rs.core.Response"),
            false,
        );
        method.result = Some(Element::of_type("jakarta.ws.rs.core.Response"));

        let resources = assemble(vec![method], &index);

        let methods = resources.methods.get("users").expect("path entry");
        let response = methods[0].responses.get(&200).expect("status 200");
        assert!(response.body.is_none());
    }
}
