use std::collections::BTreeMap;
use std::fmt::Write;

use crate::backend::{Backend, sample_value};
use crate::resources::{Project, ResourceMethod};

const TYPE_WILDCARD: &str = "*/*";

/// Renders the project model as a plain-text summary.
pub(crate) struct PlainTextBackend;

impl Backend for PlainTextBackend {
    fn render(&self, project: &Project) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "REST resources of {}:", project.name);
        let _ = writeln!(out, "{}", project.version);
        let _ = writeln!(out);

        for (sub_path, methods) in &project.resources.methods {
            for method in methods {
                append_method(&mut out, &project.resources.base_path, sub_path, method);
            }
        }

        out
    }
}

fn append_method(out: &mut String, base_path: &str, sub_path: &str, method: &ResourceMethod) {
    if base_path.is_empty() {
        let _ = writeln!(out, "{} {}:", method.verb, sub_path);
    } else {
        let _ = writeln!(out, "{} {}/{}:", method.verb, base_path, sub_path);
    }

    let _ = writeln!(out, " Request:");
    match &method.request_body {
        Some(body) => {
            let _ = writeln!(
                out,
                "  Content-Type: {}",
                media_types(&method.request_media_types)
            );
            let _ = writeln!(out, "  Request Body: {}", body.type_ref);
            let _ = writeln!(
                out,
                "   application/json: {}",
                sample_value(&body.schema)
            );
        }
        None => {
            let _ = writeln!(out, "  No body");
        }
    }
    append_params(out, "  Path Param: ", &method.parameters.path);
    append_params(out, "  Query Param: ", &method.parameters.query);
    append_params(out, "  Form Param: ", &method.parameters.form);
    append_params(out, "  Header Param: ", &method.parameters.header);
    append_params(out, "  Cookie Param: ", &method.parameters.cookie);
    append_params(out, "  Matrix Param: ", &method.parameters.matrix);
    let _ = writeln!(out);

    let _ = writeln!(out, " Response:");
    let _ = writeln!(
        out,
        "  Content-Type: {}",
        media_types(&method.response_media_types)
    );
    for (status, response) in &method.responses {
        let _ = writeln!(out, "  Status Codes: {status}");
        if !response.headers.is_empty() {
            let headers: Vec<&str> = response.headers.iter().map(String::as_str).collect();
            let _ = writeln!(out, "   Header: {}", headers.join(", "));
        }
        if let Some(body) = &response.body {
            let _ = writeln!(
                out,
                "   Response Body: {} (application/json): {}",
                body.type_ref,
                sample_value(&body.schema)
            );
        }
        let _ = writeln!(out);
    }
    let _ = writeln!(out);
}

fn append_params(out: &mut String, label: &str, parameters: &BTreeMap<String, String>) {
    for (name, java_type) in parameters {
        let _ = writeln!(out, "{label}{name}, {java_type}");
    }
}

fn media_types(types: &std::collections::BTreeSet<String>) -> String {
    if types.is_empty() {
        return TYPE_WILDCARD.to_string();
    }
    types.iter().cloned().collect::<Vec<_>>().join(", ")
}
