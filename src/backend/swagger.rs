use serde_json::{Map, Value, json};

use crate::backend::{Backend, parameter_type, sample_value};
use crate::resources::{Project, ResourceMethod, Response};
use crate::schema::{Primitive, Schema};

/// Renders the project model as a Swagger 2.0 document.
pub(crate) struct SwaggerBackend;

impl Backend for SwaggerBackend {
    fn render(&self, project: &Project) -> String {
        let mut document = Map::new();
        document.insert("swagger".to_string(), json!("2.0"));
        document.insert(
            "info".to_string(),
            json!({
                "version": project.version,
                "title": project.name,
            }),
        );
        document.insert("host".to_string(), json!(project.domain));
        document.insert(
            "basePath".to_string(),
            json!(format!("/{}", project.resources.base_path)),
        );
        document.insert("schemes".to_string(), json!(["http"]));

        let mut paths = Map::new();
        for (sub_path, methods) in &project.resources.methods {
            let mut operations = Map::new();
            for method in methods {
                operations.insert(
                    method.verb.as_str().to_lowercase(),
                    operation(method),
                );
            }
            paths.insert(format!("/{sub_path}"), Value::Object(operations));
        }
        document.insert("paths".to_string(), Value::Object(paths));

        serde_json::to_string_pretty(&Value::Object(document))
            .expect("swagger document serialization")
    }
}

fn operation(method: &ResourceMethod) -> Value {
    let consumes: Vec<&String> = method.request_media_types.iter().collect();
    let produces: Vec<&String> = method.response_media_types.iter().collect();

    let mut operation = Map::new();
    operation.insert("consumes".to_string(), json!(consumes));
    operation.insert("produces".to_string(), json!(produces));
    operation.insert("parameters".to_string(), parameters(method));
    operation.insert("responses".to_string(), responses(method));
    Value::Object(operation)
}

fn parameters(method: &ResourceMethod) -> Value {
    let mut entries = Vec::new();
    let groups = [
        ("path", &method.parameters.path),
        ("header", &method.parameters.header),
        ("query", &method.parameters.query),
        ("formData", &method.parameters.form),
    ];
    for (location, group) in groups {
        for (name, java_type) in group {
            entries.push(json!({
                "name": name,
                "in": location,
                "required": true,
                "type": parameter_type(java_type),
            }));
        }
    }

    if let Some(body) = &method.request_body {
        entries.push(json!({
            "name": "body",
            "in": "body",
            "required": true,
            "schema": schema_value(&body.schema),
        }));
    }

    Value::Array(entries)
}

fn responses(method: &ResourceMethod) -> Value {
    let mut entries = Map::new();
    for (status, response) in &method.responses {
        entries.insert(status.to_string(), response_value(*status, response));
    }
    Value::Object(entries)
}

fn response_value(status: u16, response: &Response) -> Value {
    let mut headers = Map::new();
    for header in &response.headers {
        headers.insert(header.clone(), json!({ "type": "string" }));
    }

    let mut entry = Map::new();
    entry.insert("description".to_string(), json!(reason_phrase(status)));
    entry.insert("headers".to_string(), Value::Object(headers));
    if let Some(body) = &response.body {
        entry.insert("schema".to_string(), schema_value(&body.schema));
    }
    Value::Object(entry)
}

fn schema_value(schema: &Schema) -> Value {
    match schema {
        Schema::Primitive(Primitive::Str) => json!({ "type": "string" }),
        Schema::Primitive(Primitive::Date) => json!({ "type": "string", "format": "date-time" }),
        Schema::Primitive(Primitive::Integer) => json!({ "type": "integer" }),
        Schema::Primitive(Primitive::Number) => json!({ "type": "number" }),
        Schema::Primitive(Primitive::Boolean) => json!({ "type": "boolean" }),
        Schema::Array(element) => json!({ "type": "array", "items": schema_value(element) }),
        Schema::Object(properties) => {
            let mut rendered = Map::new();
            for (name, property) in properties {
                rendered.insert(name.clone(), schema_value(property));
            }
            json!({ "type": "object", "properties": Value::Object(rendered) })
        }
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}
