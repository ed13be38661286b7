pub(crate) mod plaintext;
pub(crate) mod swagger;

use clap::ValueEnum;

use crate::resources::Project;
use crate::schema::{Primitive, Schema};

/// Renders the assembled project model into an output document.
pub(crate) trait Backend {
    fn render(&self, project: &Project) -> String;
}

/// Selectable output renderers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum BackendKind {
    Swagger,
    Plaintext,
}

impl BackendKind {
    pub(crate) fn create(&self) -> Box<dyn Backend> {
        match self {
            BackendKind::Swagger => Box::new(swagger::SwaggerBackend),
            BackendKind::Plaintext => Box::new(plaintext::PlainTextBackend),
        }
    }
}

/// Sample JSON value for a schema, mirroring the representations the
/// original plain-text output carried.
pub(crate) fn sample_value(schema: &Schema) -> serde_json::Value {
    match schema {
        Schema::Primitive(Primitive::Str) => serde_json::Value::String("string".to_string()),
        Schema::Primitive(Primitive::Date) => serde_json::Value::String("date".to_string()),
        Schema::Primitive(Primitive::Integer) => serde_json::json!(0),
        Schema::Primitive(Primitive::Number) => serde_json::json!(0.0),
        Schema::Primitive(Primitive::Boolean) => serde_json::json!(false),
        Schema::Array(element) => serde_json::Value::Array(vec![sample_value(element)]),
        Schema::Object(properties) => {
            let mut object = serde_json::Map::new();
            for (name, property) in properties {
                object.insert(name.clone(), sample_value(property));
            }
            serde_json::Value::Object(object)
        }
    }
}

/// Swagger primitive type for a parameter's Java type name.
pub(crate) fn parameter_type(java_type: &str) -> &'static str {
    match java_type {
        "int" | "long" | "short" | "byte" | "java.lang.Integer" | "java.lang.Long"
        | "java.math.BigInteger" => "integer",
        "double" | "float" | "java.lang.Double" | "java.lang.Float" | "java.math.BigDecimal" => {
            "number"
        }
        "boolean" | "java.lang.Boolean" => "boolean",
        _ => "string",
    }
}
