use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

use crate::classpath::ClassIndex;
use crate::decode::{Ins, decode_method};
use crate::element::{Constant, Element, MethodIdentifier};
use crate::ir::MemberRef;
use crate::signature::parse_method_type;

/// The effect of invoking a method: a hand-written summary for the
/// well-known response-builder and string APIs, an interpreted summary
/// holding the callee's decoded instruction stream, or nothing at all.
#[derive(Clone, Debug)]
pub(crate) enum Summary {
    Known(Known),
    Interpreted(Arc<Vec<Ins>>),
    Opaque,
}

/// Hand-written behaviors for well-known API methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Known {
    /// `Response.status(int)` / `Response.status(Status)`.
    CreateStatus,
    /// Response shortcut with a fixed status, optionally binding the first
    /// argument as the entity (`ok(Object)`, `accepted(Object)`).
    Create { status: u16, entity: bool },
    /// `ResponseBuilder.entity(Object)` binds the body type.
    BuilderEntity,
    /// `ResponseBuilder.header(String, Object)` records a header name.
    BuilderHeader,
    /// `ResponseBuilder.build()` produces the response value.
    BuilderBuild,
    /// Remaining builder methods return the receiver unchanged.
    BuilderPassthrough,
    /// `Status.getStatusCode()` exposes the numeric code.
    StatusGetCode,
    /// `WebApplicationException(int)` / `(Response)` constructors attach
    /// response state to the receiver, which a later `THROW` surfaces.
    WebApplicationInit,
    /// `String.concat` and `StringBuilder.append`.
    Concat,
    /// `StringBuilder.toString()` / `StringBuffer.toString()`.
    BuilderToString,
    /// `String.valueOf(..)`.
    ValueOf,
}

pub(crate) fn is_response_class(name: &str) -> bool {
    matches!(name, "javax.ws.rs.core.Response" | "jakarta.ws.rs.core.Response")
}

pub(crate) fn is_response_builder(name: &str) -> bool {
    matches!(
        name,
        "javax.ws.rs.core.Response$ResponseBuilder" | "jakarta.ws.rs.core.Response$ResponseBuilder"
    )
}

pub(crate) fn is_status_enum(name: &str) -> bool {
    matches!(
        name,
        "javax.ws.rs.core.Response$Status" | "jakarta.ws.rs.core.Response$Status"
    )
}

fn is_web_application_exception(name: &str) -> bool {
    name == "javax.ws.rs.WebApplicationException" || name == "jakarta.ws.rs.WebApplicationException"
}

/// Numeric codes of the `Response.Status` enum constants.
pub(crate) fn status_code(constant: &str) -> Option<u16> {
    let code = match constant {
        "OK" => 200,
        "CREATED" => 201,
        "ACCEPTED" => 202,
        "NO_CONTENT" => 204,
        "RESET_CONTENT" => 205,
        "PARTIAL_CONTENT" => 206,
        "MOVED_PERMANENTLY" => 301,
        "FOUND" => 302,
        "SEE_OTHER" => 303,
        "NOT_MODIFIED" => 304,
        "TEMPORARY_REDIRECT" => 307,
        "BAD_REQUEST" => 400,
        "UNAUTHORIZED" => 401,
        "PAYMENT_REQUIRED" => 402,
        "FORBIDDEN" => 403,
        "NOT_FOUND" => 404,
        "METHOD_NOT_ALLOWED" => 405,
        "NOT_ACCEPTABLE" => 406,
        "PROXY_AUTHENTICATION_REQUIRED" => 407,
        "REQUEST_TIMEOUT" => 408,
        "CONFLICT" => 409,
        "GONE" => 410,
        "LENGTH_REQUIRED" => 411,
        "PRECONDITION_FAILED" => 412,
        "REQUEST_ENTITY_TOO_LARGE" => 413,
        "REQUEST_URI_TOO_LONG" => 414,
        "UNSUPPORTED_MEDIA_TYPE" => 415,
        "REQUESTED_RANGE_NOT_SATISFIABLE" => 416,
        "EXPECTATION_FAILED" => 417,
        "INTERNAL_SERVER_ERROR" => 500,
        "NOT_IMPLEMENTED" => 501,
        "BAD_GATEWAY" => 502,
        "SERVICE_UNAVAILABLE" => 503,
        "GATEWAY_TIMEOUT" => 504,
        "HTTP_VERSION_NOT_SUPPORTED" => 505,
        _ => return None,
    };
    Some(code)
}

/// Media-type strings behind the `MediaType` string constants.
fn media_constant(name: &str) -> Option<&'static str> {
    let value = match name {
        "APPLICATION_JSON" => "application/json",
        "APPLICATION_XML" => "application/xml",
        "APPLICATION_ATOM_XML" => "application/atom+xml",
        "APPLICATION_SVG_XML" => "application/svg+xml",
        "APPLICATION_XHTML_XML" => "application/xhtml+xml",
        "APPLICATION_OCTET_STREAM" => "application/octet-stream",
        "APPLICATION_FORM_URLENCODED" => "application/x-www-form-urlencoded",
        "MULTIPART_FORM_DATA" => "multipart/form-data",
        "TEXT_PLAIN" => "text/plain",
        "TEXT_XML" => "text/xml",
        "TEXT_HTML" => "text/html",
        "WILDCARD" => "*/*",
        _ => return None,
    };
    Some(value)
}

/// Resolve the abstract value of a static field read, table-driven for the
/// `Response.Status` and `MediaType` constants.
pub(crate) fn well_known_static(field: &MemberRef, declared_type: &str) -> Option<Element> {
    if is_status_enum(&field.owner) {
        let code = status_code(&field.name)?;
        let mut element = Element::of_type(declared_type);
        element.add_value(Constant::Int(code as i64));
        return Some(element);
    }
    if matches!(
        field.owner.as_str(),
        "javax.ws.rs.core.MediaType" | "jakarta.ws.rs.core.MediaType"
    ) {
        let value = media_constant(&field.name)?;
        let mut element = Element::of_type(declared_type);
        element.add_value(Constant::Str(value.to_string()));
        return Some(element);
    }
    None
}

/// Hand-written summary lookup for the well-known APIs.
pub(crate) fn known_summary(id: &MethodIdentifier) -> Option<Known> {
    if is_response_class(&id.owner) && id.is_static {
        let known = match id.name.as_str() {
            "status" => Known::CreateStatus,
            "ok" => Known::Create {
                status: 200,
                entity: !id.parameters.is_empty(),
            },
            "noContent" => Known::Create {
                status: 204,
                entity: false,
            },
            "created" => Known::Create {
                status: 201,
                entity: false,
            },
            "accepted" => Known::Create {
                status: 202,
                entity: !id.parameters.is_empty(),
            },
            "serverError" => Known::Create {
                status: 500,
                entity: false,
            },
            "notAcceptable" => Known::Create {
                status: 406,
                entity: false,
            },
            "seeOther" => Known::Create {
                status: 303,
                entity: false,
            },
            "temporaryRedirect" => Known::Create {
                status: 307,
                entity: false,
            },
            "notModified" => Known::Create {
                status: 304,
                entity: false,
            },
            _ => return None,
        };
        return Some(known);
    }
    if is_response_builder(&id.owner) {
        let known = match id.name.as_str() {
            "entity" => Known::BuilderEntity,
            "header" => Known::BuilderHeader,
            "build" => Known::BuilderBuild,
            _ if is_response_builder(&id.return_type.name) => Known::BuilderPassthrough,
            _ => return None,
        };
        return Some(known);
    }
    if is_status_enum(&id.owner) && id.name == "getStatusCode" {
        return Some(Known::StatusGetCode);
    }
    if is_web_application_exception(&id.owner) && id.name == "<init>" {
        return Some(Known::WebApplicationInit);
    }
    match (id.owner.as_str(), id.name.as_str()) {
        ("java.lang.String", "concat") => Some(Known::Concat),
        ("java.lang.String", "valueOf") => Some(Known::ValueOf),
        ("java.lang.StringBuilder" | "java.lang.StringBuffer", "append") => Some(Known::Concat),
        ("java.lang.StringBuilder" | "java.lang.StringBuffer", "toString") => {
            Some(Known::BuilderToString)
        }
        _ => None,
    }
}

/// Summary entry states for cooperative computation.
enum Entry {
    Computing,
    Ready(Summary),
}

/// Process-wide registry of method summaries, shared across workers.
/// Interpreted summaries are computed once and never invalidated; two
/// workers asking for the same missing summary cooperate through the
/// condvar.
pub(crate) struct MethodPool {
    entries: Mutex<HashMap<MethodIdentifier, Entry>>,
    ready: Condvar,
}

impl MethodPool {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ready: Condvar::new(),
        }
    }

    /// Look up or lazily compute the summary for `id`. `may_wait` is false
    /// when the caller is itself inside a recursive simulation, in which
    /// case a summary under computation elsewhere degrades to `Opaque`
    /// rather than risking a cross-worker cycle.
    pub(crate) fn summary(&self, id: &MethodIdentifier, index: &ClassIndex, may_wait: bool) -> Summary {
        if let Some(known) = known_summary(id) {
            return Summary::Known(known);
        }

        {
            let mut guard = self.entries.lock().expect("method pool poisoned");
            loop {
                match guard.get(id) {
                    Some(Entry::Ready(summary)) => return summary.clone(),
                    Some(Entry::Computing) => {
                        if !may_wait {
                            debug!("summary of {}.{} in flight elsewhere; degrading", id.owner, id.name);
                            return Summary::Opaque;
                        }
                        guard = self.ready.wait(guard).expect("method pool poisoned");
                    }
                    None => {
                        guard.insert(id.clone(), Entry::Computing);
                        break;
                    }
                }
            }
        }

        let summary = compute_summary(id, index);
        let mut guard = self.entries.lock().expect("method pool poisoned");
        guard.insert(id.clone(), Entry::Ready(summary.clone()));
        self.ready.notify_all();
        summary
    }
}

fn compute_summary(id: &MethodIdentifier, index: &ClassIndex) -> Summary {
    let mut owner = id.owner.clone();
    // Inherited methods resolve against the superclass chain.
    loop {
        let Some(class) = index.find(&owner) else {
            debug!("no summary for {}.{}: class not resolvable", id.owner, id.name);
            return Summary::Opaque;
        };
        for method in &class.methods {
            if method.name != id.name {
                continue;
            }
            let Ok((parameters, _)) = parse_method_type(&method.descriptor) else {
                continue;
            };
            if parameters != id.parameters {
                continue;
            }
            if method.bytecode.is_empty() {
                return Summary::Opaque;
            }
            return Summary::Interpreted(Arc::new(decode_method(class, method)));
        }
        match &class.super_name {
            Some(super_name) if super_name != "java.lang.Object" => {
                owner = super_name.clone();
            }
            _ => {
                debug!("no summary for {}.{}: method not found", id.owner, id.name);
                return Summary::Opaque;
            }
        }
    }
}
