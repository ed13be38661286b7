use std::collections::BTreeSet;

use crate::classpath::ClassIndex;
use crate::signature::{OBJECT, TypeRef};

/// Upper bound on tracked concrete values per element. Loops would otherwise
/// grow value sets without bound; overflow collapses to "type only".
pub(crate) const VALUE_CAP: usize = 32;

/// Identifier of a method: owner, name, parameter and return types, static
/// flag. Equality is structural.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct MethodIdentifier {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) parameters: Vec<TypeRef>,
    pub(crate) return_type: TypeRef,
    pub(crate) is_static: bool,
}

/// Immutable constant observed on a stack slot or local.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    /// f32/f64 widened to f64 and stored by bits for total ordering.
    Bits(u64),
    Str(String),
}

impl Constant {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Constant::Null => OBJECT,
            Constant::Bool(_) => "boolean",
            Constant::Int(_) => "int",
            Constant::Bits(_) => "double",
            Constant::Str(_) => "java.lang.String",
        }
    }

    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(value) => Some(value),
            _ => None,
        }
    }
}

/// Aggregated state of one response-builder chain: the status codes it may
/// carry, declared header names, and bound body types.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct HttpResponse {
    pub(crate) statuses: BTreeSet<u16>,
    pub(crate) headers: BTreeSet<String>,
    pub(crate) entity_types: BTreeSet<String>,
}

impl HttpResponse {
    pub(crate) fn merge(mut self, other: HttpResponse) -> HttpResponse {
        self.statuses.extend(other.statuses);
        self.headers.extend(other.headers);
        self.entity_types.extend(other.entity_types);
        self
    }
}

/// Deferred call captured on the stack by an invokedynamic instruction.
/// Invoking it produces the same result as invoking the target directly
/// with the bound arguments.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MethodHandle {
    pub(crate) target: MethodIdentifier,
    pub(crate) bound_args: Vec<Element>,
}

/// Abstract value on the simulator's operand stack or in a local slot: a
/// carrier type, the concrete values observed on it, the response-builder
/// aggregates it may hold, and (for captured callables) a method handle.
///
/// Distinct builder chains stay distinct under merge: control-flow joins
/// union the *set* of aggregates, while one chain's statuses merge inside
/// a single aggregate. This is what keeps `200 + body` apart from a bare
/// `404` when both arms of a branch return.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Element {
    pub(crate) type_name: String,
    pub(crate) values: BTreeSet<Constant>,
    overflowed: bool,
    pub(crate) responses: BTreeSet<HttpResponse>,
    pub(crate) handle: Option<MethodHandle>,
}

impl Element {
    pub(crate) fn of_type(name: &str) -> Self {
        Self {
            type_name: name.to_string(),
            values: BTreeSet::new(),
            overflowed: false,
            responses: BTreeSet::new(),
            handle: None,
        }
    }

    pub(crate) fn empty() -> Self {
        Self::of_type(OBJECT)
    }

    pub(crate) fn constant(value: Constant) -> Self {
        let mut element = Self::of_type(value.type_name());
        element.values.insert(value);
        element
    }

    pub(crate) fn response(type_name: &str, response: HttpResponse) -> Self {
        let mut element = Self::of_type(type_name);
        element.responses.insert(response);
        element
    }

    pub(crate) fn with_handle(type_name: &str, handle: MethodHandle) -> Self {
        let mut element = Self::of_type(type_name);
        element.handle = Some(handle);
        element
    }

    /// Same values and payload under a different carrier type.
    pub(crate) fn with_type(mut self, name: &str) -> Element {
        self.type_name = name.to_string();
        self
    }

    pub(crate) fn is_null_only(&self) -> bool {
        self.values.len() == 1 && self.values.contains(&Constant::Null)
    }

    /// Record a concrete value, honoring the value cap.
    pub(crate) fn add_value(&mut self, value: Constant) {
        if self.overflowed {
            return;
        }
        self.values.insert(value);
        if self.values.len() > VALUE_CAP {
            self.values.clear();
            self.overflowed = true;
        }
    }

    /// Merge two abstract values: concrete sets union (null drops against
    /// non-null), response aggregates union as sets, and the carrier type
    /// becomes the most specific common supertype the resolver knows.
    pub(crate) fn merge(self, other: Element, index: &ClassIndex) -> Element {
        let type_name = if self.is_typeless() {
            if other.is_typeless() {
                OBJECT.to_string()
            } else {
                other.type_name.clone()
            }
        } else if other.is_typeless() {
            self.type_name.clone()
        } else {
            index.common_supertype(&self.type_name, &other.type_name)
        };

        let overflowed = self.overflowed || other.overflowed;
        let mut values = BTreeSet::new();
        if !overflowed {
            values.extend(self.values);
            values.extend(other.values);
            if values.len() > 1 {
                values.remove(&Constant::Null);
            }
        }
        let overflowed = overflowed || values.len() > VALUE_CAP;
        if overflowed {
            values.clear();
        }

        let mut responses = self.responses;
        responses.extend(other.responses);

        // Distinct deferred calls cannot be represented as one handle.
        let handle = match (self.handle, other.handle) {
            (Some(left), Some(right)) if left == right => Some(left),
            (Some(_), Some(_)) => None,
            (Some(left), None) => Some(left),
            (None, right) => right,
        };

        Element {
            type_name,
            values,
            overflowed,
            responses,
            handle,
        }
    }

    /// A null constant or an untyped placeholder carries no type
    /// information worth keeping through a merge.
    fn is_typeless(&self) -> bool {
        self.is_null_only() || (self.values.is_empty() && self.type_name == OBJECT)
    }
}
