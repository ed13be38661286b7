//! Descriptor-level queries that never need the structural parser. The raw
//! descriptor stays authoritative for arity and voidness even when a
//! generic signature is present.

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// Number of declared parameters in a raw method descriptor.
pub(crate) fn param_count(raw: &str) -> Result<usize> {
    let parsed: MethodDescriptor = raw.parse().context("parse method descriptor")?;
    Ok(parsed.parameter_types().len())
}

/// Whether a raw method descriptor declares no return value.
pub(crate) fn returns_void(raw: &str) -> Result<bool> {
    let parsed: MethodDescriptor = raw.parse().context("parse method descriptor")?;
    Ok(matches!(parsed.return_type(), TypeDescriptor::Void))
}
