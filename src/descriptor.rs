use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// Local variable slots taken by the parameters of a JVM method descriptor.
///
/// `long` and `double` take two slots; the receiver is not counted.
pub(crate) fn parameter_slots(descriptor: &str) -> Result<usize> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    let slots = descriptor
        .parameter_types()
        .iter()
        .map(|param| match param {
            TypeDescriptor::Long | TypeDescriptor::Double => 2,
            _ => 1,
        })
        .sum();
    Ok(slots)
}

/// Argument slots of a method including the receiver of an instance method.
pub(crate) fn method_args_size(descriptor: &str, is_static: bool) -> Result<usize> {
    let params = parameter_slots(descriptor)?;
    Ok(if is_static { params } else { params + 1 })
}
