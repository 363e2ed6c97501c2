use std::fmt;

/// Failure raised while checking one class.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum VerifyFault {
    VerifyError(String),
    ClassFormatError(String),
    OutOfMemory,
}

pub(crate) type VerifyResult<T> = std::result::Result<T, VerifyFault>;

/// Return early with a `VerifyError`.
macro_rules! verify_error {
    ($($arg:tt)*) => {
        return Err($crate::fault::VerifyFault::VerifyError(format!($($arg)*)))
    };
}

/// Return early with a `ClassFormatError`.
macro_rules! format_error {
    ($($arg:tt)*) => {
        return Err($crate::fault::VerifyFault::ClassFormatError(format!($($arg)*)))
    };
}

pub(crate) use format_error;
pub(crate) use verify_error;

/// Per-method table of `len` copies of `value`; allocation failure is `OutOfMemory`.
pub(crate) fn try_table<T: Clone>(value: T, len: usize) -> VerifyResult<Vec<T>> {
    let mut table = Vec::new();
    table
        .try_reserve_exact(len)
        .map_err(|_| VerifyFault::OutOfMemory)?;
    table.resize(len, value);
    Ok(table)
}

/// What went wrong and where, before it is flattened into an outcome.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum FaultSite<'a> {
    Class,
    Field(&'a str),
    Method { name: &'a str, signature: &'a str },
}

impl VerifyFault {
    /// Attach the class and member context and cap the message at `limit` bytes.
    pub(crate) fn into_outcome(self, class: &str, site: FaultSite<'_>, limit: usize) -> VerifyOutcome {
        let decorate = |message: String| {
            let prefix = match site {
                FaultSite::Class => format!("(class: {class}) "),
                FaultSite::Field(name) => format!("(class: {class}, field: {name}) "),
                FaultSite::Method { name, signature } => {
                    format!("(class: {class}, method: {name} signature: {signature}) ")
                }
            };
            truncate(format!("{prefix}{message}"), limit)
        };
        match self {
            VerifyFault::VerifyError(message) => VerifyOutcome::VerifyError(decorate(message)),
            VerifyFault::ClassFormatError(message) => {
                VerifyOutcome::ClassFormatError(decorate(message))
            }
            VerifyFault::OutOfMemory => VerifyOutcome::OutOfMemory,
        }
    }
}

fn truncate(mut message: String, limit: usize) -> String {
    if message.len() > limit {
        let mut end = limit;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

/// Final verdict for one class.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum VerifyOutcome {
    Ok,
    VerifyError(String),
    OutOfMemory,
    ClassFormatError(String),
}

impl VerifyOutcome {
    /// Numeric status: 1 ok, 0 verify error, 2 out of memory, 3 class format error.
    pub(crate) fn code(&self) -> u8 {
        match self {
            VerifyOutcome::Ok => 1,
            VerifyOutcome::VerifyError(_) => 0,
            VerifyOutcome::OutOfMemory => 2,
            VerifyOutcome::ClassFormatError(_) => 3,
        }
    }

    pub(crate) fn is_ok(&self) -> bool {
        matches!(self, VerifyOutcome::Ok)
    }

    pub(crate) fn message(&self) -> Option<&str> {
        match self {
            VerifyOutcome::VerifyError(message) | VerifyOutcome::ClassFormatError(message) => {
                Some(message)
            }
            VerifyOutcome::Ok | VerifyOutcome::OutOfMemory => None,
        }
    }

    /// SARIF rule id for a failed verdict.
    pub(crate) fn rule_id(&self) -> Option<&'static str> {
        match self {
            VerifyOutcome::Ok => None,
            VerifyOutcome::VerifyError(_) => Some("VERIFY_ERROR"),
            VerifyOutcome::OutOfMemory => Some("OUT_OF_MEMORY"),
            VerifyOutcome::ClassFormatError(_) => Some("CLASS_FORMAT_ERROR"),
        }
    }
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyOutcome::Ok => f.write_str("ok"),
            VerifyOutcome::VerifyError(message) => write!(f, "VerifyError: {message}"),
            VerifyOutcome::OutOfMemory => f.write_str("OutOfMemoryError"),
            VerifyOutcome::ClassFormatError(message) => write!(f, "ClassFormatError: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail() -> VerifyResult<()> {
        verify_error!("Register {} contains wrong type", 2);
    }

    #[test]
    fn method_context_prefixes_message() {
        let fault = fail().expect_err("fault");
        let outcome = fault.into_outcome(
            "Foo",
            FaultSite::Method {
                name: "bar",
                signature: "()V",
            },
            1024,
        );
        assert_eq!(
            outcome,
            VerifyOutcome::VerifyError(
                "(class: Foo, method: bar signature: ()V) Register 2 contains wrong type".to_string()
            )
        );
        assert_eq!(outcome.code(), 0);
    }

    #[test]
    fn field_and_class_prefixes() {
        let fault = VerifyFault::VerifyError("Inconsistent access bits.".to_string());
        let outcome = fault.clone().into_outcome("Foo", FaultSite::Field("x"), 1024);
        assert_eq!(
            outcome.message(),
            Some("(class: Foo, field: x) Inconsistent access bits.")
        );
        let outcome = fault.into_outcome("Foo", FaultSite::Class, 1024);
        assert_eq!(outcome.message(), Some("(class: Foo) Inconsistent access bits."));
    }

    #[test]
    fn message_is_truncated_to_limit() {
        let fault = VerifyFault::ClassFormatError("Illegal exception table range".to_string());
        let outcome = fault.into_outcome("Foo", FaultSite::Class, 12);
        assert_eq!(outcome.message(), Some("(class: Foo)"));
        assert_eq!(outcome.code(), 3);
    }

    #[test]
    fn tables_report_out_of_memory() {
        assert_eq!(try_table(0u8, 3), Ok(vec![0, 0, 0]));
        assert_eq!(try_table(0u64, usize::MAX), Err(VerifyFault::OutOfMemory));
    }

    #[test]
    fn out_of_memory_has_no_message() {
        let outcome = VerifyFault::OutOfMemory.into_outcome("Foo", FaultSite::Class, 10);
        assert_eq!(outcome, VerifyOutcome::OutOfMemory);
        assert_eq!(outcome.code(), 2);
        assert_eq!(outcome.rule_id(), Some("OUT_OF_MEMORY"));
    }
}
