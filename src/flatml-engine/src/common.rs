// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{error, fmt, result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError, // will never be produced
    DoesNotExist, // the named entity doesn't exist
    XmlDeserialization,
    BadModelName,
    DuplicateModelName,
    RelevanceError,
    MissingImportTarget,
    ImportCycle,
    MissingUnits,
    ConstantMissingUnits,
    UnresolvableInitialValue,
    CircularDependency,
    Generic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            DoesNotExist => "does_not_exist",
            XmlDeserialization => "xml_deserialization",
            BadModelName => "bad_model_name",
            DuplicateModelName => "duplicate_model_name",
            RelevanceError => "relevance_error",
            MissingImportTarget => "missing_import_target",
            ImportCycle => "import_cycle",
            MissingUnits => "missing_units",
            ConstantMissingUnits => "constant_missing_units",
            UnresolvableInitialValue => "unresolvable_initial_value",
            CircularDependency => "circular_dependency",
            Generic => "generic",
        };

        write!(f, "{name}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Import,
    Model,
    Variable,
    Units,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Import => "ImportError",
            ErrorKind::Model => "ModelError",
            ErrorKind::Variable => "VariableError",
            ErrorKind::Units => "UnitsError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

#[macro_export]
macro_rules! model_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Model,
            ErrorCode::$code,
            Some($str),
        ))
    }}
);

#[macro_export]
macro_rules! import_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Import,
            ErrorCode::$code,
            Some($str),
        ))
    }}
);

#[macro_export]
macro_rules! var_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Variable,
            ErrorCode::$code,
            Some($str),
        ))
    }}
);

#[macro_export]
macro_rules! units_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(
            ErrorKind::Units,
            ErrorCode::$code,
            Some($str),
        ))
    }}
);

/// De-duplicate `candidate` against `used`: if taken, append `_n` for the
/// smallest positive `n` producing an unused name.  The winning name is
/// inserted into `used` before returning.
pub fn unique_name(used: &mut BTreeSet<String>, candidate: &str) -> String {
    let mut name = candidate.to_owned();
    let mut n = 0u32;
    while used.contains(&name) {
        n += 1;
        name = format!("{candidate}_{n}");
    }
    used.insert(name.clone());
    name
}

static NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Manufacture a fallback name from a process-wide counter.  The counter is
/// never reset, so any name this produces is unique for the lifetime of the
/// process even across independent passes.
pub fn fallback_name(base: &str) -> String {
    let n = NAME_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{base}_{n:05x}")
}

#[test]
fn test_unique_name_suffixing() {
    let mut used = BTreeSet::new();
    assert_eq!("foo", unique_name(&mut used, "foo"));
    assert_eq!("foo_1", unique_name(&mut used, "foo"));
    assert_eq!("foo_2", unique_name(&mut used, "foo"));
    assert_eq!("bar", unique_name(&mut used, "bar"));
    assert!(used.contains("foo_2"));
}

#[test]
fn test_fallback_name_monotonic() {
    let a = fallback_name("u");
    let b = fallback_name("u");
    assert_ne!(a, b);
    assert!(a.starts_with("u_"));
    assert!(b.starts_with("u_"));
}

#[test]
fn test_error_display() {
    let err = Error::new(
        ErrorKind::Units,
        ErrorCode::MissingUnits,
        Some("fathoms".to_owned()),
    );
    assert_eq!("UnitsError{missing_units: fathoms}", format!("{err}"));

    let err = Error::new(ErrorKind::Import, ErrorCode::ImportCycle, None);
    assert_eq!("ImportError{import_cycle}", format!("{err}"));
}
