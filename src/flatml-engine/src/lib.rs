// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The flatml engine: an in-memory model of hierarchical cell models plus
//! the passes that flatten an import closure into a single document and
//! compact a flattened model down to its externally visible surface.

pub mod ast;
pub mod classify;
pub mod common;
pub mod compact;
pub mod datamodel;
pub mod flatten;
pub mod loader;
pub mod relevance;
pub mod report;
pub mod units;

#[cfg(test)]
pub(crate) mod testutils;

pub use crate::common::{Error, ErrorCode, ErrorKind, Result};
pub use crate::compact::compact;
pub use crate::flatten::flatten;
pub use crate::loader::{instantiate_imports, ModelLoader};
pub use crate::relevance::{ConnectedRelevance, Relevance};
pub use crate::report::Report;
pub use crate::units::{Canonicalizer, StandardReducer, UnitsReducer};
