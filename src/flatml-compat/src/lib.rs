// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::io::BufRead;

use flatml_engine::datamodel::Model;
pub use flatml_engine::{self as engine, Result};

pub mod cellml;
pub mod loader;

pub use loader::FsLoader;

pub fn open_cellml(reader: &mut dyn BufRead) -> Result<Model> {
    cellml::model_from_reader(reader)
}

pub fn to_cellml(model: &Model) -> Result<String> {
    cellml::model_to_cellml(model)
}
