// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! A filesystem-backed [ModelLoader]: import hrefs resolve relative to the
//! directory of the document that named them.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flatml_engine::common::{Error, ErrorCode, ErrorKind, Result};
use flatml_engine::datamodel::Model;
use flatml_engine::loader::ModelLoader;

use crate::cellml;

pub struct FsLoader {
    base: PathBuf,
}

impl FsLoader {
    pub fn new(base: impl Into<PathBuf>) -> FsLoader {
        FsLoader { base: base.into() }
    }

    /// A loader rooted at the directory containing `path`.
    pub fn for_file(path: &Path) -> FsLoader {
        let base = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        FsLoader { base }
    }
}

impl ModelLoader for FsLoader {
    fn load(&self, href: &str) -> Result<Model> {
        let path = self.base.join(href);
        let file = File::open(&path).map_err(|err| {
            Error::new(
                ErrorKind::Import,
                ErrorCode::DoesNotExist,
                Some(format!("{}: {err}", path.display())),
            )
        })?;
        let mut reader = BufReader::new(file);
        cellml::model_from_reader(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_does_not_exist() {
        let loader = FsLoader::new("/nonexistent-dir");
        let err = loader.load("missing.xml").unwrap_err();
        assert_eq!(ErrorCode::DoesNotExist, err.code);
    }
}
