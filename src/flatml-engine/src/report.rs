// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! A structured pass log.  Entries carry the nesting level at which they
//! were recorded, so the rendered report shows the shape of the traversal.

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub level: u32,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Report {
    entries: Vec<Entry>,
    #[serde(skip)]
    level: u32,
    #[serde(skip)]
    marker: String,
}

impl Report {
    pub fn new() -> Report {
        Report {
            marker: "  ".to_owned(),
            ..Default::default()
        }
    }

    /// The string repeated once per nesting level when rendering.
    pub fn set_marker(&mut self, marker: &str) {
        self.marker = marker.to_owned();
    }

    pub fn set_level(&mut self, level: u32) {
        self.level = level;
    }

    pub fn indent(&mut self) {
        self.level += 1;
    }

    pub fn dedent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.entries.push(Entry {
            level: self.level,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            for _ in 0..entry.level {
                out.push_str(&self.marker);
            }
            out.push_str(&entry.message);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_indents_by_level() {
        let mut r = Report::new();
        r.log("top");
        r.indent();
        r.log("nested");
        r.indent();
        r.log("deeper");
        r.dedent();
        r.log("nested again");
        assert_eq!("top\n  nested\n    deeper\n  nested again\n", r.render());
    }

    #[test]
    fn test_custom_marker() {
        let mut r = Report::new();
        r.set_marker("> ");
        r.indent();
        r.log("msg");
        assert_eq!("> msg\n", r.render());
    }

    #[test]
    fn test_dedent_saturates() {
        let mut r = Report::new();
        r.dedent();
        r.log("still level zero");
        assert_eq!(0, r.entries()[0].level);
        assert!(!r.is_empty());
    }
}
