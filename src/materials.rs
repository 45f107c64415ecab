//! Imported lecture materials, consumed as opaque context text.
//!
//! Document-format extraction (slides, PDF, Word) happens outside this
//! crate; here a material is just a name plus its extracted text.

use anyhow::{Context, Result};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct MaterialDoc {
    pub name: String,
    pub text: String,
}

/// The set of materials attached to one session, merged into a single
/// context string for analyzer prompts.
#[derive(Debug, Clone, Default)]
pub struct MaterialSet {
    docs: Vec<MaterialDoc>,
}

impl MaterialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load plain-text materials from disk.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut set = Self::new();
        for p in paths {
            let path = p.as_ref();
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read material: {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            set.push(MaterialDoc { name, text });
        }
        Ok(set)
    }

    pub fn push(&mut self, doc: MaterialDoc) {
        self.docs.push(doc);
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Names of the attached documents, recorded on the session.
    pub fn refs(&self) -> Vec<String> {
        self.docs.iter().map(|d| d.name.clone()).collect()
    }

    /// Merged context string, truncated to `cap` characters so prompts stay
    /// within model limits.
    pub fn context(&self, cap: usize) -> String {
        let mut out = String::new();
        for doc in &self.docs {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&format!("=== Material: {} ===\n", doc.name));
            out.push_str(&doc.text);
        }
        if out.chars().count() > cap {
            out = out.chars().take(cap).collect();
        }
        out
    }
}
