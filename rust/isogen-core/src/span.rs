use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a source file registered with a [`crate::decl::Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub u32);

/// Source location of a declaration or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub file: FileId,
    /// Byte offset of the start in the source
    pub start: usize,
    /// Byte offset of the end (exclusive) in the source
    pub end: usize,
    /// 1-based line number
    pub line: usize,
    /// 1-based column number
    pub col: usize,
}

impl Span {
    pub fn new(file: FileId, start: usize, end: usize, line: usize, col: usize) -> Self {
        Self { file, start, end, line, col }
    }

    pub fn dummy() -> Self {
        Self { file: FileId(0), start: 0, end: 0, line: 0, col: 0 }
    }

    pub fn is_dummy(&self) -> bool {
        self.line == 0
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A registered source file. Only the path is kept; the lowering pass never
/// reads source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn is_ascii(&self) -> bool {
        self.path.is_ascii()
    }
}
