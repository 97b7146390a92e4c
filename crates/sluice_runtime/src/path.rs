//! Result paths.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Field(s)
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Field(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{}", name),
            Self::Index(i) => write!(f, "{}", i),
        }
    }
}

/// The position of a value inside a result, from the root.
///
/// Paths are cheap to extend: every `segment`/`index` call returns a new
/// path and leaves the receiver untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultPath {
    segments: Vec<PathSegment>,
}

impl ResultPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns a new path with a field segment appended.
    pub fn segment(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Field(name.into()));
        Self { segments }
    }

    /// Returns a new path with a list index appended.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of field segments, ignoring list indices.
    pub fn field_depth(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, PathSegment::Field(_)))
            .count()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }
}

impl From<Vec<PathSegment>> for ResultPath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }
}

impl fmt::Display for ResultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_does_not_mutate_parent() {
        let root = ResultPath::root();
        let user = root.segment("user");
        let friend = user.segment("friends").index(2);

        assert!(root.is_root());
        assert_eq!(user.len(), 1);
        assert_eq!(friend.len(), 3);
        assert_eq!(friend.field_depth(), 2);
        assert_eq!(friend.to_string(), "user/friends/2");
    }

    #[test]
    fn test_path_serializes_as_array() {
        let path = ResultPath::root().segment("posts").index(0).segment("title");
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, serde_json::json!(["posts", 0, "title"]));
    }
}
