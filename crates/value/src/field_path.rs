use std::{
    fmt,
    fmt::Display,
    str::FromStr,
};

/// An ordered list of property names identifying a nested field, e.g.
/// `["metadata", "createdAt"]`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn new(segments: Vec<String>) -> anyhow::Result<Self> {
        anyhow::ensure!(!segments.is_empty(), "field path must have at least one segment");
        anyhow::ensure!(
            segments.iter().all(|s| !s.is_empty()),
            "field path segments must not be empty"
        );
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn last(&self) -> &str {
        self.segments.last().expect("FieldPath is never empty")
    }

    /// Walk a `serde_json::Value` along this path, returning `None` if any
    /// segment is missing (the spec's "undefined") rather than erroring.
    pub fn get<'a>(&self, root: &'a serde_json::Value) -> Option<&'a serde_json::Value> {
        let mut cur = root;
        for segment in &self.segments {
            cur = cur.as_object()?.get(segment)?;
        }
        Some(cur)
    }
}

impl FromStr for FieldPath {
    type Err = anyhow::Error;

    fn from_str(path: &str) -> anyhow::Result<Self> {
        let trimmed = path.trim_matches('.');
        anyhow::ensure!(!trimmed.is_empty(), "empty field path: {path:?}");
        Self::new(trimmed.split('.').map(str::to_string).collect())
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        s.parse().expect("invalid field path literal")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_dotted_path() {
        let path: FieldPath = "metadata.createdAt".parse().unwrap();
        assert_eq!(path.segments(), &["metadata", "createdAt"]);
        assert_eq!(path.last(), "createdAt");
    }

    #[test]
    fn get_walks_nested_objects() {
        let path: FieldPath = "a.b".into();
        let doc = json!({"a": {"b": 7}});
        assert_eq!(path.get(&doc), Some(&json!(7)));
        let missing = json!({"a": {}});
        assert_eq!(path.get(&missing), None);
    }
}
