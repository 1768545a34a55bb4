use derive_more::{
    Display,
    From,
};

/// A collection record's primary key. The spec allows `K` to be a string or
/// a number; we realize that as a closed enum rather than a generic type
/// parameter so `Collection<T>` can use `Key` directly as a map key without
/// forcing every caller to pick a concrete scalar type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From)]
pub enum Key {
    String(String),
    #[display(fmt = "{}", _0)]
    Int(i64),
}

impl Key {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            Key::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            Key::String(_) => None,
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

/// Maps an application record to its stable key. An update may not change a
/// record's key (`spec.md` §3); implementations should be a pure projection.
pub trait GetKey<T>: Send + Sync {
    fn key(&self, value: &T) -> Key;
}

impl<T, F> GetKey<T> for F
where
    F: Fn(&T) -> Key + Send + Sync,
{
    fn key(&self, value: &T) -> Key {
        self(value)
    }
}
