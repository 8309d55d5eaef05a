use crate::DefinitionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Run-level arguments supplied by the operator (`key=value` pairs).
///
/// Precedence when resolving a placeholder: run-level first, then the
/// task's declared `arguments`, otherwise unresolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(BTreeMap<String, String>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` strings. The value may itself contain `=`.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    args.insert(key.trim(), value);
                }
                _ => return Err(DefinitionError::MalformedArgument(pair.to_string())),
            }
        }
        Ok(args)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn resolve<'a>(
        &'a self,
        name: &str,
        task_arguments: &'a BTreeMap<String, String>,
    ) -> Option<&'a str> {
        self.get(name)
            .or_else(|| task_arguments.get(name).map(String::as_str))
    }
}
