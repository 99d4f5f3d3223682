//
// Process environment as a key/value map with unique keys.
//
use std::collections::btree_map::{BTreeMap, Iter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment::default()
    }

    /// Parse a list of `KEY=VALUE` strings. Entries without a `=` are
    /// skipped; the first `=` splits key and value.
    pub fn from_list<I, S>(list: I) -> Environment
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut env = Environment::new();
        for item in list {
            let item = item.as_ref();
            if let Some(pos) = item.find('=') {
                env.insert(&item[..pos], &item[pos + 1..]);
            }
        }
        env
    }

    pub fn to_list(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    /// Insert or overwrite.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> Iter<String, String> {
        self.vars.iter()
    }

    /// Layer `other` on top of this environment. Keys listed in
    /// `protected` that are already present are left alone.
    pub fn merge(&mut self, other: &Environment, protected: &[&str]) {
        for (k, v) in other.iter() {
            if protected.contains(&k.as_str()) && self.contains_key(k) {
                debug!("Environment::merge: not overriding {}", k);
                continue;
            }
            self.vars.insert(k.clone(), v.clone());
        }
    }
}

impl<'a> IntoIterator for &'a Environment {
    type Item = (&'a String, &'a String);
    type IntoIter = Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}
