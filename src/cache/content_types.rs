//! Content types known to the cache, keyed by alias.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::domain::types::ContentType;

#[derive(Default)]
pub struct ContentTypeCache {
    by_alias: DashMap<String, ContentType>,
}

impl ContentTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the whole set of known types. Aliases present before and after
    /// resolve throughout; new entries land before stale ones are dropped.
    pub fn replace_all(&self, types: Vec<ContentType>) {
        let known: HashSet<String> = types
            .iter()
            .map(|content_type| content_type.alias.clone())
            .collect();
        for content_type in types {
            self.by_alias.insert(content_type.alias.clone(), content_type);
        }
        self.by_alias.retain(|alias, _| known.contains(alias));
    }

    pub fn resolve(&self, alias: &str) -> Option<ContentType> {
        self.by_alias.get(alias).map(|entry| entry.value().clone())
    }
}
