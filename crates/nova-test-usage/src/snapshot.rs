use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

use crate::ids::{ClassId, MethodId, MethodKey};

/// The classes and methods one test touched, keyed by interned ids.
///
/// Classes never map to an empty method set: inserting or collecting an empty
/// set leaves the class out, so `is_empty` means "no `(class, method)` pair".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    classes: BTreeMap<ClassId, BTreeSet<MethodId>>,
}

impl UsageSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Number of `(class, method)` pairs.
    pub fn pair_count(&self) -> usize {
        self.classes.values().map(BTreeSet::len).sum()
    }

    pub fn insert(&mut self, class: ClassId, method: MethodId) -> bool {
        self.classes.entry(class).or_default().insert(method)
    }

    /// Adds every method in `methods` under `class`.
    pub fn extend_class(&mut self, class: ClassId, methods: impl IntoIterator<Item = MethodId>) {
        let mut methods = methods.into_iter().peekable();
        if methods.peek().is_none() {
            return;
        }
        self.classes.entry(class).or_default().extend(methods);
    }

    pub fn methods(&self, class: ClassId) -> Option<&BTreeSet<MethodId>> {
        self.classes.get(&class)
    }

    pub fn contains(&self, class: ClassId, method: MethodId) -> bool {
        self.classes
            .get(&class)
            .is_some_and(|methods| methods.contains(&method))
    }

    pub fn classes(&self) -> btree_map::Iter<'_, ClassId, BTreeSet<MethodId>> {
        self.classes.iter()
    }

    /// Every `(class, method)` pair as a composite key, ascending.
    pub fn method_keys(&self) -> impl Iterator<Item = MethodKey> + '_ {
        self.classes.iter().flat_map(|(&class, methods)| {
            methods
                .iter()
                .map(move |&method| MethodKey::new(class, method))
        })
    }

    pub fn into_inner(self) -> BTreeMap<ClassId, BTreeSet<MethodId>> {
        self.classes
    }
}

impl From<BTreeMap<ClassId, BTreeSet<MethodId>>> for UsageSnapshot {
    fn from(mut classes: BTreeMap<ClassId, BTreeSet<MethodId>>) -> Self {
        classes.retain(|_, methods| !methods.is_empty());
        Self { classes }
    }
}

impl FromIterator<(ClassId, MethodId)> for UsageSnapshot {
    fn from_iter<I: IntoIterator<Item = (ClassId, MethodId)>>(iter: I) -> Self {
        let mut snapshot = UsageSnapshot::new();
        for (class, method) in iter {
            snapshot.insert(class, method);
        }
        snapshot
    }
}

impl<'a> IntoIterator for &'a UsageSnapshot {
    type Item = (&'a ClassId, &'a BTreeSet<MethodId>);
    type IntoIter = btree_map::Iter<'a, ClassId, BTreeSet<MethodId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.classes.iter()
    }
}
