use crate::snapshot::UsageSnapshot;

/// What changed between two snapshots of the same test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageDiff {
    pub added_or_changed: UsageSnapshot,
    pub removed: UsageSnapshot,
}

impl UsageDiff {
    pub fn is_empty(&self) -> bool {
        self.added_or_changed.is_empty() && self.removed.is_empty()
    }
}

/// Computes the `(class, method)` pairs to add and to retract when a test's
/// recorded usage moves from `previous` to `current`.
///
/// Without a non-empty `previous` there is nothing to diff against: everything in
/// `current` is added and nothing is removed.
pub fn diff(current: Option<&UsageSnapshot>, previous: Option<&UsageSnapshot>) -> UsageDiff {
    let previous = match previous {
        Some(previous) if !previous.is_empty() => previous,
        _ => {
            return UsageDiff {
                added_or_changed: current.cloned().unwrap_or_default(),
                removed: UsageSnapshot::new(),
            };
        }
    };
    let empty = UsageSnapshot::new();
    let current = current.unwrap_or(&empty);

    let mut out = UsageDiff::default();
    for (&class, methods) in current {
        match previous.methods(class) {
            None => out.added_or_changed.extend_class(class, methods.iter().copied()),
            Some(before) => {
                out.added_or_changed
                    .extend_class(class, methods.difference(before).copied());
                out.removed
                    .extend_class(class, before.difference(methods).copied());
            }
        }
    }
    for (&class, methods) in previous {
        if current.methods(class).is_none() {
            out.removed.extend_class(class, methods.iter().copied());
        }
    }
    out
}
