//! Definition table: a persistent, shadowable map from rule names to patterns.
//!
//! Pushing returns a new table whose head is the new entry; the old table is
//! untouched and remains valid. Lookup scans newest-first, so a later
//! definition of a name shadows an earlier one.

use std::sync::Arc;

use crate::pattern::ast::PatId;

#[derive(Debug)]
struct DefNode {
    name: String,
    pat: PatId,
    next: Option<Arc<DefNode>>,
}

/// An immutable snapshot of the visible definitions. Cloning is O(1).
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    head: Option<Arc<DefNode>>,
    len: usize,
}

impl Definitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with `name` bound to `pat` in front of everything in `self`.
    pub fn push(&self, name: impl Into<String>, pat: PatId) -> Definitions {
        Definitions {
            head: Some(Arc::new(DefNode {
                name: name.into(),
                pat,
                next: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Push each definition in order, so later ones shadow earlier ones.
    pub fn extend<I, S>(&self, defs: I) -> Definitions
    where
        I: IntoIterator<Item = (S, PatId)>,
        S: Into<String>,
    {
        defs.into_iter()
            .fold(self.clone(), |table, (name, pat)| table.push(name, pat))
    }

    /// The newest binding for `name`.
    pub fn lookup(&self, name: &str) -> Option<PatId> {
        self.iter().find(|(n, _)| *n == name).map(|(_, pat)| pat)
    }

    /// Snapshot the current head so it can be restored with [`pop_to`].
    ///
    /// [`pop_to`]: Definitions::pop_to
    pub fn mark(&self) -> Definitions {
        self.clone()
    }

    /// Drop every definition pushed since `mark` was taken. If `mark` is not
    /// an earlier state of this table, `self` is returned unchanged.
    pub fn pop_to(&self, mark: &Definitions) -> Definitions {
        let mut node = self.head.as_ref();
        loop {
            let same = match (node, mark.head.as_ref()) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if same {
                return mark.clone();
            }
            match node {
                Some(n) => node = n.next.as_ref(),
                None => return self.clone(),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Visible bindings, newest first (shadowed duplicates included).
    pub fn iter(&self) -> impl Iterator<Item = (&str, PatId)> {
        std::iter::successors(self.head.as_deref(), |node| node.next.as_deref())
            .map(|node| (node.name.as_str(), node.pat))
    }
}

impl Drop for Definitions {
    fn drop(&mut self) {
        // Unlink uniquely-owned nodes iteratively so long tables don't recurse.
        let mut next = self.head.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}
