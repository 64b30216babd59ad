use crate::{Collection, Entity, Record};

/// Precondition a mutation places on the currently stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// No record may exist under the key.
    Absent,
    /// The stored record must be at exactly this version.
    Version(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub record: Record,
    pub expect: Expect,
}

/// A set of conditional puts committed all-or-nothing.
///
/// If any expectation fails, none of the mutations are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record that must not exist yet.
    pub fn create<T: Entity>(&mut self, value: T) -> &mut Self {
        self.mutations.push(Mutation {
            record: value.into_record(),
            expect: Expect::Absent,
        });
        self
    }

    /// Replace a record read at `read_version`.
    pub fn update<T: Entity>(&mut self, value: T, read_version: u64) -> &mut Self {
        self.mutations.push(Mutation {
            record: value.into_record(),
            expect: Expect::Version(read_version),
        });
        self
    }

    /// Create when `read_version` is `None`, compare-and-swap otherwise.
    pub fn put<T: Entity>(&mut self, value: T, read_version: Option<u64>) -> &mut Self {
        match read_version {
            Some(v) => self.update(value, v),
            None => self.create(value),
        }
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// First key that appears more than once, if any. Stores reject such batches.
    pub fn duplicate_key(&self) -> Option<(Collection, String)> {
        let mut seen = std::collections::HashSet::new();
        self.mutations
            .iter()
            .map(|m| (m.record.collection(), m.record.key()))
            .find(|k| !seen.insert(k.clone()))
    }
}

/// Change-feed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A record was written and is now at `version`.
    Record {
        collection: Collection,
        id: String,
        version: u64,
    },
    /// The feed lost continuity (lag, reconnect); every observer must re-read.
    Resync,
}

impl Change {
    pub fn touches(&self, collection: Collection) -> bool {
        match self {
            Self::Record { collection: c, .. } => *c == collection,
            Self::Resync => true,
        }
    }
}
