use std::collections::HashSet;

use crate::{Coordinate, CoordinateRecord, Error, Label, Repository, Result};

/// Ordered, name-keyed collection of records backed by a [`Repository`].
///
/// Mutations only touch memory; call [`save`](Self::save) to persist. The
/// whole collection is the unit of persistence.
#[derive(Debug)]
pub struct CoordinateStore<R> {
    records: Vec<CoordinateRecord>,
    repository: R,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub positive: usize,
    pub negative: usize,
    pub processed: usize,
}

impl<R: Repository> CoordinateStore<R> {
    pub fn open(repository: R) -> Result<Self> {
        let mut store = Self {
            records: Vec::new(),
            repository,
        };
        store.load()?;
        Ok(store)
    }

    /// Replaces the in-memory records with the repository's. Nothing changes
    /// if loading or validation fails.
    pub fn load(&mut self) -> Result<()> {
        let records = self.repository.load()?;

        let mut names = HashSet::new();
        for (i, x) in records.iter().enumerate() {
            if !names.insert(x.name()) {
                return Err(Error::DuplicateName(x.name().to_string()));
            }
            if let Some(existing) = records[..i].iter().find(|y| stems_collide(y, x)) {
                return Err(Error::NameCollision {
                    name: x.name().to_string(),
                    existing: existing.name().to_string(),
                });
            }
        }

        self.records = records;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.repository.save(&self.records)
    }

    pub fn add(&mut self, record: CoordinateRecord) -> Result<&CoordinateRecord> {
        if self.get(record.name()).is_some() {
            return Err(Error::DuplicateName(record.name().to_string()));
        }
        if let Some(existing) = self.records.iter().find(|x| stems_collide(x, &record)) {
            return Err(Error::NameCollision {
                name: record.name().to_string(),
                existing: existing.name().to_string(),
            });
        }
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    pub fn get(&self, name: &str) -> Option<&CoordinateRecord> {
        self.records.iter().find(|x| x.name() == name)
    }

    pub fn list(&self, label: Option<Label>) -> impl Iterator<Item = &CoordinateRecord> {
        self.records
            .iter()
            .filter(move |x| label.map_or(true, |label| x.label() == label))
    }

    pub fn pending(&self) -> impl Iterator<Item = &CoordinateRecord> {
        self.records.iter().filter(|x| !x.processed())
    }

    pub fn mark_processed(&mut self, name: &str) -> Result<()> {
        match self.records.iter_mut().find(|x| x.name() == name) {
            Some(x) => {
                x.set_processed();
                Ok(())
            }
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    /// Closest record to `coordinate` and its distance in metres.
    pub fn nearest(&self, coordinate: &Coordinate) -> Option<(&CoordinateRecord, f64)> {
        self.records
            .iter()
            .map(|x| (x, x.coordinate().distance(coordinate)))
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
    }

    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for x in &self.records {
            match x.label() {
                Label::Positive => counts.positive += 1,
                Label::Negative => counts.negative += 1,
            }
            if x.processed() {
                counts.processed += 1;
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }
}

// Variant images are written as `<name>_<index>` next to the base image, so
// `SiteA_1` and variant 1 of `SiteA` would be the same file.
fn stems_collide(a: &CoordinateRecord, b: &CoordinateRecord) -> bool {
    fn variant_of(name: &str, base: &str) -> bool {
        name.strip_prefix(base)
            .and_then(|x| x.strip_prefix('_'))
            .map_or(false, |x| !x.is_empty() && x.bytes().all(|b| b.is_ascii_digit()))
    }

    a.label() == b.label()
        && (variant_of(a.name(), b.name()) || variant_of(b.name(), a.name()))
}
