use std::sync::Arc;

use models::{AgeBuckets, Date, DateRange, Event, Record, RecordLine};

use crate::avl::DateTree;
use crate::blockmap::BlockMap;
use crate::topk::{top_k, CaseCount};

/// Why a record line was not ingested.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InsertError {
    #[error("duplicate ENTER for record '{0}'")]
    DuplicateRecord(String),
    #[error("EXIT for unknown record '{0}'")]
    UnmatchedExit(String),
    #[error("exit {exit} precedes entry {entry} for record '{id}'")]
    InvalidInterval { id: String, entry: Date, exit: Date },
}

/// Why a query produced no result on this shard. Surfaced to the caller as
/// an empty reply, never as a protocol-level INVALID.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("no such country '{0}'")]
    UnknownCountry(String),
    #[error("no such record '{0}'")]
    UnknownRecord(String),
}

/// One worker's private universe: the record arena plus the id, country and
/// disease indexes over it. Countries and diseases key date-ordered trees of
/// arena positions; the name strings are interned once per shard and shared
/// into every record.
pub struct Shard {
    records: Vec<Record>,
    by_id: BlockMap<usize>,
    countries: BlockMap<DateTree<usize>>,
    diseases: BlockMap<DateTree<usize>>,
}

impl Default for Shard {
    fn default() -> Self {
        Self::new()
    }
}

impl Shard {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            by_id: BlockMap::default(),
            countries: BlockMap::default(),
            diseases: BlockMap::default(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Apply one parsed record line read from `country`'s file of
    /// `file_date`. ENTER admits a new patient into both trees; EXIT only
    /// attaches the discharge date to the existing record.
    pub fn insert(
        &mut self,
        country: &str,
        file_date: Date,
        line: RecordLine,
    ) -> Result<(), InsertError> {
        match line.event {
            Event::Exit => {
                let Some(&ix) = self.by_id.get(&line.id) else {
                    return Err(InsertError::UnmatchedExit(line.id));
                };
                let record = &mut self.records[ix];
                if file_date < record.entry {
                    return Err(InsertError::InvalidInterval {
                        id: line.id,
                        entry: record.entry,
                        exit: file_date,
                    });
                }
                record.exit = Some(file_date);
                Ok(())
            }
            Event::Enter => {
                if self.by_id.get(&line.id).is_some() {
                    return Err(InsertError::DuplicateRecord(line.id));
                }
                let ix = self.records.len();

                let (country, tree) = self.countries.entry_or_insert_with(country, DateTree::new);
                tree.insert(file_date, ix);
                let (disease, tree) = self
                    .diseases
                    .entry_or_insert_with(&line.disease, DateTree::new);
                tree.insert(file_date, ix);
                self.by_id.entry_or_insert_with(&line.id, || ix);

                self.records.push(Record {
                    id: line.id,
                    first_name: line.first_name,
                    last_name: line.last_name,
                    disease,
                    country,
                    age: line.age,
                    entry: file_date,
                    exit: None,
                });
                Ok(())
            }
        }
    }

    /// Owned country names, in index order.
    pub fn countries(&self) -> impl Iterator<Item = &Arc<str>> {
        self.countries.iter().map(|(name, _)| name)
    }

    /// The record, if this shard owns it.
    pub fn search(&self, record_id: &str) -> Option<&Record> {
        self.by_id.get(record_id).map(|&ix| &self.records[ix])
    }

    /// The statistics block streamed to the broker after ingesting one
    /// file: the file date and country, then per known disease its
    /// admission counts on that day bucketed by age range.
    pub fn file_statistics(&self, country: &str, date: Date) -> Result<Vec<String>, DomainError> {
        let tree = self
            .countries
            .get(country)
            .ok_or_else(|| DomainError::UnknownCountry(country.to_string()))?;

        let mut per_disease: Vec<(&Arc<str>, AgeBuckets)> = self
            .diseases
            .iter()
            .map(|(name, _)| (name, AgeBuckets::default()))
            .collect();
        for (_, &ix) in tree.range(date, date) {
            let record = &self.records[ix];
            for (name, buckets) in &mut per_disease {
                if *name == &record.disease {
                    buckets.add(record.age);
                }
            }
        }

        let mut lines = vec![date.to_string(), country.to_string()];
        for (name, buckets) in per_disease {
            lines.push(name.to_string());
            for (label, count) in AgeBuckets::LABELS.iter().zip(buckets.counts()) {
                lines.push(format!("Age range {label} years: {count} cases"));
            }
            lines.push(String::new());
        }
        Ok(lines)
    }

    fn admission_buckets(
        &self,
        tree: &DateTree<usize>,
        disease: &str,
        range: DateRange,
    ) -> AgeBuckets {
        let mut buckets = AgeBuckets::default();
        for (_, &ix) in tree.range(range.first(), range.last()) {
            let record = &self.records[ix];
            if &*record.disease == disease {
                buckets.add(record.age);
            }
        }
        buckets
    }

    /// Exit dates are not what the tree is ordered by, so discharges scan
    /// the whole country tree.
    fn discharge_buckets(
        &self,
        tree: &DateTree<usize>,
        disease: &str,
        range: DateRange,
    ) -> AgeBuckets {
        let mut buckets = AgeBuckets::default();
        for (_, &ix) in tree.iter() {
            let record = &self.records[ix];
            let Some(exit) = record.exit else { continue };
            if range.contains(exit) && &*record.disease == disease {
                buckets.add(record.age);
            }
        }
        buckets
    }

    /// Top-k of the four age buckets among `country`'s admissions of
    /// `disease` within `range`, as percentages of their total. Ties go to
    /// the lower bucket; k is clamped to the bucket count; a zero total
    /// yields no lines.
    pub fn topk_age_ranges(
        &self,
        k: usize,
        country: &str,
        disease: &str,
        range: DateRange,
    ) -> Result<Vec<String>, DomainError> {
        let tree = self
            .countries
            .get(country)
            .ok_or_else(|| DomainError::UnknownCountry(country.to_string()))?;

        let buckets = self.admission_buckets(tree, disease, range);
        let total = buckets.total();
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut counts: [Option<u64>; 4] = buckets.counts().map(Some);
        let mut lines = Vec::new();
        for _ in 0..k.min(counts.len()) {
            let (slot, count) = counts
                .iter()
                .enumerate()
                .filter_map(|(slot, count)| count.map(|c| (slot, c)))
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                .expect("at most four ranked buckets");
            counts[slot] = None;
            lines.push(format!(
                "{}: {:.2}%",
                AgeBuckets::LABELS[slot],
                100.0 * count as f64 / total as f64
            ));
        }
        Ok(lines)
    }

    /// `<country> <count>` admission totals for `disease` within `range`,
    /// either for one country or for every owned one.
    pub fn admissions(
        &self,
        disease: &str,
        range: DateRange,
        country: Option<&str>,
    ) -> Result<Vec<String>, DomainError> {
        self.patient_totals(disease, range, country, Self::admission_buckets)
    }

    /// Same shape as [`Shard::admissions`], counting discharge dates.
    pub fn discharges(
        &self,
        disease: &str,
        range: DateRange,
        country: Option<&str>,
    ) -> Result<Vec<String>, DomainError> {
        self.patient_totals(disease, range, country, Self::discharge_buckets)
    }

    fn patient_totals(
        &self,
        disease: &str,
        range: DateRange,
        country: Option<&str>,
        count: impl Fn(&Self, &DateTree<usize>, &str, DateRange) -> AgeBuckets,
    ) -> Result<Vec<String>, DomainError> {
        match country {
            Some(name) => {
                let tree = self
                    .countries
                    .get(name)
                    .ok_or_else(|| DomainError::UnknownCountry(name.to_string()))?;
                let total = count(self, tree, disease, range).total();
                Ok(vec![format!("{name} {total}")])
            }
            None => Ok(self
                .countries
                .iter()
                .map(|(name, tree)| {
                    let total = count(self, tree, disease, range).total();
                    format!("{name} {total}")
                })
                .collect()),
        }
    }

    /// `<disease> <count>` for the k most admitted diseases of one country,
    /// optionally restricted to an entry-date range.
    pub fn topk_diseases(
        &self,
        k: usize,
        country: &str,
        range: Option<DateRange>,
    ) -> Result<Vec<String>, DomainError> {
        let tree = self
            .countries
            .get(country)
            .ok_or_else(|| DomainError::UnknownCountry(country.to_string()))?;
        Ok(self.ranked_cases(tree, range, k, |record| &record.disease))
    }

    /// `<country> <count>` for the k countries with the most admissions of
    /// one disease, optionally restricted to an entry-date range.
    pub fn topk_countries(
        &self,
        k: usize,
        disease: &str,
        range: Option<DateRange>,
    ) -> Result<Vec<String>, DomainError> {
        // An unknown disease is an empty ranking, not an error: the other
        // shards may well know it.
        let Some(tree) = self.diseases.get(disease) else {
            return Ok(Vec::new());
        };
        Ok(self.ranked_cases(tree, range, k, |record| &record.country))
    }

    fn ranked_cases(
        &self,
        tree: &DateTree<usize>,
        range: Option<DateRange>,
        k: usize,
        name_of: impl Fn(&Record) -> &Arc<str>,
    ) -> Vec<String> {
        let mut cases: BlockMap<u64> = BlockMap::default();
        let scan = match range {
            Some(range) => tree.range(range.first(), range.last()),
            None => tree.iter(),
        };
        for (_, &ix) in scan {
            let (_, count) = cases.entry_or_insert_with(name_of(&self.records[ix]), || 0);
            *count += 1;
        }

        let ranked = top_k(
            cases.iter().map(|(name, &count)| CaseCount {
                name: name.clone(),
                count,
            }),
            k,
        );
        ranked
            .into_iter()
            .map(|c| format!("{} {}", c.name, c.count))
            .collect()
    }
}
