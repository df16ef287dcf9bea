use super::{read_json, write_json_atomic};
use crate::constants::{raw_output_file, FIRMOGRAPHICS_FILE};
use crate::error::Result;
use crate::types::{FieldMap, FirmographicRecord, RawSourceRecord, SourceTag};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

type RawByEntity = BTreeMap<String, FieldMap>;

/// The per-run output tree: one raw file per active source plus the merged
/// firmographics, rewritten as a whole after every company.
#[derive(Debug)]
pub struct OutputStore {
    dir: PathBuf,
    raw: BTreeMap<SourceTag, RawByEntity>,
    records: Vec<FirmographicRecord>,
    order: HashMap<String, usize>,
}

impl OutputStore {
    /// With `resume`, existing files are loaded and extended; otherwise the
    /// run starts from empty outputs.
    pub fn open(dir: impl AsRef<Path>, sources: &[SourceTag], resume: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut raw = BTreeMap::new();
        for source in sources.iter().filter(|s| **s != SourceTag::Input) {
            let existing: RawByEntity = if resume {
                read_json(&dir.join(raw_output_file(source.file_stem())))?.unwrap_or_default()
            } else {
                RawByEntity::new()
            };
            raw.insert(*source, existing);
        }
        let records: Vec<FirmographicRecord> = if resume {
            read_json(&dir.join(FIRMOGRAPHICS_FILE))?.unwrap_or_default()
        } else {
            Vec::new()
        };
        debug!(dir = %dir.display(), loaded = records.len(), "opened output store");
        Ok(Self {
            dir,
            raw,
            records,
            order: HashMap::new(),
        })
    }

    pub fn firmographics_path(dir: &Path) -> PathBuf {
        dir.join(FIRMOGRAPHICS_FILE)
    }

    /// Records are kept in this key order; unknown keys go last.
    pub fn set_input_order<I: IntoIterator<Item = String>>(&mut self, keys: I) {
        self.order = keys.into_iter().enumerate().map(|(i, k)| (k, i)).collect();
        self.sort();
    }

    pub fn record_raw(&mut self, record: &RawSourceRecord) {
        if let Some(by_entity) = self.raw.get_mut(&record.source_tag) {
            by_entity.insert(record.entity_name.clone(), record.payload.clone());
        }
    }

    /// Insert or replace the record for its company key.
    pub fn upsert(&mut self, record: FirmographicRecord) {
        match self
            .records
            .iter_mut()
            .find(|r| r.company_key == record.company_key)
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
        self.sort();
    }

    pub fn remove(&mut self, company_key: &str) {
        self.records.retain(|r| r.company_key != company_key);
    }

    pub fn records(&self) -> &[FirmographicRecord] {
        &self.records
    }

    pub fn raw_for(&self, source: SourceTag) -> Option<&RawByEntity> {
        self.raw.get(&source)
    }

    pub fn persist(&self) -> Result<()> {
        for (source, by_entity) in &self.raw {
            write_json_atomic(&self.dir.join(raw_output_file(source.file_stem())), by_entity)?;
        }
        write_json_atomic(&Self::firmographics_path(&self.dir), &self.records)
    }

    fn sort(&mut self) {
        let order = &self.order;
        self.records
            .sort_by_key(|r| order.get(&r.company_key).copied().unwrap_or(usize::MAX));
    }
}
