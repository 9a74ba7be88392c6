// crates/decision-pipeline-cli/src/outputs.rs
// ============================================================================
// Module: File Outputs Repository
// Description: OutputsRepository backed by JSON Lines files in a directory.
// Purpose: Keep local run outputs on disk without a database.
// Dependencies: decision-pipeline-core, serde, serde_jcs, serde_json
// ============================================================================

//! ## Overview
//! Each primitive gets two files under the output directory:
//! `<primitive>_decisions.jsonl` and `<primitive>_evidence.jsonl`. Every line
//! is one persisted row encoded as canonical JSON.
//!
//! Writes go through the shared upsert protocol. A merge reads the file,
//! replaces rows by natural key, and rewrites it in key order through a
//! temporary file and a rename. Rerunning an invocation therefore leaves the
//! files byte-identical, and rows of other tenants or subjects survive.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use decision_pipeline_core::Decision;
use decision_pipeline_core::DecisionRow;
use decision_pipeline_core::EvidenceKey;
use decision_pipeline_core::EvidenceRow;
use decision_pipeline_core::EvidenceSet;
use decision_pipeline_core::InputRecord;
use decision_pipeline_core::NaturalKey;
use decision_pipeline_core::OutputsRepository;
use decision_pipeline_core::RepositoryError;
use decision_pipeline_core::RunContext;
use decision_pipeline_core::UpsertBackend;
use decision_pipeline_core::UpsertOptions;
use decision_pipeline_core::persistence::write_decisions_with;
use decision_pipeline_core::persistence::write_evidence_with;
use serde::Serialize;
use serde::de::DeserializeOwned;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// File name suffix for decision rows.
const DECISIONS_SUFFIX: &str = "_decisions.jsonl";

/// File name suffix for evidence rows.
const EVIDENCE_SUFFIX: &str = "_evidence.jsonl";

// ============================================================================
// SECTION: Repository
// ============================================================================

/// Outputs repository writing JSON Lines files.
#[derive(Debug)]
pub struct FileOutputsRepository {
    /// Directory holding the output files.
    dir: PathBuf,
    /// Batch size and write mode.
    options: UpsertOptions,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl FileOutputsRepository {
    /// Creates the output directory and returns a repository writing into it.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Io`] when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, options: UpsertOptions) -> Result<Self, RepositoryError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            RepositoryError::Io(format!("create {}: {err}", dir.display()))
        })?;
        Ok(Self {
            dir,
            options,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the decisions file for a primitive.
    #[must_use]
    pub fn decisions_path(&self, primitive_name: &str) -> PathBuf {
        self.dir.join(format!("{primitive_name}{DECISIONS_SUFFIX}"))
    }

    /// Returns the evidence file for a primitive.
    #[must_use]
    pub fn evidence_path(&self, primitive_name: &str) -> PathBuf {
        self.dir.join(format!("{primitive_name}{EVIDENCE_SUFFIX}"))
    }

    /// Applies `update` to the rows of one file and rewrites it.
    fn rewrite<K, R>(
        &self,
        path: &Path,
        key_of: impl Fn(&R) -> K,
        update: impl FnOnce(&mut BTreeMap<K, R>),
    ) -> Result<(), RepositoryError>
    where
        K: Ord,
        R: Serialize + DeserializeOwned,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| RepositoryError::Store("file outputs mutex poisoned".to_string()))?;
        let mut rows: BTreeMap<K, R> =
            read_rows(path)?.into_iter().map(|row| (key_of(&row), row)).collect();
        update(&mut rows);
        write_rows(path, rows.values())
    }
}

// ============================================================================
// SECTION: Upsert Backend
// ============================================================================

impl UpsertBackend for FileOutputsRepository {
    fn supports_merge(&self) -> bool {
        true
    }

    fn merge_decisions(&self, rows: &[DecisionRow]) -> Result<(), RepositoryError> {
        for (primitive_name, group) in group_by_primitive(rows, |row| &row.key.primitive_name) {
            self.rewrite(
                &self.decisions_path(primitive_name),
                |row: &DecisionRow| row.key.clone(),
                |existing| {
                    for row in group {
                        existing.insert(row.key.clone(), row.clone());
                    }
                },
            )?;
        }
        Ok(())
    }

    fn merge_evidence(&self, rows: &[EvidenceRow]) -> Result<(), RepositoryError> {
        for (primitive_name, group) in
            group_by_primitive(rows, |row| &row.key.decision.primitive_name)
        {
            self.rewrite(
                &self.evidence_path(primitive_name),
                |row: &EvidenceRow| row.key.clone(),
                |existing| {
                    for row in group {
                        existing.insert(row.key.clone(), row.clone());
                    }
                },
            )?;
        }
        Ok(())
    }

    fn replace_decisions(&self, rows: &[DecisionRow]) -> Result<(), RepositoryError> {
        // A merge rewrites each file once, replacing rows by key.
        self.merge_decisions(rows)
    }

    fn replace_evidence(&self, rows: &[EvidenceRow]) -> Result<(), RepositoryError> {
        self.merge_evidence(rows)
    }

    fn delete_decisions(&self, keys: &[NaturalKey]) -> Result<(), RepositoryError> {
        for (primitive_name, group) in group_by_primitive(keys, |key| &key.primitive_name) {
            let doomed: BTreeSet<&NaturalKey> = group.into_iter().collect();
            self.rewrite(
                &self.decisions_path(primitive_name),
                |row: &DecisionRow| row.key.clone(),
                |existing| existing.retain(|key, _| !doomed.contains(key)),
            )?;
        }
        Ok(())
    }

    fn delete_evidence(&self, keys: &[EvidenceKey]) -> Result<(), RepositoryError> {
        for (primitive_name, group) in
            group_by_primitive(keys, |key| &key.decision.primitive_name)
        {
            let doomed: BTreeSet<&EvidenceKey> = group.into_iter().collect();
            self.rewrite(
                &self.evidence_path(primitive_name),
                |row: &EvidenceRow| row.key.clone(),
                |existing| existing.retain(|key, _| !doomed.contains(key)),
            )?;
        }
        Ok(())
    }
}

impl OutputsRepository for FileOutputsRepository {
    fn write_decisions(
        &self,
        ctx: &RunContext,
        decisions: &[Decision],
        inputs: &[InputRecord],
    ) -> Result<(), RepositoryError> {
        write_decisions_with(self, self.options, ctx, decisions, inputs)
    }

    fn write_evidence(
        &self,
        ctx: &RunContext,
        evidence_sets: &[EvidenceSet],
        inputs: &[InputRecord],
        decisions: &[Decision],
    ) -> Result<(), RepositoryError> {
        write_evidence_with(self, self.options, ctx, evidence_sets, inputs, decisions)
    }
}

// ============================================================================
// SECTION: File Helpers
// ============================================================================

/// Groups items by the primitive name they belong to.
fn group_by_primitive<'a, T>(
    items: &'a [T],
    name_of: impl Fn(&'a T) -> &'a String,
) -> BTreeMap<&'a str, Vec<&'a T>> {
    let mut groups: BTreeMap<&str, Vec<&T>> = BTreeMap::new();
    for item in items {
        groups.entry(name_of(item).as_str()).or_default().push(item);
    }
    groups
}

/// Reads every row of a JSON Lines file; a missing file has no rows.
fn read_rows<R: DeserializeOwned>(path: &Path) -> Result<Vec<R>, RepositoryError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(RepositoryError::Io(format!("read {}: {err}", path.display()))),
    };
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| {
                RepositoryError::Invalid(format!("{} line {}: {err}", path.display(), index + 1))
            })
        })
        .collect()
}

/// Writes rows as canonical JSON lines, replacing the file atomically.
fn write_rows<'a, R: Serialize + 'a>(
    path: &Path,
    rows: impl Iterator<Item = &'a R>,
) -> Result<(), RepositoryError> {
    let mut bytes = Vec::new();
    for row in rows {
        let line = serde_jcs::to_vec(row)
            .map_err(|err| RepositoryError::Invalid(format!("row encoding failed: {err}")))?;
        bytes.extend_from_slice(&line);
        bytes.push(b'\n');
    }
    let staging = path.with_extension("jsonl.tmp");
    let io_error = |err: std::io::Error| RepositoryError::Io(format!("write {}: {err}", path.display()));
    let mut file = fs::File::create(&staging).map_err(io_error)?;
    file.write_all(&bytes).map_err(io_error)?;
    file.sync_all().map_err(io_error)?;
    drop(file);
    fs::rename(&staging, path).map_err(io_error)
}
