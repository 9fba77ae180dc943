//! Step records: what the kernel did in one step.
//!
//! A [`StepRecord`] is enough to reconstruct which units were applicable,
//! which agents each role admitted (the step's claims), and every cardinality
//! shortfall.
//! Records serialize deterministically (ordered maps, ordered vectors), so
//! two identical runs produce byte-identical output.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, ContextId, Step};
use crate::error::{KernelError, Result};
use crate::labels::LabelSummary;

/// A unit instance, by name and context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRef {
    pub unit: String,
    pub context: ContextId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub role: String,
    /// Agents that passed the role's selection before the cardinality cap
    pub eligible: usize,
    pub admitted: Vec<AgentId>,
    /// Admissions hold exclusive claims
    pub exclusive: bool,
    /// Candidates skipped because another unit held them exclusively
    pub denied: usize,
}

/// Claim ledger totals of one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSummary {
    pub granted: usize,
    pub denied: usize,
}

/// Diagnostic for a role with fewer eligible agents than its minimum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub role: String,
    pub eligible: usize,
    pub min: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    Actuated { roles: Vec<RoleRecord> },
    /// Actuation skipped, context left untouched
    Shortfall(Shortfall),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    #[serde(flatten)]
    pub unit: UnitRef,
    pub priority: i32,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    /// Applicable units in the order they resolved
    pub units: Vec<UnitRecord>,
    pub inapplicable: Vec<UnitRef>,
    pub claims: ClaimSummary,
    /// Label buffer activity per estimate
    pub labels: BTreeMap<String, LabelSummary>,
}

impl StepRecord {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            ..Default::default()
        }
    }

    pub fn shortfalls(&self) -> impl Iterator<Item = (&UnitRef, &Shortfall)> {
        self.units.iter().filter_map(|u| match &u.outcome {
            UnitOutcome::Shortfall(s) => Some((&u.unit, s)),
            UnitOutcome::Actuated { .. } => None,
        })
    }

    /// Agents a unit admitted into `role` this step. `None` if the unit did
    /// not actuate.
    pub fn admitted(&self, unit: &str, context: ContextId, role: &str) -> Option<&[AgentId]> {
        self.units
            .iter()
            .filter(|u| u.unit.unit == unit && u.unit.context == context)
            .find_map(|u| match &u.outcome {
                UnitOutcome::Actuated { roles } => roles
                    .iter()
                    .find(|r| r.role == role)
                    .map(|r| r.admitted.as_slice()),
                UnitOutcome::Shortfall(_) => None,
            })
    }

    pub fn actuated(&self, unit: &str, context: ContextId) -> bool {
        self.units.iter().any(|u| {
            u.unit.unit == unit
                && u.unit.context == context
                && matches!(u.outcome, UnitOutcome::Actuated { .. })
        })
    }
}

/// Appends step records to a JSON-lines file.
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| KernelError::Persistence {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(path).map_err(|source| KernelError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn write(&mut self, record: &StepRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer
            .write_all(b"\n")
            .map_err(|source| KernelError::Persistence {
                path: self.path.clone(),
                source,
            })?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|source| KernelError::Persistence {
            path: self.path.clone(),
            source,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StepRecord {
        StepRecord {
            step: 4,
            units: vec![
                UnitRecord {
                    unit: UnitRef {
                        unit: "CancelLateWorkers".to_string(),
                        context: 1,
                    },
                    priority: 4,
                    outcome: UnitOutcome::Actuated {
                        roles: vec![RoleRecord {
                            role: "late".to_string(),
                            eligible: 2,
                            admitted: vec![3, 5],
                            exclusive: true,
                            denied: 1,
                        }],
                    },
                },
                UnitRecord {
                    unit: UnitRef {
                        unit: "ReplaceLateWorkers".to_string(),
                        context: 1,
                    },
                    priority: 3,
                    outcome: UnitOutcome::Shortfall(Shortfall {
                        role: "standbys".to_string(),
                        eligible: 0,
                        min: 1,
                    }),
                },
            ],
            inapplicable: Vec::new(),
            claims: ClaimSummary {
                granted: 2,
                denied: 1,
            },
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_queries() {
        let record = sample();
        assert_eq!(
            record.admitted("CancelLateWorkers", 1, "late"),
            Some(&[3, 5][..])
        );
        assert_eq!(record.admitted("ReplaceLateWorkers", 1, "standbys"), None);
        assert!(record.actuated("CancelLateWorkers", 1));
        assert!(!record.actuated("ReplaceLateWorkers", 1));
        assert_eq!(record.shortfalls().count(), 1);
    }

    #[test]
    fn test_jsonl_sink_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps/records.jsonl");
        let mut sink = JsonlSink::create(&path).unwrap();
        sink.write(&sample()).unwrap();
        sink.write(&StepRecord::new(5)).unwrap();
        sink.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: StepRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, sample());
    }
}
