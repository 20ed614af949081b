//! Reconciliation of the three stores against each other.
//!
//! The coordinator never re-applies a write that failed after the ledger
//! append, so any such failure surfaces here instead. [`audit`] is pure: it
//! only looks at a [`LedgerDump`], which can be captured from live stores or
//! loaded from a file by the `evote-audit` tool.

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::model::db::{Candidate, CandidateId, RecordId, VoteRecord, Voter, VoterId};
use crate::store::{StoreError, Stores};

/// A snapshot of every table the audit needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDump {
    pub candidates: Vec<Candidate>,
    pub voters: Vec<Voter>,
    pub records: Vec<VoteRecord>,
}

impl LedgerDump {
    /// Read every table. Tables are read one after another, so votes
    /// committed meanwhile may show up as transient discrepancies.
    pub async fn capture(stores: &Stores) -> Result<Self, StoreError> {
        Ok(Self {
            candidates: stores.candidates.list().await?,
            voters: stores.voters.list().await?,
            records: stores.ledger.list().await?,
        })
    }
}

/// One way in which the stores disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// A candidate's counter differs from the number of ledger records for it.
    TallyMismatch {
        candidate_id: CandidateId,
        vote_count: u64,
        ledger_count: u64,
    },
    /// A voter is marked as voted but the ledger has no record for them.
    FlaggedWithoutRecord { voter_id: VoterId },
    /// The ledger has a record for a voter who isn't marked as voted.
    RecordWithoutFlag {
        voter_id: VoterId,
        record_id: RecordId,
    },
    UnknownVoter {
        voter_id: VoterId,
        record_id: RecordId,
    },
    UnknownCandidate {
        candidate_id: CandidateId,
        record_id: RecordId,
    },
    /// More than one record for the same voter.
    DuplicateRecord {
        voter_id: VoterId,
        record_ids: Vec<RecordId>,
    },
}

impl Display for Discrepancy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TallyMismatch {
                candidate_id,
                vote_count,
                ledger_count,
            } => write!(
                f,
                "candidate {candidate_id} has a tally of {vote_count} but {ledger_count} ledger records"
            ),
            Self::FlaggedWithoutRecord { voter_id } => {
                write!(f, "voter {voter_id} is marked as voted but has no ledger record")
            }
            Self::RecordWithoutFlag {
                voter_id,
                record_id,
            } => write!(
                f,
                "record {record_id} exists but voter {voter_id} is not marked as voted"
            ),
            Self::UnknownVoter {
                voter_id,
                record_id,
            } => write!(f, "record {record_id} belongs to unknown voter {voter_id}"),
            Self::UnknownCandidate {
                candidate_id,
                record_id,
            } => write!(
                f,
                "record {record_id} is for unknown candidate {candidate_id}"
            ),
            Self::DuplicateRecord {
                voter_id,
                record_ids,
            } => write!(
                f,
                "voter {voter_id} has {} ledger records",
                record_ids.len()
            ),
        }
    }
}

/// The result of an audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Sum of every candidate's tally.
    pub total_tally: u64,
    pub total_records: u64,
    pub discrepancies: Vec<Discrepancy>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty() && self.total_tally == self.total_records
    }
}

/// Cross-check tallies, ledger records and voter flags.
pub fn audit(dump: &LedgerDump) -> AuditReport {
    let mut discrepancies = Vec::new();

    let mut ledger_counts: HashMap<CandidateId, u64> = HashMap::new();
    let mut records_by_voter: HashMap<VoterId, Vec<RecordId>> = HashMap::new();
    for record in &dump.records {
        *ledger_counts.entry(record.candidate_id).or_default() += 1;
        records_by_voter
            .entry(record.voter_id)
            .or_default()
            .push(record.id);
    }

    // Tallies against the ledger.
    for candidate in &dump.candidates {
        let ledger_count = ledger_counts.get(&candidate.id).copied().unwrap_or(0);
        if candidate.vote_count != ledger_count {
            discrepancies.push(Discrepancy::TallyMismatch {
                candidate_id: candidate.id,
                vote_count: candidate.vote_count,
                ledger_count,
            });
        }
    }

    // Voter flags against the ledger.
    for voter in &dump.voters {
        if voter.has_voted && !records_by_voter.contains_key(&voter.id) {
            discrepancies.push(Discrepancy::FlaggedWithoutRecord { voter_id: voter.id });
        }
    }

    // Each record against the registry and the candidates.
    let voters: HashMap<VoterId, &Voter> = dump.voters.iter().map(|v| (v.id, v)).collect();
    let candidates: HashSet<CandidateId> = dump.candidates.iter().map(|c| c.id).collect();
    let mut reported_duplicates = HashSet::new();
    for record in &dump.records {
        let voter_records = &records_by_voter[&record.voter_id];
        if voter_records.len() > 1 && reported_duplicates.insert(record.voter_id) {
            discrepancies.push(Discrepancy::DuplicateRecord {
                voter_id: record.voter_id,
                record_ids: voter_records.clone(),
            });
        }
        match voters.get(&record.voter_id) {
            None => discrepancies.push(Discrepancy::UnknownVoter {
                voter_id: record.voter_id,
                record_id: record.id,
            }),
            Some(voter) if !voter.has_voted => {
                discrepancies.push(Discrepancy::RecordWithoutFlag {
                    voter_id: record.voter_id,
                    record_id: record.id,
                })
            }
            Some(_) => {}
        }
        if !candidates.contains(&record.candidate_id) {
            discrepancies.push(Discrepancy::UnknownCandidate {
                candidate_id: record.candidate_id,
                record_id: record.id,
            });
        }
    }

    AuditReport {
        total_tally: dump.candidates.iter().map(|c| c.vote_count).sum(),
        total_records: dump.records.len() as u64,
        discrepancies,
    }
}
