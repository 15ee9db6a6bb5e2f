//! Durable claim ledger
//!
//! The claim is a single `INSERT .. ON CONFLICT DO NOTHING` keyed by
//! `(sha, phase_group)`: whichever process inserts first owns the work and
//! every other process observes the existing row. Transitions after that
//! (completion, adoption, retry) are compare-and-set updates conditioned on
//! the current status and owner token, so no write ever relies on a value
//! read earlier outside the transaction.

use crate::error::{KeelError, KeelResult};
use crate::ledger::entry::{parse_timestamp, ClaimOutcome, ClaimStatus, LedgerEntry, PhaseGroup};
use crate::ledger::owner::{is_pid_alive, Owner};
use crate::store::Store;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use std::collections::BTreeSet;
use tracing::debug;

const ENTRY_COLUMNS: &str =
    "sha, phase_group, status, owner_token, owner_pid, reference, actor, claimed_at, finished_at";

/// One transition recorded in the append-only history
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryRecord {
    pub sha: String,
    pub group: PhaseGroup,
    pub event: String,
    pub status: ClaimStatus,
    pub owner_token: String,
    pub actor: String,
    pub recorded_at: String,
}

/// Ledger of build and release claims
#[derive(Debug, Clone)]
pub struct Ledger {
    store: Store,
}

impl Ledger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Attempt to claim `(sha, group)` for `owner`
    ///
    /// Exactly one concurrent caller wins. A losing caller sees the status of
    /// the existing entry, except when that entry is `claimed` by a process
    /// that no longer exists: the stale claim is then adopted by this owner.
    pub fn claim(
        &self,
        sha: &str,
        group: PhaseGroup,
        reference: &str,
        owner: &Owner,
    ) -> KeelResult<ClaimOutcome> {
        self.store.with_immediate_tx(|tx| {
            let now = Utc::now().to_rfc3339();
            let inserted = tx.execute(
                "INSERT INTO ledger (sha, phase_group, status, owner_token, owner_pid, reference, actor, claimed_at)
                 VALUES (?1, ?2, 'claimed', ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (sha, phase_group) DO NOTHING",
                params![sha, group.as_str(), owner.token, owner.pid, reference, owner.actor, now],
            )?;

            if inserted == 1 {
                record(tx, sha, group, "claim", ClaimStatus::Claimed, owner, reference)?;
                debug!("Claim won for ({}, {}) by {}", sha, group, owner);
                return Ok(ClaimOutcome::Won);
            }

            let existing = select_entry(tx, sha, group)?.ok_or_else(|| {
                KeelError::LedgerCorrupt(format!("({sha}, {group}) vanished during claim"))
            })?;

            if existing.status == ClaimStatus::Claimed
                && existing.owner_token != owner.token
                && !is_pid_alive(existing.owner_pid)
            {
                let adopted = tx.execute(
                    "UPDATE ledger
                     SET owner_token = ?1, owner_pid = ?2, reference = ?3, actor = ?4, claimed_at = ?5
                     WHERE sha = ?6 AND phase_group = ?7 AND status = 'claimed' AND owner_token = ?8",
                    params![
                        owner.token,
                        owner.pid,
                        reference,
                        owner.actor,
                        now,
                        sha,
                        group.as_str(),
                        existing.owner_token
                    ],
                )?;
                if adopted == 1 {
                    record(tx, sha, group, "adopt", ClaimStatus::Claimed, owner, reference)?;
                    return Ok(ClaimOutcome::Adopted {
                        previous_owner: existing.owner_token,
                    });
                }
            }

            Ok(ClaimOutcome::Lost(existing.status))
        })
    }

    /// Re-claim a `failed` entry under a fresh owner
    ///
    /// Compare-and-set from `failed` to `claimed`; concurrent retriers race
    /// and exactly one wins.
    pub fn retry_failed(
        &self,
        sha: &str,
        group: PhaseGroup,
        reference: &str,
        owner: &Owner,
    ) -> KeelResult<ClaimOutcome> {
        self.reclaim(sha, group, reference, owner, ClaimStatus::Failed, "retry")
    }

    /// Re-claim a `succeeded` entry whose output no longer exists
    ///
    /// Used when a finished build directory was collected before it was
    /// released. Same compare-and-set discipline as [`Ledger::retry_failed`].
    pub fn reclaim_succeeded(
        &self,
        sha: &str,
        group: PhaseGroup,
        reference: &str,
        owner: &Owner,
    ) -> KeelResult<ClaimOutcome> {
        self.reclaim(sha, group, reference, owner, ClaimStatus::Succeeded, "rebuild")
    }

    fn reclaim(
        &self,
        sha: &str,
        group: PhaseGroup,
        reference: &str,
        owner: &Owner,
        from: ClaimStatus,
        event: &str,
    ) -> KeelResult<ClaimOutcome> {
        self.store.with_immediate_tx(|tx| {
            let now = Utc::now().to_rfc3339();
            let updated = tx.execute(
                "UPDATE ledger
                 SET status = 'claimed', owner_token = ?1, owner_pid = ?2, reference = ?3,
                     actor = ?4, claimed_at = ?5, finished_at = NULL
                 WHERE sha = ?6 AND phase_group = ?7 AND status = ?8",
                params![
                    owner.token,
                    owner.pid,
                    reference,
                    owner.actor,
                    now,
                    sha,
                    group.as_str(),
                    from.as_str()
                ],
            )?;

            if updated == 1 {
                record(tx, sha, group, event, ClaimStatus::Claimed, owner, reference)?;
                return Ok(ClaimOutcome::Won);
            }

            match select_entry(tx, sha, group)? {
                Some(existing) => Ok(ClaimOutcome::Lost(existing.status)),
                None => Err(KeelError::LedgerCorrupt(format!(
                    "no ({sha}, {group}) entry to re-claim"
                ))),
            }
        })
    }

    /// Move an entry owned by `owner` from `claimed` to a terminal status
    pub fn complete(
        &self,
        sha: &str,
        group: PhaseGroup,
        owner: &Owner,
        status: ClaimStatus,
    ) -> KeelResult<()> {
        if !status.is_terminal() {
            return Err(KeelError::Internal(format!(
                "cannot complete ({sha}, {group}) with non-terminal status {status}"
            )));
        }

        self.store.with_immediate_tx(|tx| {
            let now = Utc::now().to_rfc3339();
            let updated = tx.execute(
                "UPDATE ledger SET status = ?1, finished_at = ?2
                 WHERE sha = ?3 AND phase_group = ?4 AND status = 'claimed' AND owner_token = ?5",
                params![status.as_str(), now, sha, group.as_str(), owner.token],
            )?;

            if updated != 1 {
                return Err(KeelError::NotOwner {
                    sha: sha.to_string(),
                    group,
                });
            }

            let reference: String = tx.query_row(
                "SELECT reference FROM ledger WHERE sha = ?1 AND phase_group = ?2",
                params![sha, group.as_str()],
                |row| row.get(0),
            )?;
            record(tx, sha, group, "complete", status, owner, &reference)?;
            debug!("Marked ({}, {}) {}", sha, group, status);
            Ok(())
        })
    }

    /// Look up the entry for `(sha, group)`
    pub fn get(&self, sha: &str, group: PhaseGroup) -> KeelResult<Option<LedgerEntry>> {
        self.store.read(|conn| {
            let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger WHERE sha = ?1 AND phase_group = ?2");
            let raw = conn
                .query_row(&sql, params![sha, group.as_str()], RawEntry::from_row)
                .optional()?;
            raw.map(RawEntry::into_entry).transpose()
        })
    }

    /// Most recently claimed entries first
    pub fn list(&self, limit: usize) -> KeelResult<Vec<LedgerEntry>> {
        self.store.read(|conn| {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger ORDER BY claimed_at DESC, phase_group DESC LIMIT ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit as i64], RawEntry::from_row)?;
            let entries = rows
                .map(|raw| raw?.into_entry())
                .collect::<KeelResult<Vec<_>>>();
            entries
        })
    }

    /// Shas with at least one entry still `claimed`
    pub fn in_flight(&self) -> KeelResult<BTreeSet<String>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT sha FROM ledger WHERE status = 'claimed'")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
        })
    }

    /// Every sha the ledger has an entry for
    pub fn shas(&self) -> KeelResult<BTreeSet<String>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT sha FROM ledger")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
        })
    }

    /// Succeeded builds without a succeeded release, with their finish time
    pub fn unreleased_builds(&self) -> KeelResult<Vec<(String, DateTime<Utc>)>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT b.sha, b.finished_at FROM ledger b
                 WHERE b.phase_group = 'build' AND b.status = 'succeeded'
                   AND b.finished_at IS NOT NULL
                   AND NOT EXISTS (
                       SELECT 1 FROM ledger r
                       WHERE r.sha = b.sha AND r.phase_group = 'release' AND r.status = 'succeeded'
                   )",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut builds = vec![];
            for row in rows {
                let (sha, finished_at) = row?;
                builds.push((sha, parse_timestamp(&finished_at)?));
            }
            Ok(builds)
        })
    }

    /// Shas of the `limit` most recently finished entries with `status`
    pub fn recent(
        &self,
        group: PhaseGroup,
        status: ClaimStatus,
        limit: usize,
    ) -> KeelResult<Vec<String>> {
        if limit == 0 {
            return Ok(vec![]);
        }
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sha FROM ledger WHERE phase_group = ?1 AND status = ?2
                 ORDER BY finished_at DESC LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![group.as_str(), status.as_str(), limit as i64],
                |row| row.get::<_, String>(0),
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Every recorded transition for `sha`, oldest first
    pub fn history(&self, sha: &str) -> KeelResult<Vec<HistoryRecord>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sha, phase_group, event, status, owner_token, actor, recorded_at
                 FROM ledger_history WHERE sha = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![sha], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut records = vec![];
            for row in rows {
                let (sha, group, event, status, owner_token, actor, recorded_at) = row?;
                records.push(HistoryRecord {
                    sha,
                    group: group.parse()?,
                    event,
                    status: status.parse()?,
                    owner_token,
                    actor,
                    recorded_at,
                });
            }
            Ok(records)
        })
    }
}

fn record(
    tx: &Transaction<'_>,
    sha: &str,
    group: PhaseGroup,
    event: &str,
    status: ClaimStatus,
    owner: &Owner,
    reference: &str,
) -> KeelResult<()> {
    tx.execute(
        "INSERT INTO ledger_history
            (sha, phase_group, event, status, owner_token, owner_pid, reference, actor, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            sha,
            group.as_str(),
            event,
            status.as_str(),
            owner.token,
            owner.pid,
            reference,
            owner.actor,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

fn select_entry(tx: &Transaction<'_>, sha: &str, group: PhaseGroup) -> KeelResult<Option<LedgerEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger WHERE sha = ?1 AND phase_group = ?2");
    let raw = tx
        .query_row(&sql, params![sha, group.as_str()], RawEntry::from_row)
        .optional()?;
    raw.map(RawEntry::into_entry).transpose()
}

/// Row as stored, before enum and timestamp parsing
struct RawEntry {
    sha: String,
    group: String,
    status: String,
    owner_token: String,
    owner_pid: u32,
    reference: String,
    actor: String,
    claimed_at: String,
    finished_at: Option<String>,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sha: row.get(0)?,
            group: row.get(1)?,
            status: row.get(2)?,
            owner_token: row.get(3)?,
            owner_pid: row.get(4)?,
            reference: row.get(5)?,
            actor: row.get(6)?,
            claimed_at: row.get(7)?,
            finished_at: row.get(8)?,
        })
    }

    fn into_entry(self) -> KeelResult<LedgerEntry> {
        Ok(LedgerEntry {
            sha: self.sha,
            group: self.group.parse()?,
            status: self.status.parse()?,
            owner_token: self.owner_token,
            owner_pid: self.owner_pid,
            reference: self.reference,
            actor: self.actor,
            claimed_at: parse_timestamp(&self.claimed_at)?,
            finished_at: self.finished_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}
