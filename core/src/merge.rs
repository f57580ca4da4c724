//! Reconciliation of two replicas. Pure: no I/O, deterministic for a given `now`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::bail;
use serde::Serialize;

use crate::db::now_millis;
use crate::models::{Dated, Record, Snapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Union by id with per-record conflict resolution.
    #[default]
    PerRecord,
    /// The replica with the newer `updated_at_millis` wins as a whole. Equal markers
    /// leave both replicas untouched.
    WholeSnapshot,
}

impl FromStr for MergeStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" | "per-record" | "per_record" => Ok(Self::PerRecord),
            "snapshot" | "whole-snapshot" | "whole_snapshot" | "lww" => Ok(Self::WholeSnapshot),
            other => bail!("Unknown sync strategy '{other}' (expected 'merge' or 'snapshot')"),
        }
    }
}

impl MergeStrategy {
    /// The reconciled snapshot, or `None` when neither replica should be written.
    #[must_use]
    pub fn apply(self, local: &Snapshot, remote: &Snapshot, now: i64) -> Option<Snapshot> {
        match self {
            Self::PerRecord => Some(merge_at(local, remote, now)),
            Self::WholeSnapshot => merge_whole_snapshot_at(local, remote, now),
        }
    }
}

#[must_use]
pub fn merge(local: &Snapshot, remote: &Snapshot) -> Snapshot {
    merge_at(local, remote, now_millis())
}

/// Per-record merge.
///
/// Vehicles present on both sides with different content take the side with the newer
/// snapshot marker (remote on a tie). Time-series records take the one with the later
/// business date, local on a tie, regardless of either snapshot's marker.
#[must_use]
pub fn merge_at(local: &Snapshot, remote: &Snapshot, now: i64) -> Snapshot {
    let prefer_remote = remote.updated_at_millis >= local.updated_at_millis;

    let vehicles = union_by_id(&local.vehicles, &remote.vehicles, |_, _| !prefer_remote);
    let mut odometer_records =
        union_by_id(&local.odometer_records, &remote.odometer_records, keep_local_dated);
    let mut fuel_records = union_by_id(&local.fuel_records, &remote.fuel_records, keep_local_dated);
    let mut maintenance_records = union_by_id(
        &local.maintenance_records,
        &remote.maintenance_records,
        keep_local_dated,
    );

    sort_recent_first(&mut odometer_records);
    sort_recent_first(&mut fuel_records);
    sort_recent_first(&mut maintenance_records);

    Snapshot {
        vehicles,
        odometer_records,
        fuel_records,
        maintenance_records,
        updated_at_millis: local.updated_at_millis.max(remote.updated_at_millis).max(now),
    }
}

/// Last-write-wins on the snapshot markers. `None` on equal markers, even when the
/// contents differ.
#[must_use]
pub fn merge_whole_snapshot_at(local: &Snapshot, remote: &Snapshot, now: i64) -> Option<Snapshot> {
    let winner = match remote.updated_at_millis.cmp(&local.updated_at_millis) {
        Ordering::Greater => remote,
        Ordering::Less => local,
        Ordering::Equal => return None,
    };
    Some(Snapshot {
        updated_at_millis: local.updated_at_millis.max(remote.updated_at_millis).max(now),
        ..winner.clone()
    })
}

fn keep_local_dated<T: Dated>(local: &T, remote: &T) -> bool {
    local.recency_day() >= remote.recency_day()
}

/// Union keyed by id, ascending. `keep_local` decides ids present on both sides with
/// differing content.
fn union_by_id<T, F>(local: &[T], remote: &[T], keep_local: F) -> Vec<T>
where
    T: Record + Clone + PartialEq,
    F: Fn(&T, &T) -> bool,
{
    let mut merged: BTreeMap<i64, T> = local.iter().map(|r| (r.id(), r.clone())).collect();
    for incoming in remote {
        let replace = match merged.get(&incoming.id()) {
            None => true,
            Some(existing) => existing != incoming && !keep_local(existing, incoming),
        };
        if replace {
            merged.insert(incoming.id(), incoming.clone());
        }
    }
    merged.into_values().collect()
}

fn sort_recent_first<T: Dated>(records: &mut [T]) {
    records.sort_by(|a, b| {
        b.recency_day()
            .cmp(&a.recency_day())
            .then_with(|| b.id().cmp(&a.id()))
    });
}
