// read_merger.rs - joins local + remote record sets for read-side consumers,
// independent of the write path.
//
// One `merge` implementation serves both expenses and receipts via the
// `Mergeable` bound; write dispatch stays concretely per-type, as it does in
// `sync::engine`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{Expense, Receipt, SyncStatus};

/// Bound shared by the two content types for read-path merging.
pub trait Mergeable {
    fn local_id(&self) -> Uuid;
    fn sync_status(&self) -> SyncStatus;
    /// `(primary, tiebreak)`, both compared descending.
    fn sort_key(&self) -> (DateTime<Utc>, DateTime<Utc>);
}

impl Mergeable for Expense {
    fn local_id(&self) -> Uuid {
        self.local_id
    }
    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }
    fn sort_key(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.expense_date, self.created_at)
    }
}

impl Mergeable for Receipt {
    fn local_id(&self) -> Uuid {
        self.local_id
    }
    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }
    fn sort_key(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.created_at, self.created_at)
    }
}

/// A remote record plus whatever `local_id` the server happened to echo back
/// (absent for rows the client never created).
#[derive(Debug, Clone)]
pub struct RemoteRecord<T> {
    pub local_id: Option<Uuid>,
    pub record: T,
}

/// A record annotated with where it came from, for display.
#[derive(Debug, Clone)]
pub enum MergedRecord<T> {
    Local(T),
    Server(T),
}

impl<T> MergedRecord<T> {
    pub fn source(&self) -> &'static str {
        match self {
            MergedRecord::Local(_) => "local",
            MergedRecord::Server(_) => "server",
        }
    }

    pub fn inner(&self) -> &T {
        match self {
            MergedRecord::Local(r) | MergedRecord::Server(r) => r,
        }
    }
}

/// Dedup rule:
/// 1. Every remote record is emitted, tagged `server`.
/// 2. A local record is emitted, tagged `local`, only if the server didn't
///    echo its `local_id` back **and** it isn't `synced` yet.
///
/// Sorted descending by `sort_key`.
pub fn merge<T>(local: &[T], remote: &[RemoteRecord<T>]) -> Vec<MergedRecord<T>>
where
    T: Mergeable + Clone,
{
    let echoed: HashSet<Uuid> = remote.iter().filter_map(|r| r.local_id).collect();

    let mut out: Vec<MergedRecord<T>> = remote.iter().map(|r| MergedRecord::Server(r.record.clone())).collect();

    out.extend(
        local
            .iter()
            .filter(|l| !echoed.contains(&l.local_id()) && l.sync_status() != SyncStatus::Synced)
            .cloned()
            .map(MergedRecord::Local),
    );

    out.sort_by(|a, b| b.inner().sort_key().cmp(&a.inner().sort_key()));
    out
}

pub fn merge_expenses(local: &[Expense], remote: &[RemoteRecord<Expense>]) -> Vec<MergedRecord<Expense>> {
    merge(local, remote)
}

pub fn merge_receipts(local: &[Receipt], remote: &[RemoteRecord<Receipt>]) -> Vec<MergedRecord<Receipt>> {
    merge(local, remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExpenseCategory;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn expense(local_id: Uuid, status: SyncStatus, date: DateTime<Utc>) -> Expense {
        Expense {
            local_id,
            server_id: None,
            amount_minor_units: 1000,
            category: ExpenseCategory::Fuel,
            description: None,
            vendor_name: None,
            vendor_id: None,
            job_order_id: None,
            is_overhead: true,
            expense_date: date,
            expense_time: None,
            gps: None,
            receipt_local_id: None,
            sync_status: status,
            sync_error: None,
            sync_attempts: 0,
            approval_status: crate::types::ApprovalStatus::Draft,
            created_at: date,
            updated_at: date,
            last_attempt_at: None,
        }
    }

    #[test]
    fn synced_local_echoed_by_server_is_not_duplicated() {
        let local_id = Uuid::new_v4();
        let date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let local = vec![expense(local_id, SyncStatus::Synced, date)];
        let remote = vec![RemoteRecord {
            local_id: Some(local_id),
            record: expense(local_id, SyncStatus::Synced, date),
        }];

        let merged = merge_expenses(&local, &remote);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source(), "server");
    }

    #[test]
    fn unsynced_local_not_echoed_is_shown() {
        let local_id = Uuid::new_v4();
        let date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let local = vec![expense(local_id, SyncStatus::Pending, date)];
        let remote: Vec<RemoteRecord<Expense>> = vec![];

        let merged = merge_expenses(&local, &remote);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source(), "local");
    }

    #[test]
    fn synced_local_not_yet_echoed_is_suppressed() {
        // The server hasn't returned the page containing this record yet,
        // but it's already synced locally, so it must not double-show.
        let local_id = Uuid::new_v4();
        let date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let local = vec![expense(local_id, SyncStatus::Synced, date)];
        let remote: Vec<RemoteRecord<Expense>> = vec![];

        let merged = merge_expenses(&local, &remote);
        assert!(merged.is_empty());
    }

    #[test]
    fn sorted_descending_by_expense_date() {
        let older = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let local = vec![
            expense(Uuid::new_v4(), SyncStatus::Pending, older),
            expense(Uuid::new_v4(), SyncStatus::Pending, newer),
        ];

        let merged = merge_expenses(&local, &[]);
        assert_eq!(merged[0].inner().expense_date, newer);
        assert_eq!(merged[1].inner().expense_date, older);
    }
}
