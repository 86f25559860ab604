//! Resource ledgers.
//!
//! A ledger row tracks one countable resource (stock of a product, balance of
//! an account) split into `used`, `frozen` and `residue` columns. Rows are
//! never overwritten: every mutation is a conditional transfer between two
//! columns that affects zero or one row, mirroring
//! `UPDATE .. SET a = a - n, b = b + n WHERE id = ? AND a >= n`.
//!
//! - Reserving ledgers (TCC) carry a `frozen` column:
//!   `total == used + frozen + residue`
//! - Direct ledgers (Saga/AT) do not: `total == used + residue`

pub mod order;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error};

pub use order::{NewOrder, Order, OrderBook, OrderStatus};

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors from ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Resource not found in {ledger}: {resource_id}")]
    NotFound { ledger: String, resource_id: String },

    #[error("Resource already exists in {ledger}: {resource_id}")]
    AlreadyExists { ledger: String, resource_id: String },

    #[error("Ledger {ledger} has no {column} column")]
    UnsupportedColumn { ledger: String, column: Column },

    #[error("Invariant violated for {resource_id}: {detail}")]
    InvariantViolation { resource_id: String, detail: String },
}

/// Shape of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LedgerKind {
    /// Has a `frozen` column for TCC reservations.
    Reserving,
    /// No `frozen` column (Saga and AT participants).
    Direct,
}

/// A counter column of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Column {
    Used,
    Frozen,
    Residue,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Column::Used => "used",
            Column::Frozen => "frozen",
            Column::Residue => "residue",
        };
        f.write_str(name)
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRow {
    pub resource_id: String,
    pub total: u64,
    pub used: u64,
    /// `None` for direct ledgers.
    pub frozen: Option<u64>,
    pub residue: u64,
}

impl LedgerRow {
    /// Fresh row for a reserving ledger, everything in `residue`.
    pub fn reserving(resource_id: impl Into<String>, total: u64) -> Self {
        Self {
            resource_id: resource_id.into(),
            total,
            used: 0,
            frozen: Some(0),
            residue: total,
        }
    }

    /// Fresh row for a direct ledger, everything in `residue`.
    pub fn direct(resource_id: impl Into<String>, total: u64) -> Self {
        Self {
            resource_id: resource_id.into(),
            total,
            used: 0,
            frozen: None,
            residue: total,
        }
    }

    pub fn frozen(&self) -> u64 {
        self.frozen.unwrap_or(0)
    }

    pub fn kind(&self) -> LedgerKind {
        if self.frozen.is_some() {
            LedgerKind::Reserving
        } else {
            LedgerKind::Direct
        }
    }

    /// Read-only check of the row's arithmetic identity.
    pub fn check(&self) -> Result<()> {
        let sum = self
            .used
            .checked_add(self.frozen())
            .and_then(|s| s.checked_add(self.residue));

        match sum {
            Some(sum) if sum == self.total => Ok(()),
            Some(sum) => Err(LedgerError::InvariantViolation {
                resource_id: self.resource_id.clone(),
                detail: format!(
                    "total {} != used {} + frozen {} + residue {} (= {})",
                    self.total,
                    self.used,
                    self.frozen(),
                    self.residue,
                    sum
                ),
            }),
            None => Err(LedgerError::InvariantViolation {
                resource_id: self.resource_id.clone(),
                detail: "column sum overflows".to_string(),
            }),
        }
    }

    fn column(&self, column: Column) -> u64 {
        match column {
            Column::Used => self.used,
            Column::Frozen => self.frozen(),
            Column::Residue => self.residue,
        }
    }

    fn column_mut(&mut self, column: Column) -> &mut u64 {
        match column {
            Column::Used => &mut self.used,
            Column::Frozen => self.frozen.get_or_insert(0),
            Column::Residue => &mut self.residue,
        }
    }
}

/// Outcome of a conditional transfer that matched its guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub before: LedgerRow,
    pub after: LedgerRow,
}

/// In-memory ledger table.
///
/// The write lock is held only for the duration of one conditional update,
/// never across participant calls.
pub struct ResourceLedger {
    name: String,
    kind: LedgerKind,
    rows: RwLock<HashMap<String, LedgerRow>>,
}

impl ResourceLedger {
    pub fn new(name: impl Into<String>, kind: LedgerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            rows: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LedgerKind {
        self.kind
    }

    /// Insert a new row. The row must match the ledger's shape and satisfy
    /// the invariant.
    pub async fn seed(&self, row: LedgerRow) -> Result<()> {
        if row.kind() != self.kind {
            return Err(LedgerError::UnsupportedColumn {
                ledger: self.name.clone(),
                column: Column::Frozen,
            });
        }
        row.check()?;

        let mut rows = self.rows.write().await;
        if rows.contains_key(&row.resource_id) {
            return Err(LedgerError::AlreadyExists {
                ledger: self.name.clone(),
                resource_id: row.resource_id,
            });
        }
        debug!(ledger = %self.name, resource_id = %row.resource_id, total = row.total, "Seeded ledger row");
        rows.insert(row.resource_id.clone(), row);
        Ok(())
    }

    /// Snapshot of a row.
    pub async fn get(&self, resource_id: &str) -> Option<LedgerRow> {
        self.rows.read().await.get(resource_id).cloned()
    }

    /// Snapshot of every row, ordered by resource id.
    pub async fn rows(&self) -> Vec<LedgerRow> {
        let mut rows: Vec<_> = self.rows.read().await.values().cloned().collect();
        rows.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        rows
    }

    /// Move `count` from `from` to `to` if `from >= count`.
    ///
    /// Returns `Ok(None)` when the guard does not hold (zero rows affected).
    /// That is a business outcome, not an error.
    pub async fn transfer(
        &self,
        resource_id: &str,
        from: Column,
        to: Column,
        count: u64,
    ) -> Result<Option<Applied>> {
        for column in [from, to] {
            if column == Column::Frozen && self.kind == LedgerKind::Direct {
                return Err(LedgerError::UnsupportedColumn {
                    ledger: self.name.clone(),
                    column,
                });
            }
        }

        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(resource_id)
            .ok_or_else(|| LedgerError::NotFound {
                ledger: self.name.clone(),
                resource_id: resource_id.to_string(),
            })?;

        if row.column(from) < count {
            return Ok(None);
        }

        let before = row.clone();
        let mut after = row.clone();
        *after.column_mut(from) -= count;
        let target = after.column_mut(to);
        *target = target
            .checked_add(count)
            .ok_or_else(|| LedgerError::InvariantViolation {
                resource_id: resource_id.to_string(),
                detail: format!("{} overflows", to),
            })?;

        if let Err(e) = after.check() {
            error!(ledger = %self.name, resource_id, error = %e, "Rejected update that breaks ledger invariant");
            return Err(e);
        }

        *row = after.clone();
        Ok(Some(Applied { before, after }))
    }

    /// TCC Try: residue -> frozen.
    pub async fn freeze(&self, resource_id: &str, count: u64) -> Result<Option<Applied>> {
        self.transfer(resource_id, Column::Residue, Column::Frozen, count)
            .await
    }

    /// TCC Confirm: frozen -> used.
    pub async fn settle(&self, resource_id: &str, count: u64) -> Result<Option<Applied>> {
        self.transfer(resource_id, Column::Frozen, Column::Used, count)
            .await
    }

    /// TCC Cancel: frozen -> residue.
    pub async fn release(&self, resource_id: &str, count: u64) -> Result<Option<Applied>> {
        self.transfer(resource_id, Column::Frozen, Column::Residue, count)
            .await
    }

    /// Saga forward / AT reduce: residue -> used.
    pub async fn consume(&self, resource_id: &str, count: u64) -> Result<Option<Applied>> {
        self.transfer(resource_id, Column::Residue, Column::Used, count)
            .await
    }

    /// Saga compensate / AT undo: used -> residue.
    pub async fn restore(&self, resource_id: &str, count: u64) -> Result<Option<Applied>> {
        self.transfer(resource_id, Column::Used, Column::Residue, count)
            .await
    }

    /// Read-only diagnostic for one row.
    pub async fn check_invariant(&self, resource_id: &str) -> Result<()> {
        let rows = self.rows.read().await;
        let row = rows.get(resource_id).ok_or_else(|| LedgerError::NotFound {
            ledger: self.name.clone(),
            resource_id: resource_id.to_string(),
        })?;
        row.check()
    }

    /// Read-only diagnostic over every row; returns the first violation.
    pub async fn check_all(&self) -> Result<()> {
        let rows = self.rows.read().await;
        rows.values().try_for_each(LedgerRow::check)
    }
}
