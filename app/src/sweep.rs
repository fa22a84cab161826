//! Ledger reconciliation over every stock record.
//!
//! Records are read in id-ordered pages, so the sweep covers the whole table
//! however large it is. A record that cannot be reconciled is counted and
//! logged, and the sweep moves on to the next one.

use stock_control_core::StockError;
use stock_control_core::store::clamp_limit;
use stock_control_runtime::StockEngine;

/// Records fetched per page.
pub const SWEEP_PAGE_SIZE: i64 = stock_control_core::store::MAX_LIST_LIMIT;

/// Outcome of a full sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Records whose ledger was replayed.
    pub checked: usize,
    /// Checked records whose ledger disagrees with the stored on-hand quantity.
    pub inconsistent: usize,
    /// Records that could not be reconciled at all.
    pub failed: usize,
}

impl SweepSummary {
    /// Every record was checked and every ledger agrees.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.inconsistent == 0 && self.failed == 0
    }
}

/// Reconcile every stock record, `page_size` records at a time.
///
/// # Errors
///
/// Returns the store error if a page of records cannot be listed. Errors
/// reconciling a single record are counted in [`SweepSummary::failed`].
pub async fn reconcile_all(engine: &StockEngine, page_size: i64) -> Result<SweepSummary, StockError> {
    let page_size = clamp_limit(Some(page_size));
    let mut summary = SweepSummary::default();
    let mut after_id = None;

    loop {
        let page = engine.list_records(after_id, Some(page_size)).await?;

        for record in &page {
            match engine.reconcile(&record.key()).await {
                Ok(report) => {
                    summary.checked += 1;
                    if !report.is_consistent() {
                        summary.inconsistent += 1;
                    }
                }
                Err(error) => {
                    summary.failed += 1;
                    tracing::error!(
                        sku = %record.sku_id,
                        warehouse = %record.warehouse_id,
                        error = %error,
                        "Reconciliation failed"
                    );
                }
            }
        }

        let Some(last) = page.last() else {
            break;
        };
        if i64::try_from(page.len()).unwrap_or(i64::MAX) < page_size {
            break;
        }
        after_id = Some(last.id);
    }

    Ok(summary)
}
