//! Request validation.
//!
//! A batch is checked as a whole before anything is applied, and every
//! problem is reported, each prefixed with the JSON path it was found at.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{ChangeBatch, SyncRequest};
use finsync_core::{Loan, RecordId, Timestamp, Transaction};
use std::collections::HashSet;

fn check_amount(value: f64, at: &str, field: &str, details: &mut Vec<String>) {
    if !value.is_finite() || value < 0.0 {
        details.push(format!("{at}.{field} must be a finite, non-negative number"));
    }
}

fn check_id(id: &RecordId, at: &str, details: &mut Vec<String>) {
    if id.is_empty() {
        details.push(format!("{at}.id must not be empty"));
    }
}

fn check_date(value: &str, at: &str, field: &str, details: &mut Vec<String>) {
    if Timestamp::parse(value).is_err() {
        details.push(format!("{at}.{field} is not an ISO-8601 date: {value:?}"));
    }
}

/// Checks one transaction, appending problems to `details`.
pub fn validate_transaction(tx: &Transaction, at: &str, details: &mut Vec<String>) {
    check_id(&tx.id, at, details);
    check_amount(tx.amount, at, "amount", details);
    check_date(&tx.date, at, "date", details);
}

/// Checks one loan and its payment ledger, appending problems to `details`.
pub fn validate_loan(loan: &Loan, at: &str, details: &mut Vec<String>) {
    check_id(&loan.id, at, details);
    check_amount(loan.principal, at, "principal", details);
    check_amount(loan.interest_rate, at, "interestRate", details);
    check_amount(loan.emi_amount, at, "emiAmount", details);
    check_amount(loan.total_interest, at, "totalInterest", details);
    check_date(&loan.start_date, at, "startDate", details);
    if loan.duration_months == 0 {
        details.push(format!("{at}.durationMonths must be at least 1"));
    }

    let mut months = HashSet::new();
    for (i, payment) in loan.payments.iter().enumerate() {
        let at = format!("{at}.payments[{i}]");
        if payment.month_number == 0 {
            details.push(format!("{at}.monthNumber must be at least 1"));
        }
        if !months.insert(payment.month_number) {
            details.push(format!(
                "{at}.monthNumber {} appears more than once",
                payment.month_number
            ));
        }
        match (payment.is_paid, payment.paid_date.is_some()) {
            (false, true) => {
                details.push(format!("{at}.paidDate is set on an unpaid installment"));
            }
            (true, false) => {
                details.push(format!("{at}.paidDate is missing on a paid installment"));
            }
            _ => {}
        }
    }
}

fn validate_batch<T>(
    batch: &ChangeBatch<T>,
    at: &str,
    check: fn(&T, &str, &mut Vec<String>),
    details: &mut Vec<String>,
) {
    for (i, record) in batch.new.iter().enumerate() {
        check(record, &format!("{at}.new[{i}]"), details);
    }
    for (i, record) in batch.updated.iter().enumerate() {
        check(record, &format!("{at}.updated[{i}]"), details);
    }
    for (i, id) in batch.deleted.iter().enumerate() {
        if id.is_empty() {
            details.push(format!("{at}.deleted[{i}] must not be empty"));
        }
    }
}

/// Checks a whole sync request.
///
/// # Errors
///
/// Returns [`ProtocolError::Invalid`] listing every problem if the batch
/// carries more than `max_records` records and IDs, or any record is
/// malformed.
pub fn validate_sync_request(request: &SyncRequest, max_records: usize) -> ProtocolResult<()> {
    let mut details = Vec::new();

    let total = request.changes.len();
    if total > max_records {
        details.push(format!(
            "changes carry {total} records and ids, more than the limit of {max_records}"
        ));
    }
    if let Some(batch) = &request.changes.transactions {
        validate_batch(batch, "changes.transactions", validate_transaction, &mut details);
    }
    if let Some(batch) = &request.changes.loans {
        validate_batch(batch, "changes.loans", validate_loan, &mut details);
    }

    if details.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::Invalid { details })
    }
}
