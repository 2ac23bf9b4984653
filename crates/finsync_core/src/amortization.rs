//! Loan amortization helpers.
//!
//! Pure functions used when the server creates a loan; not involved in
//! conflict resolution.

use crate::record::{Loan, LoanPayment};
use crate::types::Timestamp;
use chrono::{Months, NaiveDate};

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Equated monthly installment for `principal` at `annual_rate` percent over
/// `months` months, rounded to cents.
///
/// A zero rate divides the principal evenly. Zero months yields zero.
#[must_use]
pub fn calculate_emi(principal: f64, annual_rate: f64, months: u32) -> f64 {
    if months == 0 {
        return 0.0;
    }
    let n = f64::from(months);
    let monthly_rate = annual_rate / 12.0 / 100.0;
    if monthly_rate == 0.0 {
        return round_cents(principal / n);
    }
    let growth = (1.0 + monthly_rate).powf(n);
    round_cents(principal * monthly_rate * growth / (growth - 1.0))
}

/// Total interest paid over the loan, rounded to cents.
#[must_use]
pub fn calculate_total_interest(principal: f64, emi: f64, months: u32) -> f64 {
    round_cents(emi * f64::from(months) - principal)
}

/// An unpaid ledger with one entry per month, numbered from 1.
#[must_use]
pub fn payment_schedule(months: u32) -> Vec<LoanPayment> {
    (1..=months).map(LoanPayment::unpaid).collect()
}

/// `YYYY-MM` bucket for an ISO date or timestamp.
#[must_use]
pub fn month_key(date: &str) -> Option<String> {
    let dt = Timestamp::parse(date).ok()?.to_datetime()?;
    Some(dt.format("%Y-%m").to_string())
}

/// Due date of the first unpaid installment, or `None` when the loan is
/// paid off or its start date is unreadable.
#[must_use]
pub fn next_due_date(loan: &Loan) -> Option<NaiveDate> {
    let next = loan
        .payments
        .iter()
        .filter(|p| !p.is_paid)
        .map(|p| p.month_number)
        .min()?;
    let start = Timestamp::parse(&loan.start_date).ok()?.to_datetime()?.date_naive();
    start.checked_add_months(Months::new(next.saturating_sub(1)))
}
