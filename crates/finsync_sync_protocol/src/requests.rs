//! Bodies of the direct record endpoints.

use crate::error::{ProtocolError, ProtocolResult};
use finsync_core::{Loan, Timestamp, Transaction};
use serde::{Deserialize, Serialize};

fn finish(details: Vec<String>) -> ProtocolResult<()> {
    if details.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::Invalid { details })
    }
}

/// Body of `POST /api/transactions`. The server assigns the ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    /// Positive amount.
    pub amount: f64,
    /// Category label.
    pub category: String,
    /// Optional note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// ISO date.
    pub date: String,
    /// Income or expense.
    pub is_income: bool,
}

impl NewTransaction {
    /// Checks the body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Invalid`] for a non-positive amount or an
    /// unreadable date.
    pub fn validate(&self) -> ProtocolResult<()> {
        let mut details = Vec::new();
        if !(self.amount.is_finite() && self.amount > 0.0) {
            details.push("amount must be a positive number".to_string());
        }
        if Timestamp::parse(&self.date).is_err() {
            details.push(format!("date is not an ISO-8601 date: {:?}", self.date));
        }
        finish(details)
    }
}

/// Body of `POST /api/loans`. The server assigns the ID and computes the
/// installment, total interest and payment schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLoan {
    /// Display name.
    pub name: String,
    /// Positive principal.
    pub principal: f64,
    /// Annual rate in percent, zero or more.
    pub interest_rate: f64,
    /// Number of installments, at least one.
    pub duration_months: u32,
    /// ISO date of the first installment month.
    pub start_date: String,
}

impl NewLoan {
    /// Checks the body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Invalid`] listing every bad field.
    pub fn validate(&self) -> ProtocolResult<()> {
        let mut details = Vec::new();
        if !(self.principal.is_finite() && self.principal > 0.0) {
            details.push("principal must be a positive number".to_string());
        }
        if !(self.interest_rate.is_finite() && self.interest_rate >= 0.0) {
            details.push("interestRate must be zero or more".to_string());
        }
        if self.duration_months == 0 {
            details.push("durationMonths must be at least 1".to_string());
        }
        if Timestamp::parse(&self.start_date).is_err() {
            details.push(format!(
                "startDate is not an ISO-8601 date: {:?}",
                self.start_date
            ));
        }
        finish(details)
    }
}

/// Body of `POST /api/loans/{id}/pay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayInstallment {
    /// 1-based installment to mark paid.
    pub month_number: u32,
}

impl PayInstallment {
    /// Checks the body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Invalid`] for month zero.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.month_number == 0 {
            return Err(ProtocolError::invalid("monthNumber must be at least 1"));
        }
        Ok(())
    }
}

/// `{ "transaction": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionBody {
    /// The stored transaction.
    pub transaction: Transaction,
}

/// `{ "loan": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanBody {
    /// The stored loan.
    pub loan: Loan,
}

/// `{ "transactions": [...] }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionList {
    /// Live transactions, newest date first.
    pub transactions: Vec<Transaction>,
}

/// `{ "loans": [...] }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanList {
    /// Live loans.
    pub loans: Vec<Loan>,
}

/// `{ "success": true }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAck {
    /// Always true on a 200 response.
    pub success: bool,
}
