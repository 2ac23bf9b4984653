//! The synced record types.
//!
//! Records are flat, fully-replaced values: every store write carries the
//! whole record, never a field patch.

use crate::types::{RecordId, RecordType, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// An income or expense entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Client-generated identifier.
    pub id: RecordId,
    /// Owner. Overwritten from the authenticated principal on the server.
    #[serde(default)]
    pub user_id: UserId,
    /// Amount in the user's currency.
    pub amount: f64,
    /// Free-form category label.
    pub category: String,
    /// Optional note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// ISO date of the transaction.
    pub date: String,
    /// `YYYY-MM` bucket derived from `date`.
    #[serde(default)]
    pub month_key: String,
    /// True for income, false for expense.
    pub is_income: bool,
    /// Set once, when the record is first stored.
    pub created_at: Timestamp,
    /// Advanced on every accepted mutation.
    pub updated_at: Timestamp,
}

impl Transaction {
    /// Creates an expense with epoch stamps and a derived `monthKey`.
    #[must_use]
    pub fn new(id: RecordId, amount: f64, category: impl Into<String>, date: impl Into<String>) -> Self {
        let date = date.into();
        Self {
            id,
            user_id: UserId::default(),
            amount,
            category: category.into(),
            note: None,
            month_key: crate::amortization::month_key(&date).unwrap_or_default(),
            date,
            is_income: false,
            created_at: Timestamp::EPOCH,
            updated_at: Timestamp::EPOCH,
        }
    }
}

/// One installment in a loan's payment ledger.
///
/// Embedded in its [`Loan`]; not addressable on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanPayment {
    /// 1-based month index, unique within the loan.
    pub month_number: u32,
    /// Only ever moves from false to true.
    pub is_paid: bool,
    /// Set exactly once, when `is_paid` becomes true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_date: Option<Timestamp>,
}

impl LoanPayment {
    /// An unpaid installment.
    #[must_use]
    pub const fn unpaid(month_number: u32) -> Self {
        Self {
            month_number,
            is_paid: false,
            paid_date: None,
        }
    }
}

/// An installment loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    /// Client-generated identifier.
    pub id: RecordId,
    /// Owner. Overwritten from the authenticated principal on the server.
    #[serde(default)]
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Amount borrowed.
    pub principal: f64,
    /// Annual interest rate in percent.
    pub interest_rate: f64,
    /// Number of monthly installments.
    pub duration_months: u32,
    /// ISO date of the first installment month.
    pub start_date: String,
    /// Monthly installment.
    pub emi_amount: f64,
    /// Interest paid over the life of the loan.
    pub total_interest: f64,
    /// Payment ledger, one entry per month.
    #[serde(default)]
    pub payments: Vec<LoanPayment>,
    /// Set once, when the record is first stored.
    pub created_at: Timestamp,
    /// Advanced on every accepted mutation.
    pub updated_at: Timestamp,
}

impl Loan {
    /// Returns the ledger entry for `month_number`.
    #[must_use]
    pub fn payment(&self, month_number: u32) -> Option<&LoanPayment> {
        self.payments.iter().find(|p| p.month_number == month_number)
    }

    /// Folds the paid state of a previously stored version into this one.
    ///
    /// A month paid in `stored` stays paid and keeps its first `paidDate`,
    /// even if this version lists it as unpaid or leaves it out.
    pub fn absorb_paid_ledger(&mut self, stored: &Loan) {
        for old in stored.payments.iter().filter(|p| p.is_paid) {
            match self
                .payments
                .iter_mut()
                .find(|p| p.month_number == old.month_number)
            {
                Some(entry) => {
                    entry.is_paid = true;
                    if old.paid_date.is_some() {
                        entry.paid_date = old.paid_date;
                    }
                }
                None => self.payments.push(old.clone()),
            }
        }
        self.payments.sort_by_key(|p| p.month_number);
    }
}

/// A record of any synced type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// A transaction.
    Transaction(Transaction),
    /// A loan.
    Loan(Loan),
}

impl Record {
    /// Returns the record type.
    #[must_use]
    pub const fn record_type(&self) -> RecordType {
        match self {
            Self::Transaction(_) => RecordType::Transaction,
            Self::Loan(_) => RecordType::Loan,
        }
    }

    /// Returns the record ID.
    #[must_use]
    pub fn id(&self) -> &RecordId {
        match self {
            Self::Transaction(t) => &t.id,
            Self::Loan(l) => &l.id,
        }
    }

    /// Returns the owning user.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::Transaction(t) => &t.user_id,
            Self::Loan(l) => &l.user_id,
        }
    }

    /// Sets the owning user.
    pub fn set_user_id(&mut self, user: UserId) {
        match self {
            Self::Transaction(t) => t.user_id = user,
            Self::Loan(l) => l.user_id = user,
        }
    }

    /// Returns `createdAt`.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        match self {
            Self::Transaction(t) => t.created_at,
            Self::Loan(l) => l.created_at,
        }
    }

    /// Returns `updatedAt`.
    #[must_use]
    pub fn updated_at(&self) -> Timestamp {
        match self {
            Self::Transaction(t) => t.updated_at,
            Self::Loan(l) => l.updated_at,
        }
    }

    /// Overwrites both timestamps.
    pub fn set_stamps(&mut self, created_at: Timestamp, updated_at: Timestamp) {
        match self {
            Self::Transaction(t) => {
                t.created_at = created_at;
                t.updated_at = updated_at;
            }
            Self::Loan(l) => {
                l.created_at = created_at;
                l.updated_at = updated_at;
            }
        }
    }

    /// Compares everything except `createdAt` and `updatedAt`.
    #[must_use]
    pub fn same_content(&self, other: &Record) -> bool {
        let mut a = self.clone();
        a.set_stamps(Timestamp::EPOCH, Timestamp::EPOCH);
        let mut b = other.clone();
        b.set_stamps(Timestamp::EPOCH, Timestamp::EPOCH);
        a == b
    }
}

/// Implemented by each concrete record type so wire batches and deltas can
/// be generic over it.
pub trait SyncRecord:
    Clone + std::fmt::Debug + PartialEq + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static
{
    /// The type tag of this record family.
    const RECORD_TYPE: RecordType;

    /// Returns the record ID.
    fn id(&self) -> &RecordId;

    /// Returns `updatedAt`.
    fn updated_at(&self) -> Timestamp;

    /// Wraps the record.
    fn into_record(self) -> Record;

    /// Unwraps a record of this family.
    fn from_record(record: Record) -> Option<Self>;
}

impl SyncRecord for Transaction {
    const RECORD_TYPE: RecordType = RecordType::Transaction;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn into_record(self) -> Record {
        Record::Transaction(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Transaction(t) => Some(t),
            Record::Loan(_) => None,
        }
    }
}

impl SyncRecord for Loan {
    const RECORD_TYPE: RecordType = RecordType::Loan;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn into_record(self) -> Record {
        Record::Loan(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Loan(l) => Some(l),
            Record::Transaction(_) => None,
        }
    }
}
