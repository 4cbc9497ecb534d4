use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::Serialize;
use std::io::Write;

pub const MEMBER_STATUS_ACTIVE: &str = "active";

/// Ledger entry categories. Stored as text, but the set is closed:
/// rows carrying any other string fail to load instead of being
/// silently misclassified by substring matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize)]
#[diesel(sql_type = Text)]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    Transfer,
    #[serde(rename = "Level Benefits")]
    LevelBenefit,
    #[serde(rename = "Repayment Commission")]
    RepaymentCommission,
    #[serde(rename = "Reward Loan Request")]
    LoanIssue,
    #[serde(rename = "Loan Repayment")]
    LoanRepayment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "Deposit",
            EntryKind::Withdrawal => "Withdrawal",
            EntryKind::Transfer => "Transfer",
            EntryKind::LevelBenefit => "Level Benefits",
            EntryKind::RepaymentCommission => "Repayment Commission",
            EntryKind::LoanIssue => "Reward Loan Request",
            EntryKind::LoanRepayment => "Loan Repayment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Deposit" => Some(EntryKind::Deposit),
            "Withdrawal" => Some(EntryKind::Withdrawal),
            "Transfer" => Some(EntryKind::Transfer),
            "Level Benefits" => Some(EntryKind::LevelBenefit),
            "Repayment Commission" => Some(EntryKind::RepaymentCommission),
            "Reward Loan Request" => Some(EntryKind::LoanIssue),
            "Loan Repayment" => Some(EntryKind::LoanRepayment),
            _ => None,
        }
    }

    /// Loan principal and its repayments move through a separate bucket
    /// and never count toward the withdrawable wallet balance.
    pub fn is_loan_related(&self) -> bool {
        matches!(self, EntryKind::LoanIssue | EntryKind::LoanRepayment)
    }
}

impl ToSql<Text, Pg> for EntryKind {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for EntryKind {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = std::str::from_utf8(bytes.as_bytes())?;
        EntryKind::parse(value)
            .ok_or_else(|| format!("unrecognized ledger entry type: {value}").into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize)]
#[diesel(sql_type = Text)]
pub enum EntryStatus {
    Pending,
    Processing,
    Approved,
    Completed,
    Failed,
    Rejected,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "Pending",
            EntryStatus::Processing => "Processing",
            EntryStatus::Approved => "Approved",
            EntryStatus::Completed => "Completed",
            EntryStatus::Failed => "Failed",
            EntryStatus::Rejected => "Rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(EntryStatus::Pending),
            "Processing" => Some(EntryStatus::Processing),
            "Approved" => Some(EntryStatus::Approved),
            "Completed" => Some(EntryStatus::Completed),
            "Failed" => Some(EntryStatus::Failed),
            "Rejected" => Some(EntryStatus::Rejected),
            _ => None,
        }
    }
}

impl ToSql<Text, Pg> for EntryStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for EntryStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = std::str::from_utf8(bytes.as_bytes())?;
        EntryStatus::parse(value)
            .ok_or_else(|| format!("unrecognized ledger entry status: {value}").into())
    }
}

/// Repayment progress of an approved reward loan, tracked on the loan
/// issue entry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize)]
#[diesel(sql_type = Text)]
pub enum RepaymentStatus {
    Unpaid,
    #[serde(rename = "Partially Paid")]
    PartiallyPaid,
    Paid,
}

impl RepaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepaymentStatus::Unpaid => "Unpaid",
            RepaymentStatus::PartiallyPaid => "Partially Paid",
            RepaymentStatus::Paid => "Paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Unpaid" => Some(RepaymentStatus::Unpaid),
            "Partially Paid" => Some(RepaymentStatus::PartiallyPaid),
            "Paid" => Some(RepaymentStatus::Paid),
            _ => None,
        }
    }
}

impl ToSql<Text, Pg> for RepaymentStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for RepaymentStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = std::str::from_utf8(bytes.as_bytes())?;
        RepaymentStatus::parse(value)
            .ok_or_else(|| format!("unrecognized repayment status: {value}").into())
    }
}

#[derive(Queryable, Clone)]
pub struct Member {
    pub member_id: String,
    pub name: Option<String>,
    pub contact_no: Option<String>,
    pub sponsor_id: Option<String>,
    pub status: String,
    pub package: Option<String>,
    pub direct_referrals: Vec<String>,
    pub total_team: i32,
    pub loan_status: Option<String>,
    pub kyc_status: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Member {
    pub fn is_active(&self) -> bool {
        self.status == MEMBER_STATUS_ACTIVE
    }
}

#[derive(Queryable)]
pub struct LedgerEntry {
    pub id: i64,
    pub member_id: String,
    pub entry_date: NaiveDateTime,
    pub entry_type: EntryKind,
    pub description: Option<String>,
    pub reference_no: Option<String>,
    pub credit: BigDecimal,
    pub debit: BigDecimal,
    pub status: EntryStatus,
    pub level: Option<i32>,
    pub benefit_type: Option<String>,
    pub related_member_id: Option<String>,
    pub related_payout_id: Option<i64>,
    pub net_amount: Option<BigDecimal>,
    pub deduction: Option<BigDecimal>,
    pub repayment_status: Option<RepaymentStatus>,
    pub loan_id: Option<i64>,
    pub requested_amount: Option<BigDecimal>,
    pub payment_details: Option<serde_json::Value>,
    pub webhook_processed: bool,
    pub webhook_processed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable)]
pub struct Payout {
    pub id: i64,
    pub payout_date: NaiveDate,
    pub member_id: String,
    pub payout_type: String,
    pub ref_no: Option<String>,
    pub amount: BigDecimal,
    pub level: i32,
    pub sponsored_member_id: String,
    pub sponsor_id: String,
    pub status: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable)]
pub struct PaymentOrder {
    pub order_id: String,
    pub member_id: String,
    pub session_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::ledger_entry)]
pub struct NewLedgerEntry {
    pub id: i64,
    pub member_id: String,
    pub entry_date: NaiveDateTime,
    pub entry_type: EntryKind,
    pub description: Option<String>,
    pub reference_no: Option<String>,
    pub credit: BigDecimal,
    pub debit: BigDecimal,
    pub status: EntryStatus,
    pub level: Option<i32>,
    pub benefit_type: Option<String>,
    pub related_member_id: Option<String>,
    pub related_payout_id: Option<i64>,
    pub net_amount: Option<BigDecimal>,
    pub deduction: Option<BigDecimal>,
    pub repayment_status: Option<RepaymentStatus>,
    pub loan_id: Option<i64>,
    pub requested_amount: Option<BigDecimal>,
    pub webhook_processed: bool,
    pub created_at: NaiveDateTime,
}

impl NewLedgerEntry {
    /// Zeroed entry for `id` and `member_id`, to be filled in with
    /// struct update syntax at the call site.
    pub fn base(id: i64, member_id: &str, entry_type: EntryKind, status: EntryStatus) -> Self {
        let now = chrono::Utc::now().naive_utc();
        NewLedgerEntry {
            id,
            member_id: member_id.to_string(),
            entry_date: now,
            entry_type,
            description: None,
            reference_no: None,
            credit: BigDecimal::from(0),
            debit: BigDecimal::from(0),
            status,
            level: None,
            benefit_type: None,
            related_member_id: None,
            related_payout_id: None,
            net_amount: None,
            deduction: None,
            repayment_status: None,
            loan_id: None,
            requested_amount: None,
            webhook_processed: false,
            created_at: now,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::payout)]
pub struct NewPayout {
    pub id: i64,
    pub payout_date: NaiveDate,
    pub member_id: String,
    pub payout_type: String,
    pub ref_no: Option<String>,
    pub amount: BigDecimal,
    pub level: i32,
    pub sponsored_member_id: String,
    pub sponsor_id: String,
    pub status: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::payment_order)]
pub struct NewPaymentOrder {
    pub order_id: String,
    pub member_id: String,
    pub session_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[cfg(test)]
#[derive(Insertable)]
#[diesel(table_name = crate::schema::member)]
pub struct NewMember {
    pub member_id: String,
    pub name: Option<String>,
    pub sponsor_id: Option<String>,
    pub status: String,
    pub direct_referrals: Vec<String>,
    pub total_team: i32,
    pub loan_status: Option<String>,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
impl NewMember {
    pub fn active(member_id: &str, sponsor_id: Option<&str>) -> Self {
        NewMember {
            member_id: member_id.to_string(),
            name: Some(format!("Member {member_id}")),
            sponsor_id: sponsor_id.map(str::to_string),
            status: MEMBER_STATUS_ACTIVE.to_string(),
            direct_referrals: Vec::new(),
            total_team: 0,
            loan_status: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_kind_round_trips_through_storage_strings() {
        let kinds = [
            EntryKind::Deposit,
            EntryKind::Withdrawal,
            EntryKind::Transfer,
            EntryKind::LevelBenefit,
            EntryKind::RepaymentCommission,
            EntryKind::LoanIssue,
            EntryKind::LoanRepayment,
        ];
        for kind in kinds {
            assert_eq!(EntryKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntryKind::parse("Loan Adjustment"), None);
        assert_eq!(EntryKind::parse("level benefits"), None);
    }

    #[test]
    fn loan_related_kinds_cover_issue_and_repayment_only() {
        assert!(EntryKind::LoanIssue.is_loan_related());
        assert!(EntryKind::LoanRepayment.is_loan_related());
        assert!(!EntryKind::RepaymentCommission.is_loan_related());
        assert!(!EntryKind::Withdrawal.is_loan_related());
        assert!(!EntryKind::LevelBenefit.is_loan_related());
    }

    #[test]
    fn status_parsing_rejects_unknown_values() {
        assert_eq!(EntryStatus::parse("Approved"), Some(EntryStatus::Approved));
        assert_eq!(EntryStatus::parse("approved"), None);
        assert_eq!(EntryStatus::parse("Paid"), None);
        assert_eq!(
            RepaymentStatus::parse("Partially Paid"),
            Some(RepaymentStatus::PartiallyPaid)
        );
        assert_eq!(RepaymentStatus::parse("PartiallyPaid"), None);
    }
}
