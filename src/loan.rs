use bigdecimal::BigDecimal;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::database::idgen;
use crate::database::models::{
    EntryKind, EntryStatus, LedgerEntry, NewLedgerEntry, RepaymentStatus,
};
use crate::database::queries;
use crate::error::ServiceError;
use crate::responses::money;

/// Fixed principal of the reward loan programme.
pub const LOAN_PRINCIPAL: i64 = 5000;

pub const LOAN_STATUS_PROCESSING: &str = "Processing";
pub const LOAN_STATUS_APPROVED: &str = "Approved";
pub const LOAN_STATUS_REJECTED: &str = "Rejected";
pub const LOAN_STATUS_REPAID: &str = "Repaid";

#[derive(Serialize)]
pub struct LoanReceipt {
    pub member_id: String,
    pub entry_id: i64,
    pub reference: String,
    pub amount: String,
    pub status: EntryStatus,
}

/// Opens a reward loan claim. The member's loan flag is flipped to
/// Processing with a conditional update, so two racing claims cannot
/// both produce a claim entry.
pub fn request_loan(conn: &mut PgConnection, req_member_id: &str) -> Result<LoanReceipt, ServiceError> {
    let member = queries::find_member(conn, req_member_id)?
        .ok_or_else(|| ServiceError::not_found(format!("member {req_member_id} not found")))?;

    conn.transaction::<_, ServiceError, _>(|conn| {
        use crate::schema::member::dsl;
        let claimed = diesel::update(
            dsl::member
                .filter(dsl::member_id.eq(&member.member_id))
                .filter(dsl::loan_status.is_distinct_from(LOAN_STATUS_PROCESSING)),
        )
        .set(dsl::loan_status.eq(LOAN_STATUS_PROCESSING))
        .execute(conn)?;
        if claimed == 0 {
            return Err(ServiceError::conflict(format!(
                "member {} already has a reward loan claim under review",
                member.member_id
            )));
        }

        let entry_id = idgen::next();
        let reference = idgen::loan_reference();
        let principal = BigDecimal::from(LOAN_PRINCIPAL);
        let mut entry = NewLedgerEntry::base(
            entry_id,
            &member.member_id,
            EntryKind::LoanIssue,
            EntryStatus::Processing,
        );
        entry.credit = principal.clone();
        entry.reference_no = Some(reference.clone());
        entry.benefit_type = Some("loan".to_string());
        entry.description = Some(format!("Reward loan claim of {}", money(&principal)));
        diesel::insert_into(crate::schema::ledger_entry::table)
            .values(&entry)
            .execute(conn)?;

        info!(member_id = member.member_id.as_str(), entry_id, "reward loan claim opened");
        Ok(LoanReceipt {
            member_id: member.member_id.clone(),
            entry_id,
            reference,
            amount: money(&principal),
            status: EntryStatus::Processing,
        })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanDecision {
    Approve,
    Reject,
}

impl LoanDecision {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approve" => Some(LoanDecision::Approve),
            "reject" => Some(LoanDecision::Reject),
            _ => None,
        }
    }
}

#[derive(Serialize)]
pub struct LoanDecisionReceipt {
    pub member_id: String,
    pub entry_id: i64,
    pub reference: Option<String>,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_amount: Option<String>,
}

/// Settles a claim under review. Approval opens the due amount at the
/// full principal and marks it Unpaid; rejection closes the claim.
/// The claim row stays locked until the transaction commits.
pub fn decide_loan(
    conn: &mut PgConnection,
    req_member_id: &str,
    decision: LoanDecision,
) -> Result<LoanDecisionReceipt, ServiceError> {
    conn.transaction::<_, ServiceError, _>(|conn| {
        let loan = queries::latest_loan_for_update(conn, req_member_id, EntryStatus::Processing)?
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "no reward loan claim under review for member {req_member_id}"
                ))
            })?;

        use crate::schema::ledger_entry::dsl as entry_dsl;
        use crate::schema::member::dsl as member_dsl;

        let receipt = match decision {
            LoanDecision::Approve => {
                let principal = loan.credit.clone();
                diesel::update(entry_dsl::ledger_entry.filter(entry_dsl::id.eq(loan.id)))
                    .set((
                        entry_dsl::status.eq(EntryStatus::Approved),
                        entry_dsl::net_amount.eq(Some(principal.clone())),
                        entry_dsl::repayment_status.eq(Some(RepaymentStatus::Unpaid)),
                    ))
                    .execute(conn)?;
                diesel::update(member_dsl::member.filter(member_dsl::member_id.eq(req_member_id)))
                    .set(member_dsl::loan_status.eq(LOAN_STATUS_APPROVED))
                    .execute(conn)?;
                LoanDecisionReceipt {
                    member_id: loan.member_id.clone(),
                    entry_id: loan.id,
                    reference: loan.reference_no.clone(),
                    status: EntryStatus::Approved,
                    due_amount: Some(money(&principal)),
                }
            }
            LoanDecision::Reject => {
                diesel::update(entry_dsl::ledger_entry.filter(entry_dsl::id.eq(loan.id)))
                    .set(entry_dsl::status.eq(EntryStatus::Rejected))
                    .execute(conn)?;
                diesel::update(member_dsl::member.filter(member_dsl::member_id.eq(req_member_id)))
                    .set(member_dsl::loan_status.eq(LOAN_STATUS_REJECTED))
                    .execute(conn)?;
                LoanDecisionReceipt {
                    member_id: loan.member_id.clone(),
                    entry_id: loan.id,
                    reference: loan.reference_no.clone(),
                    status: EntryStatus::Rejected,
                    due_amount: None,
                }
            }
        };
        Ok(receipt)
    })
}

/// Due amount of an approved loan right now: the recorded net amount
/// minus gateway repayments that are reserved but not yet settled.
pub fn current_due(conn: &mut PgConnection, loan: &LedgerEntry) -> Result<BigDecimal, ServiceError> {
    let base = loan
        .net_amount
        .clone()
        .unwrap_or_else(|| loan.credit.clone());
    let reserved = queries::pending_repayments(conn, loan.id)?
        .into_iter()
        .fold(BigDecimal::from(0), |acc, entry| {
            acc + entry.requested_amount.unwrap_or(entry.debit)
        });
    Ok(base - reserved)
}

/// Amount actually applied from a repayment and the due that remains.
/// Overpayment is clamped to the open due, the remainder never drops
/// below zero.
pub fn apply_repayment(due: &BigDecimal, requested: &BigDecimal) -> (BigDecimal, BigDecimal) {
    let applied = requested.clone().min(due.clone());
    let remaining = due - &applied;
    (applied, remaining)
}

pub fn repayment_status_for(remaining: &BigDecimal) -> RepaymentStatus {
    if remaining <= &BigDecimal::from(0) {
        RepaymentStatus::Paid
    } else {
        RepaymentStatus::PartiallyPaid
    }
}

#[derive(Serialize)]
pub struct RepaymentReceipt {
    pub member_id: String,
    pub loan_id: i64,
    pub entry_id: i64,
    pub requested: String,
    pub applied: String,
    pub remaining_due: String,
    pub repayment_status: RepaymentStatus,
}

/// Manual repayment against the newest approved loan. Records the
/// settled debit, walks the due amount down and flips the member's
/// loan flag once the due reaches zero.
pub fn repay_loan(
    conn: &mut PgConnection,
    req_member_id: &str,
    amount: BigDecimal,
) -> Result<RepaymentReceipt, ServiceError> {
    if amount <= BigDecimal::from(0) {
        return Err(ServiceError::validation("repayment amount must be positive"));
    }

    conn.transaction::<_, ServiceError, _>(|conn| {
        let loan = queries::latest_loan_for_update(conn, req_member_id, EntryStatus::Approved)?
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "no approved reward loan for member {req_member_id}"
                ))
            })?;
        let due = current_due(conn, &loan)?;
        if due <= BigDecimal::from(0) {
            return Err(ServiceError::conflict("reward loan is already fully repaid"));
        }

        let (applied, remaining) = apply_repayment(&due, &amount);
        let status_after = repayment_status_for(&remaining);

        let entry_id = idgen::next();
        let mut entry = NewLedgerEntry::base(
            entry_id,
            req_member_id,
            EntryKind::LoanRepayment,
            EntryStatus::Completed,
        );
        entry.debit = applied.clone();
        entry.loan_id = Some(loan.id);
        entry.reference_no = loan.reference_no.clone();
        entry.requested_amount = Some(applied.clone());
        entry.benefit_type = Some("repayment".to_string());
        entry.description = Some(format!(
            "Loan repayment of {}, remaining due {}",
            money(&applied),
            money(&remaining)
        ));
        diesel::insert_into(crate::schema::ledger_entry::table)
            .values(&entry)
            .execute(conn)?;

        use crate::schema::ledger_entry::dsl as entry_dsl;
        diesel::update(entry_dsl::ledger_entry.filter(entry_dsl::id.eq(loan.id)))
            .set((
                entry_dsl::net_amount.eq(Some(remaining.clone())),
                entry_dsl::repayment_status.eq(Some(status_after)),
            ))
            .execute(conn)?;

        if status_after == RepaymentStatus::Paid {
            use crate::schema::member::dsl as member_dsl;
            diesel::update(
                member_dsl::member
                    .filter(member_dsl::member_id.eq(req_member_id))
                    .filter(member_dsl::loan_status.eq(LOAN_STATUS_APPROVED)),
            )
            .set(member_dsl::loan_status.eq(LOAN_STATUS_REPAID))
            .execute(conn)?;
        }

        Ok(RepaymentReceipt {
            member_id: req_member_id.to_string(),
            loan_id: loan.id,
            entry_id,
            requested: money(&amount),
            applied: money(&applied),
            remaining_due: money(&remaining),
            repayment_status: status_after,
        })
    })
}

/// Applies a gateway-settled repayment entry to its loan. Runs inside
/// the settlement transaction; the loan row is locked first. Returns
/// false when the entry carries no usable loan reference.
pub fn apply_settled_repayment(
    conn: &mut PgConnection,
    payment: &LedgerEntry,
) -> Result<bool, ServiceError> {
    let Some(target_loan_id) = payment.loan_id else {
        warn!(entry_id = payment.id, "settled repayment has no loan reference, nothing to apply");
        return Ok(false);
    };
    let Some(loan) = queries::find_entry_for_update(conn, target_loan_id)? else {
        warn!(loan_id = target_loan_id, "loan entry behind a settled repayment is missing");
        return Ok(false);
    };

    let applied = payment
        .requested_amount
        .clone()
        .unwrap_or_else(|| payment.debit.clone());
    let base = loan
        .net_amount
        .clone()
        .unwrap_or_else(|| loan.credit.clone());
    let remaining = (&base - &applied).max(BigDecimal::from(0));
    let status_after = repayment_status_for(&remaining);

    use crate::schema::ledger_entry::dsl as entry_dsl;
    diesel::update(entry_dsl::ledger_entry.filter(entry_dsl::id.eq(loan.id)))
        .set((
            entry_dsl::net_amount.eq(Some(remaining.clone())),
            entry_dsl::repayment_status.eq(Some(status_after)),
        ))
        .execute(conn)?;

    if status_after == RepaymentStatus::Paid {
        use crate::schema::member::dsl as member_dsl;
        diesel::update(
            member_dsl::member
                .filter(member_dsl::member_id.eq(&loan.member_id))
                .filter(member_dsl::loan_status.eq(LOAN_STATUS_APPROVED)),
        )
        .set(member_dsl::loan_status.eq(LOAN_STATUS_REPAID))
        .execute(conn)?;
    }

    info!(
        loan_id = loan.id,
        member_id = loan.member_id.as_str(),
        "reward loan walked down to {} on settled repayment",
        money(&remaining)
    );
    Ok(true)
}

#[derive(Serialize)]
pub struct LoanView {
    pub id: i64,
    pub member_id: String,
    pub amount: String,
    pub status: EntryStatus,
    pub repayment_status: Option<RepaymentStatus>,
    pub due_amount: Option<String>,
    pub reference: Option<String>,
    pub requested_at: String,
}

#[derive(Serialize)]
pub struct LoanList {
    pub total: usize,
    pub loans: Vec<LoanView>,
}

pub fn loans_by_status(conn: &mut PgConnection, status_value: &str) -> Result<LoanList, ServiceError> {
    let status = EntryStatus::parse(status_value).ok_or_else(|| {
        ServiceError::validation(format!("unknown loan status filter: {status_value}"))
    })?;
    let loans = queries::loans_in_status(conn, status)?
        .into_iter()
        .map(|loan| LoanView {
            id: loan.id,
            member_id: loan.member_id,
            amount: money(&loan.credit),
            status: loan.status,
            repayment_status: loan.repayment_status,
            due_amount: loan.net_amount.as_ref().map(money),
            reference: loan.reference_no,
            requested_at: loan.entry_date.to_string(),
        })
        .collect::<Vec<_>>();
    Ok(LoanList {
        total: loans.len(),
        loans,
    })
}
