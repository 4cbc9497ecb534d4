use crate::database::models::{EntryKind, EntryStatus, LedgerEntry, Member, PaymentOrder, Payout};
use bigdecimal::BigDecimal;
use diesel::{result::Error, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

pub fn find_member(conn: &mut PgConnection, req_member_id: &str) -> Result<Option<Member>, Error> {
    use crate::schema::member::dsl::*;
    member
        .filter(member_id.eq(req_member_id))
        .first::<Member>(conn)
        .optional()
}

// direct downline of a set of members, one sponsorship level down
pub fn members_sponsored_by(conn: &mut PgConnection, sponsor_ids: &[String]) -> Result<Vec<Member>, Error> {
    use crate::schema::member::dsl::*;
    member.filter(sponsor_id.eq_any(sponsor_ids)).load::<Member>(conn)
}

// full ledger of a member, oldest first, entry id as tiebreaker
pub fn member_entries(conn: &mut PgConnection, req_member_id: &str) -> Result<Vec<LedgerEntry>, Error> {
    use crate::schema::ledger_entry::dsl::*;
    ledger_entry
        .filter(member_id.eq(req_member_id))
        .order((entry_date.asc(), id.asc()))
        .load::<LedgerEntry>(conn)
}

pub fn find_entry_by_reference(
    conn: &mut PgConnection,
    reference: &str,
) -> Result<Option<LedgerEntry>, Error> {
    use crate::schema::ledger_entry::dsl::*;
    ledger_entry
        .filter(reference_no.eq(reference))
        .order(id.desc())
        .first::<LedgerEntry>(conn)
        .optional()
}

pub fn find_entry_for_update(
    conn: &mut PgConnection,
    entry_id: i64,
) -> Result<Option<LedgerEntry>, Error> {
    use crate::schema::ledger_entry::dsl::*;
    ledger_entry
        .filter(id.eq(entry_id))
        .for_update()
        .first::<LedgerEntry>(conn)
        .optional()
}

// newest reward loan entry in the given status, locked until the
// surrounding transaction commits
pub fn latest_loan_for_update(
    conn: &mut PgConnection,
    req_member_id: &str,
    loan_status: EntryStatus,
) -> Result<Option<LedgerEntry>, Error> {
    use crate::schema::ledger_entry::dsl::*;
    ledger_entry
        .filter(member_id.eq(req_member_id))
        .filter(entry_type.eq(EntryKind::LoanIssue))
        .filter(status.eq(loan_status))
        .order(id.desc())
        .for_update()
        .first::<LedgerEntry>(conn)
        .optional()
}

// approved reward loan that still carries an outstanding due amount
pub fn unpaid_approved_loan(
    conn: &mut PgConnection,
    req_member_id: &str,
) -> Result<Option<LedgerEntry>, Error> {
    use crate::schema::ledger_entry::dsl::*;
    ledger_entry
        .filter(member_id.eq(req_member_id))
        .filter(entry_type.eq(EntryKind::LoanIssue))
        .filter(status.eq(EntryStatus::Approved))
        .filter(net_amount.gt(BigDecimal::from(0)))
        .order(id.desc())
        .first::<LedgerEntry>(conn)
        .optional()
}

// newest settled repayment of a member, used by the withdrawal gate
pub fn latest_settled_repayment(
    conn: &mut PgConnection,
    req_member_id: &str,
) -> Result<Option<LedgerEntry>, Error> {
    use crate::schema::ledger_entry::dsl::*;
    ledger_entry
        .filter(member_id.eq(req_member_id))
        .filter(entry_type.eq(EntryKind::LoanRepayment))
        .filter(status.eq_any([EntryStatus::Completed, EntryStatus::Approved]))
        .order(entry_date.desc())
        .first::<LedgerEntry>(conn)
        .optional()
}

// gateway repayments reserved against a loan but not yet settled
pub fn pending_repayments(conn: &mut PgConnection, req_loan_id: i64) -> Result<Vec<LedgerEntry>, Error> {
    use crate::schema::ledger_entry::dsl::*;
    ledger_entry
        .filter(loan_id.eq(req_loan_id))
        .filter(entry_type.eq(EntryKind::LoanRepayment))
        .filter(status.eq(EntryStatus::Pending))
        .load::<LedgerEntry>(conn)
}

pub fn loans_in_status(
    conn: &mut PgConnection,
    loan_status: EntryStatus,
) -> Result<Vec<LedgerEntry>, Error> {
    use crate::schema::ledger_entry::dsl::*;
    ledger_entry
        .filter(entry_type.eq(EntryKind::LoanIssue))
        .filter(status.eq(loan_status))
        .order(entry_date.desc())
        .load::<LedgerEntry>(conn)
}

pub fn member_payouts(conn: &mut PgConnection, req_member_id: &str) -> Result<Vec<Payout>, Error> {
    use crate::schema::payout::dsl::*;
    payout
        .filter(member_id.eq(req_member_id))
        .order(created_at.desc())
        .load::<Payout>(conn)
}

pub fn find_order(conn: &mut PgConnection, req_order_id: &str) -> Result<Option<PaymentOrder>, Error> {
    use crate::schema::payment_order::dsl::*;
    payment_order
        .filter(order_id.eq(req_order_id))
        .first::<PaymentOrder>(conn)
        .optional()
}
