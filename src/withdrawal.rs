use bigdecimal::BigDecimal;
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::database::idgen;
use crate::database::models::{EntryKind, EntryStatus, LedgerEntry, Member, NewLedgerEntry};
use crate::database::queries;
use crate::error::ServiceError;
use crate::ledger;
use crate::responses::money;

pub const MIN_WITHDRAWAL: i64 = 500;
pub const MAX_WITHDRAWAL: i64 = 1000;
const DEDUCTION_PERCENT: i64 = 15;

/// Most recent Saturday at 00:00 on or before `now`. A Saturday maps
/// to its own midnight.
pub fn last_settlement_cutoff(now: NaiveDateTime) -> NaiveDateTime {
    let weekday = now.date().weekday().num_days_from_sunday();
    let days_back = if weekday == 6 { 0 } else { weekday + 1 };
    (now.date() - Duration::days(days_back as i64)).and_time(NaiveTime::MIN)
}

/// An open loan freezes withdrawals when it predates the settlement
/// cutoff and no settled repayment has landed on or after the cutoff.
pub fn loan_blocks_withdrawal(
    loan: &LedgerEntry,
    last_repayment_at: Option<NaiveDateTime>,
    cutoff: NaiveDateTime,
) -> bool {
    let outstanding = loan
        .net_amount
        .as_ref()
        .map(|due| due > &BigDecimal::from(0))
        .unwrap_or(false);
    let issued_before_cutoff = loan.entry_date < cutoff;
    let repaid_since_cutoff = last_repayment_at.map(|at| at >= cutoff).unwrap_or(false);
    outstanding && issued_before_cutoff && !repaid_since_cutoff
}

pub fn deduction_for(amount: &BigDecimal) -> BigDecimal {
    amount * BigDecimal::new(DEDUCTION_PERCENT.into(), 2)
}

#[derive(Serialize)]
pub struct WithdrawalReceipt {
    pub member_id: String,
    pub entry_id: i64,
    pub gross_amount: String,
    pub deduction: String,
    pub deduction_rate: String,
    pub net_payable: String,
    pub balance_before: String,
    pub balance_after: String,
    pub status: EntryStatus,
}

/// Places a withdrawal request as a pending debit. Bounds first, then
/// the loan gate, then the balance check, all behind a lock on the
/// member row so two racing requests cannot both spend the same
/// balance.
pub fn request_withdrawal(
    conn: &mut PgConnection,
    req_member_id: &str,
    amount: BigDecimal,
) -> Result<WithdrawalReceipt, ServiceError> {
    if amount <= BigDecimal::from(0) {
        return Err(ServiceError::validation("withdrawal amount must be positive"));
    }
    let member = queries::find_member(conn, req_member_id)?
        .ok_or_else(|| ServiceError::not_found(format!("member {req_member_id} not found")))?;
    if amount < BigDecimal::from(MIN_WITHDRAWAL) {
        return Err(ServiceError::validation(format!(
            "minimum withdrawal amount is {MIN_WITHDRAWAL}"
        )));
    }
    if amount > BigDecimal::from(MAX_WITHDRAWAL) {
        return Err(ServiceError::validation(format!(
            "maximum withdrawal amount is {MAX_WITHDRAWAL}"
        )));
    }

    conn.transaction::<_, ServiceError, _>(|conn| {
        {
            use crate::schema::member::dsl;
            dsl::member
                .filter(dsl::member_id.eq(&member.member_id))
                .for_update()
                .first::<Member>(conn)?;
        }

        if let Some(loan) = queries::unpaid_approved_loan(conn, &member.member_id)? {
            let cutoff = last_settlement_cutoff(Utc::now().naive_utc());
            let last_repayment = queries::latest_settled_repayment(conn, &member.member_id)?;
            if loan_blocks_withdrawal(&loan, last_repayment.map(|e| e.entry_date), cutoff) {
                let due = loan.net_amount.clone().unwrap_or_else(|| loan.credit.clone());
                return Err(ServiceError::conflict(format!(
                    "withdrawal blocked: reward loan {} has {} outstanding and no repayment since the last settlement cutoff",
                    loan.reference_no.as_deref().unwrap_or("-"),
                    money(&due)
                )));
            }
        }

        let entries = queries::member_entries(conn, &member.member_id)?;
        let balance_before = ledger::available_balance(&entries);
        if amount > balance_before {
            return Err(ServiceError::conflict(format!(
                "insufficient balance: available {}, requested {}",
                money(&balance_before),
                money(&amount)
            )));
        }

        let deduction = deduction_for(&amount);
        let net_payable = &amount - &deduction;
        let balance_after = &balance_before - &amount;

        let entry_id = idgen::next();
        let mut entry = NewLedgerEntry::base(
            entry_id,
            &member.member_id,
            EntryKind::Withdrawal,
            EntryStatus::Pending,
        );
        entry.debit = amount.clone();
        entry.net_amount = Some(net_payable.clone());
        entry.deduction = Some(deduction.clone());
        entry.description = Some(format!(
            "Withdrawal request of {}, net payable {}",
            money(&amount),
            money(&net_payable)
        ));
        diesel::insert_into(crate::schema::ledger_entry::table)
            .values(&entry)
            .execute(conn)?;

        info!(
            member_id = member.member_id.as_str(),
            entry_id,
            "withdrawal of {} placed, net payable {}",
            money(&amount),
            money(&net_payable)
        );
        Ok(WithdrawalReceipt {
            member_id: member.member_id.clone(),
            entry_id,
            gross_amount: money(&amount),
            deduction: money(&deduction),
            deduction_rate: format!("{DEDUCTION_PERCENT}%"),
            net_payable: money(&net_payable),
            balance_before: money(&balance_before),
            balance_after: money(&balance_after),
            status: EntryStatus::Pending,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn cutoff_lands_on_the_most_recent_saturday_midnight() {
        let saturday_midnight = at(2024, 3, 2, 0);
        assert_eq!(last_settlement_cutoff(at(2024, 3, 2, 15)), saturday_midnight);
        assert_eq!(last_settlement_cutoff(at(2024, 3, 3, 9)), saturday_midnight);
        assert_eq!(last_settlement_cutoff(at(2024, 3, 5, 23)), saturday_midnight);
        assert_eq!(last_settlement_cutoff(at(2024, 3, 8, 1)), saturday_midnight);
        assert_eq!(last_settlement_cutoff(at(2024, 3, 9, 0)), at(2024, 3, 9, 0));
    }

    fn loan(entry_date: NaiveDateTime, due: i64) -> LedgerEntry {
        LedgerEntry {
            id: 7,
            member_id: "M001".to_string(),
            entry_date,
            entry_type: EntryKind::LoanIssue,
            description: None,
            reference_no: Some("RL-7".to_string()),
            credit: BigDecimal::from(5000),
            debit: BigDecimal::from(0),
            status: EntryStatus::Approved,
            level: None,
            benefit_type: None,
            related_member_id: None,
            related_payout_id: None,
            net_amount: Some(BigDecimal::from(due)),
            deduction: None,
            repayment_status: None,
            loan_id: None,
            requested_amount: None,
            payment_details: None,
            webhook_processed: false,
            webhook_processed_at: None,
            created_at: entry_date,
        }
    }

    #[test]
    fn stale_unpaid_loan_blocks_the_withdrawal() {
        let cutoff = at(2024, 3, 2, 0);
        let stale = loan(at(2024, 2, 20, 12), 3000);
        assert!(loan_blocks_withdrawal(&stale, None, cutoff));
    }

    #[test]
    fn repayment_on_or_after_the_cutoff_unblocks() {
        let cutoff = at(2024, 3, 2, 0);
        let stale = loan(at(2024, 2, 20, 12), 3000);
        assert!(!loan_blocks_withdrawal(&stale, Some(at(2024, 3, 2, 0)), cutoff));
        assert!(!loan_blocks_withdrawal(&stale, Some(at(2024, 3, 4, 10)), cutoff));
        assert!(loan_blocks_withdrawal(&stale, Some(at(2024, 3, 1, 10)), cutoff));
    }

    #[test]
    fn fresh_or_settled_loans_do_not_block() {
        let cutoff = at(2024, 3, 2, 0);
        let fresh = loan(at(2024, 3, 3, 12), 3000);
        assert!(!loan_blocks_withdrawal(&fresh, None, cutoff));
        let settled = loan(at(2024, 2, 20, 12), 0);
        assert!(!loan_blocks_withdrawal(&settled, None, cutoff));
    }

    #[test]
    fn deduction_takes_fifteen_percent() {
        assert_eq!(money(&deduction_for(&BigDecimal::from(700))), "105.00");
        assert_eq!(money(&deduction_for(&BigDecimal::from(500))), "75.00");
        assert_eq!(money(&deduction_for(&BigDecimal::from(1000))), "150.00");
    }

    mod db {
        use super::super::*;
        use crate::database;
        use crate::database::models::NewMember;
        use diesel::result::Error;
        use diesel::Connection;
        use std::ops::DerefMut;

        fn seed_deposit(
            conn: &mut PgConnection,
            member_id: &str,
            amount: i64,
        ) -> Result<(), Error> {
            let mut deposit = NewLedgerEntry::base(
                idgen::next(),
                member_id,
                EntryKind::Deposit,
                EntryStatus::Completed,
            );
            deposit.credit = BigDecimal::from(amount);
            diesel::insert_into(crate::schema::ledger_entry::table)
                .values(&deposit)
                .execute(conn)?;
            Ok(())
        }

        #[actix_web::test]
        #[ignore = "requires DATABASE_URL"]
        async fn test_withdrawal_reserves_balance_and_enforces_bounds() {
            dotenvy::dotenv().ok();

            let pool = database::connect::create_db_connection_pool();
            let member_id = "test_withdrawal_flow";

            pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
                diesel::insert_into(crate::schema::member::table)
                    .values(NewMember::active(member_id, None))
                    .execute(conn.deref_mut())?;
                seed_deposit(conn.deref_mut(), member_id, 2000)?;

                let low = request_withdrawal(conn.deref_mut(), member_id, BigDecimal::from(200));
                assert!(matches!(low, Err(ServiceError::Validation(_))));
                let high = request_withdrawal(conn.deref_mut(), member_id, BigDecimal::from(1500));
                assert!(matches!(high, Err(ServiceError::Validation(_))));

                let receipt =
                    request_withdrawal(conn.deref_mut(), member_id, BigDecimal::from(700)).unwrap();
                assert_eq!(receipt.gross_amount, "700.00");
                assert_eq!(receipt.deduction, "105.00");
                assert_eq!(receipt.net_payable, "595.00");
                assert_eq!(receipt.balance_after, "1300.00");

                request_withdrawal(conn.deref_mut(), member_id, BigDecimal::from(1000)).unwrap();
                let broke = request_withdrawal(conn.deref_mut(), member_id, BigDecimal::from(700));
                assert!(matches!(broke, Err(ServiceError::StateConflict(_))));
                Ok(())
            });
        }

        #[actix_web::test]
        #[ignore = "requires DATABASE_URL"]
        async fn test_stale_loan_gates_withdrawal_until_repayment() {
            dotenvy::dotenv().ok();

            let pool = database::connect::create_db_connection_pool();
            let member_id = "test_withdrawal_loan_gate";

            pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
                diesel::insert_into(crate::schema::member::table)
                    .values(NewMember::active(member_id, None))
                    .execute(conn.deref_mut())?;
                seed_deposit(conn.deref_mut(), member_id, 2000)?;

                let loan_id = idgen::next();
                let mut stale_loan = NewLedgerEntry::base(
                    loan_id,
                    member_id,
                    EntryKind::LoanIssue,
                    EntryStatus::Approved,
                );
                stale_loan.credit = BigDecimal::from(5000);
                stale_loan.net_amount = Some(BigDecimal::from(5000));
                stale_loan.entry_date = Utc::now().naive_utc() - Duration::days(30);
                diesel::insert_into(crate::schema::ledger_entry::table)
                    .values(&stale_loan)
                    .execute(conn.deref_mut())?;

                let gated = request_withdrawal(conn.deref_mut(), member_id, BigDecimal::from(600));
                assert!(matches!(gated, Err(ServiceError::StateConflict(_))));

                let mut repayment = NewLedgerEntry::base(
                    idgen::next(),
                    member_id,
                    EntryKind::LoanRepayment,
                    EntryStatus::Completed,
                );
                repayment.debit = BigDecimal::from(1000);
                repayment.loan_id = Some(loan_id);
                diesel::insert_into(crate::schema::ledger_entry::table)
                    .values(&repayment)
                    .execute(conn.deref_mut())?;

                let allowed =
                    request_withdrawal(conn.deref_mut(), member_id, BigDecimal::from(600));
                assert!(allowed.is_ok());
                Ok(())
            });
        }
    }
}
