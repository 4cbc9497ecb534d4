use crate::database::models::{EntryKind, EntryStatus, LedgerEntry};
use bigdecimal::BigDecimal;

/// Wallet totals derived by replaying a member's ledger. Loan money
/// lives in its own bucket and never mixes into the spendable balance.
#[derive(Debug, PartialEq)]
pub struct WalletOverview {
    pub available_balance: BigDecimal,
    pub total_income: BigDecimal,
    pub total_expenses: BigDecimal,
    pub total_withdrawals: BigDecimal,
    pub pending_withdrawals: BigDecimal,
    pub level_benefits: BigDecimal,
    pub direct_benefits: BigDecimal,
    pub repayment_commission: BigDecimal,
    pub wallet_entries: usize,
    pub loan: LoanBucket,
}

#[derive(Debug, PartialEq)]
pub struct LoanBucket {
    pub total_credited: BigDecimal,
    pub total_repaid: BigDecimal,
    pub outstanding: BigDecimal,
}

/// An entry moves spendable money when it is outside the loan bucket
/// and has not been rejected or failed. Pending rows count so that a
/// withdrawal reserves its amount the moment it is requested.
pub fn counts_toward_available(entry: &LedgerEntry) -> bool {
    !entry.entry_type.is_loan_related()
        && matches!(
            entry.status,
            EntryStatus::Pending | EntryStatus::Approved | EntryStatus::Completed
        )
}

/// Running balance after each entry, in the order given. Callers pass
/// entries sorted by entry date with the entry id as tiebreaker.
pub fn running_balance(entries: &[LedgerEntry]) -> Vec<BigDecimal> {
    let mut balance = BigDecimal::from(0);
    entries
        .iter()
        .map(|entry| {
            balance += &entry.credit - &entry.debit;
            balance.clone()
        })
        .collect()
}

pub fn available_balance(entries: &[LedgerEntry]) -> BigDecimal {
    let balance = entries
        .iter()
        .filter(|entry| counts_toward_available(entry))
        .fold(BigDecimal::from(0), |acc, entry| {
            acc + &entry.credit - &entry.debit
        });
    balance.max(BigDecimal::from(0))
}

pub fn wallet_overview(entries: &[LedgerEntry]) -> WalletOverview {
    let zero = BigDecimal::from(0);
    let mut overview = WalletOverview {
        available_balance: zero.clone(),
        total_income: zero.clone(),
        total_expenses: zero.clone(),
        total_withdrawals: zero.clone(),
        pending_withdrawals: zero.clone(),
        level_benefits: zero.clone(),
        direct_benefits: zero.clone(),
        repayment_commission: zero.clone(),
        wallet_entries: 0,
        loan: LoanBucket {
            total_credited: zero.clone(),
            total_repaid: zero.clone(),
            outstanding: zero,
        },
    };

    for entry in entries {
        if entry.entry_type.is_loan_related() {
            if matches!(entry.status, EntryStatus::Approved | EntryStatus::Completed) {
                overview.loan.total_credited += &entry.credit;
                overview.loan.total_repaid += &entry.debit;
            }
            continue;
        }

        overview.wallet_entries += 1;

        match entry.status {
            EntryStatus::Completed => {
                overview.total_income += &entry.credit;
                overview.total_expenses += &entry.debit;
                match entry.entry_type {
                    EntryKind::Withdrawal => overview.total_withdrawals += &entry.debit,
                    EntryKind::LevelBenefit => {
                        if entry.benefit_type.as_deref() == Some("direct") {
                            overview.direct_benefits += &entry.credit;
                        } else {
                            overview.level_benefits += &entry.credit;
                        }
                    }
                    EntryKind::RepaymentCommission => {
                        overview.repayment_commission += &entry.credit;
                    }
                    _ => {}
                }
            }
            EntryStatus::Pending => {
                if entry.entry_type == EntryKind::Withdrawal {
                    overview.pending_withdrawals += &entry.debit;
                }
            }
            _ => {}
        }
    }

    overview.available_balance = available_balance(entries);
    overview.loan.outstanding = (&overview.loan.total_credited - &overview.loan.total_repaid)
        .max(BigDecimal::from(0));
    overview
}
