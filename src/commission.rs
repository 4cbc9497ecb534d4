use std::collections::HashSet;

use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::Text;
use serde::Serialize;
use tracing::warn;

use crate::database::idgen;
use crate::database::models::{EntryKind, EntryStatus, Member, NewLedgerEntry, NewPayout};
use crate::database::queries;
use crate::error::ServiceError;
use crate::responses::money;

/// Sponsorship benefits reach at most this many levels up the chain.
pub const MAX_LEVELS: i32 = 10;

/// Flat per-level benefit amounts. The direct sponsor earns the full
/// unit, levels two through ten earn the reduced one.
pub fn commission_rate(level: i32) -> i64 {
    match level {
        1 => 100,
        2..=10 => 25,
        _ => 0,
    }
}

pub fn ordinal(n: i32) -> String {
    let v = n.rem_euclid(100);
    let suffix = match v % 10 {
        1 if !(11..=13).contains(&v) => "st",
        2 if !(11..=13).contains(&v) => "nd",
        3 if !(11..=13).contains(&v) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

/// One ancestor on the sponsorship chain, level 1 being the direct
/// sponsor of the member the walk started from.
#[derive(Debug, Clone, PartialEq)]
pub struct UplineSponsor {
    pub level: i32,
    pub sponsor_id: String,
    pub sponsor_name: Option<String>,
    pub sponsor_status: String,
    pub sponsored_member_id: String,
}

/// Walks sponsor pointers upward through `lookup`, stopping at the
/// level cap, at the root, at a missing member row, or when a sponsor
/// repeats. A repeated sponsor means the stored chain loops, which
/// must terminate the walk rather than hang or double-pay it.
pub fn resolve_upline<E>(
    member_id: &str,
    max_levels: i32,
    mut lookup: impl FnMut(&str) -> Result<Option<Member>, E>,
) -> Result<Vec<UplineSponsor>, E> {
    let mut chain: Vec<UplineSponsor> = Vec::new();
    let Some(start) = lookup(member_id)? else {
        return Ok(chain);
    };

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.member_id.clone());
    let mut current_id = start.member_id;
    let mut next_sponsor = start.sponsor_id;

    while let Some(sponsor_id) = next_sponsor {
        if chain.len() as i32 >= max_levels {
            break;
        }
        let Some(sponsor) = lookup(&sponsor_id)? else {
            break;
        };
        if !visited.insert(sponsor.member_id.clone()) {
            warn!(
                member_id,
                sponsor_id = sponsor.member_id.as_str(),
                "sponsor chain loops back on itself, stopping the walk"
            );
            break;
        }
        chain.push(UplineSponsor {
            level: chain.len() as i32 + 1,
            sponsor_id: sponsor.member_id.clone(),
            sponsor_name: sponsor.name,
            sponsor_status: sponsor.status,
            sponsored_member_id: current_id,
        });
        current_id = sponsor.member_id;
        next_sponsor = sponsor.sponsor_id;
    }
    Ok(chain)
}

/// Rejects a sponsor link that would make the membership graph loop.
/// Walks up from the proposed sponsor; finding the member there means
/// the member already sits above the sponsor.
pub fn validate_sponsor_edge(
    conn: &mut PgConnection,
    member_id: &str,
    proposed_sponsor_id: &str,
) -> Result<(), ServiceError> {
    if member_id == proposed_sponsor_id {
        return Err(ServiceError::validation("a member cannot sponsor themselves"));
    }
    let mut seen: HashSet<String> = HashSet::new();
    let mut cursor = Some(proposed_sponsor_id.to_string());
    while let Some(current) = cursor {
        if current == member_id {
            return Err(ServiceError::validation(format!(
                "linking {member_id} under {proposed_sponsor_id} would form a sponsorship cycle"
            )));
        }
        if !seen.insert(current.clone()) {
            break;
        }
        cursor = queries::find_member(conn, &current)?.and_then(|m| m.sponsor_id);
    }
    Ok(())
}

/// Appends the new member to the sponsor's referral list and bumps the
/// team counter, as a single conditional update. Re-running it for a
/// referral that is already recorded changes nothing and reports false.
pub fn record_direct_referral(
    conn: &mut PgConnection,
    sponsor_id: &str,
    new_member_id: &str,
) -> Result<bool, ServiceError> {
    let updated = diesel::sql_query(
        "UPDATE member \
         SET direct_referrals = array_append(direct_referrals, $1), total_team = total_team + 1 \
         WHERE member_id = $2 AND NOT (direct_referrals @> ARRAY[$1])",
    )
    .bind::<Text, _>(new_member_id)
    .bind::<Text, _>(sponsor_id)
    .execute(conn)?;
    Ok(updated == 1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommissionIntent {
    pub level: i32,
    pub sponsor_id: String,
    pub sponsored_member_id: String,
    pub new_member_id: String,
    pub amount: BigDecimal,
    pub benefit_type: &'static str,
}

/// Keeps the upline entries that qualify for a benefit: active
/// sponsors within the level cap. An inactive sponsor is dropped and
/// their share is not redistributed, levels keep their distance.
pub fn eligible_commissions(upline: &[UplineSponsor], new_member_id: &str) -> Vec<CommissionIntent> {
    upline
        .iter()
        .filter(|sponsor| sponsor.sponsor_status == crate::database::models::MEMBER_STATUS_ACTIVE)
        .filter(|sponsor| commission_rate(sponsor.level) > 0)
        .map(|sponsor| CommissionIntent {
            level: sponsor.level,
            sponsor_id: sponsor.sponsor_id.clone(),
            sponsored_member_id: sponsor.sponsored_member_id.clone(),
            new_member_id: new_member_id.to_string(),
            amount: BigDecimal::from(commission_rate(sponsor.level)),
            benefit_type: if sponsor.level == 1 { "direct" } else { "indirect" },
        })
        .collect()
}

pub fn calculate_commissions(
    conn: &mut PgConnection,
    new_member_id: &str,
) -> Result<Vec<CommissionIntent>, ServiceError> {
    let upline = resolve_upline(new_member_id, MAX_LEVELS, |id| queries::find_member(conn, id))?;
    Ok(eligible_commissions(&upline, new_member_id))
}

#[derive(Debug)]
pub struct CommissionResult {
    pub intent: CommissionIntent,
    pub success: bool,
    pub payout_id: Option<i64>,
    pub entry_id: Option<i64>,
    pub error: Option<String>,
}

/// Credits one sponsor: a payout record plus the matching ledger entry
/// land in the same transaction so neither exists without the other.
fn pay_commission(conn: &mut PgConnection, intent: &CommissionIntent) -> Result<(i64, i64), ServiceError> {
    let sponsor = queries::find_member(conn, &intent.sponsor_id)?.ok_or_else(|| {
        ServiceError::conflict(format!("sponsor {} no longer exists", intent.sponsor_id))
    })?;
    if !sponsor.is_active() {
        return Err(ServiceError::conflict(format!(
            "sponsor {} is not active (status {})",
            sponsor.member_id, sponsor.status
        )));
    }

    conn.transaction::<_, ServiceError, _>(|conn| {
        let payout_id = idgen::next();
        let entry_id = idgen::next();
        let reference = format!("REF-{payout_id}");
        let now = Utc::now();
        let description = format!(
            "{} level benefit for new member {}",
            ordinal(intent.level),
            intent.new_member_id
        );

        diesel::insert_into(crate::schema::payout::table)
            .values(&NewPayout {
                id: payout_id,
                payout_date: now.date_naive(),
                member_id: intent.sponsor_id.clone(),
                payout_type: format!("{} Level Benefits", ordinal(intent.level)),
                ref_no: Some(reference.clone()),
                amount: intent.amount.clone(),
                level: intent.level,
                sponsored_member_id: intent.sponsored_member_id.clone(),
                sponsor_id: intent.sponsor_id.clone(),
                status: "Completed".to_string(),
                description: Some(description.clone()),
                created_at: now.naive_utc(),
            })
            .execute(conn)?;

        let mut entry = NewLedgerEntry::base(
            entry_id,
            &intent.sponsor_id,
            EntryKind::LevelBenefit,
            EntryStatus::Completed,
        );
        entry.credit = intent.amount.clone();
        entry.level = Some(intent.level);
        entry.benefit_type = Some(intent.benefit_type.to_string());
        entry.related_member_id = Some(intent.new_member_id.clone());
        entry.related_payout_id = Some(payout_id);
        entry.reference_no = Some(reference);
        entry.description = Some(description);
        diesel::insert_into(crate::schema::ledger_entry::table)
            .values(&entry)
            .execute(conn)?;

        Ok((payout_id, entry_id))
    })
}

/// Pays each eligible sponsor independently. A failed credit is
/// captured on its own result row and the rest of the batch continues.
pub fn process_commissions(conn: &mut PgConnection, intents: &[CommissionIntent]) -> Vec<CommissionResult> {
    intents
        .iter()
        .map(|intent| match pay_commission(conn, intent) {
            Ok((payout_id, entry_id)) => CommissionResult {
                intent: intent.clone(),
                success: true,
                payout_id: Some(payout_id),
                entry_id: Some(entry_id),
                error: None,
            },
            Err(e) => {
                warn!(
                    sponsor_id = intent.sponsor_id.as_str(),
                    level = intent.level,
                    "commission credit failed: {e}"
                );
                CommissionResult {
                    intent: intent.clone(),
                    success: false,
                    payout_id: None,
                    entry_id: None,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect()
}

#[derive(Serialize)]
pub struct CommissionRun {
    pub member_id: String,
    pub sponsor_id: String,
    pub referral_recorded: bool,
    pub eligible_levels: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_paid: String,
    pub payouts: Vec<CommissionResultView>,
}

#[derive(Serialize)]
pub struct CommissionResultView {
    pub level: i32,
    pub sponsor_id: String,
    pub amount: String,
    pub benefit_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full sponsorship cycle for a newly activated member: link the
/// sponsor edge if absent, record the referral, then fan the level
/// benefits out across the upline.
pub fn run_commission_cycle(
    conn: &mut PgConnection,
    new_member_id: &str,
    sponsor_code: &str,
) -> Result<CommissionRun, ServiceError> {
    let member = queries::find_member(conn, new_member_id)?
        .ok_or_else(|| ServiceError::not_found(format!("member {new_member_id} not found")))?;
    if !member.is_active() {
        return Err(ServiceError::conflict(format!(
            "member {} must be active before benefits are paid, current status: {}",
            member.member_id, member.status
        )));
    }
    let sponsor = queries::find_member(conn, sponsor_code)?
        .ok_or_else(|| ServiceError::not_found(format!("sponsor {sponsor_code} not found")))?;

    match member.sponsor_id.as_deref() {
        Some(existing) if existing == sponsor.member_id => {}
        Some(existing) => {
            return Err(ServiceError::conflict(format!(
                "member {} is already linked to sponsor {existing}",
                member.member_id
            )));
        }
        None => {
            validate_sponsor_edge(conn, &member.member_id, &sponsor.member_id)?;
            use crate::schema::member::dsl;
            diesel::update(dsl::member.filter(dsl::member_id.eq(new_member_id)))
                .set(dsl::sponsor_id.eq(sponsor.member_id.as_str()))
                .execute(conn)?;
        }
    }

    let referral_recorded = record_direct_referral(conn, &sponsor.member_id, new_member_id)?;
    let intents = calculate_commissions(conn, new_member_id)?;
    let results = process_commissions(conn, &intents);

    let successful = results.iter().filter(|r| r.success).count();
    let total_paid = results
        .iter()
        .filter(|r| r.success)
        .fold(BigDecimal::from(0), |acc, r| acc + &r.intent.amount);

    Ok(CommissionRun {
        member_id: member.member_id,
        sponsor_id: sponsor.member_id,
        referral_recorded,
        eligible_levels: intents.len(),
        successful,
        failed: results.len() - successful,
        total_paid: money(&total_paid),
        payouts: results
            .into_iter()
            .map(|r| CommissionResultView {
                level: r.intent.level,
                sponsor_id: r.intent.sponsor_id,
                amount: money(&r.intent.amount),
                benefit_type: r.intent.benefit_type.to_string(),
                success: r.success,
                payout_id: r.payout_id,
                error: r.error,
            })
            .collect(),
    })
}

#[derive(Serialize)]
pub struct CommissionSummary {
    pub member_id: String,
    pub total_earned: String,
    pub levels: Vec<LevelEarnings>,
    pub upline: Vec<UplineView>,
    pub recent_payouts: Vec<PayoutView>,
}

#[derive(Serialize)]
pub struct LevelEarnings {
    pub level: i32,
    pub rate: i64,
    pub payouts: usize,
    pub amount: String,
}

#[derive(Serialize)]
pub struct UplineView {
    pub level: i32,
    pub sponsor_id: String,
    pub sponsor_name: Option<String>,
    pub status: String,
    pub eligible: bool,
    pub rate: i64,
}

#[derive(Serialize)]
pub struct PayoutView {
    pub id: i64,
    pub payout_date: String,
    pub payout_type: String,
    pub amount: String,
    pub level: i32,
    pub sponsored_member_id: String,
    pub status: String,
}

pub fn commission_summary(conn: &mut PgConnection, member_id: &str) -> Result<CommissionSummary, ServiceError> {
    let member = queries::find_member(conn, member_id)?
        .ok_or_else(|| ServiceError::not_found(format!("member {member_id} not found")))?;

    let payouts = queries::member_payouts(conn, &member.member_id)?;
    let mut total_earned = BigDecimal::from(0);
    let mut levels: Vec<LevelEarnings> = (1..=MAX_LEVELS)
        .map(|level| LevelEarnings {
            level,
            rate: commission_rate(level),
            payouts: 0,
            amount: money(&BigDecimal::from(0)),
        })
        .collect();
    let mut level_totals = vec![BigDecimal::from(0); MAX_LEVELS as usize];
    for payout in &payouts {
        total_earned += &payout.amount;
        if payout.level >= 1 && payout.level <= MAX_LEVELS {
            let idx = (payout.level - 1) as usize;
            levels[idx].payouts += 1;
            level_totals[idx] += &payout.amount;
        }
    }
    for (earnings, total) in levels.iter_mut().zip(&level_totals) {
        earnings.amount = money(total);
    }

    let upline = resolve_upline(&member.member_id, MAX_LEVELS, |id| queries::find_member(conn, id))?;
    let upline = upline
        .into_iter()
        .map(|sponsor| UplineView {
            level: sponsor.level,
            eligible: sponsor.sponsor_status == crate::database::models::MEMBER_STATUS_ACTIVE,
            rate: commission_rate(sponsor.level),
            sponsor_id: sponsor.sponsor_id,
            sponsor_name: sponsor.sponsor_name,
            status: sponsor.sponsor_status,
        })
        .collect();

    let recent_payouts = payouts
        .iter()
        .take(10)
        .map(|payout| PayoutView {
            id: payout.id,
            payout_date: payout.payout_date.to_string(),
            payout_type: payout.payout_type.clone(),
            amount: money(&payout.amount),
            level: payout.level,
            sponsored_member_id: payout.sponsored_member_id.clone(),
            status: payout.status.clone(),
        })
        .collect();

    Ok(CommissionSummary {
        member_id: member.member_id,
        total_earned: money(&total_earned),
        levels,
        upline,
        recent_payouts,
    })
}

#[derive(Serialize)]
pub struct DownlineLevel {
    pub level: i32,
    pub members: usize,
    pub active: usize,
    pub inactive: usize,
}

/// Breadth-first count of the team below a member, one row per level.
/// Members reached through more than one path are counted once.
pub fn downline_levels(conn: &mut PgConnection, member_id: &str) -> Result<Vec<DownlineLevel>, ServiceError> {
    if queries::find_member(conn, member_id)?.is_none() {
        return Err(ServiceError::not_found(format!("member {member_id} not found")));
    }

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(member_id.to_string());
    let mut frontier = vec![member_id.to_string()];
    let mut levels = Vec::new();

    for level in 1..=MAX_LEVELS {
        let rows = queries::members_sponsored_by(conn, &frontier)?;
        let fresh: Vec<Member> = rows
            .into_iter()
            .filter(|m| seen.insert(m.member_id.clone()))
            .collect();
        if fresh.is_empty() {
            break;
        }
        let active = fresh.iter().filter(|m| m.is_active()).count();
        levels.push(DownlineLevel {
            level,
            members: fresh.len(),
            active,
            inactive: fresh.len() - active,
        });
        frontier = fresh.into_iter().map(|m| m.member_id).collect();
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::convert::Infallible;

    fn member(member_id: &str, sponsor_id: Option<&str>, status: &str) -> Member {
        Member {
            member_id: member_id.to_string(),
            name: Some(format!("Member {member_id}")),
            contact_no: None,
            sponsor_id: sponsor_id.map(str::to_string),
            status: status.to_string(),
            package: None,
            direct_referrals: Vec::new(),
            total_team: 0,
            loan_status: None,
            kyc_status: None,
            created_at: chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    fn directory(members: Vec<Member>) -> HashMap<String, Member> {
        members.into_iter().map(|m| (m.member_id.clone(), m)).collect()
    }

    fn lookup(dir: &HashMap<String, Member>) -> impl FnMut(&str) -> Result<Option<Member>, Infallible> + '_ {
        |id| Ok(dir.get(id).cloned())
    }

    #[test]
    fn rates_pay_the_direct_sponsor_full_and_the_rest_reduced() {
        assert_eq!(commission_rate(1), 100);
        for level in 2..=10 {
            assert_eq!(commission_rate(level), 25);
        }
        assert_eq!(commission_rate(0), 0);
        assert_eq!(commission_rate(11), 0);
        assert_eq!(commission_rate(-3), 0);
    }

    #[test]
    fn ordinals_handle_teens_and_round_numbers() {
        assert_eq!(ordinal(1), "1st");
        assert_eq!(ordinal(2), "2nd");
        assert_eq!(ordinal(3), "3rd");
        assert_eq!(ordinal(4), "4th");
        assert_eq!(ordinal(11), "11th");
        assert_eq!(ordinal(12), "12th");
        assert_eq!(ordinal(13), "13th");
        assert_eq!(ordinal(21), "21st");
        assert_eq!(ordinal(102), "102nd");
        assert_eq!(ordinal(111), "111th");
    }

    #[test]
    fn upline_walk_stops_at_the_level_cap() {
        let mut members = vec![member("M000", None, "active")];
        for i in 1..=14 {
            members.push(member(
                &format!("M{i:03}"),
                Some(&format!("M{:03}", i - 1)),
                "active",
            ));
        }
        let dir = directory(members);

        let chain = resolve_upline("M014", MAX_LEVELS, lookup(&dir)).unwrap();
        assert_eq!(chain.len(), 10);
        assert_eq!(chain[0].level, 1);
        assert_eq!(chain[0].sponsor_id, "M013");
        assert_eq!(chain[0].sponsored_member_id, "M014");
        assert_eq!(chain[9].level, 10);
        assert_eq!(chain[9].sponsor_id, "M004");
    }

    #[test]
    fn upline_walk_stops_at_the_root_and_on_missing_rows() {
        let dir = directory(vec![
            member("A", None, "active"),
            member("B", Some("A"), "active"),
            member("C", Some("B"), "active"),
            member("D", Some("GHOST"), "active"),
        ]);

        let chain = resolve_upline("C", MAX_LEVELS, lookup(&dir)).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].sponsor_id, "A");

        let chain = resolve_upline("D", MAX_LEVELS, lookup(&dir)).unwrap();
        assert!(chain.is_empty());

        let chain = resolve_upline("GHOST", MAX_LEVELS, lookup(&dir)).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn upline_walk_terminates_on_a_looping_chain_without_duplicates() {
        let dir = directory(vec![
            member("A", Some("C"), "active"),
            member("B", Some("A"), "active"),
            member("C", Some("B"), "active"),
            member("D", Some("A"), "active"),
        ]);

        let chain = resolve_upline("D", MAX_LEVELS, lookup(&dir)).unwrap();
        let ids: Vec<&str> = chain.iter().map(|s| s.sponsor_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "B"]);
    }

    #[test]
    fn eligible_commissions_skip_inactive_sponsors_without_relevelling() {
        let dir = directory(vec![
            member("A", None, "active"),
            member("B", Some("A"), "inactive"),
            member("C", Some("B"), "active"),
            member("D", Some("C"), "active"),
        ]);
        let chain = resolve_upline("D", MAX_LEVELS, lookup(&dir)).unwrap();
        let intents = eligible_commissions(&chain, "D");

        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].sponsor_id, "C");
        assert_eq!(intents[0].level, 1);
        assert_eq!(intents[0].amount, BigDecimal::from(100));
        assert_eq!(intents[0].benefit_type, "direct");
        assert_eq!(intents[1].sponsor_id, "A");
        assert_eq!(intents[1].level, 3);
        assert_eq!(intents[1].amount, BigDecimal::from(25));
        assert_eq!(intents[1].benefit_type, "indirect");
    }

    #[test]
    fn full_active_chain_pays_one_hundred_plus_nine_twenty_fives() {
        let mut members = vec![member("M000", None, "active")];
        for i in 1..=11 {
            members.push(member(
                &format!("M{i:03}"),
                Some(&format!("M{:03}", i - 1)),
                "active",
            ));
        }
        let dir = directory(members);
        let chain = resolve_upline("M011", MAX_LEVELS, lookup(&dir)).unwrap();
        let intents = eligible_commissions(&chain, "M011");

        assert_eq!(intents.len(), 10);
        let total: BigDecimal = intents
            .iter()
            .fold(BigDecimal::from(0), |acc, i| acc + &i.amount);
        assert_eq!(total, BigDecimal::from(100 + 9 * 25));
    }

    mod db {
        use super::super::*;
        use crate::database;
        use crate::database::models::NewMember;
        use diesel::result::Error;
        use diesel::Connection;
        use std::ops::DerefMut;

        #[actix_web::test]
        #[ignore = "requires DATABASE_URL"]
        async fn test_commission_cycle_pays_the_chain_and_records_the_referral_once() {
            dotenvy::dotenv().ok();

            let pool = database::connect::create_db_connection_pool();

            pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
                let root = "test_cycle_root";
                let mid = "test_cycle_mid";
                let fresh = "test_cycle_fresh";
                diesel::insert_into(crate::schema::member::table)
                    .values(vec![
                        NewMember::active(root, None),
                        NewMember::active(mid, Some(root)),
                        NewMember::active(fresh, None),
                    ])
                    .execute(conn.deref_mut())?;

                let run = run_commission_cycle(conn.deref_mut(), fresh, mid).unwrap();
                assert!(run.referral_recorded);
                assert_eq!(run.eligible_levels, 2);
                assert_eq!(run.successful, 2);
                assert_eq!(run.failed, 0);
                assert_eq!(run.total_paid, "125.00");

                let mid_row = queries::find_member(conn.deref_mut(), mid)?.unwrap();
                assert_eq!(mid_row.direct_referrals, vec![fresh.to_string()]);
                assert_eq!(mid_row.total_team, 1);
                let fresh_row = queries::find_member(conn.deref_mut(), fresh)?.unwrap();
                assert_eq!(fresh_row.sponsor_id.as_deref(), Some(mid));

                // re-running pays again by caller contract, but the
                // referral bookkeeping stays at one
                let rerun = run_commission_cycle(conn.deref_mut(), fresh, mid).unwrap();
                assert!(!rerun.referral_recorded);
                let mid_row = queries::find_member(conn.deref_mut(), mid)?.unwrap();
                assert_eq!(mid_row.direct_referrals.len(), 1);
                assert_eq!(mid_row.total_team, 1);

                let payouts = queries::member_payouts(conn.deref_mut(), mid)?;
                assert_eq!(payouts.len(), 2);
                assert!(payouts.iter().all(|p| p.level == 1));
                Ok(())
            });
        }

        #[actix_web::test]
        #[ignore = "requires DATABASE_URL"]
        async fn test_sponsor_edges_that_loop_are_rejected() {
            dotenvy::dotenv().ok();

            let pool = database::connect::create_db_connection_pool();

            pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
                let top = "test_edge_top";
                let below = "test_edge_below";
                diesel::insert_into(crate::schema::member::table)
                    .values(vec![
                        NewMember::active(top, None),
                        NewMember::active(below, Some(top)),
                    ])
                    .execute(conn.deref_mut())?;

                let looped = run_commission_cycle(conn.deref_mut(), top, below);
                assert!(matches!(looped, Err(ServiceError::Validation(_))));

                let selfie = run_commission_cycle(conn.deref_mut(), top, top);
                assert!(matches!(selfie, Err(ServiceError::Validation(_))));

                let top_row = queries::find_member(conn.deref_mut(), top)?.unwrap();
                assert_eq!(top_row.sponsor_id, None);
                Ok(())
            });
        }
    }
}
