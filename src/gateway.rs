use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::prelude::*;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use std::env;
use std::str::FromStr;
use tracing::info;

use crate::database::idgen;
use crate::database::models::{EntryKind, EntryStatus, NewLedgerEntry, NewPaymentOrder};
use crate::database::queries;
use crate::error::ServiceError;
use crate::loan;
use crate::responses::money;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Client-side face of the payment gateway. In sandbox mode order and
/// session ids are allocated locally.
pub struct GatewayClient {
    environment: String,
    webhook_secret: Option<String>,
}

pub struct GatewayOrder {
    pub order_id: String,
    pub session_id: String,
}

impl GatewayClient {
    pub fn from_env() -> Self {
        GatewayClient {
            environment: env::var("GATEWAY_ENV").unwrap_or_else(|_| "sandbox".to_string()),
            webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET").ok(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    // TODO: submit the order to the live gateway once API credentials
    // are provisioned
    pub fn create_order(&self, req_member_id: &str) -> GatewayOrder {
        let serial = idgen::next();
        GatewayOrder {
            order_id: format!("order_{serial}"),
            session_id: format!("session_{}_{req_member_id}_{serial}", self.environment),
        }
    }
}

/// Signature scheme of the gateway: base64 of an HMAC-SHA256 over the
/// timestamp concatenated with the raw request body.
pub fn verify_signature(secret: &str, timestamp: &str, raw_body: &[u8], received: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(raw_body);
    let expected = STANDARD.encode(mac.finalize().into_bytes());
    expected == received
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Paid,
    Failed,
    Cancelled,
    Pending,
    Unknown(String),
}

impl GatewayStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SUCCESS" | "PAID" => GatewayStatus::Paid,
            "FAILED" => GatewayStatus::Failed,
            "USER_DROPPED" | "CANCELLED" | "VOID" => GatewayStatus::Cancelled,
            "PENDING" => GatewayStatus::Pending,
            other => GatewayStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, GatewayStatus::Paid)
    }

    pub fn label(&self) -> &str {
        match self {
            GatewayStatus::Paid => "PAID",
            GatewayStatus::Failed => "FAILED",
            GatewayStatus::Cancelled => "CANCELLED",
            GatewayStatus::Pending => "PENDING",
            GatewayStatus::Unknown(raw) => raw,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub order_id: String,
    pub status: GatewayStatus,
    pub amount: Option<BigDecimal>,
    pub payment_method: Option<String>,
    pub bank_reference: Option<String>,
    pub payment_time: Option<String>,
}

fn decimal_from(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s).ok(),
        _ => None,
    }
}

fn method_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.keys().next().cloned(),
        _ => None,
    }
}

/// Extracts the order id and payment status from a webhook payload.
/// Gateways nest these fields differently across webhook versions, so
/// each one is resolved through a fallback chain.
pub fn parse_webhook(raw_body: &[u8]) -> Result<WebhookEvent, ServiceError> {
    let payload: Value = serde_json::from_slice(raw_body)
        .map_err(|_| ServiceError::validation("webhook body is not valid JSON"))?;

    let order_id = payload
        .pointer("/data/order/order_id")
        .or_else(|| payload.pointer("/data/order_id"))
        .or_else(|| payload.get("order_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ServiceError::validation("webhook payload carries no order id"))?;

    let status = payload
        .pointer("/data/payment/payment_status")
        .or_else(|| payload.pointer("/data/order/order_status"))
        .or_else(|| payload.get("order_status"))
        .and_then(Value::as_str)
        .map(GatewayStatus::parse)
        .unwrap_or_else(|| GatewayStatus::Unknown("MISSING".to_string()));

    let amount = payload
        .pointer("/data/payment/payment_amount")
        .or_else(|| payload.pointer("/data/order/order_amount"))
        .or_else(|| payload.get("order_amount"))
        .and_then(decimal_from);

    Ok(WebhookEvent {
        order_id,
        status,
        amount,
        payment_method: payload
            .pointer("/data/payment/payment_method")
            .and_then(method_label),
        bank_reference: payload
            .pointer("/data/payment/bank_reference")
            .and_then(Value::as_str)
            .map(str::to_string),
        payment_time: payload
            .pointer("/data/payment/payment_time")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Reported and recorded amounts may differ by a rounding cent across
/// the gateway boundary.
fn amounts_match(received: &BigDecimal, expected: &BigDecimal) -> bool {
    (received - expected).abs() <= BigDecimal::new(1.into(), 2)
}

#[derive(Debug, PartialEq)]
pub enum SettlementOutcome {
    Completed { loan_applied: bool },
    MarkedFailed { status: String },
    AmountMismatch { received: String, expected: String },
    AlreadyProcessed,
    UnknownOrder,
}

impl SettlementOutcome {
    /// Acknowledgement flag and text for the webhook response.
    pub fn ack(&self) -> (bool, String) {
        match self {
            SettlementOutcome::Completed { .. } => (true, "payment settled".to_string()),
            SettlementOutcome::MarkedFailed { status } => {
                (true, format!("payment {status} recorded"))
            }
            SettlementOutcome::AmountMismatch { received, expected } => (
                false,
                format!("amount mismatch: received {received}, expected {expected}, entry marked failed"),
            ),
            SettlementOutcome::AlreadyProcessed => {
                (true, "order already processed".to_string())
            }
            SettlementOutcome::UnknownOrder => {
                (false, "no ledger entry matches the order".to_string())
            }
        }
    }
}

fn update_order_status(
    conn: &mut PgConnection,
    req_order_id: &str,
    new_status: &str,
) -> Result<(), ServiceError> {
    use crate::schema::payment_order::dsl;
    diesel::update(dsl::payment_order.filter(dsl::order_id.eq(req_order_id)))
        .set((
            dsl::status.eq(new_status),
            dsl::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Applies a webhook event to the ledger exactly once. The processed
/// flag is claimed with a single conditional update inside the
/// transaction; a second delivery of the same order finds zero rows
/// and leaves the entry untouched.
pub fn settle_webhook(
    conn: &mut PgConnection,
    event: &WebhookEvent,
) -> Result<SettlementOutcome, ServiceError> {
    conn.transaction::<_, ServiceError, _>(|conn| {
        use crate::schema::ledger_entry::dsl as entry_dsl;

        let claimed = diesel::update(
            entry_dsl::ledger_entry
                .filter(entry_dsl::reference_no.eq(&event.order_id))
                .filter(entry_dsl::webhook_processed.eq(false)),
        )
        .set((
            entry_dsl::webhook_processed.eq(true),
            entry_dsl::webhook_processed_at.eq(Some(Utc::now().naive_utc())),
        ))
        .execute(conn)?;

        if claimed == 0 {
            return if queries::find_entry_by_reference(conn, &event.order_id)?.is_some() {
                Ok(SettlementOutcome::AlreadyProcessed)
            } else {
                Ok(SettlementOutcome::UnknownOrder)
            };
        }

        let entry = queries::find_entry_by_reference(conn, &event.order_id)?.ok_or_else(|| {
            ServiceError::conflict(format!(
                "ledger entry for order {} vanished mid settlement",
                event.order_id
            ))
        })?;

        if !event.status.is_paid() {
            let label = event.status.label().to_string();
            diesel::update(entry_dsl::ledger_entry.filter(entry_dsl::id.eq(entry.id)))
                .set((
                    entry_dsl::status.eq(EntryStatus::Failed),
                    entry_dsl::description.eq(Some(format!("Payment {label}"))),
                ))
                .execute(conn)?;
            update_order_status(conn, &event.order_id, &label)?;
            return Ok(SettlementOutcome::MarkedFailed { status: label });
        }

        let expected = if entry.debit > BigDecimal::from(0) {
            entry.debit.clone()
        } else {
            entry.credit.clone()
        };
        if let Some(received) = &event.amount {
            if !amounts_match(received, &expected) {
                diesel::update(entry_dsl::ledger_entry.filter(entry_dsl::id.eq(entry.id)))
                    .set((
                        entry_dsl::status.eq(EntryStatus::Failed),
                        entry_dsl::description.eq(Some(format!(
                            "Amount mismatch: received {}, expected {}",
                            money(received),
                            money(&expected)
                        ))),
                    ))
                    .execute(conn)?;
                update_order_status(conn, &event.order_id, "FAILED")?;
                return Ok(SettlementOutcome::AmountMismatch {
                    received: money(received),
                    expected: money(&expected),
                });
            }
        }

        let details = serde_json::json!({
            "payment_method": event.payment_method,
            "bank_reference": event.bank_reference,
            "payment_time": event.payment_time,
            "amount": event.amount.as_ref().map(money),
        });
        diesel::update(entry_dsl::ledger_entry.filter(entry_dsl::id.eq(entry.id)))
            .set((
                entry_dsl::status.eq(EntryStatus::Completed),
                entry_dsl::description.eq(Some("Payment PAID".to_string())),
                entry_dsl::payment_details.eq(Some(details)),
            ))
            .execute(conn)?;
        update_order_status(conn, &event.order_id, "PAID")?;

        let loan_applied = if entry.entry_type == EntryKind::LoanRepayment {
            loan::apply_settled_repayment(conn, &entry)?
        } else {
            false
        };

        info!(order_id = event.order_id.as_str(), "payment settled");
        Ok(SettlementOutcome::Completed { loan_applied })
    })
}

#[derive(Serialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub payment_session_id: String,
    pub environment: String,
    pub member_id: String,
    pub amount: String,
    pub due_before: String,
    pub entry_id: i64,
}

/// Opens a gateway order to repay the newest approved loan and holds
/// the amount as a pending repayment entry until the webhook settles
/// or fails it.
pub fn create_repayment_order(
    conn: &mut PgConnection,
    gateway: &GatewayClient,
    req_member_id: &str,
    amount: BigDecimal,
) -> Result<OrderReceipt, ServiceError> {
    if amount <= BigDecimal::from(0) {
        return Err(ServiceError::validation("repayment amount must be positive"));
    }
    if queries::find_member(conn, req_member_id)?.is_none() {
        return Err(ServiceError::not_found(format!("member {req_member_id} not found")));
    }

    conn.transaction::<_, ServiceError, _>(|conn| {
        let open_loan = queries::latest_loan_for_update(conn, req_member_id, EntryStatus::Approved)?
            .ok_or_else(|| {
                ServiceError::not_found(format!("no approved reward loan for member {req_member_id}"))
            })?;
        let due = loan::current_due(conn, &open_loan)?;
        if due <= BigDecimal::from(0) {
            return Err(ServiceError::conflict("reward loan is already fully repaid"));
        }
        if amount > due {
            return Err(ServiceError::conflict(format!(
                "repayment of {} exceeds the outstanding due of {}",
                money(&amount),
                money(&due)
            )));
        }

        let order = gateway.create_order(req_member_id);
        let now = Utc::now().naive_utc();
        diesel::insert_into(crate::schema::payment_order::table)
            .values(&NewPaymentOrder {
                order_id: order.order_id.clone(),
                member_id: req_member_id.to_string(),
                session_id: Some(order.session_id.clone()),
                amount: amount.clone(),
                currency: "INR".to_string(),
                status: "CREATED".to_string(),
                created_at: now,
                updated_at: now,
            })
            .execute(conn)?;

        let entry_id = idgen::next();
        let mut entry = NewLedgerEntry::base(
            entry_id,
            req_member_id,
            EntryKind::LoanRepayment,
            EntryStatus::Pending,
        );
        entry.debit = amount.clone();
        entry.reference_no = Some(order.order_id.clone());
        entry.loan_id = Some(open_loan.id);
        entry.requested_amount = Some(amount.clone());
        entry.benefit_type = Some("repayment".to_string());
        entry.description = Some(format!("Gateway repayment of {} initiated", money(&amount)));
        diesel::insert_into(crate::schema::ledger_entry::table)
            .values(&entry)
            .execute(conn)?;

        info!(
            member_id = req_member_id,
            order_id = order.order_id.as_str(),
            "repayment order opened for {}",
            money(&amount)
        );
        Ok(OrderReceipt {
            order_id: order.order_id,
            payment_session_id: order.session_id,
            environment: gateway.environment().to_string(),
            member_id: req_member_id.to_string(),
            amount: money(&amount),
            due_before: money(&due),
            entry_id,
        })
    })
}

#[derive(Serialize)]
pub struct OrderStatusView {
    pub order_id: String,
    pub member_id: String,
    pub amount: String,
    pub currency: String,
    pub status: String,
    pub entry_status: Option<EntryStatus>,
    pub created_at: String,
    pub updated_at: String,
}

pub fn order_status(conn: &mut PgConnection, req_order_id: &str) -> Result<OrderStatusView, ServiceError> {
    let order = queries::find_order(conn, req_order_id)?
        .ok_or_else(|| ServiceError::not_found(format!("payment order {req_order_id} not found")))?;
    let entry = queries::find_entry_by_reference(conn, &order.order_id)?;
    Ok(OrderStatusView {
        order_id: order.order_id,
        member_id: order.member_id,
        amount: money(&order.amount),
        currency: order.currency,
        status: order.status,
        entry_status: entry.map(|e| e.status),
        created_at: order.created_at.to_string(),
        updated_at: order.updated_at.to_string(),
    })
}
