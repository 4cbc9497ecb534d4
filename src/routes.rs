use std::ops::DerefMut;
use std::str::FromStr;

use actix_request_identifier::RequestId;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use bigdecimal::BigDecimal;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use serde::Deserialize;
use tracing::{error, instrument, warn};

use crate::commission;
use crate::database::queries;
use crate::error::ServiceError;
use crate::gateway;
use crate::ledger;
use crate::loan;
use crate::responses;
use crate::withdrawal;

// request amounts arrive as JSON numbers and are re-parsed through
// their decimal literal so float artifacts never reach the ledger
fn parse_amount(raw: &serde_json::Number) -> Result<BigDecimal, ServiceError> {
    BigDecimal::from_str(&raw.to_string())
        .map_err(|_| ServiceError::validation("amount is not a valid decimal number"))
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
pub struct ReferralInput {
    pub member_id: String,
    pub sponsor_id: String,
}

#[post("/mlm/commissions")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn record_referral_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    request_id: RequestId,
    input: web::Json<ReferralInput>,
) -> Result<HttpResponse, ServiceError> {
    if input.member_id.is_empty() {
        return Err(ServiceError::validation("member_id is empty"));
    }
    if input.sponsor_id.is_empty() {
        return Err(ServiceError::validation("sponsor_id is empty"));
    }

    let mut conn = db.get()?;
    let input = input.into_inner();
    let run = web::block(move || {
        commission::run_commission_cycle(conn.deref_mut(), &input.member_id, &input.sponsor_id)
    })
    .await??;
    Ok(responses::ok_message_data("level benefits processed", run))
}

#[get("/mlm/commissions/{member_id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn commission_summary_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    request_id: RequestId,
    member_id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let mut conn = db.get()?;
    let req_member_id = member_id.into_inner();
    let summary =
        web::block(move || commission::commission_summary(conn.deref_mut(), &req_member_id))
            .await??;
    Ok(responses::ok_data(summary))
}

#[get("/mlm/downline/{member_id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn downline_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    request_id: RequestId,
    member_id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let mut conn = db.get()?;
    let req_member_id = member_id.into_inner();
    let levels =
        web::block(move || commission::downline_levels(conn.deref_mut(), &req_member_id)).await??;
    Ok(responses::ok_data(levels))
}

#[get("/wallet/{member_id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn wallet_overview_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    request_id: RequestId,
    member_id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let mut conn = db.get()?;
    let req_member_id = member_id.into_inner();
    let (owner, overview) = web::block(move || {
        let member = queries::find_member(conn.deref_mut(), &req_member_id)?
            .ok_or_else(|| ServiceError::not_found(format!("member {req_member_id} not found")))?;
        let entries = queries::member_entries(conn.deref_mut(), &member.member_id)?;
        Ok::<_, ServiceError>((member.member_id, ledger::wallet_overview(&entries)))
    })
    .await??;
    Ok(responses::ok_data(responses::wallet_overview_data(&owner, &overview)))
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalInput {
    pub member_id: String,
    pub amount: serde_json::Number,
}

#[post("/wallet/withdraw")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn withdraw_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    request_id: RequestId,
    input: web::Json<WithdrawalInput>,
) -> Result<HttpResponse, ServiceError> {
    if input.member_id.is_empty() {
        return Err(ServiceError::validation("member_id is empty"));
    }
    let amount = parse_amount(&input.amount)?;

    let mut conn = db.get()?;
    let input = input.into_inner();
    let receipt = web::block(move || {
        withdrawal::request_withdrawal(conn.deref_mut(), &input.member_id, amount)
    })
    .await??;
    Ok(responses::ok_message_data("withdrawal request placed", receipt))
}

#[post("/loans/{member_id}/claim")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn claim_loan_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    request_id: RequestId,
    member_id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let mut conn = db.get()?;
    let req_member_id = member_id.into_inner();
    let receipt =
        web::block(move || loan::request_loan(conn.deref_mut(), &req_member_id)).await??;
    Ok(responses::ok_message_data("reward loan claim submitted", receipt))
}

#[post("/loans/{member_id}/decision/{action}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn loan_decision_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    request_id: RequestId,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ServiceError> {
    let (req_member_id, action) = path.into_inner();
    let decision = loan::LoanDecision::parse(action.to_lowercase().as_str())
        .ok_or_else(|| ServiceError::validation(format!("unknown loan decision: {action}")))?;

    let mut conn = db.get()?;
    let receipt =
        web::block(move || loan::decide_loan(conn.deref_mut(), &req_member_id, decision)).await??;
    Ok(responses::ok_message_data("loan decision recorded", receipt))
}

#[derive(Debug, Deserialize)]
pub struct RepaymentInput {
    pub amount: serde_json::Number,
}

#[post("/loans/{member_id}/repay")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn repay_loan_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    request_id: RequestId,
    member_id: web::Path<String>,
    input: web::Json<RepaymentInput>,
) -> Result<HttpResponse, ServiceError> {
    let amount = parse_amount(&input.amount)?;

    let mut conn = db.get()?;
    let req_member_id = member_id.into_inner();
    let receipt =
        web::block(move || loan::repay_loan(conn.deref_mut(), &req_member_id, amount)).await??;
    Ok(responses::ok_message_data("repayment recorded", receipt))
}

#[get("/loans/status/{status}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn loans_by_status_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    request_id: RequestId,
    status: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let mut conn = db.get()?;
    let req_status = status.into_inner();
    let listing =
        web::block(move || loan::loans_by_status(conn.deref_mut(), &req_status)).await??;
    Ok(responses::ok_data(listing))
}

#[derive(Debug, Deserialize)]
pub struct OrderInput {
    pub member_id: String,
    pub amount: serde_json::Number,
}

#[post("/payments/orders")]
#[instrument(skip(db, gateway_client), fields(request_id = request_id.as_str()))]
pub async fn create_order_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    gateway_client: web::Data<gateway::GatewayClient>,
    request_id: RequestId,
    input: web::Json<OrderInput>,
) -> Result<HttpResponse, ServiceError> {
    if input.member_id.is_empty() {
        return Err(ServiceError::validation("member_id is empty"));
    }
    let amount = parse_amount(&input.amount)?;

    let mut conn = db.get()?;
    let input = input.into_inner();
    let receipt = web::block(move || {
        gateway::create_repayment_order(conn.deref_mut(), &gateway_client, &input.member_id, amount)
    })
    .await??;
    Ok(responses::ok_message_data("payment order created", receipt))
}

#[get("/payments/orders/{order_id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn order_status_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    request_id: RequestId,
    order_id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let mut conn = db.get()?;
    let req_order_id = order_id.into_inner();
    let view = web::block(move || gateway::order_status(conn.deref_mut(), &req_order_id)).await??;
    Ok(responses::ok_data(view))
}

/// Settlement callbacks from the payment gateway. The gateway retries
/// until it sees a 200, so every processed payload is acknowledged
/// with one; the success flag in the body records what we did with it.
#[post("/payments/webhook")]
#[instrument(skip(db, gateway_client, req, body), fields(request_id = request_id.as_str()))]
pub async fn payment_webhook_handler(
    db: web::Data<Pool<ConnectionManager<PgConnection>>>,
    gateway_client: web::Data<gateway::GatewayClient>,
    request_id: RequestId,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ServiceError> {
    match gateway_client.webhook_secret() {
        Some(secret) => {
            let signature = header_value(&req, gateway::SIGNATURE_HEADER);
            let timestamp = header_value(&req, gateway::TIMESTAMP_HEADER);
            match (signature, timestamp) {
                (Some(signature), Some(timestamp)) => {
                    if !gateway::verify_signature(secret, &timestamp, &body, &signature) {
                        warn!("webhook signature did not verify, relying on payload checks");
                    }
                }
                _ => warn!("webhook arrived without signature headers"),
            }
        }
        None => warn!("no webhook secret configured, accepting unsigned webhook"),
    }

    let event = gateway::parse_webhook(&body)?;

    let mut conn = db.get()?;
    let settled = web::block(move || gateway::settle_webhook(conn.deref_mut(), &event)).await?;
    match settled {
        Ok(outcome) => {
            let (success, message) = outcome.ack();
            Ok(responses::webhook_ack(success, &message))
        }
        Err(e) => {
            error!("webhook settlement failed: {e:?}");
            Ok(responses::webhook_ack(false, "webhook received but processing failed"))
        }
    }
}
