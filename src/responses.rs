use actix_web::HttpResponse;
use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::ledger::WalletOverview;

#[derive(Serialize)]
pub struct ApiMessage {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
struct DataEnvelope<T: Serialize> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct MessageDataEnvelope<T: Serialize> {
    success: bool,
    message: String,
    data: T,
}

pub fn ok_data<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(DataEnvelope { success: true, data })
}

pub fn ok_message_data<T: Serialize>(message: &str, data: T) -> HttpResponse {
    HttpResponse::Ok().json(MessageDataEnvelope {
        success: true,
        message: message.to_string(),
        data,
    })
}

// webhook acknowledgements are always 200 so the gateway stops
// retrying; success=false marks payloads we could not act on
pub fn webhook_ack(success: bool, message: &str) -> HttpResponse {
    HttpResponse::Ok().json(ApiMessage {
        success,
        message: message.to_string(),
    })
}

// amounts cross the wire as strings to keep NUMERIC precision
pub fn money(value: &BigDecimal) -> String {
    value.with_scale(2).to_string()
}

#[derive(Serialize)]
pub struct WalletOverviewData {
    pub member_id: String,
    pub available_balance: String,
    pub total_income: String,
    pub total_expenses: String,
    pub total_withdrawals: String,
    pub pending_withdrawals: String,
    pub level_benefits: String,
    pub direct_benefits: String,
    pub repayment_commission: String,
    pub wallet_entries: usize,
    pub loan: LoanBucketData,
}

#[derive(Serialize)]
pub struct LoanBucketData {
    pub total_credited: String,
    pub total_repaid: String,
    pub outstanding: String,
}

pub fn wallet_overview_data(member_id: &str, overview: &WalletOverview) -> WalletOverviewData {
    WalletOverviewData {
        member_id: member_id.to_string(),
        available_balance: money(&overview.available_balance),
        total_income: money(&overview.total_income),
        total_expenses: money(&overview.total_expenses),
        total_withdrawals: money(&overview.total_withdrawals),
        pending_withdrawals: money(&overview.pending_withdrawals),
        level_benefits: money(&overview.level_benefits),
        direct_benefits: money(&overview.direct_benefits),
        repayment_commission: money(&overview.repayment_commission),
        wallet_entries: overview.wallet_entries,
        loan: LoanBucketData {
            total_credited: money(&overview.loan.total_credited),
            total_repaid: money(&overview.loan.total_repaid),
            outstanding: money(&overview.loan.outstanding),
        },
    }
}
