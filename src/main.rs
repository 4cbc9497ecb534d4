use std::env;

use actix_request_identifier::{IdReuse, RequestIdentifier};
use actix_web::web::Data;

use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::database::connect::{create_db_connection_pool, run_migrations};
use crate::gateway::GatewayClient;
use crate::routes::{
    claim_loan_handler, commission_summary_handler, create_order_handler, downline_handler,
    loan_decision_handler, loans_by_status_handler, order_status_handler, payment_webhook_handler,
    record_referral_handler, repay_loan_handler, wallet_overview_handler, withdraw_handler,
};

mod commission;
mod database;
mod error;
mod gateway;
mod ledger;
mod loan;
mod responses;
mod routes;
mod schema;
mod withdrawal;

#[actix_web::main]
async fn main() {
    dotenvy::dotenv().ok();

    // setup tracing and use bunyan formatter
    let formatting_layer = BunyanFormattingLayer::new("coop-ledger".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(filter_fn(|metadata| *metadata.level() <= tracing::Level::INFO))
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let db = create_db_connection_pool();
    run_migrations(&db);

    let gateway_client = Data::new(GatewayClient::from_env());

    let server = actix_web::HttpServer::new(move || {
        let db = db.clone();

        actix_web::App::new()
            .wrap(RequestIdentifier::with_uuid().use_incoming_id(IdReuse::UseIncoming))
            .wrap(TracingLogger::default())
            .app_data(Data::new(db.clone()))
            .app_data(gateway_client.clone())
            .service(record_referral_handler)
            .service(commission_summary_handler)
            .service(downline_handler)
            .service(wallet_overview_handler)
            .service(withdraw_handler)
            .service(claim_loan_handler)
            .service(loan_decision_handler)
            .service(repay_loan_handler)
            .service(loans_by_status_handler)
            .service(create_order_handler)
            .service(order_status_handler)
            .service(payment_webhook_handler)
    });

    server
        .bind(env::var("BIND_ADDRESS").unwrap())
        .unwrap()
        .run()
        .await
        .unwrap();
}
