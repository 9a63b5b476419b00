#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use dealroom::application::documents::NewDocument;
use dealroom::application::engine::{DealEngine, NewDeal};
use dealroom::application::milestones::NewMilestone;
use dealroom::application::nda_gate::NewNdaRequest;
use dealroom::application::payments::NewPayment;
use dealroom::domain::deal::{Deal, DealTerms, Stage};
use dealroom::domain::document::DocumentType;
use dealroom::domain::ids::{DealId, DocumentId, ListingId, MilestoneId, NdaRequestId, PartyId, PaymentId};
use dealroom::domain::milestone::MilestoneKind;
use dealroom::domain::money::Amount;
use dealroom::domain::payment::{Payment, PaymentType};
use dealroom::domain::ports::Repositories;
use dealroom::infrastructure::in_memory;
use rust_decimal::Decimal;
use std::io::Write;
use tempfile::NamedTempFile;

pub const DEAL: &str = "deal-1";
pub const LISTING: &str = "listing-1";

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 9, 0, 0).unwrap()
}

pub fn buyer() -> PartyId {
    PartyId::new("buyer")
}

pub fn seller() -> PartyId {
    PartyId::new("seller")
}

pub fn deal_id() -> DealId {
    DealId::new(DEAL)
}

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

/// Engine over fresh in-memory stores, with an approved NDA between the
/// default buyer and seller.
pub async fn engine_with_nda() -> DealEngine {
    engine_with_nda_on(in_memory::repositories()).await
}

/// Same as [`engine_with_nda`], over caller-supplied stores.
pub async fn engine_with_nda_on(repos: Repositories) -> DealEngine {
    let engine = DealEngine::new(repos);
    let request = engine
        .ndas()
        .request_access(
            NewNdaRequest {
                id: NdaRequestId::new("nda-1"),
                listing_id: ListingId::new(LISTING),
                buyer_id: buyer(),
                seller_id: seller(),
            },
            at(2024, 1, 2),
        )
        .await
        .unwrap();
    engine.ndas().approve(&request.id, &seller(), at(2024, 1, 3)).await.unwrap();
    engine
}

pub async fn open_deal(engine: &DealEngine, terms: DealTerms) -> Deal {
    engine
        .open_deal(
            NewDeal {
                id: deal_id(),
                listing_id: ListingId::new(LISTING),
                buyer_id: buyer(),
                seller_id: seller(),
                agreed_price: amount(Decimal::from(50_000_000)),
                notes: "Regional logistics business".to_string(),
                terms,
            },
            &seller(),
            at(2024, 1, 5),
        )
        .await
        .unwrap()
}

/// Walks the default deal to CLOSING with a signed SPA and a completed
/// closing checklist item.
pub async fn deal_at_closing(terms: DealTerms) -> DealEngine {
    deal_at_closing_on(in_memory::repositories(), terms).await
}

pub async fn deal_at_closing_on(repos: Repositories, terms: DealTerms) -> DealEngine {
    let engine = engine_with_nda_on(repos).await;
    open_deal(&engine, terms).await;
    let deal = deal_id();

    engine
        .stages()
        .transition(&deal, Stage::DdInProgress, &seller(), at(2024, 1, 10))
        .await
        .unwrap();
    engine
        .stages()
        .transition(&deal, Stage::SpaNegotiation, &seller(), at(2024, 2, 1))
        .await
        .unwrap();

    add_milestone(&engine, "audit", Some(Stage::Closing), MilestoneKind::Checklist).await;
    engine
        .milestones()
        .complete_milestone(&MilestoneId::new("audit"), &seller(), at(2024, 2, 10))
        .await
        .unwrap();
    sign_spa(&engine, "spa-1").await;

    engine
        .stages()
        .transition(&deal, Stage::Closing, &seller(), at(2024, 3, 1))
        .await
        .unwrap();
    engine
}

pub async fn add_milestone(engine: &DealEngine, id: &str, required_for: Option<Stage>, kind: MilestoneKind) {
    engine
        .milestones()
        .add_milestone(
            NewMilestone {
                id: MilestoneId::new(id),
                deal_id: deal_id(),
                title: format!("Checklist item {id}"),
                description: String::new(),
                due_date: None,
                assigned_to: seller(),
                required_for,
                kind,
            },
            &seller(),
            at(2024, 2, 5),
        )
        .await
        .unwrap();
}

pub async fn sign_spa(engine: &DealEngine, id: &str) {
    let doc = engine
        .documents()
        .record_upload(
            NewDocument {
                id: DocumentId::new(id),
                deal_id: deal_id(),
                doc_type: DocumentType::Spa,
                title: "Share purchase agreement".to_string(),
                uploaded_by: seller(),
            },
            at(2024, 2, 12),
        )
        .await
        .unwrap();
    engine
        .documents()
        .request_signature(&doc.id, &seller(), at(2024, 2, 13))
        .await
        .unwrap();
    engine
        .documents()
        .mark_signed(&doc.id, &buyer(), at(2024, 2, 14))
        .await
        .unwrap();
}

pub async fn escrowed_payment(
    engine: &DealEngine,
    id: &str,
    payment_type: PaymentType,
    value: Decimal,
    due: DateTime<Utc>,
) -> Payment {
    let payment = engine
        .payments()
        .create_payment(
            NewPayment {
                id: PaymentId::new(id),
                deal_id: deal_id(),
                payment_type,
                amount: amount(value),
                due_date: Some(due),
                earnout_period: None,
            },
            &buyer(),
            due,
        )
        .await
        .unwrap();
    engine
        .payments()
        .mark_escrowed(&payment.id, &buyer(), due)
        .await
        .unwrap()
}

/// Writes `lines` to a temporary JSON Lines script.
pub fn script(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}
