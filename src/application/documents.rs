use super::activity_log::{ActivityLog, Entry};
use crate::domain::activity::ActivityType;
use crate::domain::deal::Deal;
use crate::domain::document::{DocumentRecord, DocumentStatus, DocumentType};
use crate::domain::ids::{DealId, DocumentId, PartyId};
use crate::domain::ports::{DealStoreRef, DocumentStoreRef, Repositories};
use crate::error::{DealError, Result};
use chrono::{DateTime, Utc};
use tracing::info;

/// Input for [`DocumentLedger::record_upload`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: DocumentId,
    pub deal_id: DealId,
    pub doc_type: DocumentType,
    pub title: String,
    pub uploaded_by: PartyId,
}

/// Per-document signature state. Stores metadata only, never document bytes.
#[derive(Clone)]
pub struct DocumentLedger {
    deals: DealStoreRef,
    documents: DocumentStoreRef,
    log: ActivityLog,
}

impl DocumentLedger {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            deals: repos.deals.clone(),
            documents: repos.documents.clone(),
            log: ActivityLog::new(repos.activities.clone()),
        }
    }

    /// Records an uploaded document as DRAFT. Re-recording the same id returns
    /// the stored record untouched.
    pub async fn record_upload(&self, new: NewDocument, now: DateTime<Utc>) -> Result<DocumentRecord> {
        if let Some(existing) = self.documents.get(&new.id).await? {
            if existing.deal_id != new.deal_id {
                return Err(DealError::ValidationError(format!(
                    "document {} belongs to deal {}",
                    existing.id, existing.deal_id
                )));
            }
            return Ok(existing);
        }
        let deal = self.deal(&new.deal_id).await?;
        if deal.stage.is_terminal() {
            return Err(DealError::invalid_transition("deal", deal.stage, "DOCUMENT_UPLOAD"));
        }

        let document = DocumentRecord {
            id: new.id,
            deal_id: new.deal_id,
            doc_type: new.doc_type,
            title: new.title,
            status: DocumentStatus::Draft,
            uploaded_by: new.uploaded_by,
            created_at: now,
            signature_requested_at: None,
            signed_by: None,
            signed_at: None,
        };
        self.documents.store(document.clone()).await?;

        self.log
            .record_for_deal(
                &document.deal_id,
                Entry::new(ActivityType::DocumentUploaded, format!("Uploaded {}", document.title)),
                &document.uploaded_by,
                now,
            )
            .await?;
        info!(document_id = %document.id, deal_id = %document.deal_id, "Document uploaded");
        Ok(document)
    }

    /// DRAFT -> PENDING_SIGNATURE.
    pub async fn request_signature(&self, id: &DocumentId, actor: &PartyId, now: DateTime<Utc>) -> Result<DocumentRecord> {
        let mut document = self.get(id).await?;
        if !document.request_signature(now)? {
            return Ok(document);
        }
        self.documents.store(document.clone()).await?;

        self.log
            .record_for_deal(
                &document.deal_id,
                Entry::new(
                    ActivityType::SignatureRequested,
                    format!("Signature requested for {}", document.title),
                ),
                actor,
                now,
            )
            .await?;
        info!(document_id = %id, actor = %actor, "Signature requested");
        Ok(document)
    }

    /// PENDING_SIGNATURE -> SIGNED, driven by the e-signature collaborator.
    pub async fn mark_signed(&self, id: &DocumentId, signed_by: &PartyId, signed_at: DateTime<Utc>) -> Result<DocumentRecord> {
        let mut document = self.get(id).await?;
        if !document.mark_signed(signed_by.clone(), signed_at)? {
            return Ok(document);
        }
        self.documents.store(document.clone()).await?;

        self.log
            .record_for_deal(
                &document.deal_id,
                Entry::new(ActivityType::DocumentSigned, format!("{} signed", document.title)),
                signed_by,
                signed_at,
            )
            .await?;
        info!(document_id = %id, signed_by = %signed_by, "Document signed");
        Ok(document)
    }

    /// Pins `document` as the deal's SPA for the CLOSING check.
    pub async fn designate_spa(
        &self,
        deal_id: &DealId,
        document_id: &DocumentId,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<Deal> {
        let document = self.get(document_id).await?;
        if &document.deal_id != deal_id || document.doc_type != DocumentType::Spa {
            return Err(DealError::ValidationError(format!(
                "document {document_id} is not an SPA of deal {deal_id}"
            )));
        }
        let mut deal = self.deal(deal_id).await?;
        if deal.spa_document.as_ref() == Some(document_id) {
            return Ok(deal);
        }
        let expected = deal.version;
        deal.spa_document = Some(document_id.clone());
        let deal = self.deals.compare_and_swap(deal, expected).await?;

        self.log
            .record_for_deal(
                deal_id,
                Entry::new(ActivityType::SpaDesignated, format!("{} designated as SPA", document.title)),
                actor,
                now,
            )
            .await?;
        Ok(deal)
    }

    /// The SPA the CLOSING transition checks: the designated one, otherwise the
    /// most recently recorded SPA-typed document.
    pub async fn designated_spa(&self, deal: &Deal) -> Result<Option<DocumentRecord>> {
        if let Some(id) = &deal.spa_document {
            return self.documents.get(id).await;
        }
        Ok(self
            .documents
            .for_deal(&deal.id)
            .await?
            .into_iter()
            .filter(|d| d.doc_type == DocumentType::Spa)
            .max_by(|a, b| a.created_at.cmp(&b.created_at)))
    }

    pub async fn get(&self, id: &DocumentId) -> Result<DocumentRecord> {
        self.documents
            .get(id)
            .await?
            .ok_or_else(|| DealError::not_found("document", id))
    }

    pub async fn for_deal(&self, deal: &DealId) -> Result<Vec<DocumentRecord>> {
        self.documents.for_deal(deal).await
    }

    async fn deal(&self, id: &DealId) -> Result<Deal> {
        self.deals
            .get(id)
            .await?
            .ok_or_else(|| DealError::not_found("deal", id))
    }
}
