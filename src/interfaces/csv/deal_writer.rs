use crate::application::engine::DealReport;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct DealRow {
    deal: String,
    stage: String,
    agreed_price: String,
    pending: String,
    escrowed: String,
    released: String,
    refunded: String,
    milestones_done: usize,
    milestones_total: usize,
}

impl From<&DealReport> for DealRow {
    fn from(report: &DealReport) -> Self {
        Self {
            deal: report.deal_id.to_string(),
            stage: report.stage.to_string(),
            agreed_price: report.agreed_price.to_string(),
            pending: report.payments.pending.to_string(),
            escrowed: report.payments.escrowed.to_string(),
            released: report.payments.released.to_string(),
            refunded: report.payments.refunded.to_string(),
            milestones_done: report.milestones_done,
            milestones_total: report.milestones_total,
        }
    }
}

/// Writes the per-deal summary as CSV. Amounts are printed without trailing zeros.
pub struct DealWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> DealWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_reports(&mut self, reports: &[DealReport]) -> Result<()> {
        if reports.is_empty() {
            self.writer.write_record([
                "deal",
                "stage",
                "agreed_price",
                "pending",
                "escrowed",
                "released",
                "refunded",
                "milestones_done",
                "milestones_total",
            ])?;
        }
        for report in reports {
            self.writer.serialize(DealRow::from(report))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
