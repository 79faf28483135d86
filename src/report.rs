//! Read surface: reconciled records with their risk assessments.

use crate::reconcile::{ReconciledRecord, Reconciler, Reconciliation};
use crate::risk::{RiskAssessment, RiskClassifier, RiskTier};
use crate::snapshot::SessionRecord;
use serde::{Deserialize, Serialize};

/// One session as presented to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRisk {
    pub record: ReconciledRecord,
    pub assessment: RiskAssessment,
}

/// Aggregate counts over a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub total_sessions: usize,
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
    pub skipped_records: usize,
    pub deduplicated_records: usize,
}

/// Risk view over every session found in a set of rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub sessions: Vec<SessionRisk>,
    pub summary: RiskSummary,
}

impl RiskReport {
    /// Reconcile `records` and classify each resulting session.
    pub fn build(
        records: &[SessionRecord],
        reconciler: &Reconciler,
        classifier: &RiskClassifier,
    ) -> Self {
        Self::from_reconciliation(reconciler.reconcile(records), classifier)
    }

    /// Classify the sessions of a finished reconciliation pass.
    pub fn from_reconciliation(reconciliation: Reconciliation, classifier: &RiskClassifier) -> Self {
        let mut summary = RiskSummary {
            skipped_records: reconciliation.skipped,
            deduplicated_records: reconciliation.deduplicated,
            ..RiskSummary::default()
        };

        let sessions: Vec<SessionRisk> = reconciliation
            .into_records()
            .into_iter()
            .map(|record| {
                let assessment = classifier.classify(&record);
                match assessment.tier {
                    RiskTier::High => summary.high_risk += 1,
                    RiskTier::Medium => summary.medium_risk += 1,
                    RiskTier::Low => summary.low_risk += 1,
                }
                SessionRisk { record, assessment }
            })
            .collect();

        summary.total_sessions = sessions.len();
        Self { sessions, summary }
    }

    pub fn session(&self, session_id: &str) -> Option<&SessionRisk> {
        self.sessions
            .iter()
            .find(|s| s.record.session_id == session_id)
    }
}
