use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::period::{Period, WINDOW_LEN};

/// Reporting unit: one contract of one provider within one project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub project: String,
    pub provider: String,
    pub contract: String,
}

impl EntityKey {
    pub fn new(
        project: impl Into<String>,
        provider: impl Into<String>,
        contract: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            provider: provider.into(),
            contract: contract.into(),
        }
    }
}

/// Document status classification as stored in the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentStatus {
    Conforme,
    NaoConforme,
    EmAnalise,
    NaoEnviado,
    Other(String),
}

impl DocumentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DocumentStatus::Conforme => "Conforme",
            DocumentStatus::NaoConforme => "Não Conforme",
            DocumentStatus::EmAnalise => "Em Análise",
            DocumentStatus::NaoEnviado => "Não Enviado",
            DocumentStatus::Other(raw) => raw,
        }
    }
}

impl From<&str> for DocumentStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "Conforme" => DocumentStatus::Conforme,
            "Não Conforme" => DocumentStatus::NaoConforme,
            "Em Análise" => DocumentStatus::EmAnalise,
            "Não Enviado" => DocumentStatus::NaoEnviado,
            other => DocumentStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One warehouse detail row. Relevance and criticality are kept as the raw
/// text the warehouse returned; interpretation belongs to the rule engine.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub key: EntityKey,
    pub period: String,
    pub period_date: Option<NaiveDate>,
    pub document: String,
    pub provider_cnpj: String,
    pub status: DocumentStatus,
    pub critical: String,
    pub relevance: Option<String>,
    pub observation: String,
    pub regularization: String,
    pub composite_key: String,
    pub recipients: String,
}

#[derive(Debug, Clone)]
pub struct PeriodAggregate {
    pub key: EntityKey,
    pub period: Period,
    pub pendencies: i64,
    pub critical: i64,
    pub achieved: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    pub period: Period,
    pub pendencies: i64,
    pub critical: i64,
    pub achieved: f64,
}

impl HistoryPoint {
    /// A point with neither achievement nor pendencies: the contract was not
    /// in force that month.
    pub fn is_out_of_term(&self) -> bool {
        self.achieved == 0.0 && self.pendencies == 0
    }

    pub fn empty(period: Period) -> Self {
        Self {
            period,
            pendencies: 0,
            critical: 0,
            achieved: 0.0,
        }
    }
}

/// Dense history over the canonical window, oldest period first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySeries {
    pub key: EntityKey,
    pub points: [HistoryPoint; WINDOW_LEN],
}

impl HistorySeries {
    pub fn total_pendencies(&self) -> i64 {
        self.points.iter().map(|p| p.pendencies).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusLabel {
    #[serde(rename = "Atende")]
    Atende,
    #[serde(rename = "Atende Parcial")]
    AtendeParcial,
    #[serde(rename = "Não Atende")]
    NaoAtende,
    #[serde(rename = "Crítico")]
    Critico,
    #[serde(rename = "Baixa Performance")]
    BaixaPerformance,
    #[serde(rename = "Sem dados")]
    SemDados,
    #[serde(rename = "Fora da Vigência")]
    ForaDaVigencia,
}

impl StatusLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusLabel::Atende => "Atende",
            StatusLabel::AtendeParcial => "Atende Parcial",
            StatusLabel::NaoAtende => "Não Atende",
            StatusLabel::Critico => "Crítico",
            StatusLabel::BaixaPerformance => "Baixa Performance",
            StatusLabel::SemDados => "Sem dados",
            StatusLabel::ForaDaVigencia => "Fora da Vigência",
        }
    }

    /// Hex color used wherever the label is displayed.
    pub fn color(self) -> &'static str {
        match self {
            StatusLabel::Atende => "#16A34A",
            StatusLabel::AtendeParcial => "#FACC15",
            StatusLabel::NaoAtende => "#DC2626",
            StatusLabel::Critico => "#7F1D1D",
            StatusLabel::BaixaPerformance => "#F97316",
            StatusLabel::SemDados => "#6B7280",
            StatusLabel::ForaDaVigencia => "#9CA3AF",
        }
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplianceScore {
    pub achieved: f64,
    pub critical_count: usize,
    pub label: StatusLabel,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractSummary {
    pub project: String,
    pub provider: String,
    pub contract: String,
    pub period: String,
    pub recipients: String,
    pub total_documents: usize,
    pub total_pendencies: usize,
    pub achieved: f64,
    pub label: StatusLabel,
}
