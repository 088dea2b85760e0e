use crate::models::{ComplianceScore, DocumentRecord, DocumentStatus, StatusLabel};

/// Projects for which documents still under review count as compliant.
pub const REVIEW_COUNTS_AS_CONFORME: [&str; 2] = ["Reparação Bacia do Rio Doce", "Samarco - COA"];

const FLORESTAL_PROJECTS: [&str; 3] = [
    "MSFC FLORESTAL LTDA",
    "BRACELL BAHIA FLORESTAL",
    "BRACELL BAHIA SPECIALTY CELLULOSE",
];

/// Rule family a project is labeled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectFamily {
    Vallourec,
    Florestal,
    Sucuriu,
    Default,
}

impl ProjectFamily {
    pub fn resolve(project: &str) -> Self {
        if project == "Vallourec" {
            ProjectFamily::Vallourec
        } else if FLORESTAL_PROJECTS.contains(&project) {
            ProjectFamily::Florestal
        } else if project == "Projeto Sucuriú" {
            ProjectFamily::Sucuriu
        } else {
            ProjectFamily::Default
        }
    }

    /// Evaluates the family's thresholds top to bottom; first match wins.
    /// The first boundary check runs before the critical-count override.
    pub fn classify(self, perc: f64, critical: usize) -> StatusLabel {
        match self {
            ProjectFamily::Vallourec => vallourec(perc, critical),
            ProjectFamily::Florestal => florestal(perc, critical),
            ProjectFamily::Sucuriu => sucuriu(perc, critical),
            ProjectFamily::Default => default_family(perc),
        }
    }
}

fn vallourec(perc: f64, critical: usize) -> StatusLabel {
    if perc <= 0.90 {
        StatusLabel::NaoAtende
    } else if critical >= 1 {
        StatusLabel::NaoAtende
    } else if perc > 0.99 {
        StatusLabel::Atende
    } else if perc >= 0.90 {
        StatusLabel::AtendeParcial
    } else {
        StatusLabel::NaoAtende
    }
}

fn florestal(perc: f64, critical: usize) -> StatusLabel {
    if perc < 0.50 {
        StatusLabel::Critico
    } else if critical >= 1 {
        StatusLabel::NaoAtende
    } else if perc >= 0.80 {
        StatusLabel::Atende
    } else if (0.50..0.80).contains(&perc) {
        StatusLabel::NaoAtende
    } else {
        StatusLabel::Critico
    }
}

fn sucuriu(perc: f64, critical: usize) -> StatusLabel {
    if perc <= 0.70 {
        StatusLabel::Critico
    } else if critical >= 1 {
        StatusLabel::NaoAtende
    } else if perc >= 0.93 {
        StatusLabel::Atende
    } else if (0.80..0.93).contains(&perc) {
        StatusLabel::AtendeParcial
    } else if (0.70..0.80).contains(&perc) {
        StatusLabel::BaixaPerformance
    } else {
        StatusLabel::NaoAtende
    }
}

fn default_family(perc: f64) -> StatusLabel {
    if perc >= 0.99 {
        StatusLabel::Atende
    } else if perc <= 0.90 {
        StatusLabel::Critico
    } else if perc <= 0.96 {
        StatusLabel::NaoAtende
    } else {
        StatusLabel::AtendeParcial
    }
}

pub fn classify(project: &str, perc: f64, critical: usize) -> StatusLabel {
    ProjectFamily::resolve(project).classify(perc, critical)
}

pub fn is_conforme(project: &str, status: &DocumentStatus) -> bool {
    match status {
        DocumentStatus::Conforme => true,
        DocumentStatus::EmAnalise => REVIEW_COUNTS_AS_CONFORME.contains(&project),
        _ => false,
    }
}

/// Postgres regex matching the finite decimal literals `f64::from_str`
/// accepts. The aggregate query uses it so both coercions agree.
pub const RELEVANCE_PATTERN: &str = r"^[-+]?([0-9]+\.?[0-9]*|\.[0-9]+)([eE][-+]?[0-9]+)?$";

/// Trims ASCII whitespace, like `BTRIM(x, E' \t\n\r\f')` in the aggregate query.
fn trim_field(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_ascii_whitespace())
}

pub fn is_critical_pendency(record: &DocumentRecord) -> bool {
    record.status == DocumentStatus::NaoConforme && trim_field(&record.critical) == "1"
}

/// Relevance weight of a record; missing or non-numeric values count as 0.
pub fn relevance_weight(record: &DocumentRecord) -> f64 {
    record
        .relevance
        .as_deref()
        .map(trim_field)
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// Scores the current-period records of one entity. Relevance weights are
/// pre-normalized, so the conforme sum is already the achieved fraction.
pub fn score(records: &[DocumentRecord], project: &str) -> ComplianceScore {
    if records.is_empty() {
        return ComplianceScore {
            achieved: 0.0,
            critical_count: 0,
            label: StatusLabel::SemDados,
        };
    }

    let achieved: f64 = records
        .iter()
        .filter(|record| is_conforme(project, &record.status))
        .map(relevance_weight)
        .sum();
    let critical_count = records.iter().filter(|r| is_critical_pendency(r)).count();

    ComplianceScore {
        achieved,
        critical_count,
        label: classify(project, achieved, critical_count),
    }
}
