use std::fmt::Write;

use anyhow::Context;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use crate::app_config::Palette;
use crate::chart::{self, PngRasterizer};
use crate::compliance;
use crate::mailer::file_slug;
use crate::models::{ComplianceScore, DocumentRecord, EntityKey, HistorySeries, StatusLabel};
use crate::period::Period;

pub const CHART_CID: &str = "grafico_pendencias";
pub const LOGO_CID: &str = "logo";

const NOTE_LIMIT: usize = 200;
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// How the trend chart is referenced from the HTML body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartEmbed {
    /// `cid:` reference to an inline image part (email delivery).
    ContentId,
    /// SVG markup written straight into the document (file preview).
    Inline,
}

pub struct ReportContext<'a> {
    pub key: &'a EntityKey,
    pub period: Period,
    pub records: &'a [DocumentRecord],
    pub history: &'a HistorySeries,
    pub recipients: &'a [String],
    pub generated_at: DateTime<FixedOffset>,
}

#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub html: String,
    pub chart_svg: String,
    pub score: ComplianceScore,
}

pub struct ReportRenderer {
    palette: Palette,
    logo: Option<Vec<u8>>,
    offset: FixedOffset,
    rasterizer: PngRasterizer,
}

impl ReportRenderer {
    pub fn new(palette: Palette, logo: Option<Vec<u8>>, utc_offset_hours: i32) -> anyhow::Result<Self> {
        let offset = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .with_context(|| format!("invalid UTC offset {utc_offset_hours}h"))?;
        Ok(Self {
            palette,
            logo,
            offset,
            rasterizer: PngRasterizer::new(),
        })
    }

    pub fn logo(&self) -> Option<&[u8]> {
        self.logo.as_deref()
    }

    /// PNG rendition of a chart for the email inline part.
    pub fn chart_png(&self, chart_svg: &str) -> anyhow::Result<Vec<u8>> {
        self.rasterizer.rasterize(chart_svg)
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    pub fn render(&self, ctx: &ReportContext<'_>, embed: ChartEmbed) -> RenderedReport {
        let palette = &self.palette;
        let score = compliance::score(ctx.records, &ctx.key.project);
        let chart_svg = chart::render_trend_chart(ctx.history, palette);
        let chart_html = match embed {
            ChartEmbed::ContentId => format!(
                "<img src=\"cid:{CHART_CID}\" style=\"width:100%;max-width:100%;border-radius:8px;display:block;\">"
            ),
            ChartEmbed::Inline => chart_svg.clone(),
        };

        let mut output = String::new();
        let _ = writeln!(
            output,
            "<div style=\"font-family:Arial,sans-serif;color:{};background:{};padding:24px;\">",
            palette.text, palette.background
        );
        let _ = writeln!(
            output,
            "<div style=\"background:white;border-radius:12px;padding:28px;max-width:800px;margin:auto;\">"
        );

        let _ = writeln!(
            output,
            "<div style=\"display:flex;justify-content:space-between;align-items:center;gap:12px;flex-wrap:wrap;\">"
        );
        let _ = writeln!(output, "<div style=\"flex:1;min-width:260px;\">");
        let _ = writeln!(
            output,
            "<h2 style=\"color:{};margin:0;\">Relatório de Pendências de Documentos</h2>",
            palette.primary
        );
        let _ = writeln!(
            output,
            "<p style=\"font-size:13px;color:#4b5563;margin-top:6px;line-height:1.4;\">\
             <b>Projeto:</b> {}<br><b>Prestador:</b> {}<br><b>Contrato:</b> {}<br>\
             <b>Competência:</b> {}<br><b>Gerado em:</b> {}</p>",
            escape_html(&ctx.key.project),
            escape_html(&ctx.key.provider),
            escape_html(&ctx.key.contract),
            ctx.period,
            ctx.generated_at.format("%d/%m/%Y %H:%M")
        );
        let _ = writeln!(output, "</div>");
        if self.logo.is_some() {
            let _ = writeln!(
                output,
                "<div style=\"flex:0 0 auto;\"><img src=\"cid:{LOGO_CID}\" alt=\"logo\" \
                 style=\"height:50px;max-width:150px;display:block;\"></div>"
            );
        }
        let _ = writeln!(output, "</div>");
        let _ = writeln!(
            output,
            "<hr style=\"margin:18px 0;border:0;border-top:1px solid #e5e7eb;\">"
        );

        let _ = writeln!(
            output,
            "<div style=\"display:flex;gap:20px;align-items:flex-start;flex-wrap:wrap;\">"
        );
        let _ = writeln!(output, "<div style=\"flex:1;min-width:320px;\">{chart_html}</div>");
        let _ = writeln!(
            output,
            "<div style=\"flex:0 0 220px;text-align:center;border:1px solid #E5E7EB;padding:14px 10px;\
             border-radius:10px;background:#F9FAFB;\">"
        );
        let _ = writeln!(output, "<div style=\"font-size:12px;color:#4B5563;\">% Atingido</div>");
        let _ = writeln!(
            output,
            "<div style=\"font-size:28px;color:{};font-weight:900;\">{}</div>",
            palette.primary,
            format_percent(score.achieved)
        );
        let _ = writeln!(
            output,
            "<div style=\"font-size:11px;color:{};font-weight:bold;margin-bottom:8px;\">{}</div>",
            score.label.color(),
            score.label
        );
        if score.critical_count > 0 {
            let _ = writeln!(
                output,
                "<div style=\"font-size:11px;color:{};margin-bottom:8px;\">{} pendência(s) crítica(s)</div>",
                StatusLabel::Critico.color(),
                score.critical_count
            );
        }
        let _ = writeln!(
            output,
            "<div style=\"margin-top:6px;border-top:1px solid #E5E7EB;padding-top:6px;\">\
             <div style=\"font-size:11px;color:{};font-weight:bold;margin-bottom:4px;\">Últimas Competências</div>",
            palette.primary
        );
        let _ = writeln!(
            output,
            "{}</div>",
            history_table(ctx.history, &ctx.key.project, palette)
        );
        let _ = writeln!(output, "</div>");
        let _ = writeln!(output, "</div>");

        let _ = writeln!(
            output,
            "<h3 style=\"color:{};margin-top:24px;\">Lista de Documentos</h3>",
            palette.primary
        );
        let _ = writeln!(output, "{}", documents_table(ctx.records, palette));
        let _ = writeln!(
            output,
            "<p style=\"margin-top:12px;font-size:12px;color:#6b7280;\">* Listagem de situação atual</p>"
        );

        let recipients: Vec<String> = ctx
            .recipients
            .iter()
            .map(|r| format!("• {}", escape_html(r)))
            .collect();
        let _ = writeln!(
            output,
            "<hr style=\"margin:20px 0;border:0;border-top:1px solid #e5e7eb;\">\
             <p style=\"font-size:11px;color:#9ca3af;\">Enviado automaticamente<br>\
             <b>Destinatários:</b><br>{}</p>",
            recipients.join("<br>")
        );
        let _ = writeln!(output, "</div>");
        let _ = writeln!(output, "</div>");

        RenderedReport {
            html: output,
            chart_svg,
            score,
        }
    }
}

pub fn format_percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Period, achieved percentage and status label for each history point.
/// Months without achievement or pendencies are shown as out of term.
pub fn history_table(history: &HistorySeries, project: &str, palette: &Palette) -> String {
    let mut rows = String::new();
    for point in history.points.iter() {
        let (percent, label) = if point.is_out_of_term() {
            ("-".to_string(), StatusLabel::ForaDaVigencia)
        } else {
            let critical = usize::try_from(point.critical).unwrap_or(0);
            (
                format_percent(point.achieved),
                compliance::classify(project, point.achieved, critical),
            )
        };
        let _ = writeln!(
            rows,
            "<tr><td style='padding:6px 8px;font-size:12px;'>{}</td>\
             <td style='padding:6px 8px;font-size:12px;text-align:right;color:#374151;'>{}</td>\
             <td style='padding:6px 8px;font-size:12px;color:{};font-weight:bold;'>{}</td></tr>",
            point.period,
            percent,
            label.color(),
            label
        );
    }

    format!(
        "<table style='width:100%;margin-top:10px;border-collapse:collapse;font-family:Arial,sans-serif;\
         background:white;border-radius:6px;'>\
         <thead><tr style='background:{};color:white;font-size:12px;'>\
         <th style='padding:6px 8px;text-align:left;'>Competência</th>\
         <th style='padding:6px 8px;text-align:right;'>% Atingido</th>\
         <th style='padding:6px 8px;text-align:left;'>Status</th></tr></thead>\
         <tbody>\n{rows}</tbody></table>",
        palette.primary
    )
}

fn truncate_note(text: &str) -> String {
    text.chars().take(NOTE_LIMIT).collect()
}

pub fn documents_table(records: &[DocumentRecord], palette: &Palette) -> String {
    if records.is_empty() {
        return "<p style='font-size:13px;color:#6b7280;'>Nenhum documento encontrado.</p>".to_string();
    }

    let mut output = String::new();
    let _ = write!(
        output,
        "<table style='width:100%;border-collapse:collapse;font-family:Arial,sans-serif;font-size:12px;'>\
         <thead><tr style='background:{};color:white;'>",
        palette.primary
    );
    for column in ["Documento", "Observação", "Regularização", "Status"] {
        let _ = write!(output, "<th style='padding:6px 8px;text-align:left;'>{column}</th>");
    }
    let _ = writeln!(output, "</tr></thead><tbody>");

    for record in records {
        let _ = write!(output, "<tr style='border-bottom:1px solid #E5E7EB;'>");
        for value in [
            escape_html(&record.document),
            escape_html(&truncate_note(&record.observation)),
            escape_html(&truncate_note(&record.regularization)),
            escape_html(record.status.as_str()),
        ] {
            let _ = write!(output, "<td style='padding:6px 8px;'>{value}</td>");
        }
        let _ = writeln!(output, "</tr>");
    }
    let _ = write!(output, "</tbody></table>");
    output
}

pub fn subject(key: &EntityKey, period: Period) -> String {
    format!(
        "[Pendências Docs] {} | Contrato {} | {}",
        key.provider, key.contract, period
    )
}

pub fn attachment_filename(subject: &str) -> String {
    format!("pendencias_{}.csv", file_slug(subject))
}

#[derive(Serialize)]
struct OutstandingRow<'a> {
    #[serde(rename = "PROJETO")]
    project: &'a str,
    #[serde(rename = "COMPETENCIA")]
    period: &'a str,
    #[serde(rename = "Competencia_Data")]
    period_date: Option<NaiveDate>,
    #[serde(rename = "DOCUMENTO")]
    document: &'a str,
    #[serde(rename = "PRESTADOR")]
    provider: &'a str,
    #[serde(rename = "CNPJ_PRESTADOR")]
    provider_cnpj: &'a str,
    #[serde(rename = "CONTRATO")]
    contract: &'a str,
    #[serde(rename = "STATUS_GERAL_Regra")]
    status: &'a str,
    #[serde(rename = "CRITICO")]
    critical: &'a str,
    #[serde(rename = "RELEVANCIA")]
    relevance: Option<&'a str>,
    #[serde(rename = "DOCUMENTO_APROV_OBS2")]
    observation: &'a str,
    #[serde(rename = "DOCUMENTO_APROV_REGULARIZA2")]
    regularization: &'a str,
    #[serde(rename = "Chave_Composta")]
    composite_key: &'a str,
    #[serde(rename = "email_envio")]
    recipients: &'a str,
}

impl<'a> From<&'a DocumentRecord> for OutstandingRow<'a> {
    fn from(record: &'a DocumentRecord) -> Self {
        Self {
            project: &record.key.project,
            period: &record.period,
            period_date: record.period_date,
            document: &record.document,
            provider: &record.key.provider,
            provider_cnpj: &record.provider_cnpj,
            contract: &record.key.contract,
            status: record.status.as_str(),
            critical: &record.critical,
            relevance: record.relevance.as_deref(),
            observation: &record.observation,
            regularization: &record.regularization,
            composite_key: &record.composite_key,
            recipients: &record.recipients,
        }
    }
}

/// Semicolon-delimited UTF-8 CSV with a byte order mark.
pub fn outstanding_csv(records: &[DocumentRecord]) -> anyhow::Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(UTF8_BOM.to_vec());
    for record in records {
        wtr.serialize(OutstandingRow::from(record))?;
    }
    wtr.flush()?;
    wtr.into_inner()
        .map_err(|err| anyhow::anyhow!("failed to finish CSV attachment: {}", err.error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::reconstruct;
    use crate::models::{DocumentStatus, PeriodAggregate};

    fn key() -> EntityKey {
        EntityKey::new("Vallourec", "Acme <Servicos>", "CT-001")
    }

    fn record(status: &str, relevance: &str) -> DocumentRecord {
        DocumentRecord {
            key: key(),
            period: "2025-09".to_string(),
            period_date: NaiveDate::from_ymd_opt(2025, 9, 1),
            document: "ASO".to_string(),
            provider_cnpj: "00.000.000/0001-00".to_string(),
            status: DocumentStatus::from(status),
            critical: "0".to_string(),
            relevance: Some(relevance.to_string()),
            observation: "x".repeat(250),
            regularization: "Enviar; até dia 10".to_string(),
            composite_key: "k1".to_string(),
            recipients: "ops@example.com".to_string(),
        }
    }

    fn history() -> HistorySeries {
        let rows = vec![
            PeriodAggregate {
                key: key(),
                period: "2025-08".parse().unwrap(),
                pendencies: 3,
                critical: 1,
                achieved: 0.95,
            },
            PeriodAggregate {
                key: key(),
                period: "2025-09".parse().unwrap(),
                pendencies: 1,
                critical: 0,
                achieved: 0.996,
            },
        ];
        reconstruct(&rows, &key(), "2025-09".parse().unwrap())
    }

    fn renderer(logo: Option<Vec<u8>>) -> ReportRenderer {
        ReportRenderer::new(Palette::default(), logo, -3).unwrap()
    }

    fn render(records: &[DocumentRecord], embed: ChartEmbed, logo: Option<Vec<u8>>) -> RenderedReport {
        let key = key();
        let history = history();
        let recipients = vec!["ops@example.com".to_string()];
        let renderer = renderer(logo);
        let generated_at = DateTime::parse_from_rfc3339("2025-10-02T09:30:00-03:00").unwrap();
        let ctx = ReportContext {
            key: &key,
            period: "2025-09".parse().unwrap(),
            records,
            history: &history,
            recipients: &recipients,
            generated_at,
        };
        renderer.render(&ctx, embed)
    }

    #[test]
    fn report_shows_kpi_header_and_escaped_fields() {
        let records = vec![record("Conforme", "0.95"), record("Não Conforme", "0.05")];
        let report = render(&records, ChartEmbed::ContentId, None);
        assert_eq!(report.score.label, StatusLabel::AtendeParcial);
        assert!(report.html.contains("95.0%"));
        assert!(report.html.contains("Atende Parcial"));
        assert!(report.html.contains("Acme &lt;Servicos&gt;"));
        assert!(report.html.contains("02/10/2025 09:30"));
        assert!(report.html.contains("cid:grafico_pendencias"));
        assert!(!report.html.contains("cid:logo"));
        assert!(report.html.contains("• ops@example.com"));
    }

    #[test]
    fn inline_embed_places_svg_in_body() {
        let report = render(&[], ChartEmbed::Inline, Some(vec![0x89, b'P']));
        assert!(report.html.contains("<svg"));
        assert!(!report.html.contains("cid:grafico_pendencias"));
        assert!(report.html.contains("cid:logo"));
        assert_eq!(report.score.label, StatusLabel::SemDados);
        assert!(report.html.contains("Nenhum documento encontrado."));
    }

    #[test]
    fn history_table_labels_each_period() {
        let table = history_table(&history(), "Vallourec", &Palette::default());
        assert_eq!(table.matches("<tr><td").count(), 5);
        // 2025-08 has a critical pendency, 2025-09 is above 0.99.
        assert!(table.contains("95.0%"));
        assert!(table.contains("99.6%"));
        assert!(table.contains(&format!("color:{};font-weight:bold;'>Atende<", StatusLabel::Atende.color())));
        assert_eq!(table.matches(">Não Atende<").count(), 1);
        assert_eq!(table.matches(">Fora da Vigência<").count(), 3);
        assert_eq!(table.matches("color:#374151;'>-</td>").count(), 3);
        assert!(!table.contains("0.0%"));
    }

    #[test]
    fn empty_months_are_out_of_term_for_every_family() {
        let key = EntityKey::new("Desconhecido", "Acme", "CT-009");
        let rows = vec![PeriodAggregate {
            key: key.clone(),
            period: "2025-09".parse().unwrap(),
            pendencies: 0,
            critical: 0,
            achieved: 1.0,
        }];
        let history = reconstruct(&rows, &key, "2025-09".parse().unwrap());
        let table = history_table(&history, "Desconhecido", &Palette::default());
        assert_eq!(table.matches(">Crítico<").count(), 0);
        assert_eq!(
            table
                .matches(&format!("color:{};font-weight:bold;'>Fora da Vigência<", StatusLabel::ForaDaVigencia.color()))
                .count(),
            4
        );
        assert!(table.contains("100.0%"));
    }

    #[test]
    fn month_with_pendencies_but_no_achievement_is_still_classified() {
        let key = EntityKey::new("Desconhecido", "Acme", "CT-009");
        let rows = vec![PeriodAggregate {
            key: key.clone(),
            period: "2025-09".parse().unwrap(),
            pendencies: 2,
            critical: 0,
            achieved: 0.0,
        }];
        let history = reconstruct(&rows, &key, "2025-09".parse().unwrap());
        let table = history_table(&history, "Desconhecido", &Palette::default());
        assert_eq!(table.matches(">Crítico<").count(), 1);
        assert!(table.contains("0.0%"));
    }

    #[test]
    fn documents_table_truncates_long_notes() {
        let table = documents_table(&[record("Não Conforme", "0.1")], &Palette::default());
        assert!(table.contains(&"x".repeat(200)));
        assert!(!table.contains(&"x".repeat(201)));
        assert!(table.contains("Não Conforme"));
    }

    #[test]
    fn subject_and_attachment_name_follow_entity() {
        let subject = subject(&key(), "2025-09".parse().unwrap());
        assert_eq!(subject, "[Pendências Docs] Acme <Servicos> | Contrato CT-001 | 2025-09");
        let filename = attachment_filename(&subject);
        assert!(filename.starts_with("pendencias_"));
        assert!(filename.ends_with(".csv"));
        assert!(filename["pendencias_".len()..filename.len() - 4]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn csv_has_bom_semicolons_and_original_headers() {
        let bytes = outstanding_csv(&[record("Não Conforme", "0.1")]).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("PROJETO;COMPETENCIA;Competencia_Data;DOCUMENTO"));
        assert!(header.ends_with("Chave_Composta;email_envio"));
        let row = lines.next().unwrap();
        assert!(row.contains("2025-09-01"));
        assert!(row.contains("\"Enviar; até dia 10\""));
    }

    #[test]
    fn rejects_out_of_range_offset() {
        assert!(ReportRenderer::new(Palette::default(), None, 30).is_err());
    }
}
