use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::app_config::validate_table_name;
use crate::compliance::{RELEVANCE_PATTERN, REVIEW_COUNTS_AS_CONFORME};
use crate::models::{DocumentRecord, DocumentStatus, EntityKey, PeriodAggregate};
use crate::period::Period;

/// Read-only access to the document warehouse table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Detail rows of the target period.
    async fn fetch_period_records(&self, period: Period) -> anyhow::Result<Vec<DocumentRecord>>;
    /// Per-entity aggregates over the five-period window ending at `period`.
    async fn fetch_period_aggregates(&self, period: Period)
        -> anyhow::Result<Vec<PeriodAggregate>>;
    /// Every outstanding row ("Não Conforme" or "Não Enviado"), all periods.
    async fn fetch_outstanding(&self) -> anyhow::Result<Vec<DocumentRecord>>;
}

/// Everything one report run needs, fetched up front.
#[derive(Debug, Clone)]
pub struct ReportData {
    pub target: Period,
    pub current: Vec<DocumentRecord>,
    pub aggregates: Vec<PeriodAggregate>,
    pub outstanding: Vec<DocumentRecord>,
}

pub async fn load_report_data(
    warehouse: &dyn Warehouse,
    target: Period,
) -> anyhow::Result<ReportData> {
    let current = warehouse
        .fetch_period_records(target)
        .await
        .with_context(|| format!("failed to fetch records for {target}"))?;
    let aggregates = warehouse
        .fetch_period_aggregates(target)
        .await
        .with_context(|| format!("failed to fetch history ending at {target}"))?;
    let outstanding = warehouse
        .fetch_outstanding()
        .await
        .context("failed to fetch outstanding documents")?;

    debug!(
        "loaded {} records, {} aggregates, {} outstanding rows for {}",
        current.len(),
        aggregates.len(),
        outstanding.len(),
        target
    );

    Ok(ReportData {
        target,
        current,
        aggregates,
        outstanding,
    })
}

const DETAIL_COLUMNS: &str = r#"
    "PROJETO"::text AS projeto,
    LEFT("COMPETENCIA"::text, 7) AS competencia,
    "Competencia_Data"::date AS competencia_data,
    "DOCUMENTO"::text AS documento,
    "PRESTADOR"::text AS prestador,
    "CNPJ_PRESTADOR"::text AS cnpj_prestador,
    "CONTRATO"::text AS contrato,
    "STATUS_GERAL_Regra"::text AS status,
    "CRITICO"::text AS critico,
    "RELEVANCIA"::text AS relevancia,
    "DOCUMENTO_APROV_OBS2"::text AS observacao,
    "DOCUMENTO_APROV_REGULARIZA2"::text AS regularizacao,
    "Chave_Composta"::text AS chave_composta,
    "email_envio"::text AS email_envio
"#;

pub struct PgWarehouse {
    pool: PgPool,
    table: String,
}

impl PgWarehouse {
    pub fn new(pool: PgPool, table: &str) -> anyhow::Result<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    fn period_records_sql(&self) -> String {
        format!(
            "SELECT {DETAIL_COLUMNS} FROM {} WHERE LEFT(\"COMPETENCIA\"::text, 7) = $1",
            self.table
        )
    }

    fn outstanding_sql(&self) -> String {
        format!(
            "SELECT {DETAIL_COLUMNS} FROM {} \
             WHERE \"STATUS_GERAL_Regra\" IN ('Não Conforme', 'Não Enviado')",
            self.table
        )
    }

    fn aggregates_sql(&self) -> String {
        format!(
            r#"
            SELECT
              "PROJETO"::text AS projeto,
              "PRESTADOR"::text AS prestador,
              "CONTRATO"::text AS contrato,
              LEFT("COMPETENCIA"::text, 7) AS competencia,
              COUNT(*) FILTER (WHERE "STATUS_GERAL_Regra" = 'Não Conforme') AS total_pendencias,
              COUNT(*) FILTER (
                WHERE "STATUS_GERAL_Regra" = 'Não Conforme'
                  AND BTRIM("CRITICO"::text, E' \t\n\r\f') = '1'
              ) AS total_criticos,
              COALESCE(SUM(
                CASE
                  WHEN ("STATUS_GERAL_Regra" = 'Conforme'
                        OR ("STATUS_GERAL_Regra" = 'Em Análise' AND "PROJETO"::text = ANY($2)))
                   AND BTRIM("RELEVANCIA"::text, E' \t\n\r\f') ~ '{pattern}'
                  THEN BTRIM("RELEVANCIA"::text, E' \t\n\r\f')::float8
                  ELSE 0
                END
              ), 0)::float8 AS perc_atingido
            FROM {table}
            WHERE LEFT("COMPETENCIA"::text, 7) = ANY($1)
            GROUP BY 1, 2, 3, 4
            ORDER BY 4
            "#,
            table = self.table,
            pattern = RELEVANCE_PATTERN
        )
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn fetch_period_records(&self, period: Period) -> anyhow::Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(&self.period_records_sql())
            .bind(period.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn fetch_period_aggregates(
        &self,
        period: Period,
    ) -> anyhow::Result<Vec<PeriodAggregate>> {
        let window: Vec<String> = period.window().iter().map(Period::to_string).collect();
        let review_projects: Vec<String> = REVIEW_COUNTS_AS_CONFORME
            .iter()
            .map(|p| p.to_string())
            .collect();

        let rows = sqlx::query(&self.aggregates_sql())
            .bind(window)
            .bind(review_projects)
            .fetch_all(&self.pool)
            .await?;

        let mut aggregates = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_period = text(&row, "competencia")?;
            let Some(period) = Period::parse_lenient(&raw_period) else {
                warn!("skipping aggregate with unparseable period {raw_period:?}");
                continue;
            };
            aggregates.push(PeriodAggregate {
                key: EntityKey::new(
                    text(&row, "projeto")?,
                    text(&row, "prestador")?,
                    text(&row, "contrato")?,
                ),
                period,
                pendencies: row.try_get("total_pendencias")?,
                critical: row.try_get("total_criticos")?,
                achieved: row.try_get("perc_atingido")?,
            });
        }

        Ok(aggregates)
    }

    async fn fetch_outstanding(&self) -> anyhow::Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(&self.outstanding_sql())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }
}

fn text(row: &PgRow, column: &str) -> anyhow::Result<String> {
    let value: Option<String> = row
        .try_get(column)
        .with_context(|| format!("column {column} is not text"))?;
    Ok(value.unwrap_or_default())
}

fn record_from_row(row: &PgRow) -> anyhow::Result<DocumentRecord> {
    let period_date: Option<NaiveDate> = row.try_get("competencia_data")?;
    let relevance: Option<String> = row.try_get("relevancia")?;

    Ok(DocumentRecord {
        key: EntityKey::new(
            text(row, "projeto")?,
            text(row, "prestador")?,
            text(row, "contrato")?,
        ),
        period: text(row, "competencia")?,
        period_date,
        document: text(row, "documento")?,
        provider_cnpj: text(row, "cnpj_prestador")?,
        status: DocumentStatus::from(text(row, "status")?.as_str()),
        critical: text(row, "critico")?,
        relevance,
        observation: text(row, "observacao")?,
        regularization: text(row, "regularizacao")?,
        composite_key: text(row, "chave_composta")?,
        recipients: text(row, "email_envio")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> DocumentRecord {
        DocumentRecord {
            key: EntityKey::new("Vallourec", "Acme Servicos", "CT-001"),
            period: "2025-09".to_string(),
            period_date: None,
            document: "ASO".to_string(),
            provider_cnpj: String::new(),
            status: DocumentStatus::NaoConforme,
            critical: "1".to_string(),
            relevance: Some("0.1".to_string()),
            observation: String::new(),
            regularization: String::new(),
            composite_key: String::new(),
            recipients: "ops@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn loads_all_three_result_sets() {
        let target: Period = "2025-09".parse().unwrap();
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_fetch_period_records()
            .withf(move |p| *p == target)
            .times(1)
            .returning(|_| Ok(vec![sample_record()]));
        warehouse
            .expect_fetch_period_aggregates()
            .times(1)
            .returning(|_| Ok(Vec::new()));
        warehouse
            .expect_fetch_outstanding()
            .times(1)
            .returning(|| Ok(vec![sample_record(), sample_record()]));

        let data = load_report_data(&warehouse, target).await.unwrap();
        assert_eq!(data.target, target);
        assert_eq!(data.current.len(), 1);
        assert!(data.aggregates.is_empty());
        assert_eq!(data.outstanding.len(), 2);
    }

    #[tokio::test]
    async fn query_failure_is_reported_with_context() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_fetch_period_records()
            .returning(|_| Err(anyhow::anyhow!("connection reset")));

        let err = load_report_data(&warehouse, "2025-09".parse().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2025-09"));
    }

    #[tokio::test]
    async fn table_name_is_validated_before_use() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/warehouse")
            .unwrap();
        assert!(PgWarehouse::new(pool, "docs; DELETE FROM docs").is_err());
    }

    #[tokio::test]
    async fn aggregate_query_coerces_relevance_like_the_scorer() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/warehouse")
            .unwrap();
        let warehouse = PgWarehouse::new(pool, "public.cubo_documentos").unwrap();
        let sql = warehouse.aggregates_sql();
        assert!(sql.contains(&format!("~ '{RELEVANCE_PATTERN}'")));
        assert!(sql.contains("FROM public.cubo_documentos"));
        assert_eq!(sql.matches("E' \\t\\n\\r\\f'").count(), 3);
    }
}
