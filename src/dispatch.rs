use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use log::{debug, error, info, warn};

use crate::db::ReportData;
use crate::history;
use crate::mailer::{FileAttachment, InlineImage, MailTransport, OutgoingMessage};
use crate::models::{ContractSummary, DocumentRecord, DocumentStatus, EntityKey};
use crate::period::{Period, WINDOW_LEN};
use crate::report::{self, ChartEmbed, ReportContext, ReportRenderer, CHART_CID, LOGO_CID};

/// One email: an entity in a period, sent to one raw recipient list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub entity: EntityKey,
    pub period: Period,
    pub recipients: String,
}

#[derive(Debug, Clone)]
pub struct ReportGroup {
    pub key: GroupKey,
    pub records: Vec<DocumentRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Groups the target-period records by entity and recipient list. Output is
/// ordered by key, so it does not depend on the input row order.
pub fn group_records(records: &[DocumentRecord], target: Period) -> Vec<ReportGroup> {
    let mut groups: BTreeMap<GroupKey, Vec<DocumentRecord>> = BTreeMap::new();

    for record in records {
        let Some(period) = Period::parse_lenient(&record.period) else {
            warn!(
                "ignoring {} / {} row with unparseable period {:?}",
                record.key.provider, record.key.contract, record.period
            );
            continue;
        };
        if period != target {
            continue;
        }

        let key = GroupKey {
            entity: record.key.clone(),
            period,
            recipients: record.recipients.clone(),
        };
        groups.entry(key).or_default().push(record.clone());
    }

    groups
        .into_iter()
        .map(|(key, records)| ReportGroup { key, records })
        .collect()
}

pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split([';', ','])
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn contract_summaries(groups: &[ReportGroup]) -> Vec<ContractSummary> {
    let mut summaries: Vec<ContractSummary> = groups
        .iter()
        .map(|group| {
            let score = crate::compliance::score(&group.records, &group.key.entity.project);
            ContractSummary {
                project: group.key.entity.project.clone(),
                provider: group.key.entity.provider.clone(),
                contract: group.key.entity.contract.clone(),
                period: group.key.period.to_string(),
                recipients: group.key.recipients.clone(),
                total_documents: group.records.len(),
                total_pendencies: group
                    .records
                    .iter()
                    .filter(|r| r.status == DocumentStatus::NaoConforme)
                    .count(),
                achieved: score.achieved,
                label: score.label,
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        a.provider
            .cmp(&b.provider)
            .then_with(|| a.contract.cmp(&b.contract))
    });
    summaries
}

pub struct Dispatcher<'a> {
    renderer: &'a ReportRenderer,
    transport: &'a dyn MailTransport,
}

impl<'a> Dispatcher<'a> {
    pub fn new(renderer: &'a ReportRenderer, transport: &'a dyn MailTransport) -> Self {
        Self {
            renderer,
            transport,
        }
    }

    /// Builds the message for one group, or `None` when it has no recipients.
    pub fn compose(
        &self,
        group: &ReportGroup,
        data: &ReportData,
        generated_at: DateTime<FixedOffset>,
    ) -> anyhow::Result<Option<OutgoingMessage>> {
        let recipients = parse_recipients(&group.key.recipients);
        if recipients.is_empty() {
            return Ok(None);
        }

        let entity = &group.key.entity;
        let history = history::reconstruct(&data.aggregates, entity, group.key.period);
        debug!(
            "{} | {}: {} pendencies over the last {} periods",
            entity.provider,
            entity.contract,
            history.total_pendencies(),
            WINDOW_LEN
        );
        let rendered = self.renderer.render(
            &ReportContext {
                key: entity,
                period: group.key.period,
                records: &group.records,
                history: &history,
                recipients: &recipients,
                generated_at,
            },
            ChartEmbed::ContentId,
        );

        let mut inline_images = vec![InlineImage {
            content_id: CHART_CID.to_string(),
            filename: format!("{CHART_CID}.png"),
            content_type: "image/png".to_string(),
            bytes: self.renderer.chart_png(&rendered.chart_svg)?,
        }];
        if let Some(logo) = self.renderer.logo() {
            inline_images.push(InlineImage {
                content_id: LOGO_CID.to_string(),
                filename: format!("{LOGO_CID}.png"),
                content_type: "image/png".to_string(),
                bytes: logo.to_vec(),
            });
        }

        let subject = report::subject(entity, group.key.period);
        let outstanding: Vec<DocumentRecord> = data
            .outstanding
            .iter()
            .filter(|record| &record.key == entity)
            .cloned()
            .collect();
        let attachment = if outstanding.is_empty() {
            info!("no outstanding documents for {} | {}", entity.provider, entity.contract);
            None
        } else {
            info!(
                "{} outstanding documents attached for {} | {}",
                outstanding.len(),
                entity.provider,
                entity.contract
            );
            Some(FileAttachment {
                filename: report::attachment_filename(&subject),
                content_type: "text/csv; charset=utf-8".to_string(),
                bytes: report::outstanding_csv(&outstanding)?,
            })
        };

        Ok(Some(OutgoingMessage {
            recipients,
            subject,
            html: rendered.html,
            inline_images,
            attachment,
        }))
    }

    /// Processes every group in order. A failure in one group is logged and
    /// counted; the remaining groups are still processed.
    pub async fn dispatch(&self, groups: &[ReportGroup], data: &ReportData) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let generated_at = self.renderer.now();

        for group in groups {
            let entity = &group.key.entity;
            let message = match self.compose(group, data, generated_at) {
                Ok(Some(message)) => message,
                Ok(None) => {
                    warn!("no recipients for {} - {}, skipping", entity.provider, entity.contract);
                    summary.skipped += 1;
                    continue;
                }
                Err(err) => {
                    error!(
                        "failed to build report for {} - {}: {err:#}",
                        entity.provider, entity.contract
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            match self.transport.send(&message).await {
                Ok(()) => {
                    info!(
                        "sent {} | {} | {} -> {}",
                        entity.provider,
                        entity.contract,
                        group.key.period,
                        message.recipients.join(", ")
                    );
                    summary.sent += 1;
                }
                Err(err) => {
                    error!(
                        "failed to send to {} - {}: {err:#}",
                        entity.provider, entity.contract
                    );
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
