use crate::models::{EntityKey, HistoryPoint, HistorySeries, PeriodAggregate};
use crate::period::Period;

/// Builds the dense five-period history for `key` ending at `target`.
///
/// Rows for other entities or for periods outside the window are ignored.
/// Duplicate rows for one period are merged: counts are summed and the
/// highest achieved percentage wins (optimistic merge). Periods without data
/// are zero-filled, so the result always holds one point per window period.
pub fn reconstruct(
    aggregates: &[PeriodAggregate],
    key: &EntityKey,
    target: Period,
) -> HistorySeries {
    let points = target.window().map(|period| {
        aggregates
            .iter()
            .filter(|row| row.period == period && &row.key == key)
            .fold(None, |merged: Option<HistoryPoint>, row| {
                Some(match merged {
                    None => HistoryPoint {
                        period,
                        pendencies: row.pendencies,
                        critical: row.critical,
                        achieved: row.achieved,
                    },
                    Some(acc) => HistoryPoint {
                        period,
                        pendencies: acc.pendencies + row.pendencies,
                        critical: acc.critical + row.critical,
                        achieved: acc.achieved.max(row.achieved),
                    },
                })
            })
            .unwrap_or_else(|| HistoryPoint::empty(period))
    });

    HistorySeries {
        key: key.clone(),
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EntityKey {
        EntityKey::new("Vallourec", "Acme Servicos", "CT-001")
    }

    fn row(period: &str, pendencies: i64, critical: i64, achieved: f64) -> PeriodAggregate {
        PeriodAggregate {
            key: key(),
            period: period.parse().unwrap(),
            pendencies,
            critical,
            achieved,
        }
    }

    fn target() -> Period {
        "2025-09".parse().unwrap()
    }

    fn assert_canonical(series: &HistorySeries) {
        let periods: Vec<Period> = series.points.iter().map(|p| p.period).collect();
        assert_eq!(periods, target().window().to_vec());
    }

    #[test]
    fn empty_input_yields_zero_filled_window() {
        let series = reconstruct(&[], &key(), target());
        assert_canonical(&series);
        assert!(series
            .points
            .iter()
            .all(|p| p.pendencies == 0 && p.critical == 0 && p.achieved == 0.0));
        assert_eq!(series.key, key());
    }

    #[test]
    fn single_row_lands_in_its_period() {
        let series = reconstruct(&[row("2025-07", 4, 1, 0.85)], &key(), target());
        assert_canonical(&series);
        assert_eq!(series.points[2].pendencies, 4);
        assert_eq!(series.points[2].critical, 1);
        assert_eq!(series.points[2].achieved, 0.85);
        assert_eq!(series.total_pendencies(), 4);
    }

    #[test]
    fn rows_outside_window_are_ignored() {
        let rows = vec![
            row("2025-04", 9, 9, 0.1),
            row("2025-10", 9, 9, 0.1),
            row("2025-09", 2, 0, 0.99),
        ];
        let series = reconstruct(&rows, &key(), target());
        assert_canonical(&series);
        assert_eq!(series.total_pendencies(), 2);
        assert_eq!(series.points[4].achieved, 0.99);
    }

    #[test]
    fn more_than_five_unordered_rows_still_yield_five_points() {
        let rows = vec![
            row("2025-09", 1, 0, 0.9),
            row("2025-05", 5, 0, 0.5),
            row("2025-03", 7, 0, 0.3),
            row("2025-08", 2, 0, 0.8),
            row("2025-06", 4, 0, 0.6),
            row("2025-07", 3, 0, 0.7),
            row("2024-12", 8, 0, 0.2),
        ];
        let series = reconstruct(&rows, &key(), target());
        assert_canonical(&series);
        let pendencies: Vec<i64> = series.points.iter().map(|p| p.pendencies).collect();
        assert_eq!(pendencies, [5, 4, 3, 2, 1]);
    }

    #[test]
    fn duplicate_periods_sum_counts_and_keep_max_achieved() {
        let rows = vec![row("2025-08", 2, 1, 0.80), row("2025-08", 5, 0, 0.95)];
        let series = reconstruct(&rows, &key(), target());
        assert_canonical(&series);
        let merged = series.points[3];
        assert_eq!(merged.pendencies, 7);
        assert_eq!(merged.critical, 1);
        assert_eq!(merged.achieved, 0.95);
    }

    #[test]
    fn rows_for_other_entities_are_ignored() {
        let mut other = row("2025-09", 6, 2, 0.4);
        other.key = EntityKey::new("Vallourec", "Outro Prestador", "CT-001");
        let series = reconstruct(&[other, row("2025-09", 1, 0, 0.97)], &key(), target());
        assert_eq!(series.points[4].pendencies, 1);
        assert_eq!(series.points[4].achieved, 0.97);
    }

    #[test]
    fn result_does_not_depend_on_input_order() {
        let mut rows = vec![
            row("2025-08", 2, 1, 0.80),
            row("2025-06", 3, 0, 0.70),
            row("2025-08", 5, 0, 0.95),
        ];
        let forward = reconstruct(&rows, &key(), target());
        rows.reverse();
        let backward = reconstruct(&rows, &key(), target());
        assert_eq!(forward, backward);
    }
}
