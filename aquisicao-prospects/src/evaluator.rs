//! Filter predicate evaluation.

use crate::{ProspectRow, ProspectTable};
use aquisicao_core::{ProspectFilters, ProspectId};
use std::collections::BTreeSet;

/// Rows of a table that passed a filter, in table order.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredProspects<'a> {
    rows: Vec<&'a ProspectRow>,
}

impl<'a> FilteredProspects<'a> {
    pub fn rows(&self) -> &[&'a ProspectRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Prospect IDs in row order. Rows without an ID are skipped; repeats are kept.
    pub fn prospect_ids(&self) -> Vec<ProspectId> {
        self.rows
            .iter()
            .filter_map(|row| row.cnpj_cpf.as_deref())
            .filter_map(|raw| ProspectId::new(raw).ok())
            .collect()
    }

    /// Number of distinct states among the matches.
    pub fn state_count(&self) -> usize {
        distinct(self.rows.iter().map(|r| r.unidade_federal.as_deref()))
    }

    /// Number of distinct polygons among the matches.
    pub fn polygon_count(&self) -> usize {
        distinct(self.rows.iter().map(|r| r.poligono.as_deref()))
    }
}

fn distinct<'a>(values: impl Iterator<Item = Option<&'a str>>) -> usize {
    values.flatten().collect::<BTreeSet<_>>().len()
}

/// Membership test for one column. An absent or empty list always passes;
/// otherwise a missing value never matches.
fn member<T: PartialEq>(allowed: &Option<Vec<T>>, value: Option<&T>) -> bool {
    match allowed {
        Some(list) if !list.is_empty() => value.map_or(false, |v| list.contains(v)),
        _ => true,
    }
}

/// Whether `row` satisfies every criterion in `filters`.
pub fn row_matches(row: &ProspectRow, filters: &ProspectFilters) -> bool {
    let text_columns = [
        (&filters.cnae5_codes, row.cd_cnae5.as_ref()),
        (&filters.cnae_codes, row.cd_cnae.as_ref()),
        (&filters.revenue_brackets, row.faixa_fat.as_ref()),
        (&filters.states, row.unidade_federal.as_ref()),
        (&filters.polygons, row.poligono.as_ref()),
        (&filters.credit_publications, row.pub_credito.as_ref()),
        (&filters.size_classes, row.porte.as_ref()),
        (&filters.ratings, row.rating.as_ref()),
        (&filters.registration_statuses, row.status_cadastral.as_ref()),
        (&filters.segments, row.segmento.as_ref()),
        (&filters.campaigns, row.campanha.as_ref()),
        (&filters.funnel_stages, row.funil.as_ref()),
    ];
    if !text_columns
        .iter()
        .all(|&(allowed, value)| member(allowed, value))
    {
        return false;
    }

    let flag_columns = [
        (&filters.potential_flags, row.fl_potencial.as_ref()),
        (&filters.cnae_focus_flags, row.fl_cnae_foco.as_ref()),
        (&filters.pep_flags, row.fl_pep.as_ref()),
    ];
    if !flag_columns
        .iter()
        .all(|&(allowed, value)| member(allowed, value))
    {
        return false;
    }

    // Inclusive bounds; rows without a reference month fail any bound.
    if let Some(start) = filters.reference_start {
        if row.mes_ref.map_or(true, |m| m < start) {
            return false;
        }
    }
    if let Some(end) = filters.reference_end {
        if row.mes_ref.map_or(true, |m| m > end) {
            return false;
        }
    }
    true
}

/// Select the rows of `table` matching `filters`.
pub fn filter_prospects<'a>(
    table: &'a ProspectTable,
    filters: &ProspectFilters,
) -> FilteredProspects<'a> {
    let rows: Vec<&ProspectRow> = table
        .rows()
        .iter()
        .filter(|row| row_matches(row, filters))
        .collect();
    tracing::debug!(scanned = table.len(), matched = rows.len(), "prospects filtered");
    FilteredProspects { rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn row(id: &str, uf: &str, poligono: &str, mes_ref: Option<&str>) -> ProspectRow {
        ProspectRow {
            cnpj_cpf: Some(id.to_string()),
            unidade_federal: Some(uf.to_string()),
            poligono: Some(poligono.to_string()),
            fl_pep: Some(false),
            mes_ref: mes_ref.map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()),
            ..Default::default()
        }
    }

    fn table() -> ProspectTable {
        ProspectTable::new(vec![
            row("111", "SP", "sp_1", Some("2024-01-01")),
            row("222", "SP", "sp_2", Some("2024-02-15")),
            row("333", "RJ", "rj_1", Some("2024-03-31")),
            row("444", "MG", "mg_1", None),
        ])
    }

    fn ids(filtered: &FilteredProspects<'_>) -> Vec<String> {
        filtered
            .prospect_ids()
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    #[test]
    fn test_empty_filters_pass_everything() {
        let table = table();
        let filtered = filter_prospects(&table, &ProspectFilters::default());
        assert_eq!(filtered.len(), 4);
        assert_eq!(filtered.state_count(), 3);
        assert_eq!(filtered.polygon_count(), 4);
    }

    #[test]
    fn test_empty_list_places_no_restriction() {
        let table = table();
        let filters = ProspectFilters {
            states: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(filter_prospects(&table, &filters).len(), 4);
    }

    #[test]
    fn test_state_membership() {
        let table = table();
        let filters = ProspectFilters {
            states: Some(vec!["SP".to_string(), "MG".to_string()]),
            ..Default::default()
        };
        let filtered = filter_prospects(&table, &filters);
        assert_eq!(ids(&filtered), vec!["111", "222", "444"]);
        assert_eq!(filtered.state_count(), 2);
    }

    #[test]
    fn test_reference_bounds_inclusive_and_exclude_missing() {
        let table = table();
        let filters = ProspectFilters {
            reference_start: NaiveDate::from_ymd_opt(2024, 1, 1),
            reference_end: NaiveDate::from_ymd_opt(2024, 3, 31),
            ..Default::default()
        };
        assert_eq!(
            ids(&filter_prospects(&table, &filters)),
            vec!["111", "222", "333"]
        );

        let end_only = ProspectFilters {
            reference_end: NaiveDate::from_ymd_opt(2024, 2, 15),
            ..Default::default()
        };
        assert_eq!(ids(&filter_prospects(&table, &end_only)), vec!["111", "222"]);
    }

    #[test]
    fn test_flag_filter_excludes_missing_flag() {
        let mut rows = table().rows().to_vec();
        rows[3].fl_pep = None;
        let table = ProspectTable::new(rows);
        let filters = ProspectFilters {
            pep_flags: Some(vec![false]),
            ..Default::default()
        };
        assert_eq!(
            ids(&filter_prospects(&table, &filters)),
            vec!["111", "222", "333"]
        );
    }

    #[test]
    fn test_rows_without_id_skipped_in_id_list() {
        let mut rows = table().rows().to_vec();
        rows[0].cnpj_cpf = None;
        rows[1].cnpj_cpf = Some("  ".to_string());
        let table = ProspectTable::new(rows);
        let filtered = filter_prospects(&table, &ProspectFilters::default());
        assert_eq!(filtered.len(), 4);
        assert_eq!(ids(&filtered), vec!["333", "444"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Adding a criterion never widens the result.
        #[test]
        fn prop_state_filter_narrows(
            states in prop::collection::vec(prop_oneof![Just("SP"), Just("RJ"), Just("BA")], 1..3)
        ) {
            let table = table();
            let all = filter_prospects(&table, &ProspectFilters::default()).len();
            let filters = ProspectFilters {
                states: Some(states.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            };
            let filtered = filter_prospects(&table, &filters);
            prop_assert!(filtered.len() <= all);
            for row in filtered.rows() {
                let uf = row.unidade_federal.as_deref().unwrap_or_default();
                prop_assert!(states.contains(&uf));
            }
        }
    }
}
