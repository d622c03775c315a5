// 🔎 Missing-Pair Finder - Which (entity, result) pairs still need a score?
//
// A pair is reachable under an (entity dataset, result dataset) combination
// when the entity claims the result's jurisdiction and the result was found
// by searching the entity's exact name in that jurisdiction. It is missing
// when no score has been persisted for it under that combination.

use crate::db::{get_dataset, load_entities, load_results, scored_pairs};
use crate::error::Result;
use crate::index::ResultIndex;
use crate::model::{DatasetId, DatasetKind, Entity, RegistryResult};
use std::collections::HashSet;

/// Unscored (entity id, result id) pairs, ordered by entity id then result id
pub fn find_missing(
    conn: &rusqlite::Connection,
    entity_dataset: DatasetId,
    result_dataset: DatasetId,
) -> Result<Vec<(i64, i64)>> {
    get_dataset(conn, DatasetKind::Entities, entity_dataset)?;
    get_dataset(conn, DatasetKind::Results, result_dataset)?;

    let entities = load_entities(conn, entity_dataset)?;
    let results = load_results(conn, result_dataset)?;
    let scored = scored_pairs(conn, entity_dataset, result_dataset)?;

    Ok(missing_pairs(&entities, &results, &scored))
}

/// Every reachable pair, scored or not
pub fn reachable_pairs(entities: &[Entity], results: &[RegistryResult]) -> Vec<(i64, i64)> {
    missing_pairs(entities, results, &HashSet::new())
}

pub fn missing_pairs(
    entities: &[Entity],
    results: &[RegistryResult],
    scored: &HashSet<(i64, i64)>,
) -> Vec<(i64, i64)> {
    let index = ResultIndex::build(results);
    let mut pairs = Vec::new();

    for entity in entities {
        for jurisdiction in &entity.jurisdictions {
            for result in index.found_for_pair(&entity.name, jurisdiction) {
                let pair = (entity.id, result.id);
                if !scored.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
    }

    pairs.sort_unstable();
    pairs.dedup();
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, ResultStatus};
    use chrono::Utc;

    fn entity(id: i64, name: &str, jurisdictions: &[&str]) -> Entity {
        Entity {
            id,
            dataset_id: DatasetId(1),
            name: name.to_string(),
            address: Address::default(),
            jurisdictions: jurisdictions.iter().map(|j| j.to_string()).collect(),
        }
    }

    fn result(id: i64, name: &str, jurisdiction: &str, status: ResultStatus) -> RegistryResult {
        RegistryResult {
            id,
            dataset_id: DatasetId(2),
            search_name: name.to_string(),
            jurisdiction: jurisdiction.to_string(),
            license_number: Some(format!("L{}", id)),
            license_type: None,
            license_status: None,
            issue_date: None,
            expiration_date: None,
            business_name: None,
            address: Address::default(),
            status,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_only_claimed_jurisdictions_are_reachable() {
        let entities = vec![entity(1, "Acme Rx", &["FL"]), entity(2, "Beta Drug", &["FL", "GA"])];
        let results = vec![
            result(10, "Acme Rx", "FL", ResultStatus::Found),
            result(11, "Acme Rx", "GA", ResultStatus::Found),
            result(12, "Beta Drug", "GA", ResultStatus::Found),
            result(13, "Beta Drug", "FL", ResultStatus::Empty),
            result(14, "Unknown Co", "FL", ResultStatus::Found),
        ];

        let pairs = reachable_pairs(&entities, &results);
        assert_eq!(pairs, vec![(1, 10), (2, 12)]);
    }

    #[test]
    fn test_scored_pairs_are_excluded() {
        let entities = vec![entity(1, "Acme Rx", &["FL"])];
        let results = vec![
            result(10, "Acme Rx", "FL", ResultStatus::Found),
            result(11, "Acme Rx", "FL", ResultStatus::Found),
        ];
        let scored: HashSet<(i64, i64)> = [(1, 10)].into_iter().collect();

        assert_eq!(missing_pairs(&entities, &results, &scored), vec![(1, 11)]);
    }

    #[test]
    fn test_output_is_deterministic() {
        let entities = vec![entity(2, "Acme Rx", &["GA", "FL"]), entity(1, "Acme Rx", &["FL"])];
        let results = vec![
            result(11, "Acme Rx", "GA", ResultStatus::Found),
            result(10, "Acme Rx", "FL", ResultStatus::Found),
        ];

        let first = reachable_pairs(&entities, &results);
        assert_eq!(first, vec![(1, 10), (2, 10), (2, 11)]);
        assert_eq!(reachable_pairs(&entities, &results), first);
    }
}
