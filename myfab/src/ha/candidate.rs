//! Promotion candidate selection.
//!
//! The best candidate is the alive secondary whose executed GTID set is
//! the closest superset of the current primary's; ties break by weight,
//! then uuid.

use uuid::Uuid;

use crate::replication::GtidSet;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub uuid: Uuid,
    pub weight: f64,
    pub executed: GtidSet,
}

/// Pick the candidate to promote. `primary_executed` is empty during
/// failover, when the old primary cannot be asked.
pub fn choose(primary_executed: &GtidSet, candidates: &[Candidate]) -> Option<Uuid> {
    let mut ranked: Vec<&Candidate> = candidates.iter().collect();
    if ranked.is_empty() {
        return None;
    }

    ranked.sort_by(|a, b| {
        rank(primary_executed, a)
            .partial_cmp(&rank(primary_executed, b))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.uuid.cmp(&b.uuid))
    });
    ranked.first().map(|candidate| candidate.uuid)
}

/// Failover has no primary to measure against: rank candidates against
/// the union of everything any of them executed, so the most caught-up
/// one wins.
pub fn choose_failover(candidates: &[Candidate]) -> Option<Uuid> {
    let union = candidates
        .iter()
        .fold(GtidSet::default(), |acc, candidate| acc.union(&candidate.executed));
    choose(&union, candidates)
}

/// Lower ranks win: non-supersets sort after supersets, further-behind
/// sorts after closer, then lighter weight after heavier.
fn rank(primary_executed: &GtidSet, candidate: &Candidate) -> (u8, u64, f64) {
    let superset = candidate.executed.contains(primary_executed);
    let distance = if superset {
        // Transactions the candidate has beyond the primary.
        candidate.executed.missing_from(primary_executed)
    } else {
        // Transactions the candidate still misses.
        primary_executed.missing_from(&candidate.executed)
    };
    (u8::from(!superset), distance, -candidate.weight)
}

#[cfg(test)]
mod test {
    use super::*;

    const SID: &str = "3c2d1b0a-0000-0000-0000-00000000000a";

    fn candidate(uuid: u128, weight: f64, executed: &str) -> Candidate {
        Candidate {
            uuid: Uuid::from_u128(uuid),
            weight,
            executed: GtidSet::parse(executed).unwrap(),
        }
    }

    #[test]
    fn closest_superset_wins() {
        let primary = GtidSet::parse(&format!("{SID}:1-100")).unwrap();
        let chosen = choose(
            &primary,
            &[
                candidate(1, 1.0, &format!("{SID}:1-100")),
                candidate(2, 1.0, &format!("{SID}:1-110")),
                candidate(3, 1.0, &format!("{SID}:1-90")),
            ],
        );
        // Exact match beats the one that ran ahead; the stale one loses.
        assert_eq!(chosen, Some(Uuid::from_u128(1)));
    }

    #[test]
    fn behind_candidates_rank_by_lag() {
        let primary = GtidSet::parse(&format!("{SID}:1-100")).unwrap();
        let chosen = choose(
            &primary,
            &[
                candidate(1, 1.0, &format!("{SID}:1-50")),
                candidate(2, 1.0, &format!("{SID}:1-99")),
            ],
        );
        assert_eq!(chosen, Some(Uuid::from_u128(2)));
    }

    #[test]
    fn weight_breaks_ties_then_uuid() {
        let primary = GtidSet::parse(&format!("{SID}:1-10")).unwrap();
        let chosen = choose(
            &primary,
            &[
                candidate(5, 1.0, &format!("{SID}:1-10")),
                candidate(2, 2.0, &format!("{SID}:1-10")),
            ],
        );
        assert_eq!(chosen, Some(Uuid::from_u128(2)));

        let chosen = choose(
            &primary,
            &[
                candidate(5, 1.0, &format!("{SID}:1-10")),
                candidate(2, 1.0, &format!("{SID}:1-10")),
            ],
        );
        assert_eq!(chosen, Some(Uuid::from_u128(2)));
    }

    #[test]
    fn empty_field_has_no_candidate() {
        let primary = GtidSet::parse("").unwrap();
        assert_eq!(choose(&primary, &[]), None);
    }

    #[test]
    fn failover_prefers_most_executed() {
        let chosen = choose_failover(&[
            candidate(1, 1.0, &format!("{SID}:1-80")),
            candidate(2, 1.0, &format!("{SID}:1-95")),
        ]);
        assert_eq!(chosen, Some(Uuid::from_u128(2)));
    }
}
