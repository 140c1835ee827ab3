//! GTID set parsing and transaction-count arithmetic.
//!
//! Sets have the form `sid:lo[-hi][:lo[-hi]…]` with `,` or `;` between
//! entries. Counting how far a slave trails its master is interval
//! subtraction over these sets.

use std::collections::BTreeMap;

use super::Error;

/// A parsed GTID set: source id to sorted, merged intervals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GtidSet {
    entries: BTreeMap<String, Vec<(u64, u64)>>,
}

impl GtidSet {
    /// Parse MySQL's textual form. An empty string is the empty set.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut entries: BTreeMap<String, Vec<(u64, u64)>> = BTreeMap::new();

        for token in text
            .split(|c| c == ',' || c == ';' || c == '\n')
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            let mut segments = token.split(':');
            let sid = segments
                .next()
                .filter(|sid| !sid.is_empty())
                .ok_or_else(|| Error::InvalidGtid(token.into()))?;

            let intervals = entries.entry(sid.to_lowercase()).or_default();
            let mut seen_interval = false;
            for segment in segments {
                seen_interval = true;
                let (lo, hi) = match segment.split_once('-') {
                    Some((lo, hi)) => (
                        lo.parse::<u64>()
                            .map_err(|_| Error::InvalidGtid(token.into()))?,
                        hi.parse::<u64>()
                            .map_err(|_| Error::InvalidGtid(token.into()))?,
                    ),
                    None => {
                        let trx = segment
                            .parse::<u64>()
                            .map_err(|_| Error::InvalidGtid(token.into()))?;
                        (trx, trx)
                    }
                };
                if lo == 0 || hi < lo {
                    return Err(Error::InvalidGtid(token.into()));
                }
                intervals.push((lo, hi));
            }
            if !seen_interval {
                return Err(Error::InvalidGtid(token.into()));
            }
        }

        for intervals in entries.values_mut() {
            *intervals = merge(intervals);
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of transactions in the set.
    pub fn num_transactions(&self) -> u64 {
        self.entries
            .values()
            .flatten()
            .map(|(lo, hi)| hi - lo + 1)
            .sum()
    }

    /// Transactions originating from one source id.
    pub fn num_transactions_for(&self, sid: &str) -> u64 {
        self.entries
            .get(&sid.to_lowercase())
            .map(|intervals| intervals.iter().map(|(lo, hi)| hi - lo + 1).sum())
            .unwrap_or(0)
    }

    /// Superset test: every transaction of `other` is in `self`.
    pub fn contains(&self, other: &GtidSet) -> bool {
        other.entries.iter().all(|(sid, intervals)| {
            let Some(own) = self.entries.get(sid) else {
                return intervals.is_empty();
            };
            intervals
                .iter()
                .all(|interval| covered(own, *interval))
        })
    }

    /// Set union.
    pub fn union(&self, other: &GtidSet) -> GtidSet {
        let mut entries = self.entries.clone();
        for (sid, intervals) in &other.entries {
            let merged = entries.entry(sid.clone()).or_default();
            merged.extend(intervals.iter().copied());
            *merged = merge(merged);
        }
        GtidSet { entries }
    }

    /// Number of transactions in `self` that `other` does not have.
    pub fn missing_from(&self, other: &GtidSet) -> u64 {
        let empty = Vec::new();
        self.entries
            .iter()
            .map(|(sid, intervals)| {
                let theirs = other.entries.get(sid).unwrap_or(&empty);
                intervals
                    .iter()
                    .map(|interval| uncovered_count(theirs, *interval))
                    .sum::<u64>()
            })
            .sum()
    }
}

/// Number of transactions in `gtids`, optionally only those from
/// `server_uuid`.
pub fn get_num_gtid(gtids: &str, server_uuid: Option<&str>) -> Result<u64, Error> {
    let set = GtidSet::parse(gtids)?;
    Ok(match server_uuid {
        Some(sid) => set.num_transactions_for(sid),
        None => set.num_transactions(),
    })
}

/// How many of the master's transactions the slave has not executed.
///
/// An empty master set against a non-empty slave set is invalid; an
/// empty slave set trails by the master's full count.
pub fn get_slave_num_gtid_behind(master: &str, slave: &str) -> Result<u64, Error> {
    let master = GtidSet::parse(master)?;
    let slave = GtidSet::parse(slave)?;

    if master.is_empty() && !slave.is_empty() {
        return Err(Error::InvalidGtid(
            "master reports an empty GTID set while the slave's is not".into(),
        ));
    }
    Ok(master.missing_from(&slave))
}

/// Merge overlapping or adjacent intervals; input need not be sorted.
fn merge(intervals: &[(u64, u64)]) -> Vec<(u64, u64)> {
    let mut sorted = intervals.to_vec();
    sorted.sort_unstable();

    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(sorted.len());
    for (lo, hi) in sorted {
        match merged.last_mut() {
            Some((_, last_hi)) if lo <= last_hi.saturating_add(1) => {
                *last_hi = (*last_hi).max(hi);
            }
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

fn covered(intervals: &[(u64, u64)], (lo, hi): (u64, u64)) -> bool {
    intervals
        .iter()
        .any(|(own_lo, own_hi)| *own_lo <= lo && hi <= *own_hi)
}

/// How many of `interval`'s transactions are not in `intervals`.
fn uncovered_count(intervals: &[(u64, u64)], (lo, hi): (u64, u64)) -> u64 {
    let mut uncovered = hi - lo + 1;
    for (own_lo, own_hi) in intervals {
        let overlap_lo = lo.max(*own_lo);
        let overlap_hi = hi.min(*own_hi);
        if overlap_lo <= overlap_hi {
            uncovered -= overlap_hi - overlap_lo + 1;
        }
    }
    uncovered
}

#[cfg(test)]
mod test {
    use super::*;

    const SID_A: &str = "1f2a3b4c-0000-0000-0000-000000000001";
    const SID_B: &str = "1f2a3b4c-0000-0000-0000-000000000002";

    #[test]
    fn parse_and_count() {
        let set = GtidSet::parse(&format!("{SID_A}:1-5:8,{SID_B}:1-3")).unwrap();
        assert_eq!(set.num_transactions(), 9);
        assert_eq!(set.num_transactions_for(SID_A), 6);
        assert_eq!(set.num_transactions_for(SID_B), 3);
    }

    #[test]
    fn semicolon_separator_accepted() {
        let set = GtidSet::parse(&format!("{SID_A}:1-5;{SID_B}:7")).unwrap();
        assert_eq!(set.num_transactions(), 6);
    }

    #[test]
    fn empty_set() {
        let set = GtidSet::parse("").unwrap();
        assert!(set.is_empty());
        assert_eq!(set.num_transactions(), 0);
    }

    #[test]
    fn invalid_forms_rejected() {
        assert!(GtidSet::parse("no-intervals-here").is_err());
        assert!(GtidSet::parse(&format!("{SID_A}:5-2")).is_err());
        assert!(GtidSet::parse(&format!("{SID_A}:0")).is_err());
        assert!(GtidSet::parse(&format!("{SID_A}:x-y")).is_err());
    }

    #[test]
    fn superset_and_lag() {
        let master = GtidSet::parse(&format!("{SID_A}:1-10")).unwrap();
        let caught_up = GtidSet::parse(&format!("{SID_A}:1-10")).unwrap();
        let behind = GtidSet::parse(&format!("{SID_A}:1-7")).unwrap();

        assert!(caught_up.contains(&master));
        assert!(!behind.contains(&master));
        assert_eq!(master.missing_from(&behind), 3);
        assert_eq!(master.missing_from(&caught_up), 0);
    }

    #[test]
    fn slave_behind_rules() {
        // Empty slave trails by the master's full set.
        assert_eq!(
            get_slave_num_gtid_behind(&format!("{SID_A}:1-42"), "").unwrap(),
            42
        );
        // Empty master with a non-empty slave is invalid.
        assert!(get_slave_num_gtid_behind("", &format!("{SID_A}:1-3")).is_err());
        // Both empty: nothing to trail.
        assert_eq!(get_slave_num_gtid_behind("", "").unwrap(), 0);
        // Gap in the middle counts.
        assert_eq!(
            get_slave_num_gtid_behind(
                &format!("{SID_A}:1-10"),
                &format!("{SID_A}:1-3:8-10")
            )
            .unwrap(),
            4
        );
    }

    #[test]
    fn merge_folds_adjacent_intervals() {
        let set = GtidSet::parse(&format!("{SID_A}:1-3:4-6:9")).unwrap();
        assert_eq!(set.num_transactions(), 7);
        let other = GtidSet::parse(&format!("{SID_A}:1-6")).unwrap();
        assert!(set.contains(&other));
    }
}
