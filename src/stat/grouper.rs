use anyhow::Result;
use fnv::FnvHashSet;
use log::trace;

use crate::core::error::StatsError;

/// One parsed input line, as produced by a record extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct LocusRecord<P> {
    pub locus: String,
    /// 1-based line in the source, for diagnostics
    pub line: u64,
    pub payload: P,
}

/// Statistics for one contiguous run of records sharing a locus key.
#[derive(Debug, Clone, PartialEq)]
pub struct LocusSummary {
    pub locus: String,
    /// `None` when fewer than two observations are present
    pub diversity: Option<f64>,
    pub sample_count: usize,
    pub length: Option<usize>,
    /// Present samples over all header samples
    pub sample_fraction: Option<f64>,
    /// Mean `NS=` annotation over the records that carried one
    pub ns_average: Option<f64>,
    /// One entry per population, in universe order
    pub proportions: Vec<f64>,
}

/// Format-specific folding of record payloads into a locus summary.
pub trait LocusAggregator {
    type Payload;
    type Group;

    fn open_group(&self) -> Self::Group;

    fn absorb(&self, group: &mut Self::Group, payload: Self::Payload);

    fn summarize(&self, locus: String, group: Self::Group) -> LocusSummary;
}

/// Whether a locus key reappearing after another key is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Contiguity {
    /// Remember closed keys and fail on reappearance.
    #[default]
    Enforce,
    /// Trust the input ordering; a reappearing key opens a second group.
    Assume,
}

/// The single live locus group plus what is needed to close it.
#[derive(Debug)]
pub struct GroupingState<G> {
    current: Option<(String, G)>,
    closed: Option<FnvHashSet<String>>,
    records: u64,
}

impl<G> GroupingState<G> {
    pub fn new(contiguity: Contiguity) -> Self {
        let closed = match contiguity {
            Contiguity::Enforce => Some(FnvHashSet::default()),
            Contiguity::Assume => None,
        };
        Self {
            current: None,
            closed,
            records: 0,
        }
    }

    pub fn records_seen(&self) -> u64 {
        self.records
    }

    pub fn current_locus(&self) -> Option<&str> {
        self.current.as_ref().map(|(locus, _)| locus.as_str())
    }

    /// Fold one record in. Returns the summary of the previous group when the
    /// record's locus differs from the live one.
    pub fn step<A>(
        &mut self,
        aggregator: &A,
        record: LocusRecord<A::Payload>,
    ) -> Result<Option<LocusSummary>>
    where
        A: LocusAggregator<Group = G>,
    {
        self.records += 1;

        match self.current.take() {
            Some((locus, mut group)) if locus == record.locus => {
                aggregator.absorb(&mut group, record.payload);
                self.current = Some((locus, group));
                Ok(None)
            }
            previous => {
                if let Some(closed) = &self.closed {
                    if closed.contains(&record.locus) {
                        return Err(StatsError::NonContiguousLocus {
                            locus: record.locus,
                            line: record.line,
                        }
                        .into());
                    }
                }

                let flushed = previous.map(|(locus, group)| self.close(aggregator, locus, group));

                trace!("Opening locus {} at line {}", record.locus, record.line);
                let mut group = aggregator.open_group();
                aggregator.absorb(&mut group, record.payload);
                self.current = Some((record.locus, group));

                Ok(flushed)
            }
        }
    }

    /// Terminal transition: close whatever group is still live.
    pub fn finish<A>(&mut self, aggregator: &A) -> Option<LocusSummary>
    where
        A: LocusAggregator<Group = G>,
    {
        self.current
            .take()
            .map(|(locus, group)| self.close(aggregator, locus, group))
    }

    fn close<A>(&mut self, aggregator: &A, locus: String, group: G) -> LocusSummary
    where
        A: LocusAggregator<Group = G>,
    {
        if let Some(closed) = self.closed.as_mut() {
            closed.insert(locus.clone());
        }
        aggregator.summarize(locus, group)
    }
}

/// Streams locus summaries out of a record stream, one contiguous run at a time.
///
/// Only the records of the live locus are held in memory. Yields
/// [`StatsError::EmptyInput`] if the stream has no records, and stops after
/// the first error.
pub struct LocusGrouper<I, A: LocusAggregator> {
    records: I,
    aggregator: A,
    state: GroupingState<A::Group>,
    source_name: String,
    done: bool,
}

impl<I, A> LocusGrouper<I, A>
where
    I: Iterator<Item = Result<LocusRecord<A::Payload>>>,
    A: LocusAggregator,
{
    pub fn new(records: I, aggregator: A, contiguity: Contiguity, source_name: &str) -> Self {
        Self {
            records,
            aggregator,
            state: GroupingState::new(contiguity),
            source_name: source_name.to_string(),
            done: false,
        }
    }

    pub fn records_seen(&self) -> u64 {
        self.state.records_seen()
    }

    fn fail(&mut self, err: anyhow::Error) -> Option<Result<LocusSummary>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<I, A> Iterator for LocusGrouper<I, A>
where
    I: Iterator<Item = Result<LocusRecord<A::Payload>>>,
    A: LocusAggregator,
{
    type Item = Result<LocusSummary>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.records.next() {
                Some(Ok(record)) => match self.state.step(&self.aggregator, record) {
                    Ok(Some(summary)) => return Some(Ok(summary)),
                    Ok(None) => continue,
                    Err(e) => return self.fail(e),
                },
                Some(Err(e)) => return self.fail(e),
                None => {
                    self.done = true;
                    if self.state.records_seen() == 0 {
                        return Some(Err(StatsError::EmptyInput {
                            source_name: self.source_name.clone(),
                        }
                        .into()));
                    }
                    return self.state.finish(&self.aggregator).map(Ok);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::diversity::simpson_diversity;
    use crate::stat::proportions::{count_populations, population_proportions};
    use anyhow::anyhow;
    use rstest::rstest;

    /// Payload is the population index of each present sample.
    struct Tally {
        num_populations: usize,
    }

    impl LocusAggregator for Tally {
        type Payload = Vec<usize>;
        type Group = Vec<usize>;

        fn open_group(&self) -> Vec<usize> {
            Vec::new()
        }

        fn absorb(&self, group: &mut Vec<usize>, payload: Vec<usize>) {
            group.extend(payload);
        }

        fn summarize(&self, locus: String, group: Vec<usize>) -> LocusSummary {
            let counts = count_populations(group.iter().copied(), self.num_populations);
            LocusSummary {
                locus,
                diversity: simpson_diversity(&counts),
                sample_count: group.len(),
                length: None,
                sample_fraction: None,
                ns_average: None,
                proportions: population_proportions(&counts),
            }
        }
    }

    fn records(rows: &[(&str, &[usize])]) -> Vec<Result<LocusRecord<Vec<usize>>>> {
        rows.iter()
            .enumerate()
            .map(|(i, (locus, pops))| {
                Ok(LocusRecord {
                    locus: locus.to_string(),
                    line: i as u64 + 1,
                    payload: pops.to_vec(),
                })
            })
            .collect()
    }

    fn group(
        rows: &[(&str, &[usize])],
        contiguity: Contiguity,
    ) -> Result<Vec<LocusSummary>> {
        LocusGrouper::new(
            records(rows).into_iter(),
            Tally { num_populations: 2 },
            contiguity,
            "test input",
        )
        .collect()
    }

    #[test]
    fn test_merges_contiguous_rows() {
        let summaries = group(
            &[("1", &[0]), ("1", &[0, 1]), ("2", &[1])],
            Contiguity::Enforce,
        )
        .unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].locus, "1");
        assert_eq!(summaries[0].sample_count, 3);
        assert!((summaries[0].proportions[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((summaries[0].diversity.unwrap() - 2.0 / 3.0).abs() < 1e-12);

        // final group is flushed at end of stream
        assert_eq!(summaries[1].locus, "2");
        assert_eq!(summaries[1].proportions, vec![0.0, 1.0]);
        assert_eq!(summaries[1].diversity, None);
    }

    #[rstest]
    #[case(&[("a", &[0][..])], 1)]
    #[case(&[("a", &[0][..]), ("a", &[1][..]), ("a", &[][..])], 1)]
    #[case(&[("a", &[0][..]), ("b", &[1][..]), ("c", &[][..])], 3)]
    #[case(&[("a", &[0][..]), ("a", &[1][..]), ("b", &[][..]), ("c", &[0][..]), ("c", &[0][..])], 3)]
    fn test_one_row_per_run(#[case] rows: &[(&str, &[usize])], #[case] expected: usize) {
        let summaries = group(rows, Contiguity::Enforce).unwrap();
        assert_eq!(summaries.len(), expected);
        for summary in &summaries {
            assert_eq!(summary.proportions.len(), 2);
        }
    }

    #[test]
    fn test_emits_in_first_appearance_order() {
        let summaries = group(
            &[("z", &[0]), ("a", &[0]), ("m", &[1])],
            Contiguity::Enforce,
        )
        .unwrap();
        let loci: Vec<&str> = summaries.iter().map(|s| s.locus.as_str()).collect();
        assert_eq!(loci, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_non_contiguous_locus_fails() {
        let err = group(&[("a", &[0]), ("b", &[1]), ("a", &[1])], Contiguity::Enforce)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<StatsError>(),
            Some(&StatsError::NonContiguousLocus {
                locus: "a".to_string(),
                line: 3
            })
        );
    }

    #[test]
    fn test_assume_contiguous_opens_second_group() {
        let summaries =
            group(&[("a", &[0]), ("b", &[1]), ("a", &[1])], Contiguity::Assume).unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].locus, "a");
        assert_eq!(summaries[2].locus, "a");
    }

    #[test]
    fn test_empty_input() {
        let err = group(&[], Contiguity::Enforce).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatsError>(),
            Some(StatsError::EmptyInput { .. })
        ));
    }

    #[test]
    fn test_stops_after_record_error() {
        let mut rows = records(&[("a", &[0])]);
        rows.push(Err(anyhow!("bad line")));
        rows.extend(records(&[("b", &[1])]));

        let mut grouper = LocusGrouper::new(
            rows.into_iter(),
            Tally { num_populations: 2 },
            Contiguity::Enforce,
            "test input",
        );
        assert!(grouper.next().unwrap().is_err());
        assert!(grouper.next().is_none());
        assert_eq!(grouper.records_seen(), 1);
    }

    #[test]
    fn test_state_transitions() {
        let tally = Tally { num_populations: 2 };
        let mut state = GroupingState::new(Contiguity::Enforce);
        let mut rows = records(&[("a", &[0]), ("a", &[1]), ("b", &[1])]).into_iter();

        assert_eq!(state.step(&tally, rows.next().unwrap().unwrap()).unwrap(), None);
        assert_eq!(state.current_locus(), Some("a"));
        assert_eq!(state.step(&tally, rows.next().unwrap().unwrap()).unwrap(), None);

        let flushed = state
            .step(&tally, rows.next().unwrap().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(flushed.locus, "a");
        assert_eq!(flushed.sample_count, 2);
        assert_eq!(state.current_locus(), Some("b"));

        let last = state.finish(&tally).unwrap();
        assert_eq!(last.locus, "b");
        assert!(state.finish(&tally).is_none());
        assert_eq!(state.records_seen(), 3);
    }
}
