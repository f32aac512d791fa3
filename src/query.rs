//! Named read operations over the sample store.
//!
//! The catalogue mirrors the classic handler set: `average`/`avg`, `avg_tc`,
//! `min`, `max`, `stddev`, the fixed `percNN` family, `median`, `perc`,
//! `index`, `last`, `dump` and `dump_list`. Parsing, computation and
//! formatting stay separated: a name plus its raw argument text parse into
//! one [`StatQuery`] variant, which then runs against a store and formats
//! its result as text.

use std::error::Error;
use std::fmt;

use crate::sample_store::SampleStore;

/// Every handler name the query surface answers to.
pub const HANDLER_NAMES: &[&str] = &[
    "average", "avg", "avg_tc", "min", "max", "stddev", "perc00", "perc01", "perc05", "perc10",
    "perc25", "median", "perc75", "perc90", "perc95", "perc99", "perc100", "perc", "index",
    "last", "dump", "dump_list",
];

/// Result token for a query whose argument text did not parse.
pub const ERROR_TOKEN: &str = "<error>";
const UNKNOWN_HANDLER: &str = "Unknown read handler for DelayProbe";

/// Per-call query input failures; they never affect ingestion or other
/// queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    UnknownHandler(String),
    BadArgument,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::UnknownHandler(name) => write!(f, "unknown read handler: {}", name),
            QueryError::BadArgument => write!(f, "unparseable query argument"),
        }
    }
}

impl Error for QueryError {}

/// One parsed read operation, arguments included.
#[derive(Debug, Clone, PartialEq)]
pub enum StatQuery {
    Average { begin: usize },
    /// `None` filter behaves like a plain average; a negative class
    /// argument parses to `None`, matching the classic handler. A value
    /// above the byte range is kept as-is: no tag can match it, so the
    /// result is the empty-range 0, again like the classic handler.
    AverageTc { tc: Option<i64>, begin: usize },
    Min { begin: usize },
    Max { begin: usize },
    StdDev { begin: usize },
    Percentile { percent: f64, begin: usize },
    Index,
    Last,
    Dump,
    DumpList,
}

fn parse_begin(args: &str) -> Result<usize, QueryError> {
    let args = args.trim();
    if args.is_empty() {
        return Ok(0);
    }
    let token = args.split_whitespace().next().unwrap_or("");
    token.parse().map_err(|_| QueryError::BadArgument)
}

/// Splits the leading token (the "extra" argument of `perc` and `avg_tc`)
/// from the rest of the text.
fn split_extra(args: &str) -> (&str, &str) {
    let args = args.trim_start();
    match args.find(char::is_whitespace) {
        Some(pos) => (&args[..pos], &args[pos..]),
        None => (args, ""),
    }
}

impl StatQuery {
    /// Parses a handler name and its raw argument text. The grammar is
    /// `"<begin>"` for range-scoped handlers, `"<extra> <begin>"` for
    /// `perc` and `avg_tc`, and no arguments for `index`, `last`, `dump`
    /// and `dump_list`. Empty text means begin 0.
    pub fn parse(name: &str, args: &str) -> Result<StatQuery, QueryError> {
        let fixed_percentile = |percent: f64| -> Result<StatQuery, QueryError> {
            Ok(StatQuery::Percentile { percent, begin: parse_begin(args)? })
        };

        match name {
            "average" | "avg" => Ok(StatQuery::Average { begin: parse_begin(args)? }),
            "avg_tc" => {
                if args.trim().is_empty() {
                    return Ok(StatQuery::AverageTc { tc: None, begin: 0 });
                }
                let (extra, rest) = split_extra(args);
                let raw: i64 = extra.parse().map_err(|_| QueryError::BadArgument)?;
                let tc = if raw < 0 { None } else { Some(raw) };
                Ok(StatQuery::AverageTc { tc, begin: parse_begin(rest)? })
            }
            "min" => Ok(StatQuery::Min { begin: parse_begin(args)? }),
            "max" => Ok(StatQuery::Max { begin: parse_begin(args)? }),
            "stddev" => Ok(StatQuery::StdDev { begin: parse_begin(args)? }),
            // the 0th and 100th percentile handlers answer with the plain
            // min/max scan rather than the selection routine
            "perc00" => Ok(StatQuery::Min { begin: parse_begin(args)? }),
            "perc100" => Ok(StatQuery::Max { begin: parse_begin(args)? }),
            "perc01" => fixed_percentile(1.0),
            "perc05" => fixed_percentile(5.0),
            "perc10" => fixed_percentile(10.0),
            "perc25" => fixed_percentile(25.0),
            "median" => fixed_percentile(50.0),
            "perc75" => fixed_percentile(75.0),
            "perc90" => fixed_percentile(90.0),
            "perc95" => fixed_percentile(95.0),
            "perc99" => fixed_percentile(99.0),
            "perc" => {
                // the percentile argument is optional; absent means 0,
                // which answers with the range minimum
                if args.trim().is_empty() {
                    return Ok(StatQuery::Percentile { percent: 0.0, begin: 0 });
                }
                let (extra, rest) = split_extra(args);
                let percent: f64 = extra.parse().map_err(|_| QueryError::BadArgument)?;
                Ok(StatQuery::Percentile { percent, begin: parse_begin(rest)? })
            }
            "index" => Ok(StatQuery::Index),
            "last" => Ok(StatQuery::Last),
            "dump" => Ok(StatQuery::Dump),
            "dump_list" => Ok(StatQuery::DumpList),
            other => Err(QueryError::UnknownHandler(other.to_string())),
        }
    }

    /// Runs the query against a store and formats the result as text.
    pub fn run(&self, store: &SampleStore) -> String {
        let mut buf = itoa::Buffer::new();
        match *self {
            StatQuery::Average { begin } => {
                let (_, mean, _) = store.min_mean_max(begin, None);
                mean.to_string()
            }
            StatQuery::AverageTc { tc, begin } => {
                let mean = match tc {
                    // a filter no byte-sized tag can match: nothing is
                    // considered, so the mean is the empty-range 0
                    Some(raw) if raw > u8::MAX as i64 => 0.0,
                    _ => store.min_mean_max(begin, tc.map(|raw| raw as u8)).1,
                };
                mean.to_string()
            }
            StatQuery::Min { begin } => {
                let (min, _, _) = store.min_mean_max(begin, None);
                buf.format(min).to_string()
            }
            StatQuery::Max { begin } => {
                let (_, _, max) = store.min_mean_max(begin, None);
                buf.format(max).to_string()
            }
            StatQuery::StdDev { begin } => {
                // fresh mean immediately before the deviation pass
                let (_, mean, _) = store.min_mean_max(begin, None);
                store.standard_deviation(mean, begin).to_string()
            }
            StatQuery::Percentile { percent, begin } => {
                store.percentile(percent, begin).to_string()
            }
            StatQuery::Index => (store.len() as i64 - 1).to_string(),
            StatQuery::Last => buf.format(store.last_value_seen()).to_string(),
            StatQuery::Dump => dump_text(store, true),
            StatQuery::DumpList => dump_text(store, false),
        }
    }
}

fn dump_text(store: &SampleStore, indexed: bool) -> String {
    let mut out = String::new();
    for line in store.dump_lines(indexed) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Parse-and-run convenience for operator surfaces: maps argument failures
/// to the [`ERROR_TOKEN`] and unknown names to a diagnostic string, so a
/// bad call never turns into an error for anyone else.
pub fn respond(store: &SampleStore, name: &str, args: &str) -> String {
    match StatQuery::parse(name, args) {
        Ok(query) => query.run(store),
        Err(QueryError::BadArgument) => ERROR_TOKEN.to_string(),
        Err(QueryError::UnknownHandler(_)) => UNKNOWN_HANDLER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_store::{Sample, SampleStore};

    fn example_store() -> SampleStore {
        let store = SampleStore::with_capacity(5);
        for d in [10u64, 20, 30, 40, 50] {
            store.record(Sample::new(d, 0));
        }
        store
    }

    #[test]
    fn catalogue_answers_on_the_example_range() {
        let store = example_store();
        assert_eq!(respond(&store, "min", ""), "10");
        assert_eq!(respond(&store, "max", ""), "50");
        assert_eq!(respond(&store, "avg", ""), "30");
        assert_eq!(respond(&store, "average", ""), "30");
        assert_eq!(respond(&store, "median", ""), "30");
        assert_eq!(respond(&store, "perc90", ""), "50");
        assert_eq!(respond(&store, "perc00", ""), "10");
        assert_eq!(respond(&store, "perc100", ""), "50");
        assert_eq!(respond(&store, "last", ""), "50");
        assert_eq!(respond(&store, "index", ""), "4");
    }

    #[test]
    fn perc_takes_the_percentile_as_leading_argument() {
        let store = example_store();
        assert_eq!(respond(&store, "perc", "90"), "50");
        assert_eq!(respond(&store, "perc", "0"), "10");
        assert_eq!(respond(&store, "perc", "100"), "50");
        // "<percent> <begin>"
        assert_eq!(respond(&store, "perc", "0 3"), "40");
    }

    #[test]
    fn begin_argument_scopes_the_range() {
        let store = example_store();
        assert_eq!(respond(&store, "avg", "3"), "45");
        assert_eq!(respond(&store, "min", "3"), "40");
    }

    #[test]
    fn out_of_range_begin_yields_the_defined_zero() {
        let store = example_store();
        assert_eq!(respond(&store, "avg", "99"), "0");
        assert_eq!(respond(&store, "min", "99"), "0");
        assert_eq!(respond(&store, "median", "99"), "0");
    }

    #[test]
    fn avg_tc_filters_both_numerator_and_denominator() {
        let store = SampleStore::with_capacity(3);
        store.record(Sample::new(10, 1));
        store.record(Sample::new(20, 2));
        store.record(Sample::new(30, 1));
        assert_eq!(respond(&store, "avg_tc", "1"), "20");
        assert_eq!(respond(&store, "avg_tc", "2"), "20");
        // negative filter means unfiltered, like the plain average
        assert_eq!(respond(&store, "avg_tc", "-1"), "20");
        assert_eq!(respond(&store, "avg_tc", ""), "20");
    }

    #[test]
    fn avg_tc_filter_above_the_byte_range_matches_nothing() {
        let store = SampleStore::with_capacity(2);
        store.record(Sample::new(10, 1));
        store.record(Sample::new(30, 1));
        assert_eq!(respond(&store, "avg_tc", "300"), "0");
        assert_eq!(respond(&store, "avg_tc", "300 1"), "0");
    }

    #[test]
    fn perc_without_arguments_returns_the_range_minimum() {
        let store = SampleStore::with_capacity(3);
        for d in [30u64, 10, 20] {
            store.record(Sample::new(d, 0));
        }
        assert_eq!(respond(&store, "perc", ""), "10");
        assert_eq!(respond(&store, "perc", "  "), "10");
        assert_eq!(
            StatQuery::parse("perc", "").expect("optional argument"),
            StatQuery::Percentile { percent: 0.0, begin: 0 }
        );
    }

    #[test]
    fn stddev_recomputes_its_mean_first() {
        let store = SampleStore::with_capacity(8);
        for d in [2u64, 4, 4, 4, 5, 5, 7, 9] {
            store.record(Sample::new(d, 0));
        }
        assert_eq!(respond(&store, "stddev", ""), "2");
    }

    #[test]
    fn malformed_arguments_return_the_error_token() {
        let store = example_store();
        assert_eq!(respond(&store, "avg", "abc"), ERROR_TOKEN);
        assert_eq!(respond(&store, "perc", "ninety"), ERROR_TOKEN);
        assert_eq!(respond(&store, "avg_tc", "tag"), ERROR_TOKEN);
    }

    #[test]
    fn unknown_handler_is_reported_not_propagated() {
        let store = example_store();
        assert_eq!(StatQuery::parse("p50", ""), Err(QueryError::UnknownHandler("p50".into())));
        assert!(respond(&store, "p50", "").contains("Unknown read handler"));
    }

    #[test]
    fn empty_store_answers_with_zeroes() {
        let store = SampleStore::with_capacity(2);
        assert_eq!(respond(&store, "avg", ""), "0");
        assert_eq!(respond(&store, "last", ""), "0");
        assert_eq!(respond(&store, "median", ""), "0");
        assert_eq!(respond(&store, "index", ""), "-1");
        assert_eq!(respond(&store, "dump", ""), "");
    }

    #[test]
    fn dump_and_dump_list_formats() {
        let store = SampleStore::with_capacity(3);
        for d in [7u64, 8, 9] {
            store.record(Sample::new(d, 0));
        }
        assert_eq!(respond(&store, "dump", ""), "0: 7\n1: 8\n2: 9\n");
        assert_eq!(respond(&store, "dump_list", ""), "7\n8\n9\n");
    }

    #[test]
    fn every_catalogue_name_parses() {
        for name in HANDLER_NAMES {
            let args = if *name == "perc" || *name == "avg_tc" { "1" } else { "" };
            assert!(StatQuery::parse(name, args).is_ok(), "{}", name);
        }
    }
}
