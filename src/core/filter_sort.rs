use super::record::{EnrichedRecord, Network};
use crate::filter::{CompiledQuery, SearchClause, Searchable};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum NetworkFilter {
    #[default]
    All,
    Only(Network),
}

impl NetworkFilter {
    pub fn cycle(&self) -> Self {
        match self {
            NetworkFilter::All => NetworkFilter::Only(Network::Tcp),
            NetworkFilter::Only(Network::Tcp) => NetworkFilter::Only(Network::Udp),
            NetworkFilter::Only(_) => NetworkFilter::All,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            NetworkFilter::All => "all",
            NetworkFilter::Only(network) => network.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusFilter {
    #[default]
    Active,
    Closed,
    All,
}

impl StatusFilter {
    pub fn cycle(self) -> Self {
        match self {
            StatusFilter::Active => StatusFilter::Closed,
            StatusFilter::Closed => StatusFilter::All,
            StatusFilter::All => StatusFilter::Active,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StatusFilter::Active => "active",
            StatusFilter::Closed => "closed",
            StatusFilter::All => "all",
        }
    }

    fn admits(self, record: &EnrichedRecord) -> bool {
        match self {
            StatusFilter::Active => !record.closed,
            StatusFilter::Closed => record.closed,
            StatusFilter::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortKey {
    #[default]
    Time,
    Host,
    Upload,
    Download,
    Total,
    UploadSpeed,
    DownloadSpeed,
}

impl SortKey {
    pub const ALL: [SortKey; 7] = [
        SortKey::Time,
        SortKey::Host,
        SortKey::Upload,
        SortKey::Download,
        SortKey::Total,
        SortKey::UploadSpeed,
        SortKey::DownloadSpeed,
    ];

    pub fn next(self) -> Self {
        let pos = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        Self::ALL[(pos + 1) % Self::ALL.len()]
    }

    pub fn label(self) -> &'static str {
        match self {
            SortKey::Time => "time",
            SortKey::Host => "host",
            SortKey::Upload => "upload",
            SortKey::Download => "download",
            SortKey::Total => "total",
            SortKey::UploadSpeed => "up/s",
            SortKey::DownloadSpeed => "down/s",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn flip(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// Sort key plus direction.
///
/// For [`SortKey::Time`] the comparison runs on connection age, so `Asc`
/// lists the newest-started (shortest-lived) connections first and `Desc`
/// the oldest-started ones. Connections whose start cannot be parsed count
/// as the oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SortSpec {
    pub key: SortKey,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterOptions {
    pub network: NetworkFilter,
    pub status: StatusFilter,
    pub clauses: Vec<SearchClause>,
    pub sort: SortSpec,
    pub case_insensitive: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            network: NetworkFilter::All,
            status: StatusFilter::Active,
            clauses: Vec::new(),
            sort: SortSpec::default(),
            case_insensitive: true,
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    Age(i64),
    Text(String),
    Bytes(u64),
}

fn sort_value(key: SortKey, record: &EnrichedRecord) -> SortValue {
    match key {
        // Newer start means a smaller age; missing starts are the oldest.
        SortKey::Time => SortValue::Age(
            record
                .conn
                .started_at()
                .map(|t| -t.timestamp_millis())
                .unwrap_or(i64::MAX),
        ),
        SortKey::Host => SortValue::Text(record.conn.metadata.display_host().to_lowercase()),
        SortKey::Upload => SortValue::Bytes(record.conn.upload),
        SortKey::Download => SortValue::Bytes(record.conn.download),
        SortKey::Total => SortValue::Bytes(record.total()),
        SortKey::UploadSpeed => SortValue::Bytes(record.upload_speed),
        SortKey::DownloadSpeed => SortValue::Bytes(record.download_speed),
    }
}

/// Filters then sorts. Pure: the input slice is only read.
///
/// Filters run cheapest first: network, status, then the search clauses
/// (all of which must match). The sort is stable in both directions, so
/// records with equal keys keep their snapshot order.
pub fn apply(records: &[EnrichedRecord], opts: &FilterOptions) -> Vec<EnrichedRecord> {
    let query = CompiledQuery::new(&opts.clauses, opts.case_insensitive);
    if let Some(sample) = records.first() {
        log_degraded_clauses(&query, sample);
    }

    let mut keyed: Vec<(SortValue, &EnrichedRecord)> = records
        .iter()
        .filter(|r| match &opts.network {
            NetworkFilter::All => true,
            NetworkFilter::Only(network) => r.conn.metadata.network == *network,
        })
        .filter(|r| opts.status.admits(r))
        .filter(|r| query.matches(*r))
        .map(|r| (sort_value(opts.sort.key, r), r))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| {
        let ord = a.cmp(b);
        match opts.sort.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });

    keyed.into_iter().map(|(_, r)| r.clone()).collect()
}

/// Applies only the clause predicate; used for the rules pane.
pub fn filter_records<T: Searchable + Clone>(
    items: &[T],
    clauses: &[SearchClause],
    case_insensitive: bool,
) -> Vec<T> {
    let query = CompiledQuery::new(clauses, case_insensitive);
    if query.is_empty() {
        return items.to_vec();
    }
    if let Some(sample) = items.first() {
        log_degraded_clauses(&query, sample);
    }
    items.iter().filter(|i| query.matches(*i)).cloned().collect()
}

fn log_degraded_clauses<R: Searchable + ?Sized>(query: &CompiledQuery, sample: &R) {
    for clause in query.clauses().filter(|c| !c.is_general()) {
        if !sample.knows_field(&clause.field) {
            debug!(
                field = %clause.field,
                irregularity = "parse_degraded",
                "unknown search field never matches"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::tests::{conn, rule};
    use crate::core::record::{Rule, StartTime};
    use crate::filter::parse_query;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, host: &str, upload: u64, download: u64) -> EnrichedRecord {
        EnrichedRecord::opened(conn(id, host, upload, download))
    }

    fn started(id: &str, secs: i64) -> EnrichedRecord {
        let mut c = conn(id, id, 0, 0);
        c.start = Some(StartTime::from(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()));
        EnrichedRecord::opened(c)
    }

    fn ids(records: &[EnrichedRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id()).collect()
    }

    fn opts(query: &str) -> FilterOptions {
        FilterOptions {
            clauses: parse_query(query),
            status: StatusFilter::All,
            ..FilterOptions::default()
        }
    }

    #[test]
    fn test_network_filter() {
        let mut udp = record("u", "dns", 0, 0);
        udp.conn.metadata.network = Network::Udp;
        let records = vec![record("t", "web", 0, 0), udp];
        let out = apply(
            &records,
            &FilterOptions {
                network: NetworkFilter::Only(Network::Udp),
                ..opts("")
            },
        );
        assert_eq!(ids(&out), vec!["u"]);
    }

    #[test]
    fn test_status_filter() {
        let mut closed = record("c", "h", 0, 0);
        closed.closed = true;
        let records = vec![record("a", "h", 0, 0), closed];
        let active = apply(&records, &FilterOptions::default());
        assert_eq!(ids(&active), vec!["a"]);
        let closed_only = apply(
            &records,
            &FilterOptions {
                status: StatusFilter::Closed,
                ..FilterOptions::default()
            },
        );
        assert_eq!(ids(&closed_only), vec!["c"]);
        assert_eq!(apply(&records, &opts("")).len(), 2);
    }

    #[test]
    fn test_general_clause_matches_host_ip_or_chain() {
        let mut by_chain = record("chain", "x.org", 0, 0);
        by_chain.conn.chains = vec!["Tokyo-01".to_string()];
        let mut by_ip = record("ip", "y.org", 0, 0);
        by_ip.conn.metadata.destination_ip = "10.9.8.7".to_string();
        let records = vec![record("host", "tokyo.example", 0, 0), by_chain, by_ip];

        assert_eq!(ids(&apply(&records, &opts("tokyo"))), vec!["host", "chain"]);
        assert_eq!(ids(&apply(&records, &opts("10.9.8"))), vec!["ip"]);
    }

    #[test]
    fn test_field_clause_respects_case_flag() {
        let records = vec![record("a", "Example.COM", 0, 0)];
        assert_eq!(apply(&records, &opts("host:example")).len(), 1);
        let strict = FilterOptions {
            case_insensitive: false,
            ..opts("host:example")
        };
        assert!(apply(&records, &strict).is_empty());
    }

    #[test]
    fn test_and_semantics_compose() {
        let records = vec![
            record("a", "api.github.com", 0, 0),
            record("b", "github.io", 0, 0),
            record("c", "api.example.com", 0, 0),
        ];
        let both = apply(&records, &opts("host:api github"));
        let chained = apply(&apply(&records, &opts("host:api")), &opts("github"));
        assert_eq!(both, chained);
        assert_eq!(ids(&both), vec!["a"]);
    }

    #[test]
    fn test_unknown_field_yields_empty() {
        let records = vec![record("a", "h", 0, 0)];
        assert!(apply(&records, &opts("colour:blue")).is_empty());
    }

    #[test]
    fn test_sort_by_bytes_both_orders() {
        let records = vec![
            record("small", "h", 1, 1),
            record("big", "h", 100, 100),
            record("mid", "h", 10, 10),
        ];
        let mut o = opts("");
        o.sort = SortSpec {
            key: SortKey::Total,
            order: SortOrder::Desc,
        };
        assert_eq!(ids(&apply(&records, &o)), vec!["big", "mid", "small"]);
        o.sort.order = SortOrder::Asc;
        assert_eq!(ids(&apply(&records, &o)), vec!["small", "mid", "big"]);
    }

    #[test]
    fn test_sort_is_stable_in_both_orders() {
        let records = vec![
            record("a", "same", 5, 0),
            record("b", "other", 9, 0),
            record("c", "same", 5, 0),
            record("d", "same", 5, 0),
        ];
        for order in [SortOrder::Asc, SortOrder::Desc] {
            let mut o = opts("");
            o.sort = SortSpec {
                key: SortKey::Upload,
                order,
            };
            let out = apply(&records, &o);
            let tied: Vec<&str> = out
                .iter()
                .filter(|r| r.conn.upload == 5)
                .map(|r| r.id())
                .collect();
            assert_eq!(tied, vec!["a", "c", "d"]);
        }
    }

    #[test]
    fn test_time_sort_convention() {
        let records = vec![started("old", 0), started("new", 100), started("mid", 50)];
        let mut o = opts("");
        o.sort = SortSpec {
            key: SortKey::Time,
            order: SortOrder::Asc,
        };
        assert_eq!(ids(&apply(&records, &o)), vec!["new", "mid", "old"]);
        o.sort.order = SortOrder::Desc;
        assert_eq!(ids(&apply(&records, &o)), vec!["old", "mid", "new"]);
    }

    #[test]
    fn test_host_sort_falls_back_to_ip() {
        let mut no_host = record("ip", "", 0, 0);
        no_host.conn.metadata.destination_ip = "0.0.0.1".to_string();
        let records = vec![record("z", "zeta.io", 0, 0), no_host, record("a", "alpha.io", 0, 0)];
        let mut o = opts("");
        o.sort = SortSpec {
            key: SortKey::Host,
            order: SortOrder::Asc,
        };
        assert_eq!(ids(&apply(&records, &o)), vec!["ip", "a", "z"]);
    }

    #[test]
    fn test_rules_scenario() {
        let rules: Vec<Rule> = vec![
            rule("DOMAIN", "google.com", "DIRECT"),
            rule("DOMAIN-SUFFIX", "google.com", "DIRECT"),
            rule("DOMAIN", "github.com", "DIRECT"),
            rule("DOMAIN", "google.co.jp", "Proxy"),
            rule("DOMAIN", "mail.google.com", "DIRECT-HK"),
        ];
        let out = filter_records(&rules, &parse_query("type:DOMAIN proxy:DIRECT google"), true);
        let payloads: Vec<&str> = out.iter().map(|r| r.payload.as_str()).collect();
        assert_eq!(payloads, vec!["google.com", "mail.google.com"]);
    }

    #[test]
    fn test_empty_input_is_empty_output() {
        assert!(apply(&[], &opts("anything")).is_empty());
        let rules: Vec<Rule> = Vec::new();
        assert!(filter_records(&rules, &parse_query("x"), true).is_empty());
    }
}
