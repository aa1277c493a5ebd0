use crate::filter::{FieldValue, Searchable};
use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Network {
    Tcp,
    Udp,
    Other(String),
}

impl Network {
    pub fn as_str(&self) -> &str {
        match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
            Network::Other(name) => name,
        }
    }
}

impl From<String> for Network {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "tcp" => Network::Tcp,
            "udp" => Network::Udp,
            _ => Network::Other(value),
        }
    }
}

impl From<Network> for String {
    fn from(value: Network) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub network: Network,
    #[serde(rename = "type", default)]
    pub conn_type: String,
    #[serde(rename = "sourceIP", default)]
    pub source_ip: String,
    #[serde(rename = "sourcePort", default, deserialize_with = "string_or_number")]
    pub source_port: String,
    #[serde(rename = "destinationIP")]
    pub destination_ip: String,
    #[serde(rename = "destinationPort", default, deserialize_with = "string_or_number")]
    pub destination_port: String,
    #[serde(default)]
    pub host: String,
    #[serde(rename = "processPath", default)]
    pub process_path: String,
}

impl Metadata {
    pub fn process_name(&self) -> &str {
        self.process_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.process_path)
    }

    /// Host when known, destination address otherwise.
    pub fn display_host(&self) -> &str {
        if self.host.is_empty() {
            &self.destination_ip
        } else {
            &self.host
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }
    Ok(match Repr::deserialize(deserializer)? {
        Repr::Text(text) => text,
        Repr::Number(n) => n.to_string(),
    })
}

/// Connection start as reported by the daemon: RFC 3339 text or epoch
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartTime {
    EpochMillis(f64),
    Text(String),
}

impl StartTime {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            StartTime::EpochMillis(ms) if ms.is_finite() => {
                Utc.timestamp_millis_opt(*ms as i64).single()
            }
            StartTime::EpochMillis(_) => None,
            StartTime::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl From<DateTime<Utc>> for StartTime {
    fn from(value: DateTime<Utc>) -> Self {
        StartTime::Text(value.to_rfc3339())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub upload: u64,
    #[serde(default)]
    pub download: u64,
    #[serde(default)]
    pub start: Option<StartTime>,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub rule: String,
    #[serde(rename = "rulePayload", default)]
    pub rule_payload: String,
}

impl Connection {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start.as_ref().and_then(StartTime::to_datetime)
    }

    /// Chains arrive innermost-first; the outermost proxy is the last entry.
    pub fn outbound(&self) -> &str {
        self.chains.last().map(String::as_str).unwrap_or("")
    }
}

impl Searchable for Connection {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        let meta = &self.metadata;
        let value = match name {
            "host" => FieldValue::Text(&meta.host),
            "ip" | "destinationIP" => FieldValue::Text(&meta.destination_ip),
            "sourceIP" => FieldValue::Text(&meta.source_ip),
            "port" | "destinationPort" => FieldValue::Text(&meta.destination_port),
            "sourcePort" => FieldValue::Text(&meta.source_port),
            "network" => FieldValue::Keyword(meta.network.as_str()),
            "type" => FieldValue::Keyword(&meta.conn_type),
            "rule" => FieldValue::Text(&self.rule),
            "payload" | "rulePayload" => FieldValue::Text(&self.rule_payload),
            "chain" | "proxy" => {
                FieldValue::List(self.chains.iter().map(String::as_str).collect())
            }
            "process" => FieldValue::Text(meta.process_name()),
            "processPath" => FieldValue::Text(&meta.process_path),
            _ => return None,
        };
        Some(value)
    }

    fn general(&self) -> Vec<&str> {
        let mut hay = Vec::with_capacity(2 + self.chains.len());
        hay.push(self.metadata.host.as_str());
        hay.push(self.metadata.destination_ip.as_str());
        hay.extend(self.chains.iter().map(String::as_str));
        hay
    }
}

/// A connection plus what can only be known by comparing snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub conn: Connection,
    pub upload_speed: u64,
    pub download_speed: u64,
    pub closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
}

impl EnrichedRecord {
    pub fn opened(conn: Connection) -> Self {
        Self {
            conn,
            upload_speed: 0,
            download_speed: 0,
            closed: false,
            closed_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.conn.id
    }

    pub fn total(&self) -> u64 {
        self.conn.upload.saturating_add(self.conn.download)
    }
}

impl Searchable for EnrichedRecord {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        self.conn.field(name)
    }

    fn general(&self) -> Vec<&str> {
        self.conn.general()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub proxy: String,
    #[serde(default)]
    pub size: Option<i64>,
}

impl Searchable for Rule {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "type" => Some(FieldValue::Keyword(&self.rule_type)),
            "payload" => Some(FieldValue::Text(&self.payload)),
            "proxy" => Some(FieldValue::Text(&self.proxy)),
            _ => None,
        }
    }

    fn general(&self) -> Vec<&str> {
        vec![&self.payload, &self.proxy]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleProvider {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub behavior: String,
    #[serde(rename = "vehicleType", default)]
    pub vehicle_type: String,
    #[serde(rename = "ruleCount", default)]
    pub rule_count: u64,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<String>,
}

impl Searchable for RuleProvider {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "name" => Some(FieldValue::Text(&self.name)),
            "behavior" => Some(FieldValue::Keyword(&self.behavior)),
            "vehicle" | "vehicleType" => Some(FieldValue::Keyword(&self.vehicle_type)),
            _ => None,
        }
    }

    fn general(&self) -> Vec<&str> {
        vec![&self.name]
    }
}

/// Entry of the rules pane: rules first, providers after.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleEntry {
    Rule(Rule),
    Provider(RuleProvider),
}

impl Searchable for RuleEntry {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match self {
            RuleEntry::Rule(rule) => rule.field(name),
            RuleEntry::Provider(provider) => provider.field(name),
        }
    }

    fn general(&self) -> Vec<&str> {
        match self {
            RuleEntry::Rule(rule) => rule.general(),
            RuleEntry::Provider(provider) => provider.general(),
        }
    }
}

/// One decoded connections snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub connections: Vec<Connection>,
    pub upload_total: Option<u64>,
    pub download_total: Option<u64>,
    /// Entries that could not be decoded and were dropped.
    pub malformed: usize,
}

impl Snapshot {
    pub fn new(connections: Vec<Connection>) -> Self {
        Self {
            connections,
            ..Self::default()
        }
    }
}

/// Anything the feed can deliver on one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Connections(Snapshot),
    Rules(Vec<Rule>),
    Providers(Vec<RuleProvider>),
}

pub fn decode_document(text: &str) -> Result<Document> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut object) = value else {
        return Err(anyhow!("expected a JSON object"));
    };

    if let Some(connections) = object.remove("connections") {
        let upload_total = object.get("uploadTotal").and_then(Value::as_u64);
        let download_total = object.get("downloadTotal").and_then(Value::as_u64);
        let (connections, malformed) = decode_each::<Connection>(connections, "connection");
        return Ok(Document::Connections(Snapshot {
            connections,
            upload_total,
            download_total,
            malformed,
        }));
    }
    if let Some(rules) = object.remove("rules") {
        let (rules, _) = decode_each::<Rule>(rules, "rule");
        return Ok(Document::Rules(rules));
    }
    if let Some(Value::Object(providers)) = object.remove("providers") {
        let (providers, _) = decode_providers(providers);
        return Ok(Document::Providers(providers));
    }
    Err(anyhow!("unrecognized document: no connections, rules or providers key"))
}

/// Decodes an array element by element so one bad entry does not discard the
/// batch. `null` is an empty list.
fn decode_each<T: for<'de> Deserialize<'de>>(value: Value, kind: &str) -> (Vec<T>, usize) {
    let items = match value {
        Value::Array(items) => items,
        Value::Null => return (Vec::new(), 0),
        _ => {
            warn!(kind, "expected an array, ignoring document body");
            return (Vec::new(), 0);
        }
    };
    let mut decoded = Vec::with_capacity(items.len());
    let mut malformed = 0;
    for item in items {
        match serde_json::from_value(item) {
            Ok(v) => decoded.push(v),
            Err(_) => malformed += 1,
        }
    }
    warn_malformed(kind, malformed);
    (decoded, malformed)
}

/// Providers arrive keyed by name; the key fills a missing `name`.
fn decode_providers(providers: Map<String, Value>) -> (Vec<RuleProvider>, usize) {
    let mut decoded = Vec::with_capacity(providers.len());
    let mut malformed = 0;
    for (name, value) in providers {
        match serde_json::from_value::<RuleProvider>(value) {
            Ok(mut provider) => {
                if provider.name.is_empty() {
                    provider.name = name;
                }
                decoded.push(provider);
            }
            Err(_) => malformed += 1,
        }
    }
    warn_malformed("provider", malformed);
    (decoded, malformed)
}

fn warn_malformed(kind: &str, malformed: usize) {
    if malformed > 0 {
        warn!(kind, malformed, irregularity = "malformed_record", "dropped undecodable entries");
    }
}
