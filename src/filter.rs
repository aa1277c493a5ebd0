use crate::constants::GENERAL_FIELD;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

static CLAUSE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+):(?:"([^"]*)"|(\S+))"#).unwrap());

/// One parsed unit of a search query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchClause {
    pub field: String,
    pub value: String,
    pub exact: bool,
}

impl SearchClause {
    pub fn new(field: impl Into<String>, value: impl Into<String>, exact: bool) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            exact,
        }
    }

    pub fn general(value: impl Into<String>) -> Self {
        Self::new(GENERAL_FIELD, value, false)
    }

    pub fn is_general(&self) -> bool {
        self.field == GENERAL_FIELD
    }
}

/// How a record exposes one named field to clause matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// Free text, matched by substring unless the clause is exact.
    Text(&'a str),
    /// Categorical value, always matched by equality.
    Keyword(&'a str),
    /// Several text values; the clause matches if any of them does.
    List(Vec<&'a str>),
}

/// Shared search surface of every record variant.
pub trait Searchable {
    /// Looks up a named field. `None` means the record kind has no such field.
    fn field(&self, name: &str) -> Option<FieldValue<'_>>;

    /// Haystacks consulted by free-text clauses.
    fn general(&self) -> Vec<&str>;

    fn knows_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// Parses `field:value` and `field:"quoted value"` clauses out of `input`.
///
/// Whatever text is left once the clauses are cut out becomes one trailing
/// free-text clause. Never fails: malformed input degrades into free text.
pub fn parse_query(input: &str) -> Vec<SearchClause> {
    let mut clauses = Vec::new();
    let mut remainder = String::with_capacity(input.len());
    let mut last_end = 0;

    for caps in CLAUSE_PATTERN.captures_iter(input) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        remainder.push_str(&input[last_end..whole.start()]);
        remainder.push(' ');
        last_end = whole.end();

        let field = &caps[1];
        let clause = match (caps.get(2), caps.get(3)) {
            (Some(quoted), _) => SearchClause::new(field, quoted.as_str(), true),
            (None, Some(bare)) => SearchClause::new(field, bare.as_str(), false),
            (None, None) => continue,
        };
        clauses.push(clause);
    }
    remainder.push_str(&input[last_end..]);

    let general = remainder.split_whitespace().collect::<Vec<_>>().join(" ");
    if !general.is_empty() {
        clauses.push(SearchClause::general(general));
    }
    clauses
}

/// Parses with the structured syntax switched on or off. With it off the
/// whole trimmed query is a single free-text clause.
pub fn parse_query_with(input: &str, advanced_syntax: bool) -> Vec<SearchClause> {
    if advanced_syntax {
        return parse_query(input);
    }
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![SearchClause::general(trimmed)]
    }
}

/// A clause list prepared for repeated matching against many records.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    clauses: Vec<CompiledClause>,
    case_insensitive: bool,
}

#[derive(Debug, Clone)]
struct CompiledClause {
    clause: SearchClause,
    needle: String,
}

impl CompiledQuery {
    pub fn new(clauses: &[SearchClause], case_insensitive: bool) -> Self {
        let clauses = clauses
            .iter()
            .map(|clause| CompiledClause {
                needle: fold(&clause.value, case_insensitive).into_owned(),
                clause: clause.clone(),
            })
            .collect();
        Self {
            clauses,
            case_insensitive,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> impl Iterator<Item = &SearchClause> {
        self.clauses.iter().map(|c| &c.clause)
    }

    /// True when every clause matches.
    pub fn matches<R: Searchable + ?Sized>(&self, record: &R) -> bool {
        self.clauses.iter().all(|c| self.clause_matches(c, record))
    }

    fn clause_matches<R: Searchable + ?Sized>(&self, compiled: &CompiledClause, record: &R) -> bool {
        let ci = self.case_insensitive;
        if compiled.clause.is_general() {
            return record
                .general()
                .into_iter()
                .any(|hay| fold(hay, ci).contains(compiled.needle.as_str()));
        }
        let text_matches = |hay: &str| {
            let hay = fold(hay, ci);
            if compiled.clause.exact {
                *hay == *compiled.needle
            } else {
                hay.contains(compiled.needle.as_str())
            }
        };
        match record.field(&compiled.clause.field) {
            None => false,
            Some(FieldValue::Keyword(value)) => *fold(value, ci) == *compiled.needle,
            Some(FieldValue::Text(value)) => text_matches(value),
            Some(FieldValue::List(values)) => values.into_iter().any(text_matches),
        }
    }
}

/// Lowercases only when a character would change, so already-folded text is borrowed.
fn fold(text: &str, case_insensitive: bool) -> Cow<'_, str> {
    let folded = |c: char| {
        if c.is_ascii() {
            !c.is_ascii_uppercase()
        } else {
            c.to_lowercase().eq(std::iter::once(c))
        }
    };
    if !case_insensitive || text.chars().all(folded) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.to_lowercase())
    }
}
