use crate::models::MappingRecord;
use regex::Regex;
use std::net::IpAddr;

/// Which local address a `local` query compares against
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalScope {
    /// The address autodetected by the client
    Detected,
    Address(IpAddr),
}

/// How a `description` query matches
#[derive(Clone, Debug)]
pub enum DescriptionMatch {
    /// Substring match
    Contains(String),
    Pattern(Regex),
}

impl DescriptionMatch {
    pub fn is_match(&self, description: &str) -> bool {
        match self {
            DescriptionMatch::Contains(needle) => description.contains(needle.as_str()),
            DescriptionMatch::Pattern(re) => re.is_match(description),
        }
    }
}

impl From<&str> for DescriptionMatch {
    fn from(s: &str) -> Self {
        DescriptionMatch::Contains(s.to_string())
    }
}

impl From<String> for DescriptionMatch {
    fn from(s: String) -> Self {
        DescriptionMatch::Contains(s)
    }
}

impl From<Regex> for DescriptionMatch {
    fn from(re: Regex) -> Self {
        DescriptionMatch::Pattern(re)
    }
}

/// Options for listing mappings. At most one filter applies; `local` wins.
#[derive(Clone, Debug, Default)]
pub struct MappingQuery {
    pub local: Option<LocalScope>,
    pub description: Option<DescriptionMatch>,
}

impl MappingQuery {
    /// Every mapping on the gateway
    pub fn all() -> Self {
        Self::default()
    }

    /// Mappings pointing at this host's autodetected address
    pub fn local() -> Self {
        Self {
            local: Some(LocalScope::Detected),
            description: None,
        }
    }

    /// Mappings pointing at `addr`
    pub fn local_to(addr: IpAddr) -> Self {
        Self {
            local: Some(LocalScope::Address(addr)),
            description: None,
        }
    }

    pub fn description(matcher: impl Into<DescriptionMatch>) -> Self {
        Self {
            local: None,
            description: Some(matcher.into()),
        }
    }

    /// Whether filtering needs the client's detected local address
    pub fn needs_local_address(&self) -> bool {
        matches!(self.local, Some(LocalScope::Detected))
    }
}

/// Apply `query` to an enumerated mapping list
///
/// `detected` is the client's local address; a `LocalScope::Detected` query
/// without one matches nothing.
pub fn apply_query(
    records: Vec<MappingRecord>,
    query: &MappingQuery,
    detected: Option<IpAddr>,
) -> Vec<MappingRecord> {
    if let Some(scope) = &query.local {
        let wanted = match scope {
            LocalScope::Detected => detected,
            LocalScope::Address(addr) => Some(*addr),
        };
        let Some(wanted) = wanted else {
            tracing::debug!("No local address to filter mappings by");
            return Vec::new();
        };
        let wanted = wanted.to_string();

        return records
            .into_iter()
            .filter(|r| r.private.host.as_deref() == Some(wanted.as_str()))
            .collect();
    }

    if let Some(matcher) = &query.description {
        return records
            .into_iter()
            .filter(|r| matcher.is_match(&r.description))
            .collect();
    }

    records
}
