use crate::descriptions::NodeDescription;
use crate::http::error::HttpError;
use crate::wire::message::NodeId;
use std::sync::Arc;

/// Which nodes a URL segment designates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Id(NodeId),
    /// Node name prefix.
    Name(String),
}

impl Selector {
    pub fn parse(segment: &str) -> Self {
        match segment {
            "all" | "*" => Selector::All,
            s => match s.parse::<NodeId>() {
                Ok(id) => Selector::Id(id),
                Err(_) => Selector::Name(s.to_string()),
            },
        }
    }

    pub fn select(&self, nodes: &[Arc<NodeDescription>]) -> Vec<Arc<NodeDescription>> {
        nodes
            .iter()
            .filter(|d| match self {
                Selector::All => true,
                Selector::Id(id) => d.id == *id,
                Selector::Name(prefix) => d.name.starts_with(prefix.as_str()),
            })
            .cloned()
            .collect()
    }

    /// Like [`select`](Self::select) but an empty match is an error.
    pub fn require(&self, nodes: &[Arc<NodeDescription>]) -> Result<Vec<Arc<NodeDescription>>, HttpError> {
        let matched = self.select(nodes);
        if matched.is_empty() {
            return Err(HttpError::NotFound(format!("no node matches {:?}", self)));
        }
        Ok(matched)
    }
}

/// Parse a request body holding a JSON array of integers.
pub fn parse_values(body: &str) -> Result<Vec<i16>, HttpError> {
    serde_json::from_str::<Vec<i16>>(body.trim())
        .map_err(|e| HttpError::BadRequest(format!("expected a JSON integer array: {}", e)))
}

/// Parse trailing path segments as integers.
pub fn parse_args<'a, I: IntoIterator<Item = &'a str>>(args: I) -> Result<Vec<i16>, HttpError> {
    args.into_iter()
        .filter(|a| !a.is_empty())
        .map(|a| {
            a.parse::<i16>()
                .map_err(|_| HttpError::BadRequest(format!("'{}' is not a 16-bit integer", a)))
        })
        .collect()
}
