//! Identifiers for applications, attempts, containers, and nodes.
//!
//! Every identifier has a canonical string form. For attempts that form
//! is also the subject name an authenticated application master presents,
//! so `Display` and `FromStr` must stay exact inverses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdParseError;

/// One submitted application, scoped to the resource manager's start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApplicationId {
    pub cluster_timestamp: u64,
    pub id: u32,
}

/// One run of an application master for an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttemptId {
    pub application_id: ApplicationId,
    pub attempt_id: u32,
}

/// A container granted to an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId {
    pub attempt: AttemptId,
    pub id: u64,
}

/// A node manager endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    pub host: String,
    pub port: u16,
}

impl ApplicationId {
    pub fn new(cluster_timestamp: u64, id: u32) -> Self {
        Self {
            cluster_timestamp,
            id,
        }
    }
}

impl AttemptId {
    pub fn new(application_id: ApplicationId, attempt_id: u32) -> Self {
        Self {
            application_id,
            attempt_id,
        }
    }
}

impl ContainerId {
    pub fn new(attempt: AttemptId, id: u64) -> Self {
        Self { attempt, id }
    }
}

impl NodeId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

// ── Display ────────────────────────────────────────────────────────

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application_{}_{:04}", self.cluster_timestamp, self.id)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "appattempt_{}_{:04}_{:06}",
            self.application_id.cluster_timestamp, self.application_id.id, self.attempt_id
        )
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let app = &self.attempt.application_id;
        write!(
            f,
            "container_{}_{:04}_{:02}_{:06}",
            app.cluster_timestamp, app.id, self.attempt.attempt_id, self.id
        )
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── Parsing ────────────────────────────────────────────────────────

/// Split `s` on `_`, check the leading tag, and return the numeric parts.
fn split_tagged<'a>(
    kind: &'static str,
    s: &'a str,
    tag: &str,
    parts: usize,
) -> Result<Vec<&'a str>, IdParseError> {
    let fields: Vec<&str> = s.split('_').collect();
    if fields.len() != parts + 1 || fields[0] != tag {
        return Err(IdParseError::new(kind, s));
    }
    Ok(fields[1..].to_vec())
}

/// Parse one numeric field. Only the form `Display` would write is
/// accepted: zero-padded to `width`, with no extra leading zeros.
fn number<T>(kind: &'static str, s: &str, field: &str, width: usize) -> Result<T, IdParseError>
where
    T: FromStr + fmt::Display,
{
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdParseError::new(kind, s));
    }
    let value: T = field.parse().map_err(|_| IdParseError::new(kind, s))?;
    if format!("{value:0width$}") != field {
        return Err(IdParseError::new(kind, s));
    }
    Ok(value)
}

impl FromStr for ApplicationId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "application id";
        let f = split_tagged(KIND, s, "application", 2)?;
        Ok(Self::new(number(KIND, s, f[0], 1)?, number(KIND, s, f[1], 4)?))
    }
}

impl FromStr for AttemptId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "attempt id";
        let f = split_tagged(KIND, s, "appattempt", 3)?;
        Ok(Self::new(
            ApplicationId::new(number(KIND, s, f[0], 1)?, number(KIND, s, f[1], 4)?),
            number(KIND, s, f[2], 6)?,
        ))
    }
}

impl FromStr for ContainerId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "container id";
        let f = split_tagged(KIND, s, "container", 4)?;
        let app = ApplicationId::new(number(KIND, s, f[0], 1)?, number(KIND, s, f[1], 4)?);
        Ok(Self::new(
            AttemptId::new(app, number(KIND, s, f[2], 2)?),
            number(KIND, s, f[3], 6)?,
        ))
    }
}

impl FromStr for NodeId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "node id";
        let (host, port) = s.rsplit_once(':').ok_or_else(|| IdParseError::new(KIND, s))?;
        if host.is_empty() {
            return Err(IdParseError::new(KIND, s));
        }
        Ok(Self::new(host, number(KIND, s, port, 1)?))
    }
}

macro_rules! string_conversions {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = IdParseError;

                fn try_from(value: String) -> Result<Self, Self::Error> {
                    value.parse()
                }
            }

            impl From<$ty> for String {
                fn from(value: $ty) -> Self {
                    value.to_string()
                }
            }
        )*
    };
}

string_conversions!(ApplicationId, AttemptId, ContainerId, NodeId);
