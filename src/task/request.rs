//! Inbound task envelope and the validated request derived from it.

use serde::{Deserialize, Serialize, Serializer};

/// An attachment as delivered by the caller: a name and a (usually inline) URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub name: String,
    pub url: String,
}

/// Raw JSON body of a task submission.
///
/// Every field is optional so that missing fields surface as a precise
/// `InvalidRequest` from the validator rather than a generic parse error.
/// `round` and `checks` stay untyped for the same reason.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskEnvelope {
    pub email: Option<String>,
    pub secret: Option<String>,
    pub task: Option<String>,
    pub round: Option<serde_json::Value>,
    pub nonce: Option<String>,
    pub brief: Option<String>,
    #[serde(default)]
    pub checks: Option<Vec<serde_json::Value>>,
    pub evaluation_url: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<AttachmentRef>>,
}

/// Which pass over a task this request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Round {
    /// Build and publish a new application
    Initial,
    /// Revise the application published by the initial round
    Revision,
}

impl Round {
    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            1 => Some(Round::Initial),
            2 => Some(Round::Revision),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Round::Initial => 1,
            Round::Revision => 2,
        }
    }
}

impl std::fmt::Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl Serialize for Round {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.number())
    }
}

/// A validated task request.
///
/// # Invariants
/// - `task`, `nonce`, `brief` and `email` are non-empty
/// - `evaluation_url` is an absolute http(s) URL
/// - immutable once constructed by the validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRequest {
    pub email: String,
    pub task: String,
    pub round: Round,
    pub nonce: String,
    pub brief: String,
    pub checks: Vec<String>,
    pub evaluation_url: String,
    pub attachments: Vec<AttachmentRef>,
}

impl TaskRequest {
    /// Key used to recognise a re-delivery of the same submission.
    pub fn run_key(&self) -> RunKey {
        RunKey {
            task: self.task.clone(),
            round: self.round,
            nonce: self.nonce.clone(),
        }
    }
}

/// Identity of one submission: (task, round, nonce).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunKey {
    pub task: String,
    pub round: Round,
    pub nonce: String,
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}@{}", self.task, self.round, self.nonce)
    }
}
