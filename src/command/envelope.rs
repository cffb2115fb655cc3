use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Sync,
    Cycle,
    Hire,
    Fire,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Cycle => "cycle",
            Self::Hire => "hire",
            Self::Fire => "fire",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "cycle" => Some(Self::Cycle),
            "hire" => Some(Self::Hire),
            "fire" => Some(Self::Fire),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `command == None` is a raw run: continue whatever the thread was doing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_mutation_id: Option<String>,
}

impl CommandEnvelope {
    pub fn new(command: Option<Command>, client_mutation_id: Option<&str>) -> Self {
        Self {
            command,
            client_mutation_id: client_mutation_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        }
    }

    /// Reads `{"command": ..., "clientMutationId": ...}` from the text of the
    /// latest inbound instruction. Text that is not such an object, or names
    /// an unknown command, is a raw run.
    pub fn from_message(text: &str) -> Self {
        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(text.trim()) else {
            return Self::default();
        };
        Self::new(
            fields
                .get("command")
                .and_then(Value::as_str)
                .and_then(Command::parse),
            fields.get("clientMutationId").and_then(Value::as_str),
        )
    }
}

/// Everything a run is started with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inbound {
    pub envelope: CommandEnvelope,
    /// Answer to the pending interrupt, if this run resumes one.
    pub resume: Option<Value>,
}

impl Inbound {
    pub fn command(command: Command, client_mutation_id: Option<&str>) -> Self {
        Self {
            envelope: CommandEnvelope::new(Some(command), client_mutation_id),
            resume: None,
        }
    }

    pub fn resume(response: Value) -> Self {
        Self {
            envelope: CommandEnvelope::default(),
            resume: Some(response),
        }
    }

    pub fn from_message(text: &str) -> Self {
        Self {
            envelope: CommandEnvelope::from_message(text),
            resume: None,
        }
    }

    pub fn raw() -> Self {
        Self::default()
    }
}
