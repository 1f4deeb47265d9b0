//! The command surface a host exposes to scripts
//!
//! Every operation a script can perform is one [`Command`] variant; the variant
//! name in camelCase is the name the host registers it under. Commands carry
//! handles as plain strings and answer with a [`Reply`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, IntoStaticStr};

use crate::lifecycle::ScriptId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumIter, IntoStaticStr)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Command {
    /// Create a node; it joins the bus on `init`
    Create { name: String },
    Init { node: String },
    /// Pump the node until a callback asks it to stop
    Spin { node: String },
    SpinOnce { node: String },
    Cleanup { node: String },
    Destroy { node: String },

    CreatePublisher { node: String, topic: String },
    Publish { publisher: String, payload: Vec<u8> },
    DestroyPublisher { handle: String },

    CreateSubscriber { node: String, topic: String, callback: String },
    DestroySubscriber { handle: String },

    CreateServiceClient { node: String, service: String },
    /// Send a request and block until the reply arrives
    Call { client: String, payload: Vec<u8> },
    DestroyServiceClient { handle: String },

    CreateServiceServer { node: String, service: String, callback: String },
    DestroyServiceServer { handle: String },

    SocketInit { socket: String },
    SocketSpinOnce { socket: String },
    SocketCleanup { socket: String },
    SocketPoll { socket: String, timeout_ms: u64 },
    SocketRead { socket: String },
    SocketWrite { socket: String, payload: Vec<u8> },
    SetSocketOption { socket: String, option: String, value: i64 },
    SetCompression { socket: String, algorithm: String, level: i32 },

    /// Live handles, optionally only those created by one script
    ListHandles { script: Option<ScriptId> },
}

impl Command {
    /// The name this command is registered under
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Names of every command, in registration order
    pub fn names() -> impl Iterator<Item = &'static str> {
        Command::iter().map(|command| command.name())
    }
}

/// Who is issuing a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub script: ScriptId,
}

impl CallContext {
    pub fn new(script: ScriptId) -> Self {
        Self { script }
    }
}

/// Live handles grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleListing {
    pub nodes: Vec<String>,
    pub publishers: Vec<String>,
    pub subscribers: Vec<String>,
    pub service_clients: Vec<String>,
    pub service_servers: Vec<String>,
}

impl HandleListing {
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.nodes
            .iter()
            .chain(&self.publishers)
            .chain(&self.subscribers)
            .chain(&self.service_clients)
            .chain(&self.service_servers)
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.iter().any(|h| h == handle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", content = "value", rename_all = "camelCase")]
pub enum Reply {
    Done,
    Handle(String),
    /// Name a node resolved to on `init`
    Name(String),
    Payload(Vec<u8>),
    /// Whether a polled socket has something to read
    Ready(bool),
    Handles(HandleListing),
}

impl Reply {
    pub fn into_handle(self) -> Option<String> {
        match self {
            Reply::Handle(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn into_payload(self) -> Option<Vec<u8>> {
        match self {
            Reply::Payload(payload) => Some(payload),
            _ => None,
        }
    }
}

/// The host's mechanism for making a command callable from scripts
pub trait CommandRegistrar {
    fn register(&mut self, name: &'static str) -> Result<(), String>;
}

/// A registrar that just records names, refusing duplicates
#[derive(Debug, Default)]
pub struct CommandTable {
    names: BTreeSet<&'static str>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl CommandRegistrar for CommandTable {
    fn register(&mut self, name: &'static str) -> Result<(), String> {
        if self.names.insert(name) {
            Ok(())
        } else {
            Err(format!("{} is already registered", name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_are_camel_case() {
        let names: Vec<_> = Command::names().collect();
        assert_eq!(names.len(), 25);
        assert_eq!(names[0], "create");
        assert!(names.contains(&"spinOnce"));
        assert!(names.contains(&"createServiceServer"));
        assert!(names.contains(&"setSocketOption"));
        assert!(names.contains(&"listHandles"));
    }

    #[test]
    fn test_serde_tag_matches_registered_name() {
        let command = Command::SetSocketOption {
            socket: "skein.pub:0:8".to_string(),
            option: "readTimeout".to_string(),
            value: 1000,
        };
        let value = toml::Value::try_from(&command).unwrap();
        assert_eq!(value["command"].as_str(), Some(command.name()));
        assert_eq!(value["option"].as_str(), Some("readTimeout"));

        let poll: Command = toml::from_str(
            r#"
command = "socketPoll"
socket = "skein.sub:0:8"
timeoutMs = 20
"#,
        )
        .unwrap();
        assert_eq!(
            poll,
            Command::SocketPoll {
                socket: "skein.sub:0:8".to_string(),
                timeout_ms: 20
            }
        );
    }

    #[test]
    fn test_command_table_rejects_duplicates() {
        let mut table = CommandTable::new();
        table.register("create").unwrap();
        assert!(table.register("create").is_err());
        assert!(table.contains("create"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_listing() {
        let listing = HandleListing {
            nodes: vec!["a".to_string()],
            publishers: vec!["b".to_string()],
            ..Default::default()
        };
        assert_eq!(listing.len(), 2);
        assert!(listing.contains("b"));
        assert!(!listing.contains("c"));
        assert!(HandleListing::default().is_empty());
    }
}
