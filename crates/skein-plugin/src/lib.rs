/// Script-facing bridge to the skein bus
///
/// Scripts cannot hold native objects, so every node and socket they create is
/// stored in a per-kind [`registry::Registry`] and handed back as an opaque
/// handle string. Resources are attributed to the script context that created
/// them and released together when that context ends.
///
/// Bus events never interrupt a script. They queue up until a pump command
/// (`spin`, `spinOnce`, `socketSpinOnce`) drains them and runs the registered
/// callbacks through the host's [`ScriptEngine`].
pub mod bridge;
pub mod commands;
pub mod config;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod options;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod resource;

pub use bridge::{
    CallbackBridge, CallbackRequest, CallbackResponse, CallbackTarget, ScriptEngine, ScriptError,
    SpinControl,
};
pub use commands::{CallContext, Command, CommandRegistrar, CommandTable, HandleListing, Reply};
pub use config::{ConfigLoadError, PluginConfig};
pub use error::{PluginError, PluginResult};
pub use lifecycle::{Owner, OwnerContexts, ScriptId};
pub use options::SocketOption;
pub use plugin::Plugin;
pub use registry::{Registries, Registry};
pub use resolver::{resolve_socket, SocketRef};
pub use resource::{Resource, ResourceId, ResourceKind};
