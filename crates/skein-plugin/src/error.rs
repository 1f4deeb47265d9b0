use skein_bus::BusError;

use crate::bridge::ScriptError;

/// Errors surfaced to the scripting host by plugin commands
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The token does not decode for the expected kind, or names no live resource
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A command could not be installed; the plugin must not load
    #[error("failed to register command {command}: {reason}")]
    RegistrationFailure { command: &'static str, reason: String },

    /// The plugin was stopped and no longer runs commands
    #[error("plugin stopped, {0} refused")]
    Stopped(&'static str),

    /// Passed through from the bus unchanged
    #[error(transparent)]
    Transport(#[from] BusError),

    #[error("callback {handler} failed: {source}")]
    Callback {
        handler: String,
        #[source]
        source: ScriptError,
    },
}

pub type PluginResult<T> = Result<T, PluginError>;
