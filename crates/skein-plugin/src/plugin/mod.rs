//! A loaded plugin instance
//!
//! [`Plugin`] owns every resource scripts create, the callback table and the
//! script engine used to run callbacks. Hosts drive it by passing one
//! [`Command`] at a time to [`Plugin::execute`] and by reporting ended script
//! contexts through [`Plugin::on_script_destroyed`].

mod handlers;
mod pump;

use skein_bus::Broker;
use tracing::{debug, info, warn};

use crate::bridge::{CallbackBridge, ScriptEngine};
use crate::commands::{CallContext, Command, CommandRegistrar, HandleListing, Reply};
use crate::config::PluginConfig;
use crate::error::{PluginError, PluginResult};
use crate::lifecycle::{OwnerContexts, ScriptId};
use crate::registry::Registries;

pub struct Plugin<E: ScriptEngine> {
    registries: Registries,
    bridge: CallbackBridge,
    contexts: OwnerContexts,
    engine: E,
    broker: Broker,
    config: PluginConfig,
    running: bool,
}

impl<E: ScriptEngine> Plugin<E> {
    /// Register every command with the host and bring up an empty plugin
    ///
    /// Fails with [`PluginError::RegistrationFailure`] on the first command the
    /// host refuses; the host must not load the plugin in that case.
    pub fn start(
        registrar: &mut dyn CommandRegistrar,
        engine: E,
        broker: Broker,
        config: PluginConfig,
    ) -> PluginResult<Self> {
        for command in Command::names() {
            registrar
                .register(command)
                .map_err(|reason| PluginError::RegistrationFailure { command, reason })?;
        }
        info!(target: "plugin", "Plugin started, {} commands registered", Command::names().count());

        Ok(Self {
            registries: Registries::new(),
            bridge: CallbackBridge::new(),
            contexts: OwnerContexts::new(),
            engine,
            broker,
            config,
            running: true,
        })
    }

    /// Run one command on behalf of the script in `ctx`
    ///
    /// Fails with [`PluginError::Stopped`] once [`Plugin::stop`] has run.
    pub fn execute(&mut self, ctx: CallContext, command: Command) -> PluginResult<Reply> {
        if !self.running {
            warn!(target: "plugin", "{} from {} after stop", command.name(), ctx.script);
            return Err(PluginError::Stopped(command.name()));
        }
        debug!(target: "plugin", "{} from {}", command.name(), ctx.script);
        let script = ctx.script;

        match command {
            Command::Create { name } => self.create_node(script, &name),
            Command::Init { node } => self.init_node(&node),
            Command::Spin { node } => self.spin(&node),
            Command::SpinOnce { node } => self.spin_once(&node),
            Command::Cleanup { node } => self.cleanup_node(&node),
            Command::Destroy { node } => self.destroy_node(&node),

            Command::CreatePublisher { node, topic } => self.create_publisher(script, &node, &topic),
            Command::Publish { publisher, payload } => self.publish(&publisher, &payload),
            Command::DestroyPublisher { handle } => self.destroy_publisher(&handle),

            Command::CreateSubscriber {
                node,
                topic,
                callback,
            } => self.create_subscriber(script, &node, &topic, callback),
            Command::DestroySubscriber { handle } => self.destroy_subscriber(&handle),

            Command::CreateServiceClient { node, service } => {
                self.create_service_client(script, &node, &service)
            }
            Command::Call { client, payload } => self.call(&client, &payload),
            Command::DestroyServiceClient { handle } => self.destroy_service_client(&handle),

            Command::CreateServiceServer {
                node,
                service,
                callback,
            } => self.create_service_server(script, &node, &service, callback),
            Command::DestroyServiceServer { handle } => self.destroy_service_server(&handle),

            Command::SocketInit { socket } => self.socket_init(&socket),
            Command::SocketSpinOnce { socket } => self.socket_spin_once(&socket),
            Command::SocketCleanup { socket } => self.socket_cleanup(&socket),
            Command::SocketPoll { socket, timeout_ms } => self.socket_poll(&socket, timeout_ms),
            Command::SocketRead { socket } => self.socket_read(&socket),
            Command::SocketWrite { socket, payload } => self.socket_write(&socket, &payload),
            Command::SetSocketOption {
                socket,
                option,
                value,
            } => self.set_socket_option(&socket, &option, value),
            Command::SetCompression {
                socket,
                algorithm,
                level,
            } => self.set_compression(&socket, &algorithm, level),

            Command::ListHandles { script } => Ok(Reply::Handles(self.live_handles(script))),
        }
    }

    /// Tear down everything the script's current context created
    ///
    /// The next command from the same script id starts a new context. Returns
    /// the number of resources released.
    pub fn on_script_destroyed(&mut self, script: ScriptId) -> usize {
        let owner = self.contexts.end(script);
        let released = self.registries.release_owner(owner);
        let callbacks = self.bridge.unregister_owner(owner);
        debug!(target: "plugin", "{} ended, dropped {} callback(s)", owner, callbacks);
        released.len()
    }

    /// Live handles, either all of them or those of one script's current context
    pub fn live_handles(&self, script: Option<ScriptId>) -> HandleListing {
        let registries = &self.registries;
        match script.map(|script| self.contexts.peek(script)) {
            Some(owner) => HandleListing {
                nodes: registries.nodes.handles_by_owner(owner),
                publishers: registries.publishers.handles_by_owner(owner),
                subscribers: registries.subscribers.handles_by_owner(owner),
                service_clients: registries.service_clients.handles_by_owner(owner),
                service_servers: registries.service_servers.handles_by_owner(owner),
            },
            None => HandleListing {
                nodes: registries.nodes.handles(),
                publishers: registries.publishers.handles(),
                subscribers: registries.subscribers.handles(),
                service_clients: registries.service_clients.handles(),
                service_servers: registries.service_servers.handles(),
            },
        }
    }

    /// Release every resource and forget every callback
    ///
    /// Also runs on drop; calling it again does nothing.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        let released = self.registries.release_all();
        self.bridge = CallbackBridge::new();
        self.running = false;
        info!(target: "plugin", "Plugin stopped, released {} resource(s)", released.len());
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn bridge(&self) -> &CallbackBridge {
        &self.bridge
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

impl<E: ScriptEngine> Drop for Plugin<E> {
    fn drop(&mut self) {
        self.stop();
    }
}
