use std::path::PathBuf;
use std::thread;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use skein_bus::Broker;
use skein_plugin::{
    CallContext, Command, CommandTable, ConfigLoadError, Plugin, PluginConfig, Reply, ScriptId,
};
use tracing::info;

mod engine;
mod logging;

use engine::LoggingEngine;

const SERVICE: &str = "reverse";
const TOPIC: &str = "chatter";

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file to use instead of the one in the platform config directory
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write logs to skein.log in the data directory
    #[arg(long)]
    log_file: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a publish/subscribe and request/reply session through the plugin
    Demo {
        /// Messages to publish
        #[arg(short, long, default_value_t = 3)]
        messages: usize,

        /// Requests to send to the service
        #[arg(short, long, default_value_t = 2)]
        requests: usize,
    },
    /// Print the handles created for a node and a publisher
    Handles,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PluginConfig> {
    let loaded = match path {
        Some(path) => PluginConfig::load_from(path),
        None => PluginConfig::load(),
    };
    match loaded {
        Ok(config) => Ok(config),
        Err(ConfigLoadError::NotFound) if path.is_none() => {
            info!("No config found, using defaults");
            Ok(PluginConfig::default())
        }
        Err(e) => Err(e).context("Failed to load config"),
    }
}

fn start(
    broker: &Broker,
    config: &PluginConfig,
    engine: LoggingEngine,
) -> anyhow::Result<Plugin<LoggingEngine>> {
    let mut table = CommandTable::new();
    let plugin = Plugin::start(&mut table, engine, broker.clone(), config.clone())?;
    Ok(plugin)
}

fn expect_handle(reply: Reply) -> anyhow::Result<String> {
    reply
        .into_handle()
        .ok_or_else(|| anyhow!("command did not return a handle"))
}

/// Serve `requests` calls from a plugin of its own, then return
fn serve(broker: Broker, config: PluginConfig, requests: usize) -> anyhow::Result<usize> {
    let mut plugin = start(&broker, &config, LoggingEngine::stopping_after(requests))?;
    let ctx = CallContext::new(ScriptId(2));

    let node = expect_handle(plugin.execute(ctx, Command::Create { name: "server".to_string() })?)?;
    plugin.execute(ctx, Command::Init { node: node.clone() })?;
    plugin.execute(
        ctx,
        Command::CreateServiceServer {
            node: node.clone(),
            service: SERVICE.to_string(),
            callback: "on_request".to_string(),
        },
    )?;
    plugin.execute(ctx, Command::Spin { node })?;

    Ok(plugin.engine().handled)
}

fn demo(config: PluginConfig, messages: usize, requests: usize) -> anyhow::Result<()> {
    let broker = Broker::with_topic_capacity(config.topic_capacity);

    let server = (requests > 0).then(|| {
        let (broker, config) = (broker.clone(), config.clone());
        thread::spawn(move || serve(broker, config, requests))
    });

    let mut plugin = start(&broker, &config, LoggingEngine::default())?;
    let ctx = CallContext::new(ScriptId(1));

    let node = expect_handle(plugin.execute(ctx, Command::Create { name: "demo".to_string() })?)?;
    if let Reply::Name(name) = plugin.execute(ctx, Command::Init { node: node.clone() })? {
        println!("node {} joined as {}", node, name);
    }

    plugin.execute(
        ctx,
        Command::CreateSubscriber {
            node: node.clone(),
            topic: TOPIC.to_string(),
            callback: "on_chatter".to_string(),
        },
    )?;
    let publisher = expect_handle(plugin.execute(
        ctx,
        Command::CreatePublisher {
            node: node.clone(),
            topic: TOPIC.to_string(),
        },
    )?)?;
    for i in 0..messages {
        plugin.execute(
            ctx,
            Command::Publish {
                publisher: publisher.clone(),
                payload: format!("hello {}", i).into_bytes(),
            },
        )?;
    }
    plugin.execute(ctx, Command::SpinOnce { node: node.clone() })?;
    println!("delivered {} message(s)", plugin.engine().handled);

    if let Some(server) = server {
        let client = expect_handle(plugin.execute(
            ctx,
            Command::CreateServiceClient {
                node: node.clone(),
                service: SERVICE.to_string(),
            },
        )?)?;
        for option in ["readTimeout", "writeTimeout"] {
            plugin.execute(
                ctx,
                Command::SetSocketOption {
                    socket: client.clone(),
                    option: option.to_string(),
                    value: 5000,
                },
            )?;
        }

        for i in 0..requests {
            let request = format!("request {}", i);
            let reply = plugin.execute(
                ctx,
                Command::Call {
                    client: client.clone(),
                    payload: request.clone().into_bytes(),
                },
            )?;
            if let Reply::Payload(payload) = reply {
                println!("{} -> {}", request, String::from_utf8_lossy(&payload));
            }
        }

        let served = server
            .join()
            .map_err(|_| anyhow!("server thread panicked"))??;
        println!("server answered {} request(s)", served);
    }

    let listed = plugin.execute(
        ctx,
        Command::ListHandles {
            script: Some(ScriptId(1)),
        },
    )?;
    if let Reply::Handles(listing) = listed {
        for handle in listing.iter() {
            println!("live: {}", handle);
        }
    }
    let released = plugin.on_script_destroyed(ScriptId(1));
    println!("script context ended, {} resource(s) released", released);

    Ok(())
}

fn handles(config: PluginConfig) -> anyhow::Result<()> {
    let broker = Broker::with_topic_capacity(config.topic_capacity);
    let mut plugin = start(&broker, &config, LoggingEngine::default())?;
    let ctx = CallContext::new(ScriptId(1));

    let node = expect_handle(plugin.execute(ctx, Command::Create { name: "handles".to_string() })?)?;
    let publisher = expect_handle(plugin.execute(
        ctx,
        Command::CreatePublisher {
            node: node.clone(),
            topic: TOPIC.to_string(),
        },
    )?)?;
    println!("node:      {}", node);
    println!("publisher: {}", publisher);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init_logging(cli.debug, cli.log_file)?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command.unwrap_or(Commands::Demo {
        messages: 3,
        requests: 2,
    }) {
        Commands::Demo { messages, requests } => demo(config, messages, requests),
        Commands::Handles => handles(config),
    }
}
