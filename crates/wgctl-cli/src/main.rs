//! wgctl: interactive driver for the tunnel controller
//!
//! Reads one command per line from stdin and runs it against a controller
//! backed by the simulated platform. State changes are printed as they are
//! broadcast.
//!
//! Commands:
//!   init [name]    establish the tunnel identity
//!   start <path>   bring the tunnel up from a wg-quick file
//!   stop           tear the tunnel down
//!   status         print state, identity and authorization
//!   perm           request VPN permission
//!   grant | deny   answer the open permission prompt
//!   stats          print transfer counters
//!   genkey         generate a key pair
//!   dispose        release the tunnel identity
//!   quit

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wgctl_tunnel::{ControllerError, ControllerSettings, SimulatedAuthority, SimulatedBackend, TunnelController};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wgctl")]
#[command(version)]
#[command(about = "Drive a single WireGuard tunnel through a simulated platform")]
struct Args {
    /// Settings file (TOML or JSON)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Log filter, overrides the settings file (e.g. "debug")
    #[arg(long)]
    log: Option<String>,
}

enum Flow {
    Continue,
    Quit,
}

struct Shell {
    controller: Arc<TunnelController>,
    authority: Arc<SimulatedAuthority>,
    default_name: Option<String>,
}

impl Shell {
    async fn execute(&self, line: &str) -> Result<Flow> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(Flow::Continue);
        };
        let argument = words.next();

        match command {
            "init" => {
                let name = argument
                    .map(str::to_string)
                    .or_else(|| self.default_name.clone())
                    .context("usage: init <name>")?;
                report(self.controller.initialize(&name).await);
            }
            "start" => {
                let path = argument.context("usage: start <path>")?;
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path))?;
                report(self.controller.start(&text).await);
            }
            "stop" => report(self.controller.stop().await),
            "status" => {
                let name = self
                    .controller
                    .identity()
                    .map(|identity| identity.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let authorization = self.controller.authorization();
                println!(
                    "state={} tunnel={} authorized={}",
                    self.controller.query_status(),
                    name,
                    authorization.authorized
                );
            }
            "perm" => {
                self.controller.check_permission().await;
                println!("ok");
            }
            "grant" | "deny" => {
                if self.authority.answer(command == "grant") {
                    println!("ok");
                } else {
                    println!("error: no open permission prompt");
                }
            }
            "stats" => match self.controller.transfer_stats().await {
                Ok(stats) => println!("{}", stats.format()),
                Err(e) => report(Err(e)),
            },
            "genkey" => {
                let pair = self.controller.generate_key_pair();
                println!("private={}", pair.private.to_base64());
                println!("public={}", pair.public);
            }
            "dispose" => report(self.controller.dispose()),
            "quit" | "exit" => return Ok(Flow::Quit),
            "help" => println!(
                "commands: init [name], start <path>, stop, status, perm, grant, deny, stats, genkey, dispose, quit"
            ),
            other => println!("error: unknown command `{}`", other),
        }
        Ok(Flow::Continue)
    }
}

fn report(result: Result<(), ControllerError>) {
    match result {
        Ok(()) => println!("ok"),
        Err(e) => println!("error {}: {}", e.code(), e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = match &args.settings {
        Some(path) => ControllerSettings::from_file(path)
            .with_context(|| format!("cannot load settings from {}", path.display()))?,
        None => ControllerSettings::default(),
    };

    // Initialize logging
    let filter = args.log.as_deref().unwrap_or(&settings.log.level);
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_new(filter).context("invalid log filter")?)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    info!("wgctl starting...");
    info!("Using simulated platform ({:?})", settings.simulation.vocabulary);

    let backend = SimulatedBackend::new(settings.simulation.clone());
    let authority = Arc::new(SimulatedAuthority::new(settings.simulation.consent));
    let controller = Arc::new(TunnelController::new(
        settings.tunnel.provider.clone(),
        authority.clone(),
        Arc::new(backend),
    ));

    let mut subscription = controller.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(state) = subscription.next().await {
            println!("event: {}", state);
        }
    });

    let shell = Shell {
        controller,
        authority,
        default_name: settings.tunnel.name.clone(),
    };
    if let Some(name) = &shell.default_name {
        report(shell.controller.initialize(name).await);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match shell.execute(line.trim()).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => {
                warn!("{:#}", e);
                println!("error: {:#}", e);
            }
        }
    }

    printer.abort();
    info!("wgctl shutting down");
    Ok(())
}
