//! Command-line commands.
//!
//! Arguments are parsed by hand; the surface is small enough that a
//! positional match reads more clearly than a parser definition.

use anyhow::{bail, Result};
use sessionkeeper_core::{Config, KeeperContext, Shutdown};
use tracing::{info, warn};

pub const USAGE: &str = "\
Usage: sessionkeeper [COMMAND]

Commands:
  run                              Run the rotation loop until interrupted (default)
  rotate-once                      Rotate every active session once and print the result
  upsert <session_id> <secret>     Store a session, replacing its secret and reactivating it
  deactivate <session_id>          Stop rotating a session
  list                             Print all stored sessions as JSON (secrets omitted)
  help                             Show this message

Configuration is read from the environment (a .env file is honored):
  DATABASE_URL, ROTATE_URL, ROTATE_PROXY, REQUEST_TIMEOUT_SECS,
  CYCLE_INTERVAL_SECS, EMPTY_BACKOFF_SECS, ERROR_BACKOFF_SECS, LOG_DIR,
  INIT_SECURE_1PSID, INIT_SECURE_1PSIDTS, SESSIONKEEPER_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    RotateOnce,
    Upsert { session_id: String, secret_token: String },
    Deactivate { session_id: String },
    List,
    Help,
}

pub fn parse_args(args: &[String]) -> Result<Command> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let command = match args.as_slice() {
        [] | ["run"] => Command::Run,
        ["rotate-once"] => Command::RotateOnce,
        ["upsert", session_id, secret_token] => Command::Upsert {
            session_id: session_id.to_string(),
            secret_token: secret_token.to_string(),
        },
        ["deactivate", session_id] => Command::Deactivate {
            session_id: session_id.to_string(),
        },
        ["list"] => Command::List,
        ["help"] | ["-h"] | ["--help"] => Command::Help,
        _ => bail!("Unrecognized arguments: {}\n\n{}", args.join(" "), USAGE),
    };
    Ok(command)
}

pub async fn execute(command: Command, ctx: &KeeperContext, config: &Config) -> Result<()> {
    match command {
        Command::Run => run(ctx, config).await,
        Command::RotateOnce => rotate_once(ctx).await,
        Command::Upsert {
            session_id,
            secret_token,
        } => {
            ctx.store().upsert_session(&session_id, &secret_token).await?;
            println!("Stored session {}", sessionkeeper_core::session::short_id(&session_id));
            Ok(())
        }
        Command::Deactivate { session_id } => {
            let short_id = sessionkeeper_core::session::short_id(&session_id);
            if ctx.store().deactivate_session(&session_id).await? {
                println!("Deactivated session {}", short_id);
            } else {
                println!("Session {} was not active", short_id);
            }
            Ok(())
        }
        Command::List => {
            let sessions = ctx.store().list_sessions().await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
            Ok(())
        }
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

/// Apply the bootstrap session, then rotate until a shutdown signal arrives.
async fn run(ctx: &KeeperContext, config: &Config) -> Result<()> {
    ctx.bootstrap(config.bootstrap_session().as_ref()).await?;

    let shutdown = Shutdown::new();
    let scheduler = ctx.scheduler();

    tokio::join!(scheduler.run(shutdown.listener()), async {
        wait_for_signal().await;
        info!("Shutdown signal received");
        shutdown.trigger();
    });
    Ok(())
}

async fn rotate_once(ctx: &KeeperContext) -> Result<()> {
    let shutdown = Shutdown::new();
    let report = ctx.scheduler().run_cycle(&mut shutdown.listener()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
