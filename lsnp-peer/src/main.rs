// LSNP peer daemon: one UDP socket, presence ticks, and an interactive shell.

mod config;
mod net;
mod shell;

use std::net::Ipv4Addr;
use std::sync::Arc;

use lsnp_core::{CoreConfig, LsnpCore};
use tokio::sync::{mpsc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!("lsnp-peer {} — Local Social Networking Protocol peer", VERSION);
    println!();
    println!("USAGE:");
    println!("    lsnp-peer <username> [--mode simulate|broadcast] [--ip <addr>]");
    println!();
    println!("OPTIONS:");
    println!("    --mode <mode>    simulate: bind a distinct 127.0.0.x address per peer");
    println!("                     broadcast: bind the LAN interface (default)");
    println!("    --ip <addr>      IPv4 address to bind; required for simulate mode,");
    println!("                     auto-detected for broadcast mode");
    println!("    -h, --help       Print this help message and exit");
    println!("    -V, --version    Print version and exit");
    println!();
    println!("DESCRIPTION:");
    println!("    Starts an LSNP peer on UDP port 50999: presence broadcasts, posts,");
    println!("    direct messages, groups, file transfers, and tic-tac-toe with other");
    println!("    peers on the local segment. Type 'help' at the prompt for commands.");
    println!();
    println!("CONFIGURATION:");
    println!("    Config file (optional, first found wins):");
    println!("      ~/.config/lsnp/config.toml");
    println!("      /etc/lsnp/config.toml");
    println!();
    println!("    Example config.toml:");
    println!("      port = 50999");
    println!("      presence_interval_secs = 30");
    println!("      chunk_size = 1024");
    println!();
    println!("ENVIRONMENT VARIABLES (override config file):");
    println!("    LSNP_PORT                UDP port (default: 50999)");
    println!("    LSNP_PRESENCE_INTERVAL   Presence interval seconds (default: 30)");
    println!("    LSNP_CHUNK_SIZE          Transfer chunk size bytes (default: 1024)");
    println!("    RUST_LOG                 Log filter (e.g. lsnp_core=debug)");
}

struct Args {
    username: String,
    mode: net::Mode,
    ip: Option<Ipv4Addr>,
}

fn parse_args() -> Result<Args, String> {
    let mut username = None;
    let mut mode = net::Mode::Broadcast;
    let mut ip = None;
    let mut argv = std::env::args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("lsnp-peer {}", VERSION);
                std::process::exit(0);
            }
            "--mode" => {
                let value = argv.next().ok_or("--mode needs a value")?;
                mode = net::Mode::parse(&value)
                    .ok_or_else(|| format!("unknown mode '{value}' (simulate|broadcast)"))?;
            }
            "--ip" => {
                let value = argv.next().ok_or("--ip needs a value")?;
                ip = Some(
                    value
                        .parse()
                        .map_err(|_| format!("'{value}' is not an IPv4 address"))?,
                );
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown option '{other}'"));
            }
            other => {
                if username.replace(other.to_owned()).is_some() {
                    return Err("more than one username given".to_owned());
                }
            }
        }
    }
    let username = username.ok_or("a username is required")?;
    if username.is_empty() || username.contains('@') {
        return Err("username must be non-empty and must not contain '@'".to_owned());
    }
    Ok(Args { username, mode, ip })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("lsnp-peer: {err}\n");
            print_help();
            std::process::exit(2);
        }
    };
    let cfg = config::load();

    let ip = match (args.mode, args.ip) {
        (net::Mode::Simulate, Some(ip)) => ip,
        (net::Mode::Simulate, None) => {
            eprintln!("lsnp-peer: simulate mode requires --ip <127.0.0.x>");
            std::process::exit(2);
        }
        (net::Mode::Broadcast, Some(ip)) => ip,
        (net::Mode::Broadcast, None) => net::detect_local_ip(),
    };

    let core = LsnpCore::with_config(
        &args.username,
        &ip.to_string(),
        CoreConfig {
            presence_interval_secs: cfg.presence_interval_secs,
            chunk_size: cfg.chunk_size,
            ..CoreConfig::default()
        },
    );
    println!("LSNP peer '{}' initialized.", args.username);
    println!("Your USER_ID is: {}", core.user_id());
    println!("Listening on {}:{} ({:?} mode).", ip, cfg.port, args.mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let socket = match net::bind_socket(ip, cfg.port).await {
            Ok(socket) => Arc::new(socket),
            Err(err) => {
                eprintln!("lsnp-peer: could not bind {}:{}: {err}", ip, cfg.port);
                std::process::exit(1);
            }
        };
        let bcast = net::broadcast_target(args.mode, cfg.port);
        let core = Arc::new(Mutex::new(core));
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();

        // Notifications print from their own task so network events show up
        // while the shell waits for input.
        tokio::spawn(async move {
            while let Some(note) = notify_rx.recv().await {
                println!("{note}");
            }
        });
        tokio::spawn(net::run_recv(
            socket.clone(),
            core.clone(),
            bcast,
            notify_tx.clone(),
        ));
        tokio::spawn(net::run_tick(
            socket.clone(),
            core.clone(),
            bcast,
            notify_tx.clone(),
        ));

        let shell = shell::Shell::new(core, socket, bcast, notify_tx);
        tokio::select! {
            res = shell.run() => {
                if let Err(err) = res {
                    eprintln!("lsnp-peer: shell error: {err}");
                }
            }
            _ = shutdown_signal() => {}
        }
        info!("shutting down");
    });
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
