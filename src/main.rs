use clap::Parser;
use log::{error, info};
use mailcatch::{ForwardConfig, SmtpServer};

use std::time::Duration;

/// Capture (or relay) every mail sent to this SMTP server
#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 2525)]
    port: u16,

    /// Hostname announced in the greeting
    #[arg(long, default_value = "mailcatch.local")]
    hostname: String,

    /// Relay every message to this host instead of storing it
    #[arg(long, requires = "forward_port")]
    forward_host: Option<String>,

    /// Port of the relay host
    #[arg(long, requires = "forward_host")]
    forward_port: Option<u16>,

    /// Timeout of relay sessions, in seconds
    #[arg(long, default_value_t = 30)]
    forward_timeout: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut server = SmtpServer::new(&args.hostname);
    if let (Some(host), Some(port)) = (args.forward_host, args.forward_port) {
        info!("Forwarding every message to {host}:{port}");
        server = server.with_forwarding(
            ForwardConfig::new(host, port)
                .with_timeout(Duration::from_secs(args.forward_timeout)),
        );
    }

    let subscription = server.subscribe();
    std::thread::spawn(move || {
        let mut count = 0;
        while let Ok(email) = subscription.recv() {
            count += 1;
            info!(
                "Email #{count} from {:?} to {:?}: {:?} ({} body lines)",
                email.from,
                email.to,
                email.subject,
                email.body.len()
            );
        }
    });

    if let Err(e) = server.start((args.bind.as_str(), args.port)) {
        error!("Failed to start server: {e}");
        std::process::exit(1);
    }
}
