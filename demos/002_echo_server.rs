//! Standalone echo server.
//!
//! Answers every request with its own payload and keeps serving until
//! Ctrl+C. Pair it with 003_client in a second terminal.
//!
//! Usage:
//!   cargo run --example 002_echo_server
//!   cargo run --example 002_echo_server -- --port 9200
//!   cargo run --example 002_echo_server -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};

use common::Args;
use waitsock::Result;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== 002: Echo Server ===\n");

    println!("[1] Binding listener...");
    let server = waitsock::listen(IpAddr::V4(Ipv4Addr::LOCALHOST), args.port).await?;
    println!("    ✓ Listening on {}\n", server.ws_url());

    let accept_loop = tokio::spawn(async move {
        while let Ok(session) = server.accept().await {
            println!("    ✓ Session accepted");
            let mut messages = session.messages().expect("fresh session");
            tokio::spawn(async move {
                while let Some(request) = messages.recv().await {
                    let _ = request.send_no_reply(request.to_value()).await;
                }
                println!("    ✗ Session ended");
            });
        }
    });

    common::wait_for_exit(args.no_wait).await;
    accept_loop.abort();

    Ok(())
}
