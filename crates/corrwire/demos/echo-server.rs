//! Minimal echo server: replies to every correlated message with its payload.
//!
//! Run with:
//!   cargo run --example echo-server --features peer
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1:9000 --data hello

use corrwire::peer::{Message, ReplyWriter, Server, ServerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_string());

    let server = Server::bind(ServerConfig::new(address).with_handler(
        |reply: ReplyWriter, message: Message| {
            eprintln!(
                "{} -> id={} {} bytes",
                message.remote_addr,
                message.id,
                message.payload.len()
            );
            if message.expects_reply() {
                if let Err(err) = reply.reply(&message.payload) {
                    eprintln!("reply failed: {err}");
                }
            }
        },
    ))?;
    eprintln!("Listening on {}", server.local_addr());

    server.serve()?;
    Ok(())
}
