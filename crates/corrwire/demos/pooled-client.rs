//! Pooled client: an in-process server plus four threads sharing one client.
//!
//! Run with:
//!   cargo run --example pooled-client --features peer

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use corrwire::peer::{Client, ClientConfig, Message, ReplyWriter, Server, ServerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(ServerConfig::new("127.0.0.1:0").with_handler(
        |reply: ReplyWriter, message: Message| {
            let mut upper = message.payload.to_ascii_uppercase();
            upper.reserve(corrwire::frame::HEADER_SIZE);
            let _ = reply.reply_owned(upper);
        },
    ))?;
    let handle = server.handle();
    let serving = thread::spawn(move || server.serve());

    let client = Arc::new(Client::new(
        ClientConfig::new(handle.local_addr().to_string()).with_conn_count(2),
    )?);
    if !client.ready(Instant::now() + Duration::from_secs(3)) {
        return Err("no connection to the in-process server".into());
    }

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for i in 0..3 {
                    let deadline = Instant::now() + Duration::from_secs(1);
                    match client.send(deadline, format!("worker {worker} message {i}").as_bytes()) {
                        Ok(reply) => eprintln!("[{worker}] {}", String::from_utf8_lossy(&reply)),
                        Err(err) => eprintln!("[{worker}] send failed: {err}"),
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        let _ = worker.join();
    }

    client.close();
    handle.shutdown();
    let _ = serving.join();
    Ok(())
}
