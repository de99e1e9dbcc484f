use corrwire_peer::{Message, PeerError, ReplyWriter, Server, ServerConfig};

use crate::cmd::{on_interrupt, parse_duration, ServeArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let write_timeout = parse_duration(&args.write_timeout)?;
    let quiet = args.quiet;

    let config = ServerConfig::new(args.address)
        .with_network(args.network)
        .with_write_timeout(write_timeout)
        .with_handler(move |reply: ReplyWriter, message: Message| {
            if !quiet {
                print_message(&message, format);
            }
            answer(&reply, &message);
        });

    let server = Server::bind(config).map_err(|err| peer_error("bind failed", err))?;
    let handle = server.handle();
    on_interrupt(move || handle.shutdown())?;

    tracing::info!(local = %server.local_addr(), "serving");
    server.serve().map_err(|err| peer_error("serve failed", err))?;
    Ok(SUCCESS)
}

fn answer(reply: &ReplyWriter, message: &Message) {
    match reply.reply(describe(message).as_bytes()) {
        Ok(_) => {}
        Err(PeerError::NoReply) => {
            tracing::debug!(remote = %message.remote_addr, "no reply expected");
        }
        Err(err) => {
            tracing::warn!(remote = %message.remote_addr, error = %err, "reply failed");
        }
    }
}

/// Echo text sent back for every message.
fn describe(message: &Message) -> String {
    format!(
        "message from {} to {}: {}",
        message.remote_addr,
        message.local_addr,
        String::from_utf8_lossy(&message.payload)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_names_both_ends() {
        let message = Message {
            id: 4,
            payload: b"Hello".to_vec().into(),
            local_addr: "127.0.0.1:9000".parse().unwrap(),
            remote_addr: "127.0.0.1:51000".parse().unwrap(),
        };
        assert_eq!(
            describe(&message),
            "message from 127.0.0.1:51000 to 127.0.0.1:9000: Hello"
        );
    }
}
