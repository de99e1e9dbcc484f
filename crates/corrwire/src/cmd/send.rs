use std::fs;
use std::time::Instant;

use corrwire_frame::HEADER_SIZE;
use corrwire_peer::{Client, ClientConfig};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{io_error, peer_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_send, OutputFormat, SendReport};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;
    let sent_size = payload.len();

    let client = Client::new(
        ClientConfig::new(args.address.as_str())
            .with_network(args.network.as_str())
            .with_conn_count(args.connections)
            .with_dial_timeout(timeout),
    )
    .map_err(|err| peer_error("client setup failed", err))?;

    let started = Instant::now();
    let deadline = started + timeout;
    if !client.ready(deadline) {
        return Err(CliError::new(
            TIMEOUT,
            format!("no connection to {} within {}", args.address, args.timeout),
        ));
    }

    let response = if args.no_reply {
        client
            .send_owned_no_reply(deadline, payload)
            .map_err(|err| peer_error("send failed", err))?;
        None
    } else {
        let response = client
            .send_owned(deadline, payload)
            .map_err(|err| peer_error("send failed", err))?;
        Some(response)
    };

    print_send(
        &SendReport {
            address: &args.address,
            sent_size,
            response: response.as_deref(),
            elapsed: started.elapsed(),
        },
        format,
    );
    client.close();
    Ok(SUCCESS)
}

/// Payload bytes, with room reserved for the frame header so the send path
/// can frame them in place.
fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    let mut payload = if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        json.as_bytes().to_vec()
    } else if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(path) = &args.file {
        fs::read(path).map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?
    } else {
        Vec::new()
    };
    payload.reserve_exact(HEADER_SIZE);
    Ok(payload)
}
