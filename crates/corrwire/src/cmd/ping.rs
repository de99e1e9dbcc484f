use std::sync::Arc;
use std::time::Instant;

use corrwire_peer::{Client, ClientConfig, PeerError};

use crate::cmd::{on_interrupt, parse_duration, PingArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_ping, OutputFormat};

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let timeout = parse_duration(&args.timeout)?;

    let client = Arc::new(
        Client::new(
            ClientConfig::new(args.address.as_str())
                .with_network(args.network.as_str())
                .with_dial_timeout(timeout),
        )
        .map_err(|err| peer_error("client setup failed", err))?,
    );
    let stopper = Arc::clone(&client);
    on_interrupt(move || stopper.close())?;

    // Give the first dial a chance so startup isn't counted as a failure.
    if !client.ready(Instant::now() + timeout) {
        tracing::warn!(address = %args.address, "not connected yet; probing anyway");
    }

    let outcome = client.ping_with(
        args.data.as_bytes(),
        args.max_retry,
        interval,
        timeout,
        |attempt| print_ping(attempt, format),
    );
    client.close();

    match outcome {
        Ok(()) | Err(PeerError::Closed) => Ok(SUCCESS),
        Err(err) => Err(CliError::new(
            TIMEOUT,
            format!(
                "{} stopped answering after {} consecutive failures: {err}",
                args.address, args.max_retry
            ),
        )),
    }
}
