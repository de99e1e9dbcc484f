use std::io::{IsTerminal, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use corrwire_peer::{Message, PingAttempt};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Outcome of `corrwire send`.
pub struct SendReport<'a> {
    pub address: &'a str,
    pub sent_size: usize,
    /// `None` for no-reply sends.
    pub response: Option<&'a [u8]>,
    pub elapsed: Duration,
}

#[derive(Serialize)]
struct SendOutput<'a> {
    kind: &'static str,
    address: &'a str,
    sent_size: usize,
    reply_expected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
    elapsed_ms: f64,
    timestamp: String,
}

pub fn print_send(report: &SendReport<'_>, format: OutputFormat) {
    let response = report.response.map(payload_preview);
    match format {
        OutputFormat::Json => {
            let out = SendOutput {
                kind: "send",
                address: report.address,
                sent_size: report.sent_size,
                reply_expected: report.response.is_some(),
                response_size: report.response.map(<[u8]>::len),
                response,
                elapsed_ms: millis(report.elapsed),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDRESS", "SENT", "RECEIVED", "ELAPSED", "RESPONSE"])
                .add_row(vec![
                    report.address.to_string(),
                    report.sent_size.to_string(),
                    report
                        .response
                        .map(|r| r.len().to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    format!("{:.1}ms", millis(report.elapsed)),
                    response.unwrap_or_else(|| "(no reply expected)".to_string()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => match response {
            Some(text) => println!(
                "address={} sent={} received={} elapsed={:.1}ms response={}",
                report.address,
                report.sent_size,
                report.response.map(<[u8]>::len).unwrap_or_default(),
                millis(report.elapsed),
                text
            ),
            None => println!(
                "address={} sent={} elapsed={:.1}ms (no reply expected)",
                report.address,
                report.sent_size,
                millis(report.elapsed)
            ),
        },
        OutputFormat::Raw => {
            if let Some(data) = report.response {
                print_raw(data);
            }
        }
    }
}

#[derive(Serialize)]
struct MessageOutput {
    kind: &'static str,
    id: u32,
    reply_expected: bool,
    local_addr: String,
    remote_addr: String,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_message(message: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                kind: "message",
                id: message.id,
                reply_expected: message.expects_reply(),
                local_addr: message.local_addr.to_string(),
                remote_addr: message.remote_addr.to_string(),
                payload_size: message.payload.len(),
                payload: payload_preview(&message.payload),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "FROM", "TO", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    message.id.to_string(),
                    message.remote_addr.to_string(),
                    message.local_addr.to_string(),
                    message.payload.len().to_string(),
                    payload_preview(&message.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "id={} from={} to={} size={} payload={}",
                message.id,
                message.remote_addr,
                message.local_addr,
                message.payload.len(),
                payload_preview(&message.payload)
            );
        }
        OutputFormat::Raw => print_raw(&message.payload),
    }
}

#[derive(Serialize)]
struct PingOutput {
    kind: &'static str,
    seq: u64,
    ok: bool,
    elapsed_ms: f64,
    failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn print_ping(attempt: &PingAttempt, format: OutputFormat) {
    let error = attempt.result.as_ref().err().map(ToString::to_string);
    match format {
        OutputFormat::Json => {
            let out = PingOutput {
                kind: "ping",
                seq: attempt.seq,
                ok: attempt.result.is_ok(),
                elapsed_ms: millis(attempt.elapsed),
                failures: attempt.failures,
                error,
            };
            print_json(&out);
        }
        OutputFormat::Table | OutputFormat::Pretty => match error {
            None => println!(
                "seq={} ok time={:.1}ms",
                attempt.seq,
                millis(attempt.elapsed)
            ),
            Some(err) => println!(
                "seq={} failed ({}) failures={}",
                attempt.seq, err, attempt.failures
            ),
        },
        OutputFormat::Raw => {
            if let Ok(payload) = &attempt.result {
                print_raw(payload);
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_marks_binary_payloads() {
        assert_eq!(payload_preview(b"hello"), "hello");
        assert_eq!(payload_preview(&[0xff, 0xfe, 0x00]), "<binary 3 bytes>");
    }

    #[test]
    fn send_output_omits_response_for_no_reply() {
        let out = SendOutput {
            kind: "send",
            address: "127.0.0.1:9000",
            sent_size: 4,
            reply_expected: false,
            response_size: None,
            response: None,
            elapsed_ms: 0.5,
            timestamp: "0".to_string(),
        };
        let json = serde_json::to_value(&out).expect("should serialize");
        assert_eq!(json["reply_expected"], false);
        assert!(json.get("response").is_none());
    }
}
