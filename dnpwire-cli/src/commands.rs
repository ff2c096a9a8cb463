//! Command execution.

use crate::Commands;
use colored::Colorize;
use dnpwire_link::Master;
use dnpwire_protocol::frame::RangeLayout;
use dnpwire_protocol::{ControlCode, Crob, FeedStatus, Group, Message};
use serde_json::json;
use tokio::net::TcpStream;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a command against a connected outstation and returns the
/// formatted output.
pub async fn execute(master: &mut Master<TcpStream>, cmd: Commands, json: bool) -> CommandResult {
    match cmd {
        Commands::Read {
            group,
            variation,
            start,
            stop,
        } => {
            let range = parse_range(start, stop)?;
            let mut response = master.read(Group(group), variation, range).await?;
            format_message(&mut response, json)
        }

        Commands::Class { classes } => {
            let mut response = master.read_class(&classes).await?;
            format_message(&mut response, json)
        }

        Commands::Operate {
            index,
            code,
            direct,
            on_ms,
            off_ms,
        } => {
            let crob = Crob {
                on_time_ms: on_ms,
                off_time_ms: off_ms,
                ..Crob::new(code.into())
            };
            let echoed = if direct {
                master.direct_operate(index, &crob).await?
            } else {
                master.select_before_operate(index, &crob).await?
            };

            if json {
                return Ok(serde_json::to_string_pretty(&echoed)?);
            }
            if echoed.status == Crob::STATUS_SUCCESS {
                Ok(format!(
                    "{} {:?} on output {}",
                    "Operated".green(),
                    echoed.code,
                    index.to_string().cyan()
                ))
            } else {
                Ok(format!(
                    "{}: output {} answered {} ({})",
                    "Rejected".red(),
                    index,
                    echoed.status,
                    status_name(echoed.status)
                ))
            }
        }

        Commands::Restart { warm } => {
            let delay = if warm {
                master.warm_restart().await?
            } else {
                master.cold_restart().await?
            };
            if json {
                return Ok(json!({ "warm": warm, "delay_ms": delay }).to_string());
            }
            match delay {
                Some(ms) => Ok(format!("{} (back in {} ms)", "Restarting".green(), ms)),
                None => Ok(format!("{} (no delay reported)", "Restarting".green())),
            }
        }

        Commands::WriteTime => {
            let now = chrono::Utc::now();
            let epoch_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
            let indicators = master.write_time(epoch_ms).await?;
            if json {
                return Ok(json!({ "time": now, "indicators": indicators.names() }).to_string());
            }
            Ok(format!(
                "{} {}\n  {}: {}",
                "Time set to".green(),
                now.to_rfc3339(),
                "Indicators".dimmed(),
                format_indicators(&indicators.names())
            ))
        }

        Commands::ClearRestart => {
            let indicators = master.clear_restart().await?;
            if json {
                return Ok(json!({ "indicators": indicators.names() }).to_string());
            }
            Ok(format!(
                "{}\n  {}: {}",
                "Restart indication cleared".green(),
                "Indicators".dimmed(),
                format_indicators(&indicators.names())
            ))
        }

        Commands::Attribute { variation } => {
            let value = master.read_attribute(variation).await?;
            if json {
                return Ok(json!({ "variation": variation, "value": value }).to_string());
            }
            match value {
                Some(value) => Ok(value),
                None => Ok(format!("Attribute {} not reported", variation)
                    .yellow()
                    .to_string()),
            }
        }

        // Offline commands are handled directly in main.rs
        Commands::EncodeRead { .. } | Commands::Decode { .. } => unreachable!(),
    }
}

/// Encodes a read request and returns its wire bytes as hex.
pub fn encode_read(
    dest: u16,
    source: u16,
    group: u8,
    variation: u8,
    start: Option<u16>,
    stop: Option<u16>,
) -> CommandResult {
    let range = parse_range(start, stop)?;
    let mut msg = Message::request(dest, source, ControlCode::Read);
    msg.add_read_request(Group(group), variation, range)?;
    msg.build()?;
    Ok(hex::encode(msg.wire()))
}

/// Parses one message from hex-encoded wire bytes.
pub fn decode(input: &str, json: bool) -> CommandResult {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(cleaned)?;

    let mut msg = Message::new();
    let feed = msg.feed(&bytes);
    tracing::debug!(
        len = bytes.len(),
        consumed = feed.consumed,
        status = ?feed.status,
        "Decoded capture"
    );
    match feed.status {
        FeedStatus::Complete => {
            let mut output = format_message(&mut msg, json)?;
            let trailing = bytes.len() - feed.consumed;
            if trailing > 0 && !json {
                output.push_str(&format!(
                    "\n  {} {} trailing bytes",
                    "Ignored".yellow(),
                    trailing
                ));
            }
            Ok(output)
        }
        FeedStatus::Incomplete => Err(format!(
            "incomplete message after {} bytes ({} discarded)",
            bytes.len(),
            msg.stats().discarded_bytes
        )
        .into()),
        FeedStatus::Corrupt => Err("message exceeds the maximum size".into()),
    }
}

/// Formats a message and its data objects for display.
pub fn format_message(msg: &mut Message, json: bool) -> CommandResult {
    let objects = msg.decode_objects()?;

    if json {
        let objects: Vec<_> = objects
            .iter()
            .map(|(object, points)| json!({ "object": object, "points": points }))
            .collect();
        let value = json!({
            "control": msg.control,
            "source": msg.source,
            "dest": msg.dest,
            "transport_seq": msg.transport_seq,
            "application_seq": msg.application_seq,
            "indicators": msg.indicators.names(),
            "objects": objects,
        });
        return Ok(serde_json::to_string_pretty(&value)?);
    }

    let mut output = format!(
        "{} {} -> {} (seq {})",
        format!("{:?}", msg.control).bold(),
        msg.source,
        msg.dest,
        msg.application_seq
    );
    if msg.control.carries_indicators() {
        output.push_str(&format!(
            "\n  {}: {}",
            "Indicators".dimmed(),
            format_indicators(&msg.indicators.names())
        ));
    }
    if objects.is_empty() {
        output.push_str(&format!("\n  {}", "(no objects)".dimmed()));
    }

    for (object, points) in &objects {
        let range = match object.qualifier.range.layout() {
            RangeLayout::None => "all points".to_string(),
            _ => format!("points {}-{}", object.address_start, object.address_end),
        };
        output.push_str(&format!(
            "\n  {} q={:#04x} {}",
            format!("g{}v{}", object.group.0, object.variation).cyan(),
            object.qualifier.bits(),
            range
        ));
        for point in points {
            output.push_str(&format!(
                "\n    [{}] {}",
                point.address,
                hex::encode(point.data.as_bytes())
            ));
        }
    }

    Ok(output)
}

fn format_indicators(names: &[&str]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ").yellow().to_string()
    }
}

fn parse_range(start: Option<u16>, stop: Option<u16>) -> Result<Option<(u16, u16)>, String> {
    match (start, stop) {
        (None, None) => Ok(None),
        (Some(start), Some(stop)) => Ok(Some((start, stop))),
        _ => Err("--start and --stop must be used together".to_string()),
    }
}

fn status_name(status: u8) -> &'static str {
    match status {
        Crob::STATUS_SUCCESS => "success",
        Crob::STATUS_TIMEOUT => "select timed out",
        Crob::STATUS_NO_SELECT => "no matching select",
        Crob::STATUS_FORMAT_ERROR => "format error",
        Crob::STATUS_NOT_SUPPORTED => "not supported",
        _ => "unknown status",
    }
}
