use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::http_response::HttpResponseBuilder;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct EventSourceEvent {
    pub data: String,
    pub id: String,
    pub event: Option<String>,
}

/// Streams `event_stream` to the client until either side goes away.
pub async fn handle_event_stream(mut tcp_stream: TcpStream, retry: Option<i32>, event_stream: &mut UnboundedReceiver<EventSourceEvent>) -> anyhow::Result<()> {
    let http_response = HttpResponseBuilder::new()
        .content_event_stream()
        .header(("Cache-Control".into(), "no-cache".to_owned()))
        .build();

    let (reader, writer) = tcp_stream.split();
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);

    writer.write_all(&http_response.into_bytes()).await?;

    if let Some(retry_value) = retry {
        writer.write_all(format!("retry: {retry_value}\n").as_bytes()).await?;
    };

    writer.flush().await?;

    loop {
        let mut read_buf = String::new();
        tokio::select! {
            _ = tokio::time::sleep(KEEP_ALIVE_INTERVAL) => {
                writer.write_all(b": keep-alive\n").await.context("Keep-alive failed")?;
                writer.flush().await.context("Keep-alive failed")?
            },

            _ = reader.read_line(&mut read_buf) => {
                // the client hung up or sent something unexpected, stop either way
                break;
            },

            next_event = event_stream.recv() => {
                match next_event {
                    Some(event) => {
                        writer.write_all(format_event(&event).as_bytes()).await.context("Send event failed")?;
                        writer.flush().await.context("Send event failed")?;
                    },
                    None => break,
                }
            },
        }
    }

    Ok(())
}

fn format_event(event: &EventSourceEvent) -> String {
    let mut res = String::new();
    if let Some(event_type) = &event.event {
        res.push_str(&format!("event: {event_type}\n"));
    }
    for line in event.data.lines() {
        res.push_str(&format!("data: {line}\n"));
    }
    res.push_str(&format!("id: {}\n", event.id));
    res.push('\n');
    res
}
