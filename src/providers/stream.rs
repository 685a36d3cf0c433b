use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{ProviderError, ProviderResult};
use crate::models::chunk::StreamChunk;

/// End-of-stream sentinel used by event-stream framed backends.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One raw element from the transport: a newline-delimited text frame or
/// an already-parsed JSON object.
#[derive(Debug, Clone)]
pub enum RawFrame {
    Line(String),
    Json(Value),
}

enum Decoded {
    Chunk(StreamChunk),
    Done,
    Skip,
}

/// Lazy decoder from raw stream frames into canonical chunks.
///
/// Pull-based and single-pass: one frame is consumed per chunk produced,
/// so a slow consumer creates backpressure at the source, and dropping
/// the stream abandons the request. Backends vary in how they frame
/// partial output; every consumer of this stream sees one uniform shape.
pub struct ChunkStream;

impl ChunkStream {
    pub fn new(
        frames: BoxStream<'static, ProviderResult<RawFrame>>,
    ) -> BoxStream<'static, ProviderResult<StreamChunk>> {
        Box::pin(try_stream! {
            let mut frames = frames;
            while let Some(frame) = frames.next().await {
                match decode_frame(frame?)? {
                    Decoded::Chunk(chunk) => yield chunk,
                    Decoded::Done => break,
                    Decoded::Skip => continue,
                }
            }
        })
    }

    /// Decode an event-stream HTTP response body.
    pub fn from_response(
        response: reqwest::Response,
    ) -> BoxStream<'static, ProviderResult<StreamChunk>> {
        Self::new(response_lines(response))
    }
}

/// Split an HTTP response body into newline-delimited frames. Only the
/// current partial line is buffered; read failures surface as network
/// errors.
pub fn response_lines(
    response: reqwest::Response,
) -> BoxStream<'static, ProviderResult<RawFrame>> {
    Box::pin(try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(piece) = bytes.next().await {
            let piece = piece
                .map_err(|e| ProviderError::network_with("error reading response stream", e))?;
            buffer.extend_from_slice(&piece);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                yield RawFrame::Line(line);
            }
        }
        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            yield RawFrame::Line(line);
        }
    })
}

fn decode_frame(frame: RawFrame) -> ProviderResult<Decoded> {
    let value = match frame {
        // already-structured chunks pass through without repair
        RawFrame::Json(value) => {
            let chunk = serde_json::from_value(value)
                .map_err(|e| ProviderError::network_with("error processing stream chunk", e))?;
            return Ok(Decoded::Chunk(chunk));
        }
        RawFrame::Line(line) => {
            let payload = line.strip_prefix("data: ").unwrap_or(&line).trim();
            if payload.is_empty() {
                return Ok(Decoded::Skip);
            }
            if payload == DONE_SENTINEL {
                return Ok(Decoded::Done);
            }
            serde_json::from_str::<Value>(payload).map_err(|e| {
                ProviderError::model_with(
                    format!("failed to parse JSON from stream: {:?}", payload),
                    e,
                )
            })?
        }
    };

    let chunk = serde_json::from_value(normalize_chunk(value))
        .map_err(|e| ProviderError::network_with("error processing stream chunk", e))?;
    Ok(Decoded::Chunk(chunk))
}

/// Repair vendor-specific and shapeless payloads into the canonical
/// `choices[0].delta` chunk shape. Deliberately lossy fallbacks: content
/// is fabricated rather than failing, so downstream consumers never see a
/// chunk with zero choices.
fn normalize_chunk(value: Value) -> Value {
    // alternate vendor shape: a single `message` field instead of `choices`
    if let Some(message) = value.get("message") {
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| synthesized_id(&content));
        debug!("repacking vendor message frame into canonical chunk shape");
        return json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": value.get("created").cloned()
                .unwrap_or_else(|| json!(chrono::Utc::now().timestamp())),
            "model": value.get("model").cloned().unwrap_or_else(|| json!("unknown")),
            "choices": [{"index": 0, "delta": {"content": content}}],
        });
    }

    if !value.is_object() || value.get("choices").is_none() {
        debug!("synthesizing fallback chunk for shapeless payload");
        return fallback_chunk(&value);
    }

    let mut value = value;
    let choices = &mut value["choices"];
    match choices.as_array_mut() {
        Some(array) if array.is_empty() => {
            debug!("synthesizing empty delta for chunk with no choices");
            *choices = json!([{"index": 0, "delta": {"content": ""}}]);
        }
        Some(array) => {
            let first = &mut array[0];
            if first.get("delta").is_none() {
                debug!("synthesizing delta for choice without one");
                let text = first.to_string();
                if let Some(choice) = first.as_object_mut() {
                    choice.insert("delta".to_string(), json!({"content": text}));
                } else {
                    *first = json!({"index": 0, "delta": {"content": text}});
                }
            }
        }
        None => {
            *choices = json!([{"index": 0, "delta": {"content": ""}}]);
        }
    }
    value
}

/// Preserve an uninterpretable payload as synthesized text content.
fn fallback_chunk(data: &Value) -> Value {
    let id = data
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("fallback-id");
    let model = data
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{"index": 0, "delta": {"content": data.to_string()}}],
    })
}

/// Deterministic id derived from a hash of the content, for vendors that
/// provide none.
fn synthesized_id(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let hex: String = digest
        .iter()
        .take(8)
        .map(|byte| format!("{:02x}", byte))
        .collect();
    format!("chunk-{}", hex)
}
