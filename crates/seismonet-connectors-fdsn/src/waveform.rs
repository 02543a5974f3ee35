//! Waveform data-center client (framed binary segments).

use std::io::{Cursor, Read};
use std::time::Instant;

use byteorder::{BigEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use tracing::{info, warn};

use seismonet_models::{ChannelId, SeismoError, SeismoResult, WaveformSegment};

use crate::cache::ResponseCache;
use crate::catalog::classify_response;
use crate::resilience::{ClientConfig, ResilientCaller};

/// Sample encodings the wire format supports.
const ENCODING_F32: u8 = 0;
const ENCODING_I32: u8 = 1;
const ENCODING_I16_GAIN: u8 = 2;

/// Client for the external waveform service. Shares the resilience
/// semantics of the catalog client; additionally guarantees that segments
/// returned for one channel are ordered and non-overlapping.
pub struct WaveformClient {
    http: reqwest::Client,
    base_url: String,
    caller: ResilientCaller,
    cache: ResponseCache,
}

impl WaveformClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            caller: ResilientCaller::new("waveform", config),
            cache: ResponseCache::new(std::time::Duration::from_millis(config.cache_ttl_ms)),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Fetch waveforms for a channel set over `[start, end)`.
    pub async fn get_waveforms(
        &self,
        channels: &[ChannelId],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SeismoResult<Vec<WaveformSegment>> {
        self.get_waveforms_with_deadline(channels, start, end, self.caller.default_deadline())
            .await
    }

    pub async fn get_waveforms_with_deadline(
        &self,
        channels: &[ChannelId],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        deadline: Instant,
    ) -> SeismoResult<Vec<WaveformSegment>> {
        if channels.is_empty() {
            return Err(SeismoError::Validation("empty channel set".into()));
        }
        if start >= end {
            return Err(SeismoError::Validation(format!(
                "empty time range [{}, {})",
                start, end
            )));
        }

        let mut selector: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        selector.sort();
        let params = vec![
            ("channels".to_string(), selector.join(",")),
            ("end".to_string(), end.to_rfc3339()),
            ("start".to_string(), start.to_rfc3339()),
        ];
        let cache_key = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let body = if let Some(cached) = self.cache.get(&cache_key) {
            cached
        } else {
            let bytes = self
                .caller
                .call(deadline, || async {
                    let response = self
                        .http
                        .get(&self.base_url)
                        .query(&params)
                        .send()
                        .await
                        .map_err(|e| SeismoError::Transient(format!("waveform request: {}", e)))?;
                    classify_response(response).await
                })
                .await?;
            self.cache.put(cache_key, bytes.clone());
            bytes
        };

        let segments = decode_frames(&body)?;
        let deduped = dedup_per_channel(segments);
        info!(count = deduped.len(), "waveform segments fetched");
        Ok(deduped)
    }
}

/// Decode a framed response body into segments.
///
/// Frame layout (big-endian): four length-prefixed identity strings, then
/// `start_ns: i64`, `rate_hz: f64`, `count: u32`, `encoding: u8`
/// (0 = f32, 1 = i32, 2 = i16 with a trailing `gain: f64`), then `count`
/// samples.
pub fn decode_frames(body: &[u8]) -> SeismoResult<Vec<WaveformSegment>> {
    let mut cursor = Cursor::new(body);
    let mut segments = Vec::new();

    while (cursor.position() as usize) < body.len() {
        let channel = ChannelId::new(
            read_short_string(&mut cursor)?,
            read_short_string(&mut cursor)?,
            read_short_string(&mut cursor)?,
            read_short_string(&mut cursor)?,
        );
        let start_ns = cursor
            .read_i64::<BigEndian>()
            .map_err(|e| truncated(e, "start_ns"))?;
        let rate_hz = cursor
            .read_f64::<BigEndian>()
            .map_err(|e| truncated(e, "rate_hz"))?;
        let count = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| truncated(e, "count"))? as usize;
        let encoding = cursor
            .read_u8()
            .map_err(|e| truncated(e, "encoding"))?;

        let samples = match encoding {
            ENCODING_F32 => {
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(cursor
                        .read_f32::<BigEndian>()
                        .map_err(|e| truncated(e, "f32 sample"))? as f64);
                }
                out
            }
            ENCODING_I32 => {
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(cursor
                        .read_i32::<BigEndian>()
                        .map_err(|e| truncated(e, "i32 sample"))? as f64);
                }
                out
            }
            ENCODING_I16_GAIN => {
                let gain = cursor
                    .read_f64::<BigEndian>()
                    .map_err(|e| truncated(e, "gain"))?;
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(
                        cursor
                            .read_i16::<BigEndian>()
                            .map_err(|e| truncated(e, "i16 sample"))?
                            as f64
                            * gain,
                    );
                }
                out
            }
            other => {
                return Err(SeismoError::Validation(format!(
                    "unknown segment encoding {}",
                    other
                )))
            }
        };

        let start = Utc
            .timestamp_nanos(start_ns);
        segments.push(WaveformSegment::new(channel, start, rate_hz, samples));
    }

    Ok(segments)
}

fn read_short_string(cursor: &mut Cursor<&[u8]>) -> SeismoResult<String> {
    let len = cursor.read_u8().map_err(|e| truncated(e, "string length"))? as usize;
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| truncated(e, "string bytes"))?;
    String::from_utf8(buf)
        .map_err(|e| SeismoError::Validation(format!("non-utf8 identity field: {}", e)))
}

fn truncated(e: std::io::Error, what: &str) -> SeismoError {
    SeismoError::Validation(format!("truncated frame at {}: {}", what, e))
}

/// Per channel: order by start and drop segments overlapping an earlier
/// one (the earlier segment wins).
fn dedup_per_channel(mut segments: Vec<WaveformSegment>) -> Vec<WaveformSegment> {
    segments.sort_by(|a, b| a.channel.cmp(&b.channel).then(a.start.cmp(&b.start)));

    let mut out: Vec<WaveformSegment> = Vec::with_capacity(segments.len());
    for seg in segments {
        if let Some(prev) = out.last() {
            if prev.channel == seg.channel && seg.start < prev.end() {
                warn!(channel = %seg.channel, "dropping overlapping segment from upstream");
                continue;
            }
        }
        out.push(seg);
    }
    out
}
