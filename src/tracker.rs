//! # Tracker Announce Transport
//!
//! This module implements the HTTP tracker announce protocol: building the
//! announce URL with percent-encoded binary fields, sending the GET request,
//! and decoding the bencoded response.
//!
//! ## Request
//!
//! An announce carries the info hash, the peer identity, the byte counters
//! (`downloaded`, `left`, `uploaded`), an optional lifecycle event and
//! `numwant=-1` to signal no limit on the returned peer list.
//!
//! ## Response
//!
//! The tracker replies with a bencoded dictionary. The session consumes:
//!
//! - **interval**: Seconds until the next expected announce
//! - **complete**: Number of seeders in the swarm
//! - **incomplete**: Number of leechers in the swarm
//!
//! A `failure reason` key in the response is surfaced as a transport error.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_bencode::de;
use url::Url;

use std::time::Duration;

/// Size of SHA-1 hash in bytes
pub const HASH_SIZE: usize = 20;

// Timeout applied to every announce request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Lifecycle event attached to an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// First announce of the session
    Started,
    /// Regular periodic announce, no event on the wire
    None,
    /// The simulated download just reached the total size
    Completed,
    /// Terminal announce before the process exits
    Stopped,
}

impl Event {
    /// Wire label for the `event` query parameter, `None` for periodic
    /// announces which carry no event.
    fn query_value(&self) -> Option<&'static str> {
        match self {
            Event::Started => Some("started"),
            Event::None => None,
            Event::Completed => Some("completed"),
            Event::Stopped => Some("stopped"),
        }
    }
}

/// Progress report sent to the tracker on each announce.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    pub info_hash: [u8; HASH_SIZE],
    /// 20-byte unique identifier for this client instance
    pub peer_id: [u8; HASH_SIZE],
    /// Bytes reported as downloaded so far
    pub downloaded: u64,
    /// Bytes reported as remaining
    pub left: u64,
    /// Bytes reported as uploaded so far
    pub uploaded: u64,
    /// Lifecycle event for this announce
    pub event: Event,
    /// Requested peer-list size, -1 for no limit
    pub num_want: i32,
}

/// Fields of the tracker response the session consumes.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds until the next expected announce
    pub interval: u32,
    /// Number of seeders in the swarm
    pub seeders: u32,
    /// Number of leechers in the swarm
    pub leechers: u32,
}

/// Transport seam between the announce engine and the network.
///
/// The engine only depends on this trait, so tests can drive it with
/// scripted responses instead of a live tracker.
pub trait AnnounceClient {
    /// Send one announce and decode the tracker's reply.
    fn announce(&self, url: &str, request: &AnnounceRequest) -> Result<AnnounceResponse>;
}

/// Bencoded tracker response.
#[derive(Debug, Deserialize)]
struct BencodeResponse {
    // Human-readable error from the tracker, mutually exclusive with the rest
    #[serde(rename = "failure reason", default)]
    failure_reason: Option<String>,
    // Interval time before the next announce in seconds
    #[serde(default)]
    interval: u32,
    // Number of seeders
    #[serde(default)]
    complete: u32,
    // Number of leechers
    #[serde(default)]
    incomplete: u32,
}

/// HTTP announce transport backed by a blocking reqwest client.
pub struct HttpTracker {
    client: reqwest::blocking::Client,
}

impl HttpTracker {
    /// Build the transport with its request timeout applied.
    pub fn new() -> Result<HttpTracker> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(HttpTracker { client })
    }
}

impl AnnounceClient for HttpTracker {
    fn announce(&self, url: &str, request: &AnnounceRequest) -> Result<AnnounceResponse> {
        let full_url = build_announce_url(url, request)?;

        // Send GET request to the tracker
        let response = self.client.get(&full_url).send()?;
        let bytes = response.bytes()?;

        // Deserialize bencoded tracker response
        let bencode = match de::from_bytes::<BencodeResponse>(&bytes) {
            Ok(bencode) => bencode,
            Err(_) => return Err(anyhow!("could not decode tracker response")),
        };

        if let Some(reason) = bencode.failure_reason {
            return Err(anyhow!("tracker refused announce: {}", reason));
        }
        if bencode.interval == 0 {
            return Err(anyhow!("tracker response has no interval"));
        }

        Ok(AnnounceResponse {
            interval: bencode.interval,
            seeders: bencode.complete,
            leechers: bencode.incomplete,
        })
    }
}

/// Build the full announce URL for a request.
///
/// # Arguments
///
/// * `announce` - The tracker URL.
/// * `request` - The progress report to encode in the query string.
///
fn build_announce_url(announce: &str, request: &AnnounceRequest) -> Result<String> {
    // Parse tracker URL from torrent
    let base_url = match Url::parse(announce) {
        Ok(url) => url,
        Err(_) => return Err(anyhow!("could not parse tracker url")),
    };

    // Build query string manually to handle binary data properly
    let mut query = format!(
        "info_hash={}&peer_id={}&downloaded={}&left={}&uploaded={}&numwant={}&compact=1",
        percent_encode_binary(&request.info_hash),
        percent_encode_binary(&request.peer_id),
        request.downloaded,
        request.left,
        request.uploaded,
        request.num_want,
    );
    if let Some(event) = request.event.query_value() {
        query.push_str("&event=");
        query.push_str(event);
    }

    let mut url = base_url.to_string();
    if url.contains('?') {
        url.push('&');
    } else {
        url.push('?');
    }
    url.push_str(&query);

    Ok(url)
}

/// Each byte is encoded as %XX where XX is the hexadecimal representation
fn percent_encode_binary(data: &[u8]) -> String {
    const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(data.len() * 3);

    for &byte in data {
        encoded.push('%');
        // Extract high nibble (first 4 bits) and convert to hex digit
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        // Extract low nibble (last 4 bits) and convert to hex digit
        encoded.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
    }

    encoded
}
