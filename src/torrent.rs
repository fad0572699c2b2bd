//! # Torrent Metainfo Loading
//!
//! This module parses a .torrent file into an immutable descriptor of the
//! resource whose transfer is being simulated. Only the fields the announce
//! session needs are retained:
//!
//! - **name**: Display name from the info dictionary
//! - **length**: Total size in bytes (single- or multi-file)
//! - **info_hash**: 20-byte SHA-1 hash of the bencoded info dictionary
//! - **announce**: Tracker URL announces are sent to
//!
//! The info hash uniquely identifies the torrent towards the tracker and is
//! computed over the re-encoded info dictionary in canonical key order.

use crate::tracker::HASH_SIZE;

use anyhow::{anyhow, Result};
use boring::sha::Sha1;
use serde::{Deserialize, Serialize};
use serde_bencode::{de, ser};
use serde_bytes::ByteBuf;
use url::Url;

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Immutable descriptor of the torrent a session announces for.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Display name from the torrent metadata
    pub name: String,
    /// Total size of the described content in bytes
    pub length: u64,
    /// 20-byte SHA-1 hash of the bencoded info dictionary
    pub info_hash: [u8; HASH_SIZE],
    /// Tracker URL announces are sent to
    pub announce: String,
}

/// One entry of a multi-file info dictionary.
#[derive(Deserialize, Serialize)]
struct BencodeFile {
    // Size of this file in bytes
    length: u64,
    // Path components, unused by the simulator
    path: Vec<String>,
}

/// BencodeInfo structure.
///
/// Fields are declared in canonical bencode key order so that re-encoding
/// for the info hash reproduces the on-disk byte sequence.
#[derive(Deserialize, Serialize)]
struct BencodeInfo {
    // Per-file sizes for multi-file torrents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files: Option<Vec<BencodeFile>>,
    // Size of the file in bytes for single-file torrents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    // Suggested filename
    name: String,
    // Size of each piece in bytes
    #[serde(rename = "piece length")]
    piece_length: u64,
    // Concatenation of all pieces 20-byte SHA-1 hashes
    pieces: ByteBuf,
}

/// BencodeTorrent structure.
#[derive(Deserialize, Serialize)]
struct BencodeTorrent {
    // URL of the tracker
    #[serde(default)]
    announce: String,
    // Tiered list of tracker URLs (BEP 12)
    #[serde(rename = "announce-list", default)]
    announce_list: Vec<Vec<String>>,
    // Informations about file
    info: BencodeInfo,
}

impl BencodeInfo {
    /// Hash bencoded informations to uniquely identify a file.
    fn hash(&self) -> Result<[u8; HASH_SIZE]> {
        // Serialize bencoded informations
        let buf: Vec<u8> = ser::to_bytes::<BencodeInfo>(self)?;

        // Hash bencoded informations
        let mut hasher = Sha1::new();
        hasher.update(&buf);

        Ok(hasher.finish())
    }

    /// Total content size in bytes, summing files for multi-file torrents.
    fn total_length(&self) -> Result<u64> {
        if let Some(length) = self.length {
            return Ok(length);
        }
        if let Some(files) = &self.files {
            return Ok(files.iter().map(|f| f.length).sum());
        }
        Err(anyhow!("torrent has neither length nor files"))
    }
}

impl Metainfo {
    /// Load a torrent descriptor from a file.
    ///
    /// # Arguments
    ///
    /// * `filepath` - Path to the torrent.
    ///
    pub fn load(filepath: &Path) -> Result<Metainfo> {
        // Read torrent content in a buffer
        let mut file = match File::open(filepath) {
            Ok(file) => file,
            Err(_) => return Err(anyhow!("could not open torrent")),
        };
        let mut buf = vec![];
        if file.read_to_end(&mut buf).is_err() {
            return Err(anyhow!("could not read torrent"));
        }

        // Deserialize bencoded data from torrent
        let bencode = match de::from_bytes::<BencodeTorrent>(&buf) {
            Ok(bencode) => bencode,
            Err(_) => return Err(anyhow!("could not decode torrent")),
        };

        let announce = pick_announce(&bencode)?;

        // Validate the announce endpoint early, before any session starts
        if Url::parse(&announce).is_err() {
            return Err(anyhow!("could not parse tracker url {:?}", announce));
        }

        Ok(Metainfo {
            name: bencode.info.name.to_owned(),
            length: bencode.info.total_length()?,
            info_hash: bencode.info.hash()?,
            announce,
        })
    }
}

/// Pick the announce URL, preferring the flat field over announce-list tiers.
fn pick_announce(bencode: &BencodeTorrent) -> Result<String> {
    if !bencode.announce.is_empty() {
        return Ok(bencode.announce.to_owned());
    }
    for tier in &bencode.announce_list {
        if let Some(url) = tier.first() {
            return Ok(url.to_owned());
        }
    }
    Err(anyhow!("torrent has no announce or announce-list"))
}
