//! Inner coding of a modem payload: LZ4, Reed-Solomon parity, then a
//! CRC32-checked packet.

use crate::error::{Result, SonicLinkError};
use byteorder::{BigEndian, ByteOrder};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use reed_solomon_erasure::galois_8::ReedSolomon;

pub const PACKET_VERSION: u8 = 1;
pub const MAX_PACKET_PAYLOAD: usize = 2048;
pub const HEADER_SIZE: usize = 4;
pub const TRAILER_SIZE: usize = 4;

pub const ECC_DATA_SHARDS: usize = 8;
pub const ECC_PARITY_SHARDS: usize = 4;
const ECC_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub version: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PACKET_PAYLOAD {
            return Err(SonicLinkError::InvalidPacket(format!(
                "Payload too large: {} > {}",
                payload.len(),
                MAX_PACKET_PAYLOAD
            )));
        }

        Ok(Self {
            version: PACKET_VERSION,
            flags: 0,
            payload,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE + self.payload.len() + TRAILER_SIZE];

        data[0] = self.version;
        BigEndian::write_u16(&mut data[1..3], self.payload.len() as u16);
        data[3] = self.flags;
        data[HEADER_SIZE..HEADER_SIZE + self.payload.len()].copy_from_slice(&self.payload);

        let crc_at = HEADER_SIZE + self.payload.len();
        BigEndian::write_u32(&mut data[crc_at..], crc32fast::hash(&self.payload));

        data
    }

    /// Parse a packet, ignoring bytes past its checksum.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE + TRAILER_SIZE {
            return Err(SonicLinkError::InvalidPacket("Data too short".into()));
        }

        let version = data[0];
        if version != PACKET_VERSION {
            return Err(SonicLinkError::InvalidPacket(format!("Unknown version {version}")));
        }

        let payload_len = usize::from(BigEndian::read_u16(&data[1..3]));
        let flags = data[3];

        let payload_end = HEADER_SIZE + payload_len;
        if data.len() < payload_end + TRAILER_SIZE {
            return Err(SonicLinkError::InvalidPacket("Incomplete packet".into()));
        }

        let payload = data[HEADER_SIZE..payload_end].to_vec();
        let checksum = BigEndian::read_u32(&data[payload_end..payload_end + TRAILER_SIZE]);

        if checksum != crc32fast::hash(&payload) {
            return Err(SonicLinkError::ChecksumMismatch);
        }

        Ok(Self {
            version,
            flags,
            payload,
        })
    }
}

pub struct ParityCodec {
    rs: ReedSolomon,
}

impl ParityCodec {
    pub fn new() -> Result<Self> {
        let rs = ReedSolomon::new(ECC_DATA_SHARDS, ECC_PARITY_SHARDS)
            .map_err(|e| SonicLinkError::ErrorCorrection(e.to_string()))?;
        Ok(Self { rs })
    }

    /// `[original len u32][shard size u32][data shards][parity shards]`
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let shard_size = data.len().div_ceil(ECC_DATA_SHARDS).max(1);

        let mut shards: Vec<Vec<u8>> = (0..ECC_DATA_SHARDS + ECC_PARITY_SHARDS)
            .map(|i| {
                let mut shard = vec![0u8; shard_size];
                let start = i * shard_size;
                if i < ECC_DATA_SHARDS && start < data.len() {
                    let end = (start + shard_size).min(data.len());
                    shard[..end - start].copy_from_slice(&data[start..end]);
                }
                shard
            })
            .collect();

        self.rs
            .encode(&mut shards)
            .map_err(|e| SonicLinkError::ErrorCorrection(e.to_string()))?;

        let mut encoded = vec![0u8; ECC_HEADER_SIZE];
        BigEndian::write_u32(&mut encoded[0..4], data.len() as u32);
        BigEndian::write_u32(&mut encoded[4..8], shard_size as u32);
        for shard in shards {
            encoded.extend_from_slice(&shard);
        }

        Ok(encoded)
    }

    pub fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        if encoded.len() < ECC_HEADER_SIZE {
            return Err(SonicLinkError::ErrorCorrection("Data too short".into()));
        }

        let original_len = BigEndian::read_u32(&encoded[0..4]) as usize;
        let shard_size = BigEndian::read_u32(&encoded[4..8]) as usize;
        let total_shards = ECC_DATA_SHARDS + ECC_PARITY_SHARDS;

        if shard_size == 0
            || encoded.len() < ECC_HEADER_SIZE + total_shards * shard_size
            || original_len > ECC_DATA_SHARDS * shard_size
        {
            return Err(SonicLinkError::ErrorCorrection("Incomplete data".into()));
        }

        let mut shards: Vec<Option<Vec<u8>>> = encoded[ECC_HEADER_SIZE..]
            .chunks_exact(shard_size)
            .take(total_shards)
            .map(|shard| Some(shard.to_vec()))
            .collect();

        self.rs
            .reconstruct(&mut shards)
            .map_err(|e| SonicLinkError::ErrorCorrection(e.to_string()))?;

        let mut decoded: Vec<u8> = shards
            .into_iter()
            .take(ECC_DATA_SHARDS)
            .flatten()
            .flatten()
            .collect();
        decoded.truncate(original_len);

        Ok(decoded)
    }
}

/// Compress, add parity, and wrap a text payload for modulation.
pub fn seal(payload: &str) -> Result<Vec<u8>> {
    let compressed = compress_prepend_size(payload.as_bytes());
    let protected = ParityCodec::new()?.encode(&compressed)?;
    Ok(Packet::new(protected)?.serialize())
}

/// Inverse of [`seal`].
pub fn open(data: &[u8]) -> Result<String> {
    let packet = Packet::deserialize(data)?;
    let compressed = ParityCodec::new()?.decode(&packet.payload)?;
    let bytes = decompress_size_prepended(&compressed)
        .map_err(|e| SonicLinkError::Compression(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| SonicLinkError::Decoding(e.to_string()))
}
