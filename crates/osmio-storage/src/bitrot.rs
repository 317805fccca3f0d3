use osmio_common::error::{OsmioError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use crate::disk::Disk;

/// Bytes of in-flight buffering between the shard writer and the disk's
/// streaming create. Writes block once the disk falls this far behind.
const SHARD_PIPE_BUFFER: usize = 64 * 1024;

pub const BITROT_HEADER_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitrotAlgorithm {
    #[serde(rename = "sha256-chain")]
    Sha256Chain,
}

impl Default for BitrotAlgorithm {
    fn default() -> Self {
        Self::Sha256Chain
    }
}

/// Rolling digest chain. Each chunk's header digest is
/// `SHA-256(previous_header_digest || chunk)`; the first chunk chains from
/// nothing. The final header digest doubles as the whole-shard checksum
/// recorded in the manifest.
#[derive(Debug, Default)]
struct HashChain {
    prev: Vec<u8>,
}

impl HashChain {
    fn advance(&mut self, chunk: &[u8]) -> [u8; BITROT_HEADER_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(&self.prev);
        hasher.update(chunk);
        let digest: [u8; BITROT_HEADER_LEN] = hasher.finalize().into();
        self.prev = digest.to_vec();
        digest
    }

    fn sum_hex(&self) -> String {
        self.prev.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Wraps one disk file with the inline hash chain. The actual disk write
/// runs in a spawned task fed through an in-memory pipe, so N writers fan
/// out concurrently while encoding stays synchronous.
#[derive(Debug)]
pub struct BitrotWriter {
    pipe: Option<DuplexStream>,
    task: JoinHandle<Result<()>>,
    chain: HashChain,
}

impl BitrotWriter {
    pub fn new(disk: Disk, volume: &str, path: &str, file_size: i64) -> Self {
        let (mut read_half, write_half) = tokio::io::duplex(SHARD_PIPE_BUFFER);
        let volume = volume.to_string();
        let path = path.to_string();
        let task = tokio::spawn(async move {
            disk.create_file(&volume, &path, file_size, &mut read_half)
                .await
        });
        Self {
            pipe: Some(write_half),
            task,
            chain: HashChain::default(),
        }
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let header = self.chain.advance(chunk);
        let pipe = self
            .pipe
            .as_mut()
            .ok_or_else(|| OsmioError::InternalError("write after close".to_string()))?;
        pipe.write_all(&header).await?;
        pipe.write_all(chunk).await?;
        Ok(())
    }

    /// Closes the stream, waits for the disk write to land, and returns the
    /// hex chain digest for the manifest.
    pub async fn finalize(mut self) -> Result<String> {
        drop(self.pipe.take());
        self.task
            .await
            .map_err(|err| OsmioError::InternalError(format!("shard writer task failed: {err}")))??;
        Ok(self.chain.sum_hex())
    }
}

/// Verifies a shard file laid out as repeated `header || chunk` records.
/// The caller drives it with the chunk schedule derived from the part size.
#[derive(Debug, Default)]
pub struct ChainVerifier {
    chain: HashChain,
}

impl ChainVerifier {
    pub fn verify_chunk(&mut self, header: &[u8], chunk: &[u8]) -> Result<()> {
        let expected = self.chain.advance(chunk);
        if header != expected {
            return Err(OsmioError::BitrotChecksumMismatch);
        }
        Ok(())
    }

    /// Compares the rolling sum against the manifest checksum once every
    /// chunk has been verified.
    pub fn verify_sum(&self, expected_hex: &str) -> Result<()> {
        if self.chain.sum_hex() != expected_hex {
            return Err(OsmioError::BitrotChecksumMismatch);
        }
        Ok(())
    }
}
