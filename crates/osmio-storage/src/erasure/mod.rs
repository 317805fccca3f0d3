use futures::future::join_all;
use osmio_common::error::{OsmioError, Result};
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::bitrot::{BITROT_HEADER_LEN, BitrotWriter};
use crate::fileinfo::ErasureInfo;

pub mod multipart;
pub mod objects;
pub mod set;

pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Stateless systematic Reed-Solomon coder, parameterised once per upload.
#[derive(Debug, Clone, Copy)]
pub struct Erasure {
    pub data_blocks: usize,
    pub parity_blocks: usize,
    pub block_size: usize,
}

impl Erasure {
    pub fn new(data_blocks: usize, parity_blocks: usize, block_size: usize) -> Self {
        Self {
            data_blocks,
            parity_blocks,
            block_size,
        }
    }

    pub fn from_info(info: &ErasureInfo) -> Self {
        Self::new(info.data_blocks, info.parity_blocks, info.block_size)
    }

    pub fn total_shards(&self) -> usize {
        self.data_blocks + self.parity_blocks
    }

    /// Shard length for one input block, rounded up to even for the codec.
    pub fn shard_size(&self, block_len: usize) -> usize {
        let mut size = block_len.div_ceil(self.data_blocks);
        if size % 2 != 0 {
            size += 1;
        }
        size
    }

    /// Per-chunk sizes of one shard file for a stream of `total` bytes:
    /// one chunk per input block, the tail chunk sized by the short block.
    pub fn shard_chunks(&self, total: i64) -> Vec<usize> {
        if total <= 0 {
            return Vec::new();
        }
        let total = total as usize;
        let full_blocks = total / self.block_size;
        let last_block = total % self.block_size;
        let mut chunks = vec![self.shard_size(self.block_size); full_blocks];
        if last_block > 0 {
            chunks.push(self.shard_size(last_block));
        }
        chunks
    }

    /// On-disk shard file length including inline bitrot headers.
    pub fn bitrot_shard_file_size(&self, total: i64) -> i64 {
        if total < 0 {
            return -1;
        }
        self.shard_chunks(total)
            .iter()
            .map(|chunk| (chunk + BITROT_HEADER_LEN) as i64)
            .sum()
    }

    /// Splits one input block into `data` shards (zero-padded tail) and
    /// computes `parity` recovery shards of the same size.
    pub fn encode_data(&self, block: &[u8]) -> Result<Vec<Vec<u8>>> {
        if block.is_empty() || block.len() > self.block_size {
            return Err(OsmioError::InvalidArgument(format!(
                "invalid erasure block length: {}",
                block.len()
            )));
        }

        let shard_size = self.shard_size(block.len());
        let mut payload = vec![0_u8; shard_size * self.data_blocks];
        payload[..block.len()].copy_from_slice(block);

        let mut encoder =
            ReedSolomonEncoder::new(self.data_blocks, self.parity_blocks, shard_size)
                .map_err(map_reed_solomon_error)?;

        let mut shards = Vec::with_capacity(self.total_shards());
        for shard_idx in 0..self.data_blocks {
            let start = shard_idx * shard_size;
            let shard = &payload[start..start + shard_size];
            encoder
                .add_original_shard(shard)
                .map_err(map_reed_solomon_error)?;
            shards.push(shard.to_vec());
        }

        let encoded = encoder.encode().map_err(map_reed_solomon_error)?;
        for recovery in encoded.recovery_iter() {
            shards.push(recovery.to_vec());
        }

        Ok(shards)
    }

    /// Rebuilds one input block of `block_len` bytes from any `data` of the
    /// `data + parity` shards.
    pub fn decode_data(
        &self,
        shards: &[Option<Vec<u8>>],
        block_len: usize,
    ) -> Result<Vec<u8>> {
        if shards.len() != self.total_shards() {
            return Err(OsmioError::InvalidArgument(format!(
                "invalid shard count: expected {}, got {}",
                self.total_shards(),
                shards.len()
            )));
        }

        let shard_size = self.shard_size(block_len);
        let available = shards.iter().flatten().count();
        if available < self.data_blocks {
            return Err(OsmioError::ReadQuorumNotMet {
                have: available,
                want: self.data_blocks,
            });
        }
        for shard in shards.iter().flatten() {
            if shard.len() != shard_size {
                return Err(OsmioError::InvalidArgument(format!(
                    "invalid shard size: expected {shard_size}, got {}",
                    shard.len()
                )));
            }
        }

        let mut decoder =
            ReedSolomonDecoder::new(self.data_blocks, self.parity_blocks, shard_size)
                .map_err(map_reed_solomon_error)?;

        for (idx, shard) in shards.iter().take(self.data_blocks).enumerate() {
            if let Some(bytes) = shard {
                decoder
                    .add_original_shard(idx, bytes)
                    .map_err(map_reed_solomon_error)?;
            }
        }
        for (parity_idx, shard) in shards.iter().skip(self.data_blocks).enumerate() {
            if let Some(bytes) = shard {
                decoder
                    .add_recovery_shard(parity_idx, bytes)
                    .map_err(map_reed_solomon_error)?;
            }
        }

        let decoded = decoder.decode().map_err(map_reed_solomon_error)?;
        let mut block = vec![0_u8; self.data_blocks * shard_size];
        for (idx, shard) in shards.iter().take(self.data_blocks).enumerate() {
            if let Some(bytes) = shard {
                block[idx * shard_size..(idx + 1) * shard_size].copy_from_slice(bytes);
            }
        }
        for (idx, bytes) in decoded.restored_original_iter() {
            if idx < self.data_blocks {
                block[idx * shard_size..(idx + 1) * shard_size].copy_from_slice(bytes);
            }
        }

        block.truncate(block_len);
        Ok(block)
    }

    /// Reads the stream block by block, fans each encoded block out to the
    /// shard writers, and drops writers that fail. Aborts once fewer than
    /// `quorum` writers remain live, since any smaller set can never be
    /// read back even with parity.
    pub async fn encode_stream<R>(
        &self,
        reader: &mut R,
        writers: &mut [Option<BitrotWriter>],
        buf: &mut [u8],
        quorum: usize,
    ) -> Result<i64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut total: i64 = 0;
        loop {
            let n = read_full(reader, buf).await?;
            if n == 0 {
                break;
            }
            total += n as i64;

            let shards = self.encode_data(&buf[..n])?;
            let results = join_all(writers.iter_mut().zip(&shards).map(
                |(writer, shard)| async move {
                    match writer {
                        Some(writer) => writer.write(shard).await,
                        None => Err(OsmioError::DiskNotFound),
                    }
                },
            ))
            .await;

            for (writer, result) in writers.iter_mut().zip(&results) {
                if result.is_err() {
                    *writer = None;
                }
            }
            let live = writers.iter().filter(|w| w.is_some()).count();
            if live < quorum {
                return Err(OsmioError::WriteQuorumNotMet {
                    have: live,
                    want: quorum,
                });
            }

            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn map_reed_solomon_error(error: reed_solomon_simd::Error) -> OsmioError {
    OsmioError::InternalError(format!("reed-solomon error: {error}"))
}
