use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use osmio_common::error::{OsmioError, Result};
use tokio::fs;
use tokio::io::AsyncRead;

use super::{DiskApi, FileStat, MULTIPART_META_BUCKET, TMP_META_BUCKET};

/// Filesystem-backed disk. One `LocalDisk` owns one mount root; renames stay
/// inside that root, which keeps them metadata-only moves.
#[derive(Debug, Clone)]
pub struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        let disk = Self { root };
        disk.make_vol(TMP_META_BUCKET).await?;
        disk.make_vol(MULTIPART_META_BUCKET).await?;
        Ok(disk)
    }

    fn vol_path(&self, volume: &str) -> PathBuf {
        self.root.join(volume)
    }

    fn file_path(&self, volume: &str, path: &str) -> PathBuf {
        self.vol_path(volume).join(path)
    }
}

#[async_trait]
impl DiskApi for LocalDisk {
    async fn make_vol(&self, volume: &str) -> Result<()> {
        fs::create_dir_all(self.vol_path(volume)).await?;
        Ok(())
    }

    async fn stat_vol(&self, volume: &str) -> Result<()> {
        match fs::metadata(self.vol_path(volume)).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(OsmioError::VolumeNotFound(volume.to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(OsmioError::VolumeNotFound(volume.to_string()))
            }
            Err(err) => Err(OsmioError::Io(err)),
        }
    }

    async fn list_dir(&self, volume: &str, dir_path: &str, limit: i32) -> Result<Vec<String>> {
        let dir = if dir_path.is_empty() {
            self.vol_path(volume)
        } else {
            self.file_path(volume, dir_path)
        };

        let mut entries = fs::read_dir(dir).await.map_err(map_not_found)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
            if limit > 0 && names.len() >= limit as usize {
                break;
            }
        }
        names.sort();
        Ok(names)
    }

    async fn stat_file(&self, volume: &str, path: &str) -> Result<FileStat> {
        let meta = fs::metadata(self.file_path(volume, path))
            .await
            .map_err(map_not_found)?;
        if !meta.is_file() {
            return Err(OsmioError::FileNotFound);
        }
        let mod_time = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(FileStat {
            mod_time,
            size: i64::try_from(meta.len()).unwrap_or(i64::MAX),
        })
    }

    async fn delete(&self, volume: &str, path: &str, recursive: bool) -> Result<()> {
        let target = self.file_path(volume, path);
        let result = if recursive {
            fs::remove_dir_all(&target).await
        } else {
            match fs::remove_file(&target).await {
                Err(err) if err.kind() == std::io::ErrorKind::IsADirectory => {
                    fs::remove_dir(&target).await
                }
                other => other,
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(OsmioError::Io(err)),
        }
    }

    async fn rename_metadata(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> Result<()> {
        let src = self.file_path(src_volume, src_path);
        let meta = fs::metadata(&src).await.map_err(map_not_found)?;
        if !meta.is_file() {
            return Err(OsmioError::FileNotFound);
        }
        self.rename_file(src_volume, src_path, dst_volume, dst_path)
            .await
    }

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> Result<()> {
        let src = self.file_path(src_volume, src_path);
        let dst = self.file_path(dst_volume, dst_path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&src, &dst).await.map_err(map_not_found)?;
        Ok(())
    }

    async fn read_all(&self, volume: &str, path: &str) -> Result<Bytes> {
        let data = fs::read(self.file_path(volume, path))
            .await
            .map_err(map_not_found)?;
        Ok(Bytes::from(data))
    }

    async fn write_all(&self, volume: &str, path: &str, data: Bytes) -> Result<()> {
        let target = self.file_path(volume, path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(target, data).await?;
        Ok(())
    }

    async fn create_file(
        &self,
        volume: &str,
        path: &str,
        _file_size: i64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        let target = self.file_path(volume, path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(target).await?;
        tokio::io::copy(reader, &mut file).await?;
        Ok(())
    }

    async fn read_file(&self, volume: &str, path: &str) -> Result<Bytes> {
        self.read_all(volume, path).await
    }
}

fn map_not_found(err: std::io::Error) -> OsmioError {
    if err.kind() == std::io::ErrorKind::NotFound {
        OsmioError::FileNotFound
    } else {
        OsmioError::Io(err)
    }
}
