//! 临时文件存储模块
//!
//! # 设计思路
//!
//! 预处理 / 后处理产生的文件统一落在临时根目录下，每个存储实例独占一个子目录，
//! 再以内容（或 URL）哈希分子目录，同一份内容只写一次；所有产出路径登记到注册表，
//! 调用方可显式 `cleanup()`，且只会删除本实例目录内的文件。
//!
//! # 实现思路
//!
//! - 根目录优先取配置项，其次环境变量 `IMAGE_SLIDER_TEMP_DIR`，最后回退到系统临时目录下的 `image-slider`。
//! - 实例目录由 `tempfile::Builder` 在根目录下创建并保留（`keep`），实例销毁后文件仍可被调用方读取。
//! - 路径形如 `<root>/slider-XXXX/<sha256 hex>/<文件名>`，目标已存在时直接复用。
//! - 每次写入使用独立的 `NamedTempFile` 暂存，再 `persist_noclobber` 到目标；
//!   并发写入同一内容时落后的一方发现目标已存在即视为成功。
//! - 注册表为 `Mutex<BTreeSet<PathBuf>>`；锁中毒按资源错误返回。
//! - 所有可能失败的操作均返回 `Result`，不使用 `expect()` / `unwrap()`。

use image::ImageFormat;
use once_cell::sync::Lazy;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::image_payload::{DecodedImage, ImageError, ImageSlider};

/// 指定默认临时根目录的环境变量。
pub const TEMP_DIR_ENV: &str = "IMAGE_SLIDER_TEMP_DIR";

static DEFAULT_TEMP_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var_os(TEMP_DIR_ENV)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("image-slider"))
});

/// 存储目录信息
#[derive(Debug, Clone, Serialize)]
pub struct StorageInfo {
    pub path: String,
    pub total_size: u64,
    pub file_count: u64,
}

/// 带登记表的临时文件存储。
#[derive(Debug)]
pub struct TempStorage {
    /// 本实例独占的目录（位于共享根目录之下）。
    root: PathBuf,
    registry: Mutex<BTreeSet<PathBuf>>,
}

impl TempStorage {
    /// 在指定根目录下创建本实例独占的子目录，根目录不存在时自动创建。
    pub fn new(base: PathBuf) -> Result<Self, ImageError> {
        fs::create_dir_all(&base).map_err(|e| {
            ImageError::FileSystem(format!("创建临时目录 '{}' 失败: {}", base.display(), e))
        })?;

        let root = tempfile::Builder::new()
            .prefix("slider-")
            .tempdir_in(&base)
            .map_err(|e| {
                ImageError::FileSystem(format!("在 '{}' 下创建实例目录失败: {}", base.display(), e))
            })?
            .keep();
        log::debug!("📂 临时存储目录: {}", root.display());

        Ok(Self {
            root,
            registry: Mutex::new(BTreeSet::new()),
        })
    }

    /// 按配置解析根目录：显式目录优先，否则使用默认目录。
    pub fn from_config(temp_dir: Option<&PathBuf>) -> Result<Self, ImageError> {
        let root = temp_dir
            .filter(|dir| !dir.as_os_str().is_empty())
            .cloned()
            .unwrap_or_else(|| Self::default_temp_dir().to_path_buf());
        Self::new(root)
    }

    /// 默认临时根目录（进程内首次访问时解析环境变量）。
    pub fn default_temp_dir() -> &'static Path {
        DEFAULT_TEMP_DIR.as_path()
    }

    /// 本实例的存储目录。
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 登记一个由本存储产出的路径。
    pub fn register(&self, path: &Path) -> Result<(), ImageError> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|_| ImageError::ResourceLimit("临时文件登记表锁已损坏".to_string()))?;
        registry.insert(path.to_path_buf());
        Ok(())
    }

    /// 已登记路径的快照（有序）。
    pub fn paths(&self) -> Vec<PathBuf> {
        match self.registry.lock() {
            Ok(registry) => registry.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        match self.registry.lock() {
            Ok(registry) => registry.contains(path),
            Err(_) => false,
        }
    }

    /// 将字节写入 `<root>/<hash(bytes)>/<file_name>`，已存在则复用。
    pub fn materialize_bytes(&self, bytes: &[u8], file_name: &str) -> Result<PathBuf, ImageError> {
        let path = self.hashed_path(bytes, file_name);
        Self::write_if_absent(&path, bytes)?;
        self.register(&path)?;
        Ok(path)
    }

    /// 解码 Base64（支持 Data URL）后按内容哈希落盘。
    pub fn materialize_base64(
        &self,
        data: &str,
        file_name: &str,
        max_file_size: u64,
    ) -> Result<PathBuf, ImageError> {
        let bytes = ImageSlider::parse_base64_with_limit(data, max_file_size)?;
        self.materialize_bytes(&bytes, file_name)
    }

    /// 将本地文件复制到 `<root>/<hash(内容)>/<文件名>`；已登记或目标已存在时跳过复制。
    pub fn copy_to_temp_if_absent(&self, source: &Path) -> Result<PathBuf, ImageError> {
        if self.contains(source) {
            return Ok(source.to_path_buf());
        }

        let bytes = fs::read(source).map_err(|e| {
            ImageError::FileSystem(format!("无法读取文件 '{}': {}", source.display(), e))
        })?;
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let path = self.hashed_path(&bytes, &file_name);
        if !path.exists() {
            log::debug!("📋 复制文件到临时目录: {}", path.display());
        }
        Self::write_if_absent(&path, &bytes)?;
        self.register(&path)?;
        Ok(path)
    }

    /// 将 URL 内容下载到 `<root>/<hash(url)>/<文件名>`。
    ///
    /// 目标已存在时不会再次调用 `fetch`，同一 URL 只下载一次。
    pub fn download_to_temp_copy<F>(&self, url: &str, fetch: F) -> Result<PathBuf, ImageError>
    where
        F: FnOnce(&str) -> Result<Vec<u8>, ImageError>,
    {
        let file_name = Self::url_file_name(url);
        let path = self.hashed_path(url.as_bytes(), &file_name);

        if path.exists() {
            log::debug!("♻️ 命中已下载副本: {}", path.display());
        } else {
            let bytes = fetch(url)?;
            Self::write_if_absent(&path, &bytes)?;
        }

        self.register(&path)?;
        Ok(path)
    }

    /// 将图像对象保存为文件。
    ///
    /// 优先使用解码时识别到的源格式；该格式无法编码当前模式时回退到 PNG。
    pub fn save_image(&self, image: &DecodedImage) -> Result<PathBuf, ImageError> {
        let preferred = image.format().unwrap_or(ImageFormat::Png);

        let (format, bytes) = match image.encode(preferred) {
            Ok(bytes) => (preferred, bytes),
            Err(err) if preferred != ImageFormat::Png => {
                log::warn!("⚠️ 无法按 {:?} 保存，回退为 PNG：{}", preferred, err);
                (ImageFormat::Png, image.encode_png()?)
            }
            Err(err) => return Err(err),
        };

        let extension = format.extensions_str().first().copied().unwrap_or("png");
        self.materialize_bytes(&bytes, &format!("image.{}", extension))
    }

    /// 统计本实例目录下的占用（递归）。
    pub fn usage(&self) -> Result<StorageInfo, ImageError> {
        let mut total_size: u64 = 0;
        let mut file_count: u64 = 0;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    if metadata.is_dir() {
                        pending.push(entry.path());
                    } else if metadata.is_file() {
                        total_size += metadata.len();
                        file_count += 1;
                    }
                }
            }
        }

        Ok(StorageInfo {
            path: self.root.to_string_lossy().to_string(),
            total_size,
            file_count,
        })
    }

    /// 删除所有已登记文件及随之变空的哈希目录，返回删除的文件数。
    ///
    /// 只处理本实例目录内的路径，其他实例产出的文件不受影响。
    pub fn cleanup(&self) -> Result<usize, ImageError> {
        let paths: Vec<PathBuf> = {
            let mut registry = self
                .registry
                .lock()
                .map_err(|_| ImageError::ResourceLimit("临时文件登记表锁已损坏".to_string()))?;
            std::mem::take(&mut *registry).into_iter().collect()
        };

        let mut removed = 0;
        for path in paths {
            if !path.starts_with(&self.root) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ImageError::FileSystem(format!(
                        "删除临时文件 '{}' 失败: {}",
                        path.display(),
                        e
                    )));
                }
            }

            if let Some(parent) = path.parent() {
                if parent != self.root && parent.starts_with(&self.root) {
                    // 目录非空时 remove_dir 失败，忽略即可
                    let _ = fs::remove_dir(parent);
                }
            }
        }

        log::info!("🧹 已清理临时文件 {} 个", removed);
        Ok(removed)
    }

    fn hashed_path(&self, key: &[u8], file_name: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key));
        self.root.join(digest).join(file_name)
    }

    fn url_file_name(url: &str) -> String {
        reqwest::Url::parse(url)
            .ok()
            .and_then(|parsed| {
                parsed
                    .path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "file".to_string())
    }

    fn write_if_absent(path: &Path, bytes: &[u8]) -> Result<(), ImageError> {
        if path.exists() {
            return Ok(());
        }

        let parent = path
            .parent()
            .ok_or_else(|| ImageError::FileSystem(format!("路径缺少父目录: {}", path.display())))?;
        fs::create_dir_all(parent).map_err(|e| {
            ImageError::FileSystem(format!("创建目录 '{}' 失败: {}", parent.display(), e))
        })?;

        let mut staging = tempfile::Builder::new()
            .prefix(".staging-")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(|e| ImageError::FileSystem(format!("创建暂存文件失败: {}", e)))?;
        staging
            .write_all(bytes)
            .map_err(|e| ImageError::FileSystem(format!("写入暂存文件失败: {}", e)))?;

        match staging.persist_noclobber(path) {
            Ok(_) => Ok(()),
            // 并发写入同一内容，另一方已先落盘
            Err(_) if path.exists() => Ok(()),
            Err(e) => Err(ImageError::FileSystem(format!(
                "移动文件到 '{}' 失败: {}",
                path.display(),
                e.error
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_payload::ImageMode;

    fn storage() -> (tempfile::TempDir, TempStorage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = TempStorage::new(dir.path().join("store")).expect("storage");
        (dir, storage)
    }

    #[test]
    fn materialize_bytes_is_idempotent() {
        let (_dir, storage) = storage();

        let first = storage.materialize_bytes(b"abc", "file.png").expect("first write");
        let second = storage.materialize_bytes(b"abc", "file.png").expect("second write");

        assert_eq!(first, second);
        assert_eq!(fs::read(&first).expect("read back"), b"abc");
        assert_eq!(storage.paths(), vec![first]);
    }

    #[test]
    fn different_content_lands_in_different_directories() {
        let (_dir, storage) = storage();

        let a = storage.materialize_bytes(b"a", "file.png").expect("write a");
        let b = storage.materialize_bytes(b"b", "file.png").expect("write b");

        assert_ne!(a.parent(), b.parent());
        assert_eq!(storage.paths().len(), 2);
    }

    #[test]
    fn copy_keeps_basename_and_skips_registered_sources() {
        let (dir, storage) = storage();
        let source = dir.path().join("photo.jpg");
        fs::write(&source, b"jpeg-ish").expect("write source");

        let copy = storage.copy_to_temp_if_absent(&source).expect("copy");
        assert!(copy.starts_with(storage.root()));
        assert_eq!(copy.file_name().and_then(|n| n.to_str()), Some("photo.jpg"));

        let again = storage.copy_to_temp_if_absent(&copy).expect("registered copy");
        assert_eq!(again, copy);
    }

    #[test]
    fn copy_of_missing_file_is_filesystem_error() {
        let (dir, storage) = storage();
        let result = storage.copy_to_temp_if_absent(&dir.path().join("missing.png"));

        assert!(matches!(result, Err(ImageError::FileSystem(_))));
    }

    #[test]
    fn download_fetches_each_url_once() {
        let (_dir, storage) = storage();
        let url = "https://example.com/images/cat.png?size=large";

        let first = storage
            .download_to_temp_copy(url, |_| Ok(b"cat".to_vec()))
            .expect("first download");
        let second = storage
            .download_to_temp_copy(url, |_| Err(ImageError::Network("should not fetch".to_string())))
            .expect("cached download");

        assert_eq!(first, second);
        assert_eq!(first.file_name().and_then(|n| n.to_str()), Some("cat.png"));
    }

    #[test]
    fn url_without_basename_uses_placeholder() {
        assert_eq!(TempStorage::url_file_name("https://example.com/"), "file");
        assert_eq!(TempStorage::url_file_name("https://example.com/a/b.webp"), "b.webp");
    }

    #[test]
    fn save_image_falls_back_to_png_when_format_cannot_encode() {
        let (_dir, storage) = storage();
        let rgba = DecodedImage::from_u8(1, 1, ImageMode::Rgba, vec![1, 2, 3, 4])
            .expect("build image")
            .with_format(Some(ImageFormat::Jpeg));

        let path = storage.save_image(&rgba).expect("save");

        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
    }

    #[test]
    fn concurrent_writers_of_the_same_content_all_succeed() {
        let (_dir, storage) = storage();
        let payload = vec![7u8; 256 * 1024];

        for round in 0..10u8 {
            let mut bytes = payload.clone();
            bytes[0] = round;
            let results: Vec<_> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..8)
                    .map(|_| scope.spawn(|| storage.materialize_bytes(&bytes, "file.png")))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("writer thread"))
                    .collect()
            });

            let first = results[0].as_ref().expect("write").clone();
            for result in &results {
                assert_eq!(result.as_ref().expect("write"), &first);
            }
            assert_eq!(fs::read(&first).expect("read back"), bytes);
        }

        assert_eq!(storage.paths().len(), 10);
        let leftovers = fs::read_dir(storage.root())
            .expect("list root")
            .flatten()
            .flat_map(|entry| fs::read_dir(entry.path()).into_iter().flatten().flatten())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn instances_sharing_a_base_do_not_clean_each_other() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = TempStorage::new(dir.path().to_path_buf()).expect("storage a");
        let b = TempStorage::new(dir.path().to_path_buf()).expect("storage b");
        assert_ne!(a.root(), b.root());

        let from_a = a.materialize_bytes(b"same", "file.png").expect("write a");
        let from_b = b.materialize_bytes(b"same", "file.png").expect("write b");
        assert_ne!(from_a, from_b);

        assert_eq!(a.cleanup().expect("cleanup a"), 1);
        assert!(!from_a.exists());
        assert_eq!(fs::read(&from_b).expect("b's file survives"), b"same");
    }

    #[test]
    fn inline_base64_is_materialized_once() {
        let (_dir, storage) = storage();

        let first = storage
            .materialize_base64("data:image/png;base64,SGVsbG8=", "upload.png", 1024)
            .expect("first");
        let second = storage.materialize_base64("SGVsbG8=", "upload.png", 1024).expect("second");

        assert_eq!(first, second);
        assert_eq!(fs::read(&first).expect("read back"), b"Hello");
        assert!(matches!(
            storage.materialize_base64("SGVsbG8=", "upload.png", 1),
            Err(ImageError::ResourceLimit(_))
        ));
    }

    #[test]
    fn usage_and_cleanup_track_registered_files() {
        let (_dir, storage) = storage();
        storage.materialize_bytes(b"12345", "a.bin").expect("write a");
        storage.materialize_bytes(b"678", "b.bin").expect("write b");

        let info = storage.usage().expect("usage");
        assert_eq!(info.file_count, 2);
        assert_eq!(info.total_size, 8);

        assert_eq!(storage.cleanup().expect("cleanup"), 2);
        assert!(storage.paths().is_empty());
        assert_eq!(storage.usage().expect("usage").file_count, 0);
    }
}
