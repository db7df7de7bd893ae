//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将"线上传输形态"和"应用侧形态"解耦：
//! - `WireImage` / `WirePayload` 表示前端送来的输入（data URL 或上传文件引用）
//! - `RawImageData` 表示已加载但未解码的字节
//! - `AppImage` / `Preprocessed` 表示交给用户回调的值
//! - `OutputValue` 表示用户回调返回、等待后处理的值
//! - `FileData` 是双向共用的文件引用

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::format::PixelArray;
use super::picture::DecodedImage;

/// 文件引用（上传输入与后处理输出共用）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    /// 服务端临时文件路径。
    pub name: String,
    /// 内联 base64 数据；后处理输出恒为 `None`。
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub is_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_name: Option<String>,
}

impl FileData {
    /// 指向服务端临时文件、不带内联数据的引用。
    pub fn reference(path: &Path) -> Self {
        Self {
            name: path.to_string_lossy().to_string(),
            data: None,
            is_file: true,
            orig_name: None,
        }
    }
}

/// 单张图片的传输形态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireImage {
    /// Base64（支持 Data URL 与纯 Base64 字符串）。
    DataUrl(String),
    /// 已上传到服务端的临时文件引用。
    Upload(FileData),
}

impl WireImage {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::DataUrl(data) => data.trim().is_empty(),
            Self::Upload(file) => file.name.trim().is_empty() && file.data.is_none(),
        }
    }
}

/// 预处理输入。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WirePayload {
    /// sketch 工具配合 upload / webcam 时的 `{image, mask}` 结构。
    Sketch {
        image: WireImage,
        #[serde(default)]
        mask: Option<WireImage>,
    },
    Single(WireImage),
}

impl From<WireImage> for WirePayload {
    fn from(image: WireImage) -> Self {
        Self::Single(image)
    }
}

/// 加载阶段输出：原始字节与来源标识。
pub(crate) struct RawImageData {
    /// 原始图片字节。
    pub(crate) bytes: Vec<u8>,
    /// 来源提示（用于日志与诊断）。
    pub(crate) source_hint: &'static str,
}

/// 交给用户回调的图片值。
#[derive(Debug, Clone, PartialEq)]
pub enum AppImage {
    Array(PixelArray),
    Image(DecodedImage),
    Filepath(PathBuf),
}

impl AppImage {
    pub fn as_array(&self) -> Option<&PixelArray> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&DecodedImage> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Filepath(path) => Some(path),
            _ => None,
        }
    }
}

/// 预处理结果：单张图片，或 sketch 模式下的图片 + 蒙版。
#[derive(Debug, Clone, PartialEq)]
pub enum Preprocessed {
    Image(AppImage),
    Sketch { image: AppImage, mask: AppImage },
}

impl Preprocessed {
    /// 主图（sketch 模式下为 `image` 字段）。
    pub fn image(&self) -> &AppImage {
        match self {
            Self::Image(image) | Self::Sketch { image, .. } => image,
        }
    }

    pub fn mask(&self) -> Option<&AppImage> {
        match self {
            Self::Image(_) => None,
            Self::Sketch { mask, .. } => Some(mask),
        }
    }
}

/// 等待后处理的值。
///
/// `Json` 承载宿主传入的任意动态值：字符串按路径 / URL 处理，其余类型一律拒绝。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum OutputValue {
    Array(PixelArray),
    Image(DecodedImage),
    Text(String),
    Path(PathBuf),
    Json(serde_json::Value),
}

impl OutputValue {
    /// 值的类别描述，用于错误信息。
    pub(crate) fn kind(&self) -> String {
        match self {
            Self::Array(_) => "array".to_string(),
            Self::Image(_) => "image".to_string(),
            Self::Text(_) => "string".to_string(),
            Self::Path(_) => "path".to_string(),
            Self::Json(value) => match value {
                serde_json::Value::Null => "null".to_string(),
                serde_json::Value::Bool(_) => "bool".to_string(),
                serde_json::Value::Number(n) => format!("number({})", n),
                serde_json::Value::String(_) => "string".to_string(),
                serde_json::Value::Array(_) => "list".to_string(),
                serde_json::Value::Object(_) => "object".to_string(),
            },
        }
    }
}

impl From<serde_json::Value> for OutputValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            other => Self::Json(other),
        }
    }
}

impl From<AppImage> for OutputValue {
    fn from(value: AppImage) -> Self {
        match value {
            AppImage::Array(array) => Self::Array(array),
            AppImage::Image(image) => Self::Image(image),
            AppImage::Filepath(path) => Self::Path(path),
        }
    }
}

impl From<PixelArray> for OutputValue {
    fn from(value: PixelArray) -> Self {
        Self::Array(value)
    }
}

impl From<DecodedImage> for OutputValue {
    fn from(value: DecodedImage) -> Self {
        Self::Image(value)
    }
}

impl From<&str> for OutputValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for OutputValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<PathBuf> for OutputValue {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}
