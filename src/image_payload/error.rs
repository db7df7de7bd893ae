//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载图片转换链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! - `Configuration`：构造期配置非法，组件无法创建
//! - `UnsupportedValue`：后处理收到无法识别为图片的值
//! - 其余分支对应加载、解码、编码、存储阶段的失败

/// 图片转换统一错误类型。
///
/// 宿主框架可通过 `code()` / `stage()` 获取稳定标识，用于结构化上报。
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("配置错误：{0}")]
    Configuration(String),

    #[error("无法将该值处理为图片：{0}")]
    UnsupportedValue(String),

    #[error("输入结构错误：{0}")]
    InvalidPayload(String),

    #[error("色彩模式不支持：{0}")]
    UnsupportedMode(String),

    #[error("网络错误：{0}")]
    Network(String),

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("编码错误：{0}")]
    Encode(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),
}

impl ImageError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION",
            Self::UnsupportedValue(_) => "UNSUPPORTED_VALUE",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::UnsupportedMode(_) => "UNSUPPORTED_MODE",
            Self::Network(_) => "NETWORK",
            Self::Decode(_) => "DECODE",
            Self::Encode(_) => "ENCODE",
            Self::InvalidFormat(_) => "INVALID_FORMAT",
            Self::FileSystem(_) => "FILE_SYSTEM",
            Self::Timeout(_) => "TIMEOUT",
            Self::ResourceLimit(_) => "RESOURCE_LIMIT",
        }
    }

    /// 错误所属阶段，便于宿主区分"组件创建失败"与"单次请求失败"。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "setup",
            Self::Network(_) | Self::Timeout(_) => "download",
            Self::Decode(_) | Self::InvalidFormat(_) | Self::ResourceLimit(_) => "load",
            Self::InvalidPayload(_) | Self::UnsupportedMode(_) => "preprocess",
            Self::UnsupportedValue(_) | Self::Encode(_) => "postprocess",
            Self::FileSystem(_) => "storage",
        }
    }
}
