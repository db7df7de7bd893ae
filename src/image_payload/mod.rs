//! # 图片载荷转换模块（image_payload）
//!
//! ## 设计思路
//!
//! 该模块将"前端载荷 → 图像对象 → 用户回调形态"以及反方向的"回调返回值 → 临时文件引用"
//! 按职责拆分为多个子模块，避免单文件膨胀与耦合。
//!
//! - `handler`：`ImageSlider` 编排预处理 / 后处理整条链路
//! - `loader`：负责 Base64 / 文件 / URL 加载与安全校验
//! - `pipeline`：负责解码、像素限制、裁剪缩放、反相、镜像、蒙版白化
//! - `format`：按输出类型格式化（数组 / 图像对象 / 文件路径）
//! - `picture` / `color`：图像对象与色彩模式转换
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 实现思路
//!
//! 对外暴露类型与纯函数，内部加载细节保持 `mod` 私有。
//! 临时文件统一交给 `crate::storage::TempStorage` 管理。
//!
//! ## 新同事快速上手
//!
//! 可以按下面顺序理解调用链：
//!
//! ```text
//! 前端载荷（WirePayload）
//!    ↓
//! handler.rs（sketch 拆分 + 阶段耗时日志）
//!    ├─ loader.rs（来源加载 + 体积 / 签名校验）
//!    ├─ pipeline.rs（解码 + 模式转换 + fit / invert / mirror）
//!    └─ format.rs（数组 / 图像对象 / 临时文件）
//!    ↓
//! Preprocessed 交给用户回调
//!    ↓
//! 回调返回 OutputValue → handler.rs::postprocess → FileData
//! ```
//!
//! ## 分层职责建议
//!
//! - 配置项与默认值变更优先改 `config.rs`
//! - 处理顺序变更优先改 `handler.rs`
//! - 单阶段行为优化分别改 `loader/pipeline/format`
//! - 色彩公式问题优先看 `color.rs`

mod color;
mod config;
mod error;
mod format;
mod handler;
mod loader;
mod picture;
pub mod pipeline;
mod source;

pub use color::ImageMode;
pub use config::{
    CaptureSource,
    ComponentConfig,
    EditTool,
    Event,
    ImageConfig,
    ImageOptions,
    ImageType,
    ImageUpdate,
    LoaderConfig,
    Shape,
    UpdateValue,
};
pub use error::ImageError;
pub use format::{PixelArray, format_image};
pub use handler::ImageSlider;
pub use picture::DecodedImage;
pub use source::{AppImage, FileData, OutputValue, Preprocessed, WireImage, WirePayload};
