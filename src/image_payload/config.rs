//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有"可调策略"集中到 `ImageOptions`（构造入参）与 `ImageConfig`（校验后的只读快照）。
//! 组件创建后配置不可变；运行期的变更只能通过 `ImageUpdate` 生成稀疏覆盖记录交给宿主。
//!
//! ## 实现思路
//!
//! - 字符串取值（type / source / tool / image_mode）只在解析边界出现一次，
//!   统一通过 `FromStr` 转为封闭枚举，非法值直接返回 `ImageError::Configuration`。
//! - `Default` 提供与前端组件一致的默认值（mirror_webcam=true、min_width=160 等）。
//! - `LoaderConfig` 承载下载与解码阶段的资源上限与网络安全策略。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::color::ImageMode;
use super::source::{FileData, OutputValue};
use super::ImageError;

/// 预处理输出给用户回调的表示形式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageType {
    /// 数值数组（`PixelArray`）。
    #[default]
    Array,
    /// 图像对象（`DecodedImage`）。
    Object,
    /// 临时文件路径。
    Filepath,
}

/// 图像采集来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CaptureSource {
    #[default]
    Upload,
    Webcam,
    Canvas,
}

/// 编辑工具。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EditTool {
    /// 全屏编辑器。
    Editor,
    /// 裁剪 / 缩放工具。
    Select,
    /// 二值草图；与 upload / webcam 组合时同时产出蒙版。
    Sketch,
    /// 彩色草图。
    ColorSketch,
}

macro_rules! string_enum {
    ($ty:ident, $field:literal, [$($variant:ident => $canonical:literal $(| $alias:literal)*),+ $(,)?]) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $canonical,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = ImageError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim() {
                    $($canonical $(| $alias)* => Ok(Self::$variant),)+
                    other => Err(ImageError::Configuration(format!(
                        "参数 `{}` 取值无效：{}（可选：{}）",
                        $field,
                        other,
                        [$($canonical),+].join(" / ")
                    ))),
                }
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ImageError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(ImageType, "type", [
    Array => "numpy" | "array",
    Object => "pil" | "object",
    Filepath => "filepath",
]);

string_enum!(CaptureSource, "source", [
    Upload => "upload",
    Webcam => "webcam" | "camera",
    Canvas => "canvas",
]);

string_enum!(EditTool, "tool", [
    Editor => "editor",
    Select => "select" | "crop",
    Sketch => "sketch",
    ColorSketch => "color-sketch",
]);

/// 裁剪缩放目标尺寸；缺省的一边沿用输入尺寸。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Shape {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// 加载阶段的资源与网络策略。
///
/// 字段覆盖了下载、读取与解码三个阶段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// 下载/读取原始字节时允许的最大文件体积（字节）。
    pub max_file_size: u64,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 网络下载超时时间（秒）。
    pub download_timeout: u64,
    /// 建立连接（TCP/TLS）超时时间（秒）。
    pub connect_timeout: u64,
    /// 最大重定向次数，避免无限跳转或恶意链路。
    pub max_redirects: usize,
    /// 是否允许访问内网或本地地址（默认关闭，防 SSRF）。
    pub allow_private_network: bool,
    /// 是否对域名执行 DNS 解析后再做内网 IP 拦截。
    pub resolve_dns_for_url_safety: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            download_timeout: 30,
            connect_timeout: 8,
            max_redirects: 5,
            allow_private_network: false,
            resolve_dns_for_url_safety: true,
        }
    }
}

impl LoaderConfig {
    fn validate(&self) -> Result<(), ImageError> {
        if self.max_file_size < 1024 {
            return Err(ImageError::Configuration("max_file_size 不能小于 1KB".to_string()));
        }
        if self.max_decoded_pixels == 0 {
            return Err(ImageError::Configuration("max_decoded_pixels 必须大于 0".to_string()));
        }
        if !(1..=600).contains(&self.download_timeout) {
            return Err(ImageError::Configuration("download_timeout 必须在 1~600 秒之间".to_string()));
        }
        if !(1..=120).contains(&self.connect_timeout) {
            return Err(ImageError::Configuration("connect_timeout 必须在 1~120 秒之间".to_string()));
        }
        Ok(())
    }
}

/// 组件构造入参。
///
/// 可直接以结构体字面量构造，也可从 JSON 反序列化（未出现的字段取默认值）。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    /// 初始值：数组、图像对象、路径或 URL，构造时即做一次后处理。
    pub value: Option<OutputValue>,
    pub shape: Option<Shape>,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub image_mode: ImageMode,
    pub invert_colors: bool,
    pub source: CaptureSource,
    /// 缺省时 canvas 使用 sketch，其余使用 editor。
    pub tool: Option<EditTool>,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub label: Option<String>,
    pub every: Option<f64>,
    pub show_label: Option<bool>,
    pub show_download_button: bool,
    pub container: bool,
    pub scale: Option<u32>,
    pub min_width: u32,
    pub interactive: Option<bool>,
    pub visible: bool,
    pub streaming: bool,
    pub elem_id: Option<String>,
    pub elem_classes: Vec<String>,
    pub mirror_webcam: bool,
    pub brush_radius: Option<f64>,
    pub brush_color: String,
    pub mask_opacity: f64,
    /// 缺省时按是否运行在托管空间（`SPACE_ID` 环境变量）决定。
    pub show_share_button: Option<bool>,
    pub selectable: bool,
    /// 设置后示例值视为外部托管，不再转换为绝对路径。
    pub root_url: Option<String>,
    /// 临时文件根目录；缺省见 `TempStorage::default_temp_dir`。
    pub temp_dir: Option<PathBuf>,
    pub loader: LoaderConfig,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            value: None,
            shape: None,
            height: None,
            width: None,
            image_mode: ImageMode::Rgb,
            invert_colors: false,
            source: CaptureSource::Upload,
            tool: None,
            image_type: ImageType::Array,
            label: None,
            every: None,
            show_label: None,
            show_download_button: true,
            container: true,
            scale: None,
            min_width: 160,
            interactive: None,
            visible: true,
            streaming: false,
            elem_id: None,
            elem_classes: Vec::new(),
            mirror_webcam: true,
            brush_radius: None,
            brush_color: "#000000".to_string(),
            mask_opacity: 0.7,
            show_share_button: None,
            selectable: false,
            root_url: None,
            temp_dir: None,
            loader: LoaderConfig::default(),
        }
    }
}

impl ImageOptions {
    /// 从 JSON 解析构造入参，任何字段错误都视为配置错误。
    pub fn from_json(json: &str) -> Result<Self, ImageError> {
        serde_json::from_str(json)
            .map_err(|e| ImageError::Configuration(format!("组件配置解析失败：{}", e)))
    }
}

/// 校验后的只读配置。
#[derive(Debug, Clone)]
pub struct ImageConfig {
    options: ImageOptions,
    tool: EditTool,
    show_share_button: bool,
}

impl ImageConfig {
    /// 校验入参并解析派生字段。
    ///
    /// # 示例
    /// ```rust
    /// use image_slider::image_payload::{CaptureSource, EditTool, ImageConfig, ImageOptions};
    ///
    /// let config = ImageConfig::new(ImageOptions {
    ///     source: CaptureSource::Canvas,
    ///     ..ImageOptions::default()
    /// })?;
    /// assert_eq!(config.tool(), EditTool::Sketch);
    /// # Ok::<(), image_slider::image_payload::ImageError>(())
    /// ```
    pub fn new(mut options: ImageOptions) -> Result<Self, ImageError> {
        if options.streaming && options.source != CaptureSource::Webcam {
            return Err(ImageError::Configuration(
                "仅当 source 为 'webcam' 时才支持图片流式输入".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&options.mask_opacity) {
            return Err(ImageError::Configuration(format!(
                "mask_opacity 必须在 0~1 之间：{}",
                options.mask_opacity
            )));
        }
        options.loader.validate()?;

        let tool = options.tool.unwrap_or(match options.source {
            CaptureSource::Canvas => EditTool::Sketch,
            _ => EditTool::Editor,
        });
        let show_share_button = options
            .show_share_button
            .unwrap_or_else(|| std::env::var_os("SPACE_ID").is_some());

        // 初始值由组件单独持有，配置快照里不保留原始对象
        options.value = None;

        Ok(Self {
            options,
            tool,
            show_share_button,
        })
    }

    pub fn image_type(&self) -> ImageType {
        self.options.image_type
    }

    pub fn image_mode(&self) -> ImageMode {
        self.options.image_mode
    }

    pub fn shape(&self) -> Option<Shape> {
        self.options.shape
    }

    pub fn invert_colors(&self) -> bool {
        self.options.invert_colors
    }

    pub fn source(&self) -> CaptureSource {
        self.options.source
    }

    pub fn tool(&self) -> EditTool {
        self.tool
    }

    pub fn streaming(&self) -> bool {
        self.options.streaming
    }

    pub fn root_url(&self) -> Option<&str> {
        self.options.root_url.as_deref()
    }

    pub fn temp_dir(&self) -> Option<&PathBuf> {
        self.options.temp_dir.as_ref()
    }

    pub fn loader(&self) -> &LoaderConfig {
        &self.options.loader
    }

    /// sketch 工具配合 upload / webcam 时，输入为 `{image, mask}` 结构。
    pub fn expects_mask(&self) -> bool {
        self.tool == EditTool::Sketch
            && matches!(self.options.source, CaptureSource::Upload | CaptureSource::Webcam)
    }

    /// webcam 来源、开启镜像且不是彩色草图时做水平镜像。
    pub fn should_mirror(&self) -> bool {
        self.options.source == CaptureSource::Webcam
            && self.options.mirror_webcam
            && self.tool != EditTool::ColorSketch
    }

    /// 生成前端使用的配置快照。
    pub(crate) fn snapshot(&self, value: Option<FileData>) -> ComponentConfig {
        let o = &self.options;
        ComponentConfig {
            image_mode: o.image_mode,
            shape: o.shape,
            height: o.height,
            width: o.width,
            source: o.source,
            tool: self.tool,
            value,
            streaming: o.streaming,
            mirror_webcam: o.mirror_webcam,
            brush_radius: o.brush_radius,
            brush_color: o.brush_color.clone(),
            mask_opacity: o.mask_opacity,
            selectable: o.selectable,
            show_share_button: self.show_share_button,
            show_download_button: o.show_download_button,
            label: o.label.clone(),
            show_label: o.show_label,
            container: o.container,
            scale: o.scale,
            min_width: o.min_width,
            interactive: o.interactive,
            visible: o.visible,
            elem_id: o.elem_id.clone(),
            elem_classes: o.elem_classes.clone(),
            every: o.every,
            root_url: o.root_url.clone(),
        }
    }
}

/// 组件配置快照（序列化后交给前端）。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentConfig {
    pub image_mode: ImageMode,
    pub shape: Option<Shape>,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub source: CaptureSource,
    pub tool: EditTool,
    pub value: Option<FileData>,
    pub streaming: bool,
    pub mirror_webcam: bool,
    pub brush_radius: Option<f64>,
    pub brush_color: String,
    pub mask_opacity: f64,
    pub selectable: bool,
    pub show_share_button: bool,
    pub show_download_button: bool,
    pub label: Option<String>,
    pub show_label: Option<bool>,
    pub container: bool,
    pub scale: Option<u32>,
    pub min_width: u32,
    pub interactive: Option<bool>,
    pub visible: bool,
    pub elem_id: Option<String>,
    pub elem_classes: Vec<String>,
    pub every: Option<f64>,
    pub root_url: Option<String>,
}

/// `update` 中的取值指令。
#[derive(Debug, Clone, Default, PartialEq)]
pub enum UpdateValue {
    /// 不修改当前值（序列化时省略 `value` 键）。
    #[default]
    Keep,
    /// 清空当前值。
    Clear,
    /// 设置为新值（已由宿主完成后处理的 JSON 表示）。
    Set(serde_json::Value),
}

/// 稀疏覆盖记录，只包含运行期可改的展示属性。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageUpdate {
    pub value: UpdateValue,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub label: Option<String>,
    pub show_label: Option<bool>,
    pub show_download_button: Option<bool>,
    pub container: Option<bool>,
    pub scale: Option<u32>,
    pub min_width: Option<u32>,
    pub interactive: Option<bool>,
    pub visible: Option<bool>,
    pub brush_radius: Option<f64>,
    pub brush_color: Option<String>,
    pub mask_opacity: Option<f64>,
    pub show_share_button: Option<bool>,
}

impl ImageUpdate {
    /// 生成带 `"__type__": "update"` 标记的指令 JSON。
    pub fn into_directive(self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("height".into(), serde_json::json!(self.height));
        map.insert("width".into(), serde_json::json!(self.width));
        map.insert("label".into(), serde_json::json!(self.label));
        map.insert("show_label".into(), serde_json::json!(self.show_label));
        map.insert("show_download_button".into(), serde_json::json!(self.show_download_button));
        map.insert("container".into(), serde_json::json!(self.container));
        map.insert("scale".into(), serde_json::json!(self.scale));
        map.insert("min_width".into(), serde_json::json!(self.min_width));
        map.insert("interactive".into(), serde_json::json!(self.interactive));
        map.insert("visible".into(), serde_json::json!(self.visible));
        map.insert("brush_radius".into(), serde_json::json!(self.brush_radius));
        map.insert("brush_color".into(), serde_json::json!(self.brush_color));
        map.insert("mask_opacity".into(), serde_json::json!(self.mask_opacity));
        map.insert("show_share_button".into(), serde_json::json!(self.show_share_button));
        match self.value {
            UpdateValue::Keep => {}
            UpdateValue::Clear => {
                map.insert("value".into(), serde_json::Value::Null);
            }
            UpdateValue::Set(value) => {
                map.insert("value".into(), value);
            }
        }
        map.insert("__type__".into(), serde_json::json!("update"));
        serde_json::Value::Object(map)
    }
}

/// 组件对外暴露的事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Edit,
    Clear,
    Change,
    Stream,
    Select,
    Upload,
}
