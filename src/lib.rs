//! # 图片对比组件：载荷转换库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              宿主框架 / 前端组件 (Image / ImageSlider)    │
//! │                                                          │
//! │   data URL · 上传文件引用 · {image, mask}                 │
//! └───────┬──────────────────────────────────────▲───────────┘
//!         ↓ preprocess                           │ postprocess
//! ┌───────┼──────────────────────────────────────┼───────────┐
//! │       ↓            后端 (Rust)               │           │
//! │                                                          │
//! │  ┌─ error ────── AppError (宿主层统一错误类型)            │
//! │  │                                                       │
//! │  ├─ image_payload      载荷解码·模式转换·裁剪·格式化      │
//! │  │   ├─ loader          Base64 / 文件 / URL 加载与校验   │
//! │  │   ├─ pipeline        fit / invert / mirror / 蒙版     │
//! │  │   └─ format          数组 / 图像对象 / 临时文件        │
//! │  │                                                       │
//! │  └─ storage            临时文件存储·登记·清理             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 宿主层统一错误类型 `AppError` |
//! | [`image_payload`] | `ImageSlider` 组件：配置、预处理、后处理、更新指令 |
//! | [`storage`] | 以内容哈希命名的临时文件存储与清理 |

pub mod error;
pub mod image_payload;
pub mod storage;
