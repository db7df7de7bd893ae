//! # 输出格式选择
//!
//! ## 设计思路
//!
//! 预处理最后一步按 `ImageType` 把图像对象转成用户回调需要的形态：
//! 图像对象原样返回、数值数组、或落盘为临时文件路径。
//! `ImageType` 是封闭枚举，因此不存在"未知类型"分支。
//!
//! 数组形态沿用数值图像的惯例：单通道模式为 `(height, width)`，
//! 多通道为 `(height, width, channels)`；`1` 为 bool，`I` 为 i32，`F` 为 f32，其余为 u8。

use ndarray::{ArrayD, IxDyn};

use super::color::ImageMode;
use super::picture::{DecodedImage, Samples};
use super::source::AppImage;
use super::{ImageError, ImageType};
use crate::storage::TempStorage;

/// 数值数组形态的图像。
#[derive(Debug, Clone, PartialEq)]
pub enum PixelArray {
    Bool(ArrayD<bool>),
    U8(ArrayD<u8>),
    I32(ArrayD<i32>),
    F32(ArrayD<f32>),
}

impl PixelArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Bool(a) => a.shape(),
            Self::U8(a) => a.shape(),
            Self::I32(a) => a.shape(),
            Self::F32(a) => a.shape(),
        }
    }

    /// 由图像对象构造数组。
    pub fn from_image(image: &DecodedImage) -> Result<Self, ImageError> {
        let (width, height) = image.dimensions();
        let channels = image.mode().channels();
        let dims = if channels == 1 {
            IxDyn(&[height as usize, width as usize])
        } else {
            IxDyn(&[height as usize, width as usize, channels])
        };
        let shape_error = |e: ndarray::ShapeError| ImageError::Decode(format!("构建数组失败：{}", e));

        let array = match (image.mode(), image.samples()) {
            (ImageMode::Bilevel, Samples::U8(data)) => {
                Self::Bool(ArrayD::from_shape_vec(dims, data.iter().map(|v| *v != 0).collect()).map_err(shape_error)?)
            }
            (_, Samples::U8(data)) => Self::U8(ArrayD::from_shape_vec(dims, data.clone()).map_err(shape_error)?),
            (_, Samples::I32(data)) => Self::I32(ArrayD::from_shape_vec(dims, data.clone()).map_err(shape_error)?),
            (_, Samples::F32(data)) => Self::F32(ArrayD::from_shape_vec(dims, data.clone()).map_err(shape_error)?),
        };

        Ok(array)
    }

    /// 转为可编码的 8 位图像。
    ///
    /// 取值规则：bool → 0/255；i32 → `max(v, 0) >> 23`；
    /// f32 必须落在 [-1, 1]，截断到 [0, 1] 后乘 255 取整。
    /// 通道数 1 / 2 / 3 / 4 分别对应 L / LA / RGB / RGBA。
    pub fn to_image(&self) -> Result<DecodedImage, ImageError> {
        let shape = self.shape().to_vec();
        let (height, width, channels) = match shape.as_slice() {
            [h, w] => (*h, *w, 1),
            [h, w, c] if (1..=4).contains(c) => (*h, *w, *c),
            other => {
                return Err(ImageError::UnsupportedValue(format!(
                    "数组形状无法表示图片：{:?}",
                    other
                )));
            }
        };

        let data: Vec<u8> = match self {
            Self::Bool(a) => a.iter().map(|v| if *v { 255 } else { 0 }).collect(),
            Self::U8(a) => a.iter().copied().collect(),
            Self::I32(a) => a.iter().map(|v| ((*v).max(0) >> 23) as u8).collect(),
            Self::F32(a) => {
                if a.iter().any(|v| !v.is_finite() || *v < -1.0 || *v > 1.0) {
                    return Err(ImageError::UnsupportedValue(
                        "浮点数组取值必须在 -1 到 1 之间".to_string(),
                    ));
                }
                a.iter().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8).collect()
            }
        };

        let mode = match channels {
            1 => ImageMode::Luma,
            2 => ImageMode::LumaAlpha,
            3 => ImageMode::Rgb,
            _ => ImageMode::Rgba,
        };

        let width = u32::try_from(width).map_err(|_| ImageError::ResourceLimit("数组宽度溢出".to_string()))?;
        let height = u32::try_from(height).map_err(|_| ImageError::ResourceLimit("数组高度溢出".to_string()))?;
        DecodedImage::from_u8(width, height, mode, data)
    }
}

/// 按配置的输出类型格式化已预处理的图像。
pub fn format_image(
    image: DecodedImage,
    image_type: ImageType,
    storage: &TempStorage,
) -> Result<AppImage, ImageError> {
    match image_type {
        ImageType::Object => Ok(AppImage::Image(image)),
        ImageType::Array => Ok(AppImage::Array(PixelArray::from_image(&image)?)),
        ImageType::Filepath => {
            let path = storage.save_image(&image)?;
            Ok(AppImage::Filepath(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red_square(size: u32) -> DecodedImage {
        let data = (0..size * size).flat_map(|_| [255u8, 0, 0]).collect();
        DecodedImage::from_u8(size, size, ImageMode::Rgb, data).expect("build image")
    }

    #[test]
    fn selector_output_kind_matches_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = TempStorage::new(dir.path().to_path_buf()).expect("storage");
        let image = red_square(4);

        let object = format_image(image.clone(), ImageType::Object, &storage).expect("object");
        assert_eq!(object.as_image(), Some(&image));

        let array = format_image(image.clone(), ImageType::Array, &storage).expect("array");
        assert_eq!(array.as_array().map(|a| a.shape().to_vec()), Some(vec![4, 4, 3]));

        let path = format_image(image, ImageType::Filepath, &storage).expect("filepath");
        let path = path.as_path().expect("path variant");
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
    }

    #[test]
    fn single_channel_modes_are_two_dimensional() {
        let gray = red_square(3).convert(ImageMode::Luma);
        let array = PixelArray::from_image(&gray).expect("array");
        assert_eq!(array.shape(), &[3, 3]);

        let bilevel = red_square(3).convert(ImageMode::Bilevel);
        assert!(matches!(PixelArray::from_image(&bilevel).expect("array"), PixelArray::Bool(_)));

        let float = red_square(3).convert(ImageMode::Float32);
        assert!(matches!(PixelArray::from_image(&float).expect("array"), PixelArray::F32(_)));
    }

    #[test]
    fn array_round_trips_to_identical_image() {
        let image = red_square(5);
        let back = PixelArray::from_image(&image).expect("array").to_image().expect("image");

        assert_eq!(back, image);
    }

    #[test]
    fn numeric_conversion_rules() {
        let floats = PixelArray::F32(ArrayD::from_shape_vec(IxDyn(&[1, 3]), vec![-0.5, 0.5, 1.0]).expect("shape"));
        assert_eq!(floats.to_image().expect("image").as_u8(), Some(&[0, 128, 255][..]));

        let out_of_range = PixelArray::F32(ArrayD::from_shape_vec(IxDyn(&[1, 1]), vec![2.0]).expect("shape"));
        assert!(matches!(out_of_range.to_image(), Err(ImageError::UnsupportedValue(_))));

        let ints = PixelArray::I32(ArrayD::from_shape_vec(IxDyn(&[1, 3]), vec![-5, 255, i32::MAX]).expect("shape"));
        assert_eq!(ints.to_image().expect("image").as_u8(), Some(&[0, 0, 255][..]));

        let bools = PixelArray::Bool(ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![true, false]).expect("shape"));
        assert_eq!(bools.to_image().expect("image").as_u8(), Some(&[255, 0][..]));
    }

    #[test]
    fn rejects_unrepresentable_shapes() {
        let five_channels = PixelArray::U8(ArrayD::zeros(IxDyn(&[2, 2, 5])));
        assert!(matches!(five_channels.to_image(), Err(ImageError::UnsupportedValue(_))));

        let flat = PixelArray::U8(ArrayD::zeros(IxDyn(&[4])));
        assert!(matches!(flat.to_image(), Err(ImageError::UnsupportedValue(_))));
    }
}
