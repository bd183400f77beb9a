use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;

use crate::config::{Normalization, ResizeMode, TensorLayout};
use crate::error::{AppError, Result};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How an uploaded photo becomes a model input tensor.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    pub input_size: u32,
    pub resize: ResizeMode,
    pub normalization: Normalization,
    pub layout: TensorLayout,
}

impl Preprocessor {
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| AppError::ImageDecode(e.to_string()))
    }

    /// Output shape including the batch dimension.
    pub fn shape(&self) -> [usize; 4] {
        let s = self.input_size as usize;
        match self.layout {
            TensorLayout::Nhwc => [1, s, s, 3],
            TensorLayout::Nchw => [1, 3, s, s],
        }
    }

    /// Resize to the square input and drop any alpha channel.
    pub fn square_rgb(&self, img: &DynamicImage) -> RgbImage {
        let size = self.input_size;
        match self.resize {
            ResizeMode::Stretch => img
                .resize_exact(size, size, image::imageops::FilterType::Triangle)
                .to_rgb8(),
            ResizeMode::Letterbox => {
                let (width, height) = img.dimensions();
                let (new_width, new_height) = if width > height {
                    (size, ((size * height) / width).max(1))
                } else {
                    (((size * width) / height).max(1), size)
                };

                let resized = img
                    .resize_exact(new_width, new_height, image::imageops::FilterType::Triangle)
                    .to_rgb8();

                let mut canvas = RgbImage::from_pixel(size, size, Rgb([0, 0, 0]));
                let pad_x = (size - new_width) / 2;
                let pad_y = (size - new_height) / 2;
                image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);
                canvas
            }
        }
    }

    pub fn to_tensor(&self, img: &DynamicImage) -> Array4<f32> {
        let rgb = self.square_rgb(img);
        let mut tensor = Array4::zeros(self.shape());

        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let mut value = pixel[c] as f32 / 255.0;
                if self.normalization == Normalization::Imagenet {
                    value = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
                }
                match self.layout {
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                }
            }
        }

        tensor
    }
}
