mod clahe;

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::filter::bilateral_filter;
use ndarray::{Array4, ArrayD};
use serde::{Deserialize, Serialize};

/// Parameters of the deterministic inference-time pipeline. The config is
/// part of the model bundle manifest, so every artifact is served with the
/// exact preprocessing it was trained against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub target_width: u32,
    pub target_height: u32,
    /// 1 for grayscale models, 3 replicates the gray channel for RGB models.
    pub channels: u32,
    pub layout: TensorLayout,
    /// Fraction of each border to crop away before filtering, removing scan
    /// annotations around the ultrasound cone.
    #[serde(default)]
    pub crop_border: Option<f32>,
    #[serde(default)]
    pub bilateral: Option<BilateralConfig>,
    #[serde(default)]
    pub clahe: Option<ClaheConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BilateralConfig {
    pub diameter: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaheConfig {
    pub clip_limit: f32,
    pub tile_grid: (u32, u32),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nhwc,
    Nchw,
}

impl PreprocessConfig {
    /// Resize + normalize only, paired with the plain CNN artifact.
    pub fn basic(target: u32, channels: u32) -> Self {
        Self {
            target_width: target,
            target_height: target,
            channels,
            layout: TensorLayout::Nhwc,
            crop_border: None,
            bilateral: None,
            clahe: None,
        }
    }

    /// Border crop + bilateral + CLAHE, paired with the hybrid artifact.
    pub fn enhanced(target: u32, channels: u32) -> Self {
        Self {
            crop_border: Some(0.05),
            bilateral: Some(BilateralConfig {
                diameter: 9,
                sigma_color: 75.0,
                sigma_space: 75.0,
            }),
            clahe: Some(ClaheConfig {
                clip_limit: 2.0,
                tile_grid: (8, 8),
            }),
            ..Self::basic(target, channels)
        }
    }

    pub fn is_enhanced(&self) -> bool {
        self.crop_border.is_some() || self.bilateral.is_some() || self.clahe.is_some()
    }

    pub fn variant_name(&self) -> &'static str {
        if self.is_enhanced() { "enhanced" } else { "basic" }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Could not read image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Invalid preprocessing configuration: {0}")]
    InvalidConfig(String),
}

/// Deterministic image-to-tensor pipeline: decode, grayscale, optional
/// border crop, optional bilateral filter, optional CLAHE, linear resize,
/// channel replication, [0, 1] scaling, batch dimension. Pure function of
/// the input bytes and the configuration.
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Result<Self, PreprocessError> {
        if config.target_width == 0 || config.target_height == 0 {
            return Err(PreprocessError::InvalidConfig(
                "target size must be non-zero".to_string(),
            ));
        }
        if config.channels != 1 && config.channels != 3 {
            return Err(PreprocessError::InvalidConfig(format!(
                "channels must be 1 or 3, got {}",
                config.channels
            )));
        }
        if let Some(margin) = config.crop_border {
            if !(0.0..0.5).contains(&margin) {
                return Err(PreprocessError::InvalidConfig(format!(
                    "crop border must be in [0, 0.5), got {}",
                    margin
                )));
            }
        }
        if let Some(bilateral) = &config.bilateral {
            if bilateral.diameter == 0 {
                return Err(PreprocessError::InvalidConfig(
                    "bilateral diameter must be non-zero".to_string(),
                ));
            }
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn run(&self, image_bytes: &[u8]) -> Result<ArrayD<f32>, PreprocessError> {
        let decoded = image::load_from_memory(image_bytes)?;
        let mut gray = decoded.to_luma8();

        if let Some(margin) = self.config.crop_border {
            gray = crop_border(&gray, margin);
        }
        if let Some(bilateral) = &self.config.bilateral {
            gray = bilateral_filter(
                &gray,
                bilateral.diameter / 2,
                bilateral.sigma_color,
                bilateral.sigma_space,
            );
        }
        if let Some(clahe_config) = &self.config.clahe {
            gray = clahe::clahe(
                &gray,
                clahe_config.clip_limit,
                clahe_config.tile_grid.0,
                clahe_config.tile_grid.1,
            );
        }

        let resized = imageops::resize(
            &gray,
            self.config.target_width,
            self.config.target_height,
            FilterType::Triangle,
        );

        Ok(self.to_tensor(&resized))
    }

    fn to_tensor(&self, image: &GrayImage) -> ArrayD<f32> {
        let height = self.config.target_height as usize;
        let width = self.config.target_width as usize;
        let channels = self.config.channels as usize;

        match self.config.layout {
            TensorLayout::Nhwc => {
                let mut tensor = Array4::<f32>::zeros((1, height, width, channels));
                for (x, y, pixel) in image.enumerate_pixels() {
                    let value = pixel[0] as f32 / 255.0;
                    for channel in 0..channels {
                        tensor[[0, y as usize, x as usize, channel]] = value;
                    }
                }
                tensor.into_dyn()
            }
            TensorLayout::Nchw => {
                let mut tensor = Array4::<f32>::zeros((1, channels, height, width));
                for (x, y, pixel) in image.enumerate_pixels() {
                    let value = pixel[0] as f32 / 255.0;
                    for channel in 0..channels {
                        tensor[[0, channel, y as usize, x as usize]] = value;
                    }
                }
                tensor.into_dyn()
            }
        }
    }
}

fn crop_border(image: &GrayImage, margin: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let margin_w = (width as f32 * margin) as u32;
    let margin_h = (height as f32 * margin) as u32;
    if margin_w * 2 >= width || margin_h * 2 >= height {
        return image.clone();
    }
    imageops::crop_imm(
        image,
        margin_w,
        margin_h,
        width - 2 * margin_w,
        height - 2 * margin_h,
    )
    .to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png_bytes(value: u8, width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([value])));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .expect("failed to encode test image");
        buffer
    }

    #[test]
    fn basic_config_produces_configured_shape() {
        let preprocessor = Preprocessor::new(PreprocessConfig::basic(224, 3)).unwrap();
        let tensor = preprocessor.run(&png_bytes(128, 400, 300)).unwrap();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
    }

    #[test]
    fn nchw_layout_produces_channel_first_shape() {
        let mut config = PreprocessConfig::basic(64, 3);
        config.layout = TensorLayout::Nchw;
        let preprocessor = Preprocessor::new(config).unwrap();
        let tensor = preprocessor.run(&png_bytes(10, 100, 100)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
    }

    #[test]
    fn values_stay_in_unit_interval() {
        let preprocessor = Preprocessor::new(PreprocessConfig::enhanced(224, 3)).unwrap();
        let tensor = preprocessor.run(&png_bytes(200, 320, 240)).unwrap();
        assert!(tensor.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn pipeline_is_deterministic() {
        let preprocessor = Preprocessor::new(PreprocessConfig::enhanced(224, 3)).unwrap();
        let bytes = png_bytes(57, 260, 200);
        let first = preprocessor.run(&bytes).unwrap();
        let second = preprocessor.run(&bytes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn black_image_maps_to_zeros_under_basic_config() {
        let preprocessor = Preprocessor::new(PreprocessConfig::basic(64, 3)).unwrap();
        let tensor = preprocessor.run(&png_bytes(0, 100, 100)).unwrap();
        assert!(tensor.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn white_image_maps_to_ones_under_basic_config() {
        let preprocessor = Preprocessor::new(PreprocessConfig::basic(64, 3)).unwrap();
        let tensor = preprocessor.run(&png_bytes(255, 100, 100)).unwrap();
        assert!(tensor.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn replicated_channels_are_identical() {
        let preprocessor = Preprocessor::new(PreprocessConfig::basic(32, 3)).unwrap();
        let tensor = preprocessor.run(&png_bytes(77, 64, 48)).unwrap();
        let tensor = tensor.into_dimensionality::<ndarray::Ix4>().unwrap();
        for y in 0..32 {
            for x in 0..32 {
                let r = tensor[[0, y, x, 0]];
                assert_eq!(r, tensor[[0, y, x, 1]]);
                assert_eq!(r, tensor[[0, y, x, 2]]);
            }
        }
    }

    #[test]
    fn invalid_bytes_fail_with_decode_error() {
        let preprocessor = Preprocessor::new(PreprocessConfig::basic(224, 3)).unwrap();
        let result = preprocessor.run(b"definitely not an image");
        assert!(matches!(result, Err(PreprocessError::Decode(_))));
    }

    #[test]
    fn crop_border_removes_margin() {
        let img = GrayImage::from_pixel(100, 100, Luma([50]));
        let cropped = crop_border(&img, 0.05);
        assert_eq!(cropped.dimensions(), (90, 90));
    }

    #[test]
    fn degenerate_crop_is_skipped() {
        let img = GrayImage::from_pixel(2, 2, Luma([50]));
        let cropped = crop_border(&img, 0.49);
        assert_eq!(cropped.dimensions(), (2, 2));
    }

    #[test]
    fn rejects_invalid_channel_count() {
        let config = PreprocessConfig::basic(224, 2);
        assert!(matches!(
            Preprocessor::new(config),
            Err(PreprocessError::InvalidConfig(_))
        ));
    }
}
