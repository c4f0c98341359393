//! 图像预处理 - 业务能力层
//!
//! 只负责把一张页面图像变得更适合识别，不关心后续流程。
//!
//! 步骤依次为：灰度化 → 对比度增强（CLAHE）→ 保边降噪（双边滤波）
//! → 倾斜校正 → 自适应二值化，每一步都可以单独关闭。相同输入和配置
//! 总是得到相同输出。

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba};
use imageproc::contrast::adaptive_threshold;
use imageproc::filter::bilateral_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use std::io::Cursor;
use tracing::debug;

use crate::config::PreprocessConfig;
use crate::error::PreprocessError;
use crate::models::page_image::{ImageEncoding, PreprocessStep, PreprocessedImage};

/// 倾斜估计结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkewEstimate {
    /// 需要校正的角度（度）
    Angle(f32),
    /// 倾斜可以忽略
    Negligible,
    /// 无法判断
    Inconclusive(&'static str),
}

/// 图像预处理器
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// 预处理一张编码后的图像
    ///
    /// 所有步骤关闭时原样透传，不做解码。
    pub fn process(&self, raw: &[u8]) -> Result<PreprocessedImage, PreprocessError> {
        if !self.config.any_enabled() {
            return Ok(PreprocessedImage::passthrough(raw.to_vec()));
        }

        let decoded =
            image::load_from_memory(raw).map_err(|e| PreprocessError::Decode(e.to_string()))?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(PreprocessError::Decode("图像尺寸为 0".to_string()));
        }
        let is_gray = matches!(decoded, DynamicImage::ImageLuma8(_));

        if !self.config.grayscale && !is_gray {
            return self.process_color(decoded);
        }

        let cfg = &self.config;
        let mut applied = Vec::new();
        let mut warnings = Vec::new();
        let mut gray = decoded.to_luma8();
        if cfg.grayscale {
            applied.push(PreprocessStep::Grayscale);
        }

        if cfg.contrast {
            gray = clahe(&gray, cfg.clahe_clip_limit, cfg.clahe_grid);
            applied.push(PreprocessStep::Contrast);
        }

        if cfg.denoise {
            gray = bilateral_filter(
                &gray,
                cfg.bilateral_window,
                cfg.bilateral_sigma_color,
                cfg.bilateral_sigma_space,
            );
            applied.push(PreprocessStep::Denoise);
        }

        if cfg.deskew {
            match estimate_skew(&gray, cfg.deskew_max_angle, cfg.deskew_min_angle) {
                SkewEstimate::Angle(angle) => {
                    debug!("倾斜校正: {:.2}°", angle);
                    gray = rotate_about_center(
                        &gray,
                        -angle.to_radians(),
                        Interpolation::Bilinear,
                        Luma([255u8]),
                    );
                    applied.push(PreprocessStep::Deskew);
                }
                SkewEstimate::Negligible => {}
                SkewEstimate::Inconclusive(reason) => {
                    warnings.push(format!("倾斜估计无结论（{}），保留原方向", reason));
                }
            }
        }

        if cfg.binarize {
            gray = adaptive_threshold(&gray, cfg.threshold_block_radius.max(1));
            applied.push(PreprocessStep::Binarize);
        }

        Ok(PreprocessedImage {
            bytes: encode_png(DynamicImage::ImageLuma8(gray))?,
            encoding: ImageEncoding::Png,
            applied,
            warnings,
        })
    }

    /// 关闭灰度化时的彩色路径：只做倾斜校正
    fn process_color(&self, decoded: DynamicImage) -> Result<PreprocessedImage, PreprocessError> {
        let cfg = &self.config;
        let mut applied = Vec::new();
        let mut warnings = Vec::new();
        if cfg.contrast || cfg.denoise || cfg.binarize {
            warnings.push("灰度化已关闭，彩色图像跳过对比度、降噪与二值化".to_string());
        }

        let mut rgba = decoded.to_rgba8();
        if cfg.deskew {
            match estimate_skew(&decoded.to_luma8(), cfg.deskew_max_angle, cfg.deskew_min_angle) {
                SkewEstimate::Angle(angle) => {
                    rgba = rotate_about_center(
                        &rgba,
                        -angle.to_radians(),
                        Interpolation::Bilinear,
                        Rgba([255u8, 255, 255, 255]),
                    );
                    applied.push(PreprocessStep::Deskew);
                }
                SkewEstimate::Negligible => {}
                SkewEstimate::Inconclusive(reason) => {
                    warnings.push(format!("倾斜估计无结论（{}），保留原方向", reason));
                }
            }
        }

        Ok(PreprocessedImage {
            bytes: encode_png(DynamicImage::ImageRgba8(rgba))?,
            encoding: ImageEncoding::Png,
            applied,
            warnings,
        })
    }
}

pub fn encode_png(img: DynamicImage) -> Result<Vec<u8>, PreprocessError> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(cursor.into_inner())
}

// ========== 对比度增强 ==========

/// 限制对比度的自适应直方图均衡（CLAHE）
///
/// 图像划分为 `grid × grid` 个块，每块计算裁剪后的直方图映射，
/// 像素值在相邻四个块的映射之间做双线性插值。
pub fn clahe(img: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let tiles_x = grid.clamp(1, w);
    let tiles_y = grid.clamp(1, h);
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[img.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            let n = (x1.saturating_sub(x0) * y1.saturating_sub(y0)).max(1);

            // 裁剪并平均分配超出部分
            let clip = ((clip_limit * n as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let share = excess / 256;
            let remainder = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += share + u32::from(i < remainder);
            }

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u32;
            for (i, bin) in hist.iter().enumerate() {
                cdf += bin;
                lut[i] = ((cdf as f32 * 255.0 / n as f32).round()).min(255.0) as u8;
            }
        }
    }

    let lut_at = |tx: u32, ty: u32, v: usize| luts[(ty * tiles_x + tx) as usize][v] as f32;
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = (gy.floor().max(0.0) as u32).min(tiles_y - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fy = (gy - ty0 as f32).clamp(0.0, 1.0);
        for x in 0..w {
            let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = (gx.floor().max(0.0) as u32).min(tiles_x - 1);
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let fx = (gx - tx0 as f32).clamp(0.0, 1.0);

            let v = img.get_pixel(x, y).0[0] as usize;
            let top = lut_at(tx0, ty0, v) * (1.0 - fx) + lut_at(tx1, ty0, v) * fx;
            let bottom = lut_at(tx0, ty1, v) * (1.0 - fx) + lut_at(tx1, ty1, v) * fx;
            let value = top * (1.0 - fy) + bottom * fy;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

// ========== 倾斜校正 ==========

const INK_THRESHOLD: u8 = 128;
const SKEW_STEP_DEG: f32 = 0.25;

/// 用投影法估计倾斜角
///
/// 对每个候选角度把墨迹像素旋转后按行投影，行直方图越集中
/// （平方和越大）说明文字行越水平。
pub fn estimate_skew(img: &GrayImage, max_angle: f32, min_angle: f32) -> SkewEstimate {
    let (w, h) = img.dimensions();
    if w < 50 || h < 50 {
        return SkewEstimate::Inconclusive("图像过小");
    }

    let cx = w as f32 / 2.0;
    let cy = h as f32 / 2.0;
    let mut ink = Vec::new();
    for y in (0..h).step_by(2) {
        for x in (0..w).step_by(2) {
            if img.get_pixel(x, y).0[0] < INK_THRESHOLD {
                ink.push((x as f32 - cx, y as f32 - cy));
            }
        }
    }
    let sampled = (w.div_ceil(2) * h.div_ceil(2)) as f32;
    let ratio = ink.len() as f32 / sampled;
    if ratio < 0.005 {
        return SkewEstimate::Inconclusive("有效内容过少");
    }
    if ratio > 0.6 {
        return SkewEstimate::Inconclusive("图像过暗");
    }

    let half = ((w + h) / 2) as i64 + 1;
    let steps = (max_angle / SKEW_STEP_DEG).round().max(1.0) as i32;
    let zero_score = projection_score(&ink, 0.0, half);
    let mut best_k = 0i32;
    let mut best_score = zero_score;
    for k in -steps..=steps {
        let score = projection_score(&ink, k as f32 * SKEW_STEP_DEG, half);
        let better = score > best_score || (score == best_score && k.abs() < best_k.abs());
        if better {
            best_score = score;
            best_k = k;
        }
    }

    if best_k.abs() == steps {
        return SkewEstimate::Inconclusive("倾斜超出搜索范围");
    }
    let angle = best_k as f32 * SKEW_STEP_DEG;
    if angle.abs() < min_angle || best_score <= zero_score * 1.02 {
        SkewEstimate::Negligible
    } else {
        SkewEstimate::Angle(angle)
    }
}

fn projection_score(ink: &[(f32, f32)], angle_deg: f32, half: i64) -> f64 {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let mut rows = vec![0u32; (2 * half + 1) as usize];
    for &(x, y) in ink {
        let row = (-x * sin + y * cos).round() as i64 + half;
        if row >= 0 && (row as usize) < rows.len() {
            rows[row as usize] += 1;
        }
    }
    rows.iter().map(|&c| (c as f64) * (c as f64)).sum()
}
