use image::{GrayImage, Luma};

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into a `grid_cols` x `grid_rows` tile grid; each tile
/// gets its own clipped-histogram lookup table, and pixels are mapped by
/// bilinear interpolation between the four nearest tile tables so tile seams
/// stay invisible. The clip limit is expressed as a multiple of the uniform
/// histogram bin height, as in the usual CLAHE formulation.
pub fn clahe(image: &GrayImage, clip_limit: f32, grid_cols: u32, grid_rows: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || grid_cols == 0 || grid_rows == 0 {
        return image.clone();
    }

    // Never allow more tiles than pixels along an axis.
    let cols = grid_cols.min(width) as usize;
    let rows = grid_rows.min(height) as usize;

    let luts = build_tile_luts(image, clip_limit, cols, rows);

    let width_f = width as f32;
    let height_f = height as f32;
    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let v = pixel[0] as usize;

        // Pixel position in tile-grid coordinates, relative to tile centers.
        let gx = (x as f32 + 0.5) * cols as f32 / width_f - 0.5;
        let gy = (y as f32 + 0.5) * rows as f32 / height_f - 0.5;
        let cx = gx.floor();
        let cy = gy.floor();
        let tx = gx - cx;
        let ty = gy - cy;

        let x0 = clamp_tile(cx as i64, cols);
        let x1 = clamp_tile(cx as i64 + 1, cols);
        let y0 = clamp_tile(cy as i64, rows);
        let y1 = clamp_tile(cy as i64 + 1, rows);

        let top = lerp(luts[y0][x0][v], luts[y0][x1][v], tx);
        let bottom = lerp(luts[y1][x0][v], luts[y1][x1][v], tx);
        let mapped = lerp(top, bottom, ty);

        out.put_pixel(x, y, Luma([mapped.round().clamp(0.0, 255.0) as u8]));
    }

    out
}

fn build_tile_luts(image: &GrayImage, clip_limit: f32, cols: usize, rows: usize) -> Vec<Vec<[f32; 256]>> {
    let (width, height) = image.dimensions();
    let width = width as usize;
    let height = height as usize;

    let mut luts = vec![vec![[0.0f32; 256]; cols]; rows];
    for (row, row_luts) in luts.iter_mut().enumerate() {
        let y0 = row * height / rows;
        let y1 = (row + 1) * height / rows;
        for (col, lut) in row_luts.iter_mut().enumerate() {
            let x0 = col * width / cols;
            let x1 = (col + 1) * width / cols;

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x as u32, y as u32)[0] as usize] += 1;
                }
            }

            let area = ((x1 - x0) * (y1 - y0)) as u32;
            clip_histogram(&mut hist, clip_limit, area);

            let mut cdf = 0u32;
            for (bin, count) in hist.iter().enumerate() {
                cdf += count;
                lut[bin] = cdf as f32 * 255.0 / area as f32;
            }
        }
    }

    luts
}

/// Clips histogram bins at `clip_limit` times the uniform bin height and
/// redistributes the excess evenly across all bins.
fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, area: u32) {
    if clip_limit <= 0.0 {
        return;
    }

    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }

    if excess == 0 {
        return;
    }

    let per_bin = excess / 256;
    let remainder = (excess % 256) as usize;
    for count in hist.iter_mut() {
        *count += per_bin;
    }
    for count in hist.iter_mut().take(remainder) {
        *count += 1;
    }
}

fn clamp_tile(index: i64, tiles: usize) -> usize {
    index.clamp(0, tiles as i64 - 1) as usize
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
