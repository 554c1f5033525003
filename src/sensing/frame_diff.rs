use image::{imageops::FilterType, RgbaImage};

/// Largest per-pixel difference: 255 on each of R, G and B.
const MAX_PIXEL_DIFF: f64 = 765.0;

/// Scales a captured frame down to the comparison size.
pub fn downscale(frame: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if frame.dimensions() == (width, height) {
        return frame.clone();
    }
    image::imageops::resize(frame, width, height, FilterType::Triangle)
}

/// Mean absolute RGB difference between two frames normalised to `[0, 1]`.
/// Alpha is ignored. `None` when the frames cannot be compared.
pub fn diff_score(previous: &RgbaImage, current: &RgbaImage) -> Option<f64> {
    if previous.dimensions() != current.dimensions() {
        return None;
    }
    let pixel_count = u64::from(current.width()) * u64::from(current.height());
    if pixel_count == 0 {
        return None;
    }

    let total: u64 = previous
        .pixels()
        .zip(current.pixels())
        .map(|(a, b)| {
            (0..3)
                .map(|channel| u64::from(a.0[channel].abs_diff(b.0[channel])))
                .sum::<u64>()
        })
        .sum();

    Some(total as f64 / pixel_count as f64 / MAX_PIXEL_DIFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    #[test]
    fn identical_frames_score_zero() {
        let frame = solid(4, 4, 120);
        assert_eq!(diff_score(&frame, &frame), Some(0.0));
    }

    #[test]
    fn black_to_white_scores_one() {
        assert_eq!(diff_score(&solid(4, 4, 0), &solid(4, 4, 255)), Some(1.0));
    }

    #[test]
    fn partial_change_is_averaged_over_pixels() {
        let before = solid(2, 2, 0);
        let mut after = before.clone();
        after.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        assert_eq!(diff_score(&before, &after), Some(0.25));
    }

    #[test]
    fn alpha_channel_is_ignored() {
        let before = solid(2, 2, 10);
        let after = RgbaImage::from_pixel(2, 2, Rgba([10, 10, 10, 0]));
        assert_eq!(diff_score(&before, &after), Some(0.0));
    }

    #[test]
    fn mismatched_sizes_are_not_compared() {
        assert_eq!(diff_score(&solid(2, 2, 0), &solid(4, 4, 0)), None);
    }

    #[test]
    fn downscale_hits_requested_size() {
        let frame = solid(64, 48, 200);
        assert_eq!(downscale(&frame, 16, 12).dimensions(), (16, 12));
    }
}
