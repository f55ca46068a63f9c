/// Converts BGRA `pre-multiplied alpha` pixels to RGBA `straight` pixels.
///
/// PDN surfaces store premultiplied BGRA; png encoders want straight RGBA.
pub fn premultiplied_bgra_to_rgba(pixels: &[u8]) -> Vec<u8> {
    pixels
        .chunks_exact(4)
        .flat_map(|chunk| {
            let alpha = chunk[3];
            let unmultiply = |channel: u8| {
                if alpha == 0 {
                    0
                } else {
                    ((channel as f32 * 255.0 / alpha as f32) + 0.5).min(255.0) as u8
                }
            };

            [
                unmultiply(chunk[2]),
                unmultiply(chunk[1]),
                unmultiply(chunk[0]),
                alpha,
            ]
        })
        .collect()
}
