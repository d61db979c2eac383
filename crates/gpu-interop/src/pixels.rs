//! Pixel buffer helpers.

/// Flip a tightly packed image vertically in place.
///
/// GL read-backs start at the bottom row; D3D and Metal resources start at
/// the top.
pub fn flip_rows(pixels: &mut [u8], row_bytes: usize) {
    if row_bytes == 0 {
        return;
    }
    let rows = pixels.len() / row_bytes;
    for top in 0..rows / 2 {
        let bottom = rows - 1 - top;
        let (upper, lower) = pixels.split_at_mut(bottom * row_bytes);
        upper[top * row_bytes..(top + 1) * row_bytes].swap_with_slice(&mut lower[..row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_odd_row_count() {
        let mut px = vec![1, 1, 2, 2, 3, 3];
        flip_rows(&mut px, 2);
        assert_eq!(px, vec![3, 3, 2, 2, 1, 1]);
    }

    #[test]
    fn flips_even_row_count() {
        let mut px = vec![1, 2, 3, 4];
        flip_rows(&mut px, 1);
        assert_eq!(px, vec![4, 3, 2, 1]);
    }
}
