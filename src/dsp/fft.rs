//! Radix-2 FFT
//!
//! Iterative decimation-in-time FFT over split real/imaginary arrays.
//! Outputs are scaled by `1/N`, like the fixed-point CMSIS transforms the
//! sensor firmware historically used, so that a sine of amplitude `A` at an
//! exact bin shows up as `A/2` in that bin and its mirror.

use core::f32::consts::PI;

#[cfg(feature = "embedded")]
use micromath::F32Ext;

/// Compute the forward FFT of `re + j*im` in place
///
/// Returns `false` (and leaves the input untouched) if the two slices
/// differ in length or the length is not a power of two.
pub fn fft_in_place(re: &mut [f32], im: &mut [f32]) -> bool {
    let n = re.len();
    if n != im.len() || !n.is_power_of_two() {
        return false;
    }
    if n < 2 {
        return true;
    }

    // Bit-reversal permutation
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - bits);
        if j > i {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let step = -2.0 * PI / len as f32;
        for j in 0..half {
            let angle = step * j as f32;
            let (w_re, w_im) = (angle.cos(), angle.sin());
            let mut start = 0;
            while start < n {
                let a = start + j;
                let b = a + half;
                let t_re = re[b] * w_re - im[b] * w_im;
                let t_im = re[b] * w_im + im[b] * w_re;
                re[b] = re[a] - t_re;
                im[b] = im[a] - t_im;
                re[a] += t_re;
                im[a] += t_im;
                start += len;
            }
        }
        len *= 2;
    }

    let scale = 1.0 / n as f32;
    for v in re.iter_mut().chain(im.iter_mut()) {
        *v *= scale;
    }
    true
}

/// Load a real signal and compute its FFT
///
/// `re` and `im` must be at least `n` long where `n` is the number of
/// samples produced by `samples`; only the first `n` entries are used.
/// Returns the transform length, or `None` if it is not a power of two.
pub fn real_fft<I>(samples: I, re: &mut [f32], im: &mut [f32]) -> Option<usize>
where
    I: IntoIterator<Item = f32>,
{
    let mut n = 0;
    for (slot, value) in re.iter_mut().zip(samples) {
        *slot = value;
        n += 1;
    }
    im[..n].fill(0.0);
    fft_in_place(&mut re[..n], &mut im[..n]).then_some(n)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_dc_lands_in_bin_zero() {
        let mut re = [3.0f32; 8];
        let mut im = [0.0f32; 8];
        assert!(fft_in_place(&mut re, &mut im));
        assert!((re[0] - 3.0).abs() < 1e-5);
        for k in 1..8 {
            assert!(re[k].abs() < 1e-5 && im[k].abs() < 1e-5);
        }
    }

    #[test]
    fn test_cosine_splits_between_mirror_bins() {
        let n = 64;
        let mut re = [0.0f32; 64];
        let mut im = [0.0f32; 64];
        for (i, v) in re.iter_mut().enumerate() {
            *v = 2.0 * (2.0 * PI * 5.0 * i as f32 / n as f32).cos();
        }
        assert!(fft_in_place(&mut re, &mut im));
        assert!((re[5] - 1.0).abs() < 1e-4);
        assert!((re[n - 5] - 1.0).abs() < 1e-4);
        assert!(re[6].abs() < 1e-4);
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let mut re = [0.0f32; 6];
        let mut im = [0.0f32; 6];
        assert!(!fft_in_place(&mut re, &mut im));
    }

    #[test]
    fn test_real_fft_reports_length() {
        let mut re = [0.0f32; 16];
        let mut im = [1.0f32; 16];
        let n = real_fft((0..8).map(|_| 1.0), &mut re, &mut im);
        assert_eq!(n, Some(8));
        assert!((re[0] - 1.0).abs() < 1e-6);
        assert!(im[..8].iter().all(|v| v.abs() < 1e-6));
    }
}
