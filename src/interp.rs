// 3rd-order Lagrange interpolation of the prototype filter, used once at
// construction time to expand the 32x-oversampled table to an arbitrary
// phase count. Lagrange is maximally flat near dc and well suited for
// further upsampling an already heavily-oversampled prototype.

const Q32_TO_FLOAT: f32 = 1.0 / 4294967296.0;

// Halves of the signed Q32.32 phase accumulator. The high word keeps its
// sign, the low word is the unsigned fraction.
#[inline]
pub(crate) fn lo32(a: i64) -> u32 {
    a as u32
}

#[inline]
pub(crate) fn hi32(a: i64) -> i32 {
    (a >> 32) as i32
}

/// Resamples `input` to `output.len()` uniform points of its continuous
/// interpolant, scaling by `gain`. Values outside the input window read
/// as zero.
pub fn cubic_interpolation(input: &[f32], output: &mut [f32], gain: f32) {
    let input_size = input.len();
    let output_size = output.len();
    assert!(input_size > 0 && output_size > 0);

    let step = ((input_size as i64) << 32) / output_size as i64; // Q32.32
    // offset to improve small integer ratios
    let mut offset: i64 = if output_size < input_size { step / 2 } else { 0 };

    // Lagrange interpolation using Farrow structure
    for out in output.iter_mut() {
        let i = hi32(offset);
        let f = lo32(offset);

        let x0 = if i - 1 < 0 { 0.0 } else { input[(i - 1) as usize] };
        let x1 = input[i as usize];
        let x2 = if (i + 1) < input_size as i32 { input[(i + 1) as usize] } else { 0.0 };
        let x3 = if (i + 2) < input_size as i32 { input[(i + 2) as usize] } else { 0.0 };

        // polynomial coefficients in power basis
        let c0 = (1.0 / 6.0) * (x3 - x0) + (1.0 / 2.0) * (x1 - x2);
        let c1 = (1.0 / 2.0) * (x0 + x2) - x1;
        let c2 = x2 - (1.0 / 3.0) * x0 - (1.0 / 2.0) * x1 - (1.0 / 6.0) * x3;
        let c3 = x1;

        let frac = f as f32 * Q32_TO_FLOAT;
        *out = (((c0 * frac + c1) * frac + c2) * frac + c3) * gain;

        offset += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reproduces_input_on_identity() {
        let input: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut output = vec![0.0f32; 64];
        cubic_interpolation(&input, &mut output, 1.0);
        // step == 1.0 and zero offset: every point lands on a sample
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn exact_on_cubic_polynomial_interior() {
        // Lagrange of order 3 reconstructs cubics exactly away from the
        // zero-padded edges
        let poly = |t: f64| {
            let u = t / 16.0;
            0.25 * u * u * u - 1.5 * u * u + 2.0 * u + 0.5
        };
        let n_in = 48usize;
        let n_out = 191usize;
        let input: Vec<f32> = (0..n_in).map(|i| poly(i as f64) as f32).collect();
        let mut output = vec![0.0f32; n_out];
        cubic_interpolation(&input, &mut output, 1.0);

        let step = ((n_in as i64) << 32) / n_out as i64;
        let mut offset: i64 = 0; // upsampling: no bias
        for out in output.iter() {
            let i = hi32(offset);
            let frac = lo32(offset) as f64 * (1.0 / 4294967296.0);
            if i >= 2 && (i as usize) + 2 < n_in {
                let t = i as f64 + frac;
                let expected = poly(t);
                assert!(
                    (*out as f64 - expected).abs() < 1e-3,
                    "at t={} got {} want {}",
                    t,
                    out,
                    expected
                );
            }
            offset += step;
        }
    }

    #[test]
    fn gain_scales_output() {
        let input: Vec<f32> = (0..32).map(|i| i as f32).collect();
        let mut unity = vec![0.0f32; 96];
        let mut double = vec![0.0f32; 96];
        cubic_interpolation(&input, &mut unity, 1.0);
        cubic_interpolation(&input, &mut double, 2.0);
        for (a, b) in unity.iter().zip(double.iter()) {
            assert!((2.0 * a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn downsampling_biases_start() {
        // with Nout < Nin the first point sits half a step in, not at zero
        let mut input = vec![0.0f32; 64];
        input[0] = 1.0;
        let mut output = vec![0.0f32; 16];
        cubic_interpolation(&input, &mut output, 1.0);
        // half-step bias lands the first output at position 2.0, past the
        // impulse support
        assert_eq!(output[0], 0.0);
    }
}
