//! Dense kernels for the emission model
//!
//! All kernels write into caller-provided buffers so the per-frame path does
//! not allocate. Accumulation order is fixed (ascending index), which keeps
//! single-frame and batched inference bit-identical.

/// Linear layer `y = W x + b` for one row
///
/// `weight` is row-major `[out_dim, in_dim]`.
pub fn linear_into(output: &mut [f32], input: &[f32], weight: &[f32], bias: &[f32]) {
    let in_dim = input.len();
    let out_dim = output.len();
    debug_assert_eq!(weight.len(), out_dim * in_dim);
    debug_assert_eq!(bias.len(), out_dim);

    for (o, (y, w)) in output.iter_mut().zip(weight.chunks_exact(in_dim)).enumerate() {
        let mut sum = bias[o];
        for (x, wi) in input.iter().zip(w) {
            sum += x * wi;
        }
        *y = sum;
    }
}

/// Linear layer over `n_rows` stacked rows
///
/// Row `r` of the output equals `linear_into` applied to row `r` of the input.
pub fn linear_rows(output: &mut [f32], input: &[f32], in_dim: usize, weight: &[f32], bias: &[f32]) {
    let out_dim = bias.len();
    debug_assert_eq!(input.len() % in_dim, 0);
    debug_assert_eq!(output.len(), input.len() / in_dim * out_dim);

    for (x, y) in input.chunks_exact(in_dim).zip(output.chunks_exact_mut(out_dim)) {
        linear_into(y, x, weight, bias);
    }
}

/// Valid (unpadded) 1-D convolution of a single input channel
///
/// `weight` is `[channels, kernel]`; the output is channel-major
/// `[channels, input.len() - kernel + 1]`.
pub fn conv1d_single_input(output: &mut [f32], input: &[f32], weight: &[f32], bias: &[f32], kernel: usize) {
    let channels = bias.len();
    let out_len = input.len() + 1 - kernel;
    debug_assert_eq!(weight.len(), channels * kernel);
    debug_assert_eq!(output.len(), channels * out_len);

    for (c, (row, w)) in output
        .chunks_exact_mut(out_len)
        .zip(weight.chunks_exact(kernel))
        .enumerate()
    {
        for (t, y) in row.iter_mut().enumerate() {
            let mut sum = bias[c];
            for (x, wk) in input[t..t + kernel].iter().zip(w) {
                sum += x * wk;
            }
            *y = sum;
        }
    }
}

/// Rectify in place
#[inline]
pub fn relu_inplace(x: &mut [f32]) {
    for v in x {
        *v = v.max(0.0);
    }
}

/// Non-overlapping max pooling per channel (stride == width, tail dropped)
pub fn max_pool1d(output: &mut [f32], input: &[f32], channels: usize, width: usize) {
    let in_len = input.len() / channels;
    let out_len = in_len / width;
    debug_assert_eq!(output.len(), channels * out_len);

    for (in_row, out_row) in input.chunks_exact(in_len).zip(output.chunks_exact_mut(out_len)) {
        for (y, window) in out_row.iter_mut().zip(in_row.chunks_exact(width)) {
            *y = window.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        }
    }
}

/// Logistic function
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax in place
pub fn softmax_inplace(x: &mut [f32]) {
    if x.is_empty() {
        return;
    }
    let max_v = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let mut sum = 0.0f32;
    for v in x.iter_mut() {
        *v = (*v - max_v).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in x {
            *v /= sum;
        }
    }
}
