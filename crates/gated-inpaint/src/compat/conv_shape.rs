//! # Convolution Shape Utilities
//!
//! Output-size arithmetic for the convolution and transposed convolution
//! layers of the inpainting network.

/// Predict the output size of a 1D convolution.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Reference
///
/// - [conv_arithmetic diagram](https://github.com/vdumoulin/conv_arithmetic/blob/master/README.md)
///
/// # Returns
///
/// The output size; or `None` when the kernel does not fit, or for zero-sized arguments.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    if input_size == 0 || kernel_size == 0 || stride == 0 || dilation == 0 {
        return None;
    }

    let padded = input_size + 2 * padding;
    let kernel_extent = 1 + dilation * (kernel_size - 1);

    if padded < kernel_extent {
        return None;
    }
    Some((padded - kernel_extent) / stride + 1)
}

/// Predict the output shape of a D-dimensional convolution.
///
/// Applies [`maybe_conv1d_output_size`] per axis; the same kernel, stride,
/// padding and dilation are used on every axis.
pub fn maybe_conv_output_shape<const D: usize>(
    input_shape: [usize; D],
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<[usize; D]> {
    let mut output_shape = input_shape;
    for dim in output_shape.iter_mut() {
        *dim = maybe_conv1d_output_size(*dim, kernel_size, stride, padding, dilation)?;
    }
    Some(output_shape)
}

/// Predict the output size of a 1D transposed convolution.
///
/// ```text
/// out_size = (in_size - 1)*stride - 2*padding + dilation*(kernel_size-1) + padding_out + 1
/// ```
///
/// # Returns
///
/// The output size; or `None` if the padding consumes the whole output.
pub fn maybe_conv_transpose1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    padding_out: usize,
    dilation: usize,
) -> Option<usize> {
    if input_size == 0 || kernel_size == 0 || stride == 0 || dilation == 0 {
        return None;
    }

    let full = (input_size - 1) * stride + dilation * (kernel_size - 1) + padding_out + 1;
    match full.checked_sub(2 * padding) {
        Some(0) | None => None,
        Some(x) => Some(x),
    }
}
