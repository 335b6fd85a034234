//! Conversions between raw camera layouts and the canonical RGB layout.

use image::{GrayImage, Luma, Rgb, RgbImage};
use jpeg_decoder::Decoder;

use super::frame::{Frame, PixelFormat};
use crate::error::DecodeError;

/// Decodes any supported raw frame into the canonical RGB layout.
pub fn decode_frame(frame: &Frame) -> Result<RgbImage, DecodeError> {
    let (width, height) = (frame.width(), frame.height());
    match frame.format() {
        PixelFormat::Mjpeg => decode_mjpeg(&frame.data),
        PixelFormat::Rgb24 => {
            let data = packed(frame)?;
            Ok(RgbImage::from_fn(width, height, |x, y| {
                let i = ((y * width + x) * 3) as usize;
                Rgb([data[i], data[i + 1], data[i + 2]])
            }))
        }
        PixelFormat::Bgr24 => {
            let data = packed(frame)?;
            Ok(RgbImage::from_fn(width, height, |x, y| {
                let i = ((y * width + x) * 3) as usize;
                Rgb([data[i + 2], data[i + 1], data[i]])
            }))
        }
        PixelFormat::Gray8 => {
            let data = packed(frame)?;
            Ok(RgbImage::from_fn(width, height, |x, y| {
                let v = data[(y * width + x) as usize];
                Rgb([v, v, v])
            }))
        }
        PixelFormat::Yuyv4 => {
            let data = packed(frame)?;
            Ok(yuyv_to_rgb(&data, width, height))
        }
    }
}

/// Returns the frame's rows tightly packed, checking that the buffer is large enough.
fn packed(frame: &Frame) -> Result<Vec<u8>, DecodeError> {
    let meta = &frame.meta;
    let bpp = meta.format.bytes_per_pixel().unwrap_or(1);
    let row_len = (meta.width * bpp) as usize;
    let expected = if meta.height == 0 {
        0
    } else {
        meta.stride as usize * (meta.height as usize - 1) + row_len
    };
    if frame.data.len() < expected || (meta.stride as usize) < row_len {
        return Err(DecodeError::ShortBuffer {
            format: meta.format,
            width: meta.width,
            height: meta.height,
            expected,
            got: frame.data.len(),
        });
    }
    Ok(frame.packed_rows())
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbImage, DecodeError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode()?;
    let info = decoder.info().ok_or(DecodeError::MissingJpegInfo)?;
    let (width, height) = (u32::from(info.width), u32::from(info.height));

    match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => {
            RgbImage::from_raw(width, height, pixels).ok_or(DecodeError::ShortBuffer {
                format: PixelFormat::Mjpeg,
                width,
                height,
                expected: (width * height * 3) as usize,
                got: 0,
            })
        }
        jpeg_decoder::PixelFormat::L8 => {
            let gray = GrayImage::from_raw(width, height, pixels).ok_or(
                DecodeError::ShortBuffer {
                    format: PixelFormat::Mjpeg,
                    width,
                    height,
                    expected: (width * height) as usize,
                    got: 0,
                },
            )?;
            Ok(gray_to_rgb(&gray))
        }
        other => Err(DecodeError::UnsupportedJpeg(other)),
    }
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> RgbImage {
    let mut out = RgbImage::new(width, height);
    for (i, chunk) in data
        .chunks_exact(4)
        .take((width * height / 2) as usize)
        .enumerate()
    {
        let [y0, u, y1, v] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let px = (i * 2) as u32;
        let (x, y) = (px % width, px / width);
        out.put_pixel(x, y, yuv_to_rgb(y0, u, v));
        if x + 1 < width {
            out.put_pixel(x + 1, y, yuv_to_rgb(y1, u, v));
        }
    }
    out
}

/// BT.601 limited-range conversion.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |n: i32| n.clamp(0, 255) as u8;
    Rgb([
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ])
}

/// BT.601 luma with weights summing to 256, so neutral pixels map to themselves.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * u32::from(r) + 150 * u32::from(g) + 29 * u32::from(b) + 128) >> 8) as u8
}

/// Single-channel derivation of an RGB image.
pub fn rgb_to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgb([r, g, b]) = *image.get_pixel(x, y);
        Luma([luma(r, g, b)])
    })
}

/// Expands a single-channel image back to three identical channels.
pub fn gray_to_rgb(image: &GrayImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let Luma([v]) = *image.get_pixel(x, y);
        Rgb([v, v, v])
    })
}

/// Wraps a canonical RGB image as a frame.
pub fn frame_from_rgb(image: RgbImage, sequence: u64) -> Frame {
    let (width, height) = image.dimensions();
    Frame::with_sequence(
        image.into_raw(),
        width,
        height,
        width * 3,
        PixelFormat::Rgb24,
        sequence,
    )
}

/// Re-encodes a frame into `target`, which must be a packed format.
///
/// Used when handing the canonical RGB frame to consumers with a different channel order.
pub fn convert(frame: &Frame, target: PixelFormat) -> Result<Frame, DecodeError> {
    if frame.format() == target {
        return Ok(frame.clone());
    }
    let rgb = decode_frame(frame)?;
    let (width, height) = rgb.dimensions();
    let sequence = frame.meta.sequence;
    let data: Vec<u8> = match target {
        PixelFormat::Rgb24 => rgb.into_raw(),
        PixelFormat::Bgr24 => rgb.pixels().flat_map(|Rgb([r, g, b])| [*b, *g, *r]).collect(),
        PixelFormat::Gray8 => rgb_to_gray(&rgb).into_raw(),
        PixelFormat::Yuyv4 | PixelFormat::Mjpeg => return Err(DecodeError::UnsupportedTarget(target)),
    };
    let stride = width * target.bytes_per_pixel().unwrap_or(0);
    let mut out = Frame::with_sequence(data, width, height, stride, target, sequence);
    out.timestamp = frame.timestamp;
    Ok(out)
}
