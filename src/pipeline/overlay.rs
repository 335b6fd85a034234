//! Overlay drawing on canonical RGB frames.

use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_9X18_BOLD},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
};
use image::{Rgb, RgbImage};

use crate::detect::Region;

pub const FACE_LABEL: &str = "Face";
pub const RECORDING_LABEL: &str = "RECORDING";

const REGION_COLOR: Rgb888 = Rgb888::new(255, 0, 0);
const REGION_STROKE: u32 = 4;
/// Gap between a region's top edge and its label baseline.
const LABEL_LIFT: i32 = 10;

const TIMESTAMP_ANCHOR: Point = Point::new(20, 30);
const TIMESTAMP_FONT: &MonoFont<'static> = &FONT_9X18_BOLD;

const RECORDING_COLOR: Rgb888 = Rgb888::new(250, 0, 0);
const RECORDING_MARGIN: i32 = 20;
const LABEL_FONT: &MonoFont<'static> = &FONT_10X20;

const SHADOW_OFFSET: Point = Point::new(2, 2);

/// Draws an outline and a label above the top-left corner of every region.
pub fn draw_regions(image: &mut RgbImage, regions: &[Region]) {
    let mut canvas = Canvas(image);
    let stroke = PrimitiveStyle::with_stroke(REGION_COLOR, REGION_STROKE);
    let label = MonoTextStyle::new(LABEL_FONT, REGION_COLOR);

    for region in regions {
        infallible(
            Rectangle::new(
                Point::new(region.x, region.y),
                Size::new(region.width, region.height),
            )
            .into_styled(stroke)
            .draw(&mut canvas),
        );
        infallible(
            Text::with_baseline(
                FACE_LABEL,
                Point::new(region.x, region.y - LABEL_LIFT),
                label,
                Baseline::Alphabetic,
            )
            .draw(&mut canvas),
        );
    }
}

/// Draws `text` in white over a black drop shadow at the fixed top-left anchor.
pub fn draw_timestamp(image: &mut RgbImage, text: &str) {
    draw_shadowed(
        &mut Canvas(image),
        text,
        TIMESTAMP_ANCHOR,
        TIMESTAMP_FONT,
        Rgb888::WHITE,
    );
}

/// Draws the recording label right-aligned near the top edge.
pub fn draw_recording_label(image: &mut RgbImage) {
    let text_width = LABEL_FONT.character_size.width * RECORDING_LABEL.len() as u32;
    let text_height = LABEL_FONT.character_size.height as i32;
    let anchor = Point::new(
        image.width() as i32 - text_width as i32 - RECORDING_MARGIN,
        text_height + RECORDING_MARGIN,
    );
    draw_shadowed(
        &mut Canvas(image),
        RECORDING_LABEL,
        anchor,
        LABEL_FONT,
        RECORDING_COLOR,
    );
}

fn draw_shadowed(
    canvas: &mut Canvas<'_>,
    text: &str,
    anchor: Point,
    font: &MonoFont<'_>,
    color: Rgb888,
) {
    for (offset, color) in [(SHADOW_OFFSET, Rgb888::BLACK), (Point::zero(), color)] {
        infallible(
            Text::with_baseline(
                text,
                anchor + offset,
                MonoTextStyle::new(font, color),
                Baseline::Alphabetic,
            )
            .draw(canvas),
        );
    }
}

fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(infallible) => match infallible {},
    }
}

/// Clipping draw target over an RGB image.
struct Canvas<'a>(&'a mut RgbImage);

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = self.0.dimensions();
        for Pixel(point, color) in pixels {
            if point.x >= 0
                && point.y >= 0
                && (point.x as u32) < width
                && (point.y as u32) < height
            {
                self.0.put_pixel(
                    point.x as u32,
                    point.y as u32,
                    Rgb([color.r(), color.g(), color.b()]),
                );
            }
        }
        Ok(())
    }
}
