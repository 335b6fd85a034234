//! SDL2 Window Display Module
//! Presents rendered frames in an SDL2 window and turns key presses into pipeline commands.

use color_eyre::{eyre::eyre, Result};
use flume::Sender;
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Rect;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;
use tracing::{debug, error, info};

use super::DisplaySink;
use crate::capture::{Frame, PixelFormat};
use crate::pipeline::Command;

const TITLE: &str = "facecam";

/// SDL2 Window Display
/// Scales each frame into the window keeping its aspect ratio.
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    commands: Sender<Command>,
}

impl Sdl2Display {
    pub fn new(
        sdl_context: &sdl2::Sdl,
        width: u32,
        height: u32,
        commands: Sender<Command>,
    ) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(TITLE, width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        info!(
            "SDL2 window ready ({}x{}): S start, X stop, G gray, D detect, P snapshot, R record, T stop recording, Esc quit",
            width, height
        );

        Ok(Self {
            canvas,
            texture_creator,
            event_pump,
            commands,
        })
    }

    fn key_command(key: Keycode) -> Option<Command> {
        match key {
            Keycode::S => Some(Command::StartCamera),
            Keycode::X => Some(Command::StopCamera),
            Keycode::G => Some(Command::ToggleGray),
            Keycode::D => Some(Command::ToggleDetect),
            Keycode::P => Some(Command::SaveSnapshot),
            Keycode::R => Some(Command::StartRecording),
            Keycode::T => Some(Command::StopRecording),
            Keycode::Escape => Some(Command::Quit),
            _ => None,
        }
    }

    fn render_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.format() != PixelFormat::Rgb24 {
            return Err(eyre!("Cannot present {:?} frames", frame.format()));
        }
        let (width, height) = (frame.width(), frame.height());

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &frame.data, frame.meta.stride as usize)
            .map_err(|e| eyre!(e))?;

        let (out_w, out_h) = self.canvas.output_size().map_err(|e| eyre!(e))?;
        let scale = f64::min(
            f64::from(out_w) / f64::from(width),
            f64::from(out_h) / f64::from(height),
        );
        let (dst_w, dst_h) = (
            (f64::from(width) * scale) as u32,
            (f64::from(height) * scale) as u32,
        );
        let dst = Rect::new(
            ((out_w - dst_w) / 2) as i32,
            ((out_h - dst_h) / 2) as i32,
            dst_w,
            dst_h,
        );

        self.canvas.set_draw_color(Color::BLACK);
        self.canvas.clear();
        self.canvas
            .copy(&texture, None, Some(dst))
            .map_err(|e| eyre!(e))?;

        self.canvas.present();
        Ok(())
    }
}

impl DisplaySink for Sdl2Display {
    fn show(&mut self, frame: &Frame) {
        if let Err(e) = self.render_frame(frame) {
            error!("Display error: {}", e);
        }
    }

    fn show_status(&mut self, message: &str) {
        self.canvas.set_draw_color(Color::BLACK);
        self.canvas.clear();
        self.canvas.present();
        if let Err(e) = self
            .canvas
            .window_mut()
            .set_title(&format!("{TITLE} - {message}"))
        {
            debug!("Cannot set window title: {}", e);
        }
    }

    fn poll(&mut self) {
        for event in self.event_pump.poll_iter() {
            let command = match event {
                Event::Quit { .. } => {
                    info!("Quit event received");
                    Some(Command::Quit)
                }
                Event::KeyDown {
                    keycode: Some(key),
                    repeat: false,
                    ..
                } => Self::key_command(key),
                _ => None,
            };
            if let Some(command) = command {
                if self.commands.send(command).is_err() {
                    debug!("Command channel closed");
                }
            }
        }
    }
}
