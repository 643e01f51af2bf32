//! Text output on the bootloader-provided linear framebuffer.

use core::fmt;

use limine::request::FramebufferRequest;
use noto_sans_mono_bitmap::{
    FontWeight, RasterHeight, RasterizedChar, get_raster, get_raster_width,
};

use crate::console::Console;

#[used]
#[unsafe(link_section = ".requests")]
static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new();

const WEIGHT: FontWeight = FontWeight::Regular;
const HEIGHT: RasterHeight = RasterHeight::Size24;
const LINE_SPACING: usize = 2;
const BORDER: usize = 4;

#[derive(Debug, Clone, Copy)]
struct Layout {
    width: usize,
    height: usize,
    pitch: usize,
    bytes_per_pixel: usize,
    red_shift: u8,
    green_shift: u8,
    blue_shift: u8,
}

pub struct FrameBufferWriter {
    buffer: *mut u8,
    layout: Layout,
    x: usize,
    y: usize,
}

// SAFETY: the framebuffer is only written through the console's lock.
unsafe impl Send for FrameBufferWriter {}

impl FrameBufferWriter {
    fn new(buffer: *mut u8, layout: Layout) -> Self {
        let mut writer = Self {
            buffer,
            layout,
            x: BORDER,
            y: BORDER,
        };
        writer.clear();
        writer
    }

    fn clear(&mut self) {
        let len = self.layout.pitch * self.layout.height;
        // SAFETY: the bootloader maps `pitch * height` bytes at `buffer`.
        unsafe { core::ptr::write_bytes(self.buffer, 0, len) };
        self.x = BORDER;
        self.y = BORDER;
    }

    fn newline(&mut self) {
        self.y += HEIGHT.val() + LINE_SPACING;
        self.x = BORDER;
    }

    fn write_char(&mut self, c: char) {
        match c {
            '\n' => self.newline(),
            '\r' => self.x = BORDER,
            c => {
                let char_width = get_raster_width(WEIGHT, HEIGHT);
                if self.x + char_width >= self.layout.width {
                    self.newline();
                }
                if self.y + HEIGHT.val() + BORDER >= self.layout.height {
                    self.clear();
                }
                let raster = get_raster(c, WEIGHT, HEIGHT)
                    .or_else(|| get_raster('?', WEIGHT, HEIGHT));
                if let Some(raster) = raster {
                    self.write_rendered_char(&raster);
                }
            }
        }
    }

    fn write_rendered_char(&mut self, raster: &RasterizedChar) {
        for (y, row) in raster.raster().iter().enumerate() {
            for (x, intensity) in row.iter().enumerate() {
                self.write_pixel(self.x + x, self.y + y, *intensity);
            }
        }
        self.x += raster.width();
    }

    fn write_pixel(&mut self, x: usize, y: usize, intensity: u8) {
        let layout = &self.layout;
        if x >= layout.width || y >= layout.height {
            return;
        }

        let value = (intensity as u32) << layout.red_shift
            | (intensity as u32) << layout.green_shift
            | (intensity as u32) << layout.blue_shift;
        let bytes = value.to_le_bytes();
        let count = layout.bytes_per_pixel.min(bytes.len());
        let offset = y * layout.pitch + x * layout.bytes_per_pixel;

        // SAFETY: (x, y) is inside the visible area, so the pixel lies inside the buffer.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), self.buffer.add(offset), count);
        }
    }
}

impl fmt::Write for FrameBufferWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            self.write_char(c);
        }
        Ok(())
    }
}

pub fn init(console: &Console) {
    let Some(response) = FRAMEBUFFER_REQUEST.get_response() else {
        return;
    };
    let Some(fb) = response.framebuffers().next() else {
        return;
    };

    let layout = Layout {
        width: fb.width() as usize,
        height: fb.height() as usize,
        pitch: fb.pitch() as usize,
        bytes_per_pixel: (fb.bpp() as usize).div_ceil(8),
        red_shift: fb.red_mask_shift(),
        green_shift: fb.green_mask_shift(),
        blue_shift: fb.blue_mask_shift(),
    };
    if layout.bytes_per_pixel == 0 {
        return;
    }

    console.attach_framebuffer(FrameBufferWriter::new(fb.addr(), layout));
}
