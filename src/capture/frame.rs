use std::time::Instant;

/// Sensor resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Significant bits per sample produced by the sensor.
pub const SAMPLE_BITS: u32 = 14;

/// Largest value a sample can hold.
pub const SAMPLE_MAX: u16 = (1 << SAMPLE_BITS) - 1;

/// One thermal snapshot.
///
/// Samples are row-major, one `u16` per pixel with the low 14 bits used.
/// A frame is allocated per acquisition and moved, never shared mutably,
/// so the consumer always sees the data exactly as the driver wrote it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bounds: Bounds,
    pub pixels: Vec<u16>,

    /// Acquisition order, assigned by the acquisition loop.
    pub sequence: u64,

    /// Capture timestamp for latency tracking
    pub acquired_at: Instant,
}

impl Frame {
    /// Zeroed frame sized for `bounds`.
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            pixels: vec![0; bounds.pixel_count()],
            sequence: 0,
            acquired_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.bounds.width
    }

    pub fn height(&self) -> u32 {
        self.bounds.height
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.bounds.width || y >= self.bounds.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.bounds.width as usize + x as usize)
            .copied()
    }

    pub fn set(&mut self, x: u32, y: u32, value: u16) {
        if x < self.bounds.width && y < self.bounds.height {
            let idx = y as usize * self.bounds.width as usize + x as usize;
            self.pixels[idx] = value & SAMPLE_MAX;
        }
    }
}
