//! Command drivers.
//!
//! A driver turns high-level print operations into byte fragments. Drivers
//! are pure and synchronous; the printer only concatenates what they emit.

pub mod encoding;
pub mod escpos;

pub use encoding::TextEncoding;
pub use escpos::EscPosDriver;

/// Errors raised while building command fragments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("Invalid image buffer: expected {expected} bytes for {width}x{height} RGBA, got {actual}")]
    InvalidImageSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Image dimensions must be non-zero, got {width}x{height}")]
    EmptyImage { width: u32, height: u32 },

    #[error("Image is {width}px wide, raster rows hold at most {max}px")]
    ImageTooWide { width: u32, max: u32 },
}

/// QR code error-correction level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QrErrorCorrection {
    Low,
    #[default]
    Medium,
    Quartile,
    High,
}

/// Options for [`CommandDriver::qr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrOptions {
    /// Module size in dots (1..=16).
    pub size: u8,
    pub error_correction: QrErrorCorrection,
}

impl Default for QrOptions {
    fn default() -> Self {
        Self {
            size: 6,
            error_correction: QrErrorCorrection::default(),
        }
    }
}

impl QrOptions {
    /// Builder: set module size, clamped to 1..=16.
    pub fn with_size(mut self, size: u8) -> Self {
        self.size = size.clamp(1, 16);
        self
    }

    pub fn with_error_correction(mut self, level: QrErrorCorrection) -> Self {
        self.error_correction = level;
        self
    }
}

/// Interface implemented by each printer command language.
pub trait CommandDriver: Send + Sync {
    /// Human-readable driver name (e.g. "ESC/POS").
    fn name(&self) -> &str;

    /// Reset the printer to its power-on state.
    fn init(&self) -> Vec<Vec<u8>>;

    /// Print one line of text in the given encoding.
    fn text(&self, content: &str, encoding: TextEncoding) -> Vec<Vec<u8>>;

    /// Feed paper by `lines` lines.
    fn feed(&self, lines: u32) -> Vec<Vec<u8>>;

    /// Cut the paper.
    fn cut(&self) -> Vec<Vec<u8>>;

    /// Print an RGBA image (4 bytes per pixel, row-major).
    fn image(&self, rgba: &[u8], width: u32, height: u32) -> Result<Vec<Vec<u8>>, DriverError>;

    /// Print a QR code for `content`.
    fn qr(&self, content: &str, options: &QrOptions) -> Vec<Vec<u8>>;
}
