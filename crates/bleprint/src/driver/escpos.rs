//! ESC/POS command driver.
//!
//! Covers the subset understood by common 58mm BLE receipt printers:
//! initialise, text, feed, cut, raster images (`GS v 0`) and native QR codes
//! (`GS ( k`).

use super::{CommandDriver, DriverError, QrErrorCorrection, QrOptions, TextEncoding};

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;
const FS: u8 = 0x1c;
const LF: u8 = 0x0a;

/// Rows per `GS v 0` band. Keeps single commands small for BLE buffers.
const RASTER_BAND_ROWS: u32 = 128;

/// Largest byte-mode payload a QR symbol can store (version 40, level L).
const QR_MAX_DATA: usize = 2953;

/// Widest image whose packed row length fits the 16-bit `xL xH` field.
const RASTER_MAX_WIDTH: u32 = u16::MAX as u32 * 8;

/// Luminance below which a pixel prints black.
const DEFAULT_THRESHOLD: u8 = 128;

/// `ESC @`: reset printer.
fn cmd_init() -> Vec<u8> {
    vec![ESC, b'@']
}

/// `ESC d n`: print buffer and feed `n` lines.
fn cmd_feed(lines: u8) -> Vec<u8> {
    vec![ESC, b'd', lines]
}

/// `GS V 66 n`: feed `n` dots then full cut.
fn cmd_cut(feed: u8) -> Vec<u8> {
    vec![GS, b'V', 66, feed]
}

/// `GS ( k` with function code `fn_code` and parameters.
fn cmd_qr(fn_code: u8, params: &[u8]) -> Vec<u8> {
    let len = (params.len() + 2) as u16;
    let mut buf = Vec::with_capacity(7 + params.len());
    buf.extend_from_slice(&[GS, b'(', b'k']);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.push(0x31); // cn: QR code
    buf.push(fn_code);
    buf.extend_from_slice(params);
    buf
}

/// `GS v 0 m xL xH yL yH d...`: print one raster band.
fn cmd_raster(width_bytes: u16, rows: u16, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + data.len());
    buf.extend_from_slice(&[GS, b'v', b'0', 0x00]);
    buf.extend_from_slice(&width_bytes.to_le_bytes());
    buf.extend_from_slice(&rows.to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Pack one RGBA row into 1bpp, MSB is the leftmost pixel.
fn pack_row(rgba_row: &[u8], threshold: u8) -> Vec<u8> {
    let width = rgba_row.len() / 4;
    let mut out = vec![0u8; width.div_ceil(8)];
    for (x, px) in rgba_row.chunks_exact(4).enumerate() {
        if is_black(px, threshold) {
            out[x / 8] |= 0x80 >> (x % 8);
        }
    }
    out
}

/// Opaque pixels darker than `threshold` print black.
fn is_black(px: &[u8], threshold: u8) -> bool {
    let (r, g, b, a) = (px[0] as u32, px[1] as u32, px[2] as u32, px[3]);
    let luma = (r * 299 + g * 587 + b * 114) / 1000;
    a >= 128 && luma < threshold as u32
}

fn qr_level(level: QrErrorCorrection) -> u8 {
    match level {
        QrErrorCorrection::Low => 48,
        QrErrorCorrection::Medium => 49,
        QrErrorCorrection::Quartile => 50,
        QrErrorCorrection::High => 51,
    }
}

/// ESC/POS driver.
#[derive(Debug, Clone)]
pub struct EscPosDriver {
    /// Luminance threshold for image binarisation.
    pub threshold: u8,
}

impl Default for EscPosDriver {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl EscPosDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }
}

impl CommandDriver for EscPosDriver {
    fn name(&self) -> &str {
        "ESC/POS"
    }

    fn init(&self) -> Vec<Vec<u8>> {
        vec![cmd_init()]
    }

    fn text(&self, content: &str, encoding: TextEncoding) -> Vec<Vec<u8>> {
        let mut line = Vec::with_capacity(content.len() + 5);
        match encoding {
            TextEncoding::Utf8 => line.extend(encoding.encode(content)),
            TextEncoding::Gbk | TextEncoding::Big5 => {
                // FS & enters double-byte mode, FS . leaves it.
                line.extend_from_slice(&[FS, b'&']);
                line.extend(encoding.encode(content));
                line.extend_from_slice(&[FS, b'.']);
            }
        }
        line.push(LF);
        vec![line]
    }

    fn feed(&self, lines: u32) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut left = lines;
        while left > 0 {
            let n = left.min(u8::MAX as u32);
            out.push(cmd_feed(n as u8));
            left -= n;
        }
        out
    }

    fn cut(&self) -> Vec<Vec<u8>> {
        vec![cmd_cut(0)]
    }

    fn image(&self, rgba: &[u8], width: u32, height: u32) -> Result<Vec<Vec<u8>>, DriverError> {
        if width == 0 || height == 0 {
            return Err(DriverError::EmptyImage { width, height });
        }
        let Ok(width_bytes) = u16::try_from(width.div_ceil(8)) else {
            return Err(DriverError::ImageTooWide {
                width,
                max: RASTER_MAX_WIDTH,
            });
        };
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(DriverError::InvalidImageSize {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }

        let row_len = width as usize * 4;
        let rows: Vec<Vec<u8>> = rgba
            .chunks_exact(row_len)
            .map(|row| pack_row(row, self.threshold))
            .collect();

        let bands = rows
            .chunks(RASTER_BAND_ROWS as usize)
            .map(|band| cmd_raster(width_bytes, band.len() as u16, &band.concat()))
            .collect::<Vec<_>>();

        tracing::debug!(width, height, bands = bands.len(), "Encoded raster image");
        Ok(bands)
    }

    fn qr(&self, content: &str, options: &QrOptions) -> Vec<Vec<u8>> {
        let mut data = content.as_bytes();
        if data.len() > QR_MAX_DATA {
            tracing::warn!(len = data.len(), max = QR_MAX_DATA, "QR content truncated");
            data = &data[..QR_MAX_DATA];
        }

        let mut store = Vec::with_capacity(data.len() + 1);
        store.push(0x30);
        store.extend_from_slice(data);

        vec![
            cmd_qr(0x41, &[0x32, 0x00]), // model 2
            cmd_qr(0x43, &[options.size.clamp(1, 16)]),
            cmd_qr(0x45, &[qr_level(options.error_correction)]),
            cmd_qr(0x50, &store),
            cmd_qr(0x51, &[0x30]), // print stored symbol
        ]
    }
}
