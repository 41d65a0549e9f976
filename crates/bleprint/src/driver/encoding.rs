//! Text encodings for thermal printers.
//!
//! Most Chinese thermal printers expect GBK (simplified) or Big5
//! (traditional). Characters the table cannot represent are printed as `?`.

use std::str::FromStr;

/// Character encoding used when turning text into printer bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Gbk,
    Big5,
}

impl TextEncoding {
    /// Encode `s`, replacing unmappable characters with `?`.
    pub fn encode(self, s: &str) -> Vec<u8> {
        let table = match self {
            Self::Utf8 => return s.as_bytes().to_vec(),
            Self::Gbk => encoding_rs::GBK,
            Self::Big5 => encoding_rs::BIG5,
        };

        let (bytes, _, had_errors) = table.encode(s);
        if !had_errors {
            return bytes.into_owned();
        }

        // encoding_rs emits HTML numeric references for unmappable
        // characters; printers would print those literally.
        let mut out = Vec::with_capacity(s.len() * 2);
        let mut buf = [0u8; 4];
        for c in s.chars() {
            let (bytes, _, unmappable) = table.encode(c.encode_utf8(&mut buf));
            if unmappable {
                out.push(b'?');
            } else {
                out.extend_from_slice(&bytes);
            }
        }
        out
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "utf8" => Ok(Self::Utf8),
            "gbk" | "gb2312" | "gb18030" => Ok(Self::Gbk),
            "big5" => Ok(Self::Big5),
            other => Err(format!("unsupported text encoding '{other}'")),
        }
    }
}
