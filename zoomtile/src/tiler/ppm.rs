//! Binary PPM (P6) reading and writing.
//!
//! PPM is the normalized raster format the conversion workers emit and the
//! tiler consumes: a tiny header followed by raw interleaved RGB rows, which
//! is exactly what scanline streaming wants.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{ScanlineSource, TilerError};

/// Parse a P6 header, returning `(width, height)`.
///
/// Requires binary PPM with `maxval` 255. `#` comment lines are skipped.
pub fn read_ppm_header(reader: &mut impl BufRead) -> Result<(u32, u32), TilerError> {
    let mut fields = Vec::with_capacity(4);
    let mut token = Vec::new();
    let mut in_comment = false;

    while fields.len() < 4 {
        let mut byte = [0u8; 1];
        if reader.read(&mut byte)? == 0 {
            return Err(TilerError::BadHeader(
                "not enough entries in PPM header".to_string(),
            ));
        }
        let b = byte[0];
        if in_comment {
            in_comment = b != b'\n';
        } else if b == b'#' {
            in_comment = true;
        } else if b.is_ascii_whitespace() {
            if !token.is_empty() {
                fields.push(String::from_utf8_lossy(&token).into_owned());
                token.clear();
            }
        } else {
            token.push(b);
        }
    }

    if fields[0] != "P6" {
        return Err(TilerError::BadHeader(
            "can only load binary PPM (P6 format)".to_string(),
        ));
    }

    let parse = |name: &str, s: &str| {
        s.parse::<u32>()
            .map_err(|_| TilerError::BadHeader(format!("invalid PPM {}: {:?}", name, s)))
    };
    let width = parse("width", &fields[1])?;
    let height = parse("height", &fields[2])?;
    let maxval = parse("maxval", &fields[3])?;

    if maxval != 255 {
        return Err(TilerError::BadHeader("PPM maxval must equal 255".to_string()));
    }

    Ok((width, height))
}

/// Streaming reader over a P6 file.
pub struct PpmReader {
    reader: BufReader<File>,
    width: u32,
    height: u32,
}

impl PpmReader {
    /// Open a PPM file and parse its header.
    pub fn open(path: &Path) -> Result<Self, TilerError> {
        let mut reader = BufReader::new(File::open(path)?);
        let (width, height) = read_ppm_header(&mut reader)?;
        Ok(Self {
            reader,
            width,
            height,
        })
    }
}

impl ScanlineSource for PpmReader {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn read_scanline(&mut self, buf: &mut [u8]) -> Result<(), TilerError> {
        self.reader.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TilerError::ShortRead
            } else {
                TilerError::Io(e)
            }
        })
    }
}

/// Incremental P6 writer; rows are appended one at a time.
pub struct PpmWriter {
    writer: BufWriter<File>,
}

impl PpmWriter {
    /// Create the output file and write the header.
    pub fn create(path: &Path, width: u32, height: u32) -> Result<Self, std::io::Error> {
        let mut writer = BufWriter::new(File::create(path)?);
        write!(writer, "P6\n{} {}\n255\n", width, height)?;
        Ok(Self { writer })
    }

    /// Append one row of `width * 3` raw RGB bytes.
    pub fn write_row(&mut self, row: &[u8]) -> Result<(), std::io::Error> {
        self.writer.write_all(row)
    }

    /// Flush and close the file.
    pub fn finish(mut self) -> Result<(), std::io::Error> {
        self.writer.flush()
    }
}
