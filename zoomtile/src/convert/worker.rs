//! The conversion worker process entry point.
//!
//! This code runs inside the freshly spawned child, never in the engine
//! process. Images are decoded with the `image` crate and streamed out as
//! binary PPM; documents are rasterized through an external `pdftoppm`.
//!
//! Binaries embedding the engine route their hidden `convert-worker`
//! subcommand to [`run_cli`].

use std::path::{Path, PathBuf};
use std::process::Command;

use image::imageops;
use image::{DynamicImage, ImageReader, RgbImage};
use tracing::debug;

use super::{ConversionError, ConversionJob};
use crate::tiler::PpmWriter;

/// Parse worker arguments and run the job; returns a process exit code.
///
/// Errors are printed to stderr, where the parent's runner picks them up
/// as the job's failure message.
pub fn run_cli<I: IntoIterator<Item = String>>(args: I) -> i32 {
    match parse_args(args).and_then(|job| run_job(&job)) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}

/// Execute one conversion job in this process.
pub fn run_job(job: &ConversionJob) -> Result<(), ConversionError> {
    match job {
        ConversionJob::ConvertImage {
            input,
            output,
            rotation,
            invert,
            mono,
        } => convert_image(input, output, *rotation, *invert, *mono),
        ConversionJob::ConvertDocument { input, output, dpi } => {
            convert_document(input, output, *dpi)
        }
    }
}

/// Reconstruct a [`ConversionJob`] from worker-process arguments.
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ConversionJob, ConversionError> {
    let mut args = args.into_iter();
    let mode = args
        .next()
        .ok_or_else(|| ConversionError::BadArgs("missing mode".to_string()))?;
    let input = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| ConversionError::BadArgs("missing input path".to_string()))?;
    let output = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| ConversionError::BadArgs("missing output path".to_string()))?;

    match mode.as_str() {
        "image" => {
            let mut rotation = 0u16;
            let mut invert = false;
            let mut mono = false;
            while let Some(flag) = args.next() {
                match flag.as_str() {
                    "--rotation" => {
                        let value = args.next().ok_or_else(|| {
                            ConversionError::BadArgs("--rotation needs a value".to_string())
                        })?;
                        rotation = value.parse().map_err(|_| {
                            ConversionError::BadArgs(format!("bad rotation {:?}", value))
                        })?;
                    }
                    "--invert" => invert = true,
                    "--mono" => mono = true,
                    other => {
                        return Err(ConversionError::BadArgs(format!(
                            "unknown image flag {:?}",
                            other
                        )))
                    }
                }
            }
            Ok(ConversionJob::ConvertImage {
                input,
                output,
                rotation,
                invert,
                mono,
            })
        }
        "document" => {
            let mut dpi = 150u32;
            while let Some(flag) = args.next() {
                match flag.as_str() {
                    "--dpi" => {
                        let value = args.next().ok_or_else(|| {
                            ConversionError::BadArgs("--dpi needs a value".to_string())
                        })?;
                        dpi = value
                            .parse()
                            .map_err(|_| ConversionError::BadArgs(format!("bad dpi {:?}", value)))?;
                    }
                    other => {
                        return Err(ConversionError::BadArgs(format!(
                            "unknown document flag {:?}",
                            other
                        )))
                    }
                }
            }
            Ok(ConversionJob::ConvertDocument { input, output, dpi })
        }
        other => Err(ConversionError::BadArgs(format!("unknown mode {:?}", other))),
    }
}

fn convert_image(
    input: &Path,
    output: &Path,
    rotation: u16,
    invert: bool,
    mono: bool,
) -> Result<(), ConversionError> {
    debug!(input = %input.display(), "decoding source image");
    let decoded = ImageReader::open(input)?
        .decode()
        .map_err(|e| ConversionError::Decode(e.to_string()))?;
    let mut rgb = decoded.to_rgb8();

    rgb = match rotation {
        0 => rgb,
        90 => imageops::rotate90(&rgb),
        180 => imageops::rotate180(&rgb),
        270 => imageops::rotate270(&rgb),
        other => return Err(ConversionError::UnsupportedRotation(other)),
    };

    if mono {
        let gray = imageops::grayscale(&rgb);
        rgb = DynamicImage::ImageLuma8(gray).to_rgb8();
    }
    if invert {
        imageops::invert(&mut rgb);
    }

    write_ppm(output, &rgb)
}

fn write_ppm(output: &Path, image: &RgbImage) -> Result<(), ConversionError> {
    let (width, height) = image.dimensions();
    let mut writer = PpmWriter::create(output, width, height)?;
    let row_bytes = width as usize * 3;
    for row in image.as_raw().chunks(row_bytes) {
        writer.write_row(row)?;
    }
    writer.finish()?;
    Ok(())
}

fn convert_document(input: &Path, output: &Path, dpi: u32) -> Result<(), ConversionError> {
    // pdftoppm appends ".ppm" to its output prefix.
    let prefix = output.with_extension("page");
    let produced = PathBuf::from(format!("{}.ppm", prefix.display()));

    debug!(input = %input.display(), dpi, "rasterizing document with pdftoppm");
    let result = Command::new("pdftoppm")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-singlefile")
        .arg(input)
        .arg(&prefix)
        .output()?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(ConversionError::Tool(format!(
            "pdftoppm exited with {}: {}",
            result.status,
            stderr.trim()
        )));
    }

    std::fs::rename(&produced, output)?;
    Ok(())
}
