// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Camera capture

use std::io::Cursor;
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{imageops, ExtendedColorType, ImageEncoder, ImageFormat, RgbImage};
use tracing::{debug, info, warn};

/// One RGB8 frame
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Binary PPM (P6) encoding
    pub fn to_ppm(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        PnmEncoder::new(&mut out)
            .with_subtype(PnmSubtype::Pixmap(SampleEncoding::Binary))
            .write_image(self.image.as_raw(), self.width(), self.height(), ExtendedColorType::Rgb8)
            .context("encoding PPM")?;
        Ok(out)
    }

    /// Rotate clockwise by a multiple of 90 degrees
    pub fn rotated(self, degrees: u16) -> Frame {
        let image = match degrees % 360 {
            90 => imageops::rotate90(&self.image),
            180 => imageops::rotate180(&self.image),
            270 => imageops::rotate270(&self.image),
            _ => return self,
        };
        Frame { image }
    }

    /// Decode a PNM image (PPM, PGM or PBM), converting to RGB8
    pub fn from_ppm(data: &[u8]) -> Result<Self> {
        let decoded = image::load(Cursor::new(data), ImageFormat::Pnm).context("decoding PNM frame")?;
        Ok(Self {
            image: decoded.into_rgb8(),
        })
    }
}

/// Frame source for the detection loop
pub trait Camera: Send {
    /// Grab one frame; `None` when nothing is available right now
    fn capture(&mut self) -> Option<Frame>;

    fn release(&mut self) {}
}

/// Camera backed by an external capture program writing a PPM to stdout
pub struct CommandCamera {
    program: String,
    args: Vec<String>,
}

impl CommandCamera {
    pub fn new(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| anyhow!("empty capture command"))?;
        info!("Camera capture command: {}", command_line);
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn grab(&self) -> Result<Frame> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("running {}", self.program))?;
        if !output.status.success() {
            bail!("{} exited with {}", self.program, output.status);
        }
        Frame::from_ppm(&output.stdout)
    }
}

impl Camera for CommandCamera {
    fn capture(&mut self) -> Option<Frame> {
        match self.grab() {
            Ok(frame) if !frame.is_empty() => {
                debug!("Captured {}x{} frame", frame.width(), frame.height());
                Some(frame)
            }
            Ok(_) => {
                warn!("Capture command returned an empty frame");
                None
            }
            Err(e) => {
                warn!("Frame capture failed: {:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn strip(pixels: &[[u8; 3]]) -> Frame {
        let mut image = RgbImage::new(pixels.len() as u32, 1);
        for (x, px) in pixels.iter().enumerate() {
            image.put_pixel(x as u32, 0, Rgb(*px));
        }
        Frame::new(image)
    }

    #[test]
    fn test_ppm_encode_parse() {
        let frame = strip(&[[1, 2, 3], [4, 5, 6]]);
        let ppm = frame.to_ppm().unwrap();
        assert!(ppm.starts_with(b"P6"));

        let parsed = Frame::from_ppm(&ppm).unwrap();
        assert_eq!((parsed.width(), parsed.height()), (2, 1));
        assert_eq!(parsed.image().as_raw(), frame.image().as_raw());
    }

    #[test]
    fn test_ppm_with_comment_header() {
        let mut data = b"P6\n# from raspistill\n1 1\n255\n".to_vec();
        data.extend_from_slice(&[9, 8, 7]);
        let frame = Frame::from_ppm(&data).unwrap();
        assert_eq!(frame.image().get_pixel(0, 0), &Rgb([9, 8, 7]));
    }

    #[test]
    fn test_rotation() {
        let frame = strip(&[[1, 1, 1], [2, 2, 2]]);

        let quarter = frame.clone().rotated(90);
        assert_eq!((quarter.width(), quarter.height()), (1, 2));
        assert_eq!(quarter.image().as_raw(), &vec![1, 1, 1, 2, 2, 2]);

        let half = frame.clone().rotated(180);
        assert_eq!(half.image().as_raw(), &vec![2, 2, 2, 1, 1, 1]);

        let three_quarters = frame.clone().rotated(270);
        assert_eq!((three_quarters.width(), three_quarters.height()), (1, 2));
        assert_eq!(three_quarters.image().as_raw(), &vec![2, 2, 2, 1, 1, 1]);

        let unchanged = frame.rotated(45);
        assert_eq!((unchanged.width(), unchanged.height()), (2, 1));
    }

    #[test]
    fn test_truncated_ppm_rejected() {
        assert!(Frame::from_ppm(b"P6\n4 4\n255\n\x00\x01").is_err());
        assert!(Frame::from_ppm(b"GIF89a").is_err());
    }
}
