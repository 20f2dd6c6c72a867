//! Writing framebuffer snapshots as PNG files.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use gleam::gl::{RGBA, UNSIGNED_BYTE};
use image::png::PngEncoder;
use image::ColorType;

use crate::driver::Driver;
use crate::error::Result;

/// Where the snapshot of `call_no` goes. Swaps are named for the frame they
/// end instead.
pub fn snapshot_path(prefix: &str, call_no: u32, frame: Option<u32>) -> PathBuf {
    match frame {
        Some(frame) => PathBuf::from(format!("{}frame_{}.png", prefix, frame)),
        None => PathBuf::from(format!("{}{}.png", prefix, call_no)),
    }
}

/// Read back the bound read framebuffer as RGBA, top row first.
pub fn read_framebuffer(driver: &dyn Driver, width: i32, height: i32) -> Vec<u8> {
    let data = driver.read_pixels(0, 0, width, height, RGBA, UNSIGNED_BYTE);
    flip_rows(&data, width.max(0) as usize * 4)
}

/// GL returns rows bottom to top; image files want them top to bottom.
fn flip_rows(data: &[u8], stride: usize) -> Vec<u8> {
    if stride == 0 {
        return Vec::new();
    }
    data.chunks_exact(stride).rev().flatten().cloned().collect()
}

pub fn write_png<P: AsRef<Path>>(path: P, data: &[u8], width: u32, height: u32) -> Result<()> {
    let file = File::create(path)?;
    PngEncoder::new(file)
        .encode(data, width, height, ColorType::Rgba8)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(())
}

#[test]
fn test_snapshot_path() {
    assert_eq!(snapshot_path("out/snap_", 1234, None), PathBuf::from("out/snap_1234.png"));
    assert_eq!(snapshot_path("", 99, Some(3)), PathBuf::from("frame_3.png"));
}

#[test]
fn test_flip_rows() {
    assert_eq!(flip_rows(&[1, 2, 3, 4, 5, 6], 2), vec![5, 6, 3, 4, 1, 2]);
    assert!(flip_rows(&[1, 2], 0).is_empty());
}

#[test]
fn test_write_png() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap.png");
    let pixels: Vec<u8> = (0..2 * 2 * 4).map(|i| i as u8).collect();
    write_png(&path, &pixels, 2, 2).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
}
