//! src/codec.rs
//!
//! Byte-exact codec for header-prefixed binary matrix files.
//!
//! # File layout
//! ```text
//! bytes 0-3:  rows           (u32, big-endian)
//! bytes 4-7:  cols           (u32, big-endian)
//! bytes 8..:  rows * cols elements, row-major, big-endian for multi-byte widths
//! ```
//!
//! One row is a *record*. Records are fixed-length, so record `i` starts at
//! `HEADER_SIZE + i * cols * width` and can be read with a single seek.
//!
//! Element widths are a closed set ([`ElementWidth`]); the [`Element`] trait
//! binds an in-memory scalar type to its width and its big-endian encoding.
//!
//! Record indices are *not* bounds-checked against the header here. Readers
//! in this crate reduce every index modulo the row count before calling in;
//! other callers must do the same.

use anyhow::{ensure, Context, Result};
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::FeederError;

/// Size of the `(rows, cols)` header in bytes.
pub const HEADER_SIZE: u64 = 2 * std::mem::size_of::<u32>() as u64;

/// Dimensions stored in a matrix file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixHeader {
    /// Number of records in the file.
    pub rows: usize,
    /// Number of elements per record.
    pub cols: usize,
}

impl MatrixHeader {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Total number of elements in the body.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_be_bytes(self) -> Result<[u8; HEADER_SIZE as usize]> {
        let rows = u32::try_from(self.rows)
            .with_context(|| format!("row count {} does not fit in a u32 header", self.rows))?;
        let cols = u32::try_from(self.cols)
            .with_context(|| format!("column count {} does not fit in a u32 header", self.cols))?;

        let mut bytes = [0u8; HEADER_SIZE as usize];
        bytes[..4].copy_from_slice(&rows.to_be_bytes());
        bytes[4..].copy_from_slice(&cols.to_be_bytes());
        Ok(bytes)
    }
}

/// On-disk byte width of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementWidth {
    Width1,
    Width2,
    Width4,
}

impl ElementWidth {
    pub const fn bytes(self) -> usize {
        match self {
            ElementWidth::Width1 => 1,
            ElementWidth::Width2 => 2,
            ElementWidth::Width4 => 4,
        }
    }
}

/// A scalar that can be stored in a matrix file.
///
/// `decode_be` receives exactly `WIDTH.bytes()` bytes. Big-endian decoding is a
/// no-op on big-endian hosts and a byte swap on little-endian ones; 1-byte
/// elements are never swapped.
pub trait Element: Copy + Default + Send + 'static {
    const WIDTH: ElementWidth;

    fn decode_be(bytes: &[u8]) -> Self;

    fn encode_be(self, out: &mut Vec<u8>);

    /// Plain numeric cast into the training type. No scaling.
    fn widen(self) -> f32;
}

#[inline]
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(&bytes[..N]);
    array
}

impl Element for u8 {
    const WIDTH: ElementWidth = ElementWidth::Width1;

    #[inline]
    fn decode_be(bytes: &[u8]) -> Self {
        bytes[0]
    }

    #[inline]
    fn encode_be(self, out: &mut Vec<u8>) {
        out.push(self);
    }

    #[inline]
    fn widen(self) -> f32 {
        f32::from(self)
    }
}

impl Element for u16 {
    const WIDTH: ElementWidth = ElementWidth::Width2;

    #[inline]
    fn decode_be(bytes: &[u8]) -> Self {
        u16::from_be_bytes(fixed(bytes))
    }

    #[inline]
    fn encode_be(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    #[inline]
    fn widen(self) -> f32 {
        f32::from(self)
    }
}

impl Element for i32 {
    const WIDTH: ElementWidth = ElementWidth::Width4;

    #[inline]
    fn decode_be(bytes: &[u8]) -> Self {
        i32::from_be_bytes(fixed(bytes))
    }

    #[inline]
    fn encode_be(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    #[inline]
    fn widen(self) -> f32 {
        self as f32
    }
}

impl Element for f32 {
    const WIDTH: ElementWidth = ElementWidth::Width4;

    #[inline]
    fn decode_be(bytes: &[u8]) -> Self {
        f32::from_be_bytes(fixed(bytes))
    }

    #[inline]
    fn encode_be(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    #[inline]
    fn widen(self) -> f32 {
        self
    }
}

/// Decodes `out.len()` big-endian elements from `bytes`.
pub fn decode_into<E: Element>(bytes: &[u8], out: &mut [E]) {
    let width = E::WIDTH.bytes();
    for (chunk, slot) in bytes.chunks_exact(width).zip(out.iter_mut()) {
        *slot = E::decode_be(chunk);
    }
}

/// Widens decoded elements into the `f32` training buffer.
pub fn widen_into<E: Element>(src: &[E], dst: &mut [f32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = s.widen();
    }
}

/// Opens a dataset file, classifying failure as [`FeederError::FileOpen`].
pub(crate) fn open_dataset_file(path: &Path) -> Result<File> {
    let file = File::open(path).map_err(|source| FeederError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file)
}

fn read_header_from<R: Read>(reader: &mut R, path: &Path) -> Result<MatrixHeader> {
    let mut bytes = [0u8; HEADER_SIZE as usize];
    if let Err(e) = reader.read_exact(&mut bytes) {
        if e.kind() == ErrorKind::UnexpectedEof {
            return Err(FeederError::TruncatedHeader {
                path: path.to_path_buf(),
            }
            .into());
        }
        return Err(e).with_context(|| format!("Failed to read header of {}", path.display()));
    }

    let rows = u32::from_be_bytes(fixed(&bytes[..4]));
    let cols = u32::from_be_bytes(fixed(&bytes[4..]));
    if rows == 0 || cols == 0 {
        return Err(FeederError::InvalidHeader {
            path: path.to_path_buf(),
            rows,
            cols,
        }
        .into());
    }

    Ok(MatrixHeader::new(rows as usize, cols as usize))
}

/// Reads and validates the `(rows, cols)` header of a matrix file.
///
/// Fails if the file cannot be opened, is shorter than [`HEADER_SIZE`], or
/// declares a zero dimension.
pub fn read_header(path: impl AsRef<Path>) -> Result<MatrixHeader> {
    let path = path.as_ref();
    let mut file = open_dataset_file(path)?;
    read_header_from(&mut file, path)
}

/// Byte offset of record `index` in a file with `elements_per_row` elements of type `E`.
#[inline]
pub fn record_offset<E: Element>(index: usize, elements_per_row: usize) -> u64 {
    HEADER_SIZE + (index as u64) * (elements_per_row as u64) * (E::WIDTH.bytes() as u64)
}

/// Seeks to record `index` and decodes it into `out`.
///
/// `scratch` is resized to one record's worth of bytes and reused across calls.
fn read_record_with<E, R>(
    reader: &mut R,
    index: usize,
    out: &mut [E],
    scratch: &mut Vec<u8>,
) -> Result<()>
where
    E: Element,
    R: Read + Seek,
{
    let elements_per_row = out.len();
    scratch.resize(elements_per_row * E::WIDTH.bytes(), 0);

    reader
        .seek(SeekFrom::Start(record_offset::<E>(index, elements_per_row)))
        .with_context(|| format!("Failed to seek to record {}", index))?;
    reader
        .read_exact(scratch)
        .with_context(|| format!("Failed to read record {} ({} bytes)", index, scratch.len()))?;

    decode_into(scratch, out);
    Ok(())
}

/// Reads a single record from an already opened matrix file.
///
/// `out` must hold exactly `elements_per_row` elements.
pub fn read_record<E, R>(
    reader: &mut R,
    index: usize,
    elements_per_row: usize,
    out: &mut [E],
) -> Result<()>
where
    E: Element,
    R: Read + Seek,
{
    ensure!(
        out.len() == elements_per_row,
        "record buffer holds {} elements but records have {}",
        out.len(),
        elements_per_row
    );
    let mut scratch = Vec::new();
    read_record_with(reader, index, out, &mut scratch)
}

/// Opens `path` and reads record `index`.
pub fn read_record_from_path<E: Element>(
    path: impl AsRef<Path>,
    index: usize,
    elements_per_row: usize,
) -> Result<Vec<E>> {
    let path = path.as_ref();
    let mut file = open_dataset_file(path)?;
    let mut record = vec![E::default(); elements_per_row];
    read_record(&mut file, index, elements_per_row, &mut record)
        .with_context(|| format!("Failed to read from {}", path.display()))?;
    Ok(record)
}

/// Reads the records at `indices`, in the given order, into consecutive rows of `out`.
///
/// Each record is an independent seek + read; callers that care about locality
/// should sort `indices` first. Only the first `indices.len() * elements_per_row`
/// elements of `out` are written.
pub fn read_records<E: Element>(
    path: impl AsRef<Path>,
    indices: &[usize],
    elements_per_row: usize,
    out: &mut [E],
) -> Result<()> {
    let path = path.as_ref();
    ensure!(elements_per_row > 0, "records must have at least one element");
    let required = indices.len() * elements_per_row;
    if out.len() < required {
        return Err(FeederError::BufferTooSmall {
            buffer: "record",
            required,
            actual: out.len(),
        }
        .into());
    }

    let mut file = open_dataset_file(path)?;
    let mut scratch = Vec::with_capacity(elements_per_row * E::WIDTH.bytes());

    for (row, &index) in out[..required]
        .chunks_exact_mut(elements_per_row)
        .zip(indices)
    {
        read_record_with(&mut file, index, row, &mut scratch)
            .with_context(|| format!("Failed to read from {}", path.display()))?;
    }
    Ok(())
}

/// Loads a whole matrix file into memory.
pub fn read_matrix<E: Element>(path: impl AsRef<Path>) -> Result<(MatrixHeader, Vec<E>)> {
    let path = path.as_ref();
    let mut file = open_dataset_file(path)?;
    let header = read_header_from(&mut file, path)?;

    let mut bytes = vec![0u8; header.len() * E::WIDTH.bytes()];
    file.read_exact(&mut bytes).with_context(|| {
        format!(
            "{} is shorter than its {} x {} header declares",
            path.display(),
            header.rows,
            header.cols
        )
    })?;

    let mut data = vec![E::default(); header.len()];
    decode_into(&bytes, &mut data);
    Ok((header, data))
}

/// Writes `data` as a matrix file, replacing any existing file at `path`.
pub fn write_matrix<E: Element>(
    path: impl AsRef<Path>,
    header: MatrixHeader,
    data: &[E],
) -> Result<()> {
    let path = path.as_ref();
    if header.rows == 0 || header.cols == 0 {
        return Err(FeederError::InvalidHeader {
            path: path.to_path_buf(),
            rows: header.rows.min(u32::MAX as usize) as u32,
            cols: header.cols.min(u32::MAX as usize) as u32,
        }
        .into());
    }
    if data.len() != header.len() {
        return Err(FeederError::ShapeMismatch {
            expected: header.len(),
            actual: data.len(),
        }
        .into());
    }

    let mut body = Vec::with_capacity(data.len() * E::WIDTH.bytes());
    for &value in data {
        value.encode_be(&mut body);
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create matrix file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&header.to_be_bytes()?)?;
    writer.write_all(&body)?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush matrix file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn feeder_error(err: &anyhow::Error) -> &FeederError {
        err.downcast_ref::<FeederError>()
            .unwrap_or_else(|| panic!("expected a FeederError, got: {err:#}"))
    }

    /// Writes a matrix, then reads every record back one by one.
    fn assert_record_round_trip<E>(data: Vec<E>, rows: usize, cols: usize) -> Result<()>
    where
        E: Element + PartialEq + std::fmt::Debug,
    {
        let dir = TempDir::new()?;
        let path = dir.path().join("matrix.bin");
        write_matrix(&path, MatrixHeader::new(rows, cols), &data)?;

        let header = read_header(&path)?;
        assert_eq!(header, MatrixHeader::new(rows, cols));

        for i in 0..rows {
            let record: Vec<E> = read_record_from_path(&path, i, cols)?;
            assert_eq!(record.len(), cols);
            assert_eq!(&record[..], &data[i * cols..(i + 1) * cols]);
        }
        Ok(())
    }

    #[test]
    fn round_trips_every_width() -> Result<()> {
        assert_record_round_trip::<u8>((0..12).collect(), 4, 3)?;
        assert_record_round_trip::<u16>((0..12).map(|v| v * 1000 + 7).collect(), 3, 4)?;
        assert_record_round_trip::<f32>((0..12).map(|v| v as f32 * -0.5).collect(), 6, 2)?;
        assert_record_round_trip::<i32>((0..6).map(|v| v - 3).collect(), 2, 3)?;
        Ok(())
    }

    #[test]
    fn writes_big_endian_layout() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("layout.bin");
        write_matrix(&path, MatrixHeader::new(1, 2), &[0x0102u16, 0xA0B0])?;

        let bytes = std::fs::read(&path)?;
        assert_eq!(bytes, vec![0, 0, 0, 1, 0, 0, 0, 2, 0x01, 0x02, 0xA0, 0xB0]);
        Ok(())
    }

    #[test]
    fn decodes_float_from_big_endian_bytes() {
        let bytes = 1.5f32.to_be_bytes();
        let mut out = [0f32; 1];
        decode_into(&bytes, &mut out);
        assert_eq!(out[0], 1.5);
    }

    #[test]
    fn reads_record_from_any_seekable_reader() -> Result<()> {
        let mut bytes = vec![0, 0, 0, 3, 0, 0, 0, 2];
        bytes.extend_from_slice(&[10, 11, 20, 21, 30, 31]);
        let mut reader = Cursor::new(bytes);

        let mut record = [0u8; 2];
        read_record(&mut reader, 2, 2, &mut record)?;
        assert_eq!(record, [30, 31]);

        read_record(&mut reader, 0, 2, &mut record)?;
        assert_eq!(record, [10, 11]);
        Ok(())
    }

    #[test]
    fn read_records_keeps_caller_order_and_duplicates() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rows.bin");
        let data: Vec<f32> = (1..=8).map(|v| v as f32).collect();
        write_matrix(&path, MatrixHeader::new(4, 2), &data)?;

        let mut out = vec![0f32; 8];
        read_records(&path, &[3, 0, 0, 2], 2, &mut out)?;
        assert_eq!(out, vec![7.0, 8.0, 1.0, 2.0, 1.0, 2.0, 5.0, 6.0]);
        Ok(())
    }

    #[test]
    fn read_records_only_touches_required_prefix() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("prefix.bin8");
        write_matrix(&path, MatrixHeader::new(2, 2), &[1u8, 2, 3, 4])?;

        let mut out = vec![99u8; 6];
        read_records(&path, &[1], 2, &mut out)?;
        assert_eq!(out, vec![3, 4, 99, 99, 99, 99]);
        Ok(())
    }

    #[test]
    fn read_records_rejects_small_buffer() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("small.bin");
        write_matrix(&path, MatrixHeader::new(2, 2), &[1.0f32, 2.0, 3.0, 4.0])?;

        let mut out = vec![0f32; 3];
        let err = read_records(&path, &[0, 1], 2, &mut out).unwrap_err();
        assert!(matches!(
            feeder_error(&err),
            FeederError::BufferTooSmall {
                required: 4,
                actual: 3,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn zero_rows_is_invalid_header() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, [0, 0, 0, 0, 0, 0, 0, 5])?;

        let err = read_header(&path).unwrap_err();
        assert!(matches!(
            feeder_error(&err),
            FeederError::InvalidHeader { rows: 0, cols: 5, .. }
        ));
        Ok(())
    }

    #[test]
    fn short_file_is_truncated_header() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("short.bin");
        std::fs::write(&path, [0, 0, 1])?;

        let err = read_header(&path).unwrap_err();
        assert!(matches!(feeder_error(&err), FeederError::TruncatedHeader { .. }));
        Ok(())
    }

    #[test]
    fn missing_file_is_file_open_error() {
        let err = read_header("/nonexistent/data_feeder/missing.bin").unwrap_err();
        assert!(matches!(feeder_error(&err), FeederError::FileOpen { .. }));
    }

    #[test]
    fn read_matrix_loads_whole_body() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("whole.bin");
        let data = vec![1.0f32, -2.0, 3.25, 4.0, 5.0, 6.5];
        write_matrix(&path, MatrixHeader::new(2, 3), &data)?;

        let (header, loaded) = read_matrix::<f32>(&path)?;
        assert_eq!(header, MatrixHeader::new(2, 3));
        assert_eq!(loaded, data);
        Ok(())
    }

    #[test]
    fn read_matrix_detects_truncated_body() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("truncated.bin");
        std::fs::write(&path, [0, 0, 0, 2, 0, 0, 0, 2, 1, 2, 3])?;

        assert!(read_matrix::<u8>(&path).is_err());
        Ok(())
    }

    #[test]
    fn write_matrix_validates_shape() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bad.bin");

        let err = write_matrix(&path, MatrixHeader::new(2, 2), &[1.0f32, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            feeder_error(&err),
            FeederError::ShapeMismatch {
                expected: 4,
                actual: 3
            }
        ));

        let err = write_matrix::<f32>(&path, MatrixHeader::new(0, 2), &[]).unwrap_err();
        assert!(matches!(feeder_error(&err), FeederError::InvalidHeader { .. }));
        Ok(())
    }

    #[test]
    fn widening_is_plain_cast() {
        let src = [0u8, 1, 128, 255];
        let mut dst = [0f32; 4];
        widen_into(&src, &mut dst);
        assert_eq!(dst, [0.0, 1.0, 128.0, 255.0]);
    }

    #[test]
    fn record_offset_accounts_for_width() {
        assert_eq!(record_offset::<u8>(3, 5), HEADER_SIZE + 15);
        assert_eq!(record_offset::<u16>(3, 5), HEADER_SIZE + 30);
        assert_eq!(record_offset::<f32>(3, 5), HEADER_SIZE + 60);
    }
}
