// TIFF header probing, just enough to learn the pixel type of the first image
// https://www.itu.int/itudoc/itu-t/com16/tiff-fx/docs/tiff6.pdf

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, ReadBytesExt, BE, LE};


const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_SAMPLE_FORMAT: u16 = 339;

const TYPE_SHORT: u16 = 3;

const SAMPLE_FORMAT_UINT: u16 = 1;
const SAMPLE_FORMAT_INT: u16 = 2;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelType {
	pub bits_per_sample: u16,
	pub sample_format: u16
}

impl PixelType {

	pub fn is_int16(&self) -> bool {
		self.bits_per_sample == 16 && self.sample_format == SAMPLE_FORMAT_INT
	}
}


pub fn pixel_type(path: impl AsRef<Path>) -> Result<PixelType> {

	let path = path.as_ref();
	let file = File::open(path)
		.context(format!("Failed to open TIFF: {}", path.to_string_lossy()))?;
	let mut reader = BufReader::new(file);

	let mut order = [0u8; 2];
	reader.read_exact(&mut order)
		.context(format!("Failed to read TIFF header: {}", path.to_string_lossy()))?;
	let pixel = match &order {
		b"II" => read_ifd::<LE,_>(&mut reader),
		b"MM" => read_ifd::<BE,_>(&mut reader),
		_ => bail!("Not a TIFF file: {}", path.to_string_lossy())
	};
	pixel.context(format!("Failed to read TIFF: {}", path.to_string_lossy()))
}


fn read_ifd<B: ByteOrder, R: Read + Seek>(reader: &mut R) -> Result<PixelType> {

	let magic = reader.read_u16::<B>()?;
	if magic != 42 {
		bail!("unsupported TIFF variant: {}", magic);
	}
	let ifd_offset = reader.read_u32::<B>()?;
	reader.seek(SeekFrom::Start(ifd_offset as u64))?;

	// a missing tag means 1-bit unsigned, per TIFF 6.0
	let mut pixel = PixelType {
		bits_per_sample: 1,
		sample_format: SAMPLE_FORMAT_UINT
	};

	let num_entries = reader.read_u16::<B>()?;
	for _ in 0 .. num_entries {
		let tag = reader.read_u16::<B>()?;
		let kind = reader.read_u16::<B>()?;
		let count = reader.read_u32::<B>()?;
		let mut value = [0u8; 4];
		reader.read_exact(&mut value)?;

		if tag != TAG_BITS_PER_SAMPLE && tag != TAG_SAMPLE_FORMAT {
			continue;
		}
		if kind != TYPE_SHORT {
			bail!("tag {} has unexpected type {}", tag, kind);
		}

		// all samples share a type in practice, so the first one will do
		let first = if count <= 2 {
			B::read_u16(&value[0 .. 2])
		} else {
			let here = reader.stream_position()?;
			reader.seek(SeekFrom::Start(B::read_u32(&value) as u64))?;
			let first = reader.read_u16::<B>()?;
			reader.seek(SeekFrom::Start(here))?;
			first
		};

		match tag {
			TAG_BITS_PER_SAMPLE => pixel.bits_per_sample = first,
			_ => pixel.sample_format = first
		}
	}

	Ok(pixel)
}
