#![allow(dead_code)]

pub mod sandbox;
pub mod records;
pub mod http;


use std::path::Path;


pub fn bin_path() -> &'static Path {
	let bin_path = Path::new(env!("CARGO_BIN_EXE_em-workflows"));
	if !bin_path.exists() {
		panic!("Target binary not found at: {:?}", bin_path);
	}
	bin_path
}
