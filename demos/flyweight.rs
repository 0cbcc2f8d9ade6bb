use std::io;
use std::sync::Arc;
use std::thread;

use instance_registry::InstanceRegistry;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Example: a text layout that shares one glyph per (character, font size)
/// across every position it is drawn at.
///
/// Run with `RUST_LOG=instance_registry=trace` to watch builds and waits.

// Intrinsic state, shared
#[derive(Debug)]
struct Glyph {
	symbol: char,
	size: u16,
	bitmap: Vec<u8>,
}

// Extrinsic state, one per use
struct Placement {
	glyph: Arc<Glyph>,
	x: u32,
	y: u32,
}

fn rasterize(symbol: char, size: u16) -> io::Result<Glyph> {
	if symbol.is_control() {
		return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("cannot rasterize {symbol:?}")));
	}
	let side = size as usize;
	Ok(Glyph {
		symbol,
		size,
		bitmap: vec![symbol as u8; side * side],
	})
}

fn layout(glyphs: &InstanceRegistry<(char, u16), Glyph>, text: &str, size: u16, line: u32) -> Vec<Placement> {
	text.chars()
		.enumerate()
		.filter_map(|(column, symbol)| {
			match glyphs.get_or_create((symbol, size), || rasterize(symbol, size)) {
				Ok(glyph) => Some(Placement {
					glyph,
					x: column as u32 * size as u32,
					y: line * size as u32,
				}),
				Err(err) => {
					warn!(?symbol, error = %err, "skipping glyph");
					None
				}
			}
		})
		.collect()
}

fn main() {
	tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

	let glyphs: Arc<InstanceRegistry<(char, u16), Glyph>> = Arc::new(InstanceRegistry::new());
	let text = ["the quick brown fox", "jumps over the lazy dog", "the end\t"];

	let handles: Vec<_> = text
		.into_iter()
		.enumerate()
		.map(|(line, text)| {
			let glyphs = glyphs.clone();
			thread::spawn(move || layout(&glyphs, text, 12, line as u32))
		})
		.collect();

	let placements: Vec<Placement> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();

	let bytes_unshared: usize = placements.iter().map(|p| p.glyph.bitmap.len()).sum();
	println!("Placed {} glyphs using {} shared instances", placements.len(), glyphs.len());
	println!("Bitmap bytes if unshared: {bytes_unshared}");

	let e = ('e', 12);
	println!("'e' reused {} times", glyphs.hits(&e).unwrap_or(0));

	if let Some(last) = placements.last() {
		println!("Last glyph {:?} ({}px) at ({}, {})", last.glyph.symbol, last.glyph.size, last.x, last.y);
	}
}
