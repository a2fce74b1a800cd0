use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Mutex;

use lazy_static::lazy_static;

lazy_static! {
    /// Global mutex to serialize environment-variable modifications in tests.
    pub static ref ENV_MUTEX: Mutex<()> = Mutex::new(());
}

/// Write a small RGB PNG carrying the given `tEXt` chunks.
pub fn write_png(path: &Path, width: u32, height: u32, text: &[(&str, &str)]) {
    let file = File::create(path).expect("create png");
    let mut enc = png::Encoder::new(BufWriter::new(file), width, height);
    enc.set_color(png::ColorType::Rgb);
    enc.set_depth(png::BitDepth::Eight);
    for (k, v) in text {
        enc.add_text_chunk(k.to_string(), v.to_string())
            .expect("text chunk");
    }
    let mut writer = enc.write_header().expect("png header");
    let pixels = vec![128u8; (width * height * 3) as usize];
    writer.write_image_data(&pixels).expect("png data");
}

/// A1111-style parameter block used across tests.
pub fn a1111_block(prompt: &str, negative: &str) -> String {
    format!("{prompt}\nNegative prompt: {negative}\nSteps: 20, Sampler: Euler, CFG scale: 7, Seed: 1, Model: testmodel")
}
