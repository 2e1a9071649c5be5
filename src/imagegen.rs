//! Character portrait generation with a deterministic fallback.
//!
//! The prompt couples the canonical description with a shared style
//! string and the character's seed: `<description>, <style> [ID: <seed>]`.
//! The bracketed token nudges the model toward stable outputs; the same
//! seed is also passed as the provider's numeric seed parameter.
//!
//! Provider failures never abort the caller. Quota errors, refusals,
//! content filters, and transport errors all resolve to a placeholder
//! (a real bitmap with a seed-derived background and the character's
//! initials) written at the same deterministic path a real portrait
//! would use. The outcome tag is the only signal distinguishing the two.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use image::{Rgb, RgbImage};

use crate::config::ImageConfig;
use crate::error::ImageError;
use crate::models::{CharacterProfile, ImageOutcome};
use crate::seed::image_filename;

/// Placeholder canvas size.
const PLACEHOLDER_SIZE: u32 = 512;

/// A text-to-image endpoint.
#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Generate one bitmap for the prompt, returning encoded PNG bytes.
    async fn generate(
        &self,
        prompt: &str,
        seed: u32,
        aspect_ratio: &str,
    ) -> Result<Vec<u8>, ImageError>;
}

/// Result of a portrait generation, real or placeholder.
#[derive(Debug, Clone)]
pub struct GeneratedPortrait {
    pub path: PathBuf,
    pub prompt: String,
    pub outcome: ImageOutcome,
    pub duration_ms: i64,
}

/// Assemble the full image prompt for a character.
pub fn build_prompt(description: &str, style: &str, seed: u32) -> String {
    format!("{}, {} [ID: {}]", description, style, seed)
}

/// Generate (or regenerate) the portrait for a character profile.
///
/// Writes to `<image_dir>/<slug>_<seed>.png`, overwriting any prior
/// image so the path stays stable across regenerations. Only filesystem
/// failures propagate; provider failures produce a placeholder.
pub async fn generate_portrait(
    model: &dyn ImageModel,
    profile: &CharacterProfile,
    style: &str,
    aspect_ratio: &str,
    image_dir: &Path,
) -> anyhow::Result<GeneratedPortrait> {
    let prompt = build_prompt(&profile.description, style, profile.seed);
    std::fs::create_dir_all(image_dir)?;
    let path = image_dir.join(image_filename(&profile.name, profile.seed));

    let started = Instant::now();
    let outcome = match model.generate(&prompt, profile.seed, aspect_ratio).await {
        Ok(bytes) => {
            std::fs::write(&path, &bytes)?;
            ImageOutcome::Real
        }
        Err(e) => {
            eprintln!(
                "Warning: image provider failed for '{}': {}; writing placeholder",
                profile.name, e
            );
            placeholder_bitmap(&profile.name, profile.seed).save(&path)?;
            ImageOutcome::Placeholder
        }
    };

    Ok(GeneratedPortrait {
        path,
        prompt,
        outcome,
        duration_ms: started.elapsed().as_millis() as i64,
    })
}

// ============ Imagen provider ============

/// Imagen `:predict` client.
///
/// Passes the numeric seed and aspect ratio through, requests one sample
/// with adult person generation allowed, and decodes the base64 bitmap
/// payload. An empty predictions array is a provider-side refusal.
pub struct ImagenClient {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl ImagenClient {
    pub fn new(config: &ImageConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ImageModel for ImagenClient {
    async fn generate(
        &self,
        prompt: &str,
        seed: u32,
        aspect_ratio: &str,
    ) -> Result<Vec<u8>, ImageError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:predict?key={}",
            self.model, self.api_key
        );

        let body = serde_json::json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": aspect_ratio,
                "personGeneration": "allow_adult",
                "seed": seed,
            },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ImageError::Quota);
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ImageError::Transport(format!(
                "image API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ImageError::Transport(e.to_string()))?;

        let prediction = json
            .get("predictions")
            .and_then(|p| p.as_array())
            .and_then(|p| p.first())
            .ok_or(ImageError::Refusal)?;

        if prediction.get("raiFilteredReason").is_some() {
            return Err(ImageError::ContentFiltered);
        }

        let encoded = prediction
            .get("bytesBase64Encoded")
            .and_then(|b| b.as_str())
            .ok_or(ImageError::Refusal)?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ImageError::Transport(e.to_string()))
    }
}

static IMAGE_MODEL: OnceLock<Arc<ImagenClient>> = OnceLock::new();

/// Process-wide image-model singleton, initialized lazily on first use.
pub fn global_image_model(config: &ImageConfig) -> anyhow::Result<Arc<dyn ImageModel>> {
    if let Some(existing) = IMAGE_MODEL.get() {
        return Ok(existing.clone());
    }
    let created = Arc::new(ImagenClient::new(config)?);
    Ok(IMAGE_MODEL.get_or_init(|| created).clone())
}

// ============ Placeholder bitmap ============

/// Render the deterministic placeholder for a character: a solid
/// seed-derived background, the character's initials centered in white,
/// and a `PLACEHOLDER` footer. Bit-identical for a given (name, seed).
pub fn placeholder_bitmap(name: &str, seed: u32) -> RgbImage {
    let background = seed_color(seed);
    let mut img = RgbImage::from_pixel(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, background);

    let white = Rgb([255u8, 255, 255]);

    let text = initials(name);
    let scale = 16;
    let width = text_width(&text, scale);
    let x = (PLACEHOLDER_SIZE.saturating_sub(width)) / 2;
    let y = (PLACEHOLDER_SIZE - 7 * scale) / 2;
    draw_text(&mut img, &text, x, y, scale, white);

    let footer = "PLACEHOLDER";
    let footer_scale = 3;
    let footer_width = text_width(footer, footer_scale);
    let fx = (PLACEHOLDER_SIZE.saturating_sub(footer_width)) / 2;
    let fy = PLACEHOLDER_SIZE - 40;
    draw_text(&mut img, footer, fx, fy, footer_scale, white);

    img
}

/// Background color derived from the seed: each channel constrained to
/// 100..=200 so white text stays readable on any seed.
fn seed_color(seed: u32) -> Rgb<u8> {
    let bytes = seed.to_be_bytes();
    Rgb([
        100 + bytes[0] % 101,
        100 + bytes[1] % 101,
        100 + bytes[2] % 101,
    ])
}

/// Up to two initials from the first words of the name; letters without
/// a glyph (and empty names) fall back to `?`.
pub fn initials(name: &str) -> String {
    let letters: String = name
        .split_whitespace()
        .take(2)
        .filter_map(|word| word.chars().find(|c| c.is_alphabetic()))
        .map(|c| c.to_ascii_uppercase())
        .map(|c| if glyph(c).is_some() { c } else { '?' })
        .collect();
    if letters.is_empty() {
        "?".to_string()
    } else {
        letters
    }
}

fn text_width(text: &str, scale: u32) -> u32 {
    let chars = text.chars().count() as u32;
    if chars == 0 {
        return 0;
    }
    chars * 6 * scale - scale
}

fn draw_text(img: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    let mut cursor = x;
    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..5u32 {
                    if bits & (0b10000 >> col) != 0 {
                        fill_block(
                            img,
                            cursor + col * scale,
                            y + row as u32 * scale,
                            scale,
                            color,
                        );
                    }
                }
            }
        }
        cursor += 6 * scale;
    }
}

fn fill_block(img: &mut RgbImage, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    for dy in 0..scale {
        for dx in 0..scale {
            let (px, py) = (x + dx, y + dy);
            if px < img.width() && py < img.height() {
                img.put_pixel(px, py, color);
            }
        }
    }
}

/// 5×7 glyphs for the initials and the footer label.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '?' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::character_seed;

    #[test]
    fn prompt_layout() {
        assert_eq!(
            build_prompt("A tall wizard", "oil painting", 42),
            "A tall wizard, oil painting [ID: 42]"
        );
    }

    #[test]
    fn placeholder_is_deterministic() {
        let seed = character_seed("Mrs Dursley");
        let a = placeholder_bitmap("Mrs Dursley", seed);
        let b = placeholder_bitmap("Mrs Dursley", seed);
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn placeholder_background_tracks_seed() {
        let a = placeholder_bitmap("Harry Potter", character_seed("Harry Potter"));
        let b = placeholder_bitmap("Hermione Granger", character_seed("Hermione Granger"));
        assert_ne!(a.get_pixel(0, 0), b.get_pixel(0, 0));
    }

    #[test]
    fn placeholder_background_in_palette_range() {
        let img = placeholder_bitmap("Harry Potter", character_seed("Harry Potter"));
        let Rgb([r, g, b]) = *img.get_pixel(0, 0);
        for channel in [r, g, b] {
            assert!((100..=200).contains(&channel));
        }
    }

    #[test]
    fn placeholder_contains_white_text() {
        let img = placeholder_bitmap("Harry Potter", character_seed("Harry Potter"));
        let white = img.pixels().filter(|p| p.0 == [255u8, 255, 255]).count();
        assert!(white > 100, "expected drawn initials, found {} white pixels", white);
    }

    #[test]
    fn initials_take_first_two_words() {
        assert_eq!(initials("Harry Potter"), "HP");
        assert_eq!(initials("Hermione"), "H");
        assert_eq!(initials("Albus Percival Wulfric Dumbledore"), "AP");
        assert_eq!(initials("  "), "?");
        assert_eq!(initials("Петуния Дурсль"), "??");
    }
}
