//! Image synthesizer.
//!
//! Talks to the OpenAI image endpoint with retry and exponential backoff,
//! then pulls the generated bytes down into the local output directory.
//! Provider exhaustion and download failures are normal outcomes here,
//! reported as `None` and logged, never raised.

use anyhow::{Context, Result, bail};
use log::{debug, error, info, warn};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::config::AppConfig;
use crate::pipeline::ImageGenerator;

pub const VALID_IMAGE_SIZES: &[&str] = &["256x256", "512x512", "1024x1024"];
pub const DEFAULT_IMAGE_SIZE: &str = "512x512";

const OPENAI_IMAGES_URL: &str = "https://api.openai.com/v1/images/generations";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

// ────────────────────────────────────────────────────────────────
// Provider seam
// ────────────────────────────────────────────────────────────────

/// One request to the external image-synthesis provider, returning the
/// provider-hosted URL of the generated image.
pub trait ImageSource {
    fn request_image(&self, prompt: &str, size: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// DALL·E 2 backend via the OpenAI images endpoint.
pub struct OpenAiImages {
    api_key: String,
    client: Client,
}

impl OpenAiImages {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            api_key: config.openai_api_key.clone(),
            client: Client::new(),
        }
    }
}

impl ImageSource for OpenAiImages {
    fn request_image(&self, prompt: &str, size: &str) -> Result<String> {
        let request = ImageGenerationRequest {
            model: "dall-e-2",
            prompt,
            n: 1,
            size,
        };

        let response: ImageGenerationResponse = self
            .client
            .post(OPENAI_IMAGES_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("image generation request failed")?
            .error_for_status()
            .context("image provider returned an error status")?
            .json()
            .context("failed to decode image generation response")?;

        match response.data.into_iter().next().and_then(|image| image.url) {
            Some(url) => Ok(url),
            None => bail!("image provider response contained no image URL"),
        }
    }
}

// ────────────────────────────────────────────────────────────────
// Synthesizer
// ────────────────────────────────────────────────────────────────

/// Wait before retry `attempt` (zero-based): `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt)
}

/// Coerce an unsupported size to the documented default instead of
/// failing the call.
pub fn normalize_size(size: &str) -> &str {
    if VALID_IMAGE_SIZES.contains(&size) {
        size
    } else {
        warn!("unsupported image size {size}, using {DEFAULT_IMAGE_SIZE} instead");
        DEFAULT_IMAGE_SIZE
    }
}

pub struct ImageSynthesizer<P: ImageSource> {
    provider: P,
    client: Client,
    pub output_dir: PathBuf,
    pub default_size: String,
    pub default_quality: String,
    pub default_max_retries: u32,
    /// Base unit of the exponential backoff. Tests shrink this to zero.
    pub retry_base_delay: Duration,
}

impl<P: ImageSource> ImageSynthesizer<P> {
    pub fn new(provider: P, config: &AppConfig) -> Self {
        Self {
            provider,
            client: Client::new(),
            output_dir: config.output_dir.clone(),
            default_size: config.image_size.clone(),
            default_quality: config.image_quality.clone(),
            default_max_retries: config.max_retries,
            retry_base_delay: Duration::from_secs(1),
        }
    }

    /// Request one image, retrying on any provider failure. Returns the
    /// provider-hosted URL, or `None` once the retry budget is exhausted.
    pub fn generate_image(
        &self,
        prompt: &str,
        size: Option<&str>,
        quality: Option<&str>,
        max_retries: Option<u32>,
    ) -> Option<String> {
        let size = normalize_size(size.unwrap_or(self.default_size.as_str()));
        let quality = quality.unwrap_or(self.default_quality.as_str());
        let max_retries = max_retries.unwrap_or(self.default_max_retries);

        for attempt in 0..max_retries {
            info!("generating image (attempt {}/{max_retries})", attempt + 1);
            debug!(
                "prompt ({quality}): {}",
                prompt.chars().take(100).collect::<String>()
            );

            match self.provider.request_image(prompt, size) {
                Ok(url) => {
                    info!("image generated: {url}");
                    return Some(url);
                }
                Err(error) => {
                    warn!(
                        "image generation failed (attempt {}/{max_retries}): {error:#}",
                        attempt + 1
                    );
                    if attempt + 1 < max_retries {
                        let wait = backoff_delay(self.retry_base_delay, attempt);
                        info!("retrying in {wait:?}");
                        thread::sleep(wait);
                    }
                }
            }
        }

        error!("failed to generate image after {max_retries} attempts");
        None
    }

    /// Fetch the generated bytes and write them to
    /// `<output_dir>/<filename>.png`.
    pub fn download_and_store(&self, url: &str, filename: &str) -> Option<PathBuf> {
        let target = self.output_dir.join(format!("{filename}.png"));
        match self.try_download(url, &target) {
            Ok(()) => {
                info!("image saved to {target:?}");
                Some(target)
            }
            Err(error) => {
                error!("failed to download generated image: {error:#}");
                None
            }
        }
    }

    fn try_download(&self, url: &str, target: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .context("image download request failed")?
            .error_for_status()
            .context("image host returned an error status")?;

        let bytes = response
            .bytes()
            .context("failed to read downloaded image body")?;

        fs::create_dir_all(&self.output_dir).context(format!(
            "failed to create output directory {:?}",
            self.output_dir
        ))?;
        fs::write(target, &bytes).context(format!("failed to write image to {target:?}"))?;
        Ok(())
    }

    /// Generate and persist locally. Returns the provider URL; a failed
    /// local save is logged but does not mask a successful generation.
    pub fn generate_and_save(
        &self,
        prompt: &str,
        filename: &str,
        size: Option<&str>,
        quality: Option<&str>,
    ) -> Option<String> {
        let url = self.generate_image(prompt, size, quality, None)?;
        self.download_and_store(&url, filename);
        Some(url)
    }

    /// Generate a sequence of (prompt, filename) jobs with a fixed delay
    /// between provider calls.
    pub fn generate_batch(
        &self,
        jobs: &[(String, String)],
        delay: Duration,
    ) -> Vec<Option<String>> {
        let mut results = Vec::with_capacity(jobs.len());
        for (index, (prompt, filename)) in jobs.iter().enumerate() {
            info!("generating batch image {}/{}", index + 1, jobs.len());
            results.push(self.generate_and_save(prompt, filename, None, None));
            if index + 1 < jobs.len() {
                debug!("waiting {delay:?} before next request");
                thread::sleep(delay);
            }
        }
        results
    }
}

impl<P: ImageSource> ImageGenerator for ImageSynthesizer<P> {
    fn generate_to_file(&self, prompt: &str, filename: &str) -> Option<PathBuf> {
        self.generate_and_save(prompt, filename, None, None)?;
        let local = self.output_dir.join(format!("{filename}.png"));
        local.exists().then_some(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    struct FlakySource {
        failures_before_success: u32,
        attempts: Cell<u32>,
    }

    impl FlakySource {
        fn failing(failures_before_success: u32) -> Self {
            Self {
                failures_before_success,
                attempts: Cell::new(0),
            }
        }
    }

    impl ImageSource for FlakySource {
        fn request_image(&self, _prompt: &str, _size: &str) -> Result<String> {
            let attempt = self.attempts.get();
            self.attempts.set(attempt + 1);
            if attempt < self.failures_before_success {
                bail!("provider unavailable");
            }
            Ok("https://provider.example/generated.png".to_string())
        }
    }

    fn test_config(dir: &TempDir) -> AppConfig {
        AppConfig {
            openai_api_key: "sk-test".to_string(),
            db_path: dir.path().join("gallery.db"),
            ssh_host: "host.example".to_string(),
            ssh_port: 22,
            ssh_user: "deploy".to_string(),
            ssh_password: "secret".to_string(),
            server_image_path: "/data/images".to_string(),
            image_url_base: "/images".to_string(),
            image_size: "512x512".to_string(),
            image_quality: "standard".to_string(),
            max_retries: 3,
            default_generation_limit: None,
            output_dir: dir.path().join("generated_images"),
        }
    }

    fn synthesizer(dir: &TempDir, provider: FlakySource) -> ImageSynthesizer<FlakySource> {
        let mut synthesizer = ImageSynthesizer::new(provider, &test_config(dir));
        synthesizer.retry_base_delay = Duration::ZERO;
        synthesizer
    }

    #[test]
    fn retry_recovers_when_budget_exceeds_failures() {
        let dir = TempDir::new().unwrap();
        let synthesizer = synthesizer(&dir, FlakySource::failing(2));

        let url = synthesizer.generate_image("a dress", None, None, Some(3));
        assert_eq!(
            url.as_deref(),
            Some("https://provider.example/generated.png")
        );
        assert_eq!(synthesizer.provider.attempts.get(), 3);
    }

    #[test]
    fn retry_budget_is_exactly_max_retries() {
        let dir = TempDir::new().unwrap();
        let synthesizer = synthesizer(&dir, FlakySource::failing(10));

        assert!(synthesizer.generate_image("a dress", None, None, Some(3)).is_none());
        assert_eq!(synthesizer.provider.attempts.get(), 3);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
    }

    #[test]
    fn unsupported_size_is_coerced_to_default() {
        assert_eq!(normalize_size("640x640"), DEFAULT_IMAGE_SIZE);
        assert_eq!(normalize_size("1024x1024"), "1024x1024");
    }

    #[test]
    fn download_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let synthesizer = synthesizer(&dir, FlakySource::failing(0));

        assert!(
            synthesizer
                .download_and_store("not a url", "tb_dress_1")
                .is_none()
        );
    }

    #[test]
    fn batch_reports_per_job_outcomes() {
        let dir = TempDir::new().unwrap();
        // Every provider call fails, so no downloads are attempted.
        let synthesizer = synthesizer(&dir, FlakySource::failing(u32::MAX));

        let jobs = vec![
            ("a dress".to_string(), "tb_dress_1".to_string()),
            ("a venue".to_string(), "tb_wedding_hall_2".to_string()),
        ];
        let results = synthesizer.generate_batch(&jobs, Duration::ZERO);
        assert_eq!(results, vec![None, None]);
    }
}
