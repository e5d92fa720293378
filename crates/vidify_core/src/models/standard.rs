//! The built-in Vidify processing catalog.
//!
//! Seven stages run in this order:
//! 1. Validation - format and integrity checks
//! 2. Extraction - metadata and thumbnail frames
//! 3. Analysis - content safety and categorisation
//! 4. Transcoding - resolution ladder and packaging formats
//! 5. Enhancement - optional quality improvements (off by default)
//! 6. Thumbnail - generate and optimise thumbnails
//! 7. Distribution - CDN preparation

use serde_json::json;

use super::catalog::PipelineCatalog;
use super::definition::{PipelineDefinition, StageDefinition};
use super::variant::{StageOverride, Variant, VariantRegistry};

const MAX_FILE_SIZE_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// The standard base definition.
pub fn standard_definition() -> PipelineDefinition {
    PipelineDefinition::new(vec![
        StageDefinition::new("validation", 0)
            .with_description("Validate video file format and integrity")
            .with_configuration(json!({
                "allowed_formats": ["mp4", "mov", "avi", "webm", "mkv"],
                "max_file_size": MAX_FILE_SIZE_BYTES,
                "integrity_checks": ["header", "corruption"],
            })),
        StageDefinition::new("extraction", 1)
            .with_description("Extract metadata and thumbnail frames")
            .depends_on("validation")
            .with_configuration(json!({
                "extract_metadata": true,
                "thumbnail_frames": [0, 10, 30, 60, 120],
                "extract_audio": false,
            })),
        StageDefinition::new("analysis", 2)
            .with_description("Analyze video content for safety and categorization")
            .depends_on("extraction")
            .with_configuration(json!({
                "content_safety": true,
                "category_detection": true,
                "tag_generation": true,
                "language_detection": true,
            })),
        StageDefinition::new("transcoding", 3)
            .with_description("Transcode video into multiple formats and resolutions")
            .depends_on("validation")
            .with_configuration(json!({
                "formats": ["mp4", "hls"],
                "resolutions": [
                    rung("240p", 426, 240, "500k"),
                    rung("360p", 640, 360, "800k"),
                    rung("480p", 854, 480, "1500k"),
                    rung("720p", 1280, 720, "3000k"),
                    rung("1080p", 1920, 1080, "6000k"),
                ],
                "audio_channels": 2,
                "audio_bitrate": "128k",
                "keyframe_interval": 2,
            })),
        StageDefinition::new("enhancement", 4)
            .with_description("Optional video quality enhancements")
            .with_enabled(false)
            .depends_on("transcoding")
            .with_configuration(json!({
                "denoising": false,
                "stabilization": false,
                "color_correction": false,
                "audio_normalization": true,
            })),
        StageDefinition::new("thumbnail", 5)
            .with_description("Generate and optimize thumbnails")
            .depends_on("extraction")
            .with_configuration(json!({
                "count": 3,
                "sizes": [
                    { "name": "small", "width": 320, "height": 180 },
                    { "name": "medium", "width": 640, "height": 360 },
                    { "name": "large", "width": 1280, "height": 720 },
                ],
                "format": "jpg",
                "quality": 85,
            })),
        StageDefinition::new("distribution", 6)
            .with_description("Prepare files for CDN distribution")
            .depends_on("transcoding")
            .depends_on("thumbnail")
            .with_configuration(json!({
                "cdn_optimization": true,
                "create_manifests": true,
                "set_metadata": true,
            })),
    ])
}

/// The standard variants: `quick-preview`, `premium` and `children`.
pub fn standard_variants() -> VariantRegistry {
    VariantRegistry::new()
        .with_variant(
            "quick-preview",
            Variant::new("Fast processing with lower quality for previews")
                .with_override(
                    "transcoding",
                    StageOverride::configure(json!({
                        "resolutions": [rung("360p", 640, 360, "800k")],
                    })),
                )
                .with_override("enhancement", StageOverride::enabled(false)),
        )
        .with_variant(
            "premium",
            Variant::new("High quality processing for premium content")
                .with_override(
                    "transcoding",
                    StageOverride::configure(json!({
                        "resolutions": [
                            rung("480p", 854, 480, "1500k"),
                            rung("720p", 1280, 720, "3000k"),
                            rung("1080p", 1920, 1080, "6000k"),
                            rung("4K", 3840, 2160, "15000k"),
                        ],
                    })),
                )
                .with_override(
                    "enhancement",
                    StageOverride::enabled(true).with_configuration(json!({
                        "denoising": true,
                        "stabilization": true,
                        "color_correction": true,
                        "audio_normalization": true,
                    })),
                ),
        )
        .with_variant(
            "children",
            Variant::new("Children's content with strict safety checks").with_override(
                "analysis",
                StageOverride::configure(json!({
                    "content_safety": true,
                    "children_content_filter": true,
                    "safety_threshold": "strict",
                })),
            ),
        )
}

/// The standard catalog.
pub fn standard_catalog() -> PipelineCatalog {
    // The built-in data satisfies every catalog invariant; the unit tests
    // below pin that down.
    match PipelineCatalog::new(standard_definition(), standard_variants()) {
        Ok(catalog) => catalog,
        Err(e) => unreachable!("standard catalog is invalid: {e}"),
    }
}

fn rung(name: &str, width: u32, height: u32, bitrate: &str) -> serde_json::Value {
    json!({ "name": name, "width": width, "height": height, "bitrate": bitrate })
}
