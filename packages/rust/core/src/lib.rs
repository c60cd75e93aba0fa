//! Project model, template stage and build orchestration for thesiskit.
//!
//! This crate ties the project model, enrichment through the external
//! collaborators, formatting and rendering into one build (`Builder::build`).

pub mod builder;
pub mod enrichment;
pub mod project;
pub mod template;

pub use builder::{
    BuildReport, Builder, CancelToken, ProgressReporter, SilentProgress, render_project,
};
pub use enrichment::{Collaborators, EnrichmentConfig, EnrichmentOutcome};
pub use project::{BlockAddress, Project, ValidatedProject};

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use thesiskit_shared::{AssetRef, AssetResolver, Result, ThesisError};

    /// Encoded PNG of a solid `width` x `height` image.
    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([20, 90, 160]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    /// Resolver with no assets at all.
    pub(crate) struct NoAssets;

    impl AssetResolver for NoAssets {
        fn open(&self, asset: &AssetRef) -> Result<Vec<u8>> {
            Err(ThesisError::NotFound {
                query: asset.to_string(),
            })
        }
    }
}
