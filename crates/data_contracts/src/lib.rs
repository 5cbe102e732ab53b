//! Shared data contracts for patch-based threshold training: patch geometry,
//! source image records, and image manifests.

pub mod geometry;
pub mod manifest;

pub use geometry::{GeometryError, PatchGeometry, PatchWindow};
pub use manifest::{ImageEntry, ImageManifest, ManifestError, SourceImageRecord};
