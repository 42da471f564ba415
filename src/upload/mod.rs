//! Upload Normalizer (§4.9) — format detection, unit/orientation
//! normalization, mesh repair, and canonical re-export of uploaded CAD files.

pub mod formats;
pub mod units;

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadFormat {
    Step,
    Iges,
    Brep,
    Stl,
    Obj,
    Ply,
    Off,
    ThreeMf,
    Amf,
    Dxf,
    Dwg,
    Svg,
    Ifc,
    Dae,
    Gltf,
    Glb,
    Vrml,
    X3d,
    Xyz,
    Pcd,
    Las,
    FcStd,
}

impl UploadFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        Some(match ext.to_ascii_lowercase().as_str() {
            "step" | "stp" => Self::Step,
            "iges" | "igs" => Self::Iges,
            "brep" => Self::Brep,
            "stl" => Self::Stl,
            "obj" => Self::Obj,
            "ply" => Self::Ply,
            "off" => Self::Off,
            "3mf" => Self::ThreeMf,
            "amf" => Self::Amf,
            "dxf" => Self::Dxf,
            "dwg" => Self::Dwg,
            "svg" => Self::Svg,
            "ifc" => Self::Ifc,
            "dae" => Self::Dae,
            "gltf" => Self::Gltf,
            "glb" => Self::Glb,
            "wrl" | "vrml" => Self::Vrml,
            "x3d" => Self::X3d,
            "xyz" => Self::Xyz,
            "pcd" => Self::Pcd,
            "las" => Self::Las,
            "fcstd" => Self::FcStd,
            _ => return None,
        })
    }

    /// Magic-byte sniffing; wins over extension on conflict (§4.9 step 2).
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"ISO-10303") {
            return Some(Self::Step);
        }
        if bytes.len() >= 80 + 4 && &bytes[0..5] == b"solid" {
            return Some(Self::Stl); // ASCII STL
        }
        if bytes.len() >= 84 && bytes.len() >= 5 {
            // Binary STL has no reliable magic; fall through to extension.
        }
        if bytes.starts_with(b"glTF") {
            return Some(Self::Glb);
        }
        if bytes.starts_with(b"PK\x03\x04") {
            return Some(Self::ThreeMf);
        }
        None
    }
}

#[derive(Debug, Clone, Error, Serialize)]
pub enum UploadError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("STEP topology error: {0}")]
    StepTopology(String),
    #[error("IGES surface is untrimmed: {0}")]
    IgesUntrimmed(String),
    #[error("STL mesh is not manifold: {0}")]
    StlNotManifold(String),
    #[error("DXF units unknown")]
    DxfUnitsUnknown,
    #[error("IFC dependency missing: {0}")]
    IfcDepMissing(String),
    #[error("IFC geometry conversion failed: {0}")]
    IfcGeomFail(String),
    #[error("geometry invalid: {0}")]
    GeometryInvalid(String),
    #[error("unit conversion failed: {0}")]
    UnitConversionFailed(String),
    #[error("orientation normalization failed: {0}")]
    OrientationFailed(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("download from object storage failed: {0}")]
    S3DownloadFailed(String),
    #[error("upload to object storage failed: {0}")]
    S3UploadFailed(String),
    #[error("preview generation failed: {0}")]
    PreviewGenerationFailed(String),
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::UnsupportedFormat(_) => "unsupported_format",
            UploadError::StepTopology(_) => "step_topology",
            UploadError::IgesUntrimmed(_) => "iges_untrimmed",
            UploadError::StlNotManifold(_) => "stl_not_manifold",
            UploadError::DxfUnitsUnknown => "dxf_units_unknown",
            UploadError::IfcDepMissing(_) => "ifc_dep_missing",
            UploadError::IfcGeomFail(_) => "ifc_geom_fail",
            UploadError::GeometryInvalid(_) => "geometry_invalid",
            UploadError::UnitConversionFailed(_) => "unit_conversion_failed",
            UploadError::OrientationFailed(_) => "orientation_failed",
            UploadError::ValidationFailed(_) => "validation_failed",
            UploadError::S3DownloadFailed(_) => "s3_download_failed",
            UploadError::S3UploadFailed(_) => "s3_upload_failed",
            UploadError::PreviewGenerationFailed(_) => "preview_generation_failed",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::S3DownloadFailed(_) | UploadError::S3UploadFailed(_) => ErrorKind::Transient,
            _ => ErrorKind::UserInput,
        }
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Metrics returned by a successful normalization pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeMetrics {
    pub detected_unit: Option<String>,
    pub bounding_box_diagonal_mm: f64,
    pub centered: bool,
    pub merged_duplicates: usize,
    pub repaired_faces: usize,
}

/// An opaque, in-memory handle to a loaded document; format handlers decide
/// how to interpret the bytes they hold.
pub struct DocHandle {
    pub raw: Vec<u8>,
    pub format: UploadFormat,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeConfig {
    pub declared_units: Option<units::LengthUnit>,
    pub repair_enabled: bool,
    pub center: bool,
    pub merge_duplicates: bool,
    pub extrude_thickness_mm: Option<f64>,
}

/// Per-format handler interface (§4.9).
pub trait UploadHandler: Send + Sync {
    fn detect_units(&self, doc: &DocHandle, declared: Option<units::LengthUnit>) -> units::LengthUnit;
    fn load(&self, bytes: &[u8]) -> UploadResult<DocHandle>;
    fn normalize(&self, doc: &mut DocHandle, config: &NormalizeConfig) -> UploadResult<NormalizeMetrics>;
    fn validate(&self, doc: &DocHandle) -> Vec<String>;
    fn export(&self, doc: &DocHandle) -> UploadResult<Vec<u8>>;
}

/// Detects the format of an upload. Magic bytes win over extension on conflict.
pub fn detect_format(path: &Path, bytes: &[u8]) -> UploadResult<UploadFormat> {
    let by_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(UploadFormat::from_extension);
    let by_magic = UploadFormat::from_magic_bytes(bytes);
    by_magic.or(by_ext).ok_or_else(|| {
        UploadError::UnsupportedFormat(
            path.extension()
                .and_then(|e| e.to_str())
                .unwrap_or("unknown")
                .to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_wins_over_extension() {
        let path = Path::new("model.obj");
        let bytes = b"glTF....";
        assert_eq!(detect_format(path, bytes).unwrap(), UploadFormat::Glb);
    }

    #[test]
    fn falls_back_to_extension() {
        let path = Path::new("model.step");
        let bytes = b"not really step content";
        assert_eq!(detect_format(path, bytes).unwrap(), UploadFormat::Step);
    }

    #[test]
    fn unknown_extension_fails_closed() {
        let path = Path::new("model.xyz123");
        let err = detect_format(path, b"???").unwrap_err();
        assert_eq!(err.code(), "unsupported_format");
    }
}
