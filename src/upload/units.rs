//! Unit detection and conversion-to-mm (§4.9 step 3–4).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthUnit {
    Millimeter,
    Centimeter,
    Meter,
    Inch,
    Foot,
}

impl LengthUnit {
    /// Multiplier to convert a value in this unit to millimeters.
    pub fn to_mm_multiplier(self) -> f64 {
        match self {
            LengthUnit::Millimeter => 1.0,
            LengthUnit::Centimeter => 10.0,
            LengthUnit::Meter => 1000.0,
            LengthUnit::Inch => 25.4,
            LengthUnit::Foot => 304.8,
        }
    }

    pub fn from_step_length_unit(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "MILLI" | "MILLIMETRE" | "MM" => Some(Self::Millimeter),
            "CENTI" | "CENTIMETRE" | "CM" => Some(Self::Centimeter),
            "METRE" | "M" => Some(Self::Meter),
            "INCH" | "IN" => Some(Self::Inch),
            _ => None,
        }
    }

    /// DXF `$INSUNITS` group-code values (subset in common use).
    pub fn from_dxf_insunits(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Inch),
            2 => Some(Self::Foot),
            4 => Some(Self::Millimeter),
            5 => Some(Self::Centimeter),
            6 => Some(Self::Meter),
            _ => None,
        }
    }
}

/// Converts `value` (in `from`) to millimeters.
pub fn to_mm(value: f64, from: LengthUnit) -> f64 {
    value * from.to_mm_multiplier()
}

/// Heuristic STL unit detection by bounding-box diagonal: models are assumed
/// to be CAD/CAM parts, so a diagonal under 10 units implies the file was
/// authored in meters; over 10,000 implies millimeters already; otherwise mm.
pub fn detect_stl_units_by_bbox_diagonal(diagonal: f64) -> LengthUnit {
    if diagonal < 10.0 {
        LengthUnit::Meter
    } else {
        LengthUnit::Millimeter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(to_mm(1.0, LengthUnit::Centimeter), 10.0);
        assert_eq!(to_mm(1.0, LengthUnit::Inch), 25.4);
    }

    #[test]
    fn step_length_unit_parsing() {
        assert_eq!(LengthUnit::from_step_length_unit("MILLI"), Some(LengthUnit::Millimeter));
        assert_eq!(LengthUnit::from_step_length_unit("bogus"), None);
    }

    #[test]
    fn dxf_insunits() {
        assert_eq!(LengthUnit::from_dxf_insunits(4), Some(LengthUnit::Millimeter));
        assert_eq!(LengthUnit::from_dxf_insunits(999), None);
    }
}
