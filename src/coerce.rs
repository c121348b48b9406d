//! Typing of the untyped strings returned by viewer APIs.
//!
//! The APIs hand back every value as text; the dictionary supplies the VR and
//! this module turns the text into the scalar or vector the VR calls for.
//! Multiple values are separated by a backslash, as in the binary format.

use crate::error::{RebuildError, RebuildResult};
use crate::model::{DicomValue, Scalar, Vr, VrFamily};
use crate::util;

/// Coerce `raw` into a value of `vr`.
///
/// A single segment gives [`DicomValue::Single`], several give
/// [`DicomValue::Multi`]. Binary and sequence VRs cannot be expressed as text
/// and fail with [`RebuildError::UnsupportedVr`].
pub fn coerce(raw: &str, vr: Vr) -> RebuildResult<DicomValue> {
    match vr.family() {
        VrFamily::Tag => {
            let tag = util::parse_tag(raw).map_err(|_| RebuildError::InvalidValue {
                vr,
                raw: raw.to_string(),
                reason: "expected a (group,element) pair".to_string(),
            })?;

            Ok(DicomValue::Single(Scalar::Tag(tag)))
        }
        VrFamily::Text => split_values(raw, |s| Ok(Scalar::Text(s.to_string()))),
        VrFamily::Integer => numeric_values(raw, |s| parse_int(s, vr)),
        VrFamily::Float => numeric_values(raw, |s| parse_float(s, vr)),
        VrFamily::Binary => Err(RebuildError::UnsupportedVr(vr)),
    }
}

fn split_values<F>(raw: &str, cast: F) -> RebuildResult<DicomValue>
where
    F: Fn(&str) -> RebuildResult<Scalar>,
{
    let parts = raw.split('\\').collect::<Vec<&str>>();

    if parts.len() == 1 {
        return Ok(DicomValue::Single(cast(raw)?));
    }

    let values = parts
        .into_iter()
        .map(cast)
        .collect::<RebuildResult<Vec<Scalar>>>()?;

    Ok(DicomValue::Multi(values))
}

// An empty numeric value is a zero-length element, not a parse failure.
fn numeric_values<F>(raw: &str, cast: F) -> RebuildResult<DicomValue>
where
    F: Fn(&str) -> RebuildResult<Scalar>,
{
    if raw.trim().is_empty() {
        return Ok(DicomValue::Multi(Vec::new()));
    }

    split_values(raw, cast)
}

fn integer_range(vr: Vr) -> (i64, i64) {
    match vr {
        Vr::US => (0, u16::MAX as i64),
        Vr::SS => (i16::MIN as i64, i16::MAX as i64),
        Vr::UsOrSs => (i16::MIN as i64, u16::MAX as i64),
        Vr::UL => (0, u32::MAX as i64),
        Vr::SL => (i32::MIN as i64, i32::MAX as i64),
        Vr::UV => (0, i64::MAX),
        _ => (i64::MIN, i64::MAX),
    }
}

fn parse_int(segment: &str, vr: Vr) -> RebuildResult<Scalar> {
    let invalid = |reason: String| RebuildError::InvalidValue {
        vr,
        raw: segment.to_string(),
        reason,
    };

    let value = segment
        .trim()
        .parse::<i64>()
        .map_err(|e| invalid(e.to_string()))?;

    let (min, max) = integer_range(vr);
    if value < min || value > max {
        return Err(invalid(format!("out of range {}..={}", min, max)));
    }

    Ok(Scalar::Int(value))
}

fn parse_float(segment: &str, vr: Vr) -> RebuildResult<Scalar> {
    let invalid = |reason: String| RebuildError::InvalidValue {
        vr,
        raw: segment.to_string(),
        reason,
    };

    let value = segment
        .trim()
        .parse::<f64>()
        .map_err(|e| invalid(e.to_string()))?;

    if vr == Vr::FL && value.is_finite() && value.abs() > f32::MAX as f64 {
        return Err(invalid("out of range for single precision".to_string()));
    }

    Ok(Scalar::Float(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tag;

    const TEXT_VRS: &[Vr] = &[
        Vr::AE,
        Vr::AS,
        Vr::CS,
        Vr::DA,
        Vr::DS,
        Vr::DT,
        Vr::IS,
        Vr::LO,
        Vr::LT,
        Vr::PN,
        Vr::SH,
        Vr::ST,
        Vr::TM,
        Vr::UC,
        Vr::UI,
        Vr::UR,
        Vr::UT,
    ];

    const INT_VRS: &[Vr] = &[Vr::US, Vr::SS, Vr::UL, Vr::SL, Vr::UV, Vr::SV, Vr::UsOrSs];

    fn texts(values: &[&str]) -> DicomValue {
        DicomValue::Multi(values.iter().map(|v| Scalar::Text(v.to_string())).collect())
    }

    #[test]
    fn text_vrs_split_on_backslash() {
        for vr in TEXT_VRS {
            assert_eq!(coerce("a\\b\\c", *vr).unwrap(), texts(&["a", "b", "c"]), "{vr}");
            assert_eq!(coerce("a", *vr).unwrap(), DicomValue::text("a"), "{vr}");
        }
    }

    #[test]
    fn empty_text_is_a_single_empty_string() {
        assert_eq!(coerce("", Vr::LO).unwrap(), DicomValue::text(""));
    }

    #[test]
    fn integer_vrs_parse_each_segment() {
        let expected = DicomValue::Multi(vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)]);

        for vr in INT_VRS {
            assert_eq!(coerce("1\\2\\3", *vr).unwrap(), expected, "{vr}");
            assert_eq!(coerce("7", *vr).unwrap(), DicomValue::int(7), "{vr}");
        }
    }

    #[test]
    fn integer_text_is_never_truncated() {
        assert!(matches!(coerce("12.5", Vr::US), Err(RebuildError::InvalidValue { .. })));
        assert!(matches!(coerce("abc", Vr::SL), Err(RebuildError::InvalidValue { .. })));
        assert!(matches!(coerce("1\\x", Vr::UL), Err(RebuildError::InvalidValue { .. })));
    }

    #[test]
    fn integers_respect_vr_range() {
        assert!(coerce("65536", Vr::US).is_err());
        assert!(coerce("-1", Vr::US).is_err());
        assert!(coerce("-32768", Vr::SS).is_ok());
        assert!(coerce("-1", Vr::UsOrSs).is_ok());
        assert!(coerce("65535", Vr::UsOrSs).is_ok());
        assert!(coerce("70000", Vr::UsOrSs).is_err());
    }

    #[test]
    fn padded_numbers_are_accepted() {
        assert_eq!(coerce(" 512 ", Vr::US).unwrap(), DicomValue::int(512));
    }

    #[test]
    fn empty_numeric_value_is_zero_length() {
        assert_eq!(coerce("", Vr::US).unwrap(), DicomValue::Multi(Vec::new()));
        assert_eq!(coerce("  ", Vr::FD).unwrap(), DicomValue::Multi(Vec::new()));
    }

    #[test]
    fn float_vrs_parse() {
        assert_eq!(
            coerce("0.5\\-1e3", Vr::FD).unwrap(),
            DicomValue::Multi(vec![Scalar::Float(0.5), Scalar::Float(-1000.0)])
        );
        assert_eq!(coerce("1.25", Vr::FL).unwrap(), DicomValue::Single(Scalar::Float(1.25)));
        assert!(coerce("1e300", Vr::FL).is_err());
        assert!(coerce("wide", Vr::FD).is_err());
    }

    #[test]
    fn attribute_tag_parses_pair() {
        assert_eq!(
            coerce("0054,0080", Vr::AT).unwrap(),
            DicomValue::Single(Scalar::Tag(Tag::new(0x0054, 0x0080)))
        );
        assert_eq!(
            coerce("(0018,1063)", Vr::AT).unwrap(),
            DicomValue::Single(Scalar::Tag(Tag::new(0x0018, 0x1063)))
        );
        assert!(coerce("frame", Vr::AT).is_err());
    }

    #[test]
    fn binary_vrs_are_unsupported() {
        for vr in [Vr::OB, Vr::OW, Vr::OF, Vr::SQ, Vr::UN] {
            assert!(matches!(coerce("00", vr), Err(RebuildError::UnsupportedVr(v)) if v == vr));
        }
    }
}
