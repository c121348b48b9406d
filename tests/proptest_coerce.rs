use dicom_rebuild::model::{Scalar, Vr};
use dicom_rebuild::{coerce, RebuildError};
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn text_splits_on_backslash(parts in prop::collection::vec("[^\\\\]{0,12}", 1..6)) {
        let value = coerce(&parts.join("\\"), Vr::LO).expect("text always coerces");

        let texts = value
            .scalars()
            .iter()
            .map(|s| match s {
                Scalar::Text(t) => t.clone(),
                other => panic!("unexpected scalar {other:?}"),
            })
            .collect::<Vec<_>>();
        prop_assert_eq!(texts, parts);
    }

    #[test]
    fn signed_longs_keep_their_values(values in prop::collection::vec(any::<i32>(), 1..5)) {
        let raw = values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("\\");
        let value = coerce(&raw, Vr::SL).expect("in range");

        let parsed = value.scalars().iter().map(Scalar::as_i64).collect::<Vec<_>>();
        prop_assert_eq!(parsed, values.iter().map(|v| Some(*v as i64)).collect::<Vec<_>>());
    }

    #[test]
    fn unsigned_shorts_reject_out_of_range(v in 65536i64..i64::MAX) {
        let result = coerce(&v.to_string(), Vr::US);
        prop_assert!(
            matches!(result, Err(RebuildError::InvalidValue { .. })),
            "expected InvalidValue, got {:?}",
            result
        );
    }

    #[test]
    fn doubles_parse(v in -1.0e12f64..1.0e12) {
        let value = coerce(&v.to_string(), Vr::FD).expect("finite double");
        prop_assert_eq!(value.first_f64(), Some(v));
    }
}
