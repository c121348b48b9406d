use std::path::{Component, Path};

use dicom_rebuild::series::{index_width, instance_file_name, pathify, series_dir_name};
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn file_names_sort_in_index_order(count in 1usize..100_000, a in any::<prop::sample::Index>(), b in any::<prop::sample::Index>()) {
        let width = index_width(count);
        let (i, j) = (a.index(count), b.index(count));

        let name_i = instance_file_name(i, width, "dcm");
        let name_j = instance_file_name(j, width, "dcm");

        prop_assert_eq!(name_i.len(), width + 4);
        prop_assert_eq!(name_i.cmp(&name_j), i.cmp(&j));
    }

    #[test]
    fn pathify_leaves_no_reserved_characters(text in ".{0,40}") {
        let safe = pathify(&text);

        prop_assert!(!safe.contains(['<', '>', ':', '"', '/', '\\', '?', '*', '|']));
        prop_assert!(!safe.chars().any(char::is_control));
        prop_assert!(!safe.ends_with(['.', ' ']));
        prop_assert_eq!(safe.trim_start(), safe.as_str());
    }

    #[test]
    fn series_dir_is_one_normal_component(
        number in prop::option::of(0i64..10_000),
        description in prop_oneof![Just("..".to_string()), Just(".".to_string()), ".{0,40}"],
    ) {
        let name = series_dir_name(number, &description);
        let components = Path::new(&name).components().collect::<Vec<_>>();

        prop_assert_eq!(components.len(), 1, "{:?} from {:?}", name, description);
        prop_assert!(matches!(components[0], Component::Normal(_)), "{:?} from {:?}", name, description);
    }
}
