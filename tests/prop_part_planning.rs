// Property: for any splittable content length and valid part size constraints,
// the planned parts are contiguous, numbered from 1, cover the content exactly,
// respect the minimum part size and part count, and only the last part may
// differ in size (never smaller than the others).

use object_transfer::{PartSizes, TransferError};
use proptest::prelude::*;

fn constraints() -> impl Strategy<Value = (u64, u64, u32)> {
    (1u64..10_000, 0u64..10_000, 2u32..10_000)
        .prop_map(|(minimum, extra, max_parts)| (minimum, minimum + extra, max_parts))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_plan_covers_content_exactly(
        (minimum, recommended, max_parts) in constraints(),
        extra in 1u64..100_000_000,
    ) {
        let sizes = PartSizes::new(minimum, recommended, max_parts).unwrap();
        let content_length = minimum + extra;
        let parts = sizes.plan(content_length).unwrap();

        prop_assert!(parts.len() >= 2);
        prop_assert!(parts.len() <= max_parts as usize);

        let mut expected_start = 0;
        for (i, part) in parts.iter().enumerate() {
            prop_assert_eq!(part.part_number as usize, i + 1);
            prop_assert_eq!(part.start, expected_start);
            prop_assert!(part.length >= 1);
            expected_start += part.length;
        }
        prop_assert_eq!(expected_start, content_length);

        let first = parts[0].length;
        prop_assert!(first >= minimum);
        for part in &parts[..parts.len() - 1] {
            prop_assert_eq!(part.length, first);
        }
    }

    #[test]
    fn prop_last_part_not_smaller_above_two_recommended(
        (minimum, recommended, max_parts) in constraints(),
        extra in 0u64..100_000_000,
    ) {
        let sizes = PartSizes::new(minimum, recommended, max_parts).unwrap();
        let content_length = recommended * 2 + extra;
        prop_assert!(sizes.should_split(content_length));

        let parts = sizes.plan(content_length).unwrap();
        let last = parts[parts.len() - 1].length;
        prop_assert!(last >= parts[0].length);
        prop_assert!(parts[0].length >= minimum);
    }

    #[test]
    fn prop_below_two_recommended_makes_two_parts(
        (minimum, recommended, max_parts) in constraints(),
        frac in 0.0f64..1.0,
    ) {
        let sizes = PartSizes::new(minimum, recommended, max_parts).unwrap();
        // anything in (minimum, 2 * recommended)
        let span = recommended * 2 - minimum - 1;
        let content_length = minimum + 1 + (span as f64 * frac) as u64;
        prop_assume!(content_length < recommended * 2);

        prop_assert!(!sizes.should_split(content_length));
        prop_assert_eq!(sizes.plan(content_length).unwrap().len(), 2);
    }

    #[test]
    fn prop_unsplittable_content_is_rejected(
        (minimum, recommended, max_parts) in constraints(),
        shortfall in 0u64..10_000,
    ) {
        let sizes = PartSizes::new(minimum, recommended, max_parts).unwrap();
        let content_length = minimum.saturating_sub(shortfall);
        prop_assert!(!sizes.is_large_enough_to_split(content_length));
        prop_assert!(matches!(
            sizes.plan(content_length),
            Err(TransferError::Precondition(_))
        ));
    }

    #[test]
    fn prop_should_split_implies_splittable(
        (minimum, recommended, max_parts) in constraints(),
        content_length in 0u64..1_000_000,
    ) {
        let sizes = PartSizes::new(minimum, recommended, max_parts).unwrap();
        if sizes.should_split(content_length) {
            prop_assert!(sizes.is_large_enough_to_split(content_length));
        }
    }
}
