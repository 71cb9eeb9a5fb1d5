//! Property tests for the physical-key determinism law of §8:
//! "retrieve_event_by_id(upsert(e).id) == e.payload (up to server-side
//! field typing)" depends on equal `original_id`s always colliding.

use proptest::prelude::*;
use sentinel_core::ids::physical_key;

proptest! {
    #[test]
    fn same_input_always_produces_same_key(id in ".{0,200}") {
        prop_assert_eq!(physical_key(&id), physical_key(&id));
    }

    #[test]
    fn key_is_always_a_canonical_hyphenated_uuid(id in ".{0,200}") {
        let key = physical_key(&id);
        prop_assert_eq!(key.len(), 36);
        prop_assert_eq!(key.chars().filter(|c| *c == '-').count(), 4);
    }

    #[test]
    fn distinct_inputs_rarely_collide(a in ".{1,200}", b in ".{1,200}") {
        prop_assume!(a != b);
        prop_assert_ne!(physical_key(&a), physical_key(&b));
    }
}
