//! Property tests for direct-room key derivation.
//!
//! Uses proptest to verify:
//! 1. Derivation is commutative for any pair of usable identifiers.
//! 2. The derived key parses back from its string form unchanged.
//! 3. Distinct unordered pairs never collide.
//! 4. Arbitrary strings never cause a panic when parsed as a `RoomKey`.

use linkroom_proto::message::UserId;
use linkroom_proto::room::{RoomKey, SelfChatPolicy, derive_direct_room_key};
use proptest::prelude::*;

/// Strategy for identifiers the deriver accepts.
fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[A-Za-z0-9_.@-]{1,32}".prop_map(UserId::new)
}

proptest! {
    #[test]
    fn derivation_is_commutative(a in arb_user_id(), b in arb_user_id()) {
        prop_assume!(a != b);
        let ab = derive_direct_room_key(&a, &b, SelfChatPolicy::Reject).unwrap();
        let ba = derive_direct_room_key(&b, &a, SelfChatPolicy::Reject).unwrap();
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn derived_key_round_trips_through_string(a in arb_user_id(), b in arb_user_id()) {
        let key = derive_direct_room_key(&a, &b, SelfChatPolicy::Allow).unwrap();
        let parsed: RoomKey = key.to_string().parse().unwrap();
        prop_assert_eq!(parsed, key);
    }

    #[test]
    fn distinct_pairs_do_not_collide(
        a in arb_user_id(),
        b in arb_user_id(),
        c in arb_user_id(),
        d in arb_user_id(),
    ) {
        let mut left = [a.clone(), b.clone()];
        let mut right = [c.clone(), d.clone()];
        left.sort();
        right.sort();
        prop_assume!(left != right);
        let k1 = derive_direct_room_key(&a, &b, SelfChatPolicy::Allow).unwrap();
        let k2 = derive_direct_room_key(&c, &d, SelfChatPolicy::Allow).unwrap();
        prop_assert_ne!(k1, k2);
    }

    #[test]
    fn self_pairs_follow_policy(a in arb_user_id()) {
        prop_assert!(derive_direct_room_key(&a, &a, SelfChatPolicy::Reject).is_err());
        prop_assert!(derive_direct_room_key(&a, &a, SelfChatPolicy::Allow).is_ok());
    }

    #[test]
    fn parsing_arbitrary_text_never_panics(text in ".*") {
        let _ = text.parse::<RoomKey>();
    }
}
