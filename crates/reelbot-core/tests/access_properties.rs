use proptest::prelude::*;
use reelbot_core::access::AccessRule;
use reelbot_core::error::JobError;

proptest! {
    /// With limiting off everybody gets in.
    #[test]
    fn disabled_rule_allows_everyone(
        username in proptest::option::of("@?[A-Za-z0-9_]{0,32}"),
        chat_id in any::<i64>(),
        listed in proptest::collection::vec("[a-z]{1,8}", 0..4),
    ) {
        let rule = AccessRule::new(listed, [], false);
        prop_assert!(rule.evaluate(username.as_deref(), chat_id).is_ok());
    }

    /// An allowed chat admits any username, including none.
    #[test]
    fn allowed_chat_admits_anyone(
        username in proptest::option::of("[A-Za-z0-9_]{0,32}"),
        chat_id in any::<i64>(),
    ) {
        let rule = AccessRule::new(Vec::<String>::new(), [chat_id], true);
        prop_assert!(rule.evaluate(username.as_deref(), chat_id).is_ok());
    }

    /// Listed usernames match regardless of case and a leading `@`.
    #[test]
    fn listed_username_matches_any_spelling(
        name in "[a-z][a-z0-9_]{2,20}",
        upper in proptest::bool::ANY,
        at in proptest::bool::ANY,
        chat_id in any::<i64>(),
    ) {
        let rule = AccessRule::new([name.clone()], [], true);
        let mut spelled = if upper { name.to_uppercase() } else { name.clone() };
        if at {
            spelled.insert(0, '@');
        }
        prop_assert!(rule.evaluate(Some(&spelled), chat_id).is_ok());
    }

    /// Unknown users in unknown chats are denied with their identifiers.
    #[test]
    fn strangers_are_denied(
        username in "[a-z]{3,10}",
        chat_id in any::<i64>(),
    ) {
        let rule = AccessRule::new(["owner_only_1"], [], true);
        let denied = rule.evaluate(Some(&username), chat_id);
        prop_assert_eq!(
            denied,
            Err(JobError::AccessDenied { username: Some(username.clone()), chat_id })
        );
    }
}
