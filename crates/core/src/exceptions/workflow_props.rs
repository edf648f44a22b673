//! Property-based tests for the exception lifecycle.

use proptest::prelude::*;

use super::types::ExceptionStatus;
use super::workflow::ExceptionWorkflow;

fn status_strategy() -> impl Strategy<Value = ExceptionStatus> {
    prop_oneof![
        Just(ExceptionStatus::Open),
        Just(ExceptionStatus::UnderReview),
        Just(ExceptionStatus::Resolved),
        Just(ExceptionStatus::Dismissed),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: Closed exceptions are terminal.
    ///
    /// *For any* sequence of requested transitions, once an exception is
    /// Resolved or Dismissed no further transition SHALL succeed.
    #[test]
    fn prop_closed_states_are_terminal(
        requests in prop::collection::vec(status_strategy(), 1..20),
    ) {
        let mut status = ExceptionStatus::Open;
        let mut closed = false;
        for to in requests {
            let allowed = ExceptionWorkflow::can_transition(status, to);
            if closed {
                prop_assert!(!allowed);
            }
            if allowed {
                status = to;
                closed = !status.is_open();
            }
        }
    }

    /// Property 2: Only open states accept resolution.
    ///
    /// *For any* status, closing SHALL succeed exactly when the status is open.
    #[test]
    fn prop_close_requires_open_status(
        from in status_strategy(),
        dismiss in any::<bool>(),
    ) {
        let to = if dismiss { ExceptionStatus::Dismissed } else { ExceptionStatus::Resolved };
        prop_assert_eq!(ExceptionWorkflow::close(from, to).is_ok(), from.is_open());
    }
}
