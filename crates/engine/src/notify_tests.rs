// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn notice(options: Vec<RecoveryOption>) -> EscalationNotice {
    EscalationNotice::new(
        OrchestrationId::from_string("5f3c9d0a-1b2c-4d5e-8f90-123456789abc"),
        "heal budget exhausted: tests failed",
        options,
    )
}

#[test]
fn title_carries_the_short_orchestration_id() {
    let notice = notice(vec![]);
    assert_eq!(notice.title(), "Orchestration 5f3c9d0a needs attention");
}

#[yare::parameterized(
    all_three = {
        vec![RecoveryOption::Retry, RecoveryOption::Skip, RecoveryOption::Abort],
        "heal budget exhausted: tests failed (choose: retry / skip / abort)"
    },
    two = {
        vec![RecoveryOption::Retry, RecoveryOption::Abort],
        "heal budget exhausted: tests failed (choose: retry / abort)"
    },
)]
fn body_lists_the_recovery_choices(options: Vec<RecoveryOption>, expected: &str) {
    assert_eq!(notice(options).body(), expected);
}

#[test]
fn body_without_options_is_just_the_issue() {
    assert_eq!(notice(vec![]).body(), "heal budget exhausted: tests failed");
}
