use crate::asset::{Asset, ExtendedSymbol, Symbol};
use crate::effects::{Outbound, ProtocolEvent};
use crate::errors::Error;
use crate::invariants::{assert_cap, assert_forward, assert_refund_exact};
use crate::testutils::*;
use crate::types::{PlanParams, PlanStatus};
use crate::Command;

#[test]
fn test_create_plan_computes_return_end() {
    let (p, id) = setup();
    let plan = p.plan(id).unwrap();
    assert_eq!(id, 1);
    assert_eq!(plan.status, PlanStatus::Pending);
    assert_eq!(plan.return_end_time, START + 12 * PERIOD);
    assert_eq!(plan.raised_amount, q(0));
    assert_eq!(plan.issued_receipts, r(0));
    assert!(matches!(p.events()[0], ProtocolEvent::PlanCreated { plan_id: 1, .. }));
}

#[test]
fn test_create_plan_rejects_bad_params() {
    let cases: [(&str, fn(&mut PlanParams)); 11] = [
        ("empty title", |p: &mut PlanParams| p.title.clear()),
        ("long title", |p: &mut PlanParams| p.title = "x".repeat(65)),
        ("zero goal", |p: &mut PlanParams| p.goal_amount = 0),
        ("zero receipt ratio", |p: &mut PlanParams| p.receipt_per_unit = 0),
        ("zero soft cap", |p: &mut PlanParams| p.soft_cap_pct = 0),
        ("soft above hard", |p: &mut PlanParams| {
            p.soft_cap_pct = 80;
            p.hard_cap_pct = 70;
        }),
        ("hard above 120", |p: &mut PlanParams| p.hard_cap_pct = 121),
        ("end before start", |p: &mut PlanParams| p.end_time = p.start_time),
        ("no periods", |p: &mut PlanParams| p.return_periods = 0),
        ("no apr", |p: &mut PlanParams| p.guaranteed_apr_bp = 0),
        ("same symbol", |p: &mut PlanParams| p.receipt_asset.symbol = usdt()),
    ];
    for (name, mutate) in cases {
        let mut params = params(100_000, 60, 100);
        mutate(&mut params);
        let mut p = crate::engine::Protocol::init(admin());
        let err = p.create_plan(START, params).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)), "{name}: got {err:?}");
    }
}

#[test]
fn test_hard_cap_120_is_allowed() {
    let (p, id) = setup_with(params(100_000, 100, 120));
    assert_eq!(p.plan(id).unwrap().hard_cap_amount().unwrap(), q(120_000));
}

#[test]
fn test_invest_before_start_is_rejected() {
    let (mut p, id) = setup();
    let err = invest(&mut p, id, START - 1, "alice", 1_000).unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(_)));
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Pending);
}

#[test]
fn test_invest_issues_receipts_and_activates() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 1_000).unwrap();

    let plan = p.plan(id).unwrap();
    assert_eq!(plan.status, PlanStatus::Active);
    assert_eq!(plan.raised_amount, q(1_000));
    assert_eq!(plan.issued_receipts, r(1_000));

    let outbox = p.drain_outbox();
    assert_eq!(
        outbox,
        vec![Outbound::Issue {
            contract: receipt_contract(),
            to: acct("alice"),
            quantity: r(1_000),
            memo: format!("receipt:{id}"),
        }]
    );
}

#[test]
fn test_cap_overflow_is_refunded() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 70_000).unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::SoftCapHit);
    p.drain_outbox();

    invest(&mut p, id, START + 2 * DAY, "bob", 50_000).unwrap();
    let book = p.book(id).unwrap();
    assert_cap(book);
    assert_eq!(book.plan.raised_amount, q(100_000));
    assert_eq!(book.plan.status, PlanStatus::HardCapHit);

    let invested = p
        .events()
        .iter()
        .rev()
        .find_map(|e| match e {
            ProtocolEvent::Invested { accepted, refunded, .. } => Some((accepted.clone(), refunded.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(invested, (q(30_000), q(20_000)));
    assert_refund_exact(50_000, invested.0.amount, invested.1.amount);

    let outbox = p.drain_outbox();
    assert!(outbox.contains(&Outbound::Transfer {
        contract: goal_contract(),
        from: acct("rwa.core"),
        to: acct("bob"),
        quantity: q(20_000),
        memo: format!("hard cap refund:{id}"),
    }));
    assert!(outbox.contains(&Outbound::Issue {
        contract: receipt_contract(),
        to: acct("bob"),
        quantity: r(30_000),
        memo: format!("receipt:{id}"),
    }));

    let err = invest(&mut p, id, START + 3 * DAY, "carol", 1).unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(_)));
}

#[test]
fn test_receipts_scale_with_goal_precision() {
    let mut params = params(1_000_000_000, 10, 100);
    params.goal_asset = ExtendedSymbol::new(goal_contract(), Symbol::new("USDT", 4).unwrap());
    params.receipt_asset = ExtendedSymbol::new(receipt_contract(), Symbol::new("RWA", 2).unwrap());
    // 1.50 RWA per whole USDT
    params.receipt_per_unit = 150;
    let (mut p, id) = setup_with(params);

    let ten: Asset = "10.0000 USDT".parse().unwrap();
    deposit(&mut p, START + DAY, "alice", ten, &format!("invest:{id}")).unwrap();
    assert_eq!(p.plan(id).unwrap().issued_receipts.to_string(), "15.00 RWA");

    let dust: Asset = "0.0001 USDT".parse().unwrap();
    let err = deposit(&mut p, START + DAY, "bob", dust, &format!("invest:{id}")).unwrap_err();
    assert!(matches!(err, Error::NotPositive(_)));
}

#[test]
fn test_invest_symbol_and_contract_checked() {
    let (mut p, id) = setup();
    let err = deposit(&mut p, START + DAY, "alice", r(10), &format!("invest:{id}")).unwrap_err();
    assert!(matches!(err, Error::SymbolMismatch(_)));

    let core = p.config().core_account.clone();
    let err = p
        .on_deposit(
            START + DAY,
            &crate::memo::DepositEvent {
                from: acct("alice"),
                to: core,
                contract: acct("fake.token"),
                quantity: q(10),
                memo: format!("invest:{id}"),
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::ContractMismatch(_)));
}

#[test]
fn test_unknown_plan_and_foreign_transfers() {
    let (mut p, _) = setup();
    let err = invest(&mut p, 99, START + DAY, "alice", 10).unwrap_err();
    assert!(matches!(err, Error::RecordNotFound(_)));

    let ignored = p
        .on_deposit(
            START + DAY,
            &crate::memo::DepositEvent {
                from: acct("alice"),
                to: acct("somebody.else"),
                contract: goal_contract(),
                quantity: q(10),
                memo: "not even a memo".into(),
            },
        )
        .unwrap();
    assert_eq!(ignored, None);

    let err = deposit(&mut p, START + DAY, "alice", q(10), "invest-1").unwrap_err();
    assert!(matches!(err, Error::InvalidFormat(_)));
}

#[test]
fn test_failed_step_leaves_book_untouched() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 1_000).unwrap();
    let before = p.book(id).unwrap().clone();
    let outbox_len = p.drain_outbox().len();
    assert_eq!(outbox_len, 1);

    assert!(invest(&mut p, id, START + 2 * DAY, "bob", 0).is_err());
    assert!(deposit(&mut p, START + 2 * DAY, "bob", r(5), &format!("invest:{id}")).is_err());
    assert_eq!(p.book(id).unwrap(), &before);
    assert!(p.drain_outbox().is_empty());
}

#[test]
fn test_success_releases_raise_to_creator() {
    let (mut p, id) = successful_plan();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Success);
    let outbox = p.drain_outbox();
    assert!(outbox.contains(&Outbound::Transfer {
        contract: goal_contract(),
        from: acct("rwa.core"),
        to: creator(),
        quantity: q(100_000),
        memo: format!("release:{id}"),
    }));

    refresh(&mut p, id, START + 12 * PERIOD).unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Completed);
    // No second release on completion.
    assert!(p
        .drain_outbox()
        .iter()
        .all(|o| !matches!(o, Outbound::Transfer { memo, .. } if memo.starts_with("release"))));
}

#[test]
fn test_pending_pledge_waits_for_coverage() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 80_000).unwrap();
    guaranty(&mut p, id, START + DAY, "gina", 10_000).unwrap();

    refresh(&mut p, id, END).unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::PendingPledge);

    guaranty(&mut p, id, END + DAY, "gus", 39_999).unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::PendingPledge);

    guaranty(&mut p, id, END + 2 * DAY, "gus", 1).unwrap();
    refresh(&mut p, id, END + 2 * DAY).unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Success);
}

#[test]
fn test_pending_pledge_fails_after_window() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 80_000).unwrap();
    refresh(&mut p, id, END).unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::PendingPledge);

    refresh(&mut p, id, END + 7 * DAY).unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Failed);
}

#[test]
fn test_below_soft_cap_fails_and_refunds() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 10_000).unwrap();
    invest(&mut p, id, START + DAY, "bob", 20_000).unwrap();

    let err = invest(&mut p, id, END, "carol", 5_000).unwrap_err();
    assert!(matches!(err, Error::Expired(_)));

    refresh(&mut p, id, END).unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Failed);
    p.drain_outbox();

    deposit(&mut p, END + DAY, "alice", r(10_000), &format!("refund:{id}:alice")).unwrap();
    let plan = p.plan(id).unwrap();
    assert_eq!(plan.raised_amount, q(20_000));
    assert_eq!(plan.issued_receipts, r(20_000));
    assert_eq!(plan.status, PlanStatus::Failed);

    let outbox = p.drain_outbox();
    assert_eq!(
        outbox,
        vec![
            Outbound::Transfer {
                contract: goal_contract(),
                from: acct("rwa.core"),
                to: acct("alice"),
                quantity: q(10_000),
                memo: format!("refund for plan:{id}"),
            },
            Outbound::Burn {
                contract: receipt_contract(),
                from: acct("rwa.core"),
                quantity: r(10_000),
                memo: format!("refund for plan:{id}"),
            },
        ]
    );

    // Investor-initiated refund burns straight from the investor.
    p.execute(
        END + DAY,
        id,
        Command::Refund {
            investor: acct("bob"),
            receipts: r(20_000),
        },
    )
    .unwrap();
    let plan = p.plan(id).unwrap();
    assert_eq!(plan.status, PlanStatus::Refunded);
    assert!(plan.raised_amount.is_zero() && plan.issued_receipts.is_zero());
    assert!(p.drain_outbox().iter().any(|o| matches!(
        o,
        Outbound::Burn { from, quantity, .. } if from == &acct("bob") && quantity == &r(20_000)
    )));
}

#[test]
fn test_refund_requires_aborted_plan() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 10_000).unwrap();
    let err = deposit(&mut p, START + DAY, "alice", r(10_000), &format!("refund:{id}:alice")).unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(_)));
}

#[test]
fn test_refund_more_than_issued() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 10_000).unwrap();
    refresh(&mut p, id, END).unwrap();
    let err = deposit(&mut p, END, "alice", r(10_001), &format!("refund:{id}:alice")).unwrap_err();
    assert!(matches!(err, Error::QuantityInsufficient(_)));
}

#[test]
fn test_cancel_by_creator_only() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 10_000).unwrap();

    let err = p
        .execute(START + DAY, id, Command::Cancel { creator: acct("alice") })
        .unwrap_err();
    assert!(matches!(err, Error::NoAuth(_)));

    p.execute(START + DAY, id, Command::Cancel { creator: creator() })
        .unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Cancelled);
    assert!(matches!(p.events().last(), Some(ProtocolEvent::Cancelled { .. })));

    let err = invest(&mut p, id, START + 2 * DAY, "bob", 1_000).unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(_)));

    let err = p
        .execute(START + 2 * DAY, id, Command::Cancel { creator: creator() })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(_)));
}

#[test]
fn test_cannot_cancel_after_success() {
    let (mut p, id) = successful_plan();
    let err = p
        .execute(END + DAY, id, Command::Cancel { creator: creator() })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(_)));
}

#[test]
fn test_status_changes_only_move_forward() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 60_000).unwrap();
    invest(&mut p, id, START + 2 * DAY, "bob", 40_000).unwrap();
    guaranty(&mut p, id, START + 3 * DAY, "gina", 50_000).unwrap();
    refresh(&mut p, id, END).unwrap();
    refresh(&mut p, id, START + 12 * PERIOD).unwrap();

    let transitions: Vec<(PlanStatus, PlanStatus)> = p
        .events()
        .iter()
        .filter_map(|e| match e {
            ProtocolEvent::StatusChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (PlanStatus::Pending, PlanStatus::Active),
            (PlanStatus::Active, PlanStatus::SoftCapHit),
            (PlanStatus::SoftCapHit, PlanStatus::HardCapHit),
            (PlanStatus::HardCapHit, PlanStatus::Success),
            (PlanStatus::Success, PlanStatus::Completed),
        ]
    );
    for (from, to) in transitions {
        assert_forward(from, to);
    }
}
