use crate::effects::{Outbound, ProtocolEvent};
use crate::errors::Error;
use crate::testutils::*;
use crate::types::PlanStatus;
use crate::Command;

fn reward(p: &mut crate::engine::Protocol, id: u64, now: u64, amount: i64) {
    deposit(p, now, "sponsor", q(amount), &format!("reward:{id}")).unwrap();
}

#[test]
fn test_reward_split_by_stake() {
    let (mut p, id) = setup();
    stake(&mut p, id, START + DAY, "alice", 100).unwrap();
    stake(&mut p, id, START + DAY, "bob", 300).unwrap();
    reward(&mut p, id, START + 2 * DAY, 1_000);

    assert_eq!(p.claimable(id, &acct("alice")).unwrap(), q(250));
    assert_eq!(p.claimable(id, &acct("bob")).unwrap(), q(750));
    assert_eq!(p.stake_pool(id).unwrap().total_staked, r(400));
    check(&p, id);

    let outbox = p.drain_outbox();
    assert!(outbox.contains(&Outbound::Transfer {
        contract: goal_contract(),
        from: acct("rwa.core"),
        to: acct("rwa.stake"),
        quantity: q(1_000),
        memo: format!("reward-pool:{id}"),
    }));
}

#[test]
fn test_reward_without_stakers_is_parked() {
    let (mut p, id) = setup();
    reward(&mut p, id, START + DAY, 500);
    let pool = p.stake_pool(id).unwrap();
    assert_eq!(pool.unallocated_rewards, q(500));
    assert_eq!(pool.reward_per_share, 0);

    stake(&mut p, id, START + DAY, "alice", 100).unwrap();
    assert_eq!(p.claimable(id, &acct("alice")).unwrap(), q(0));

    reward(&mut p, id, START + 2 * DAY, 100);
    assert_eq!(p.claimable(id, &acct("alice")).unwrap(), q(600));
    assert!(p.stake_pool(id).unwrap().unallocated_rewards.is_zero());
    assert_eq!(p.stake_pool(id).unwrap().total_rewards, q(600));
}

#[test]
fn test_late_staker_earns_only_later_rewards() {
    let (mut p, id) = setup();
    stake(&mut p, id, START + DAY, "alice", 100).unwrap();
    reward(&mut p, id, START + DAY, 1_000);
    stake(&mut p, id, START + 2 * DAY, "bob", 100).unwrap();
    reward(&mut p, id, START + 2 * DAY, 1_000);

    assert_eq!(p.claimable(id, &acct("alice")).unwrap(), q(1_500));
    assert_eq!(p.claimable(id, &acct("bob")).unwrap(), q(500));
}

#[test]
fn test_topping_up_keeps_earned_rewards() {
    let (mut p, id) = setup();
    stake(&mut p, id, START + DAY, "alice", 100).unwrap();
    stake(&mut p, id, START + DAY, "bob", 100).unwrap();
    reward(&mut p, id, START + DAY, 200);
    stake(&mut p, id, START + 2 * DAY, "alice", 200).unwrap();

    let alice = p.staker(id, &acct("alice")).unwrap();
    assert_eq!(alice.unclaimed_rewards, q(100));
    assert_eq!(alice.avl_staked, r(300));
    assert_eq!(alice.cum_staked, r(300));

    reward(&mut p, id, START + 3 * DAY, 400);
    assert_eq!(p.claimable(id, &acct("alice")).unwrap(), q(400));
    assert_eq!(p.claimable(id, &acct("bob")).unwrap(), q(200));
}

#[test]
fn test_claim_pays_from_stake_pool() {
    let (mut p, id) = setup();
    stake(&mut p, id, START + DAY, "alice", 100).unwrap();
    reward(&mut p, id, START + DAY, 300);
    p.drain_outbox();

    p.execute(START + 2 * DAY, id, Command::Claim { owner: acct("alice") })
        .unwrap();
    assert_eq!(
        p.drain_outbox(),
        vec![Outbound::Transfer {
            contract: goal_contract(),
            from: acct("rwa.stake"),
            to: acct("alice"),
            quantity: q(300),
            memo: format!("claim:{id}"),
        }]
    );
    let alice = p.staker(id, &acct("alice")).unwrap();
    assert_eq!(alice.claimed_rewards, q(300));
    assert!(alice.unclaimed_rewards.is_zero());
    assert_eq!(p.stake_pool(id).unwrap().claimed_rewards, q(300));

    let err = p
        .execute(START + 2 * DAY, id, Command::Claim { owner: acct("alice") })
        .unwrap_err();
    assert!(matches!(err, Error::NotPositive(_)));

    let err = p
        .execute(START + 2 * DAY, id, Command::Claim { owner: acct("nobody") })
        .unwrap_err();
    assert!(matches!(err, Error::RecordNotFound(_)));
}

#[test]
fn test_unstake_pays_rewards_first() {
    let (mut p, id) = setup();
    stake(&mut p, id, START + DAY, "alice", 100).unwrap();
    reward(&mut p, id, START + DAY, 1_000);
    p.drain_outbox();

    p.execute(
        START + 2 * DAY,
        id,
        Command::Unstake {
            owner: acct("alice"),
            quantity: r(40),
        },
    )
    .unwrap();
    assert_eq!(
        p.drain_outbox(),
        vec![
            Outbound::Transfer {
                contract: goal_contract(),
                from: acct("rwa.stake"),
                to: acct("alice"),
                quantity: q(1_000),
                memo: format!("claim:{id}"),
            },
            Outbound::Transfer {
                contract: receipt_contract(),
                from: acct("rwa.core"),
                to: acct("alice"),
                quantity: r(40),
                memo: format!("unstake:{id}"),
            },
        ]
    );
    assert_eq!(p.staker(id, &acct("alice")).unwrap().avl_staked, r(60));
    check(&p, id);

    let err = p
        .execute(
            START + 2 * DAY,
            id,
            Command::Unstake {
                owner: acct("alice"),
                quantity: r(61),
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::QuantityInsufficient(_)));

    p.execute(
        START + 2 * DAY,
        id,
        Command::Unstake {
            owner: acct("alice"),
            quantity: r(60),
        },
    )
    .unwrap();
    assert!(matches!(p.staker(id, &acct("alice")), Err(Error::RecordNotFound(_))));
    assert!(p.stake_pool(id).unwrap().total_staked.is_zero());
}

#[test]
fn test_stake_rejects_goal_asset() {
    let (mut p, id) = setup();
    let err = deposit(&mut p, START + DAY, "alice", q(100), &format!("stake:{id}")).unwrap_err();
    assert!(matches!(err, Error::SymbolMismatch(_)));
}

#[test]
fn test_cancel_returns_all_stakes() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 400).unwrap();
    stake(&mut p, id, START + DAY, "alice", 100).unwrap();
    stake(&mut p, id, START + DAY, "bob", 300).unwrap();
    reward(&mut p, id, START + DAY, 400);
    p.drain_outbox();

    p.execute(START + 2 * DAY, id, Command::Cancel { creator: creator() })
        .unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Cancelled);
    assert!(p.book(id).unwrap().stakers.is_empty());
    assert!(p.stake_pool(id).unwrap().total_staked.is_zero());

    let outbox = p.drain_outbox();
    let returned: Vec<(String, i64)> = outbox
        .iter()
        .filter_map(|o| match o {
            Outbound::Transfer { to, quantity, memo, .. } if memo.starts_with("unstake") => {
                Some((to.to_string(), quantity.amount))
            }
            _ => None,
        })
        .collect();
    assert_eq!(returned, vec![("alice".to_string(), 100), ("bob".to_string(), 300)]);
    let claims = outbox
        .iter()
        .filter(|o| matches!(o, Outbound::Transfer { memo, .. } if memo.starts_with("claim")))
        .count();
    assert_eq!(claims, 2);
    assert_eq!(
        p.events()
            .iter()
            .filter(|e| matches!(e, ProtocolEvent::Unstaked { .. }))
            .count(),
        2
    );

    let err = stake(&mut p, id, START + 3 * DAY, "carol", 10).unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(_)));
    let err = deposit(&mut p, START + 3 * DAY, "sponsor", q(10), &format!("reward:{id}")).unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(_)));
}

#[test]
fn test_parked_rewards_go_back_to_creator_on_cancel() {
    let (mut p, id) = setup();
    reward(&mut p, id, START + DAY, 500);
    assert_eq!(p.stake_pool(id).unwrap().unallocated_rewards, q(500));
    p.drain_outbox();

    p.execute(START + 2 * DAY, id, Command::Cancel { creator: creator() })
        .unwrap();
    let pool = p.stake_pool(id).unwrap();
    assert!(pool.unallocated_rewards.is_zero());
    assert!(pool.total_rewards.is_zero());
    assert!(pool.claimed_rewards.is_zero());
    assert_eq!(
        p.drain_outbox(),
        vec![Outbound::Transfer {
            contract: goal_contract(),
            from: acct("rwa.stake"),
            to: creator(),
            quantity: q(500),
            memo: format!("reward-return:{id}"),
        }]
    );
    check(&p, id);
}

#[test]
fn test_parked_rewards_go_back_to_creator_on_failure() {
    let (mut p, id) = setup();
    invest(&mut p, id, START + DAY, "alice", 10_000).unwrap();
    stake(&mut p, id, START + DAY, "alice", 100).unwrap();
    p.execute(
        START + 2 * DAY,
        id,
        Command::Unstake {
            owner: acct("alice"),
            quantity: r(100),
        },
    )
    .unwrap();
    reward(&mut p, id, START + 3 * DAY, 300);
    p.drain_outbox();

    refresh(&mut p, id, END).unwrap();
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Failed);
    assert!(p.stake_pool(id).unwrap().unallocated_rewards.is_zero());
    let returned: Vec<i64> = p
        .drain_outbox()
        .iter()
        .filter_map(|o| match o {
            Outbound::Transfer { from, to, quantity, memo, .. }
                if memo == &format!("reward-return:{id}") =>
            {
                assert_eq!(from, &acct("rwa.stake"));
                assert_eq!(to, &creator());
                Some(quantity.amount)
            }
            _ => None,
        })
        .collect();
    assert_eq!(returned, vec![300]);
    check(&p, id);
}

#[test]
fn test_batch_unstake_command() {
    let (mut p, id) = setup();
    stake(&mut p, id, START + DAY, "alice", 10).unwrap();
    stake(&mut p, id, START + DAY, "bob", 20).unwrap();
    p.execute(START + DAY, id, Command::BatchUnstake).unwrap();
    assert!(p.book(id).unwrap().stakers.is_empty());
    check(&p, id);
}
