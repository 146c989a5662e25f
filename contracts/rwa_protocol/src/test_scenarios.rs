//! End-to-end runs against a simulated token ledger.
//!
//! Every inbound deposit and every outbound instruction is applied to
//! [`Ledger`], so the custody balances of the protocol accounts can be
//! compared with the books after each operation.

use std::collections::BTreeMap;

use crate::asset::{Account, Asset};
use crate::distribution::PoolQuote;
use crate::effects::Outbound;
use crate::engine::Protocol;
use crate::errors::Result;
use crate::invariants;
use crate::testutils::*;
use crate::types::PlanStatus;
use crate::Command;

#[derive(Default)]
struct Ledger {
    balances: BTreeMap<(Account, Account), i64>,
}

impl Ledger {
    fn balance(&self, contract: &Account, holder: &str) -> i64 {
        self.balances
            .get(&(contract.clone(), acct(holder)))
            .copied()
            .unwrap_or(0)
    }

    fn shift(&mut self, contract: &Account, holder: &Account, delta: i64) {
        *self
            .balances
            .entry((contract.clone(), holder.clone()))
            .or_insert(0) += delta;
    }

    fn settle(&mut self, p: &mut Protocol) {
        for out in p.drain_outbox() {
            match out {
                Outbound::Transfer {
                    contract,
                    from,
                    to,
                    quantity,
                    ..
                } => {
                    self.shift(&contract, &from, -quantity.amount);
                    self.shift(&contract, &to, quantity.amount);
                }
                Outbound::Issue {
                    contract,
                    to,
                    quantity,
                    ..
                } => self.shift(&contract, &to, quantity.amount),
                Outbound::Burn {
                    contract,
                    from,
                    quantity,
                    ..
                } => self.shift(&contract, &from, -quantity.amount),
                Outbound::Swap {
                    input,
                    target_contract,
                    ..
                } => {
                    let core = p.config().core_account.clone();
                    self.shift(&goal_contract(), &core, -input.amount);
                    self.shift(&goal_contract(), &target_contract, input.amount);
                }
            }
        }
    }

    /// Send `quantity` into the core account; the transfer only lands if
    /// the protocol accepts it.
    fn send(&mut self, p: &mut Protocol, now: u64, from: &str, quantity: Asset, memo: &str) -> Result<()> {
        let contract = if quantity.symbol == rwa() {
            receipt_contract()
        } else {
            goal_contract()
        };
        deposit(p, now, from, quantity.clone(), memo)?;
        let core = p.config().core_account.clone();
        self.shift(&contract, &acct(from), -quantity.amount);
        self.shift(&contract, &core, quantity.amount);
        self.settle(p);
        Ok(())
    }

    /// `send` that must succeed, followed by a reconciliation.
    fn accept(&mut self, p: &mut Protocol, id: u64, now: u64, from: &str, quantity: Asset, memo: &str) {
        self.send(p, now, from, quantity, memo).unwrap();
        self.reconcile(p, id);
    }

    fn run(&mut self, p: &mut Protocol, now: u64, id: u64, cmd: Command) -> Result<()> {
        p.execute(now, id, cmd)?;
        self.settle(p);
        Ok(())
    }

    /// Custody balances of the protocol accounts agree with the book.
    fn reconcile(&self, p: &Protocol, id: u64) {
        let book = p.book(id).unwrap();
        invariants::assert_all(book);

        let goal = goal_contract();
        let receipts = receipt_contract();
        for holder in ["rwa.core", "rwa.stake", "rwa.guaranty"] {
            assert!(self.balance(&goal, holder) >= 0, "{holder} overdrawn");
            assert!(self.balance(&receipts, holder) >= 0, "{holder} receipts overdrawn");
        }

        let pool = &book.stake_pool;
        assert_eq!(
            self.balance(&goal, "rwa.stake"),
            pool.total_rewards.amount - pool.claimed_rewards.amount,
            "stake pool custody"
        );

        let earned: i64 = book.guarantors.values().map(|g| g.earned_yield.amount).sum();
        assert_eq!(
            self.balance(&goal, "rwa.guaranty"),
            book.guaranty.available().unwrap().amount + earned,
            "guaranty pool custody"
        );

        assert_eq!(
            self.balance(&receipts, "rwa.core"),
            pool.total_staked.amount,
            "staked receipts custody"
        );

        let released = matches!(book.plan.status, PlanStatus::Success | PlanStatus::Completed);
        let core_goal = self.balance(&goal, "rwa.core");
        if released {
            assert_eq!(core_goal, book.buyback.remaining().unwrap().amount, "core custody");
        } else {
            assert_eq!(core_goal, book.plan.raised_amount.amount, "core custody");
        }
    }
}

#[test]
fn test_full_lifecycle() {
    let (mut p, id) = setup();
    let mut l = Ledger::default();
    let invest_memo = format!("invest:{id}");
    let guaranty_memo = format!("guaranty:{id}");
    let stake_memo = format!("stake:{id}");
    let yield_memo = format!("plan:{id}");

    l.accept(&mut p, id, START + DAY, "alice", q(60_000), &invest_memo);
    l.accept(&mut p, id, START + DAY, "bob", q(50_000), &invest_memo);
    assert_eq!(l.balance(&goal_contract(), "bob"), -40_000);
    assert_eq!(l.balance(&receipt_contract(), "bob"), 40_000);

    l.accept(&mut p, id, START + 2 * DAY, "gina", q(30_000), &guaranty_memo);
    l.accept(&mut p, id, START + 2 * DAY, "gus", q(20_000), &guaranty_memo);

    l.run(&mut p, END, id, Command::RefreshStatus).unwrap();
    l.reconcile(&p, id);
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Success);
    assert_eq!(l.balance(&goal_contract(), "creator"), 100_000);

    l.accept(&mut p, id, END + DAY, "alice", r(60_000), &stake_memo);
    l.accept(&mut p, id, END + DAY, "bob", r(40_000), &stake_memo);
    l.accept(&mut p, id, END + DAY, "bank", q(1_000), &yield_memo);
    l.accept(&mut p, id, START + 2 * PERIOD, "bank", q(1_000), &yield_memo);

    l.run(&mut p, START + 2 * PERIOD, id, Command::Claim { owner: acct("alice") })
        .unwrap();
    l.reconcile(&p, id);
    assert_eq!(l.balance(&goal_contract(), "alice"), -60_000 + 960);

    l.run(
        &mut p,
        START + 4 * PERIOD + DAY,
        id,
        Command::GuarantPay {
            submitter: acct("keeper"),
            periods: 4,
        },
    )
    .unwrap();
    l.reconcile(&p, id);
    assert_eq!(p.guaranty_stats(id).unwrap().used_funds, q(2_000));

    l.run(
        &mut p,
        START + 4 * PERIOD + DAY,
        id,
        Command::Buyback {
            submitter: acct("keeper"),
            quote: PoolQuote {
                reserve_in: 1_000_000,
                reserve_out: 1_000_000,
                fee_bp: 30,
            },
        },
    )
    .unwrap();
    l.reconcile(&p, id);
    assert_eq!(l.balance(&goal_contract(), "rwa.swap"), 200);

    l.run(
        &mut p,
        START + 5 * PERIOD,
        id,
        Command::Unstake {
            owner: acct("bob"),
            quantity: r(40_000),
        },
    )
    .unwrap();
    l.reconcile(&p, id);
    // 320 + 320 from yield, 800 from the shortfall payout.
    assert_eq!(l.balance(&goal_contract(), "bob"), -40_000 + 1_440);
    assert_eq!(l.balance(&receipt_contract(), "bob"), 40_000);

    let maturity = p.plan(id).unwrap().return_end_time;
    l.run(
        &mut p,
        maturity,
        id,
        Command::Redeem {
            guarantor: acct("gina"),
            quantity: q(24_120),
        },
    )
    .unwrap();
    l.reconcile(&p, id);
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Completed);
    assert_eq!(p.guaranty_stats(id).unwrap().used_funds, q(10_000));

    l.run(
        &mut p,
        maturity,
        id,
        Command::Redeem {
            guarantor: acct("gus"),
            quantity: q(16_080),
        },
    )
    .unwrap();
    l.reconcile(&p, id);
    assert_eq!(l.balance(&goal_contract(), "rwa.guaranty"), 0);

    l.run(
        &mut p,
        maturity + DAY,
        id,
        Command::Unstake {
            owner: acct("alice"),
            quantity: r(60_000),
        },
    )
    .unwrap();
    l.reconcile(&p, id);
    assert!(p.book(id).unwrap().stakers.is_empty());
    assert!(l.balance(&goal_contract(), "rwa.stake") <= 1);
    assert_eq!(p.book(id).unwrap().cumulative_yield(), q(12_000));
}

#[test]
fn test_failed_plan_unwinds() {
    let (mut p, id) = setup();
    let mut l = Ledger::default();

    l.send(&mut p, START + DAY, "alice", q(30_000), &format!("invest:{id}")).unwrap();
    l.send(&mut p, START + DAY, "bob", q(10_000), &format!("invest:{id}")).unwrap();
    l.send(&mut p, START + DAY, "gina", q(5_000), &format!("guaranty:{id}")).unwrap();
    l.send(&mut p, START + 2 * DAY, "alice", r(10_000), &format!("stake:{id}")).unwrap();
    l.send(&mut p, START + 2 * DAY, "sponsor", q(50), &format!("reward:{id}")).unwrap();
    l.reconcile(&p, id);

    l.run(&mut p, END, id, Command::RefreshStatus).unwrap();
    l.reconcile(&p, id);
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Failed);
    assert_eq!(l.balance(&receipt_contract(), "alice"), 30_000);
    assert_eq!(l.balance(&goal_contract(), "alice"), -30_000 + 50);

    l.send(&mut p, END + DAY, "alice", r(30_000), &format!("refund:{id}:alice")).unwrap();
    l.reconcile(&p, id);
    l.run(
        &mut p,
        END + DAY,
        id,
        Command::Refund {
            investor: acct("bob"),
            receipts: r(10_000),
        },
    )
    .unwrap();
    l.reconcile(&p, id);
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Refunded);

    l.run(
        &mut p,
        END + DAY,
        id,
        Command::Redeem {
            guarantor: acct("gina"),
            quantity: q(5_000),
        },
    )
    .unwrap();
    l.reconcile(&p, id);

    for who in ["alice", "bob", "gina"] {
        assert_eq!(l.balance(&receipt_contract(), who), 0, "{who} receipts");
    }
    assert_eq!(l.balance(&goal_contract(), "alice"), 50);
    assert_eq!(l.balance(&goal_contract(), "bob"), 0);
    assert_eq!(l.balance(&goal_contract(), "gina"), 0);
    assert_eq!(l.balance(&goal_contract(), "rwa.core"), 0);
    assert_eq!(l.balance(&goal_contract(), "rwa.guaranty"), 0);
}

/// xorshift64, enough to vary amounts between runs of the loop.
struct Rng(u64);

impl Rng {
    fn next(&mut self, bound: i64) -> i64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 % bound as u64) as i64 + 1
    }
}

#[test]
fn test_mixed_operations_keep_books_reconciled() {
    let mut rng = Rng(0x9e37_79b9_7f4a_7c15);
    let mut params = params(100_000, 60, 110);
    params.receipt_per_unit = 3;
    let (mut p, id) = setup_with(params);
    let mut l = Ledger::default();

    let investors: Vec<String> = (0..25).map(|i| format!("inv{i:02}")).collect();
    let mut day = START + DAY;
    for who in &investors {
        let amount = rng.next(9_000);
        let _ = l.send(&mut p, day, who, q(amount), &format!("invest:{id}"));
        l.reconcile(&p, id);
        day += 600;
    }
    for i in 0..6 {
        let amount = rng.next(15_000);
        l.send(&mut p, day, &format!("gtor{i}"), q(amount), &format!("guaranty:{id}"))
            .unwrap();
        l.reconcile(&p, id);
    }
    l.send(&mut p, day, "whale", q(50_000), &format!("guaranty:{id}")).unwrap();

    l.run(&mut p, END, id, Command::RefreshStatus).unwrap();
    l.reconcile(&p, id);
    assert_eq!(p.plan(id).unwrap().status, PlanStatus::Success);

    for who in investors.iter().take(10) {
        let held = l.balance(&receipt_contract(), who);
        if held > 0 {
            let amount = rng.next(held);
            l.send(&mut p, END + DAY, who, r(amount), &format!("stake:{id}")).unwrap();
            l.reconcile(&p, id);
        }
    }

    let mut now = END + DAY;
    for period in 1..=10u32 {
        now += PERIOD;
        l.send(&mut p, now, "bank", q(rng.next(3_000)), &format!("plan:{id}")).unwrap();
        l.reconcile(&p, id);

        let _ = l.run(
            &mut p,
            now,
            id,
            Command::GuarantPay {
                submitter: acct("keeper"),
                periods: period,
            },
        );
        l.reconcile(&p, id);

        let who = &investors[rng.next(10) as usize - 1];
        let _ = l.run(&mut p, now, id, Command::Claim { owner: acct(who) });
        l.reconcile(&p, id);

        let gtor = format!("gtor{}", rng.next(6) - 1);
        let _ = l.run(
            &mut p,
            now,
            id,
            Command::Redeem {
                guarantor: acct(&gtor),
                quantity: q(rng.next(500)),
            },
        );
        l.reconcile(&p, id);
    }

    let _ = l.run(
        &mut p,
        now,
        id,
        Command::Buyback {
            submitter: acct("keeper"),
            quote: PoolQuote {
                reserve_in: 500_000,
                reserve_out: 1_500_000,
                fee_bp: 30,
            },
        },
    );
    l.reconcile(&p, id);

    let logs = p.yield_logs(id).unwrap();
    assert!(!logs.is_empty());
    invariants::assert_monotonic_cumulative(p.book(id).unwrap());
}
