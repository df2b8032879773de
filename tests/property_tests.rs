//! Property-based tests for the ledger arithmetic and the transition table.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use stateset_repair::{
    entities::{part_line_item, payment},
    models::{
        money::{from_cents, round_money, to_cents},
        AddonList, AddonService, PaymentKind, ServiceKind, ServiceOrderStatus,
    },
    services::{ledger::Ledger, order_status::is_valid_transition},
};
use uuid::Uuid;

fn cents_strategy() -> impl Strategy<Value = i64> {
    0i64..5_000_000
}

fn line(cents: i64, quantity: i32) -> part_line_item::Model {
    part_line_item::Model {
        id: Uuid::new_v4(),
        service_order_id: Uuid::nil(),
        product_id: Uuid::new_v4(),
        quantity,
        unit_price_cents: cents,
        subtotal_cents: cents * i64::from(quantity),
        restored_at: None,
        created_at: Utc::now(),
    }
}

fn pay(kind: PaymentKind, cents: i64) -> payment::Model {
    payment::Model {
        id: Uuid::new_v4(),
        service_order_id: Uuid::nil(),
        kind,
        amount_cents: cents,
        method: "cash".to_string(),
        idempotency_key: None,
        recorded_by: Uuid::nil(),
        recorded_at: Utc::now(),
    }
}

fn status_strategy() -> impl Strategy<Value = ServiceOrderStatus> {
    prop_oneof![
        Just(ServiceOrderStatus::Received),
        Just(ServiceOrderStatus::Diagnosing),
        Just(ServiceOrderStatus::InRepair),
        Just(ServiceOrderStatus::InHomeVisit),
        Just(ServiceOrderStatus::Repaired),
        Just(ServiceOrderStatus::Delivered),
        Just(ServiceOrderStatus::Cancelled),
    ]
}

fn kind_strategy() -> impl Strategy<Value = ServiceKind> {
    prop_oneof![
        Just(ServiceKind::Workshop),
        Just(ServiceKind::HomeVisit),
        Just(ServiceKind::Express),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn balance_is_exactly_total_minus_paid(
        service in cents_strategy(),
        parts in prop::collection::vec((cents_strategy(), 1i32..5), 0..6),
        addons in prop::collection::vec(cents_strategy(), 0..4),
        payments in prop::collection::vec(0i64..100_000, 0..6),
    ) {
        let lines: Vec<_> = parts.iter().map(|(c, q)| line(*c, *q)).collect();
        let addon_list = AddonList(
            addons
                .iter()
                .map(|c| AddonService { name: "extra".to_string(), price: from_cents(*c) })
                .collect(),
        );
        let rows: Vec<_> = payments.iter().map(|c| pay(PaymentKind::Payment, *c)).collect();

        let ledger = Ledger::derive(from_cents(service), &addon_list, &lines, &[], &rows);

        let expected_total = service
            + lines.iter().map(|l| l.subtotal_cents).sum::<i64>()
            + addons.iter().sum::<i64>();
        prop_assert_eq!(to_cents(ledger.total).unwrap(), expected_total);
        prop_assert_eq!(ledger.balance, ledger.total - ledger.paid);
        prop_assert_eq!(to_cents(ledger.paid).unwrap(), payments.iter().sum::<i64>());
    }

    #[test]
    fn accepted_payments_never_overshoot(service in 1i64..1_000_000, attempt in 1i64..2_000_000) {
        let ledger = Ledger::derive(from_cents(service), &AddonList::default(), &[], &[], &[]);
        match ledger.check_payment(from_cents(attempt)) {
            Ok(amount) => prop_assert!(amount <= ledger.balance),
            Err(_) => prop_assert!(attempt > service),
        }
    }

    #[test]
    fn refunds_are_capped_by_net_paid(
        advance in 0i64..100_000,
        refunded in 0i64..100_000,
        attempt in 1i64..300_000,
    ) {
        prop_assume!(refunded <= advance);
        let rows = vec![pay(PaymentKind::Advance, advance), pay(PaymentKind::Refund, refunded)];
        let ledger = Ledger::derive(Decimal::ZERO, &AddonList::default(), &[], &[], &rows);
        prop_assert_eq!(to_cents(ledger.paid).unwrap(), advance - refunded);
        let ok = ledger.check_refund(from_cents(attempt)).is_ok();
        prop_assert_eq!(ok, attempt <= advance - refunded);
    }

    #[test]
    fn rounding_is_idempotent(units in -1_000_000_000i64..1_000_000_000, scale in 0u32..6) {
        let amount = Decimal::new(units, scale);
        let once = round_money(amount);
        prop_assert_eq!(round_money(once), once);
        prop_assert!(once.scale() <= 2);
    }

    #[test]
    fn terminal_states_have_no_exits(
        kind in kind_strategy(),
        from in prop_oneof![Just(ServiceOrderStatus::Delivered), Just(ServiceOrderStatus::Cancelled)],
        to in status_strategy(),
    ) {
        prop_assert!(!is_valid_transition(kind, from, to));
    }

    #[test]
    fn delivery_only_follows_repair(kind in kind_strategy(), from in status_strategy()) {
        prop_assert_eq!(
            is_valid_transition(kind, from, ServiceOrderStatus::Delivered),
            from == ServiceOrderStatus::Repaired
        );
    }
}
