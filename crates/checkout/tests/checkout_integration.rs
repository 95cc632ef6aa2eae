//! End-to-end scenarios across the coordinator, reconciler, and sweeper,
//! driven by the in-memory stores.

use checkout::{
    CheckoutCoordinator, CheckoutError, CheckoutItem, CheckoutReceipt, CheckoutRequest,
    ExpirySweeper, PaymentNotification, PaymentOutcome, PaymentReconciler, ReconcileOutcome,
    SignatureVerifier,
};
use chrono::{Duration, Utc};
use common::{CustomerId, Money, OrderId, SkuId};
use ledger::{HoldState, InMemoryStockStore, StockStore};
use orders::{InMemoryOrderStore, OrderState, OrderStore};

const SECRET: &str = "integration-test-secret";

struct Harness {
    ledger: InMemoryStockStore,
    orders: InMemoryOrderStore,
    coordinator: CheckoutCoordinator<InMemoryStockStore, InMemoryOrderStore>,
    reconciler: PaymentReconciler<InMemoryStockStore, InMemoryOrderStore>,
    sweeper: ExpirySweeper<InMemoryStockStore, InMemoryOrderStore>,
    verifier: SignatureVerifier,
}

fn harness(hold_ttl: Duration) -> Harness {
    let ledger = InMemoryStockStore::new();
    let orders = InMemoryOrderStore::new();
    let verifier = SignatureVerifier::new(SECRET);

    Harness {
        coordinator: CheckoutCoordinator::new(ledger.clone(), orders.clone(), hold_ttl),
        reconciler: PaymentReconciler::new(ledger.clone(), orders.clone(), verifier.clone()),
        sweeper: ExpirySweeper::new(ledger.clone(), orders.clone(), Duration::zero()),
        ledger,
        orders,
        verifier,
    }
}

fn item(sku: &str, quantity: u32, cents: i64) -> CheckoutItem {
    CheckoutItem {
        sku: SkuId::new(sku),
        quantity,
        unit_price: Money::from_cents(cents),
    }
}

fn request(items: Vec<CheckoutItem>) -> CheckoutRequest {
    CheckoutRequest {
        customer_id: CustomerId::new(),
        items,
    }
}

fn signed(verifier: &SignatureVerifier, order_id: OrderId, outcome: PaymentOutcome) -> PaymentNotification {
    let mut n = PaymentNotification {
        order_id,
        outcome,
        transaction_id: format!("TXN-{order_id}"),
        timestamp: Utc::now().timestamp().to_string(),
        nonce: "n-0001".to_string(),
        signature: String::new(),
    };
    n.signature = verifier.sign(&n);
    n
}

async fn checkout_one(h: &Harness, sku: &str, quantity: u32) -> CheckoutReceipt {
    h.coordinator
        .checkout(request(vec![item(sku, quantity, 1000)]))
        .await
        .unwrap()
}

#[tokio::test]
async fn checkout_creates_pending_order_with_holds() {
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();

    let receipt = checkout_one(&h, "SKU-A", 2).await;
    assert!(!receipt.payment_token.is_empty());

    let order = h.orders.get(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::PendingPayment);
    assert_eq!(order.hold_ids.len(), 1);
    assert_eq!(order.total_amount().cents(), 2000);

    let stock = h.ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    assert_eq!(stock.available, 8);
    assert_eq!(stock.reserved, 2);
}

#[tokio::test]
async fn multi_item_checkout_reserves_every_sku() {
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 5).await.unwrap();
    h.ledger.put_stock(SkuId::new("SKU-B"), 5).await.unwrap();

    // Request order is B then A; acquisition happens in ascending SKU order.
    let receipt = h
        .coordinator
        .checkout(request(vec![item("SKU-B", 1, 2500), item("SKU-A", 2, 1000)]))
        .await
        .unwrap();

    let order = h.orders.get(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.hold_ids.len(), 2);

    let holds = h.ledger.holds_for_order(receipt.order_id).await.unwrap();
    assert_eq!(holds.len(), 2);
    assert!(holds.iter().all(|hold| hold.state == HoldState::Active));
}

#[tokio::test]
async fn rejected_checkout_lists_insufficient_skus_and_leaves_no_holds() {
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 5).await.unwrap();
    h.ledger.put_stock(SkuId::new("SKU-B"), 1).await.unwrap();

    let result = h
        .coordinator
        .checkout(request(vec![item("SKU-A", 3, 1000), item("SKU-B", 2, 500)]))
        .await;

    match result {
        Err(CheckoutError::InsufficientStock { skus }) => {
            assert_eq!(skus, vec![SkuId::new("SKU-B")]);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    // Observably equivalent to "never attempted".
    let a = h.ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    let b = h.ledger.stock(&SkuId::new("SKU-B")).await.unwrap().unwrap();
    assert_eq!((a.available, a.reserved), (5, 0));
    assert_eq!((b.available, b.reserved), (1, 0));
    assert_eq!(h.ledger.hold_count(HoldState::Active).await, 0);
    assert_eq!(h.orders.order_count().await, 0);
}

#[tokio::test]
async fn rejection_lists_every_insufficient_sku() {
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 1).await.unwrap();
    // SKU-B has no stock record at all.

    let result = h
        .coordinator
        .checkout(request(vec![item("SKU-B", 1, 500), item("SKU-A", 2, 1000)]))
        .await;

    match result {
        Err(CheckoutError::InsufficientStock { skus }) => {
            assert_eq!(skus, vec![SkuId::new("SKU-A"), SkuId::new("SKU-B")]);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let h = harness(Duration::minutes(15));
    let result = h.coordinator.checkout(request(vec![])).await;
    assert!(matches!(result, Err(CheckoutError::EmptyCheckout)));
}

#[tokio::test]
async fn concurrent_checkouts_cannot_oversell() {
    // Stock 5, two concurrent requests for 3 each: exactly one succeeds.
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 5).await.unwrap();

    let c1 = CheckoutCoordinator::new(h.ledger.clone(), h.orders.clone(), Duration::minutes(15));
    let c2 = CheckoutCoordinator::new(h.ledger.clone(), h.orders.clone(), Duration::minutes(15));

    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { c1.checkout(request(vec![item("SKU-A", 3, 1000)])).await }),
        tokio::spawn(async move { c2.checkout(request(vec![item("SKU-A", 3, 1000)])).await }),
    );
    let outcomes = [r1.unwrap(), r2.unwrap()];

    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(CheckoutError::InsufficientStock { .. }))));

    let stock = h.ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    assert_eq!(stock.available, 2);
    assert_eq!(stock.reserved, 3);
}

#[tokio::test]
async fn success_callback_pays_order_and_commits_holds() {
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();
    let receipt = checkout_one(&h, "SKU-A", 2).await;

    let n = signed(&h.verifier, receipt.order_id, PaymentOutcome::Success);
    assert_eq!(h.reconciler.handle(&n).await.unwrap(), ReconcileOutcome::Applied);

    let order = h.orders.get(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Paid);
    assert!(order.paid_at.is_some());

    // Stock consumed: reserved quantity gone, available untouched.
    let stock = h.ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    assert_eq!((stock.available, stock.reserved), (8, 0));
    assert_eq!(h.ledger.hold_count(HoldState::Committed).await, 1);
}

#[tokio::test]
async fn duplicate_success_callback_is_a_noop() {
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();
    let receipt = checkout_one(&h, "SKU-A", 2).await;

    let n = signed(&h.verifier, receipt.order_id, PaymentOutcome::Success);
    assert_eq!(h.reconciler.handle(&n).await.unwrap(), ReconcileOutcome::Applied);
    assert_eq!(
        h.reconciler.handle(&n).await.unwrap(),
        ReconcileOutcome::AlreadyApplied
    );

    let stock = h.ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    assert_eq!((stock.available, stock.reserved), (8, 0));
}

#[tokio::test]
async fn failure_callback_cancels_order_and_restores_stock() {
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();
    let receipt = checkout_one(&h, "SKU-A", 4).await;

    let n = signed(&h.verifier, receipt.order_id, PaymentOutcome::Failure);
    assert_eq!(h.reconciler.handle(&n).await.unwrap(), ReconcileOutcome::Applied);

    let order = h.orders.get(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Cancelled);
    assert!(order.closed_at.is_some());

    let stock = h.ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    assert_eq!((stock.available, stock.reserved), (10, 0));
}

#[tokio::test]
async fn cancel_after_paid_is_rejected_as_already_finalized() {
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();
    let receipt = checkout_one(&h, "SKU-A", 1).await;

    let success = signed(&h.verifier, receipt.order_id, PaymentOutcome::Success);
    h.reconciler.handle(&success).await.unwrap();

    let cancel = signed(&h.verifier, receipt.order_id, PaymentOutcome::Cancel);
    let result = h.reconciler.handle(&cancel).await;
    assert!(matches!(
        result,
        Err(CheckoutError::AlreadyFinalized {
            state: OrderState::Paid,
            ..
        })
    ));

    // The already-paid state wins.
    let order = h.orders.get(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Paid);
}

#[tokio::test]
async fn forged_callback_is_rejected_before_any_state_change() {
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();
    let receipt = checkout_one(&h, "SKU-A", 1).await;

    let forger = SignatureVerifier::new("attacker-secret");
    let n = signed(&forger, receipt.order_id, PaymentOutcome::Success);

    let result = h.reconciler.handle(&n).await;
    assert!(matches!(result, Err(CheckoutError::InvalidSignature)));

    let order = h.orders.get(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::PendingPayment);
}

#[tokio::test]
async fn callback_for_unknown_order_fails() {
    let h = harness(Duration::minutes(15));
    let n = signed(&h.verifier, OrderId::new(), PaymentOutcome::Success);
    let result = h.reconciler.handle(&n).await;
    assert!(matches!(result, Err(CheckoutError::OrderNotFound(_))));
}

#[tokio::test]
async fn sweeper_expires_unpaid_order_and_restores_stock() {
    // Holds born already expired stand in for elapsed wall-clock time.
    let h = harness(Duration::seconds(-1));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();
    let receipt = checkout_one(&h, "SKU-A", 3).await;

    let report = h.sweeper.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.expired_orders, 1);
    assert_eq!(report.released_holds, 1);

    let order = h.orders.get(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Expired);

    let stock = h.ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    assert_eq!((stock.available, stock.reserved), (10, 0));
}

#[tokio::test]
async fn sweeper_ignores_live_holds() {
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();
    let receipt = checkout_one(&h, "SKU-A", 3).await;

    let report = h.sweeper.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report, checkout::SweepReport::default());

    let order = h.orders.get(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::PendingPayment);
}

#[tokio::test]
async fn payment_beats_sweeper_single_terminal_state() {
    let h = harness(Duration::seconds(-1));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();
    let receipt = checkout_one(&h, "SKU-A", 2).await;

    // Payment lands first; the committed holds leave nothing for the sweeper.
    let n = signed(&h.verifier, receipt.order_id, PaymentOutcome::Success);
    h.reconciler.handle(&n).await.unwrap();

    let report = h.sweeper.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.expired_orders, 0);

    let order = h.orders.get(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Paid);
    let stock = h.ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    assert_eq!((stock.available, stock.reserved), (8, 0));
}

#[tokio::test]
async fn sweeper_repairs_holds_of_terminal_orders() {
    // Simulate a crash between the Paid transition and the hold commit.
    let h = harness(Duration::seconds(-1));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();
    let receipt = checkout_one(&h, "SKU-A", 2).await;

    h.orders
        .transition(
            receipt.order_id,
            OrderState::PendingPayment,
            OrderState::Paid,
            Utc::now(),
        )
        .await
        .unwrap();

    let report = h.sweeper.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.repaired_holds, 1);
    assert_eq!(h.ledger.hold_count(HoldState::Committed).await, 1);

    let stock = h.ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    assert_eq!((stock.available, stock.reserved), (8, 0));
}

#[tokio::test]
async fn duplicate_callback_repairs_uncommitted_holds() {
    // Same crash shape, repaired by the provider's redelivery instead.
    let h = harness(Duration::minutes(15));
    h.ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();
    let receipt = checkout_one(&h, "SKU-A", 2).await;

    h.orders
        .transition(
            receipt.order_id,
            OrderState::PendingPayment,
            OrderState::Paid,
            Utc::now(),
        )
        .await
        .unwrap();

    let n = signed(&h.verifier, receipt.order_id, PaymentOutcome::Success);
    assert_eq!(
        h.reconciler.handle(&n).await.unwrap(),
        ReconcileOutcome::AlreadyApplied
    );
    assert_eq!(h.ledger.hold_count(HoldState::Committed).await, 1);
}

#[tokio::test]
async fn orphaned_holds_are_released_after_grace() {
    let ledger = InMemoryStockStore::new();
    let orders = InMemoryOrderStore::new();
    ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();

    // A hold whose order was never persisted (crash mid-checkout).
    ledger
        .reserve(&SkuId::new("SKU-A"), 2, OrderId::new(), Duration::seconds(-120))
        .await
        .unwrap();

    let sweeper = ExpirySweeper::new(ledger.clone(), orders.clone(), Duration::seconds(60));

    let report = sweeper.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.released_holds, 1);

    let stock = ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    assert_eq!((stock.available, stock.reserved), (10, 0));
}

#[tokio::test]
async fn orphaned_holds_survive_until_grace_elapses() {
    let ledger = InMemoryStockStore::new();
    let orders = InMemoryOrderStore::new();
    ledger.put_stock(SkuId::new("SKU-A"), 10).await.unwrap();

    ledger
        .reserve(&SkuId::new("SKU-A"), 2, OrderId::new(), Duration::seconds(-10))
        .await
        .unwrap();

    let sweeper = ExpirySweeper::new(ledger.clone(), orders.clone(), Duration::minutes(5));

    let report = sweeper.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.released_holds, 0);

    let stock = ledger.stock(&SkuId::new("SKU-A")).await.unwrap().unwrap();
    assert_eq!(stock.reserved, 2);
}

#[tokio::test]
async fn sweeper_run_stops_on_shutdown_signal() {
    let h = harness(Duration::minutes(15));
    let sweeper = ExpirySweeper::new(h.ledger.clone(), h.orders.clone(), Duration::zero());

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move {
        sweeper.run(std::time::Duration::from_millis(5), rx).await;
    });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("sweeper did not shut down")
        .unwrap();
}
