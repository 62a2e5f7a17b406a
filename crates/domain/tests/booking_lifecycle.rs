//! Booking lifecycle against the in-memory event store.
//!
//! Covers creation with calendar holds, supplier and traveler transitions,
//! payment-driven confirmation, and concurrent reservations of the same nights.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use common::{AccommodationId, AggregateId, UserId};
use domain::booking::{InMemoryNotifier, Notification, PaymentMethod};
use domain::pricing::{RefundPolicyTable, RefundRule};
use domain::{
    AccommodationSnapshot, Actor, Aggregate, AvailabilityBroadcaster, BookingLifecycleManager,
    BookingStatus, CalendarOverride, CancellationPolicyTier, Clock, Currency, DomainError,
    ErrorKind, GuestCount, InMemoryCatalog, Money, PaymentStatus, PricingEngine,
    ReservationRequest, StayError,
};
use event_store::InMemoryEventStore;
use rust_decimal_macros::dec;

fn usd(amount: rust_decimal::Decimal) -> Money {
    Money::new(amount, Currency::USD)
}

fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2027, month, day).unwrap()
}

/// 1 March 2027, noon.
fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2027, 3, 1, 12, 0, 0).unwrap()
}

struct Harness {
    manager: BookingLifecycleManager<InMemoryEventStore>,
    catalog: InMemoryCatalog,
    notifier: InMemoryNotifier,
    listing: AccommodationSnapshot,
    traveler: UserId,
}

impl Harness {
    async fn new(policy: CancellationPolicyTier) -> Self {
        let catalog = InMemoryCatalog::new();
        let notifier = InMemoryNotifier::new();
        let listing = AccommodationSnapshot {
            id: AccommodationId::new(),
            supplier_id: UserId::new(),
            title: "Harbour loft".to_string(),
            approved: true,
            nightly_price: usd(dec!(100)),
            max_guests: 4,
            min_nights: 1,
            max_nights: Some(14),
            cancellation_policy: policy,
            payout_account: Some("acct_supplier".to_string()),
        };
        catalog.upsert(listing.clone()).await;

        let clock: Clock = Arc::new(fixed_now);
        let manager = BookingLifecycleManager::new(
            InMemoryEventStore::new(),
            Arc::new(catalog.clone()),
            Arc::new(notifier.clone()),
        )
        .with_clock(clock);

        Self {
            manager,
            catalog,
            notifier,
            listing,
            traveler: UserId::new(),
        }
    }

    fn request(&self, check_in: NaiveDate, check_out: NaiveDate) -> ReservationRequest {
        ReservationRequest::new(
            self.traveler,
            self.listing.id,
            check_in,
            check_out,
            GuestCount::adults(2),
        )
    }

    async fn book(&self, check_in: NaiveDate, check_out: NaiveDate) -> AggregateId {
        let booking = self
            .manager
            .create(self.request(check_in, check_out))
            .await
            .unwrap();
        booking.id().unwrap()
    }
}

mod creation {
    use super::*;

    #[tokio::test]
    async fn prices_and_holds_the_stay() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;

        let booking = h
            .manager
            .create(h.request(date(3, 11), date(3, 14)))
            .await
            .unwrap();

        assert_eq!(booking.status(), BookingStatus::Pending);
        let price = booking.price().unwrap();
        assert_eq!(price.total_base_price, usd(dec!(300)));
        assert_eq!(price.service_fee, usd(dec!(30)));
        assert_eq!(price.cleaning_fee, usd(dec!(30)));
        assert_eq!(price.tax_amount, usd(dec!(26.40)));
        assert_eq!(price.total_price, usd(dec!(386.40)));

        let payment = booking.payment().unwrap();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert_eq!(payment.amount(), usd(dec!(386.40)));

        let calendar = h.manager.availability().load_calendar(h.listing.id).await.unwrap();
        assert_eq!(calendar.hold_count(), 1);
        assert!(calendar.hold_for(booking.id().unwrap()).is_some());

        let sent = h.notifier.sent().await;
        assert!(matches!(sent.as_slice(), [Notification::BookingRequested { .. }]));
    }

    #[tokio::test]
    async fn overlapping_request_conflicts() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        h.book(date(3, 11), date(3, 14)).await;

        let err = h
            .manager
            .create(h.request(date(3, 13), date(3, 15)))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn adjacent_stays_do_not_conflict() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        h.book(date(3, 11), date(3, 14)).await;

        let second = h.manager.create(h.request(date(3, 14), date(3, 16))).await;

        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn blocked_date_is_unavailable() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        h.catalog
            .set_override(h.listing.id, CalendarOverride::blocked(date(3, 12)))
            .await;

        let err = h
            .manager
            .create(h.request(date(3, 11), date(3, 14)))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn repeated_booking_id_is_rejected() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        let booking_id = AggregateId::new();
        let request = h.request(date(3, 11), date(3, 14)).with_booking_id(booking_id);

        h.manager.create(request.clone()).await.unwrap();
        let err = h.manager.create(request).await.unwrap_err();

        assert!(matches!(
            err,
            DomainError::Booking(domain::BookingError::AlreadyCreated)
        ));
    }

    #[tokio::test]
    async fn listing_rules_are_enforced() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;

        let too_long = h.manager.create(h.request(date(3, 1), date(3, 20))).await;
        assert_eq!(too_long.unwrap_err().kind(), ErrorKind::Validation);

        let crowd = ReservationRequest::new(
            h.traveler,
            h.listing.id,
            date(3, 11),
            date(3, 12),
            GuestCount::adults(5),
        );
        assert_eq!(
            h.manager.create(crowd).await.unwrap_err().kind(),
            ErrorKind::Validation
        );

        let unknown = ReservationRequest::new(
            h.traveler,
            AccommodationId::new(),
            date(3, 11),
            date(3, 12),
            GuestCount::adults(1),
        );
        assert_eq!(
            h.manager.create(unknown).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        // nothing was held along the way
        let calendar = h.manager.availability().load_calendar(h.listing.id).await.unwrap();
        assert_eq!(calendar.hold_count(), 0);
    }

    #[tokio::test]
    async fn check_in_before_today_is_rejected() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;

        let err = h
            .manager
            .create(h.request(date(2, 27), date(3, 2)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(matches!(
            err,
            DomainError::Stay(StayError::CheckInInPast { check_in }) if check_in == date(2, 27)
        ));

        // the manager's clock says 1 March
        assert!(h.manager.create(h.request(date(3, 1), date(3, 2))).await.is_ok());
    }

    #[tokio::test]
    async fn absolute_limits_apply_to_open_ended_listings() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        let mut open = h.listing.clone();
        open.id = AccommodationId::new();
        open.max_nights = None;
        open.max_guests = u32::MAX;
        h.catalog.upsert(open.clone()).await;

        let two_years = ReservationRequest::new(
            h.traveler,
            open.id,
            date(3, 10),
            NaiveDate::from_ymd_opt(2029, 3, 10).unwrap(),
            GuestCount::adults(1),
        );
        assert!(matches!(
            h.manager.create(two_years).await.unwrap_err(),
            DomainError::Stay(StayError::TooManyNights { max: 365, .. })
        ));

        let overflow = ReservationRequest::new(
            h.traveler,
            open.id,
            date(3, 10),
            date(3, 12),
            GuestCount::new(u32::MAX, 1, 0),
        )
        .with_declared_total(0);
        let err = h.manager.create(overflow).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(matches!(err, DomainError::Stay(StayError::TooManyGuests { .. })));

        let calendar = h.manager.availability().load_calendar(open.id).await.unwrap();
        assert_eq!(calendar.hold_count(), 0);
    }

    #[tokio::test]
    async fn notification_failure_keeps_the_booking() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        h.notifier.set_failing(true);

        let id = h.book(date(3, 11), date(3, 14)).await;

        let stored = h.manager.get_booking(id).await.unwrap().unwrap();
        assert_eq!(stored.status(), BookingStatus::Pending);
        assert!(h.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn broadcasts_held_nights() {
        let mut h = Harness::new(CancellationPolicyTier::Moderate).await;
        let live = AvailabilityBroadcaster::new(8);
        let mut changes = live.subscribe();
        h.manager = h.manager.with_broadcaster(live);

        let id = h.book(date(3, 11), date(3, 14)).await;

        let change = changes.recv().await.unwrap();
        assert_eq!(change.booking_id, id);
        assert_eq!(change.accommodation_id, h.listing.id);
        assert!(!change.available);
    }
}

mod transitions {
    use super::*;

    #[tokio::test]
    async fn supplier_confirms() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        let id = h.book(date(3, 11), date(3, 14)).await;

        let booking = h.manager.confirm(id, h.listing.supplier_id).await.unwrap();

        assert_eq!(booking.status(), BookingStatus::Confirmed);
        assert_eq!(booking.confirmed_at(), Some(fixed_now()));
        assert!(
            h.notifier
                .sent()
                .await
                .iter()
                .any(|n| matches!(n, Notification::BookingConfirmed { .. }))
        );
    }

    #[tokio::test]
    async fn only_the_supplier_confirms() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        let id = h.book(date(3, 11), date(3, 14)).await;

        let err = h.manager.confirm(id, h.traveler).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn unknown_booking_is_not_found() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;

        let err = h
            .manager
            .confirm(AggregateId::new(), h.listing.supplier_id)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn reject_needs_a_reason_and_frees_the_nights() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        let id = h.book(date(3, 11), date(3, 14)).await;

        let err = h.manager.reject(id, h.listing.supplier_id, "  ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let booking = h
            .manager
            .reject(id, h.listing.supplier_id, "maintenance")
            .await
            .unwrap();
        assert_eq!(booking.status(), BookingStatus::Rejected);
        assert_eq!(booking.rejection_reason(), Some("maintenance"));
        assert_eq!(booking.payment().unwrap().status(), PaymentStatus::Voided);

        // the same nights can be booked again
        assert!(h.manager.create(h.request(date(3, 11), date(3, 14))).await.is_ok());
    }

    #[tokio::test]
    async fn unpaid_cancellation_voids_the_payment() {
        let h = Harness::new(CancellationPolicyTier::Flexible).await;
        let id = h.book(date(3, 11), date(3, 14)).await;

        let booking = h
            .manager
            .cancel(id, Actor::Traveler(h.traveler), Some("plans changed".to_string()))
            .await
            .unwrap();

        assert_eq!(booking.status(), BookingStatus::Cancelled);
        let payment = booking.payment().unwrap();
        assert_eq!(payment.status(), PaymentStatus::Voided);
        assert!(payment.pending_refund().is_none());

        let calendar = h.manager.availability().load_calendar(h.listing.id).await.unwrap();
        assert_eq!(calendar.hold_count(), 0);
    }

    #[tokio::test]
    async fn paid_cancellation_ten_days_out_refunds_in_full() {
        let h = Harness::new(CancellationPolicyTier::Flexible).await;
        let id = h.book(date(3, 11), date(3, 14)).await;

        let paid = h
            .manager
            .record_payment_succeeded(id, "pi_1", "ch_1".to_string(), Some("evt_1".to_string()))
            .await
            .unwrap();
        assert_eq!(paid.aggregate.status(), BookingStatus::Confirmed);
        assert_eq!(paid.aggregate.payment().unwrap().status(), PaymentStatus::Completed);

        let booking = h
            .manager
            .cancel(id, Actor::Traveler(h.traveler), None)
            .await
            .unwrap();

        assert_eq!(booking.status(), BookingStatus::Cancelled);
        assert_eq!(booking.cancellation().unwrap().refund_amount, usd(dec!(386.40)));
        let payment = booking.payment().unwrap();
        assert_eq!(payment.status(), PaymentStatus::RefundRequested);
        assert_eq!(payment.pending_refund().unwrap().amount, usd(dec!(386.40)));

        let pending = h.manager.bookings_with_pending_refunds().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id(), Some(id));
    }

    #[tokio::test]
    async fn strict_policy_refunds_nothing_inside_a_week() {
        let h = Harness::new(CancellationPolicyTier::Strict).await;
        let id = h.book(date(3, 4), date(3, 6)).await;
        h.manager
            .record_payment_succeeded(id, "pi_1", "ch_1".to_string(), None)
            .await
            .unwrap();

        let booking = h
            .manager
            .cancel(id, Actor::Traveler(h.traveler), None)
            .await
            .unwrap();

        assert!(booking.cancellation().unwrap().refund_amount.is_zero());
        assert!(booking.payment().unwrap().pending_refund().is_none());
    }

    #[tokio::test]
    async fn custom_refund_table_replaces_a_tier() {
        let table = RefundPolicyTable::standard()
            .with_tier(CancellationPolicyTier::Strict, vec![RefundRule::new(1, dec!(25))])
            .unwrap();
        let mut h = Harness::new(CancellationPolicyTier::Strict).await;
        h.manager = h.manager.with_pricing(PricingEngine::new(table));

        let request = h
            .request(date(3, 4), date(3, 6))
            .with_payment_method(PaymentMethod::Paypal);
        let id = h.manager.create(request).await.unwrap().id().unwrap();
        let paid = h
            .manager
            .record_payment_succeeded(id, "pi_1", "ch_1".to_string(), None)
            .await
            .unwrap();
        assert_eq!(paid.aggregate.payment().unwrap().method(), PaymentMethod::Paypal);

        let booking = h
            .manager
            .cancel(id, Actor::Traveler(h.traveler), None)
            .await
            .unwrap();

        // 2 nights at $100: 200 + 20 + 20 + 17.60 = 257.60, a quarter back
        assert_eq!(booking.cancellation().unwrap().refund_amount, usd(dec!(64.40)));
    }

    #[tokio::test]
    async fn completed_booking_is_final() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        let id = h.book(date(3, 11), date(3, 14)).await;
        h.manager.confirm(id, h.listing.supplier_id).await.unwrap();

        let booking = h
            .manager
            .complete(id, Actor::Supplier(h.listing.supplier_id))
            .await
            .unwrap();
        assert_eq!(booking.status(), BookingStatus::Completed);

        let err = h
            .manager
            .cancel(id, Actor::Traveler(h.traveler), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn lookup_by_payment_intent() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        let id = h.book(date(3, 11), date(3, 14)).await;
        h.manager
            .attach_payment_intent(id, "pi_123".to_string(), format!("intent-{id}-1"), None)
            .await
            .unwrap();

        let found = h.manager.find_by_payment_intent("pi_123").await.unwrap();
        assert_eq!(found.and_then(|b| b.id()), Some(id));
        assert!(h.manager.find_by_payment_intent("pi_other").await.unwrap().is_none());
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_of_two_overlapping_requests_wins() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        let first = h.request(date(3, 11), date(3, 14));
        let second = ReservationRequest::new(
            UserId::new(),
            h.listing.id,
            date(3, 12),
            date(3, 15),
            GuestCount::adults(1),
        );

        let manager = Arc::new(h.manager);
        let a = tokio::spawn({
            let manager = manager.clone();
            async move { manager.create(first).await }
        });
        let b = tokio::spawn({
            let manager = manager.clone();
            async move { manager.create(second).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].status(), BookingStatus::Pending);

        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.kind(), ErrorKind::Conflict);

        let calendar = manager.availability().load_calendar(h.listing.id).await.unwrap();
        assert_eq!(calendar.hold_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_disjoint_requests_all_succeed() {
        let h = Harness::new(CancellationPolicyTier::Moderate).await;
        let requests: Vec<_> = (0..4u32)
            .map(|i| h.request(date(4, 1 + i * 2), date(4, 3 + i * 2)))
            .collect();

        let manager = Arc::new(h.manager);
        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.create(request).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        let calendar = manager.availability().load_calendar(h.listing.id).await.unwrap();
        assert_eq!(calendar.hold_count(), 4);
    }
}
