//! Trade lifecycle tests against the in-memory store

mod common;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use barterly_server::listing::ListingStatus;
    use barterly_server::trade::{
        NegotiationEngine, NegotiationError, ProposeTradeRequest, TradeSide, TradeStatus,
    };
    use uuid::Uuid;

    use crate::common::TestStore;

    fn engine(ts: &TestStore) -> NegotiationEngine {
        NegotiationEngine::new(
            ts.store.trades.clone(),
            ts.store.listings.clone(),
            ts.store.profiles.clone(),
        )
    }

    #[tokio::test]
    async fn test_accept_completes_trade_and_consumes_listings() {
        let ts = TestStore::new();
        let engine = engine(&ts);
        let (alice, _) = ts.user("alice").await;
        let (bob, _) = ts.user("bob").await;
        let lamp = ts.listing(&alice, "Lamp").await;
        let chair = ts.listing(&bob, "Chair").await;

        let trade = engine
            .propose(
                &alice,
                ProposeTradeRequest {
                    receiver_id: bob.user_id(),
                    requester_items: vec![lamp.id],
                    receiver_items: vec![chair.id],
                },
            )
            .await
            .unwrap();
        assert_eq!(trade.status, TradeStatus::Pending);

        let accepted = engine.accept(&bob, trade.id).await.unwrap();
        assert_eq!(accepted.status, TradeStatus::Completed);
        assert!(accepted.updated_at >= trade.updated_at);

        for id in [lamp.id, chair.id] {
            let listing = ts.store.listings.get_listing(id).await.unwrap();
            assert_eq!(listing.listing.status, ListingStatus::Traded);
        }
        for user in [&alice, &bob] {
            let profile = ts.store.profiles.get_profile(user.user_id()).await.unwrap();
            assert_eq!(profile.trades_completed, 1);
            assert_eq!(profile.reputation_score, 0.0);
        }
    }

    #[tokio::test]
    async fn test_terminal_trades_cannot_change() {
        let ts = TestStore::new();
        let engine = engine(&ts);
        let (alice, _) = ts.user("alice").await;
        let (bob, _) = ts.user("bob").await;

        // Accepted, then rejected
        let lamp = ts.listing(&alice, "Lamp").await;
        let chair = ts.listing(&bob, "Chair").await;
        let accepted = engine
            .propose(
                &alice,
                ProposeTradeRequest {
                    receiver_id: bob.user_id(),
                    requester_items: vec![lamp.id],
                    receiver_items: vec![chair.id],
                },
            )
            .await
            .unwrap();
        engine.accept(&bob, accepted.id).await.unwrap();
        let err = engine.reject(&bob, accepted.id).await.unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidTransition(_)));

        // Rejected, then accepted
        let vase = ts.listing(&alice, "Vase").await;
        let rug = ts.listing(&bob, "Rug").await;
        let rejected = engine
            .propose(
                &alice,
                ProposeTradeRequest {
                    receiver_id: bob.user_id(),
                    requester_items: vec![vase.id],
                    receiver_items: vec![rug.id],
                },
            )
            .await
            .unwrap();
        engine.reject(&bob, rejected.id).await.unwrap();
        let err = engine.accept(&bob, rejected.id).await.unwrap_err();
        assert!(matches!(err, NegotiationError::InvalidTransition(_)));

        let stored = ts.store.trades.get_trade(rejected.id).await.unwrap();
        assert_eq!(stored.status, TradeStatus::Rejected);
        // Rejecting leaves the listings on the market
        let vase = ts.store.listings.get_listing(vase.id).await.unwrap();
        assert!(vase.listing.is_available());
    }

    #[tokio::test]
    async fn test_only_receiver_can_respond() {
        let ts = TestStore::new();
        let engine = engine(&ts);
        let (alice, _) = ts.user("alice").await;
        let (bob, _) = ts.user("bob").await;
        let (carol, _) = ts.user("carol").await;
        let lamp = ts.listing(&alice, "Lamp").await;
        let chair = ts.listing(&bob, "Chair").await;

        let trade = engine
            .propose(
                &alice,
                ProposeTradeRequest {
                    receiver_id: bob.user_id(),
                    requester_items: vec![lamp.id],
                    receiver_items: vec![chair.id],
                },
            )
            .await
            .unwrap();

        for outsider in [&alice, &carol] {
            let err = engine.accept(outsider, trade.id).await.unwrap_err();
            assert!(matches!(err, NegotiationError::Forbidden(_)));
            let err = engine.reject(outsider, trade.id).await.unwrap_err();
            assert!(matches!(err, NegotiationError::Forbidden(_)));
        }

        let err = engine.view(&carol, trade.id).await.unwrap_err();
        assert!(matches!(err, NegotiationError::Forbidden(_)));

        let stored = ts.store.trades.get_trade(trade.id).await.unwrap();
        assert_eq!(stored.status, TradeStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_accepts_resolve_once() {
        let ts = TestStore::new();
        let engine = engine(&ts);
        let (alice, _) = ts.user("alice").await;
        let (bob, _) = ts.user("bob").await;
        let lamp = ts.listing(&alice, "Lamp").await;
        let chair = ts.listing(&bob, "Chair").await;
        let trade = engine
            .propose(
                &alice,
                ProposeTradeRequest {
                    receiver_id: bob.user_id(),
                    requester_items: vec![lamp.id],
                    receiver_items: vec![chair.id],
                },
            )
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            engine.accept(&bob, trade.id),
            engine.accept(&bob, trade.id)
        );
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(NegotiationError::InvalidTransition(_)))));

        // Counters moved exactly once
        let profile = ts.store.profiles.get_profile(alice.user_id()).await.unwrap();
        assert_eq!(profile.trades_completed, 1);
    }

    #[tokio::test]
    async fn test_competing_proposals_over_one_listing() {
        let ts = TestStore::new();
        let engine = engine(&ts);
        let (alice, _) = ts.user("alice").await;
        let (bob, _) = ts.user("bob").await;
        let (carol, _) = ts.user("carol").await;
        let chair = ts.listing(&bob, "Chair").await;
        let lamp = ts.listing(&alice, "Lamp").await;
        let vase = ts.listing(&carol, "Vase").await;

        // Both may be pending at once
        let from_alice = engine
            .propose(
                &alice,
                ProposeTradeRequest {
                    receiver_id: bob.user_id(),
                    requester_items: vec![lamp.id],
                    receiver_items: vec![chair.id],
                },
            )
            .await
            .unwrap();
        let from_carol = engine
            .propose(
                &carol,
                ProposeTradeRequest {
                    receiver_id: bob.user_id(),
                    requester_items: vec![vase.id],
                    receiver_items: vec![chair.id],
                },
            )
            .await
            .unwrap();

        engine.accept(&bob, from_alice.id).await.unwrap();

        // The chair is gone, so the second trade cannot complete
        let err = engine.accept(&bob, from_carol.id).await.unwrap_err();
        assert!(matches!(err, NegotiationError::Conflict(_)));
        let stored = ts.store.trades.get_trade(from_carol.id).await.unwrap();
        assert_eq!(stored.status, TradeStatus::Pending);
        let vase = ts.store.listings.get_listing(vase.id).await.unwrap();
        assert!(vase.listing.is_available());

        // It can still be rejected
        let rejected = engine.reject(&bob, from_carol.id).await.unwrap();
        assert_eq!(rejected.status, TradeStatus::Rejected);
    }

    #[tokio::test]
    async fn test_propose_validation() {
        let ts = TestStore::new();
        let engine = engine(&ts);
        let (alice, _) = ts.user("alice").await;
        let (bob, _) = ts.user("bob").await;
        let lamp = ts.listing(&alice, "Lamp").await;
        let chair = ts.listing(&bob, "Chair").await;

        let cases = [
            (bob.user_id(), vec![], vec![chair.id]),
            (bob.user_id(), vec![lamp.id], vec![]),
            (alice.user_id(), vec![lamp.id], vec![chair.id]),
            // Offering an item the requester does not own
            (bob.user_id(), vec![chair.id], vec![chair.id]),
            (bob.user_id(), vec![Uuid::new_v4()], vec![chair.id]),
            (bob.user_id(), vec![lamp.id], vec![lamp.id]),
        ];
        for (receiver_id, requester_items, receiver_items) in cases {
            let err = engine
                .propose(
                    &alice,
                    ProposeTradeRequest {
                        receiver_id,
                        requester_items,
                        receiver_items,
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, NegotiationError::Validation(_)), "{:?}", err);
        }

        ts.memory
            .set_listing_status_silently(chair.id, ListingStatus::Traded)
            .await
            .unwrap();
        let err = engine
            .propose(
                &alice,
                ProposeTradeRequest {
                    receiver_id: bob.user_id(),
                    requester_items: vec![lamp.id],
                    receiver_items: vec![chair.id],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_inbox_and_details() {
        let ts = TestStore::new();
        let engine = engine(&ts);
        let (alice, _) = ts.user("alice").await;
        let (bob, _) = ts.user("bob").await;
        let lamp = ts.listing(&alice, "Lamp").await;
        let vase = ts.listing(&alice, "Vase").await;
        let chair = ts.listing(&bob, "Chair").await;

        let older = engine
            .propose(
                &alice,
                ProposeTradeRequest {
                    receiver_id: bob.user_id(),
                    requester_items: vec![lamp.id],
                    receiver_items: vec![chair.id],
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let newer = engine
            .propose(
                &alice,
                ProposeTradeRequest {
                    receiver_id: bob.user_id(),
                    requester_items: vec![vase.id, vase.id],
                    receiver_items: vec![chair.id],
                },
            )
            .await
            .unwrap();
        assert_eq!(newer.requester_items, vec![vase.id]);

        let received = engine.list(&bob, TradeSide::Received).await.unwrap();
        let ids: Vec<Uuid> = received.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert_eq!(received[0].requester.username.as_deref(), Some("alice"));
        assert_eq!(received[0].requester.items[0].title, "Vase");
        assert_eq!(received[0].receiver.items[0].title, "Chair");

        assert!(engine.list(&bob, TradeSide::Sent).await.unwrap().is_empty());
        assert_eq!(engine.list(&alice, TradeSide::Sent).await.unwrap().len(), 2);

        let details = engine.view(&bob, older.id).await.unwrap();
        assert_eq!(details.trader_id, alice.user_id());
        assert_eq!(details.trader_name.as_deref(), Some("alice"));

        let err = engine.view(&bob, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, NegotiationError::NotFound(_)));
    }
}
