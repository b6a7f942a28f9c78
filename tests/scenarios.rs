mod common;

use anyhow::Context;
use book_trade::api::{AUTH_REQUIRED, Session};
use book_trade::error::ServiceError;
use book_trade::model::User;
use book_trade::notify::{Delivery, Event};
use book_trade::service::NewTrade;
use book_trade::store::EntityStore;
use book_trade::trade::TradeStatus;
use common::World;
use serde_json::json;

fn username(session: &Session) -> &str {
    session.username.as_deref().unwrap_or_default()
}

fn offer(list_book: &str, offer_books: &[&str]) -> NewTrade {
    NewTrade {
        list_book: list_book.to_string(),
        offer_books: offer_books.iter().map(|id| id.to_string()).collect(),
        description: Some("swap?".to_string()),
    }
}

#[tokio::test]
async fn list_offer_accept_message_cancel() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;
    let bobby = world.user("bobby").await?;

    // alice lists X, bobby offers Y for it
    let x = world.book(&alice, "Book X").await?;
    let y = world.book(&bobby, "Book Y").await?;

    let reply = world
        .api
        .create_trade(&bobby, json!({ "book": x, "offer": [y], "description": "swap?" }))
        .await;
    assert_eq!(reply.status, 200, "{}", reply.body);
    let trade = &reply.body["trade"];
    let trade_id = trade["id"].as_str().context("trade id")?.to_string();
    assert_eq!(trade["status"], "P");
    assert_eq!(trade["listUser"]["username"], "alice");
    assert_eq!(trade["offerUser"]["username"], "bobby");
    assert_eq!(trade["listBook"]["owner"], "alice");
    assert_eq!(trade["offerBooks"][0]["title"], "Book Y");
    assert!(trade.get("selectedBook").is_none());

    // alice accepts, selecting Y
    let reply = world
        .api
        .update_trade(&alice, json!({ "trade": trade_id, "status": "A", "selection": y }))
        .await;
    assert_eq!(reply.status, 200, "{}", reply.body);

    let view = world.api.trades.get_trade_view(&trade_id).await?;
    assert_eq!(view.status, TradeStatus::Accepted);
    assert_eq!(view.selected_book.map(|b| b.id), Some(y.clone()));

    // bobby writes twice, alice once
    for (session, content) in [(&bobby, "hi"), (&alice, "hello"), (&bobby, "when?")] {
        let reply = world
            .api
            .create_message(session, json!({ "content": content, "trade": trade_id }))
            .await;
        assert_eq!(reply.status, 200, "{}", reply.body);
    }
    let reply = world.api.list_messages(&alice, &trade_id).await;
    let contents: Vec<_> = reply.body["messages"]
        .as_array()
        .context("messages")?
        .iter()
        .map(|m| m["content"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(contents, ["hi", "hello", "when?"]);

    // alice backs out after accepting
    let reply = world
        .api
        .update_trade(&alice, json!({ "trade": trade_id, "status": "C" }))
        .await;
    assert_eq!(reply.status, 200, "{}", reply.body);
    let reply = world
        .api
        .update_trade(&alice, json!({ "trade": trade_id, "status": "A", "selection": y }))
        .await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["error"], "Trade is no longer pending.");

    let view = world.api.trades.get_trade_view(&trade_id).await?;
    assert_eq!(view.status, TradeStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn create_trade_reports_first_failing_precondition() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;
    let bobby = world.user("bobby").await?;
    let x = world.book(&alice, "Book X").await?;
    let x2 = world.book(&alice, "Book X2").await?;
    let y = world.book(&bobby, "Book Y").await?;
    let trades = &world.api.trades;

    let err = trades.create_trade(offer(&x, &[]), "bobby").await.unwrap_err();
    assert_eq!(err.to_string(), "Missing or invalid parameters.");

    // a well formed request for a book that does not exist
    let err = trades.create_trade(offer("book_nope", &[&y]), "bobby").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert_eq!(err.to_string(), "Listing book does not exist.");

    // self trade is checked before the offer set
    let err = trades.create_trade(offer(&x, &[&x2]), "alice").await.unwrap_err();
    assert_eq!(err.to_string(), "You cannot trade with yourself.");

    // offering somebody else's book
    let err = trades.create_trade(offer(&x, &[&x2]), "bobby").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid offer.");

    // offering a book that does not exist
    let err = trades.create_trade(offer(&x, &[&y, "book_nope"]), "bobby").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid offer.");

    // offering the same book twice
    let err = trades.create_trade(offer(&x, &[&y, &y]), "bobby").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid offer.");

    let view = trades.create_trade(offer(&x, &[&y]), username(&bobby)).await?;
    assert_eq!(view.list_user.username, "alice");
    assert_eq!(view.status, TradeStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn accept_requires_lister_pending_and_offered_selection() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;
    let bobby = world.user("bobby").await?;
    let x = world.book(&alice, "Book X").await?;
    let y = world.book(&bobby, "Book Y").await?;
    let z = world.book(&bobby, "Book Z").await?;
    let trades = &world.api.trades;

    let trade = trades.create_trade(offer(&x, &[&y, &z]), "bobby").await?;
    assert_eq!(trade.offer_books.len(), 2);

    let err = trades.accept_trade("trade_nope", &y, "alice").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    // the offerer cannot accept its own offer
    let err = trades.accept_trade(&trade.id, &y, "bobby").await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    // the listed book is not part of the offer
    let err = trades.accept_trade(&trade.id, &x, "alice").await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let accepted = trades.accept_trade(&trade.id, &z, "alice").await?;
    assert_eq!(accepted.status, TradeStatus::Accepted);
    assert_eq!(accepted.selected_book.as_deref(), Some(z.as_str()));

    // selectedBook is set exactly once
    let err = trades.accept_trade(&trade.id, &y, "alice").await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    let view = trades.get_trade_view(&trade.id).await?;
    assert_eq!(view.selected_book.map(|b| b.id), Some(z));
    Ok(())
}

#[tokio::test]
async fn cancel_by_participants_only_and_only_once() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;
    let bobby = world.user("bobby").await?;
    world.user("carol").await?;
    let x = world.book(&alice, "Book X").await?;
    let y = world.book(&bobby, "Book Y").await?;
    let trades = &world.api.trades;

    let first = trades.create_trade(offer(&x, &[&y]), "bobby").await?;
    let err = trades.cancel_trade(&first.id, "carol").await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    // offerer withdraws a pending trade
    let cancelled = trades.cancel_trade(&first.id, "bobby").await?;
    assert_eq!(cancelled.status, TradeStatus::Cancelled);

    let err = trades.cancel_trade(&first.id, "alice").await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(err.to_string(), "Trade has already been cancelled.");

    // lister withdraws an accepted trade
    let second = trades.create_trade(offer(&x, &[&y]), "bobby").await?;
    trades.accept_trade(&second.id, &y, "alice").await?;
    let cancelled = trades.cancel_trade(&second.id, "alice").await?;
    assert_eq!(cancelled.status, TradeStatus::Cancelled);
    assert_eq!(cancelled.selected_book.as_deref(), Some(y.as_str()));
    Ok(())
}

#[tokio::test]
async fn session_tokens_expire_and_are_revoked() -> anyhow::Result<()> {
    let world = World::new().await?;
    world.user("alice").await?;
    let auth = &world.api.auth;

    auth.login("Alice", common::PASSWORD, 60, "laptop").await?;
    auth.login("alice", common::PASSWORD, 600, "phone").await?;
    assert!(auth.validate("alice", "laptop").await?);
    assert!(auth.validate("alice", "phone").await?);

    // re-login refreshes instead of duplicating
    let user = auth.login("alice", common::PASSWORD, 60, "laptop").await?;
    assert_eq!(user.authorized_tokens.len(), 3); // fixture session, laptop, phone

    world.clock.advance_seconds(60);
    assert!(!auth.validate("alice", "laptop").await?);
    assert!(auth.validate("alice", "phone").await?);

    // the next login prunes what expired
    let user = auth.login("alice", common::PASSWORD, 60, "tablet").await?;
    assert_eq!(user.authorized_tokens.len(), 3); // fixture session, phone, tablet

    auth.logout("alice", "phone").await?;
    auth.logout("alice", "phone").await?;
    assert!(!auth.validate("alice", "phone").await?);
    assert!(auth.validate("alice", "tablet").await?);

    // session ids are never stored in the clear
    let stored: User = world.store.find_user("alice").await?.context("alice")?;
    assert!(stored.authorized_tokens.iter().all(|t| t.session_digest != "tablet"));
    Ok(())
}

#[tokio::test]
async fn login_rejections() -> anyhow::Result<()> {
    let world = World::new().await?;
    world.user("alice").await?;
    let auth = &world.api.auth;

    let err = auth.login("alice", "wrong1", 60, "s").await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCredentials));
    let err = auth.login("nobody", common::PASSWORD, 60, "s").await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCredentials));
    let err = auth.login("alice", common::PASSWORD, 0, "s").await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    assert!(!auth.validate("alice", "s").await?);
    Ok(())
}

#[tokio::test]
async fn expiry_past_the_storable_range_is_a_validation_error() -> anyhow::Result<()> {
    let world = World::new().await?;
    world.user("alice").await?;

    let err = world
        .api
        .auth
        .login("alice", common::PASSWORD, 10_000_000_000, "far")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let mut session = Session::new("far");
    let reply = world
        .api
        .login(
            &mut session,
            json!({ "username": "alice", "password": common::PASSWORD, "expiry": 10_000_000_000_i64 }),
        )
        .await;
    assert_eq!(reply.status, 400);
    assert_eq!(
        reply.body["error"],
        "Expiry must be a positive number of seconds."
    );
    assert_eq!(session.username, None);
    Ok(())
}

#[tokio::test]
async fn endpoints_require_a_live_session() -> anyhow::Result<()> {
    let world = World::new().await?;
    let mut alice = world.user("alice").await?;

    let anonymous = Session::new("anon");
    let reply = world.api.list_trades(&anonymous).await;
    assert_eq!(reply.status, 403);
    assert_eq!(reply.body["error"], AUTH_REQUIRED);

    // a forged username without a token is rejected too
    let forged = Session {
        id: "forged".to_string(),
        username: Some("alice".to_string()),
    };
    assert_eq!(world.api.list_trades(&forged).await.status, 403);

    assert!(world.api.list_trades(&alice).await.is_success());
    let reply = world.api.logout(&mut alice).await;
    assert!(reply.is_success());
    assert_eq!(alice.username, None);

    let status = world.api.status(&alice).await;
    assert_eq!(status.body, json!({ "success": true, "authenticated": false }));
    Ok(())
}

#[tokio::test]
async fn api_maps_errors_to_envelopes() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;

    let reply = world.api.get_trade("trade_missing").await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body, json!({ "success": false, "error": "Trade not found." }));

    let reply = world
        .api
        .update_trade(&alice, json!({ "trade": "trade_missing", "status": "P" }))
        .await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["error"], "Invalid status.");

    let reply = world.api.create_trade(&alice, json!({ "book": 7 })).await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["error"], "Missing or invalid parameters.");

    let reply = world.api.recent_books(0).await;
    assert_eq!(reply.body["error"], "n must be greater than 0.");
    Ok(())
}

#[tokio::test]
async fn messages_are_private_to_participants() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;
    let bobby = world.user("bobby").await?;
    world.user("carol").await?;
    let x = world.book(&alice, "Book X").await?;
    let y = world.book(&bobby, "Book Y").await?;
    let trade = world.api.trades.create_trade(offer(&x, &[&y]), "bobby").await?;
    let messages = &world.api.messages;

    let err = messages.create_message("psst", &trade.id, "carol").await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));
    let err = messages.list_trade_messages(&trade.id, "carol").await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let err = messages.create_message("  ", &trade.id, "alice").await.unwrap_err();
    assert_eq!(err.to_string(), "Missing content or trade");
    let err = messages.create_message("hi", "trade_nope", "alice").await.unwrap_err();
    assert_eq!(err.to_string(), "Trade does not exist");

    let posted = messages.create_message("hi", &trade.id, "alice").await?;
    assert_eq!(posted.sender, "alice");
    assert_eq!(messages.list_trade_messages(&trade.id, "bobby").await?, vec![posted]);
    Ok(())
}

#[tokio::test]
async fn list_trades_returns_own_trades_oldest_first() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;
    let bobby = world.user("bobby").await?;
    let carol = world.user("carol").await?;
    let x = world.book(&alice, "Book X").await?;
    let y = world.book(&bobby, "Book Y").await?;
    let z = world.book(&carol, "Book Z").await?;
    let trades = &world.api.trades;

    let first = trades.create_trade(offer(&x, &[&y]), "bobby").await?;
    world.clock.advance_seconds(5);
    let second = trades.create_trade(offer(&y, &[&z]), "carol").await?;
    world.clock.advance_seconds(5);
    let third = trades.create_trade(offer(&z, &[&x]), "alice").await?;

    let ids = |views: Vec<book_trade::aggregate::TradeView>| -> Vec<String> {
        views.into_iter().map(|v| v.id).collect()
    };
    assert_eq!(
        ids(trades.list_trades_for_user("bobby").await?),
        [first.id.clone(), second.id.clone()]
    );
    assert_eq!(
        ids(trades.list_trades_for_user("alice").await?),
        [first.id, third.id]
    );
    assert!(trades.list_trades_for_user("nobody").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn counterparty_is_notified() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;
    let bobby = world.user("bobby").await?;
    let x = world.book(&alice, "Book X").await?;
    let y = world.book(&bobby, "Book Y").await?;
    let mut rx = world.notifier.subscribe();

    let trade = world.api.trades.create_trade(offer(&x, &[&y]), "bobby").await?;
    world.api.trades.accept_trade(&trade.id, &y, "alice").await?;

    assert_eq!(
        rx.recv().await?,
        Delivery {
            username: "alice".to_string(),
            event: Event::TradeCreated {
                trade: trade.id.clone()
            },
        }
    );
    assert_eq!(
        rx.recv().await?,
        Delivery {
            username: "bobby".to_string(),
            event: Event::TradeUpdated {
                trade: trade.id,
                status: TradeStatus::Accepted,
            },
        }
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_have_a_single_winner() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;
    let bobby = world.user("bobby").await?;
    let x = world.book(&alice, "Book X").await?;
    let mut offered = vec![];
    for n in 0..4 {
        offered.push(world.book(&bobby, &format!("Book Y{n}")).await?);
    }
    let refs: Vec<&str> = offered.iter().map(String::as_str).collect();
    let trade = world.api.trades.create_trade(offer(&x, &refs), "bobby").await?;

    let mut handles = vec![];
    for selection in offered.clone() {
        let api = world.api.clone();
        let trade_id = trade.id.clone();
        handles.push(tokio::spawn(async move {
            let result = api.trades.accept_trade(&trade_id, &selection, "alice").await;
            (selection, result)
        }));
    }

    let mut winners = vec![];
    for handle in handles {
        let (selection, result) = handle.await?;
        match result {
            Ok(_) => winners.push(selection),
            Err(ServiceError::Conflict(message)) => {
                assert_eq!(message, "Trade is no longer pending.")
            }
            Err(other) => anyhow::bail!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let view = world.api.trades.get_trade_view(&trade.id).await?;
    assert_eq!(view.status, TradeStatus::Accepted);
    assert_eq!(view.selected_book.map(|b| b.id), winners.pop());
    Ok(())
}

#[tokio::test]
async fn registration_conflicts_and_profiles() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;
    world.book(&alice, "Book X").await?;

    let reply = world
        .api
        .register(json!({
            "username": "alice2",
            "email": "ALICE@example.com",
            "password": common::PASSWORD,
            "gender": "Male",
        }))
        .await;
    assert_eq!(reply.body["error"], "Email already taken.");

    let reply = world
        .api
        .register(json!({
            "username": "Alice",
            "email": "other@example.com",
            "password": common::PASSWORD,
            "gender": "Male",
        }))
        .await;
    assert_eq!(reply.body["error"], "Username already taken.");

    let reply = world.api.user_profile("alice").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["user"]["books"][0]["title"], "Book X");
    assert!(reply.body["user"].get("passwordDigest").is_none());

    let reply = world.api.status(&alice).await;
    assert_eq!(reply.body["authenticated"], true);
    assert_eq!(reply.body["user"]["username"], "alice");

    assert_eq!(world.api.user_profile("nobody").await.status, 404);
    Ok(())
}

#[tokio::test]
async fn catalog_genres_and_recent_books() -> anyhow::Result<()> {
    let world = World::new().await?;
    let alice = world.user("alice").await?;
    let catalog = &world.api.catalog;

    let err = catalog.add_genre("Poetry", "alice").await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));
    let err = catalog.add_genre("Fiction", common::ADMIN).await.unwrap_err();
    assert_eq!(err.to_string(), "Genre already exists.");
    catalog.add_genre("Drama", common::ADMIN).await?;
    assert_eq!(catalog.list_genres().await?, ["Drama", "Fiction"]);

    let reply = world
        .api
        .create_book(&alice, json!({ "title": "T", "author": "A", "genre": "Horror" }))
        .await;
    assert_eq!(reply.body["error"], "Invalid genre.");

    let old = world.book(&alice, "Old").await?;
    let new = world.book(&alice, "New").await?;

    let recent = catalog.recent_books(1).await?;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, new);
    assert_eq!(recent[0].genre, "Fiction");
    assert_eq!(recent[0].owner, "alice");

    let both: Vec<_> = catalog.recent_books(10).await?.into_iter().map(|b| b.id).collect();
    assert_eq!(both, [new, old]);
    Ok(())
}
