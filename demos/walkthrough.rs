//! End to end walk through a trade on a throwaway database.
//!
//! Run with `cargo run --example walkthrough [config.yaml]`.
use std::sync::Arc;

use book_trade::api::{Api, Reply, Session};
use book_trade::config::AppConfig;
use book_trade::logging::init_logging;
use book_trade::notify::BroadcastNotifier;
use serde_json::json;

fn show(step: &str, reply: &Reply) {
    println!("{step}: {} {}", reply.status, reply.body);
}

async fn join(api: &Api<book_trade::store::SledStore>, username: &str) -> anyhow::Result<Session> {
    let reply = api
        .register(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "secret1",
            "gender": "Female",
        }))
        .await;
    show(&format!("register {username}"), &reply);

    let mut session = Session::new(format!("demo-{username}"));
    let reply = api
        .login(
            &mut session,
            json!({ "username": username, "password": "secret1", "expiry": 600 }),
        )
        .await;
    anyhow::ensure!(reply.is_success(), "login failed: {}", reply.body);
    Ok(session)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    config.store.temporary = true;
    config.admins = vec!["curator".to_string()];
    init_logging(&config)?;

    let store = Arc::new(config.store.open()?);
    let notifier = Arc::new(BroadcastNotifier::new(config.notify_capacity));
    let mut events = notifier.subscribe();
    let api = Api::from_config(store, &config, notifier)?;

    let curator = join(&api, "curator").await?;
    show(
        "add genre",
        &api.add_genre(&curator, json!({ "genre": "Fiction" })).await,
    );

    let alice = join(&api, "alice").await?;
    let bobby = join(&api, "bobby").await?;

    let listed = api
        .create_book(
            &alice,
            json!({ "title": "Dune", "author": "Frank Herbert", "genre": "Fiction" }),
        )
        .await;
    show("alice lists", &listed);
    let offered = api
        .create_book(
            &bobby,
            json!({ "title": "Hyperion", "author": "Dan Simmons", "genre": "Fiction" }),
        )
        .await;
    show("bobby lists", &offered);

    let created = api
        .create_trade(
            &bobby,
            json!({
                "book": listed.body["book"]["id"],
                "offer": [offered.body["book"]["id"]],
                "description": "Hyperion for Dune?",
            }),
        )
        .await;
    show("bobby offers", &created);
    let trade_id = created.body["trade"]["id"].as_str().unwrap_or_default().to_string();

    let accepted = api
        .update_trade(
            &alice,
            json!({ "trade": trade_id, "status": "A", "selection": offered.body["book"]["id"] }),
        )
        .await;
    show("alice accepts", &accepted);

    show(
        "bobby writes",
        &api.create_message(&bobby, json!({ "content": "Deal!", "trade": trade_id }))
            .await,
    );
    show("messages", &api.list_messages(&alice, &trade_id).await);
    show("alice's trades", &api.list_trades(&alice).await);

    while let Ok(delivery) = events.try_recv() {
        println!("event for {}: {:?}", delivery.username, delivery.event);
    }
    Ok(())
}
