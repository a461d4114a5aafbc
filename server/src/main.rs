use std::sync::Arc;

use minesweep_server::{
    cors::create_cors,
    rate_limit::create_rate_limiter,
    routes::{create_lobby, health, join_lobby, websocket},
    store::{SessionStore, SharedStore},
    sweeper::start_sweeper,
};
use rocket::{
    Build, Rocket,
    fairing::{Fairing, Info, Kind},
    routes,
};
use tracing::{info, warn};

struct SweeperFairing;

#[rocket::async_trait]
impl Fairing for SweeperFairing {
    fn info(&self) -> Info {
        Info {
            name: "Session Sweeper",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        if let Some(store) = rocket.state::<SharedStore>() {
            let store = store.clone();
            tokio::spawn(async move {
                start_sweeper(store).await;
            });
        } else {
            warn!("no session store registered, sweeper not started");
        }
        Ok(rocket)
    }
}

#[rocket::launch]
fn rocket() -> Rocket<Build> {
    tracing_subscriber::fmt::init();
    info!("Starting MineSweep Together server");

    let store: SharedStore = Arc::new(SessionStore::new());
    let rate_limiter = create_rate_limiter();

    rocket::build()
        .attach(create_cors())
        .attach(SweeperFairing)
        .manage(store)
        .manage(rate_limiter)
        .mount("/", routes![health, create_lobby, join_lobby, websocket])
}
