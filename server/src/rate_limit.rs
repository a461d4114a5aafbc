use std::{
    env,
    net::IpAddr,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use rocket::{
    State,
    http::Status,
    request::{self, FromRequest, Request},
};

const WINDOW: Duration = Duration::from_secs(60);

/// Per-IP fixed window counter guarding lobby creation.
#[derive(Debug)]
pub struct CreateWindow {
    window_start: Instant,
    count: u32,
}

pub type RateLimiter = DashMap<IpAddr, CreateWindow>;

pub fn create_rate_limiter() -> RateLimiter {
    DashMap::new()
}

pub struct ClientIp(pub IpAddr);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|header| header.split(',').next())
            .and_then(|ip| ip.trim().parse().ok())
            .or_else(|| {
                req.headers()
                    .get_one("X-Real-IP")
                    .and_then(|ip| ip.parse().ok())
            })
            .or_else(|| req.client_ip())
            .unwrap_or(IpAddr::from([127, 0, 0, 1]));

        request::Outcome::Success(ClientIp(ip))
    }
}

pub fn check_rate_limit(
    rate_limiter: &State<RateLimiter>,
    client_ip: &ClientIp,
) -> Result<(), Status> {
    let limit: u32 = env::var("RATE_LIMIT_LOBBIES_PER_MINUTE")
        .unwrap_or_else(|_| "10".to_string())
        .parse()
        .unwrap_or(10);

    let mut entry = rate_limiter
        .entry(client_ip.0)
        .or_insert_with(|| CreateWindow {
            window_start: Instant::now(),
            count: 0,
        });

    if entry.window_start.elapsed() >= WINDOW {
        entry.window_start = Instant::now();
        entry.count = 0;
    }

    if entry.count < limit {
        entry.count += 1;
        Ok(())
    } else {
        Err(Status::TooManyRequests)
    }
}
