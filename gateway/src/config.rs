use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Process-scoped, immutable configuration assembled once at startup from
/// the environment. Nothing downstream reads the environment directly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address of the upstream TCP engine this gateway dials per session.
    pub tcp_server_addr: SocketAddr,
    /// Address the gateway's own HTTP/WebSocket server binds to.
    pub http_addr: SocketAddr,
    /// Required `Origin` header value for the `/ws` upgrade.
    pub frontend_origin: String,
    /// `spdlog` level name (`trace`, `debug`, `info`, `warn`, `error`).
    pub log_level: String,
    /// Default idle threshold before the reaper terminates a session.
    pub max_idle_time: Duration,
    /// Floor on the reaper's wake interval.
    pub reaper_min_interval: Duration,
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            tcp_server_addr: parse_addr("TCP_SERVER_PORT", "127.0.0.1:9003"),
            http_addr: parse_addr("HTTP_PORT", "0.0.0.0:8080"),
            frontend_origin: env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            log_level: env::var("GATEWAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_idle_time: Duration::from_secs(parse_u64("GATEWAY_MAX_IDLE_SECS", 30)),
            reaper_min_interval: Duration::from_secs(parse_u64(
                "GATEWAY_REAPER_MIN_INTERVAL_SECS",
                1,
            )),
        }
    }
}

fn parse_addr(var: &str, default: &str) -> SocketAddr {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| default.parse().expect("default address must be valid"))
}

fn parse_u64(var: &str, default: u64) -> u64 {
    env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_unset() {
        let config = Config {
            tcp_server_addr: parse_addr("GATEWAY_TEST_UNSET_ADDR", "127.0.0.1:9003"),
            http_addr: parse_addr("GATEWAY_TEST_UNSET_ADDR_2", "0.0.0.0:8080"),
            frontend_origin: "http://localhost:3000".to_string(),
            log_level: "info".to_string(),
            max_idle_time: Duration::from_secs(30),
            reaper_min_interval: Duration::from_secs(1),
        };
        assert_eq!(config.tcp_server_addr.port(), 9003);
        assert_eq!(config.max_idle_time, Duration::from_secs(30));
    }
}
