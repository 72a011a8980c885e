use std::env;

/// Service settings read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port (`PORT`, default 5001)
    pub port: u16,
    /// Start with the demo tasks loaded
    pub seed: bool,
}

impl Config {
    /// Read `PORT` from the environment and `--seed` from the arguments
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5001);
        let seed = env::args().skip(1).any(|arg| arg == "--seed");
        Config { port, seed }
    }
}
