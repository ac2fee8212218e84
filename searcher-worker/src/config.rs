use envconfig::Envconfig;

use searcher_common::config::{CoreConfig, EnvMsDuration};

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "4002")]
    pub port: u16,

    /// Interval each dispatcher runner polls the queue while idle.
    #[envconfig(from = "POLL_INTERVAL", default = "200")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(nested = true)]
    pub core: CoreConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
