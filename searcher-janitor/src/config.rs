use envconfig::Envconfig;

use searcher_common::config::{CoreConfig, EnvMsDuration};

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "4003")]
    pub port: u16,

    /// How often the sweeper promotes due retries and reaps stalled reservations.
    #[envconfig(from = "SWEEP_INTERVAL", default = "5000")]
    pub sweep_interval: EnvMsDuration,

    #[envconfig(nested = true)]
    pub core: CoreConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
