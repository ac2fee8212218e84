use envconfig::Envconfig;
use searcher_common::config::CoreConfig;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "PORT", default = "4001")]
    pub port: u16,

    #[envconfig(default = "5000000")]
    pub max_body_size: usize,

    #[envconfig(nested = true)]
    pub core: CoreConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
