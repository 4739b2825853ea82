mod load;
mod settings;

pub use load::{load_handler_config, replace_env_vars};
pub use settings::{HandlerConfig, Tunables};
