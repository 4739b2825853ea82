//! Thin demonstration binary: wires a `Handler` up against a YAML config
//! file end to end. Not the focus of this crate -- applications are
//! expected to embed `logship::Handler` directly rather than run this.

use std::path::PathBuf;

use tokio::runtime::Builder;
use tracing::{info, info_span, Level};

use logship::formatter::{FormatterOptions, LogstashFormatter};
use logship::{init_tracing, Handler};

fn main() {
    init_tracing(Level::INFO);

    let _span = info_span!("startup").entered();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("logship.yaml"));

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("could not create tokio runtime");

    runtime.block_on(async move {
        let formatter = Box::new(LogstashFormatter::new(FormatterOptions::default()));
        let handler = Handler::from_config_file(&config_path, formatter)
            .await
            .expect("could not start log-shipping handler");

        info!("logship running, press ctrl-c to stop");
        let _ = tokio::signal::ctrl_c().await;

        handler.close().await;
    });
}
