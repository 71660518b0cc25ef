use clap::Parser;
use log::info;
use esp32_car_remote::{init_logging, run, Args};
use esp32_car_remote::error::AppRunError;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.log_level())?;
    info!(concat!("ESP32 car remote ", env!("CARGO_PKG_VERSION")));

    run(args).await
}
