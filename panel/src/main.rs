#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(feature = "esp32"))]
mod host;

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}

/// One boot is one wake cycle; `esp::run` only comes back if setup failed.
#[cfg(feature = "esp32")]
fn main() {
    if let Err(err) = esp::run() {
        esp::back_off(err);
    }
}
