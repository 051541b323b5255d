#[tokio::main]
async fn main() {
    if let Err(error) = sentiment_pulse_lib::run().await {
        eprintln!("sentiment-pulse: {error}");
        std::process::exit(1);
    }
}
