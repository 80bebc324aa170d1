#[tokio::main]
async fn main() {
    if let Err(e) = guildsync_lib::run().await {
        eprintln!("guildsync: {e}");
        std::process::exit(1);
    }
}
