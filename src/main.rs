use std::process;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = deo::cli::run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
