#[tokio::main(flavor = "multi_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    std::process::exit(magpie_cli::run().await);
}
