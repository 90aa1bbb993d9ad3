#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cipher_relay::run().await
}
