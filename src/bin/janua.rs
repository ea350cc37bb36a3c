use anyhow::Result;
use janua::cli::{actions::server, start};

#[tokio::main]
async fn main() -> Result<()> {
    let action = start()?;

    server::handle(action).await?;

    Ok(())
}
