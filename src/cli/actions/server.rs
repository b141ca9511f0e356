use crate::api;
use crate::cli::actions::Action;
use anyhow::{Context, Result};
use url::Url;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server { port, dsn, smtp } => {
            let dsn = Url::parse(&dsn).context("invalid database DSN")?;

            api::new(port, dsn.as_str(), smtp).await?;
        }
    }

    Ok(())
}
