pub mod seed;
pub mod server;

use anyhow::Result;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    SeedAdmin(seed::Args),
}

impl Action {
    /// Execute the action
    ///
    /// # Errors
    ///
    /// Returns an error if the action fails
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Server(args) => server::handle(args).await?,
            Self::SeedAdmin(args) => seed::handle(args).await?,
        }

        Ok(())
    }
}
