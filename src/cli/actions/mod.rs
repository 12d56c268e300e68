pub mod server;
pub mod unlock;

use anyhow::Result;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Unlock(unlock::Args),
}

impl Action {
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
            Self::Unlock(args) => unlock::execute(args).await,
        }
    }
}
