use crate::{
    api::handlers::auth::lockout,
    cli::actions::server::connect_database,
    store::Store,
};
use anyhow::{bail, Result};

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub username: String,
}

/// Clear the lock of one account.
///
/// # Errors
/// Returns an error if the database is unreachable or the user does not exist.
pub async fn execute(args: Args) -> Result<()> {
    let pool = connect_database(&args.dsn).await?;
    let store = Store::postgres(pool);

    if !lockout::unlock(&store, &args.username).await? {
        bail!("No such user: {}", args.username);
    }

    println!("Unlocked {}", args.username);
    Ok(())
}
